//! Radiance merge and tonemapping of an aligned exposure stack.

pub mod debevec;
pub mod mertens;
pub mod robertson;
pub mod tonemap;

use ndarray::Array2;
use tracing::{debug, info};

use crate::color::to_color;
use crate::error::{BracketError, Result};
use crate::frame::{check_dimensions, ColorFrame, Image};
use crate::pipeline::config::MergeMethod;

pub use debevec::{calibrate_debevec, merge_debevec, DebevecParams, ResponseCurve};
pub use mertens::{merge_mertens, MertensParams};
pub use robertson::{calibrate_robertson, merge_robertson, robertson_weights, RobertsonParams};
pub use tonemap::{tonemap, DragoParams, ReinhardParams};

/// Floating-point RGB image of relative scene radiance. Values are
/// non-negative and unbounded.
#[derive(Clone, Debug, PartialEq)]
pub struct RadianceImage {
    pub red: Array2<f32>,
    pub green: Array2<f32>,
    pub blue: Array2<f32>,
}

impl RadianceImage {
    pub fn width(&self) -> usize {
        self.red.ncols()
    }

    pub fn height(&self) -> usize {
        self.red.nrows()
    }

    pub fn planes(&self) -> [&Array2<f32>; 3] {
        [&self.red, &self.green, &self.blue]
    }

    /// Largest value over all channels.
    pub fn max_value(&self) -> f32 {
        self.planes()
            .iter()
            .flat_map(|p| p.iter().copied())
            .fold(0.0f32, f32::max)
    }
}

/// One channel of a color frame: 0 red, 1 green, 2 blue.
pub(crate) fn plane(color: &ColorFrame, index: usize) -> &Array2<f32> {
    match index {
        0 => &color.red.data,
        1 => &color.green.data,
        _ => &color.blue.data,
    }
}

/// Quantize a `[0, 1]` value to an 8-bit level.
pub(crate) fn level(v: f32) -> usize {
    (v.clamp(0.0, 1.0) * 255.0).round() as usize
}

/// Expand every image of the stack to three planes.
pub(crate) fn color_stack(images: &[Image]) -> Vec<ColorFrame> {
    images.iter().map(to_color).collect()
}

pub(crate) fn check_merge_input(images: &[Image], exposures: &[f32]) -> Result<()> {
    if images.is_empty() {
        return Err(BracketError::EmptySequence);
    }
    if images.len() != exposures.len() {
        return Err(BracketError::Merge(format!(
            "{} images but {} exposure times",
            images.len(),
            exposures.len()
        )));
    }
    check_dimensions(images)
}

/// Merge an aligned stack into a single radiance image.
pub fn merge(images: &[Image], exposures: &[f32], method: &MergeMethod) -> Result<RadianceImage> {
    check_merge_input(images, exposures)?;
    info!(method = %method, frames = images.len(), "Merging exposures");

    let radiance = match method {
        MergeMethod::Debevec(params) => {
            let response = calibrate_debevec(images, exposures, params)?;
            merge_debevec(images, exposures, &response)?
        }
        MergeMethod::Robertson(params) => {
            let response = calibrate_robertson(images, exposures, params)?;
            merge_robertson(images, exposures, &response)?
        }
        MergeMethod::Mertens(params) => merge_mertens(images, params)?,
    };
    debug!(peak = radiance.max_value(), "Merged radiance");
    Ok(radiance)
}
