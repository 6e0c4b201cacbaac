//! Exposure fusion.
//!
//! Each frame gets a per-pixel quality weight from local contrast, colour
//! saturation and well-exposedness; the frames are then blended with
//! Laplacian pyramids so seams do not show. Exposure times are not used and
//! the result is display-referred, roughly in `[0, 1]`.
//!
//! Reference: T. Mertens, J. Kautz, F. Van Reeth, "Exposure Fusion", PG 2007.

use ndarray::{s, Array2, Zip};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::align::pyramid::resize_bilinear;
use crate::color::luminance;
use crate::error::{BracketError, Result};
use crate::filters::gaussian_blur::gaussian_blur_array;
use crate::frame::{check_dimensions, ColorFrame, Image};

use super::{color_stack, RadianceImage};

const WELL_EXPOSED_SIGMA: f32 = 0.2;
const WEIGHT_FLOOR: f32 = 1e-12;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MertensParams {
    pub contrast_weight: f32,
    pub saturation_weight: f32,
    pub exposure_weight: f32,
}

impl Default for MertensParams {
    fn default() -> Self {
        Self {
            contrast_weight: 1.0,
            saturation_weight: 1.0,
            exposure_weight: 0.0,
        }
    }
}

/// Absolute 4-neighbour Laplacian with replicated borders.
fn laplacian_abs(data: &Array2<f32>) -> Array2<f32> {
    let (h, w) = data.dim();
    Array2::from_shape_fn((h, w), |(r, c)| {
        let up = data[[r.saturating_sub(1), c]];
        let down = data[[(r + 1).min(h - 1), c]];
        let left = data[[r, c.saturating_sub(1)]];
        let right = data[[r, (c + 1).min(w - 1)]];
        (up + down + left + right - 4.0 * data[[r, c]]).abs()
    })
}

fn quality_weights(color: &ColorFrame, params: &MertensParams) -> Array2<f32> {
    let gray = luminance(color).data;
    let contrast = laplacian_abs(&gray);
    let two_sigma_sq = 2.0 * WELL_EXPOSED_SIGMA * WELL_EXPOSED_SIGMA;

    let mut weights = Zip::from(&color.red.data)
        .and(&color.green.data)
        .and(&color.blue.data)
        .map_collect(|&r, &g, &b| {
            let mean = (r + g + b) / 3.0;
            let saturation =
                (((r - mean).powi(2) + (g - mean).powi(2) + (b - mean).powi(2)) / 3.0).sqrt();
            let exposedness = [r, g, b]
                .iter()
                .map(|v| (-(v - 0.5).powi(2) / two_sigma_sq).exp())
                .product::<f32>();
            saturation.powf(params.saturation_weight) * exposedness.powf(params.exposure_weight)
        });
    Zip::from(&mut weights)
        .and(&contrast)
        .for_each(|w, &c| *w = *w * c.powf(params.contrast_weight) + WEIGHT_FLOOR);
    weights
}

fn pyr_down(data: &Array2<f32>) -> Array2<f32> {
    gaussian_blur_array(data, 1.0).slice(s![..;2, ..;2]).to_owned()
}

fn pyr_up(data: &Array2<f32>, dim: (usize, usize)) -> Array2<f32> {
    resize_bilinear(data, dim.0, dim.1)
}

fn gaussian_pyramid(data: &Array2<f32>, levels: usize) -> Vec<Array2<f32>> {
    let mut pyramid = vec![data.clone()];
    for _ in 0..levels {
        let next = pyr_down(&pyramid[pyramid.len() - 1]);
        pyramid.push(next);
    }
    pyramid
}

fn laplacian_pyramid(data: &Array2<f32>, levels: usize) -> Vec<Array2<f32>> {
    let gaussian = gaussian_pyramid(data, levels);
    let mut pyramid = Vec::with_capacity(levels + 1);
    for l in 0..levels {
        let up = pyr_up(&gaussian[l + 1], gaussian[l].dim());
        pyramid.push(&gaussian[l] - &up);
    }
    pyramid.push(gaussian[levels].clone());
    pyramid
}

fn collapse(pyramid: &[Array2<f32>]) -> Array2<f32> {
    let mut result = pyramid[pyramid.len() - 1].clone();
    for level in pyramid[..pyramid.len() - 1].iter().rev() {
        result = pyr_up(&result, level.dim()) + level;
    }
    result
}

/// Fuse a stack into one display-referred image.
pub fn merge_mertens(images: &[Image], params: &MertensParams) -> Result<RadianceImage> {
    if images.is_empty() {
        return Err(BracketError::EmptySequence);
    }
    check_dimensions(images)?;
    let colors = color_stack(images);
    let (h, w) = (images[0].height(), images[0].width());

    let mut weights: Vec<Array2<f32>> = colors.iter().map(|c| quality_weights(c, params)).collect();
    let mut total = Array2::<f32>::zeros((h, w));
    for wgt in &weights {
        total += wgt;
    }
    for wgt in &mut weights {
        Zip::from(wgt).and(&total).for_each(|v, &t| *v /= t);
    }

    let levels = (h.min(w).max(1) as f32).log2().floor() as usize;
    debug!(levels, frames = images.len(), "Exposure fusion");

    let mut blended: [Vec<Array2<f32>>; 3] = Default::default();
    for (color, wgt) in colors.iter().zip(&weights) {
        let weight_pyr = gaussian_pyramid(wgt, levels);
        let planes = [&color.red.data, &color.green.data, &color.blue.data];
        for (c, plane) in planes.into_iter().enumerate() {
            let lap = laplacian_pyramid(plane, levels);
            if blended[c].is_empty() {
                blended[c] = lap.iter().map(|l| Array2::zeros(l.dim())).collect();
            }
            for ((acc, l), wl) in blended[c].iter_mut().zip(&lap).zip(&weight_pyr) {
                *acc += &(l * wl);
            }
        }
    }

    let [red, green, blue] = blended.map(|pyr| collapse(&pyr).mapv(|v| v.max(0.0)));
    Ok(RadianceImage { red, green, blue })
}
