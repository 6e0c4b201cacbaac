//! Iterative response recovery and radiance merge.
//!
//! Reference: M. Robertson, S. Borman, R. Stevenson, "Dynamic range
//! improvement through multiple exposures", ICIP 1999.

use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::consts::{
    DEFAULT_ROBERTSON_ITERATIONS, DEFAULT_ROBERTSON_THRESHOLD, PARALLEL_PIXEL_THRESHOLD,
    RESPONSE_LEVELS,
};
use crate::error::{BracketError, Result};
use crate::frame::{ColorFrame, Image};

use super::{check_merge_input, color_stack, level, plane, RadianceImage, ResponseCurve};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RobertsonParams {
    pub max_iterations: usize,
    /// Stop once the summed absolute change of a channel's response drops
    /// below this.
    pub threshold: f32,
}

impl Default for RobertsonParams {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_ROBERTSON_ITERATIONS,
            threshold: DEFAULT_ROBERTSON_THRESHOLD,
        }
    }
}

/// Gaussian weighting, exactly zero at both ends of the range.
pub fn robertson_weights() -> [f64; RESPONSE_LEVELS] {
    let q = (RESPONSE_LEVELS - 1) as f64 / 4.0;
    let e4 = 4.0f64.exp();
    let scale = e4 / (e4 - 1.0);
    let shift = 1.0 / (1.0 - e4);
    let mut w = [0.0; RESPONSE_LEVELS];
    for (z, v) in w.iter_mut().enumerate() {
        let x = z as f64 / q - 2.0;
        *v = (scale * (-x * x).exp() + shift).max(0.0);
    }
    w
}

/// 8-bit levels of one channel, one flattened row-major buffer per frame.
fn channel_levels(colors: &[ColorFrame], index: usize) -> Vec<Vec<u8>> {
    colors
        .iter()
        .map(|c| plane(c, index).iter().map(|&v| level(v) as u8).collect())
        .collect()
}

/// Least-squares radiance of pixel `p` given the response.
///
/// A pixel clipped in every frame has zero total weight and falls back to
/// the unweighted estimate.
fn pixel_radiance(
    levels: &[Vec<u8>],
    exposures: &[f32],
    response: &[f32],
    weights: &[f64; RESPONSE_LEVELS],
    p: usize,
) -> f32 {
    let (mut num, mut den) = (0.0f64, 0.0f64);
    let (mut plain_num, mut plain_den) = (0.0f64, 0.0f64);
    for (frame, &t) in levels.iter().zip(exposures) {
        let z = frame[p] as usize;
        let t = t as f64;
        let r = response[z] as f64;
        num += t * weights[z] * r;
        den += t * t * weights[z];
        plain_num += t * r;
        plain_den += t * t;
    }
    if den > 0.0 {
        (num / den) as f32
    } else {
        (plain_num / plain_den) as f32
    }
}

fn channel_radiance(
    levels: &[Vec<u8>],
    exposures: &[f32],
    response: &[f32],
    weights: &[f64; RESPONSE_LEVELS],
) -> Vec<f32> {
    let len = levels.first().map_or(0, Vec::len);
    let pixel = |p: usize| pixel_radiance(levels, exposures, response, weights, p);
    if len >= PARALLEL_PIXEL_THRESHOLD {
        (0..len).into_par_iter().map(pixel).collect()
    } else {
        (0..len).map(pixel).collect()
    }
}

fn calibrate_channel(
    levels: &[Vec<u8>],
    exposures: &[f32],
    params: &RobertsonParams,
    weights: &[f64; RESPONSE_LEVELS],
) -> Vec<f32> {
    let mut count = [0usize; RESPONSE_LEVELS];
    for frame in levels {
        for &z in frame {
            count[z as usize] += 1;
        }
    }
    let half = RESPONSE_LEVELS / 2;
    let anchor = (0..RESPONSE_LEVELS)
        .filter(|&z| count[z] > 0)
        .min_by_key(|&z| z.abs_diff(half))
        .unwrap_or(half);

    let mut response: Vec<f32> = (0..RESPONSE_LEVELS).map(|z| z as f32 / half as f32).collect();
    for iteration in 1..=params.max_iterations {
        let radiance = channel_radiance(levels, exposures, &response, weights);

        let mut sums = [0.0f64; RESPONSE_LEVELS];
        for (frame, &t) in levels.iter().zip(exposures) {
            for (&z, &e) in frame.iter().zip(&radiance) {
                sums[z as usize] += t as f64 * e as f64;
            }
        }

        // Unobserved levels keep their previous value.
        let mut next = response.clone();
        for z in 0..RESPONSE_LEVELS {
            if count[z] > 0 {
                next[z] = (sums[z] / count[z] as f64) as f32;
            }
        }
        let pivot = next[anchor];
        if pivot > 0.0 && pivot.is_finite() {
            next.iter_mut().for_each(|v| *v /= pivot);
        }

        let change: f32 = next.iter().zip(&response).map(|(a, b)| (a - b).abs()).sum();
        response = next;
        if change < params.threshold {
            debug!(iteration, change, "Response converged");
            break;
        }
    }
    response
}

/// Recover the camera response per channel by alternating radiance and
/// response estimates, starting from a linear response.
pub fn calibrate_robertson(
    images: &[Image],
    exposures: &[f32],
    params: &RobertsonParams,
) -> Result<ResponseCurve> {
    check_merge_input(images, exposures)?;
    if params.max_iterations == 0 {
        return Err(BracketError::Configuration(
            "Robertson calibration needs at least one iteration".into(),
        ));
    }

    let colors = color_stack(images);
    let weights = robertson_weights();
    let channel = |index: usize| {
        calibrate_channel(&channel_levels(&colors, index), exposures, params, &weights)
    };

    Ok(ResponseCurve {
        red: channel(0),
        green: channel(1),
        blue: channel(2),
    })
}

/// Per-channel weighted least-squares radiance over the stack.
pub fn merge_robertson(
    images: &[Image],
    exposures: &[f32],
    response: &ResponseCurve,
) -> Result<RadianceImage> {
    check_merge_input(images, exposures)?;

    let colors = color_stack(images);
    let (h, w) = (images[0].height(), images[0].width());
    let weights = robertson_weights();

    let channel = |index: usize| -> Result<Array2<f32>> {
        let levels = channel_levels(&colors, index);
        let values = channel_radiance(&levels, exposures, response.channels()[index], &weights);
        Array2::from_shape_vec((h, w), values)
            .map_err(|e| BracketError::Merge(format!("radiance plane: {e}")))
    };

    Ok(RadianceImage {
        red: channel(0)?,
        green: channel(1)?,
        blue: channel(2)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_vanish_at_the_ends_and_peak_mid_range() {
        let w = robertson_weights();
        assert!(w[0].abs() < 1e-12);
        assert!(w[255].abs() < 1e-12);
        assert!((w[128] - 1.0).abs() < 1e-3);
        assert!(w[64] < w[100] && w[100] < w[127]);
    }

    #[test]
    fn clipped_pixel_uses_the_unweighted_estimate() {
        let levels = vec![vec![255u8], vec![255u8]];
        let response: Vec<f32> = (0..RESPONSE_LEVELS).map(|z| z as f32 / 128.0).collect();
        let e = pixel_radiance(&levels, &[0.5, 1.0], &response, &robertson_weights(), 0);
        let r = 255.0 / 128.0;
        let expected = (0.5 * r + r) / (0.25 + 1.0);
        assert!((e - expected).abs() < 1e-5);
    }
}
