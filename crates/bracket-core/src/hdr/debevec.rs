//! Camera response recovery and radiance merge.
//!
//! Reference: P. Debevec, J. Malik, "Recovering High Dynamic Range Radiance
//! Maps from Photographs", SIGGRAPH 1997.

use nalgebra::{DMatrix, DVector};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::consts::{
    DEFAULT_DEBEVEC_LAMBDA, DEFAULT_DEBEVEC_SAMPLES, DEFAULT_RANSAC_SEED, PARALLEL_PIXEL_THRESHOLD,
    RESPONSE_LEVELS,
};
use crate::error::{BracketError, Result};
use crate::frame::Image;

use super::{check_merge_input, color_stack, level, plane, RadianceImage};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DebevecParams {
    /// Pixel locations sampled for the least-squares fit.
    pub samples: usize,
    /// Weight of the smoothness term on the log response.
    pub lambda: f64,
    /// Sample at random positions instead of a regular grid.
    #[serde(default)]
    pub random: bool,
    #[serde(default = "seed_default")]
    pub seed: u64,
}

fn seed_default() -> u64 {
    DEFAULT_RANSAC_SEED
}

impl Default for DebevecParams {
    fn default() -> Self {
        Self {
            samples: DEFAULT_DEBEVEC_SAMPLES,
            lambda: DEFAULT_DEBEVEC_LAMBDA,
            random: false,
            seed: DEFAULT_RANSAC_SEED,
        }
    }
}

/// Recovered linear response: relative radiance per 8-bit pixel value.
#[derive(Clone, Debug, PartialEq)]
pub struct ResponseCurve {
    pub red: Vec<f32>,
    pub green: Vec<f32>,
    pub blue: Vec<f32>,
}

impl ResponseCurve {
    pub fn channels(&self) -> [&[f32]; 3] {
        [self.red.as_slice(), self.green.as_slice(), self.blue.as_slice()]
    }
}

/// Hat weighting favouring mid-tones; never zero.
pub fn triangle_weights() -> [f64; RESPONSE_LEVELS] {
    let half = RESPONSE_LEVELS / 2;
    let mut w = [0.0; RESPONSE_LEVELS];
    for (z, v) in w.iter_mut().enumerate() {
        *v = if z < half {
            z as f64 + 1.0
        } else {
            (RESPONSE_LEVELS - z) as f64
        };
    }
    w
}

fn sample_points(h: usize, w: usize, params: &DebevecParams) -> Vec<(usize, usize)> {
    if params.random {
        let mut rng = StdRng::seed_from_u64(params.seed);
        return (0..params.samples)
            .map(|_| (rng.random_range(0..h), rng.random_range(0..w)))
            .collect();
    }

    let x_points = (((params.samples * w) as f64 / h as f64).sqrt() as usize).max(1);
    let y_points = (params.samples / x_points).max(1);
    let step_x = (w / x_points).max(1);
    let step_y = (h / y_points).max(1);

    let mut points = Vec::with_capacity(x_points * y_points);
    for i in 0..x_points {
        let x = step_x / 2 + i * step_x;
        for j in 0..y_points {
            let y = step_y / 2 + j * step_y;
            if x < w && y < h {
                points.push((y, x));
            }
        }
    }
    points
}

fn solve_channel(
    planes: &[&Array2<f32>],
    exposures: &[f32],
    points: &[(usize, usize)],
    lambda: f64,
    weights: &[f64; RESPONSE_LEVELS],
) -> Result<Vec<f32>> {
    let n = RESPONSE_LEVELS;
    let rows = points.len() * planes.len() + 1 + (n - 2);
    let cols = n + points.len();
    let mut a = DMatrix::<f64>::zeros(rows, cols);
    let mut b = DVector::<f64>::zeros(rows);

    let mut eq = 0;
    for (i, &(y, x)) in points.iter().enumerate() {
        for (plane, &t) in planes.iter().zip(exposures) {
            let z = level(plane[[y, x]]);
            let wz = weights[z];
            a[(eq, z)] = wz;
            a[(eq, n + i)] = -wz;
            b[eq] = wz * (t as f64).ln();
            eq += 1;
        }
    }

    // Pin the middle of the curve to zero.
    a[(eq, n / 2)] = 1.0;
    eq += 1;

    for k in 0..n - 2 {
        let wk = lambda * weights[k + 1];
        a[(eq, k)] = wk;
        a[(eq, k + 1)] = -2.0 * wk;
        a[(eq, k + 2)] = wk;
        eq += 1;
    }

    let solution = a
        .svd(true, true)
        .solve(&b, 1e-12)
        .map_err(|e| BracketError::Merge(format!("response recovery failed: {e}")))?;

    Ok((0..n).map(|z| solution[z].exp() as f32).collect())
}

/// Recover the camera response per channel from a stack with known exposures.
pub fn calibrate_debevec(
    images: &[Image],
    exposures: &[f32],
    params: &DebevecParams,
) -> Result<ResponseCurve> {
    check_merge_input(images, exposures)?;
    if params.samples == 0 {
        return Err(BracketError::Configuration(
            "Debevec calibration needs at least one sample".into(),
        ));
    }

    let colors = color_stack(images);
    let (h, w) = (images[0].height(), images[0].width());
    let points = sample_points(h, w, params);
    let weights = triangle_weights();

    let channel = |index: usize| -> Result<Vec<f32>> {
        let planes: Vec<&Array2<f32>> = colors.iter().map(|c| plane(c, index)).collect();
        solve_channel(&planes, exposures, &points, params.lambda, &weights)
    };

    let response = ResponseCurve {
        red: channel(0)?,
        green: channel(1)?,
        blue: channel(2)?,
    };
    debug!(samples = points.len(), "Response curve recovered");
    Ok(response)
}

/// Weighted average of log radiance over the stack.
///
/// The per-pixel weight is the channel mean of the hat weights, so all three
/// channels of a pixel trust each exposure equally.
pub fn merge_debevec(
    images: &[Image],
    exposures: &[f32],
    response: &ResponseCurve,
) -> Result<RadianceImage> {
    check_merge_input(images, exposures)?;

    let colors = color_stack(images);
    let (h, w) = (images[0].height(), images[0].width());
    let weights = triangle_weights();
    let log_response: Vec<Vec<f64>> = response
        .channels()
        .iter()
        .map(|c| c.iter().map(|&v| (v.max(f32::MIN_POSITIVE) as f64).ln()).collect())
        .collect();
    let log_t: Vec<f64> = exposures.iter().map(|&t| (t as f64).ln()).collect();

    let row_fn = |row: usize| -> Vec<[f32; 3]> {
        (0..w)
            .map(|col| {
                let mut acc = [0.0f64; 3];
                let mut weight_sum = 0.0f64;
                for (color, lt) in colors.iter().zip(&log_t) {
                    let z = [
                        level(color.red.data[[row, col]]),
                        level(color.green.data[[row, col]]),
                        level(color.blue.data[[row, col]]),
                    ];
                    let wz = z.iter().map(|&l| weights[l]).sum::<f64>() / 3.0;
                    for c in 0..3 {
                        acc[c] += wz * (log_response[c][z[c]] - lt);
                    }
                    weight_sum += wz;
                }
                acc.map(|a| (a / weight_sum).exp() as f32)
            })
            .collect()
    };

    let rows: Vec<Vec<[f32; 3]>> = if h * w >= PARALLEL_PIXEL_THRESHOLD {
        (0..h).into_par_iter().map(row_fn).collect()
    } else {
        (0..h).map(row_fn).collect()
    };

    let mut radiance = RadianceImage {
        red: Array2::zeros((h, w)),
        green: Array2::zeros((h, w)),
        blue: Array2::zeros((h, w)),
    };
    for (row, values) in rows.into_iter().enumerate() {
        for (col, [r, g, b]) in values.into_iter().enumerate() {
            radiance.red[[row, col]] = r;
            radiance.green[[row, col]] = g;
            radiance.blue[[row, col]] = b;
        }
    }
    Ok(radiance)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_are_positive_and_peak_in_the_middle() {
        let w = triangle_weights();
        assert_eq!(w[0], 1.0);
        assert_eq!(w[255], 1.0);
        assert_eq!(w[127], 128.0);
        assert_eq!(w[128], 128.0);
    }

    #[test]
    fn grid_sampling_stays_inside() {
        let points = sample_points(40, 60, &DebevecParams::default());
        assert!(!points.is_empty());
        assert!(points.len() <= 70);
        assert!(points.iter().all(|&(y, x)| y < 40 && x < 60));
    }
}
