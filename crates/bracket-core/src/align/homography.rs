//! Robust planar homography estimation.
//!
//! Normalized direct linear transform (Hartley) on minimal 4-point samples,
//! wrapped in a seeded RANSAC loop, then refit on the inlier set.

use nalgebra::{DMatrix, Matrix3, Vector3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use crate::error::{BracketError, Result};
use crate::pipeline::config::RansacConfig;

const SAMPLE_SIZE: usize = 4;

/// A homography mapping source points onto destination points.
#[derive(Clone, Debug, PartialEq)]
pub struct HomographyEstimate {
    /// Normalized so that `matrix[(2, 2)] == 1`.
    pub matrix: Matrix3<f64>,
    /// Inlier flag per input correspondence.
    pub inliers: Vec<bool>,
    pub num_inliers: usize,
}

/// Similarity transform that moves the centroid to the origin and scales the
/// mean distance from it to sqrt(2).
fn normalization(points: &[(f64, f64)]) -> Matrix3<f64> {
    let n = points.len() as f64;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
    let (cx, cy) = (sx / n, sy / n);
    let mean_dist = points
        .iter()
        .map(|&(x, y)| ((x - cx).powi(2) + (y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    let s = if mean_dist > 1e-12 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };
    Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0)
}

fn apply(t: &Matrix3<f64>, (x, y): (f64, f64)) -> (f64, f64) {
    let p = t * Vector3::new(x, y, 1.0);
    (p[0] / p[2], p[1] / p[2])
}

/// Least-squares homography from at least four correspondences.
pub fn homography_dlt(src: &[(f64, f64)], dst: &[(f64, f64)]) -> Option<Matrix3<f64>> {
    if src.len() < SAMPLE_SIZE || src.len() != dst.len() {
        return None;
    }
    let t_src = normalization(src);
    let t_dst = normalization(dst);

    let rows = (src.len() * 2).max(9);
    let mut a = DMatrix::<f64>::zeros(rows, 9);
    for (i, (&s, &d)) in src.iter().zip(dst).enumerate() {
        let (x1, y1) = apply(&t_src, s);
        let (x2, y2) = apply(&t_dst, d);
        let r = 2 * i;
        a[(r, 0)] = -x1;
        a[(r, 1)] = -y1;
        a[(r, 2)] = -1.0;
        a[(r, 6)] = x2 * x1;
        a[(r, 7)] = x2 * y1;
        a[(r, 8)] = x2;
        a[(r + 1, 3)] = -x1;
        a[(r + 1, 4)] = -y1;
        a[(r + 1, 5)] = -1.0;
        a[(r + 1, 6)] = y2 * x1;
        a[(r + 1, 7)] = y2 * y1;
        a[(r + 1, 8)] = y2;
    }

    // Null vector: right singular vector of the smallest singular value.
    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let smallest = svd.singular_values.imin();
    let h = v_t.row(smallest);
    let h_norm = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

    let t_dst_inv = t_dst.try_inverse()?;
    let h = t_dst_inv * h_norm * t_src;
    let scale = h[(2, 2)];
    if scale.abs() < 1e-12 || !h.iter().all(|v| v.is_finite()) {
        return None;
    }
    Some(h / scale)
}

/// Distance between `src` mapped through `h` and `dst`.
pub fn reprojection_error(h: &Matrix3<f64>, src: (f64, f64), dst: (f64, f64)) -> f64 {
    let p = h * Vector3::new(src.0, src.1, 1.0);
    if p[2].abs() < 1e-12 {
        return f64::INFINITY;
    }
    ((p[0] / p[2] - dst.0).powi(2) + (p[1] / p[2] - dst.1).powi(2)).sqrt()
}

/// Whether three points are (nearly) collinear.
fn collinear(a: (f64, f64), b: (f64, f64), c: (f64, f64)) -> bool {
    let area = (b.0 - a.0) * (c.1 - a.1) - (b.1 - a.1) * (c.0 - a.0);
    area.abs() < 1e-6
}

fn degenerate(points: &[(f64, f64)]) -> bool {
    for i in 0..points.len() {
        for j in i + 1..points.len() {
            for k in j + 1..points.len() {
                if collinear(points[i], points[j], points[k]) {
                    return true;
                }
            }
        }
    }
    false
}

fn score(h: &Matrix3<f64>, src: &[(f64, f64)], dst: &[(f64, f64)], threshold: f64) -> Vec<bool> {
    src.iter()
        .zip(dst)
        .map(|(&s, &d)| reprojection_error(h, s, d) <= threshold)
        .collect()
}

/// Iterations needed to reach `confidence` with the given inlier ratio.
fn required_iterations(confidence: f64, inlier_ratio: f64, max_iterations: usize) -> usize {
    let p_good = inlier_ratio.powi(SAMPLE_SIZE as i32);
    if p_good <= f64::EPSILON {
        return max_iterations;
    }
    if p_good >= 1.0 {
        return 1;
    }
    let n = (1.0 - confidence).ln() / (1.0 - p_good).ln();
    if n.is_finite() {
        (n.ceil() as usize).clamp(1, max_iterations)
    } else {
        max_iterations
    }
}

/// Estimate the homography taking `src` onto `dst` with RANSAC.
///
/// Sampling is driven by `config.seed`, so repeated calls on the same input
/// give the same model.
pub fn estimate_homography(
    src: &[(f64, f64)],
    dst: &[(f64, f64)],
    config: &RansacConfig,
) -> Result<HomographyEstimate> {
    if src.len() != dst.len() {
        return Err(BracketError::GeometryEstimation(format!(
            "{} source points but {} destination points",
            src.len(),
            dst.len()
        )));
    }
    if src.len() < SAMPLE_SIZE {
        return Err(BracketError::InsufficientCorrespondence {
            found: src.len(),
            required: SAMPLE_SIZE,
        });
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let n = src.len();
    let mut best: Option<(Matrix3<f64>, Vec<bool>, usize)> = None;
    let mut needed = config.max_iterations;
    let mut iteration = 0;

    while iteration < needed.min(config.max_iterations) {
        iteration += 1;
        let sample = rand::seq::index::sample(&mut rng, n, SAMPLE_SIZE).into_vec();
        let s: Vec<(f64, f64)> = sample.iter().map(|&i| src[i]).collect();
        let d: Vec<(f64, f64)> = sample.iter().map(|&i| dst[i]).collect();
        if degenerate(&s) || degenerate(&d) {
            continue;
        }
        let Some(h) = homography_dlt(&s, &d) else {
            continue;
        };

        let inliers = score(&h, src, dst, config.threshold);
        let count = inliers.iter().filter(|&&b| b).count();
        if best.as_ref().map_or(true, |(_, _, c)| count > *c) {
            needed = required_iterations(
                config.confidence,
                count as f64 / n as f64,
                config.max_iterations,
            );
            best = Some((h, inliers, count));
        }
    }

    let Some((mut matrix, mut inliers, mut count)) = best else {
        return Err(BracketError::GeometryEstimation(
            "no non-degenerate sample produced a homography".into(),
        ));
    };
    if count < SAMPLE_SIZE {
        return Err(BracketError::GeometryEstimation(format!(
            "only {count} inliers, need {SAMPLE_SIZE}"
        )));
    }

    let (in_src, in_dst): (Vec<_>, Vec<_>) = src
        .iter()
        .zip(dst)
        .zip(&inliers)
        .filter(|(_, keep)| **keep)
        .map(|((&s, &d), _)| (s, d))
        .unzip();
    if let Some(refit) = homography_dlt(&in_src, &in_dst) {
        let refit_inliers = score(&refit, src, dst, config.threshold);
        let refit_count = refit_inliers.iter().filter(|&&b| b).count();
        if refit_count >= count {
            matrix = refit;
            inliers = refit_inliers;
            count = refit_count;
        }
    }

    debug!(iterations = iteration, inliers = count, total = n, "RANSAC homography");

    Ok(HomographyEstimate {
        matrix,
        inliers,
        num_inliers: count,
    })
}
