//! ORB: oriented FAST keypoints with rotated BRIEF descriptors.
//!
//! Reference: E. Rublee et al., "ORB: an efficient alternative to SIFT or
//! SURF", ICCV 2011.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::align::pyramid::resize_bilinear;
use crate::filters::gaussian_blur::gaussian_blur_array;
use crate::pipeline::config::OrbConfig;

use super::{Descriptors, FeatureDetector, Features, Keypoint};

/// Bresenham circle of radius 3 used by the FAST segment test, as `(dx, dy)`.
const FAST_CIRCLE: [(i32, i32); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

/// Contiguous arc length required by FAST-9.
const FAST_ARC: usize = 9;

const HARRIS_K: f32 = 0.04;
const HARRIS_BLOCK_RADIUS: i32 = 3;
const DESCRIPTOR_BITS: usize = 256;
const BRIEF_SIGMA: f32 = 2.0;

pub struct Orb {
    config: OrbConfig,
    /// Test pairs `(x1, y1, x2, y2)` relative to the keypoint.
    pattern: Vec<[i32; 4]>,
}

impl Orb {
    pub fn new(config: OrbConfig, seed: u64) -> Self {
        let pattern = brief_pattern(config.patch_size, seed);
        Self { config, pattern }
    }

    fn half_patch(&self) -> i32 {
        (self.config.patch_size / 2) as i32
    }

    /// Distance from the level border inside which keypoints are dropped.
    fn edge(&self) -> usize {
        let reach = self
            .pattern
            .iter()
            .flat_map(|p| [p[0].abs().max(p[1].abs()), p[2].abs().max(p[3].abs())])
            .max()
            .unwrap_or(0) as f32
            * std::f32::consts::SQRT_2;
        (self.half_patch().max(reach.ceil() as i32) + HARRIS_BLOCK_RADIUS + 2) as usize
    }

    /// Keypoint quota per level: a geometric series summing to `n_features`.
    fn level_quotas(&self) -> Vec<usize> {
        let levels = self.config.n_levels;
        let factor = 1.0 / self.config.scale_factor;
        let mut per_level =
            self.config.n_features as f32 * (1.0 - factor) / (1.0 - factor.powi(levels as i32));
        let mut quotas = Vec::with_capacity(levels);
        let mut assigned = 0;
        for _ in 0..levels.saturating_sub(1) {
            let q = (per_level.round() as usize).min(self.config.n_features - assigned);
            quotas.push(q);
            assigned += q;
            per_level *= factor;
        }
        quotas.push(self.config.n_features - assigned);
        quotas
    }

    fn detect_level(&self, level: &Array2<f32>, quota: usize) -> Vec<(usize, usize, f32)> {
        let (h, w) = level.dim();
        let edge = self.edge();
        if quota == 0 || h <= 2 * edge || w <= 2 * edge {
            return Vec::new();
        }
        let threshold = self.config.fast_threshold as f32;

        let scores: Vec<Vec<f32>> = (0..h)
            .into_par_iter()
            .map(|y| {
                (0..w)
                    .map(|x| {
                        if y < 3 || x < 3 || y >= h - 3 || x >= w - 3 {
                            0.0
                        } else {
                            fast_score(level, x, y, threshold)
                        }
                    })
                    .collect()
            })
            .collect();

        let mut corners = Vec::new();
        for y in edge..h - edge {
            for x in edge..w - edge {
                let s = scores[y][x];
                if s <= 0.0 {
                    continue;
                }
                // Plateaus keep their first pixel in scan order.
                let is_max = (y - 1..=y + 1).all(|ny| {
                    (x - 1..=x + 1).all(|nx| {
                        let n = scores[ny][nx];
                        match (ny, nx).cmp(&(y, x)) {
                            std::cmp::Ordering::Less => n < s,
                            std::cmp::Ordering::Equal => true,
                            std::cmp::Ordering::Greater => n <= s,
                        }
                    })
                });
                if is_max {
                    corners.push((x, y, harris_response(level, x, y)));
                }
            }
        }

        corners.sort_by(|a, b| b.2.total_cmp(&a.2));
        corners.truncate(quota);
        corners
    }

    fn orientation(&self, level: &Array2<f32>, x: usize, y: usize) -> f32 {
        let r = self.half_patch();
        let (mut m01, mut m10) = (0.0f32, 0.0f32);
        for dy in -r..=r {
            for dx in -r..=r {
                if dx * dx + dy * dy > r * r {
                    continue;
                }
                let v = level[[(y as i32 + dy) as usize, (x as i32 + dx) as usize]];
                m10 += dx as f32 * v;
                m01 += dy as f32 * v;
            }
        }
        m01.atan2(m10)
    }

    fn describe(&self, smoothed: &Array2<f32>, x: usize, y: usize, angle: f32) -> [u8; 32] {
        let (sin_a, cos_a) = angle.sin_cos();
        let sample = |px: i32, py: i32| -> f32 {
            let rx = (cos_a * px as f32 - sin_a * py as f32).round() as i32;
            let ry = (sin_a * px as f32 + cos_a * py as f32).round() as i32;
            smoothed[[(y as i32 + ry) as usize, (x as i32 + rx) as usize]]
        };

        let mut descriptor = [0u8; 32];
        for (bit, p) in self.pattern.iter().enumerate() {
            if sample(p[0], p[1]) < sample(p[2], p[3]) {
                descriptor[bit / 8] |= 1 << (bit % 8);
            }
        }
        descriptor
    }
}

impl FeatureDetector for Orb {
    fn detect_and_compute(&self, image: &Array2<f32>) -> Features {
        let mut keypoints = Vec::new();
        let mut descriptors = Vec::new();

        let mut level = image.mapv(|v| v * 255.0);
        let mut scale = 1.0f32;

        for (octave, quota) in self.level_quotas().into_iter().enumerate() {
            if octave > 0 {
                scale *= self.config.scale_factor;
                let (h, w) = image.dim();
                let new_h = (h as f32 / scale).round() as usize;
                let new_w = (w as f32 / scale).round() as usize;
                if new_h <= 2 * self.edge() || new_w <= 2 * self.edge() {
                    break;
                }
                level = resize_bilinear(&level, new_h, new_w);
            }

            let corners = self.detect_level(&level, quota);
            if corners.is_empty() {
                continue;
            }
            let smoothed = gaussian_blur_array(&level, BRIEF_SIGMA);

            for (x, y, response) in corners {
                let angle = self.orientation(&level, x, y);
                descriptors.push(self.describe(&smoothed, x, y, angle));
                keypoints.push(Keypoint {
                    x: x as f32 * scale,
                    y: y as f32 * scale,
                    angle,
                    response,
                    size: self.config.patch_size as f32 * scale,
                    octave,
                });
            }
        }

        Features {
            keypoints,
            descriptors: Descriptors::Binary(descriptors),
        }
    }

    fn name(&self) -> &'static str {
        "ORB"
    }
}

/// Random BRIEF test pairs inside the patch, reproducible from `seed`.
fn brief_pattern(patch_size: usize, seed: u64) -> Vec<[i32; 4]> {
    let reach = ((patch_size / 2) as i32 - 2).max(1);
    let mut rng = StdRng::seed_from_u64(seed);
    (0..DESCRIPTOR_BITS)
        .map(|_| {
            [
                rng.random_range(-reach..=reach),
                rng.random_range(-reach..=reach),
                rng.random_range(-reach..=reach),
                rng.random_range(-reach..=reach),
            ]
        })
        .collect()
}

/// FAST-9 segment test. Returns 0 when `(x, y)` is not a corner, otherwise
/// the summed contrast of the circle pixels beyond the threshold.
fn fast_score(level: &Array2<f32>, x: usize, y: usize, threshold: f32) -> f32 {
    let p = level[[y, x]];
    let mut states = [0i8; 16];
    let mut diffs = [0f32; 16];
    for (i, &(dx, dy)) in FAST_CIRCLE.iter().enumerate() {
        let v = level[[(y as i32 + dy) as usize, (x as i32 + dx) as usize]];
        diffs[i] = v - p;
        states[i] = if v > p + threshold {
            1
        } else if v < p - threshold {
            -1
        } else {
            0
        };
    }

    for sign in [1i8, -1] {
        let mut run = 0;
        for i in 0..16 + FAST_ARC - 1 {
            if states[i % 16] == sign {
                run += 1;
                if run >= FAST_ARC {
                    return states
                        .iter()
                        .zip(&diffs)
                        .filter(|(s, _)| **s == sign)
                        .map(|(_, d)| d.abs() - threshold)
                        .sum();
                }
            } else {
                run = 0;
            }
        }
    }
    0.0
}

/// Harris corner response over a 7x7 block with central-difference gradients.
fn harris_response(level: &Array2<f32>, x: usize, y: usize) -> f32 {
    let (mut a, mut b, mut c) = (0.0f32, 0.0f32, 0.0f32);
    for dy in -HARRIS_BLOCK_RADIUS..=HARRIS_BLOCK_RADIUS {
        for dx in -HARRIS_BLOCK_RADIUS..=HARRIS_BLOCK_RADIUS {
            let px = (x as i32 + dx) as usize;
            let py = (y as i32 + dy) as usize;
            let ix = (level[[py, px + 1]] - level[[py, px - 1]]) * 0.5;
            let iy = (level[[py + 1, px]] - level[[py - 1, px]]) * 0.5;
            a += ix * ix;
            b += iy * iy;
            c += ix * iy;
        }
    }
    a * b - c * c - HARRIS_K * (a + b) * (a + b)
}
