//! SIFT: difference-of-Gaussian extrema with gradient-histogram descriptors.
//!
//! Reference: D. Lowe, "Distinctive Image Features from Scale-Invariant
//! Keypoints", IJCV 60(2), 2004. The input is not upsampled, so the first
//! octave starts at the native resolution.

use nalgebra::{Matrix3, Vector3};
use ndarray::{s, Array2};
use rayon::prelude::*;

use crate::filters::gaussian_blur::gaussian_blur_array;
use crate::pipeline::config::SiftConfig;

use super::{Descriptors, FeatureDetector, Features, Keypoint};

/// Blur already present in the input.
const INIT_SIGMA: f32 = 0.5;
/// Extrema closer than this to the octave border are ignored.
const IMG_BORDER: usize = 5;
const MAX_INTERP_STEPS: usize = 5;
/// Octaves stop once the short side would fall below this.
const MIN_OCTAVE_SIZE: usize = 16;

const ORI_HIST_BINS: usize = 36;
const ORI_SIG_FACTOR: f32 = 1.5;
const ORI_RADIUS_FACTOR: f32 = 3.0 * ORI_SIG_FACTOR;
const ORI_PEAK_RATIO: f32 = 0.8;

const DESCR_WIDTH: usize = 4;
const DESCR_BINS: usize = 8;
const DESCR_SCALE_FACTOR: f32 = 3.0;
const DESCR_MAG_THRESHOLD: f32 = 0.2;

/// Length of each descriptor.
pub const SIFT_DESCRIPTOR_LEN: usize = DESCR_WIDTH * DESCR_WIDTH * DESCR_BINS;

struct Octave {
    gaussians: Vec<Array2<f32>>,
    dogs: Vec<Array2<f32>>,
}

/// A refined extremum, in octave coordinates.
struct Extremum {
    octave: usize,
    layer: usize,
    row: usize,
    col: usize,
    /// Sub-pixel offset `(x, y, scale)`.
    offset: Vector3<f32>,
    contrast: f32,
}

pub struct Sift {
    config: SiftConfig,
}

impl Sift {
    pub fn new(config: SiftConfig) -> Self {
        Self { config }
    }

    /// Incremental blur between consecutive scales of one octave.
    fn layer_sigmas(&self) -> Vec<f32> {
        let n = self.config.n_layers;
        let k = 2f32.powf(1.0 / n as f32);
        let mut sigmas = vec![self.config.sigma];
        for i in 1..n + 3 {
            let prev = self.config.sigma * k.powi(i as i32 - 1);
            let total = prev * k;
            sigmas.push((total * total - prev * prev).sqrt());
        }
        sigmas
    }

    fn build_octaves(&self, image: &Array2<f32>) -> Vec<Octave> {
        let n = self.config.n_layers;
        let sigmas = self.layer_sigmas();
        let initial = (self.config.sigma.powi(2) - INIT_SIGMA.powi(2)).max(0.01).sqrt();
        let mut base = gaussian_blur_array(image, initial);
        let mut octaves = Vec::with_capacity(self.config.n_octaves);

        for _ in 0..self.config.n_octaves {
            let (h, w) = base.dim();
            if h.min(w) < MIN_OCTAVE_SIZE {
                break;
            }
            let mut gaussians = Vec::with_capacity(n + 3);
            gaussians.push(base);
            for &sigma in &sigmas[1..] {
                let next = gaussian_blur_array(&gaussians[gaussians.len() - 1], sigma);
                gaussians.push(next);
            }
            let dogs = gaussians.windows(2).map(|g| &g[1] - &g[0]).collect();
            base = gaussians[n].slice(s![..;2, ..;2]).to_owned();
            octaves.push(Octave { gaussians, dogs });
        }
        octaves
    }

    fn find_extrema(&self, octaves: &[Octave]) -> Vec<Extremum> {
        let n = self.config.n_layers;
        let threshold = 0.5 * self.config.contrast_threshold / n as f32;
        let mut extrema = Vec::new();

        for (o, octave) in octaves.iter().enumerate() {
            let (h, w) = octave.dogs[0].dim();
            if h <= 2 * IMG_BORDER || w <= 2 * IMG_BORDER {
                continue;
            }
            for layer in 1..=n {
                let found: Vec<Extremum> = (IMG_BORDER..h - IMG_BORDER)
                    .into_par_iter()
                    .flat_map_iter(|r| {
                        (IMG_BORDER..w - IMG_BORDER).filter_map(move |c| {
                            let v = octave.dogs[layer][[r, c]];
                            if v.abs() <= threshold || !is_extremum(&octave.dogs, layer, r, c) {
                                return None;
                            }
                            self.refine(&octave.dogs, o, layer, r, c)
                        })
                    })
                    .collect();
                extrema.extend(found);
            }
        }
        extrema
    }

    /// Quadratic fit around a discrete extremum; rejects low contrast and edges.
    fn refine(
        &self,
        dogs: &[Array2<f32>],
        octave: usize,
        layer: usize,
        row: usize,
        col: usize,
    ) -> Option<Extremum> {
        let n = self.config.n_layers as i64;
        let (h, w) = dogs[0].dim();
        let (mut s, mut r, mut c) = (layer as i64, row as i64, col as i64);
        let mut offset = Vector3::zeros();
        let mut converged = false;

        for _ in 0..MAX_INTERP_STEPS {
            let (grad, hess) = derivatives(dogs, s as usize, r as usize, c as usize);
            offset = -hess.lu().solve(&grad)?;
            if offset.iter().all(|v| v.abs() < 0.5) {
                converged = true;
                break;
            }
            if offset.iter().any(|v| !v.is_finite() || v.abs() > 1e6) {
                return None;
            }
            c += offset[0].round() as i64;
            r += offset[1].round() as i64;
            s += offset[2].round() as i64;
            if s < 1
                || s > n
                || c < IMG_BORDER as i64
                || c >= (w - IMG_BORDER) as i64
                || r < IMG_BORDER as i64
                || r >= (h - IMG_BORDER) as i64
            {
                return None;
            }
        }
        if !converged {
            return None;
        }

        let (s, r, c) = (s as usize, r as usize, c as usize);
        let (grad, hess) = derivatives(dogs, s, r, c);
        let contrast = dogs[s][[r, c]] + 0.5 * grad.dot(&offset);
        if contrast.abs() * (n as f32) < self.config.contrast_threshold {
            return None;
        }

        let tr = hess[(0, 0)] + hess[(1, 1)];
        let det = hess[(0, 0)] * hess[(1, 1)] - hess[(0, 1)] * hess[(0, 1)];
        let edge = self.config.edge_threshold;
        if det <= 0.0 || tr * tr * edge >= (edge + 1.0) * (edge + 1.0) * det {
            return None;
        }

        Some(Extremum {
            octave,
            layer: s,
            row: r,
            col: c,
            offset,
            contrast,
        })
    }

    /// Scale of an extremum relative to its own octave.
    fn octave_scale(&self, e: &Extremum) -> f32 {
        self.config.sigma
            * 2f32.powf((e.layer as f32 + e.offset[2]) / self.config.n_layers as f32)
    }
}

impl FeatureDetector for Sift {
    fn detect_and_compute(&self, image: &Array2<f32>) -> Features {
        let octaves = self.build_octaves(image);
        let mut extrema = self.find_extrema(&octaves);

        if self.config.max_features > 0 && extrema.len() > self.config.max_features {
            extrema.sort_by(|a, b| b.contrast.abs().total_cmp(&a.contrast.abs()));
            extrema.truncate(self.config.max_features);
        }

        let described: Vec<(Keypoint, Vec<f32>)> = extrema
            .par_iter()
            .flat_map_iter(|e| {
                let gauss = &octaves[e.octave].gaussians[e.layer];
                let scale = self.octave_scale(e);
                let factor = (1usize << e.octave) as f32;
                let base = Keypoint {
                    x: (e.col as f32 + e.offset[0]) * factor,
                    y: (e.row as f32 + e.offset[1]) * factor,
                    angle: 0.0,
                    response: e.contrast.abs(),
                    size: 2.0 * scale * factor,
                    octave: e.octave,
                };
                dominant_orientations(gauss, e.row, e.col, scale)
                    .into_iter()
                    .map(move |angle| {
                        let descriptor = describe(gauss, e.row, e.col, angle, scale);
                        (Keypoint { angle, ..base }, descriptor)
                    })
            })
            .collect();

        let (keypoints, descriptors) = described.into_iter().unzip();
        Features {
            keypoints,
            descriptors: Descriptors::Float(descriptors),
        }
    }

    fn name(&self) -> &'static str {
        "SIFT"
    }
}

fn is_extremum(dogs: &[Array2<f32>], layer: usize, r: usize, c: usize) -> bool {
    let v = dogs[layer][[r, c]];
    let mut is_max = true;
    let mut is_min = true;
    for dog in &dogs[layer - 1..=layer + 1] {
        for rr in r - 1..=r + 1 {
            for cc in c - 1..=c + 1 {
                let n = dog[[rr, cc]];
                is_max &= v >= n;
                is_min &= v <= n;
            }
        }
        if !is_max && !is_min {
            return false;
        }
    }
    is_max || is_min
}

/// Gradient and Hessian of the DoG in `(x, y, scale)` by central differences.
fn derivatives(dogs: &[Array2<f32>], s: usize, r: usize, c: usize) -> (Vector3<f32>, Matrix3<f32>) {
    let d = |ds: isize, dr: isize, dc: isize| -> f32 {
        dogs[(s as isize + ds) as usize][[(r as isize + dr) as usize, (c as isize + dc) as usize]]
    };
    let v = d(0, 0, 0);

    let grad = Vector3::new(
        (d(0, 0, 1) - d(0, 0, -1)) * 0.5,
        (d(0, 1, 0) - d(0, -1, 0)) * 0.5,
        (d(1, 0, 0) - d(-1, 0, 0)) * 0.5,
    );

    let dxx = d(0, 0, 1) + d(0, 0, -1) - 2.0 * v;
    let dyy = d(0, 1, 0) + d(0, -1, 0) - 2.0 * v;
    let dss = d(1, 0, 0) + d(-1, 0, 0) - 2.0 * v;
    let dxy = (d(0, 1, 1) - d(0, 1, -1) - d(0, -1, 1) + d(0, -1, -1)) * 0.25;
    let dxs = (d(1, 0, 1) - d(1, 0, -1) - d(-1, 0, 1) + d(-1, 0, -1)) * 0.25;
    let dys = (d(1, 1, 0) - d(1, -1, 0) - d(-1, 1, 0) + d(-1, -1, 0)) * 0.25;

    let hess = Matrix3::new(dxx, dxy, dxs, dxy, dyy, dys, dxs, dys, dss);
    (grad, hess)
}

fn gradient(img: &Array2<f32>, y: usize, x: usize) -> (f32, f32) {
    (
        img[[y, x + 1]] - img[[y, x - 1]],
        img[[y + 1, x]] - img[[y - 1, x]],
    )
}

/// Orientations (radians) of every histogram peak within 80% of the highest.
fn dominant_orientations(img: &Array2<f32>, row: usize, col: usize, scale: f32) -> Vec<f32> {
    let (h, w) = img.dim();
    let radius = (ORI_RADIUS_FACTOR * scale).round() as i64;
    let weight_scale = -1.0 / (2.0 * (ORI_SIG_FACTOR * scale).powi(2));
    let bin_width = std::f32::consts::TAU / ORI_HIST_BINS as f32;

    let mut hist = [0f32; ORI_HIST_BINS];
    for i in -radius..=radius {
        let y = row as i64 + i;
        if y <= 0 || y >= h as i64 - 1 {
            continue;
        }
        for j in -radius..=radius {
            let x = col as i64 + j;
            if x <= 0 || x >= w as i64 - 1 {
                continue;
            }
            let (dx, dy) = gradient(img, y as usize, x as usize);
            let weight = (((i * i + j * j) as f32) * weight_scale).exp();
            let bin = (dy.atan2(dx) / bin_width).round() as i64;
            hist[bin.rem_euclid(ORI_HIST_BINS as i64) as usize] +=
                weight * (dx * dx + dy * dy).sqrt();
        }
    }

    let at =
        |i: usize, d: isize| hist[(i as isize + d).rem_euclid(ORI_HIST_BINS as isize) as usize];
    let smooth: Vec<f32> = (0..ORI_HIST_BINS)
        .map(|i| {
            (at(i, -2) + at(i, 2)) / 16.0
                + (at(i, -1) + at(i, 1)) * 4.0 / 16.0
                + at(i, 0) * 6.0 / 16.0
        })
        .collect();
    let peak = smooth.iter().copied().fold(0.0f32, f32::max);
    if peak <= 0.0 {
        return Vec::new();
    }

    let mut angles = Vec::new();
    for i in 0..ORI_HIST_BINS {
        let l = smooth[(i + ORI_HIST_BINS - 1) % ORI_HIST_BINS];
        let r = smooth[(i + 1) % ORI_HIST_BINS];
        let v = smooth[i];
        if v > l && v > r && v >= ORI_PEAK_RATIO * peak {
            let bin = (i as f32 + 0.5 * (l - r) / (l - 2.0 * v + r))
                .rem_euclid(ORI_HIST_BINS as f32);
            angles.push(bin * bin_width);
        }
    }
    angles
}

/// 4x4 spatial by 8 orientation histogram, trilinearly interpolated and
/// normalized with the usual 0.2 clipping.
fn describe(img: &Array2<f32>, row: usize, col: usize, angle: f32, scale: f32) -> Vec<f32> {
    let (h, w) = img.dim();
    let d = DESCR_WIDTH;
    let n = DESCR_BINS;
    let hist_width = DESCR_SCALE_FACTOR * scale;
    let radius = ((hist_width * std::f32::consts::SQRT_2 * (d as f32 + 1.0) * 0.5).round() as i64)
        .min(((h * h + w * w) as f64).sqrt() as i64);
    let (sin_a, cos_a) = angle.sin_cos();
    let (cos_t, sin_t) = (cos_a / hist_width, sin_a / hist_width);
    let bins_per_rad = n as f32 / std::f32::consts::TAU;
    let exp_scale = -1.0 / (d as f32 * d as f32 * 0.5);

    let stride_c = n + 2;
    let stride_r = (d + 2) * stride_c;
    let mut hist = vec![0f32; (d + 2) * stride_r];

    for i in -radius..=radius {
        for j in -radius..=radius {
            let c_rot = j as f32 * cos_t + i as f32 * sin_t;
            let r_rot = -(j as f32) * sin_t + i as f32 * cos_t;
            let rbin = r_rot + d as f32 / 2.0 - 0.5;
            let cbin = c_rot + d as f32 / 2.0 - 0.5;
            if rbin <= -1.0 || rbin >= d as f32 || cbin <= -1.0 || cbin >= d as f32 {
                continue;
            }
            let y = row as i64 + i;
            let x = col as i64 + j;
            if y <= 0 || y >= h as i64 - 1 || x <= 0 || x >= w as i64 - 1 {
                continue;
            }

            let (dx, dy) = gradient(img, y as usize, x as usize);
            let ori = (dy.atan2(dx) - angle).rem_euclid(std::f32::consts::TAU);
            let obin = ori * bins_per_rad;
            let mag =
                (dx * dx + dy * dy).sqrt() * ((c_rot * c_rot + r_rot * r_rot) * exp_scale).exp();

            let r0 = rbin.floor();
            let c0 = cbin.floor();
            let o0 = obin.floor();
            let (rb, cb, ob) = (rbin - r0, cbin - c0, obin - o0);
            let mut o0 = o0 as usize;
            if o0 >= n {
                o0 -= n;
            }

            let idx = ((r0 as i64 + 1) as usize) * stride_r
                + ((c0 as i64 + 1) as usize) * stride_c
                + o0;
            for (dr, wr) in [(0, 1.0 - rb), (1, rb)] {
                for (dc, wc) in [(0, 1.0 - cb), (1, cb)] {
                    for (dob, wo) in [(0, 1.0 - ob), (1, ob)] {
                        hist[idx + dr * stride_r + dc * stride_c + dob] += mag * wr * wc * wo;
                    }
                }
            }
        }
    }

    let mut descriptor = Vec::with_capacity(SIFT_DESCRIPTOR_LEN);
    for i in 0..d {
        for j in 0..d {
            let idx = (i + 1) * stride_r + (j + 1) * stride_c;
            // Fold the wrap-around orientation bins back.
            hist[idx] += hist[idx + n];
            hist[idx + 1] += hist[idx + n + 1];
            descriptor.extend_from_slice(&hist[idx..idx + n]);
        }
    }

    let norm = descriptor.iter().map(|v| v * v).sum::<f32>().sqrt();
    let clip = norm * DESCR_MAG_THRESHOLD;
    descriptor.iter_mut().for_each(|v| *v = v.min(clip));
    let norm = descriptor.iter().map(|v| v * v).sum::<f32>().sqrt().max(f32::EPSILON);
    descriptor.iter_mut().for_each(|v| *v /= norm);
    descriptor
}
