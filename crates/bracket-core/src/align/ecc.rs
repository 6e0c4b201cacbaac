//! Enhanced correlation coefficient (ECC) alignment.
//!
//! Forward-additive maximization of the zero-mean normalized correlation
//! between the reference and the warped candidate, one Gauss-Newton style
//! step per iteration.
//!
//! Reference: G. Evangelidis, E. Psarakis, "Parametric Image Alignment Using
//! Enhanced Correlation Coefficient Maximization", IEEE TPAMI 30(10), 2008.

use nalgebra::{DMatrix, DVector, Matrix3};
use ndarray::Array2;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::color::grayscale;
use crate::consts::PARALLEL_PIXEL_THRESHOLD;
use crate::error::{BracketError, Result};
use crate::filters::gaussian_blur::gaussian_blur_ksize;
use crate::frame::Image;
use crate::pipeline::config::{EccConfig, EccFailurePolicy, WarpModel};

use super::warp::{bilinear_sample, inside, map_point, warp_image};

/// Converged warp for one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct EccWarp {
    /// Reference pixel -> candidate pixel. Last row `[0, 0, 1]` except for homographies.
    pub matrix: Matrix3<f64>,
    /// Correlation coefficient at the final iterate.
    pub rho: f64,
    pub iterations: usize,
}

/// What happened to one candidate frame.
#[derive(Clone, Debug, PartialEq)]
pub enum EccOutcome {
    Warped(EccWarp),
    PassedThrough(String),
}

/// Smoothed reference plane and optional mask, shared by every candidate.
pub struct EccReference {
    template: Array2<f32>,
    mask: Option<Array2<bool>>,
}

impl EccReference {
    pub fn new(reference: &Image, mask: Option<&Array2<bool>>, config: &EccConfig) -> Result<Self> {
        let template = gaussian_blur_ksize(&grayscale(reference), config.gauss_filter_size);
        if let Some(m) = mask {
            if m.dim() != template.dim() {
                return Err(BracketError::Configuration(format!(
                    "ECC mask is {}x{}, reference is {}x{}",
                    m.ncols(),
                    m.nrows(),
                    template.ncols(),
                    template.nrows()
                )));
            }
        }
        Ok(Self {
            template,
            mask: mask.cloned(),
        })
    }

    pub fn dim(&self) -> (usize, usize) {
        self.template.dim()
    }
}

/// Parameter vector <-> warp matrix for one motion model.
struct WarpState {
    model: WarpModel,
    matrix: Matrix3<f64>,
    /// Rotation angle, tracked separately for the Euclidean model.
    theta: f64,
}

impl WarpState {
    fn identity(model: WarpModel) -> Self {
        Self {
            model,
            matrix: Matrix3::identity(),
            theta: 0.0,
        }
    }

    /// d(warped x, y) / d(params) at reference pixel `(x, y)`, dotted with the
    /// candidate gradient `(gx, gy)` sampled there.
    fn jacobian_row(&self, x: f64, y: f64, gx: f64, gy: f64, out: &mut [f64]) {
        match self.model {
            WarpModel::Translation => {
                out[0] = gx;
                out[1] = gy;
            }
            WarpModel::Euclidean => {
                let (s, c) = self.theta.sin_cos();
                out[0] = gx * (-s * x - c * y) + gy * (c * x - s * y);
                out[1] = gx;
                out[2] = gy;
            }
            WarpModel::Affine => {
                out[0] = gx * x;
                out[1] = gx * y;
                out[2] = gx;
                out[3] = gy * x;
                out[4] = gy * y;
                out[5] = gy;
            }
            WarpModel::Homography => {
                let m = &self.matrix;
                let den = m[(2, 0)] * x + m[(2, 1)] * y + 1.0;
                let wx = (m[(0, 0)] * x + m[(0, 1)] * y + m[(0, 2)]) / den;
                let wy = (m[(1, 0)] * x + m[(1, 1)] * y + m[(1, 2)]) / den;
                let gxd = gx / den;
                let gyd = gy / den;
                let proj = -(gxd * wx + gyd * wy);
                out[0] = gxd * x;
                out[1] = gxd * y;
                out[2] = gxd;
                out[3] = gyd * x;
                out[4] = gyd * y;
                out[5] = gyd;
                out[6] = proj * x;
                out[7] = proj * y;
            }
        }
    }

    fn update(&mut self, delta: &DVector<f64>) {
        let m = &mut self.matrix;
        match self.model {
            WarpModel::Translation => {
                m[(0, 2)] += delta[0];
                m[(1, 2)] += delta[1];
            }
            WarpModel::Euclidean => {
                self.theta += delta[0];
                let (s, c) = self.theta.sin_cos();
                m[(0, 0)] = c;
                m[(0, 1)] = -s;
                m[(1, 0)] = s;
                m[(1, 1)] = c;
                m[(0, 2)] += delta[1];
                m[(1, 2)] += delta[2];
            }
            WarpModel::Affine => {
                for (k, (r, c)) in [(0, 0), (0, 1), (0, 2), (1, 0), (1, 1), (1, 2)]
                    .into_iter()
                    .enumerate()
                {
                    m[(r, c)] += delta[k];
                }
            }
            WarpModel::Homography => {
                for (k, (r, c)) in [(0, 0), (0, 1), (0, 2), (1, 0), (1, 1), (1, 2), (2, 0), (2, 1)]
                    .into_iter()
                    .enumerate()
                {
                    m[(r, c)] += delta[k];
                }
            }
        }
    }
}

/// Central-difference gradients with clamped borders.
fn gradients(data: &Array2<f32>) -> (Array2<f32>, Array2<f32>) {
    let (h, w) = data.dim();
    let gx = Array2::from_shape_fn((h, w), |(r, c)| {
        let l = data[[r, c.saturating_sub(1)]];
        let rr = data[[r, (c + 1).min(w - 1)]];
        (rr - l) * 0.5
    });
    let gy = Array2::from_shape_fn((h, w), |(r, c)| {
        let u = data[[r.saturating_sub(1), c]];
        let d = data[[(r + 1).min(h - 1), c]];
        (d - u) * 0.5
    });
    (gx, gy)
}

/// One valid reference pixel: template value, warped candidate value, Jacobian row.
struct Sample {
    t: f64,
    i: f64,
    jac: [f64; 8],
}

/// Sums accumulated over the valid pixels of one iteration.
struct Moments {
    count: f64,
    t_sum: f64,
    i_sum: f64,
    tt: f64,
    ii: f64,
    ti: f64,
    hessian: DMatrix<f64>,
    /// J^T * candidate and J^T * template (raw, mean not yet removed).
    j_i: DVector<f64>,
    j_t: DVector<f64>,
    j_sum: DVector<f64>,
}

fn collect_samples(
    reference: &EccReference,
    image: &Array2<f32>,
    gx: &Array2<f32>,
    gy: &Array2<f32>,
    state: &WarpState,
) -> Vec<Sample> {
    let (h, w) = reference.dim();
    let src_dim = image.dim();
    let n = state.model.parameter_count();

    let row_fn = |row: usize| -> Vec<Sample> {
        let mut out = Vec::with_capacity(w);
        for col in 0..w {
            if let Some(ref m) = reference.mask {
                if !m[[row, col]] {
                    continue;
                }
            }
            let (x, y) = (col as f64, row as f64);
            let Some((sx, sy)) = map_point(&state.matrix, x, y) else {
                continue;
            };
            if !inside(src_dim, sy, sx) {
                continue;
            }
            let gxs = bilinear_sample(gx, sy, sx) as f64;
            let gys = bilinear_sample(gy, sy, sx) as f64;
            let mut jac = [0.0; 8];
            state.jacobian_row(x, y, gxs, gys, &mut jac[..n]);
            out.push(Sample {
                t: reference.template[[row, col]] as f64,
                i: bilinear_sample(image, sy, sx) as f64,
                jac,
            });
        }
        out
    };

    if h * w >= PARALLEL_PIXEL_THRESHOLD {
        (0..h).into_par_iter().flat_map_iter(row_fn).collect()
    } else {
        (0..h).flat_map(row_fn).collect()
    }
}

fn moments(samples: &[Sample], n: usize) -> Moments {
    let mut m = Moments {
        count: samples.len() as f64,
        t_sum: 0.0,
        i_sum: 0.0,
        tt: 0.0,
        ii: 0.0,
        ti: 0.0,
        hessian: DMatrix::zeros(n, n),
        j_i: DVector::zeros(n),
        j_t: DVector::zeros(n),
        j_sum: DVector::zeros(n),
    };
    for s in samples {
        m.t_sum += s.t;
        m.i_sum += s.i;
        m.tt += s.t * s.t;
        m.ii += s.i * s.i;
        m.ti += s.t * s.i;
        for a in 0..n {
            m.j_i[a] += s.jac[a] * s.i;
            m.j_t[a] += s.jac[a] * s.t;
            m.j_sum[a] += s.jac[a];
            for b in a..n {
                m.hessian[(a, b)] += s.jac[a] * s.jac[b];
            }
        }
    }
    for a in 0..n {
        for b in 0..a {
            m.hessian[(a, b)] = m.hessian[(b, a)];
        }
    }
    m
}

/// Estimate the warp taking reference pixels onto candidate pixels.
///
/// Errors with `GeometryEstimation` when the correlation cannot be
/// maximized: no overlap, zero variance, a singular Hessian or a
/// non-positive correlation denominator.
pub fn find_transform_ecc(
    reference: &EccReference,
    target: &Image,
    config: &EccConfig,
) -> Result<EccWarp> {
    let (h, w) = reference.dim();
    if target.height() != h || target.width() != w {
        return Err(BracketError::DimensionMismatch {
            index: 0,
            expected_w: w,
            expected_h: h,
            got_w: target.width(),
            got_h: target.height(),
        });
    }

    let image = gaussian_blur_ksize(&grayscale(target), config.gauss_filter_size);
    let (gx, gy) = gradients(&image);
    let n = config.warp_model.parameter_count();
    let mut state = WarpState::identity(config.warp_model);

    let mut rho = -1.0f64;
    let mut iterations = 0;

    while iterations < config.max_iterations {
        iterations += 1;

        let samples = collect_samples(reference, &image, &gx, &gy, &state);
        if samples.len() <= n {
            return Err(BracketError::GeometryEstimation(
                "warped candidate no longer overlaps the reference".into(),
            ));
        }
        let m = moments(&samples, n);

        let t_mean = m.t_sum / m.count;
        let i_mean = m.i_sum / m.count;
        let t_norm_sq = m.tt - m.count * t_mean * t_mean;
        let i_norm_sq = m.ii - m.count * i_mean * i_mean;
        let correlation = m.ti - m.count * t_mean * i_mean;

        let last_rho = rho;
        rho = correlation / (t_norm_sq.sqrt() * i_norm_sq.sqrt());
        if !rho.is_finite() || t_norm_sq <= 0.0 || i_norm_sq <= 0.0 {
            return Err(BracketError::GeometryEstimation(
                "correlation is undefined (zero-variance input)".into(),
            ));
        }
        // The returned rho always belongs to the returned warp.
        if iterations == config.max_iterations || (rho - last_rho).abs() < config.epsilon {
            break;
        }

        // Projections of the zero-mean images onto the Jacobian columns.
        let image_proj = &m.j_i - &m.j_sum * i_mean;
        let template_proj = &m.j_t - &m.j_sum * t_mean;

        let Some(hessian_inv) = m.hessian.clone().try_inverse() else {
            return Err(BracketError::GeometryEstimation("singular Hessian".into()));
        };
        let image_proj_h = &hessian_inv * &image_proj;

        let lambda_n = i_norm_sq - image_proj.dot(&image_proj_h);
        let lambda_d = correlation - template_proj.dot(&image_proj_h);
        if lambda_d <= 0.0 {
            return Err(BracketError::GeometryEstimation(
                "correlation would decrease; images may be uncorrelated or non-overlapping".into(),
            ));
        }
        let lambda = lambda_n / lambda_d;

        let error_proj = &template_proj * lambda - &image_proj;
        let delta = &hessian_inv * error_proj;
        state.update(&delta);
    }

    debug!(
        model = %config.warp_model,
        iterations,
        rho,
        tx = state.matrix[(0, 2)],
        ty = state.matrix[(1, 2)],
        "ECC converged"
    );

    Ok(EccWarp {
        matrix: state.matrix,
        rho,
        iterations,
    })
}

/// Align one frame to the reference.
///
/// Under `EccFailurePolicy::PassThrough` a failed estimate returns the frame
/// unchanged; under `Fail` the error is returned.
pub fn align_ecc(
    reference: &EccReference,
    target: &Image,
    config: &EccConfig,
) -> Result<(Image, EccOutcome)> {
    match find_transform_ecc(reference, target, config) {
        Ok(found) => {
            let aligned = warp_image(target, &found.matrix, reference.dim());
            Ok((aligned, EccOutcome::Warped(found)))
        }
        Err(e @ BracketError::DimensionMismatch { .. }) => Err(e),
        Err(e) => match config.failure_policy {
            EccFailurePolicy::PassThrough => {
                let reason = e.to_string();
                warn!(%reason, "ECC did not converge, frame passed through");
                Ok((target.clone(), EccOutcome::PassedThrough(reason)))
            }
            EccFailurePolicy::Fail => Err(e),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gradient_of_ramp() {
        let data = Array2::from_shape_fn((4, 5), |(r, c)| c as f32 * 0.1 + r as f32 * 0.2);
        let (gx, gy) = gradients(&data);
        assert!((gx[[2, 2]] - 0.1).abs() < 1e-6);
        assert!((gy[[2, 2]] - 0.2).abs() < 1e-6);
        // Clamped border halves the difference.
        assert!((gx[[0, 0]] - 0.05).abs() < 1e-6);
    }

    #[test]
    fn euclidean_update_keeps_rotation_orthonormal() {
        let mut state = WarpState::identity(WarpModel::Euclidean);
        state.update(&DVector::from_vec(vec![0.1, 2.0, -1.0]));
        let m = state.matrix;
        assert!((m[(0, 0)] * m[(0, 0)] + m[(1, 0)] * m[(1, 0)] - 1.0).abs() < 1e-12);
        assert!((m[(0, 2)] - 2.0).abs() < 1e-12);
        assert!((m[(1, 0)] - 0.1f64.sin()).abs() < 1e-12);
    }
}
