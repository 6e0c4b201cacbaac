//! Global tonemapping of a radiance image down to display range.

use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::consts::{LUMINANCE_B, LUMINANCE_G, LUMINANCE_R};
use crate::frame::{ColorFrame, Frame};
use crate::pipeline::config::TonemapMethod;

use super::RadianceImage;

/// Floor applied before taking logarithms of luminance.
const LOG_FLOOR: f32 = 1e-6;

/// Photographic tone reproduction (Reinhard and Devlin 2005).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReinhardParams {
    pub gamma: f32,
    /// In `[-8, 8]`. Higher values brighten the result.
    pub intensity: f32,
    /// In `[0, 1]`. 0 adapts to the global average, 1 to each pixel.
    pub light_adapt: f32,
    /// In `[0, 1]`. 0 adapts to luminance, 1 to each channel separately.
    pub color_adapt: f32,
}

impl Default for ReinhardParams {
    fn default() -> Self {
        Self {
            gamma: 1.5,
            intensity: 0.0,
            light_adapt: 0.0,
            color_adapt: 0.0,
        }
    }
}

/// Adaptive logarithmic mapping (Drago et al. 2003).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DragoParams {
    pub gamma: f32,
    pub saturation: f32,
    /// In `[0, 1]`, usually `[0.7, 0.9]`. Lower values compress highlights harder.
    pub bias: f32,
}

impl Default for DragoParams {
    fn default() -> Self {
        Self {
            gamma: 1.0,
            saturation: 1.0,
            bias: 0.85,
        }
    }
}

type Planes = [Array2<f32>; 3];

fn gray(planes: &Planes) -> Array2<f32> {
    Zip::from(&planes[0])
        .and(&planes[1])
        .and(&planes[2])
        .map_collect(|&r, &g, &b| LUMINANCE_R * r + LUMINANCE_G * g + LUMINANCE_B * b)
}

fn max_of(planes: &Planes) -> f32 {
    planes
        .iter()
        .flat_map(|p| p.iter().copied())
        .fold(0.0f32, f32::max)
}

/// Scale so the brightest value is 1, then apply `1 / gamma`.
fn linear(planes: &mut Planes, gamma: f32) {
    let max = max_of(planes);
    let scale = if max > 0.0 { 1.0 / max } else { 0.0 };
    let exponent = 1.0 / gamma;
    for plane in planes.iter_mut() {
        plane.mapv_inplace(|v| (v * scale).max(0.0).powf(exponent).clamp(0.0, 1.0));
    }
}

fn log_stats(gray: &Array2<f32>) -> (f32, f32, f32) {
    let mut sum = 0.0f64;
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for &v in gray {
        let l = v.max(LOG_FLOOR).ln();
        sum += l as f64;
        min = min.min(l);
        max = max.max(l);
    }
    let mean = (sum / gray.len().max(1) as f64) as f32;
    (mean, min, max)
}

fn reinhard(mut planes: Planes, p: &ReinhardParams) -> Planes {
    linear(&mut planes, 1.0);
    let gray = gray(&planes);
    let (log_mean, log_min, log_max) = log_stats(&gray);

    let key = if log_max > log_min {
        (log_max - log_mean) / (log_max - log_min)
    } else {
        0.5
    };
    let map_key = 0.3 + 0.7 * key.powf(1.4);
    let intensity = (-p.intensity).exp();
    let gray_mean = gray.mean().unwrap_or(0.0);
    debug!(key, map_key, "Reinhard tonemap");

    for plane in planes.iter_mut() {
        let chan_mean = plane.mean().unwrap_or(0.0);
        let global = p.color_adapt * chan_mean + (1.0 - p.color_adapt) * gray_mean;
        Zip::from(plane).and(&gray).for_each(|v, &g| {
            let local = p.color_adapt * *v + (1.0 - p.color_adapt) * g;
            let adapt = p.light_adapt * local + (1.0 - p.light_adapt) * global;
            let adapt = (intensity * adapt).powf(map_key);
            let denom = *v + adapt;
            *v = if denom > 0.0 { *v / denom } else { 0.0 };
        });
    }

    linear(&mut planes, p.gamma);
    planes
}

fn drago(mut planes: Planes, p: &DragoParams) -> Planes {
    linear(&mut planes, 1.0);
    let mut gray = gray(&planes);
    let (log_mean, _, _) = log_stats(&gray);
    let mean = log_mean.exp();
    gray.mapv_inplace(|v| v / mean);

    let max = gray.iter().copied().fold(0.0f32, f32::max);
    if max <= 0.0 {
        return planes;
    }
    let exponent = p.bias.ln() / 0.5f32.ln();
    let mapped = gray.mapv(|g| (g + 1.0).ln() / (2.0 + 8.0 * (g / max).powf(exponent)).ln());
    debug!(mean, max, "Drago tonemap");

    for plane in planes.iter_mut() {
        Zip::from(plane)
            .and(&gray)
            .and(&mapped)
            .for_each(|v, &old, &new| {
                *v = if old > 0.0 {
                    (*v / old).max(0.0).powf(p.saturation) * new
                } else {
                    0.0
                };
            });
    }

    linear(&mut planes, p.gamma);
    planes
}

/// Map radiance to an 8-bit-range colour frame with values in `[0, 1]`.
pub fn tonemap(radiance: &RadianceImage, method: &TonemapMethod) -> ColorFrame {
    let planes = [
        radiance.red.clone(),
        radiance.green.clone(),
        radiance.blue.clone(),
    ];
    let [red, green, blue] = match method {
        TonemapMethod::Reinhard(p) => reinhard(planes, p),
        TonemapMethod::Drago(p) => drago(planes, p),
    };
    ColorFrame {
        red: Frame::new(red, 8),
        green: Frame::new(green, 8),
        blue: Frame::new(blue, 8),
    }
}
