#![allow(dead_code)]

use std::f32::consts::PI;
use std::fs;
use std::path::Path;

use ndarray::Array2;

use bracket_core::frame::{ColorFrame, Frame, Image};
use bracket_core::io::image_io::save_color8;

/// Smooth periodic scene on the 0..1 scale, sampled at `(x - dx, y - dy)`.
///
/// The period (64 px) divides the test image sizes, so a shifted copy has the
/// same histogram as the original.
pub fn wave(x: f32, y: f32) -> f32 {
    let v = 0.5
        + 0.22 * (2.0 * PI * x / 64.0).sin()
        + 0.18 * (2.0 * PI * y / 64.0 + 0.5).cos()
        + 0.08 * (2.0 * PI * (x + y) / 32.0).sin();
    v.clamp(0.0, 1.0)
}

pub fn wave_plane(w: usize, h: usize, dx: f32, dy: f32) -> Array2<f32> {
    Array2::from_shape_fn((h, w), |(r, c)| wave(c as f32 - dx, r as f32 - dy))
}

pub fn mono(data: Array2<f32>) -> Image {
    Image::Mono(Frame::new(data, 8))
}

pub fn color(red: Array2<f32>, green: Array2<f32>, blue: Array2<f32>) -> Image {
    Image::Color(ColorFrame {
        red: Frame::new(red, 8),
        green: Frame::new(green, 8),
        blue: Frame::new(blue, 8),
    })
}

/// Color image whose channels are scaled copies of the same wave.
pub fn wave_color(w: usize, h: usize, dx: f32, dy: f32) -> Image {
    let base = wave_plane(w, h, dx, dy);
    color(base.clone(), base.mapv(|v| v * 0.9), base.mapv(|v| v * 0.7))
}

fn lcg(state: &mut u32) -> f32 {
    *state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
    (*state >> 8) as f32 / (1u32 << 24) as f32
}

/// Random 8x8 blocks, shifted by an integer `(dx, dy)`. Pixels shifted in
/// from outside the pattern read as mid-grey.
pub fn blocks(w: usize, h: usize, dx: i64, dy: i64) -> Array2<f32> {
    let (bw, bh) = (w.div_ceil(8), h.div_ceil(8));
    let mut seed = 12_345u32;
    let cells: Vec<f32> = (0..bw * bh).map(|_| lcg(&mut seed)).collect();
    Array2::from_shape_fn((h, w), |(r, c)| {
        let sx = c as i64 - dx;
        let sy = r as i64 - dy;
        if sx < 0 || sy < 0 || sx >= w as i64 || sy >= h as i64 {
            return 0.5;
        }
        cells[(sy as usize / 8) * bw + sx as usize / 8]
    })
}

/// Scene radiance ramp along x, exposed for `t` and quantized to 8 bits.
pub fn exposed_ramp(w: usize, h: usize, t: f32) -> Array2<f32> {
    Array2::from_shape_fn((h, w), |(_, c)| {
        let radiance = 0.05 + 0.95 * c as f32 / (w - 1) as f32;
        ((radiance * t).clamp(0.0, 1.0) * 255.0).round() / 255.0
    })
}

pub fn max_abs_diff(a: &Array2<f32>, b: &Array2<f32>) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f32::max)
}

/// Write a stack directory: one PNG per exposure plus `exposure.info`.
///
/// `frames` holds `(file name, denominator, image)`.
pub fn write_stack(dir: &Path, frames: &[(&str, u32, &Image)]) {
    let mut info = String::new();
    for (name, denom, image) in frames {
        let cf = match image {
            Image::Color(cf) => cf.clone(),
            Image::Mono(f) => ColorFrame {
                red: f.clone(),
                green: f.clone(),
                blue: f.clone(),
            },
        };
        save_color8(&cf, &dir.join(name)).unwrap();
        info.push_str(&format!("{name} {denom} 1.0\n"));
    }
    fs::write(dir.join("exposure.info"), info).unwrap();
}
