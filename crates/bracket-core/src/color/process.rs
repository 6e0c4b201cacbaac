use ndarray::Array2;

use crate::consts::{LUMINANCE_B, LUMINANCE_G, LUMINANCE_R, MTB_INTENSITY_SCALE, MTB_LUMA_WEIGHTS};
use crate::frame::{ColorFrame, Frame, Image};
use crate::pipeline::config::LumaMode;

/// Compute luminance from a `ColorFrame` using ITU-R BT.601 weights.
pub fn luminance(color: &ColorFrame) -> Frame {
    let data = weighted_sum(
        color,
        [LUMINANCE_R, LUMINANCE_G, LUMINANCE_B],
        1.0,
    );
    Frame::new(data, color.red.original_bit_depth)
}

/// BT.601 grayscale plane of any image. Mono images are returned as-is.
pub fn grayscale(image: &Image) -> Array2<f32> {
    match image {
        Image::Mono(f) => f.data.clone(),
        Image::Color(cf) => luminance(cf).data,
    }
}

/// Grey proxy used for median threshold bitmaps, on the 0..255 scale.
///
/// `Green` takes the green channel; `Weighted` uses `(19R + 183G + 54B) / 256`.
/// Mono images use their only plane for either mode.
pub fn mtb_luma(image: &Image, mode: LumaMode) -> Array2<f32> {
    match image {
        Image::Mono(f) => f.data.mapv(|v| v * MTB_INTENSITY_SCALE),
        Image::Color(cf) => match mode {
            LumaMode::Green => cf.green.data.mapv(|v| v * MTB_INTENSITY_SCALE),
            LumaMode::Weighted => {
                let [wr, wg, wb] = MTB_LUMA_WEIGHTS;
                weighted_sum(cf, [wr, wg, wb], MTB_INTENSITY_SCALE / 256.0)
            }
        },
    }
}

fn weighted_sum(color: &ColorFrame, weights: [f32; 3], scale: f32) -> Array2<f32> {
    let (h, w) = color.red.data.dim();
    let mut data = Array2::<f32>::zeros((h, w));

    for row in 0..h {
        for col in 0..w {
            data[[row, col]] = (weights[0] * color.red.data[[row, col]]
                + weights[1] * color.green.data[[row, col]]
                + weights[2] * color.blue.data[[row, col]])
                * scale;
        }
    }

    data
}

/// Create a ColorFrame from three separate mono frames.
pub fn from_channels(red: Frame, green: Frame, blue: Frame) -> ColorFrame {
    ColorFrame { red, green, blue }
}

/// Promote any image to three channels; mono planes are replicated.
pub fn to_color(image: &Image) -> ColorFrame {
    match image {
        Image::Mono(f) => from_channels(f.clone(), f.clone(), f.clone()),
        Image::Color(cf) => cf.clone(),
    }
}
