//! Coarse-to-fine image pyramids for hierarchical alignment.
//!
//! Each level halves the linear resolution of the one below it with a 2x2
//! box filter. Levels are ordered coarsest first so a search can walk the
//! vector front to back, doubling its offset at every step.

use ndarray::Array2;

use crate::consts::PYRAMID_MIN_DIMENSION;

/// Number of downsampled levels above the original for a `width` x `height` image.
///
/// `max(0, floor(log2(min(width, height) / 64)))`.
pub fn pyramid_levels(width: usize, height: usize) -> usize {
    let short_side = width.min(height);
    if short_side < PYRAMID_MIN_DIMENSION {
        return 0;
    }
    // floor(log2(short / 64)) == floor(log2(floor(short / 64))) for integers.
    let ratio = short_side / PYRAMID_MIN_DIMENSION;
    (usize::BITS - 1 - ratio.leading_zeros()) as usize
}

/// Build a pyramid whose level count is derived from the image's own size.
///
/// Returns `levels + 1` arrays, index 0 the coarsest and the last the original.
pub fn build_pyramid(data: &Array2<f32>) -> Vec<Array2<f32>> {
    let (h, w) = data.dim();
    build_pyramid_with_levels(data, pyramid_levels(w, h))
}

/// Build a pyramid with exactly `levels` downsampled levels above the original.
pub fn build_pyramid_with_levels(data: &Array2<f32>, levels: usize) -> Vec<Array2<f32>> {
    let mut pyramid = Vec::with_capacity(levels + 1);
    pyramid.push(data.clone());

    for _ in 0..levels {
        let next = downsample_2x(&pyramid[pyramid.len() - 1]);
        pyramid.push(next);
    }

    pyramid.reverse();
    pyramid
}

/// Downsample by 2x, averaging each 2x2 block.
///
/// Odd trailing rows/columns are averaged with themselves (edge replication).
pub fn downsample_2x(data: &Array2<f32>) -> Array2<f32> {
    let (h, w) = data.dim();
    let new_h = h.div_ceil(2);
    let new_w = w.div_ceil(2);

    Array2::from_shape_fn((new_h, new_w), |(r, c)| {
        let r0 = r * 2;
        let c0 = c * 2;
        let r1 = (r0 + 1).min(h - 1);
        let c1 = (c0 + 1).min(w - 1);
        (data[[r0, c0]] + data[[r0, c1]] + data[[r1, c0]] + data[[r1, c1]]) * 0.25
    })
}

/// Resize to `(new_h, new_w)` with bilinear interpolation on pixel centres.
///
/// Samples are clamped to the edge, so no zero border leaks in.
pub fn resize_bilinear(data: &Array2<f32>, new_h: usize, new_w: usize) -> Array2<f32> {
    let (h, w) = data.dim();
    let sy = h as f32 / new_h as f32;
    let sx = w as f32 / new_w as f32;

    Array2::from_shape_fn((new_h, new_w), |(r, c)| {
        let y = ((r as f32 + 0.5) * sy - 0.5).clamp(0.0, (h - 1) as f32);
        let x = ((c as f32 + 0.5) * sx - 0.5).clamp(0.0, (w - 1) as f32);
        let y0 = y.floor() as usize;
        let x0 = x.floor() as usize;
        let y1 = (y0 + 1).min(h - 1);
        let x1 = (x0 + 1).min(w - 1);
        let fy = y - y0 as f32;
        let fx = x - x0 as f32;
        let top = data[[y0, x0]] * (1.0 - fx) + data[[y0, x1]] * fx;
        let bottom = data[[y1, x0]] * (1.0 - fx) + data[[y1, x1]] * fx;
        top * (1.0 - fy) + bottom * fy
    })
}
