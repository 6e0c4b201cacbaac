//! Geometric resampling of image planes.
//!
//! All warps here are destination-driven: for every output pixel the source
//! position is computed and sampled, with zero outside the source frame.

use nalgebra::{Matrix3, Vector3};
use ndarray::Array2;
use rayon::prelude::*;

use crate::consts::PARALLEL_PIXEL_THRESHOLD;
use crate::frame::{Image, PixelOffset};

/// Bilinear sample at fractional `(y, x)`, treating out-of-frame neighbours as zero.
pub fn bilinear_sample(data: &Array2<f32>, y: f64, x: f64) -> f32 {
    let (h, w) = data.dim();

    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let x1 = x0 + 1;
    let y1 = y0 + 1;

    let fx = (x - x0 as f64) as f32;
    let fy = (y - y0 as f64) as f32;

    let sample = |r: i64, c: i64| -> f32 {
        if r >= 0 && r < h as i64 && c >= 0 && c < w as i64 {
            data[[r as usize, c as usize]]
        } else {
            0.0
        }
    };

    let v00 = sample(y0, x0);
    if fx == 0.0 && fy == 0.0 {
        return v00;
    }
    let v10 = sample(y0, x1);
    let v01 = sample(y1, x0);
    let v11 = sample(y1, x1);

    v00 * (1.0 - fx) * (1.0 - fy)
        + v10 * fx * (1.0 - fy)
        + v01 * (1.0 - fx) * fy
        + v11 * fx * fy
}

/// Whether `(y, x)` lies inside the frame with a full bilinear neighbourhood.
pub fn inside(dim: (usize, usize), y: f64, x: f64) -> bool {
    let (h, w) = dim;
    y >= 0.0 && x >= 0.0 && y <= (h - 1) as f64 && x <= (w - 1) as f64
}

/// Shift a plane by a whole number of pixels. Output pixel `(x, y)` is
/// input pixel `(x - dx, y - dy)`; uncovered pixels are zero.
pub fn translate_plane(data: &Array2<f32>, offset: PixelOffset) -> Array2<f32> {
    let (h, w) = data.dim();
    Array2::from_shape_fn((h, w), |(row, col)| {
        let sy = row as i64 - offset.dy as i64;
        let sx = col as i64 - offset.dx as i64;
        if sy >= 0 && sy < h as i64 && sx >= 0 && sx < w as i64 {
            data[[sy as usize, sx as usize]]
        } else {
            0.0
        }
    })
}

/// Shift every channel of an image by a whole number of pixels.
pub fn translate_image(image: &Image, offset: PixelOffset) -> Image {
    if offset == PixelOffset::default() {
        return image.clone();
    }
    image.map_planes(|plane| translate_plane(plane, offset))
}

/// Map a destination pixel through `map` (destination -> source, homogeneous).
///
/// Returns `None` when the point maps to infinity.
pub fn map_point(map: &Matrix3<f64>, x: f64, y: f64) -> Option<(f64, f64)> {
    let p = map * Vector3::new(x, y, 1.0);
    if p[2].abs() < 1e-12 {
        return None;
    }
    Some((p[0] / p[2], p[1] / p[2]))
}

/// Resample `data` into an `out_dim` grid. `map` takes destination pixel
/// coordinates `(x, y, 1)` to source coordinates; an affine map has last row
/// `[0, 0, 1]`, anything else is a perspective warp.
pub fn warp_plane(data: &Array2<f32>, map: &Matrix3<f64>, out_dim: (usize, usize)) -> Array2<f32> {
    let (h, w) = out_dim;
    let row_fn = |row: usize| -> Vec<f32> {
        (0..w)
            .map(|col| match map_point(map, col as f64, row as f64) {
                Some((sx, sy)) => bilinear_sample(data, sy, sx),
                None => 0.0,
            })
            .collect()
    };

    let rows: Vec<Vec<f32>> = if h * w >= PARALLEL_PIXEL_THRESHOLD {
        (0..h).into_par_iter().map(row_fn).collect()
    } else {
        (0..h).map(row_fn).collect()
    };

    let mut result = Array2::<f32>::zeros((h, w));
    for (row, row_data) in rows.into_iter().enumerate() {
        for (col, val) in row_data.into_iter().enumerate() {
            result[[row, col]] = val;
        }
    }
    result
}

/// Resample every channel of an image through a destination -> source map.
pub fn warp_image(image: &Image, map: &Matrix3<f64>, out_dim: (usize, usize)) -> Image {
    image.map_planes(|plane| warp_plane(plane, map, out_dim))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bilinear_interpolation() {
        let mut data = Array2::<f32>::zeros((4, 4));
        data[[1, 1]] = 1.0;

        assert!((bilinear_sample(&data, 1.0, 1.0) - 1.0).abs() < 1e-6);
        assert!((bilinear_sample(&data, 1.0, 1.5) - 0.5).abs() < 1e-6);
        assert_eq!(bilinear_sample(&data, -3.0, 1.0), 0.0);
    }

    #[test]
    fn identity_warp_is_exact() {
        let data = Array2::from_shape_fn((6, 5), |(r, c)| (r * 5 + c) as f32 * 0.01);
        let warped = warp_plane(&data, &Matrix3::identity(), (6, 5));
        assert_eq!(warped, data);
    }

    #[test]
    fn integer_translation_fills_zero() {
        let data = Array2::from_shape_fn((3, 3), |(r, c)| (r * 3 + c + 1) as f32);
        let shifted = translate_plane(&data, PixelOffset::new(1, 0));
        assert_eq!(shifted[[0, 0]], 0.0);
        assert_eq!(shifted[[0, 1]], 1.0);
        assert_eq!(shifted[[2, 2]], 8.0);
    }
}
