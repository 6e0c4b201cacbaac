use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use image::codecs::hdr::HdrEncoder;
use image::{ColorType, DynamicImage, ImageBuffer, ImageFormat, Luma, Rgb};
use ndarray::Array2;

use crate::error::{BracketError, Result};
use crate::frame::{ColorFrame, Frame, Image};
use crate::hdr::RadianceImage;

fn to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn to_u16(v: f32) -> u16 {
    (v.clamp(0.0, 1.0) * 65535.0).round() as u16
}

fn buffer_error(w: usize, h: usize) -> BracketError {
    BracketError::InvalidStack(format!("pixel buffer does not fit {w}x{h}"))
}

fn interleave<T, F>(color: &ColorFrame, convert: F) -> Vec<T>
where
    F: Fn(f32) -> T,
{
    let (h, w) = color.red.data.dim();
    let mut pixels = Vec::with_capacity(h * w * 3);
    for row in 0..h {
        for col in 0..w {
            pixels.push(convert(color.red.data[[row, col]]));
            pixels.push(convert(color.green.data[[row, col]]));
            pixels.push(convert(color.blue.data[[row, col]]));
        }
    }
    pixels
}

/// Save a frame as 16-bit grayscale TIFF.
pub fn save_tiff(frame: &Frame, path: &Path) -> Result<()> {
    let (w, h) = (frame.width(), frame.height());
    let pixels: Vec<u16> = frame.data.iter().map(|&v| to_u16(v)).collect();
    let img = ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(w as u32, h as u32, pixels)
        .ok_or_else(|| buffer_error(w, h))?;
    img.save_with_format(path, ImageFormat::Tiff)?;
    Ok(())
}

/// Save a frame as 8-bit grayscale, format chosen by extension (PNG or JPEG).
pub fn save_gray8(frame: &Frame, path: &Path) -> Result<()> {
    let (w, h) = (frame.width(), frame.height());
    let pixels: Vec<u8> = frame.data.iter().map(|&v| to_u8(v)).collect();
    let img = ImageBuffer::<Luma<u8>, Vec<u8>>::from_raw(w as u32, h as u32, pixels)
        .ok_or_else(|| buffer_error(w, h))?;
    img.save(path)?;
    Ok(())
}

/// Save a ColorFrame as 16-bit RGB TIFF.
pub fn save_color_tiff(color: &ColorFrame, path: &Path) -> Result<()> {
    let (w, h) = (color.red.width(), color.red.height());
    let img =
        ImageBuffer::<Rgb<u16>, Vec<u16>>::from_raw(w as u32, h as u32, interleave(color, to_u16))
            .ok_or_else(|| buffer_error(w, h))?;
    img.save_with_format(path, ImageFormat::Tiff)?;
    Ok(())
}

/// Save a ColorFrame as 8-bit RGB, format chosen by extension (PNG or JPEG).
pub fn save_color8(color: &ColorFrame, path: &Path) -> Result<()> {
    let (w, h) = (color.red.width(), color.red.height());
    let img =
        ImageBuffer::<Rgb<u8>, Vec<u8>>::from_raw(w as u32, h as u32, interleave(color, to_u8))
            .ok_or_else(|| buffer_error(w, h))?;
    img.save(path)?;
    Ok(())
}

fn is_tiff(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("tif") || e.eq_ignore_ascii_case("tiff"))
}

/// Save a ColorFrame, choosing format from file extension.
/// TIFF keeps 16 bits; anything else is written at 8 bits.
pub fn save_color_image(color: &ColorFrame, path: &Path) -> Result<()> {
    if is_tiff(path) {
        save_color_tiff(color, path)
    } else {
        save_color8(color, path)
    }
}

/// Save an image of either kind, choosing format from file extension.
pub fn save_image(image: &Image, path: &Path) -> Result<()> {
    match image {
        Image::Mono(f) if is_tiff(path) => save_tiff(f, path),
        Image::Mono(f) => save_gray8(f, path),
        Image::Color(cf) => save_color_image(cf, path),
    }
}

/// Write a radiance image as Radiance RGBE (`.hdr`).
pub fn save_hdr(radiance: &RadianceImage, path: &Path) -> Result<()> {
    let (w, h) = (radiance.width(), radiance.height());
    let mut pixels = Vec::with_capacity(w * h);
    for row in 0..h {
        for col in 0..w {
            pixels.push(Rgb([
                radiance.red[[row, col]].max(0.0),
                radiance.green[[row, col]].max(0.0),
                radiance.blue[[row, col]].max(0.0),
            ]));
        }
    }
    let writer = BufWriter::new(File::create(path)?);
    HdrEncoder::new(writer).encode(&pixels, w, h)?;
    Ok(())
}

/// Read a Radiance `.hdr` file back into planes.
pub fn load_hdr(path: &Path) -> Result<RadianceImage> {
    let img = image::open(path)?.into_rgb32f();
    let (w, h) = img.dimensions();
    let (w, h) = (w as usize, h as usize);
    let mut radiance = RadianceImage {
        red: Array2::zeros((h, w)),
        green: Array2::zeros((h, w)),
        blue: Array2::zeros((h, w)),
    };
    for (x, y, px) in img.enumerate_pixels() {
        let (row, col) = (y as usize, x as usize);
        radiance.red[[row, col]] = px.0[0];
        radiance.green[[row, col]] = px.0[1];
        radiance.blue[[row, col]] = px.0[2];
    }
    Ok(radiance)
}

fn source_bit_depth(color: ColorType) -> u8 {
    match color {
        ColorType::L16 | ColorType::La16 | ColorType::Rgb16 | ColorType::Rgba16 => 16,
        _ => 8,
    }
}

fn plane_from<F>(w: u32, h: u32, get: F) -> Array2<f32>
where
    F: Fn(u32, u32) -> f32,
{
    Array2::from_shape_fn((h as usize, w as usize), |(row, col)| get(col as u32, row as u32))
}

/// Convert a decoded image into planes in `[0, 1]`, keeping mono images mono.
pub fn image_from_dynamic(img: DynamicImage) -> Image {
    let depth = source_bit_depth(img.color());
    let (w, h) = (img.width(), img.height());
    let has_color = img.color().has_color();

    match (has_color, depth) {
        (false, 16) => {
            let gray = img.into_luma16();
            Image::Mono(Frame::new(
                plane_from(w, h, |x, y| gray.get_pixel(x, y).0[0] as f32 / 65535.0),
                16,
            ))
        }
        (false, _) => {
            let gray = img.into_luma8();
            Image::Mono(Frame::new(
                plane_from(w, h, |x, y| gray.get_pixel(x, y).0[0] as f32 / 255.0),
                8,
            ))
        }
        (true, 16) => {
            let rgb = img.into_rgb16();
            let channel =
                |c: usize| plane_from(w, h, |x, y| rgb.get_pixel(x, y).0[c] as f32 / 65535.0);
            Image::Color(ColorFrame {
                red: Frame::new(channel(0), 16),
                green: Frame::new(channel(1), 16),
                blue: Frame::new(channel(2), 16),
            })
        }
        (true, _) => {
            let rgb = img.into_rgb8();
            let channel =
                |c: usize| plane_from(w, h, |x, y| rgb.get_pixel(x, y).0[c] as f32 / 255.0);
            Image::Color(ColorFrame {
                red: Frame::new(channel(0), 8),
                green: Frame::new(channel(1), 8),
                blue: Frame::new(channel(2), 8),
            })
        }
    }
}

/// Load an image file. 8- and 16-bit sources are kept at their depth;
/// grayscale files load as `Image::Mono`.
pub fn load_image(path: &Path) -> Result<Image> {
    let img = image::open(path)?;
    Ok(image_from_dynamic(img))
}
