mod common;

use std::fs;
use std::path::Path;

use approx::assert_relative_eq;
use ndarray::Array2;
use tempfile::TempDir;

use bracket_core::error::BracketError;
use bracket_core::frame::{Frame, Image};
use bracket_core::hdr::RadianceImage;
use bracket_core::io::stack::list_stack_files;
use bracket_core::io::{
    load_hdr, load_image, load_stack, parse_exposure_info, parse_exposure_value, save_hdr,
    save_image,
};

use common::{max_abs_diff, mono, wave_plane, write_stack};

fn quantized(w: usize, h: usize) -> Array2<f32> {
    wave_plane(w, h, 0.0, 0.0).mapv(|v| (v * 255.0).round() / 255.0)
}

/// APP1 segment holding a little-endian TIFF block whose IFD0 has a single
/// `ExposureTime` rational.
fn exposure_app1(num: u32, den: u32) -> Vec<u8> {
    let mut tiff = Vec::new();
    tiff.extend_from_slice(b"II");
    tiff.extend_from_slice(&42u16.to_le_bytes());
    tiff.extend_from_slice(&8u32.to_le_bytes());
    tiff.extend_from_slice(&1u16.to_le_bytes());
    tiff.extend_from_slice(&0x829au16.to_le_bytes());
    tiff.extend_from_slice(&5u16.to_le_bytes()); // RATIONAL
    tiff.extend_from_slice(&1u32.to_le_bytes());
    tiff.extend_from_slice(&26u32.to_le_bytes());
    tiff.extend_from_slice(&0u32.to_le_bytes());
    tiff.extend_from_slice(&num.to_le_bytes());
    tiff.extend_from_slice(&den.to_le_bytes());

    let mut segment = vec![0xFF, 0xE1];
    segment.extend_from_slice(&((2 + 6 + tiff.len()) as u16).to_be_bytes());
    segment.extend_from_slice(b"Exif\0\0");
    segment.extend_from_slice(&tiff);
    segment
}

/// Save `image` as a JPEG tagged with a `num/den` second exposure.
fn write_tagged_jpeg(path: &Path, image: &Image, num: u32, den: u32) {
    save_image(image, path).unwrap();
    let jpeg = fs::read(path).unwrap();
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    let mut tagged = jpeg[..2].to_vec();
    tagged.extend(exposure_app1(num, den));
    tagged.extend_from_slice(&jpeg[2..]);
    fs::write(path, tagged).unwrap();
}

#[test]
fn test_parse_exposure_info() {
    let entries =
        parse_exposure_info("a.jpg 250 1.0\nheader\nb.jpg 4\n\nc.jpg 1 extra tokens\n").unwrap();
    let names: Vec<&str> = entries.iter().map(|e| e.file_name.as_str()).collect();
    assert_eq!(names, ["a.jpg", "b.jpg", "c.jpg"]);
    assert_relative_eq!(entries[0].exposure, 1.0 / 250.0);
    assert_relative_eq!(entries[1].exposure, 0.25);
    assert_relative_eq!(entries[2].exposure, 1.0);
}

#[test]
fn test_parse_exposure_info_rejects_bad_denominators() {
    for text in ["a.jpg fast\n", "a.jpg 0\n", "a.jpg -30\n"] {
        assert!(
            matches!(parse_exposure_info(text), Err(BracketError::InvalidStack(_))),
            "{text:?}"
        );
    }
}

#[test]
fn test_load_stack_sorts_by_exposure() {
    let dir = TempDir::new().unwrap();
    let dark = mono(quantized(32, 16).mapv(|v| v * 0.25));
    let mid = mono(quantized(32, 16).mapv(|v| v * 0.5));
    let bright = mono(quantized(32, 16));
    write_stack(
        dir.path(),
        &[("b.png", 4, &mid), ("c.png", 2, &bright), ("a.png", 8, &dark)],
    );

    let stack = load_stack(dir.path()).unwrap();
    assert_eq!(stack.exposures, vec![0.125, 0.25, 0.5]);
    let names: Vec<String> = stack
        .paths
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, ["a.png", "b.png", "c.png"]);
    assert!(stack.reference_index.is_none());

    // Brighter frames come later, and the image order follows the paths.
    let means: Vec<f32> = stack
        .images
        .iter()
        .map(|img| img.planes()[0].mean().unwrap())
        .collect();
    assert!(means[0] < means[1] && means[1] < means[2], "{means:?}");
    assert_eq!(stack.images[0].channels(), 3);
}

#[test]
fn test_reference_info_resolves_after_sorting() {
    let dir = TempDir::new().unwrap();
    let img = mono(quantized(16, 16));
    write_stack(
        dir.path(),
        &[("long.png", 1, &img), ("short.png", 100, &img), ("mid.png", 10, &img)],
    );
    fs::write(dir.path().join("reference.info"), "long.png\n").unwrap();
    assert_eq!(load_stack(dir.path()).unwrap().reference_index, Some(2));

    fs::write(dir.path().join("reference.info"), "missing.png").unwrap();
    assert_eq!(load_stack(dir.path()).unwrap().reference_index, None);
}

#[test]
fn test_parse_exposure_value_forms() {
    assert_relative_eq!(parse_exposure_value("1/250").unwrap(), 0.004);
    assert_relative_eq!(parse_exposure_value(" 0.5 ").unwrap(), 0.5);
    assert_relative_eq!(parse_exposure_value("2").unwrap(), 2.0);
    assert_eq!(parse_exposure_value("1/0"), None);
    assert_eq!(parse_exposure_value("0"), None);
    assert_eq!(parse_exposure_value("fast"), None);
}

#[test]
fn test_exif_exposures_without_exposure_info() {
    let dir = TempDir::new().unwrap();
    let bright = mono(quantized(32, 16));
    let dark = mono(quantized(32, 16).mapv(|v| v * 0.25));
    write_tagged_jpeg(&dir.path().join("bright.jpg"), &bright, 1, 50);
    write_tagged_jpeg(&dir.path().join("dark.jpg"), &dark, 1, 200);
    fs::write(dir.path().join("reference.info"), "bright.jpg\n").unwrap();

    let stack = load_stack(dir.path()).unwrap();
    assert_eq!(stack.images.len(), 2);
    assert_relative_eq!(stack.exposures[0], 0.005);
    assert_relative_eq!(stack.exposures[1], 0.02);
    assert!(stack.paths[0].ends_with("dark.jpg"));
    assert_eq!(stack.reference_index, Some(1));
}

#[test]
fn test_frame_without_exif_exposure_is_invalid() {
    let dir = TempDir::new().unwrap();
    write_tagged_jpeg(&dir.path().join("tagged.jpg"), &mono(quantized(16, 16)), 1, 60);
    save_image(&mono(quantized(16, 16)), &dir.path().join("plain.png")).unwrap();
    let err = load_stack(dir.path()).unwrap_err();
    assert!(
        matches!(err, BracketError::InvalidStack(ref m) if m.contains("plain.png")),
        "{err}"
    );
}

#[test]
fn test_stack_errors() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(load_stack(dir.path()), Err(BracketError::EmptySequence)));

    fs::write(dir.path().join("exposure.info"), "no-space-here\n").unwrap();
    assert!(matches!(load_stack(dir.path()), Err(BracketError::EmptySequence)));

    fs::write(dir.path().join("exposure.info"), "shot.DNG 60\n").unwrap();
    assert!(matches!(load_stack(dir.path()), Err(BracketError::InvalidStack(_))));

    fs::write(dir.path().join("exposure.info"), "absent.png 60\n").unwrap();
    assert!(load_stack(dir.path()).is_err());
}

#[test]
fn test_list_stack_files_skips_hidden_and_dirs() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("b.png"), b"").unwrap();
    fs::write(dir.path().join("a.png"), b"").unwrap();
    fs::write(dir.path().join(".DS_Store"), b"").unwrap();
    fs::create_dir(dir.path().join("sub")).unwrap();

    let files = list_stack_files(dir.path()).unwrap();
    let names: Vec<String> = files
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, ["a.png", "b.png"]);
}

#[test]
fn test_mono_png_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("frame.png");
    let image = mono(quantized(40, 24));
    save_image(&image, &path).unwrap();
    assert_eq!(load_image(&path).unwrap(), image);
}

#[test]
fn test_mono_tiff_keeps_sixteen_bits() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("frame.tif");
    let data = wave_plane(40, 24, 0.0, 0.0);
    save_image(&Image::Mono(Frame::new(data.clone(), 16)), &path).unwrap();

    let loaded = load_image(&path).unwrap();
    assert_eq!(loaded.bit_depth(), 16);
    assert_eq!(loaded.channels(), 1);
    assert!(max_abs_diff(loaded.planes()[0], &data) <= 1.0 / 65535.0);
}

#[test]
fn test_hdr_round_trip_is_close() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("scene.hdr");
    let base = wave_plane(24, 16, 0.0, 0.0);
    let radiance = RadianceImage {
        red: base.mapv(|v| v * 4.0),
        green: base.mapv(|v| v * 3.0),
        blue: base.mapv(|v| v * 2.0),
    };
    save_hdr(&radiance, &path).unwrap();

    let back = load_hdr(&path).unwrap();
    assert_eq!((back.width(), back.height()), (24, 16));
    for (a, b) in radiance.planes().iter().zip(back.planes()) {
        for (x, y) in a.iter().zip(b.iter()) {
            assert_relative_eq!(*x, *y, max_relative = 0.03);
        }
    }
}
