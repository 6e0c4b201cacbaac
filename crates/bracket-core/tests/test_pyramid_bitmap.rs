mod common;

use ndarray::Array2;

use bracket_core::align::bitmap::{compute_bitmaps, disagreement, median};
use bracket_core::align::pyramid::{build_pyramid, downsample_2x, pyramid_levels};
use bracket_core::frame::PixelOffset;
use bracket_core::pipeline::config::ExclusionMasking;

use common::wave_plane;

// ---------------------------------------------------------------------------
// Pyramid
// ---------------------------------------------------------------------------

#[test]
fn test_pyramid_levels_from_short_side() {
    assert_eq!(pyramid_levels(256, 256), 2);
    assert_eq!(pyramid_levels(64, 64), 0);
    assert_eq!(pyramid_levels(63, 1000), 0);
    assert_eq!(pyramid_levels(512, 384), 2);
    assert_eq!(pyramid_levels(4000, 3000), 5);
}

#[test]
fn test_build_pyramid_is_coarsest_first() {
    let data = Array2::<f32>::zeros((256, 320));
    let pyramid = build_pyramid(&data);
    assert_eq!(pyramid.len(), 3);
    assert_eq!(pyramid[0].dim(), (64, 80));
    assert_eq!(pyramid[1].dim(), (128, 160));
    assert_eq!(pyramid[2].dim(), (256, 320));
}

#[test]
fn test_small_image_pyramid_is_just_the_original() {
    let data = Array2::from_elem((40, 50), 0.3f32);
    let pyramid = build_pyramid(&data);
    assert_eq!(pyramid.len(), 1);
    assert_eq!(pyramid[0], data);
}

#[test]
fn test_downsample_averages_blocks() {
    let data =
        Array2::from_shape_vec((2, 4), vec![0.0, 1.0, 2.0, 2.0, 1.0, 0.0, 4.0, 4.0]).unwrap();
    let half = downsample_2x(&data);
    assert_eq!(half.dim(), (1, 2));
    assert!((half[[0, 0]] - 0.5).abs() < 1e-6);
    assert!((half[[0, 1]] - 3.0).abs() < 1e-6);
}

#[test]
fn test_downsample_odd_size_rounds_up() {
    let data = Array2::from_elem((5, 7), 1.0f32);
    let half = downsample_2x(&data);
    assert_eq!(half.dim(), (3, 4));
    assert!(half.iter().all(|&v| (v - 1.0).abs() < 1e-6));
}

// ---------------------------------------------------------------------------
// Bitmaps
// ---------------------------------------------------------------------------

#[test]
fn test_median_odd_and_even() {
    let odd = Array2::from_shape_vec((1, 5), vec![5.0, 1.0, 3.0, 2.0, 4.0]).unwrap();
    assert_eq!(median(&odd), 3.0);
    let even = Array2::from_shape_vec((2, 2), vec![4.0, 1.0, 3.0, 2.0]).unwrap();
    assert_eq!(median(&even), 2.5);
}

#[test]
fn test_threshold_includes_the_median() {
    let data = Array2::from_shape_vec((1, 5), vec![10.0, 20.0, 30.0, 40.0, 50.0]).unwrap();
    let pair = compute_bitmaps(&data, 5.0);
    assert_eq!(pair.median, 30.0);
    let bits: Vec<bool> = pair.threshold.iter().copied().collect();
    assert_eq!(bits, vec![false, false, true, true, true]);
    let excl: Vec<bool> = pair.exclusion.iter().copied().collect();
    assert_eq!(excl, vec![true, true, false, true, true]);
}

#[test]
fn test_identical_bitmaps_have_zero_disagreement() {
    let data = wave_plane(96, 80, 0.0, 0.0).mapv(|v| v * 255.0);
    let pair = compute_bitmaps(&data, 4.0);
    for masking in [ExclusionMasking::Both, ExclusionMasking::CandidateOnly] {
        assert_eq!(disagreement(PixelOffset::default(), &pair, &pair, masking), 0);
    }
}

#[test]
fn test_disagreement_grows_with_offset() {
    let data = wave_plane(128, 128, 0.0, 0.0).mapv(|v| v * 255.0);
    let pair = compute_bitmaps(&data, 1.0);
    let near = disagreement(PixelOffset::new(1, 0), &pair, &pair, ExclusionMasking::Both);
    let far = disagreement(PixelOffset::new(6, 0), &pair, &pair, ExclusionMasking::Both);
    assert!(near > 0);
    assert!(far > near, "far={far} near={near}");
}

#[test]
fn test_shifted_candidate_matches_at_its_offset() {
    let reference = wave_plane(128, 128, 0.0, 0.0).mapv(|v| v * 255.0);
    let shifted = wave_plane(128, 128, 2.0, -3.0).mapv(|v| v * 255.0);
    let r = compute_bitmaps(&reference, 4.0);
    let c = compute_bitmaps(&shifted, 4.0);
    let score = disagreement(PixelOffset::new(-2, 3), &r, &c, ExclusionMasking::Both);
    assert_eq!(score, 0);
}
