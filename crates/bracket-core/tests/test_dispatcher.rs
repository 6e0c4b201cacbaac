mod common;

use std::sync::atomic::{AtomicUsize, Ordering};

use ndarray::Array2;

use bracket_core::align::{
    align, align_stack, AlignedStack, AlignmentDetail, CancelToken, FrameOutcome,
};
use bracket_core::error::{BracketError, Result};
use bracket_core::frame::{Image, PixelOffset};
use bracket_core::pipeline::config::{
    AlignmentConfig, AlignmentMethod, EccConfig, EccFailurePolicy, FeatureConfig, MtbConfig,
    WarpModel,
};

use common::{mono, wave_color, wave_plane};

fn mtb() -> AlignmentConfig {
    AlignmentConfig::new(AlignmentMethod::PyramidMtb(MtbConfig::default()))
}

fn run(
    images: &[Image],
    reference: Option<usize>,
    config: &AlignmentConfig,
) -> Result<AlignedStack> {
    align_stack(images, reference, config, None, &CancelToken::new(), |_| {})
}

#[test]
fn test_identical_stack_defaults_to_middle_reference() {
    let image = wave_color(512, 384, 0.0, 0.0);
    let images = vec![image.clone(), image.clone(), image.clone()];

    let stack = run(&images, None, &mtb()).unwrap();
    assert_eq!(stack.report.reference_index, 1);
    assert_eq!(stack.images, images);
    assert_eq!(stack.report.outcomes[1], FrameOutcome::Reference);
    for i in [0, 2] {
        assert_eq!(
            stack.report.outcomes[i],
            FrameOutcome::Aligned(AlignmentDetail::Translation {
                offset: PixelOffset::new(0, 0),
                disagreement: 0,
            })
        );
    }
}

#[test]
fn test_reference_is_returned_untouched() {
    let images = vec![
        mono(wave_plane(128, 128, 0.0, 0.0)),
        mono(wave_plane(128, 128, 2.0, 1.0)),
        mono(wave_plane(128, 128, -1.0, 3.0)),
    ];
    for method in [
        AlignmentMethod::PyramidMtb(MtbConfig::default()),
        AlignmentMethod::Feature(FeatureConfig::default()),
        AlignmentMethod::Ecc(EccConfig::default()),
    ] {
        let config = AlignmentConfig::new(method);
        let stack = run(&images, Some(2), &config).unwrap();
        assert_eq!(stack.images.len(), 3);
        assert_eq!(stack.images[2], images[2]);
        for img in &stack.images {
            assert_eq!((img.width(), img.height()), (128, 128));
        }
    }
}

#[test]
fn test_mtb_stack_offsets_in_input_order() {
    let images = vec![
        mono(wave_plane(256, 256, 3.0, 0.0)),
        mono(wave_plane(256, 256, 0.0, 0.0)),
        mono(wave_plane(256, 256, 0.0, -2.0)),
    ];
    let stack = run(&images, Some(1), &mtb()).unwrap();
    let offsets: Vec<Option<PixelOffset>> = stack
        .report
        .outcomes
        .iter()
        .map(|o| match o {
            FrameOutcome::Aligned(AlignmentDetail::Translation { offset, .. }) => Some(*offset),
            _ => None,
        })
        .collect();
    assert_eq!(
        offsets,
        vec![Some(PixelOffset::new(-3, 0)), None, Some(PixelOffset::new(0, 2))]
    );
}

#[test]
fn test_parallel_path_preserves_order_and_counts_progress() {
    let images: Vec<Image> = (0..6)
        .map(|i| mono(wave_plane(128, 128, i as f32 - 3.0, 0.0)))
        .collect();
    let seen = AtomicUsize::new(0);
    let stack = align_stack(&images, None, &mtb(), None, &CancelToken::new(), |done| {
        seen.fetch_max(done, Ordering::Relaxed);
    })
    .unwrap();

    assert_eq!(seen.load(Ordering::Relaxed), 6);
    assert_eq!(stack.report.reference_index, 2);
    assert_eq!(stack.images[2], images[2]);
    for (i, outcome) in stack.report.outcomes.iter().enumerate() {
        if let FrameOutcome::Aligned(AlignmentDetail::Translation { offset, .. }) = outcome {
            assert_eq!(offset.dx, 2 - i as i32, "frame {i}");
        }
    }
}

#[test]
fn test_realigning_is_a_no_op() {
    let images = vec![
        mono(wave_plane(256, 256, 0.0, 0.0)),
        mono(wave_plane(256, 256, 2.0, -1.0)),
    ];
    let once = run(&images, Some(0), &mtb()).unwrap();
    let twice = run(&once.images, Some(0), &mtb()).unwrap();
    match &twice.report.outcomes[1] {
        FrameOutcome::Aligned(AlignmentDetail::Translation { offset, .. }) => {
            assert_eq!(*offset, PixelOffset::new(0, 0));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(twice.images, once.images);
}

#[test]
fn test_disabled_alignment_passes_everything_through() {
    let images = vec![mono(wave_plane(64, 64, 0.0, 0.0)), mono(wave_plane(64, 64, 5.0, 0.0))];
    let config = AlignmentConfig {
        enabled: false,
        ..mtb()
    };
    let stack = run(&images, None, &config).unwrap();
    assert_eq!(stack.images, images);
    assert_eq!(stack.report.passed_through(), 1);
    assert_eq!(stack.report.outcomes[0], FrameOutcome::Reference);
}

#[test]
fn test_align_returns_images_only() {
    let images = vec![mono(wave_plane(64, 64, 0.0, 0.0)); 2];
    let out = align(&images, None, &mtb()).unwrap();
    assert_eq!(out, images);
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[test]
fn test_empty_stack() {
    let err = run(&[], None, &mtb()).unwrap_err();
    assert!(matches!(err, BracketError::EmptySequence));
}

#[test]
fn test_reference_out_of_range() {
    let images = vec![mono(wave_plane(64, 64, 0.0, 0.0)); 3];
    let err = run(&images, Some(3), &mtb()).unwrap_err();
    assert!(matches!(err, BracketError::ReferenceOutOfRange { index: 3, total: 3 }));
}

#[test]
fn test_dimension_mismatch() {
    let images = vec![
        mono(wave_plane(64, 64, 0.0, 0.0)),
        mono(wave_plane(64, 48, 0.0, 0.0)),
    ];
    let err = run(&images, None, &mtb()).unwrap_err();
    assert!(matches!(
        err,
        BracketError::DimensionMismatch {
            index: 1,
            expected_w: 64,
            expected_h: 64,
            got_w: 64,
            got_h: 48
        }
    ));
}

#[test]
fn test_invalid_configuration_is_rejected_before_work() {
    let images = vec![mono(wave_plane(64, 64, 0.0, 0.0)); 2];
    let config = AlignmentConfig::new(AlignmentMethod::Feature(FeatureConfig {
        min_matches: 3,
        ..Default::default()
    }));
    let calls = AtomicUsize::new(0);
    let err = align_stack(&images, None, &config, None, &CancelToken::new(), |_| {
        calls.fetch_add(1, Ordering::Relaxed);
    })
    .unwrap_err();
    assert!(matches!(err, BracketError::Configuration(_)));
    assert_eq!(calls.load(Ordering::Relaxed), 0);
}

#[test]
fn test_cancelled_token_stops_the_call() {
    let images = vec![mono(wave_plane(64, 64, 0.0, 0.0)); 5];
    let cancel = CancelToken::new();
    cancel.cancel();
    let err = align_stack(&images, None, &mtb(), None, &cancel, |_| {}).unwrap_err();
    assert!(matches!(err, BracketError::Cancelled));
}

#[test]
fn test_ecc_fail_policy_reports_the_frame_index() {
    let images = vec![
        mono(wave_plane(64, 64, 0.0, 0.0)),
        mono(Array2::from_elem((64, 64), 0.5f32)),
    ];
    let config = AlignmentConfig::new(AlignmentMethod::Ecc(EccConfig {
        warp_model: WarpModel::Translation,
        failure_policy: EccFailurePolicy::Fail,
        ..Default::default()
    }));
    let err = run(&images, Some(0), &config).unwrap_err();
    assert!(matches!(err, BracketError::AlignmentFailure { index: 1, .. }));
}

#[test]
fn test_ecc_pass_through_is_reported() {
    let images = vec![
        mono(wave_plane(64, 64, 0.0, 0.0)),
        mono(Array2::from_elem((64, 64), 0.5f32)),
    ];
    let config = AlignmentConfig::new(AlignmentMethod::Ecc(EccConfig::default()));
    let stack = run(&images, Some(0), &config).unwrap();
    assert_eq!(stack.report.passed_through(), 1);
    assert_eq!(stack.images[1], images[1]);
}
