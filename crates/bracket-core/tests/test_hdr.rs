mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ndarray::Array2;
use tempfile::TempDir;

use bracket_core::align::CancelToken;
use bracket_core::error::BracketError;
use bracket_core::frame::Image;
use bracket_core::hdr::{
    calibrate_debevec, calibrate_robertson, merge, merge_debevec, merge_mertens, merge_robertson,
    tonemap, DebevecParams, DragoParams, MertensParams, RadianceImage, ReinhardParams,
    ResponseCurve, RobertsonParams,
};
use bracket_core::io::{load_hdr, load_image, load_stack};
use bracket_core::pipeline::config::{
    AlignmentConfig, MergeConfig, MergeMethod, PipelineConfig, TonemapConfig, TonemapMethod,
};
use bracket_core::pipeline::{
    process_stack, run_pipeline, run_pipeline_reported, PipelineStage, ProgressReporter,
};

use common::{exposed_ramp, mono, wave, wave_color, write_stack};

fn ramp_stack() -> (Vec<Image>, Vec<f32>) {
    let exposures = vec![0.25, 0.5, 1.0];
    let images = exposures
        .iter()
        .map(|&t| mono(exposed_ramp(256, 32, t)))
        .collect();
    (images, exposures)
}

/// Wave scene exposed for `t` and quantized to 8 bits.
fn exposed_wave(w: usize, h: usize, t: f32) -> Image {
    mono(Array2::from_shape_fn((h, w), |(r, c)| {
        let v = (wave(c as f32, r as f32) * t).clamp(0.0, 1.0);
        (v * 255.0).round() / 255.0
    }))
}

#[test]
fn test_debevec_radiance_follows_the_scene() {
    let (images, exposures) = ramp_stack();
    let radiance = merge(
        &images,
        &exposures,
        &MergeMethod::Debevec(DebevecParams::default()),
    )
    .unwrap();
    assert_eq!((radiance.width(), radiance.height()), (256, 32));

    let row: Vec<f32> = (0..8)
        .map(|i| radiance.green[[16, i * 32]])
        .chain([radiance.green[[16, 255]]])
        .collect();
    for pair in row.windows(2) {
        assert!(pair[0] < pair[1], "radiance not increasing: {row:?}");
    }
    assert!(row[row.len() - 1] / row[0] > 4.0, "{row:?}");
    assert!(radiance.red.iter().all(|v| v.is_finite() && *v > 0.0));
}

#[test]
fn test_calibrated_response_is_increasing_where_sampled() {
    let (images, exposures) = ramp_stack();
    let response = calibrate_debevec(&images, &exposures, &DebevecParams::default()).unwrap();
    assert_eq!(response.green.len(), 256);
    assert!(response.green[200] > response.green[100]);
    assert!(response.green[100] > response.green[20]);

    let radiance = merge_debevec(&images, &exposures, &response).unwrap();
    assert_eq!(radiance.red, radiance.blue);
}

#[test]
fn test_robertson_radiance_follows_the_scene() {
    let (images, exposures) = ramp_stack();
    let radiance = merge(
        &images,
        &exposures,
        &MergeMethod::Robertson(RobertsonParams::default()),
    )
    .unwrap();
    assert_eq!((radiance.width(), radiance.height()), (256, 32));

    let row: Vec<f32> = (0..8)
        .map(|i| radiance.green[[16, i * 32]])
        .chain([radiance.green[[16, 255]]])
        .collect();
    for pair in row.windows(2) {
        assert!(pair[0] < pair[1], "radiance not increasing: {row:?}");
    }
    assert!(row[row.len() - 1] / row[0] > 4.0, "{row:?}");
    assert!(radiance.red.iter().all(|v| v.is_finite() && *v > 0.0));
}

#[test]
fn test_robertson_response_is_increasing_and_anchored() {
    let (images, exposures) = ramp_stack();
    let response = calibrate_robertson(&images, &exposures, &RobertsonParams::default()).unwrap();
    assert_eq!(response.green.len(), 256);
    assert!((response.green[128] - 1.0).abs() < 1e-6);
    assert!(response.green[200] > response.green[100]);
    assert!(response.green[100] > response.green[20]);
    assert_eq!(response.red, response.blue);
}

#[test]
fn test_robertson_linear_response_keeps_radiance_ratios() {
    let (images, exposures) = ramp_stack();
    let linear: Vec<f32> = (0..256).map(|z| z as f32 / 128.0).collect();
    let response = ResponseCurve {
        red: linear.clone(),
        green: linear.clone(),
        blue: linear,
    };
    let radiance = merge_robertson(&images, &exposures, &response).unwrap();
    // Scene radiance runs from 0.05 to 1.0 across the ramp.
    let ratio = radiance.green[[0, 255]] / radiance.green[[0, 0]];
    assert!((ratio - 20.0).abs() < 1.5, "ratio {ratio}");
}

#[test]
fn test_robertson_needs_an_iteration() {
    let (images, exposures) = ramp_stack();
    let params = RobertsonParams {
        max_iterations: 0,
        ..Default::default()
    };
    assert!(matches!(
        calibrate_robertson(&images, &exposures, &params),
        Err(BracketError::Configuration(_))
    ));
}

#[test]
fn test_radiance_peak_spans_all_channels() {
    let mut radiance = RadianceImage {
        red: Array2::from_elem((2, 3), 0.5),
        green: Array2::from_elem((2, 3), 1.5),
        blue: Array2::from_elem((2, 3), 0.25),
    };
    assert_eq!(radiance.max_value(), 1.5);
    radiance.blue[[1, 2]] = 7.0;
    assert_eq!(radiance.max_value(), 7.0);

    let (images, exposures) = ramp_stack();
    let merged = merge(
        &images,
        &exposures,
        &MergeMethod::Debevec(DebevecParams::default()),
    )
    .unwrap();
    let green_peak = merged.green.iter().copied().fold(0.0f32, f32::max);
    assert!(merged.max_value() >= green_peak);
}

#[test]
fn test_merge_input_errors() {
    let (images, exposures) = ramp_stack();
    let method = MergeMethod::Debevec(DebevecParams::default());
    assert!(matches!(
        merge(&images, &exposures[..2], &method),
        Err(BracketError::Merge(_))
    ));
    assert!(matches!(merge(&[], &[], &method), Err(BracketError::EmptySequence)));

    let mixed = vec![images[0].clone(), mono(exposed_ramp(128, 32, 1.0))];
    assert!(matches!(
        merge_mertens(&mixed, &MertensParams::default()),
        Err(BracketError::DimensionMismatch { index: 1, .. })
    ));
}

#[test]
fn test_mertens_of_identical_frames_is_the_frame() {
    let image = wave_color(64, 48, 0.0, 0.0);
    let images = vec![image.clone(), image.clone(), image.clone()];
    let fused = merge_mertens(&images, &MertensParams::default()).unwrap();

    let Image::Color(ref cf) = image else {
        unreachable!()
    };
    let inputs = [&cf.red.data, &cf.green.data, &cf.blue.data];
    for (out, input) in fused.planes().into_iter().zip(inputs) {
        let err = out
            .iter()
            .zip(input.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f32, f32::max);
        assert!(err < 1e-3, "max error {err}");
    }
}

#[test]
fn test_mertens_prefers_well_exposed_pixels() {
    // Exposedness only, so contrast and saturation do not interfere.
    let params = MertensParams {
        contrast_weight: 0.0,
        saturation_weight: 0.0,
        exposure_weight: 1.0,
    };
    let dark = mono(Array2::from_elem((32, 32), 0.05));
    let good = mono(Array2::from_elem((32, 32), 0.5));
    let fused = merge_mertens(&[dark, good], &params).unwrap();
    let v = fused.green[[16, 16]];
    assert!(v > 0.4 && v < 0.501, "{v}");
}

#[test]
fn test_tonemap_outputs_display_range() {
    let plane = Array2::from_shape_fn((16, 64), |(_, c)| 0.001 * 1.15f32.powi(c as i32));
    let radiance = RadianceImage {
        red: plane.clone(),
        green: plane.mapv(|v| v * 0.5),
        blue: plane.mapv(|v| v * 0.25),
    };
    for method in [
        TonemapMethod::Reinhard(ReinhardParams::default()),
        TonemapMethod::Drago(DragoParams::default()),
    ] {
        let ldr = tonemap(&radiance, &method);
        assert_eq!(ldr.red.original_bit_depth, 8);
        for frame in [&ldr.red, &ldr.green, &ldr.blue] {
            assert!(frame.data.iter().all(|v| (0.0..=1.0).contains(v)), "{method}");
        }
        let first = ldr.red.data[[8, 0]];
        let last = ldr.red.data[[8, 63]];
        assert!(last > first, "{method}: {first} -> {last}");
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

fn wave_stack_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    let short = exposed_wave(64, 64, 0.5);
    let mid = exposed_wave(64, 64, 1.0);
    let long = exposed_wave(64, 64, 1.6);
    write_stack(
        dir.path(),
        &[("short.png", 200, &short), ("long.png", 50, &long), ("mid.png", 100, &mid)],
    );
    dir
}

fn config_for(input: &std::path::Path, out: &std::path::Path) -> PipelineConfig {
    PipelineConfig {
        input: input.to_path_buf(),
        output: out.join("result.hdr"),
        ldr_output: None,
        reference: None,
        alignment: AlignmentConfig::default(),
        merge: MergeConfig::default(),
        tonemap: TonemapConfig::default(),
        save_aligned: Some(out.join("aligned")),
    }
}

#[test]
fn test_run_pipeline_writes_every_output() {
    let stack_dir = wave_stack_dir();
    let out = TempDir::new().unwrap();
    let config = config_for(stack_dir.path(), out.path());

    let output = run_pipeline(&config).unwrap();
    assert_eq!(output.report.reference_index, 1);
    assert_eq!(output.aligned.len(), 3);

    let hdr = load_hdr(&out.path().join("result.hdr")).unwrap();
    assert_eq!((hdr.width(), hdr.height()), (64, 64));

    let ldr = load_image(&out.path().join("result-ldr.jpg")).unwrap();
    assert_eq!((ldr.width(), ldr.height()), (64, 64));
    assert_eq!(ldr.channels(), 3);

    for name in ["short", "mid", "long"] {
        assert!(out.path().join("aligned").join(format!("{name}_aligned.png")).is_file());
    }
}

#[derive(Default)]
struct Recorder {
    stages: Mutex<Vec<PipelineStage>>,
    advanced: AtomicUsize,
}

impl ProgressReporter for Recorder {
    fn begin_stage(&self, stage: PipelineStage, _total_items: Option<usize>) {
        self.stages.lock().unwrap().push(stage);
    }

    fn advance(&self, _items_done: usize) {
        self.advanced.fetch_add(1, Ordering::Relaxed);
    }
}

#[test]
fn test_reporter_sees_every_stage() {
    let stack_dir = wave_stack_dir();
    let out = TempDir::new().unwrap();
    let config = PipelineConfig {
        save_aligned: None,
        merge: MergeConfig {
            method: MergeMethod::Mertens(MertensParams::default()),
        },
        ..config_for(stack_dir.path(), out.path())
    };

    let recorder = Arc::new(Recorder::default());
    run_pipeline_reported(&config, recorder.clone(), &CancelToken::new()).unwrap();

    assert_eq!(
        *recorder.stages.lock().unwrap(),
        vec![
            PipelineStage::Reading,
            PipelineStage::Aligning,
            PipelineStage::Merging,
            PipelineStage::Tonemapping,
            PipelineStage::Writing,
        ]
    );
    assert_eq!(recorder.advanced.load(Ordering::Relaxed), 3);
    assert!(!out.path().join("aligned").exists());
}

#[test]
fn test_process_stack_respects_reference_override() {
    let stack_dir = wave_stack_dir();
    let stack = load_stack(stack_dir.path()).unwrap();
    let config = PipelineConfig {
        reference: Some(0),
        ..config_for(stack_dir.path(), stack_dir.path())
    };

    let output = process_stack(&stack, &config, &Recorder::default(), &CancelToken::new()).unwrap();
    assert_eq!(output.report.reference_index, 0);
    assert_eq!(output.aligned[0], stack.images[0]);
}

#[test]
fn test_pipeline_stops_when_cancelled() {
    let stack_dir = wave_stack_dir();
    let stack = load_stack(stack_dir.path()).unwrap();
    let config = config_for(stack_dir.path(), stack_dir.path());
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = process_stack(&stack, &config, &Recorder::default(), &cancel).unwrap_err();
    assert!(matches!(err, BracketError::Cancelled));
}
