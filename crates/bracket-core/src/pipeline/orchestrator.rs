use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::align::{align_stack, CancelToken};
use crate::error::Result;
use crate::frame::Image;
use crate::hdr::{merge, tonemap};
use crate::io::image_io::{save_color_image, save_hdr, save_image};
use crate::io::stack::{load_stack, LoadedStack};

use super::config::PipelineConfig;
use super::types::{NoOpReporter, PipelineOutput, PipelineStage, ProgressReporter};

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Write aligned frames into `dir`, named after their source files.
///
/// 16-bit frames are written as TIFF, 8-bit frames as PNG.
pub fn save_aligned(images: &[Image], sources: &[PathBuf], dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::with_capacity(images.len());
    for (i, image) in images.iter().enumerate() {
        let stem = sources
            .get(i)
            .and_then(|p| p.file_stem())
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("frame_{i:03}"));
        let ext = if image.bit_depth() > 8 { "tif" } else { "png" };
        let path = dir.join(format!("{stem}_aligned.{ext}"));
        save_image(image, &path)?;
        written.push(path);
    }
    info!(count = written.len(), dir = %dir.display(), "Aligned frames written");
    Ok(written)
}

/// Align, merge and tonemap a stack that is already in memory.
pub fn process_stack(
    stack: &LoadedStack,
    config: &PipelineConfig,
    reporter: &dyn ProgressReporter,
    cancel: &CancelToken,
) -> Result<PipelineOutput> {
    let reference = config.reference.or(stack.reference_index);

    reporter.begin_stage(PipelineStage::Aligning, Some(stack.images.len()));
    let aligned = align_stack(
        &stack.images,
        reference,
        &config.alignment,
        None,
        cancel,
        |done| reporter.advance(done),
    )?;
    reporter.finish_stage();

    reporter.begin_stage(PipelineStage::Merging, None);
    let radiance = merge(&aligned.images, &stack.exposures, &config.merge.method)?;
    reporter.finish_stage();

    reporter.begin_stage(PipelineStage::Tonemapping, None);
    info!(method = %config.tonemap.method, "Tonemapping");
    let ldr = tonemap(&radiance, &config.tonemap.method);
    reporter.finish_stage();

    Ok(PipelineOutput {
        aligned: aligned.images,
        radiance,
        ldr,
        report: aligned.report,
    })
}

/// Run the full pipeline with a thread-safe progress reporter.
pub fn run_pipeline_reported(
    config: &PipelineConfig,
    reporter: Arc<dyn ProgressReporter>,
    cancel: &CancelToken,
) -> Result<PipelineOutput> {
    reporter.begin_stage(PipelineStage::Reading, None);
    let stack = load_stack(&config.input)?;
    info!(
        frames = stack.images.len(),
        width = stack.images[0].width(),
        height = stack.images[0].height(),
        "Stack loaded"
    );
    reporter.finish_stage();

    let output = process_stack(&stack, config, reporter.as_ref(), cancel)?;

    reporter.begin_stage(PipelineStage::Writing, None);
    ensure_parent(&config.output)?;
    save_hdr(&output.radiance, &config.output)?;
    let ldr_path = config.resolved_ldr_output();
    ensure_parent(&ldr_path)?;
    save_color_image(&output.ldr, &ldr_path)?;
    info!(hdr = %config.output.display(), ldr = %ldr_path.display(), "Output written");
    reporter.finish_stage();

    if let Some(ref dir) = config.save_aligned {
        save_aligned(&output.aligned, &stack.paths, dir)?;
    }

    Ok(output)
}

/// Run the full pipeline.
pub fn run_pipeline(config: &PipelineConfig) -> Result<PipelineOutput> {
    let reporter = Arc::new(NoOpReporter);
    run_pipeline_reported(config, reporter, &CancelToken::new())
}
