use crate::align::AlignmentReport;
use crate::frame::{ColorFrame, Image};
use crate::hdr::RadianceImage;

/// Pipeline processing stage, used for progress reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineStage {
    Reading,
    Aligning,
    Merging,
    Tonemapping,
    Writing,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reading => write!(f, "Reading frames"),
            Self::Aligning => write!(f, "Aligning frames"),
            Self::Merging => write!(f, "Merging exposures"),
            Self::Tonemapping => write!(f, "Tonemapping"),
            Self::Writing => write!(f, "Writing output"),
        }
    }
}

/// Everything the pipeline produced, after it has been written to disk.
#[derive(Clone, Debug)]
pub struct PipelineOutput {
    /// The stack after alignment, in exposure order.
    pub aligned: Vec<Image>,
    pub radiance: RadianceImage,
    /// Tonemapped image in `[0, 1]`.
    pub ldr: ColorFrame,
    pub report: AlignmentReport,
}

/// Thread-safe progress reporting for the pipeline.
///
/// Implementors can use this to drive progress bars, logging, or any other
/// UI feedback. All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    /// A new pipeline stage has started. `total_items` is the number of
    /// work items in this stage (e.g., frame count), if known.
    fn begin_stage(&self, _stage: PipelineStage, _total_items: Option<usize>) {}

    /// One work item within the current stage has completed.
    fn advance(&self, _items_done: usize) {}

    /// The current stage is finished.
    fn finish_stage(&self) {}
}

/// No-op progress reporter, used when `run_pipeline` delegates.
pub(super) struct NoOpReporter;
impl ProgressReporter for NoOpReporter {}
