pub mod config;
mod orchestrator;
mod types;

pub use orchestrator::{process_stack, run_pipeline, run_pipeline_reported, save_aligned};
pub use types::{PipelineOutput, PipelineStage, ProgressReporter};
