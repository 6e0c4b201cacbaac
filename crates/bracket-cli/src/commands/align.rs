use std::path::PathBuf;

use anyhow::{Context, Result};
use bracket_core::align::{align_stack, CancelToken};
use bracket_core::io::load_stack;
use bracket_core::pipeline::config::{
    AlignmentConfig, AlignmentMethod, DetectorKind, EccConfig, EccFailurePolicy, ExclusionMasking,
    FeatureConfig, LumaMode, MtbConfig, OrbConfig, SearchWindow, SiftConfig, WarpModel,
};
use bracket_core::pipeline::{save_aligned, PipelineStage, ProgressReporter};
use clap::{Args, ValueEnum};

use crate::progress::BarReporter;
use crate::summary::print_alignment_report;

#[derive(Clone, Copy, ValueEnum)]
pub enum MethodArg {
    Mtb,
    Orb,
    Sift,
    Ecc,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum LumaArg {
    Green,
    Weighted,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum WarpArg {
    Translation,
    Euclidean,
    Affine,
    Homography,
}

/// Alignment options shared by `align` and `run`.
#[derive(Args)]
pub struct AlignmentArgs {
    /// Alignment strategy
    #[arg(long, value_enum, default_value = "mtb")]
    pub method: MethodArg,

    /// Skip alignment and merge the frames as loaded
    #[arg(long)]
    pub no_align: bool,

    /// Reference frame index (after sorting by exposure); overrides reference.info
    #[arg(long)]
    pub reference: Option<usize>,

    /// Grey proxy for MTB bitmaps
    #[arg(long, value_enum, default_value = "green")]
    pub luma: LumaArg,

    /// MTB exclusion band around the median, in 8-bit units
    #[arg(long, default_value = "10")]
    pub tolerance: f32,

    /// MTB: search only {-1, 0} per level
    #[arg(long)]
    pub asymmetric: bool,

    /// MTB: gate disagreement by the candidate's exclusion mask only
    #[arg(long)]
    pub candidate_mask_only: bool,

    /// ORB: maximum number of features
    #[arg(long, default_value = "500")]
    pub features: usize,

    /// Feature: minimum matches before a frame is passed through
    #[arg(long, default_value = "9")]
    pub min_matches: usize,

    /// Feature: fraction of best matches used for the homography
    #[arg(long, default_value = "0.15")]
    pub match_percent: f32,

    /// ECC: motion model
    #[arg(long, value_enum, default_value = "translation")]
    pub warp: WarpArg,

    /// ECC: iteration cap
    #[arg(long, default_value = "5000")]
    pub iterations: usize,

    /// ECC: convergence threshold on the correlation gain
    #[arg(long, default_value = "1e-10")]
    pub epsilon: f64,

    /// ECC: Gaussian pre-smoothing kernel size (0 disables)
    #[arg(long, default_value = "5")]
    pub gauss_size: usize,

    /// ECC: abort instead of passing a frame through when it fails to converge
    #[arg(long)]
    pub strict: bool,
}

impl AlignmentArgs {
    pub fn to_config(&self) -> AlignmentConfig {
        let feature = |detector| {
            AlignmentMethod::Feature(FeatureConfig {
                detector,
                min_matches: self.min_matches,
                match_percent: self.match_percent,
                ..Default::default()
            })
        };

        let method = match self.method {
            MethodArg::Mtb => AlignmentMethod::PyramidMtb(MtbConfig {
                luma: match self.luma {
                    LumaArg::Green => LumaMode::Green,
                    LumaArg::Weighted => LumaMode::Weighted,
                },
                exclusion_tolerance: self.tolerance,
                search_window: if self.asymmetric {
                    SearchWindow::Asymmetric
                } else {
                    SearchWindow::Symmetric
                },
                masking: if self.candidate_mask_only {
                    ExclusionMasking::CandidateOnly
                } else {
                    ExclusionMasking::Both
                },
            }),
            MethodArg::Orb => feature(DetectorKind::Orb(OrbConfig {
                n_features: self.features,
                ..Default::default()
            })),
            MethodArg::Sift => feature(DetectorKind::Sift(SiftConfig::default())),
            MethodArg::Ecc => AlignmentMethod::Ecc(EccConfig {
                warp_model: match self.warp {
                    WarpArg::Translation => WarpModel::Translation,
                    WarpArg::Euclidean => WarpModel::Euclidean,
                    WarpArg::Affine => WarpModel::Affine,
                    WarpArg::Homography => WarpModel::Homography,
                },
                max_iterations: self.iterations,
                epsilon: self.epsilon,
                gauss_filter_size: self.gauss_size,
                failure_policy: if self.strict {
                    EccFailurePolicy::Fail
                } else {
                    EccFailurePolicy::PassThrough
                },
            }),
        };

        AlignmentConfig {
            enabled: !self.no_align,
            method,
        }
    }
}

#[derive(Args)]
pub struct AlignArgs {
    /// Stack directory containing exposure.info
    pub dir: PathBuf,

    /// Directory for the aligned frames
    #[arg(short, long, default_value = "aligned")]
    pub output: PathBuf,

    #[command(flatten)]
    pub alignment: AlignmentArgs,
}

pub fn run(args: &AlignArgs) -> Result<()> {
    let stack = load_stack(&args.dir)
        .with_context(|| format!("Failed to load stack from {}", args.dir.display()))?;
    let config = args.alignment.to_config();
    let reference = args.alignment.reference.or(stack.reference_index);

    println!(
        "Aligning {} frames with {}",
        stack.images.len(),
        config.method
    );

    let reporter = BarReporter::new()?;
    reporter.begin_stage(PipelineStage::Aligning, Some(stack.images.len()));
    let aligned = align_stack(
        &stack.images,
        reference,
        &config,
        None,
        &CancelToken::new(),
        |done| reporter.advance(done),
    )
    .context("Alignment failed")?;
    reporter.finish_stage();

    reporter.begin_stage(PipelineStage::Writing, Some(1));
    let written = save_aligned(&aligned.images, &stack.paths, &args.output)
        .with_context(|| format!("Failed to write aligned frames to {}", args.output.display()))?;
    reporter.finish_stage();
    reporter.finish();

    print_alignment_report(&aligned.report, &stack.paths);
    println!("\n{} frames saved to {}", written.len(), args.output.display());
    Ok(())
}
