use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use bracket_core::align::CancelToken;
use bracket_core::hdr::{
    DebevecParams, DragoParams, MertensParams, ReinhardParams, RobertsonParams,
};
use bracket_core::pipeline::config::{
    MergeConfig, MergeMethod, PipelineConfig, TonemapConfig, TonemapMethod,
};
use bracket_core::pipeline::run_pipeline_reported;
use clap::{Args, ValueEnum};
use tracing::debug;

use super::align::AlignmentArgs;
use crate::progress::BarReporter;
use crate::summary::{print_alignment_report, print_pipeline_summary};

#[derive(Clone, Copy, ValueEnum)]
pub enum MergeArg {
    Debevec,
    Robertson,
    Mertens,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum TonemapArg {
    Reinhard,
    Drago,
}

#[derive(Args)]
pub struct RunArgs {
    /// Stack directory containing exposure.info
    pub dir: PathBuf,

    /// Pipeline config file (TOML); the stack directory argument still wins
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Radiance output (.hdr)
    #[arg(short, long, default_value = "result.hdr")]
    pub output: PathBuf,

    /// Tonemapped output; defaults to <output stem>-ldr.jpg
    #[arg(long)]
    pub ldr: Option<PathBuf>,

    /// Radiance merge
    #[arg(long, value_enum, default_value = "debevec")]
    pub merge: MergeArg,

    /// Tonemap operator
    #[arg(long, value_enum, default_value = "reinhard")]
    pub tonemap: TonemapArg,

    /// Tonemap gamma; defaults to the operator's own default
    #[arg(long)]
    pub gamma: Option<f32>,

    /// Also write the aligned frames into this directory
    #[arg(long)]
    pub save_aligned: Option<PathBuf>,

    #[command(flatten)]
    pub alignment: AlignmentArgs,
}

pub fn run(args: &RunArgs) -> Result<()> {
    let config = if let Some(ref config_path) = args.config {
        let contents = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config {}", config_path.display()))?;
        let mut config: PipelineConfig =
            toml::from_str(&contents).context("Invalid pipeline config")?;
        config.input = args.dir.clone();
        config
    } else {
        build_config_from_args(args)
    };
    config.alignment.validate().context("Invalid alignment settings")?;
    debug!(?config, "Resolved pipeline config");

    print_pipeline_summary(&config);

    let reporter = Arc::new(BarReporter::new()?);
    let output = run_pipeline_reported(&config, reporter.clone(), &CancelToken::new())
        .context("Pipeline failed")?;
    reporter.finish();

    print_alignment_report(&output.report, &[]);
    println!("\nRadiance saved to {}", config.output.display());
    println!("Tonemapped image saved to {}", config.resolved_ldr_output().display());
    if let Some(ref dir) = config.save_aligned {
        println!("Aligned frames saved to {}", dir.display());
    }
    Ok(())
}

fn build_config_from_args(args: &RunArgs) -> PipelineConfig {
    let merge = match args.merge {
        MergeArg::Debevec => MergeMethod::Debevec(DebevecParams::default()),
        MergeArg::Robertson => MergeMethod::Robertson(RobertsonParams::default()),
        MergeArg::Mertens => MergeMethod::Mertens(MertensParams::default()),
    };

    let tonemap = match args.tonemap {
        TonemapArg::Reinhard => {
            let mut p = ReinhardParams::default();
            if let Some(g) = args.gamma {
                p.gamma = g;
            }
            TonemapMethod::Reinhard(p)
        }
        TonemapArg::Drago => {
            let mut p = DragoParams::default();
            if let Some(g) = args.gamma {
                p.gamma = g;
            }
            TonemapMethod::Drago(p)
        }
    };

    PipelineConfig {
        input: args.dir.clone(),
        output: args.output.clone(),
        ldr_output: args.ldr.clone(),
        reference: args.alignment.reference,
        alignment: args.alignment.to_config(),
        merge: MergeConfig { method: merge },
        tonemap: TonemapConfig { method: tonemap },
        save_aligned: args.save_aligned.clone(),
    }
}
