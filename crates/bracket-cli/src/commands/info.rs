use std::path::PathBuf;

use anyhow::{Context, Result};
use bracket_core::frame::default_reference_index;
use bracket_core::io::load_stack;
use clap::Args;
use console::Style;

#[derive(Args)]
pub struct InfoArgs {
    /// Stack directory containing exposure.info
    pub dir: PathBuf,
}

pub fn run(args: &InfoArgs) -> Result<()> {
    let stack = load_stack(&args.dir)
        .with_context(|| format!("Failed to load stack from {}", args.dir.display()))?;
    let label = Style::new().dim();
    let value = Style::new().bold();
    let marker = Style::new().green().bold();

    let first = &stack.images[0];
    let reference = stack
        .reference_index
        .unwrap_or_else(|| default_reference_index(stack.images.len()));

    println!("{:<13}{}", label.apply_to("Directory:"), args.dir.display());
    println!("{:<13}{}", label.apply_to("Frames:"), value.apply_to(stack.images.len()));
    println!(
        "{:<13}{}x{}",
        label.apply_to("Dimensions:"),
        first.width(),
        first.height()
    );
    println!(
        "{:<13}{} channel(s), {}-bit",
        label.apply_to("Format:"),
        first.channels(),
        first.bit_depth()
    );
    let source = if stack.reference_index.is_some() {
        "reference.info"
    } else {
        "middle frame"
    };
    println!("{:<13}{} ({source})", label.apply_to("Reference:"), reference);
    println!();

    for (i, (path, exposure)) in stack.paths.iter().zip(&stack.exposures).enumerate() {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tag = if i == reference {
            marker.apply_to("*").to_string()
        } else {
            " ".to_string()
        };
        println!(
            "  {tag} {i:>2}  {name:<24} 1/{:<8.0} {:.6} s",
            1.0 / exposure,
            exposure
        );
    }

    Ok(())
}
