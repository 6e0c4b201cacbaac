use std::path::PathBuf;

use bracket_core::align::{AlignmentDetail, AlignmentReport, FrameOutcome};
use bracket_core::pipeline::config::PipelineConfig;
use console::Style;

struct Styles {
    title: Style,
    header: Style,
    label: Style,
    value: Style,
    method: Style,
    disabled: Style,
    path: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            header: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            method: Style::new().green(),
            disabled: Style::new().dim().yellow(),
            path: Style::new().underlined(),
        }
    }
}

pub fn print_pipeline_summary(config: &PipelineConfig) {
    let s = Styles::new();

    println!();
    println!("  {}", s.title.apply_to("Bracket HDR"));
    println!("  {}", s.title.apply_to("\u{2550}".repeat(11)));
    println!();

    println!(
        "  {:<14}{}",
        s.label.apply_to("Input"),
        s.path.apply_to(config.input.display())
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Radiance"),
        s.path.apply_to(config.output.display())
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Tonemapped"),
        s.path.apply_to(config.resolved_ldr_output().display())
    );
    println!();

    println!("  {}", s.header.apply_to("Alignment"));
    if config.alignment.enabled {
        println!(
            "    {:<12}{}",
            s.label.apply_to("Method"),
            s.method.apply_to(&config.alignment.method)
        );
    } else {
        println!(
            "    {:<12}{}",
            s.label.apply_to("Method"),
            s.disabled.apply_to("disabled")
        );
    }
    match config.reference {
        Some(r) => println!("    {:<12}{}", s.label.apply_to("Reference"), s.value.apply_to(r)),
        None => println!(
            "    {:<12}{}",
            s.label.apply_to("Reference"),
            s.disabled.apply_to("auto")
        ),
    }
    println!();

    println!("  {}", s.header.apply_to("Merge"));
    println!(
        "    {:<12}{}",
        s.label.apply_to("Method"),
        s.method.apply_to(&config.merge.method)
    );
    println!();

    println!("  {}", s.header.apply_to("Tonemap"));
    println!(
        "    {:<12}{}",
        s.label.apply_to("Operator"),
        s.method.apply_to(&config.tonemap.method)
    );
    println!();
}

fn describe(detail: &AlignmentDetail) -> String {
    match detail {
        AlignmentDetail::Translation {
            offset,
            disagreement,
        } => format!(
            "shift ({}, {}), {} disagreeing px",
            offset.dx, offset.dy, disagreement
        ),
        AlignmentDetail::Homography {
            matches, inliers, ..
        } => format!("homography, {inliers}/{matches} inliers"),
        AlignmentDetail::Ecc {
            matrix,
            rho,
            iterations,
        } => format!(
            "shift ({:.2}, {:.2}), rho {:.4} after {} iterations",
            matrix[(0, 2)],
            matrix[(1, 2)],
            rho,
            iterations
        ),
    }
}

/// Per-frame outcome table. `paths` may be empty, in which case frames are
/// listed by index only.
pub fn print_alignment_report(report: &AlignmentReport, paths: &[PathBuf]) {
    let s = Styles::new();

    println!();
    println!(
        "  {} {}",
        s.header.apply_to("Alignment"),
        s.label.apply_to(&report.method)
    );
    for (i, outcome) in report.outcomes.iter().enumerate() {
        let name = paths
            .get(i)
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let text = match outcome {
            FrameOutcome::Reference => s.method.apply_to("reference".to_string()),
            FrameOutcome::Aligned(detail) => s.value.apply_to(describe(detail)),
            FrameOutcome::PassedThrough { reason } => {
                s.disabled.apply_to(format!("passed through: {reason}"))
            }
        };
        println!("    {:>2}  {:<24}{}", i, name, text);
    }
}
