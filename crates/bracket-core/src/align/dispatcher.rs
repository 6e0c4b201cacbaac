use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use nalgebra::Matrix3;
use ndarray::Array2;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::consts::PARALLEL_FRAME_THRESHOLD;
use crate::error::{BracketError, Result};
use crate::frame::{check_dimensions, default_reference_index, Image, PixelOffset};
use crate::pipeline::config::{AlignmentConfig, AlignmentMethod};

use super::ecc::{align_ecc, EccOutcome, EccReference};
use super::feature::{align_feature, FeatureOutcome, FeatureReference};
use super::mtb::{align_mtb, MtbReference};

/// Cooperative cancellation flag, checked before each frame is aligned.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// The transform that was applied to an aligned frame.
#[derive(Clone, Debug, PartialEq)]
pub enum AlignmentDetail {
    Translation { offset: PixelOffset, disagreement: u64 },
    Homography { matrix: Matrix3<f64>, matches: usize, inliers: usize },
    Ecc { matrix: Matrix3<f64>, rho: f64, iterations: usize },
}

#[derive(Clone, Debug, PartialEq)]
pub enum FrameOutcome {
    Reference,
    Aligned(AlignmentDetail),
    PassedThrough { reason: String },
}

/// Per-frame outcomes of one `align_stack` call, in input order.
#[derive(Clone, Debug)]
pub struct AlignmentReport {
    pub method: String,
    pub reference_index: usize,
    pub outcomes: Vec<FrameOutcome>,
}

impl AlignmentReport {
    pub fn passed_through(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, FrameOutcome::PassedThrough { .. }))
            .count()
    }
}

#[derive(Clone, Debug)]
pub struct AlignedStack {
    pub images: Vec<Image>,
    pub report: AlignmentReport,
}

/// Reference-side state computed once per call and shared by every frame.
enum ReferenceState {
    Mtb(MtbReference),
    Feature(FeatureReference),
    Ecc(EccReference),
}

impl ReferenceState {
    fn new(
        reference: &Image,
        method: &AlignmentMethod,
        mask: Option<&Array2<bool>>,
    ) -> Result<Self> {
        Ok(match method {
            AlignmentMethod::PyramidMtb(c) => Self::Mtb(MtbReference::new(reference, c)),
            AlignmentMethod::Feature(c) => Self::Feature(FeatureReference::new(reference, c)),
            AlignmentMethod::Ecc(c) => Self::Ecc(EccReference::new(reference, mask, c)?),
        })
    }
}

/// Align one non-reference frame with the configured method.
fn align_one(
    index: usize,
    image: &Image,
    state: &ReferenceState,
    method: &AlignmentMethod,
) -> Result<(Image, FrameOutcome)> {
    match (state, method) {
        (ReferenceState::Mtb(reference), AlignmentMethod::PyramidMtb(c)) => {
            let (aligned, found) = align_mtb(reference, image, c);
            debug!(
                index,
                dx = found.offset.dx,
                dy = found.offset.dy,
                disagreement = found.disagreement,
                "MTB offset"
            );
            Ok((
                aligned,
                FrameOutcome::Aligned(AlignmentDetail::Translation {
                    offset: found.offset,
                    disagreement: found.disagreement,
                }),
            ))
        }
        (ReferenceState::Feature(reference), AlignmentMethod::Feature(c)) => {
            let (aligned, outcome) = align_feature(reference, image, c);
            let outcome = match outcome {
                FeatureOutcome::Warped {
                    homography,
                    matches,
                    inliers,
                } => {
                    debug!(index, matches, inliers, "Homography estimated");
                    FrameOutcome::Aligned(AlignmentDetail::Homography {
                        matrix: homography,
                        matches,
                        inliers,
                    })
                }
                FeatureOutcome::PassedThrough(reason) => FrameOutcome::PassedThrough { reason },
            };
            Ok((aligned, outcome))
        }
        (ReferenceState::Ecc(reference), AlignmentMethod::Ecc(c)) => {
            let (aligned, outcome) = align_ecc(reference, image, c).map_err(|e| {
                BracketError::AlignmentFailure {
                    index,
                    reason: e.to_string(),
                }
            })?;
            let outcome = match outcome {
                EccOutcome::Warped(warp) => FrameOutcome::Aligned(AlignmentDetail::Ecc {
                    matrix: warp.matrix,
                    rho: warp.rho,
                    iterations: warp.iterations,
                }),
                EccOutcome::PassedThrough(reason) => FrameOutcome::PassedThrough { reason },
            };
            Ok((aligned, outcome))
        }
        _ => Err(BracketError::Configuration(
            "reference state does not match the alignment method".into(),
        )),
    }
}

/// Align every image of a stack to the reference with the configured method.
///
/// `reference_index` defaults to the middle image. Configuration, dimensions
/// and the reference index are checked before any per-image work. The
/// reference comes back untouched and the output keeps input order.
/// `on_frame_done` receives the running count of finished frames.
pub fn align_stack<F>(
    images: &[Image],
    reference_index: Option<usize>,
    config: &AlignmentConfig,
    mask: Option<&Array2<bool>>,
    cancel: &CancelToken,
    on_frame_done: F,
) -> Result<AlignedStack>
where
    F: Fn(usize) + Send + Sync,
{
    if images.is_empty() {
        return Err(BracketError::EmptySequence);
    }
    config.validate()?;
    check_dimensions(images)?;

    let reference_idx = reference_index.unwrap_or_else(|| default_reference_index(images.len()));
    if reference_idx >= images.len() {
        return Err(BracketError::ReferenceOutOfRange {
            index: reference_idx,
            total: images.len(),
        });
    }

    if !config.enabled {
        let outcomes = (0..images.len())
            .map(|i| {
                if i == reference_idx {
                    FrameOutcome::Reference
                } else {
                    FrameOutcome::PassedThrough {
                        reason: "alignment disabled".into(),
                    }
                }
            })
            .collect();
        return Ok(AlignedStack {
            images: images.to_vec(),
            report: AlignmentReport {
                method: "None".into(),
                reference_index: reference_idx,
                outcomes,
            },
        });
    }

    info!(
        method = %config.method,
        frames = images.len(),
        reference = reference_idx,
        "Aligning exposure stack"
    );

    let state = ReferenceState::new(&images[reference_idx], &config.method, mask)?;
    let counter = AtomicUsize::new(0);

    let process = |(i, image): (usize, &Image)| -> Result<(Image, FrameOutcome)> {
        if cancel.is_cancelled() {
            return Err(BracketError::Cancelled);
        }
        let result = if i == reference_idx {
            (image.clone(), FrameOutcome::Reference)
        } else {
            align_one(i, image, &state, &config.method)?
        };
        let done = counter.fetch_add(1, Ordering::Relaxed) + 1;
        on_frame_done(done);
        Ok(result)
    };

    let results: Vec<Result<(Image, FrameOutcome)>> = if images.len() >= PARALLEL_FRAME_THRESHOLD {
        images.par_iter().enumerate().map(process).collect()
    } else {
        // Sequential: stop at the first error, including cancellation.
        let mut out = Vec::with_capacity(images.len());
        for item in images.iter().enumerate() {
            let r = process(item);
            let failed = r.is_err();
            out.push(r);
            if failed {
                break;
            }
        }
        out
    };

    let (aligned, outcomes): (Vec<Image>, Vec<FrameOutcome>) =
        results.into_iter().collect::<Result<Vec<_>>>()?.into_iter().unzip();

    let report = AlignmentReport {
        method: config.method.to_string(),
        reference_index: reference_idx,
        outcomes,
    };
    if report.passed_through() > 0 {
        info!(
            passed_through = report.passed_through(),
            "Some frames were left unaligned"
        );
    }

    Ok(AlignedStack {
        images: aligned,
        report,
    })
}

/// Align a stack and return only the images.
pub fn align(
    images: &[Image],
    reference_index: Option<usize>,
    config: &AlignmentConfig,
) -> Result<Vec<Image>> {
    align_stack(
        images,
        reference_index,
        config,
        None,
        &CancelToken::new(),
        |_| {},
    )
    .map(|stack| stack.images)
}
