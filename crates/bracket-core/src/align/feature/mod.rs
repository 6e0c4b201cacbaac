//! Feature-correspondence alignment.
//!
//! Keypoints and descriptors are detected in the grayscale reference and in
//! each candidate, matched by nearest neighbour, filtered to the best
//! fraction, and fed to a RANSAC homography estimate. The candidate is then
//! warped into the reference frame. Too few matches or a failed estimate
//! leave the candidate untouched.

pub mod matcher;
pub mod orb;
pub mod sift;

use nalgebra::Matrix3;
use ndarray::Array2;
use tracing::{debug, warn};

use crate::color::grayscale;
use crate::error::{BracketError, Result};
use crate::frame::Image;
use crate::pipeline::config::{DetectorKind, FeatureConfig};

use super::homography::{estimate_homography, HomographyEstimate};
use super::warp::warp_image;

pub use matcher::{match_descriptors, FeatureMatch};
pub use orb::Orb;
pub use sift::Sift;

/// A detected interest point in full-resolution pixel coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    /// Dominant orientation in radians.
    pub angle: f32,
    /// Detector response; larger is stronger.
    pub response: f32,
    /// Diameter of the described neighbourhood.
    pub size: f32,
    pub octave: usize,
}

/// Descriptor storage, one row per keypoint.
#[derive(Clone, Debug, PartialEq)]
pub enum Descriptors {
    /// 256-bit binary descriptors compared with Hamming distance.
    Binary(Vec<[u8; 32]>),
    /// Real-valued descriptors compared with Euclidean distance.
    Float(Vec<Vec<f32>>),
}

impl Descriptors {
    pub fn len(&self) -> usize {
        match self {
            Self::Binary(d) => d.len(),
            Self::Float(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Keypoints with their descriptors, index-aligned.
#[derive(Clone, Debug, PartialEq)]
pub struct Features {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Descriptors,
}

impl Features {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

/// A keypoint detector that also describes what it finds.
pub trait FeatureDetector: Send + Sync {
    /// Detect and describe features in a grayscale image with values in [0, 1].
    fn detect_and_compute(&self, image: &Array2<f32>) -> Features;

    fn name(&self) -> &'static str;
}

/// Construct the detector selected by the configuration.
pub fn detector_for(kind: &DetectorKind, seed: u64) -> Box<dyn FeatureDetector> {
    match kind {
        DetectorKind::Orb(config) => Box::new(Orb::new(config.clone(), seed)),
        DetectorKind::Sift(config) => Box::new(Sift::new(config.clone())),
    }
}

/// What happened to one candidate frame.
#[derive(Clone, Debug, PartialEq)]
pub enum FeatureOutcome {
    Warped {
        homography: Matrix3<f64>,
        matches: usize,
        inliers: usize,
    },
    PassedThrough(String),
}

/// Reference-side state shared read-only by every candidate.
pub struct FeatureReference {
    detector: Box<dyn FeatureDetector>,
    features: Features,
    dim: (usize, usize),
}

impl FeatureReference {
    pub fn new(reference: &Image, config: &FeatureConfig) -> Self {
        let detector = detector_for(&config.detector, config.ransac.seed);
        let features = detector.detect_and_compute(&grayscale(reference));
        debug!(
            detector = detector.name(),
            keypoints = features.len(),
            "Reference features"
        );
        Self {
            detector,
            features,
            dim: (reference.height(), reference.width()),
        }
    }

    pub fn features(&self) -> &Features {
        &self.features
    }
}

/// Estimate the candidate -> reference homography.
///
/// Fails with `InsufficientCorrespondence` when fewer than `min_matches`
/// matches exist, or `GeometryEstimation` when RANSAC finds no usable model.
pub fn estimate_feature_homography(
    reference: &FeatureReference,
    target: &Image,
    config: &FeatureConfig,
) -> Result<(HomographyEstimate, usize)> {
    let features = reference.detector.detect_and_compute(&grayscale(target));
    let matches = match_descriptors(&features.descriptors, &reference.features.descriptors);

    if matches.len() < config.min_matches {
        return Err(BracketError::InsufficientCorrespondence {
            found: matches.len(),
            required: config.min_matches,
        });
    }

    let keep = ((matches.len() as f32 * config.match_percent) as usize)
        .max(config.min_matches)
        .min(matches.len());

    let (src, dst): (Vec<(f64, f64)>, Vec<(f64, f64)>) = matches[..keep]
        .iter()
        .map(|m| {
            let q = &features.keypoints[m.query_idx];
            let t = &reference.features.keypoints[m.train_idx];
            ((q.x as f64, q.y as f64), (t.x as f64, t.y as f64))
        })
        .unzip();

    let estimate = estimate_homography(&src, &dst, &config.ransac)?;
    Ok((estimate, keep))
}

/// Align one frame to the reference, passing it through when estimation fails.
pub fn align_feature(
    reference: &FeatureReference,
    target: &Image,
    config: &FeatureConfig,
) -> (Image, FeatureOutcome) {
    match estimate_feature_homography(reference, target, config) {
        Ok((estimate, matches)) => {
            // The warp samples the candidate at H^-1 applied to reference pixels.
            match estimate.matrix.try_inverse() {
                Some(inverse) => (
                    warp_image(target, &inverse, reference.dim),
                    FeatureOutcome::Warped {
                        homography: estimate.matrix,
                        matches,
                        inliers: estimate.num_inliers,
                    },
                ),
                None => pass_through(target, "homography is not invertible".into()),
            }
        }
        Err(e) => pass_through(target, e.to_string()),
    }
}

fn pass_through(target: &Image, reason: String) -> (Image, FeatureOutcome) {
    warn!(%reason, "Feature alignment skipped, frame passed through");
    (target.clone(), FeatureOutcome::PassedThrough(reason))
}
