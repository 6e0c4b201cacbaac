use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::consts::{
    DEFAULT_ECC_EPSILON, DEFAULT_ECC_GAUSS_SIZE, DEFAULT_ECC_ITERATIONS,
    DEFAULT_EXCLUSION_TOLERANCE, DEFAULT_MATCH_PERCENT, DEFAULT_MIN_MATCHES,
    DEFAULT_ORB_FEATURES, DEFAULT_RANSAC_ITERATIONS, DEFAULT_RANSAC_SEED,
    DEFAULT_RANSAC_THRESHOLD,
};
use crate::error::{BracketError, Result};
use crate::hdr::debevec::DebevecParams;
use crate::hdr::mertens::MertensParams;
use crate::hdr::robertson::RobertsonParams;
use crate::hdr::tonemap::{DragoParams, ReinhardParams};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Directory holding the exposure stack and its `exposure.info`.
    pub input: PathBuf,
    /// Radiance output (`.hdr`).
    pub output: PathBuf,
    /// Tonemapped 8-bit output. Defaults to `<output stem>-ldr.jpg`.
    #[serde(default)]
    pub ldr_output: Option<PathBuf>,
    /// Overrides `reference.info` and the middle-frame default.
    #[serde(default)]
    pub reference: Option<usize>,
    #[serde(default)]
    pub alignment: AlignmentConfig,
    #[serde(default)]
    pub merge: MergeConfig,
    #[serde(default)]
    pub tonemap: TonemapConfig,
    /// Write the aligned frames into this directory.
    #[serde(default)]
    pub save_aligned: Option<PathBuf>,
}

impl PipelineConfig {
    /// Where the tonemapped image goes when `ldr_output` is not set.
    pub fn resolved_ldr_output(&self) -> PathBuf {
        if let Some(ref p) = self.ldr_output {
            return p.clone();
        }
        let stem = self
            .output
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "result".into());
        self.output.with_file_name(format!("{stem}-ldr.jpg"))
    }
}

// ---------------------------------------------------------------------------
// Alignment
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AlignmentConfig {
    /// When false the stack is merged as loaded.
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    #[serde(default)]
    pub method: AlignmentMethod,
}

fn enabled_default() -> bool {
    true
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            method: AlignmentMethod::default(),
        }
    }
}

impl AlignmentConfig {
    pub fn new(method: AlignmentMethod) -> Self {
        Self {
            enabled: true,
            method,
        }
    }

    /// Reject parameter combinations no aligner can run with.
    pub fn validate(&self) -> Result<()> {
        self.method.validate()
    }
}

/// The alignment strategy and its parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum AlignmentMethod {
    /// Coarse-to-fine median threshold bitmap translation search.
    PyramidMtb(MtbConfig),
    /// Keypoint matching followed by a RANSAC homography.
    Feature(FeatureConfig),
    /// Enhanced correlation coefficient maximization.
    Ecc(EccConfig),
}

impl Default for AlignmentMethod {
    fn default() -> Self {
        Self::PyramidMtb(MtbConfig::default())
    }
}

impl std::fmt::Display for AlignmentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PyramidMtb(c) => write!(
                f,
                "Pyramid MTB ({}, tolerance {})",
                c.luma, c.exclusion_tolerance
            ),
            Self::Feature(c) => {
                write!(f, "Feature ({}, min {} matches)", c.detector, c.min_matches)
            }
            Self::Ecc(c) => write!(f, "ECC ({})", c.warp_model),
        }
    }
}

impl AlignmentMethod {
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::PyramidMtb(c) => {
                if !(c.exclusion_tolerance >= 0.0) {
                    return Err(BracketError::Configuration(format!(
                        "exclusion tolerance must be non-negative, got {}",
                        c.exclusion_tolerance
                    )));
                }
            }
            Self::Feature(c) => {
                if c.min_matches < 4 {
                    return Err(BracketError::Configuration(format!(
                        "a homography needs at least 4 matches, min_matches is {}",
                        c.min_matches
                    )));
                }
                if !(c.match_percent > 0.0 && c.match_percent <= 1.0) {
                    return Err(BracketError::Configuration(format!(
                        "match_percent must be in (0, 1], got {}",
                        c.match_percent
                    )));
                }
                if c.ransac.max_iterations == 0 || !(c.ransac.threshold > 0.0) {
                    return Err(BracketError::Configuration(
                        "RANSAC needs a positive threshold and at least one iteration".into(),
                    ));
                }
                match &c.detector {
                    DetectorKind::Orb(o) => {
                        if o.n_levels == 0 || !(o.scale_factor > 1.0) || o.n_features == 0 {
                            return Err(BracketError::Configuration(
                                "ORB needs n_features > 0, n_levels > 0 and scale_factor > 1".into(),
                            ));
                        }
                    }
                    DetectorKind::Sift(s) => {
                        if s.n_octaves == 0 || s.n_layers == 0 || !(s.sigma > 0.0) {
                            return Err(BracketError::Configuration(
                                "SIFT needs n_octaves > 0, n_layers > 0 and sigma > 0".into(),
                            ));
                        }
                    }
                }
            }
            Self::Ecc(c) => {
                if c.max_iterations == 0 {
                    return Err(BracketError::Configuration(
                        "ECC max_iterations must be at least 1".into(),
                    ));
                }
                if !(c.epsilon >= 0.0) {
                    return Err(BracketError::Configuration(format!(
                        "ECC epsilon must be non-negative, got {}",
                        c.epsilon
                    )));
                }
                if c.gauss_filter_size > 1 && c.gauss_filter_size % 2 == 0 {
                    return Err(BracketError::Configuration(format!(
                        "ECC Gaussian kernel size must be odd, got {}",
                        c.gauss_filter_size
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Grey-level approximation used to build median threshold bitmaps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LumaMode {
    /// Green channel only.
    #[default]
    Green,
    /// `(19R + 183G + 54B) / 256`.
    Weighted,
}

impl std::fmt::Display for LumaMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Green => write!(f, "Green"),
            Self::Weighted => write!(f, "Weighted RGB"),
        }
    }
}

impl FromStr for LumaMode {
    type Err = BracketError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "g" | "green" => Ok(Self::Green),
            "rgb" | "weighted" => Ok(Self::Weighted),
            other => Err(BracketError::UnsupportedLumaMode(other.to_string())),
        }
    }
}

/// Per-level neighbourhood searched around the offset carried from the coarser level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchWindow {
    /// Deltas in {-1, 0, 1} on both axes.
    #[default]
    Symmetric,
    /// Deltas in {-1, 0} only. Reproduces older numeric output; cannot climb in +x/+y.
    Asymmetric,
}

impl SearchWindow {
    /// Deltas in scan order. Earlier entries win ties.
    pub fn deltas(self) -> &'static [i32] {
        match self {
            Self::Symmetric => &[0, -1, 1],
            Self::Asymmetric => &[-1, 0],
        }
    }
}

impl std::fmt::Display for SearchWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Symmetric => write!(f, "Symmetric"),
            Self::Asymmetric => write!(f, "Asymmetric"),
        }
    }
}

/// Which exclusion bitmaps gate the disagreement count.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExclusionMasking {
    /// Reference and (translated) candidate masks, as in Ward 2003.
    #[default]
    Both,
    /// Candidate mask only, untranslated.
    CandidateOnly,
}

impl std::fmt::Display for ExclusionMasking {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Both => write!(f, "Both"),
            Self::CandidateOnly => write!(f, "Candidate Only"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MtbConfig {
    #[serde(default)]
    pub luma: LumaMode,
    /// Pixels within this distance of the median (8-bit units) are ignored.
    #[serde(default = "exclusion_tolerance_default")]
    pub exclusion_tolerance: f32,
    #[serde(default)]
    pub search_window: SearchWindow,
    #[serde(default)]
    pub masking: ExclusionMasking,
}

fn exclusion_tolerance_default() -> f32 {
    DEFAULT_EXCLUSION_TOLERANCE
}

impl Default for MtbConfig {
    fn default() -> Self {
        Self {
            luma: LumaMode::default(),
            exclusion_tolerance: DEFAULT_EXCLUSION_TOLERANCE,
            search_window: SearchWindow::default(),
            masking: ExclusionMasking::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrbConfig {
    /// Maximum number of keypoints kept, strongest Harris response first.
    pub n_features: usize,
    /// Downscale ratio between pyramid levels.
    pub scale_factor: f32,
    pub n_levels: usize,
    /// FAST intensity threshold (8-bit units).
    pub fast_threshold: u8,
    /// Side of the square patch used for orientation and BRIEF sampling.
    pub patch_size: usize,
}

impl Default for OrbConfig {
    fn default() -> Self {
        Self {
            n_features: DEFAULT_ORB_FEATURES,
            scale_factor: 1.2,
            n_levels: 8,
            fast_threshold: 20,
            patch_size: 31,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SiftConfig {
    /// 0 keeps every keypoint.
    pub max_features: usize,
    pub n_octaves: usize,
    /// Scales sampled per octave.
    pub n_layers: usize,
    pub sigma: f32,
    pub contrast_threshold: f32,
    pub edge_threshold: f32,
}

impl Default for SiftConfig {
    fn default() -> Self {
        Self {
            max_features: 0,
            n_octaves: 4,
            n_layers: 3,
            sigma: 1.6,
            contrast_threshold: 0.04,
            edge_threshold: 10.0,
        }
    }
}

/// Keypoint detector and descriptor family.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum DetectorKind {
    Orb(OrbConfig),
    Sift(SiftConfig),
}

impl Default for DetectorKind {
    fn default() -> Self {
        Self::Orb(OrbConfig::default())
    }
}

impl std::fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Orb(c) => write!(f, "ORB, {} features", c.n_features),
            Self::Sift(_) => write!(f, "SIFT"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RansacConfig {
    /// Maximum reprojection error (pixels) for a match to count as an inlier.
    pub threshold: f64,
    pub max_iterations: usize,
    /// Stop early once the inlier ratio implies this confidence.
    pub confidence: f64,
    pub seed: u64,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_RANSAC_THRESHOLD,
            max_iterations: DEFAULT_RANSAC_ITERATIONS,
            confidence: 0.995,
            seed: DEFAULT_RANSAC_SEED,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeatureConfig {
    #[serde(default)]
    pub detector: DetectorKind,
    /// Below this many matches the image is passed through unaligned.
    #[serde(default = "min_matches_default")]
    pub min_matches: usize,
    /// Fraction of the distance-sorted matches used for estimation.
    #[serde(default = "match_percent_default")]
    pub match_percent: f32,
    #[serde(default)]
    pub ransac: RansacConfig,
}

fn min_matches_default() -> usize {
    DEFAULT_MIN_MATCHES
}

fn match_percent_default() -> f32 {
    DEFAULT_MATCH_PERCENT
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            detector: DetectorKind::default(),
            min_matches: DEFAULT_MIN_MATCHES,
            match_percent: DEFAULT_MATCH_PERCENT,
            ransac: RansacConfig::default(),
        }
    }
}

/// Parametric motion model fitted by ECC.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarpModel {
    #[default]
    Translation,
    /// Rotation plus translation.
    Euclidean,
    Affine,
    Homography,
}

impl WarpModel {
    /// Number of free warp parameters.
    pub fn parameter_count(self) -> usize {
        match self {
            Self::Translation => 2,
            Self::Euclidean => 3,
            Self::Affine => 6,
            Self::Homography => 8,
        }
    }
}

impl std::fmt::Display for WarpModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Translation => write!(f, "Translation"),
            Self::Euclidean => write!(f, "Euclidean"),
            Self::Affine => write!(f, "Affine"),
            Self::Homography => write!(f, "Homography"),
        }
    }
}

impl FromStr for WarpModel {
    type Err = BracketError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "translation" => Ok(Self::Translation),
            "euclidean" => Ok(Self::Euclidean),
            "affine" => Ok(Self::Affine),
            "homography" => Ok(Self::Homography),
            other => Err(BracketError::UnsupportedWarpModel(other.to_string())),
        }
    }
}

/// What to do with a frame whose ECC optimization fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EccFailurePolicy {
    /// Keep the frame unaligned and log a warning.
    #[default]
    PassThrough,
    /// Abort the whole call with `AlignmentFailure`.
    Fail,
}

impl std::fmt::Display for EccFailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PassThrough => write!(f, "Pass Through"),
            Self::Fail => write!(f, "Fail"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EccConfig {
    #[serde(default)]
    pub warp_model: WarpModel,
    #[serde(default = "ecc_iterations_default")]
    pub max_iterations: usize,
    /// Stop once the correlation improves by less than this.
    #[serde(default = "ecc_epsilon_default")]
    pub epsilon: f64,
    /// Odd Gaussian kernel size for pre-smoothing; 0 or 1 disables it.
    #[serde(default = "ecc_gauss_default")]
    pub gauss_filter_size: usize,
    #[serde(default)]
    pub failure_policy: EccFailurePolicy,
}

fn ecc_iterations_default() -> usize {
    DEFAULT_ECC_ITERATIONS
}

fn ecc_epsilon_default() -> f64 {
    DEFAULT_ECC_EPSILON
}

fn ecc_gauss_default() -> usize {
    DEFAULT_ECC_GAUSS_SIZE
}

impl Default for EccConfig {
    fn default() -> Self {
        Self {
            warp_model: WarpModel::default(),
            max_iterations: DEFAULT_ECC_ITERATIONS,
            epsilon: DEFAULT_ECC_EPSILON,
            gauss_filter_size: DEFAULT_ECC_GAUSS_SIZE,
            failure_policy: EccFailurePolicy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Merge and tonemap
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MergeConfig {
    pub method: MergeMethod,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum MergeMethod {
    /// Response curve recovery plus weighted log-radiance merge.
    Debevec(DebevecParams),
    /// Iterative response recovery plus weighted least-squares radiance merge.
    Robertson(RobertsonParams),
    /// Exposure fusion; ignores exposure times and yields a display-referred image.
    Mertens(MertensParams),
}

impl Default for MergeMethod {
    fn default() -> Self {
        Self::Debevec(DebevecParams::default())
    }
}

impl std::fmt::Display for MergeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debevec(p) => write!(f, "Debevec ({} samples)", p.samples),
            Self::Robertson(p) => write!(f, "Robertson ({} iterations)", p.max_iterations),
            Self::Mertens(_) => write!(f, "Mertens"),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TonemapConfig {
    pub method: TonemapMethod,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum TonemapMethod {
    Reinhard(ReinhardParams),
    Drago(DragoParams),
}

impl Default for TonemapMethod {
    fn default() -> Self {
        Self::Reinhard(ReinhardParams::default())
    }
}

impl std::fmt::Display for TonemapMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reinhard(p) => write!(f, "Reinhard (gamma {})", p.gamma),
            Self::Drago(p) => write!(f, "Drago (gamma {}, bias {})", p.gamma, p.bias),
        }
    }
}
