use thiserror::Error;

#[derive(Error, Debug)]
pub enum BracketError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image format error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("Invalid exposure stack: {0}")]
    InvalidStack(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Unsupported luma mode: {0}")]
    UnsupportedLumaMode(String),

    #[error("Unsupported warp model: {0}")]
    UnsupportedWarpModel(String),

    #[error("Image {index} is {got_w}x{got_h}, expected {expected_w}x{expected_h}")]
    DimensionMismatch {
        index: usize,
        expected_w: usize,
        expected_h: usize,
        got_w: usize,
        got_h: usize,
    },

    #[error("Reference index {index} out of range (total: {total})")]
    ReferenceOutOfRange { index: usize, total: usize },

    #[error("Only {found} feature matches, need at least {required}")]
    InsufficientCorrespondence { found: usize, required: usize },

    #[error("Geometry estimation failed: {0}")]
    GeometryEstimation(String),

    #[error("Alignment of image {index} failed: {reason}")]
    AlignmentFailure { index: usize, reason: String },

    #[error("Merge error: {0}")]
    Merge(String),

    #[error("Empty image sequence")]
    EmptySequence,

    #[error("Operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, BracketError>;
