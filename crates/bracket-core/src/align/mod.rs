pub mod bitmap;
mod dispatcher;
pub mod ecc;
pub mod feature;
pub mod homography;
pub mod mtb;
pub mod pyramid;
pub mod warp;

pub use dispatcher::{
    align, align_stack, AlignedStack, AlignmentDetail, AlignmentReport, CancelToken, FrameOutcome,
};
pub use warp::{bilinear_sample, translate_image, warp_image};
