pub mod process;

pub use process::{grayscale, luminance, mtb_luma, to_color};
