pub mod image_io;
pub mod stack;

pub use image_io::{load_hdr, load_image, save_color_image, save_hdr, save_image};
pub use stack::{
    load_stack, parse_exposure_info, parse_exposure_value, read_exif_exposures, ExposureEntry,
    LoadedStack,
};
