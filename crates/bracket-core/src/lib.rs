pub mod consts;
pub mod error;
pub mod frame;
pub mod color;
pub mod filters;
pub mod io;
pub mod align;
pub mod hdr;
pub mod pipeline;
