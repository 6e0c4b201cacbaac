pub mod align;
pub mod config;
pub mod info;
pub mod run;
