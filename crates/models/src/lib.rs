pub mod build;
pub mod config;
pub mod error;
pub mod image;
pub mod launch;
pub mod manifest;

pub use build::*;
pub use config::*;
pub use error::*;
pub use image::*;
pub use launch::*;
pub use manifest::*;
