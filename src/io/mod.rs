//! I/O modules for reading captures, rasters, and warp matrices

pub mod capture;
pub mod image_set;
pub mod manifest;
pub mod raster;
pub mod warp_store;

pub use capture::Capture;
pub use image_set::{DirectoryCapture, ImageSet};
pub use manifest::CaptureManifest;
pub use warp_store::{FileWarpMatrixStore, WarpMatrixStore};
