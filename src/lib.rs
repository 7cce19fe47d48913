//! bandalign: Batch Alignment and Export of Multispectral Captures
//!
//! This library registers the single-band images of multi-camera captures
//! onto a common grid, optionally pansharpens them with a panchromatic band,
//! and writes one normalized raster per band. Warp matrices are computed once
//! per camera and reused across runs.

pub mod types;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    AlignedStack, BandError, BandImage, BandResult, BitDepth, CalibrationMode, ErrorKind,
};

pub use io::{Capture, DirectoryCapture, FileWarpMatrixStore, ImageSet, WarpMatrixStore};
pub use crate::core::{
    AlignmentEngine, BatchOrchestrator, BatchReport, CaptureStatus, ProcessingParams, WarpMatrixSet,
};
