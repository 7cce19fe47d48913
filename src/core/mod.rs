//! Core alignment, pansharpening, and export modules

pub mod align;
pub mod batch;
pub mod export;
pub mod normalize;
pub mod pansharpen;
pub mod registration;
pub mod transform;

// Re-export main types
pub use align::{Alignment, AlignmentEngine, AlignmentParams};
pub use batch::{BatchOrchestrator, BatchReport, CaptureOutcome, CaptureStatus, ProcessingParams};
pub use export::{BandExporter, ExportParams};
pub use normalize::{BandNormalizer, NormalizeParams};
pub use pansharpen::PanSharpener;
pub use registration::{MotionModel, Registration, RegistrationParams};
pub use transform::{ProjectiveTransform, ReferenceFrame, WarpMatrixSet};
