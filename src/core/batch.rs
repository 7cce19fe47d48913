//! Batch processing of a whole image set.
//!
//! Captures are handled one after another. Each one ends up skipped,
//! processed, or failed; a failure never stops the run. Warp matrices are
//! resolved once per run and passed to every alignment.

use crate::core::align::{AlignmentEngine, AlignmentParams};
use crate::core::export::{BandExporter, ExportParams};
use crate::core::normalize::NormalizeParams;
use crate::core::transform::{ReferenceFrame, WarpMatrixSet};
use crate::io::capture::Capture;
use crate::io::warp_store::{FileWarpMatrixStore, WarpMatrixStore};
use crate::types::{is_file_name_component, is_panchromatic_model, BandError, BandResult, BitDepth, CalibrationMode, ErrorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Run-level processing options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingParams {
    /// Reprocess captures whose output directory already has files
    pub overwrite: bool,
    pub generate_thumbnails: bool,
    /// Use the panchromatic band on cameras that have one
    pub pan_sharpen: bool,
    pub img_type: CalibrationMode,
    pub output_bit_depth: BitDepth,
    /// Directory holding `{serial}_warp_matrices.json`
    pub warp_matrix_dir: PathBuf,
    pub alignment: AlignmentParams,
}

impl Default for ProcessingParams {
    fn default() -> Self {
        Self {
            overwrite: false,
            generate_thumbnails: false,
            pan_sharpen: true,
            img_type: CalibrationMode::Reflectance,
            output_bit_depth: BitDepth::U8,
            warp_matrix_dir: PathBuf::from("."),
            alignment: AlignmentParams::default(),
        }
    }
}

impl ProcessingParams {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> BandResult<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            BandError::Config(format!("Failed to read {}: {}", path.as_ref().display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            BandError::Config(format!("Failed to parse {}: {}", path.as_ref().display(), e))
        })
    }

    pub fn export_params(&self) -> ExportParams {
        ExportParams {
            generate_thumbnails: self.generate_thumbnails,
            bit_depth: self.output_bit_depth,
            normalize: NormalizeParams::default(),
        }
    }
}

/// Whether captures from `camera_model` take the pansharpening path
pub fn use_panchromatic(camera_model: &str, pan_sharpen: bool) -> bool {
    pan_sharpen && is_panchromatic_model(camera_model)
}

/// Final state of one capture
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureStatus {
    /// Output directory already populated and overwrite not requested
    Skipped,
    Processed { files: Vec<PathBuf> },
    Failed { kind: ErrorKind, message: String },
}

#[derive(Debug, Clone)]
pub struct CaptureOutcome {
    pub capture_id: String,
    pub status: CaptureStatus,
}

/// Result of a batch run
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub outcomes: Vec<CaptureOutcome>,
}

impl BatchReport {
    pub fn processed_count(&self) -> usize {
        self.count(|s| matches!(s, CaptureStatus::Processed { .. }))
    }

    pub fn skipped_count(&self) -> usize {
        self.count(|s| matches!(s, CaptureStatus::Skipped))
    }

    pub fn failed_count(&self) -> usize {
        self.count(|s| matches!(s, CaptureStatus::Failed { .. }))
    }

    pub fn has_failures(&self) -> bool {
        self.failed_count() > 0
    }

    pub fn outcome(&self, capture_id: &str) -> Option<&CaptureOutcome> {
        self.outcomes.iter().find(|o| o.capture_id == capture_id)
    }

    fn count(&self, predicate: impl Fn(&CaptureStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| predicate(&o.status)).count()
    }
}

/// Drives alignment and export over every capture of an image set
pub struct BatchOrchestrator<S: WarpMatrixStore> {
    params: ProcessingParams,
    store: S,
    engine: AlignmentEngine,
    exporter: BandExporter,
}

impl BatchOrchestrator<FileWarpMatrixStore> {
    /// Orchestrator persisting warp matrices under `params.warp_matrix_dir`
    pub fn with_file_store(params: ProcessingParams) -> Self {
        let store = FileWarpMatrixStore::new(&params.warp_matrix_dir);
        Self::new(params, store)
    }
}

impl<S: WarpMatrixStore> BatchOrchestrator<S> {
    pub fn new(params: ProcessingParams, store: S) -> Self {
        let engine = AlignmentEngine::new(params.alignment.clone());
        let exporter = BandExporter::new(params.export_params());
        Self {
            params,
            store,
            engine,
            exporter,
        }
    }

    pub fn params(&self) -> &ProcessingParams {
        &self.params
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Process every capture in order, writing into `output_path/{capture_id}/`
    pub fn run<C: Capture>(&self, captures: &[C], output_path: &Path) -> BatchReport {
        let started_at = Utc::now();
        let start = Instant::now();
        log::info!(
            "Processing {} captures into {} ({}, overwrite: {})",
            captures.len(),
            output_path.display(),
            self.params.img_type,
            self.params.overwrite
        );

        let first = match captures.first() {
            Some(first) => first,
            None => {
                log::warn!("No captures to process");
                return BatchReport {
                    started_at,
                    elapsed: start.elapsed(),
                    outcomes: Vec::new(),
                };
            }
        };

        let camera_serial = first.camera_serial().to_string();
        let panchromatic = use_panchromatic(first.camera_model(), self.params.pan_sharpen);
        let frame = if panchromatic {
            ReferenceFrame::Panchromatic
        } else {
            ReferenceFrame::Native
        };
        log::info!(
            "Camera {} ({}), {} alignment",
            first.camera_model(),
            camera_serial,
            if panchromatic { "panchromatic" } else { "native" }
        );

        let mut warp_matrices = match self.store.load_for_frame(&camera_serial, frame) {
            Ok(set) => set,
            Err(e) => {
                log::warn!("Ignoring stored warp matrices: {}", e);
                None
            }
        };
        let reference = self.engine.reference_for(first, panchromatic).ok().map(|(_, r)| r);
        let stale = warp_matrices.as_ref().map_or(false, |set| {
            !reference.map_or(false, |r| set.is_compatible(frame, r, first.band_count()))
        });
        if stale {
            log::warn!(
                "Stored warp matrices for {} do not fit capture {} ({} bands); recomputing",
                camera_serial,
                first.id(),
                first.band_count()
            );
            warp_matrices = None;
        }

        let mut outcomes = Vec::with_capacity(captures.len());
        for capture in captures {
            let status = match self.process_capture(
                capture,
                output_path,
                &camera_serial,
                panchromatic,
                &mut warp_matrices,
            ) {
                Ok(status) => status,
                Err(e) => {
                    log::error!("Error processing capture {}: {}", capture.id(), e);
                    CaptureStatus::Failed {
                        kind: e.kind(),
                        message: e.to_string(),
                    }
                }
            };
            outcomes.push(CaptureOutcome {
                capture_id: capture.id().to_string(),
                status,
            });
        }

        let report = BatchReport {
            started_at,
            elapsed: start.elapsed(),
            outcomes,
        };
        log::info!(
            "Processed {} captures, skipped {}, failed {} in {:.1}s (started {})",
            report.processed_count(),
            report.skipped_count(),
            report.failed_count(),
            report.elapsed.as_secs_f64(),
            report.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        report
    }

    fn process_capture<C: Capture>(
        &self,
        capture: &C,
        output_path: &Path,
        camera_serial: &str,
        panchromatic: bool,
        warp_matrices: &mut Option<WarpMatrixSet>,
    ) -> BandResult<CaptureStatus> {
        if !is_file_name_component(capture.id()) {
            return Err(BandError::CaptureRead(format!(
                "Capture id {:?} cannot name an output directory",
                capture.id()
            )));
        }
        let output_dir = output_path.join(capture.id());
        if !self.params.overwrite && has_entries(&output_dir) {
            log::info!("Skipping capture {}: {} already has output", capture.id(), output_dir.display());
            return Ok(CaptureStatus::Skipped);
        }

        if capture.camera_serial() != camera_serial {
            return Err(BandError::Alignment(format!(
                "Camera serial {} differs from {} used for this image set",
                capture.camera_serial(),
                camera_serial
            )));
        }

        let alignment = self.engine.align(
            capture,
            self.params.img_type,
            warp_matrices.as_ref(),
            panchromatic,
        )?;

        if let Some(computed) = alignment.computed_warp_matrices {
            if let Err(e) = self.store.save(camera_serial, &computed) {
                log::warn!("Failed to save warp matrices for {}: {}", camera_serial, e);
            }
            *warp_matrices = Some(computed);
        }

        std::fs::create_dir_all(&output_dir).map_err(|e| {
            BandError::Export(format!("Failed to create {}: {}", output_dir.display(), e))
        })?;
        let files = self.exporter.export_capture(capture, &alignment.stack, &output_dir)?;

        log::info!("Capture {}: wrote {} files", capture.id(), files.len());
        Ok(CaptureStatus::Processed { files })
    }
}

fn has_entries(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_panchromatic_branch_selection() {
        assert!(use_panchromatic("RedEdge-P", true));
        assert!(use_panchromatic("Altum-PT", true));
        assert!(!use_panchromatic("RedEdge-P", false));
        assert!(!use_panchromatic("RedEdge-M", true));
        assert!(!use_panchromatic("Altum", true));
    }

    #[test]
    fn test_default_params() {
        let params = ProcessingParams::default();
        assert!(!params.overwrite);
        assert!(!params.generate_thumbnails);
        assert!(params.pan_sharpen);
        assert_eq!(params.img_type, CalibrationMode::Reflectance);
        assert_eq!(params.output_bit_depth, BitDepth::U8);
        assert_eq!(params.alignment.reference_band, 1);
        assert_eq!(params.alignment.registration.pyramid_levels, 3);
    }

    #[test]
    fn test_params_from_partial_json() {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let path = dir.path().join("params.json");
        std::fs::write(
            &path,
            r#"{ "overwrite": true, "img_type": "radiance", "alignment": { "registration": { "max_iterations": 10 } } }"#,
        )
        .unwrap();

        let params = ProcessingParams::from_json_file(&path).unwrap();
        assert!(params.overwrite);
        assert_eq!(params.img_type, CalibrationMode::Radiance);
        assert!(params.pan_sharpen);
        assert_eq!(params.alignment.registration.max_iterations, 10);
        assert_eq!(params.alignment.registration.pyramid_levels, 3);
    }

    #[test]
    fn test_invalid_config_file() {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let path = dir.path().join("params.json");
        std::fs::write(&path, r#"{ "img_type": "raw" }"#).unwrap();
        assert!(matches!(ProcessingParams::from_json_file(&path), Err(BandError::Config(_))));
    }

    #[test]
    fn test_report_counts() {
        let report = BatchReport {
            started_at: Utc::now(),
            elapsed: Duration::from_secs(1),
            outcomes: vec![
                CaptureOutcome { capture_id: "a".into(), status: CaptureStatus::Skipped },
                CaptureOutcome {
                    capture_id: "b".into(),
                    status: CaptureStatus::Failed { kind: ErrorKind::CaptureRead, message: "x".into() },
                },
                CaptureOutcome { capture_id: "c".into(), status: CaptureStatus::Processed { files: vec![] } },
            ],
        };
        assert_eq!(report.skipped_count(), 1);
        assert_eq!(report.failed_count(), 1);
        assert_eq!(report.processed_count(), 1);
        assert!(report.has_failures());
        assert!(matches!(report.outcome("c").map(|o| &o.status), Some(CaptureStatus::Processed { .. })));
    }

    #[test]
    fn test_empty_capture_list() {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let orchestrator = BatchOrchestrator::new(ProcessingParams::default(), FileWarpMatrixStore::new(dir.path()));
        let captures: Vec<crate::io::image_set::DirectoryCapture> = Vec::new();
        let report = orchestrator.run(&captures, dir.path());
        assert!(report.outcomes.is_empty());
        assert!(!report.has_failures());
    }
}
