//! Shared fixtures for integration tests

#![allow(dead_code)]

use bandalign::core::transform::WarpMatrixSet;
use bandalign::io::capture::Capture;
use bandalign::io::warp_store::WarpMatrixStore;
use bandalign::types::{BandError, BandImage, BandResult, CalibrationMode};
use ndarray::Array2;
use std::cell::{Cell, RefCell};

pub const BAND_NAMES: [&str; 5] = ["Blue", "Green", "Red", "NIR", "Red edge"];

/// Per-band offsets of the synthetic sensors, in band pixels
pub const BAND_SHIFTS: [(f64, f64); 5] = [(1.0, 0.0), (0.0, 0.0), (0.0, -1.0), (1.0, 1.0), (-1.0, 0.0)];

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Smooth texture with a few distinct blobs
pub fn pattern(x: f64, y: f64) -> f32 {
    let blobs = [(20.0, 30.0, 6.0), (70.0, 25.0, 9.0), (45.0, 70.0, 7.0), (85.0, 80.0, 5.0)];
    let mut v = 100.0 + 20.0 * (x / 9.0).sin() * (y / 13.0).cos();
    for (bx, by, s) in blobs {
        let d2 = (x - bx) * (x - bx) + (y - by) * (y - by);
        v += 150.0 * (-d2 / (2.0 * s * s)).exp();
    }
    v as f32
}

pub fn render(rows: usize, cols: usize, dx: f64, dy: f64) -> BandImage {
    Array2::from_shape_fn((rows, cols), |(r, c)| pattern(c as f64 + dx, r as f64 + dy))
}

/// In-memory capture with synthetic bands
#[derive(Debug, Clone)]
pub struct StubCapture {
    pub id: String,
    pub model: String,
    pub serial: String,
    pub names: Vec<String>,
    pub bands: Vec<BandImage>,
    /// Simulate unreadable imagery
    pub fail_read: bool,
}

impl StubCapture {
    /// Five-band native camera; every band sees the same scene slightly shifted
    pub fn multispectral(id: &str, serial: &str) -> Self {
        let bands = BAND_SHIFTS
            .iter()
            .enumerate()
            .map(|(i, &(dx, dy))| render(100, 100, dx, dy).mapv(|v| v * (1.0 + 0.1 * i as f32)))
            .collect();
        Self {
            id: id.to_string(),
            model: "RedEdge-M".to_string(),
            serial: serial.to_string(),
            names: BAND_NAMES.iter().map(|s| s.to_string()).collect(),
            bands,
            fail_read: false,
        }
    }

    /// Five spectral bands plus a panchromatic band at twice the resolution
    pub fn panchromatic(id: &str, serial: &str) -> Self {
        let mut capture = Self::multispectral(id, serial);
        capture.model = "RedEdge-P".to_string();
        capture.names.push("Panchro".to_string());
        capture.bands.push(Array2::from_shape_fn((200, 200), |(r, c)| {
            pattern((c as f64 + 0.5) / 2.0 - 0.5, (r as f64 + 0.5) / 2.0 - 0.5)
        }));
        capture
    }

    pub fn failing(id: &str, serial: &str) -> Self {
        Self {
            fail_read: true,
            ..Self::multispectral(id, serial)
        }
    }
}

impl Capture for StubCapture {
    fn id(&self) -> &str {
        &self.id
    }

    fn band_names(&self) -> &[String] {
        &self.names
    }

    fn camera_model(&self) -> &str {
        &self.model
    }

    fn camera_serial(&self) -> &str {
        &self.serial
    }

    fn raw_bands(&self) -> BandResult<Vec<BandImage>> {
        if self.fail_read {
            return Err(BandError::CaptureRead(format!("{}: corrupt image file", self.id)));
        }
        Ok(self.bands.clone())
    }

    fn calibrated_bands(&self, mode: CalibrationMode) -> BandResult<Vec<BandImage>> {
        let raw = self.raw_bands()?;
        let scale = match mode {
            CalibrationMode::Radiance => 1.0,
            CalibrationMode::Reflectance => 0.01,
        };
        Ok(raw.iter().map(|b| b * scale).collect())
    }
}

/// Store that keeps one set in memory and counts calls
#[derive(Default)]
pub struct RecordingStore {
    pub stored: RefCell<Option<WarpMatrixSet>>,
    pub loads: Cell<usize>,
    pub saves: Cell<usize>,
}

impl RecordingStore {
    pub fn with_set(set: WarpMatrixSet) -> Self {
        Self {
            stored: RefCell::new(Some(set)),
            ..Self::default()
        }
    }
}

impl WarpMatrixStore for RecordingStore {
    fn load(&self, _camera_serial: &str) -> BandResult<Option<WarpMatrixSet>> {
        self.loads.set(self.loads.get() + 1);
        Ok(self.stored.borrow().clone())
    }

    fn save(&self, _camera_serial: &str, set: &WarpMatrixSet) -> BandResult<()> {
        self.saves.set(self.saves.get() + 1);
        *self.stored.borrow_mut() = Some(set.clone());
        Ok(())
    }
}
