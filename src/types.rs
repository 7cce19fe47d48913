use ndarray::{stack, Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Single-band image plane (rows x columns)
pub type BandImage = Array2<f32>;

/// Camera models that carry a higher-resolution panchromatic sensor
pub const PANCHROMATIC_MODELS: [&str; 2] = ["RedEdge-P", "Altum-PT"];

/// Whether a camera model string names a panchromatic-capable camera
pub fn is_panchromatic_model(camera_model: &str) -> bool {
    PANCHROMATIC_MODELS.contains(&camera_model)
}

/// Whether `name` can be used as a single file or directory name.
///
/// Rejects empty names, `.`/`..`, and anything containing a path separator,
/// drive prefix or NUL.
pub fn is_file_name_component(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', ':', '\0'])
}

/// Calibrated units the capture converts raw counts into before alignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationMode {
    Reflectance,
    Radiance,
}

impl std::fmt::Display for CalibrationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CalibrationMode::Reflectance => write!(f, "reflectance"),
            CalibrationMode::Radiance => write!(f, "radiance"),
        }
    }
}

impl FromStr for CalibrationMode {
    type Err = BandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reflectance" => Ok(CalibrationMode::Reflectance),
            "radiance" => Ok(CalibrationMode::Radiance),
            _ => Err(BandError::Config(format!("Invalid image type: {}", s))),
        }
    }
}

/// Sample depth of exported band rasters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BitDepth {
    U8,
    U16,
}

impl BitDepth {
    /// Largest representable output intensity
    pub fn max_value(&self) -> f32 {
        match self {
            BitDepth::U8 => u8::MAX as f32,
            BitDepth::U16 => u16::MAX as f32,
        }
    }
}

/// One capture after geometric registration (rows x columns x band)
#[derive(Debug, Clone)]
pub struct AlignedStack {
    pub data: Array3<f32>,
    pub band_names: Vec<String>,
    pub mode: CalibrationMode,
}

impl AlignedStack {
    /// Stack equally-sized band planes along the last axis
    pub fn from_bands(
        bands: &[BandImage],
        band_names: Vec<String>,
        mode: CalibrationMode,
    ) -> BandResult<Self> {
        if bands.is_empty() {
            return Err(BandError::Alignment("No bands to stack".to_string()));
        }
        if bands.len() != band_names.len() {
            return Err(BandError::Alignment(format!(
                "Band count mismatch: {} planes, {} names",
                bands.len(),
                band_names.len()
            )));
        }

        let views: Vec<ArrayView2<f32>> = bands.iter().map(|b| b.view()).collect();
        let data = stack(Axis(2), &views)
            .map_err(|e| BandError::Alignment(format!("Failed to stack bands: {}", e)))?;

        Ok(Self { data, band_names, mode })
    }

    /// (rows, columns, bands)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn band_count(&self) -> usize {
        self.data.len_of(Axis(2))
    }

    pub fn band(&self, index: usize) -> ArrayView2<'_, f32> {
        self.data.index_axis(Axis(2), index)
    }

    /// Case-insensitive lookup of a band by name
    pub fn band_index(&self, name: &str) -> Option<usize> {
        self.band_names
            .iter()
            .position(|n| n.eq_ignore_ascii_case(name))
    }
}

/// Coarse classification of a failure, kept in per-capture reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    CaptureRead,
    Alignment,
    Export,
    WarpStore,
    Other,
}

/// Error types for band alignment and export
#[derive(Debug, thiserror::Error)]
pub enum BandError {
    #[error("Capture read error: {0}")]
    CaptureRead(String),

    #[error("Alignment error: {0}")]
    Alignment(String),

    #[error("Export error: {0}")]
    Export(String),

    #[error("Warp matrix store error: {0}")]
    WarpStore(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

impl BandError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BandError::CaptureRead(_) => ErrorKind::CaptureRead,
            BandError::Alignment(_) => ErrorKind::Alignment,
            BandError::Export(_) => ErrorKind::Export,
            BandError::WarpStore(_) => ErrorKind::WarpStore,
            _ => ErrorKind::Other,
        }
    }
}

/// Result type for band processing operations
pub type BandResult<T> = Result<T, BandError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panchromatic_models() {
        assert!(is_panchromatic_model("RedEdge-P"));
        assert!(is_panchromatic_model("Altum-PT"));
        assert!(!is_panchromatic_model("RedEdge-M"));
        assert!(!is_panchromatic_model("Altum"));
        assert!(!is_panchromatic_model("rededge-p"));
    }

    #[test]
    fn test_file_name_components() {
        assert!(is_file_name_component("IMG_0001"));
        assert!(is_file_name_component("RM01-1804223-SC"));
        assert!(!is_file_name_component(""));
        assert!(!is_file_name_component("."));
        assert!(!is_file_name_component(".."));
        assert!(!is_file_name_component("../escaped"));
        assert!(!is_file_name_component("/abs"));
        assert!(!is_file_name_component("a\\b"));
        assert!(!is_file_name_component("C:x"));
    }

    #[test]
    fn test_calibration_mode_parsing() {
        assert_eq!("Reflectance".parse::<CalibrationMode>().unwrap(), CalibrationMode::Reflectance);
        assert_eq!("radiance".parse::<CalibrationMode>().unwrap(), CalibrationMode::Radiance);
        assert!("raw".parse::<CalibrationMode>().is_err());
        assert_eq!(CalibrationMode::Radiance.to_string(), "radiance");
    }

    #[test]
    fn test_stack_layout() {
        let bands = vec![
            Array2::from_elem((4, 6), 1.0),
            Array2::from_elem((4, 6), 2.0),
            Array2::from_elem((4, 6), 3.0),
        ];
        let names = vec!["Blue".to_string(), "Green".to_string(), "Red".to_string()];
        let stack = AlignedStack::from_bands(&bands, names, CalibrationMode::Radiance).unwrap();

        assert_eq!(stack.dim(), (4, 6, 3));
        assert_eq!(stack.band(1)[[2, 3]], 2.0);
        assert_eq!(stack.band_index("red"), Some(2));
        assert_eq!(stack.band_index("NIR"), None);
    }

    #[test]
    fn test_stack_rejects_mismatched_bands() {
        let bands = vec![Array2::zeros((4, 4)), Array2::zeros((4, 5))];
        let names = vec!["A".to_string(), "B".to_string()];
        let result = AlignedStack::from_bands(&bands, names, CalibrationMode::Radiance);
        assert!(matches!(result, Err(BandError::Alignment(_))));
    }
}
