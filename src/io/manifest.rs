use crate::types::{is_file_name_component, BandError, BandResult};
use quick_xml::de::from_str;
use serde::Deserialize;
use std::path::Path;

/// File name of the manifest describing one capture directory
pub const MANIFEST_FILE: &str = "capture.xml";

/// Root `<capture>` element
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureManifest {
    #[serde(rename = "captureId")]
    pub capture_id: String,
    #[serde(rename = "cameraModel")]
    pub camera_model: String,
    #[serde(rename = "cameraSerial")]
    pub camera_serial: String,
    #[serde(rename = "bandList", default)]
    pub band_list: BandList,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BandList {
    #[serde(rename = "band", default)]
    pub bands: Vec<BandEntry>,
}

/// One single-band image of the capture and its radiometric constants
#[derive(Debug, Clone, Deserialize)]
pub struct BandEntry {
    #[serde(rename = "name")]
    pub name: String,
    /// Image file, relative to the capture directory
    #[serde(rename = "file")]
    pub file: String,
    #[serde(rename = "blackLevel", default)]
    pub black_level: f64,
    /// Radiance per raw count
    #[serde(rename = "radiometricGain")]
    pub radiometric_gain: f64,
    /// Downwelling irradiance for reflectance conversion
    #[serde(rename = "irradiance", default)]
    pub irradiance: Option<f64>,
    /// Known reflectance of the calibration panel (panel captures only)
    #[serde(rename = "panelAlbedo", default)]
    pub panel_albedo: Option<f64>,
}

impl CaptureManifest {
    pub fn parse(xml_content: &str) -> BandResult<Self> {
        let manifest = from_str::<CaptureManifest>(xml_content)
            .map_err(|e| BandError::CaptureRead(format!("Failed to parse capture manifest: {}", e)))?;

        if manifest.band_list.bands.is_empty() {
            return Err(BandError::CaptureRead(format!(
                "Capture {} lists no bands",
                manifest.capture_id
            )));
        }
        if manifest.capture_id.trim().is_empty() {
            return Err(BandError::CaptureRead("Capture manifest has an empty captureId".to_string()));
        }
        if !is_file_name_component(&manifest.capture_id) {
            return Err(BandError::CaptureRead(format!(
                "captureId {:?} cannot name an output directory",
                manifest.capture_id
            )));
        }

        Ok(manifest)
    }

    pub fn read<P: AsRef<Path>>(path: P) -> BandResult<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            BandError::CaptureRead(format!("Failed to read {}: {}", path.as_ref().display(), e))
        })?;
        Self::parse(&content)
    }

    pub fn band_names(&self) -> Vec<String> {
        self.band_list.bands.iter().map(|b| b.name.clone()).collect()
    }
}
