use crate::io::capture::Capture;
use crate::io::manifest::{CaptureManifest, MANIFEST_FILE};
use crate::io::raster::read_band;
use crate::types::{BandError, BandImage, BandResult, CalibrationMode};
use std::f64::consts::PI;
use std::path::{Path, PathBuf};

/// Capture stored as a directory of single-band TIFFs plus a `capture.xml` manifest
#[derive(Debug, Clone)]
pub struct DirectoryCapture {
    dir: PathBuf,
    manifest: CaptureManifest,
    band_names: Vec<String>,
    /// Per-band irradiance measured from a calibration panel, overriding the manifest
    panel_irradiance: Option<Vec<f64>>,
}

impl DirectoryCapture {
    pub fn open<P: AsRef<Path>>(dir: P) -> BandResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        let manifest = CaptureManifest::read(dir.join(MANIFEST_FILE))?;
        let band_names = manifest.band_names();

        log::debug!(
            "Opened capture {} ({} bands) from {}",
            manifest.capture_id,
            band_names.len(),
            dir.display()
        );

        Ok(Self {
            dir,
            manifest,
            band_names,
            panel_irradiance: None,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn manifest(&self) -> &CaptureManifest {
        &self.manifest
    }

    /// Use panel-derived irradiance for reflectance conversion
    pub fn set_panel_irradiance(&mut self, irradiance: Vec<f64>) -> BandResult<()> {
        if irradiance.len() != self.band_names.len() {
            return Err(BandError::Config(format!(
                "Panel irradiance has {} bands, capture {} has {}",
                irradiance.len(),
                self.manifest.capture_id,
                self.band_names.len()
            )));
        }
        self.panel_irradiance = Some(irradiance);
        Ok(())
    }

    /// Radiance: `(raw - blackLevel) * radiometricGain`
    pub fn radiance_bands(&self) -> BandResult<Vec<BandImage>> {
        let raw = self.raw_bands()?;
        Ok(raw
            .into_iter()
            .zip(&self.manifest.band_list.bands)
            .map(|(counts, band)| {
                let black = band.black_level as f32;
                let gain = band.radiometric_gain as f32;
                counts.mapv(|v| (v - black).max(0.0) * gain)
            })
            .collect())
    }

    /// Downwelling irradiance per band (panel measurement first, then manifest)
    pub fn irradiance(&self) -> BandResult<Vec<f64>> {
        if let Some(panel) = &self.panel_irradiance {
            return Ok(panel.clone());
        }
        self.manifest
            .band_list
            .bands
            .iter()
            .map(|band| {
                band.irradiance.filter(|v| *v > 0.0).ok_or_else(|| {
                    BandError::CaptureRead(format!(
                        "No irradiance for band {} of capture {}; use radiance or a panel capture",
                        band.name, self.manifest.capture_id
                    ))
                })
            })
            .collect()
    }

    /// Irradiance implied by imaging a panel of known albedo: `π * L / ρ`
    pub fn panel_irradiance(&self) -> BandResult<Vec<f64>> {
        let radiance = self.radiance_bands()?;
        radiance
            .iter()
            .zip(&self.manifest.band_list.bands)
            .map(|(plane, band)| {
                let albedo = band.panel_albedo.filter(|a| *a > 0.0).ok_or_else(|| {
                    BandError::CaptureRead(format!(
                        "Panel capture {} has no panelAlbedo for band {}",
                        self.manifest.capture_id, band.name
                    ))
                })?;
                let finite: Vec<f64> = plane.iter().filter(|v| v.is_finite()).map(|&v| v as f64).collect();
                if finite.is_empty() {
                    return Err(BandError::CaptureRead(format!(
                        "Panel band {} has no valid pixels",
                        band.name
                    )));
                }
                let mean = finite.iter().sum::<f64>() / finite.len() as f64;
                Ok(PI * mean / albedo)
            })
            .collect()
    }
}

impl Capture for DirectoryCapture {
    fn id(&self) -> &str {
        &self.manifest.capture_id
    }

    fn band_names(&self) -> &[String] {
        &self.band_names
    }

    fn camera_model(&self) -> &str {
        &self.manifest.camera_model
    }

    fn camera_serial(&self) -> &str {
        &self.manifest.camera_serial
    }

    fn raw_bands(&self) -> BandResult<Vec<BandImage>> {
        self.manifest
            .band_list
            .bands
            .iter()
            .map(|band| {
                let path = self.dir.join(&band.file);
                read_band(&path).map_err(|e| {
                    BandError::CaptureRead(format!("{}: {}", path.display(), e))
                })
            })
            .collect()
    }

    fn calibrated_bands(&self, mode: CalibrationMode) -> BandResult<Vec<BandImage>> {
        let radiance = self.radiance_bands()?;
        match mode {
            CalibrationMode::Radiance => Ok(radiance),
            CalibrationMode::Reflectance => {
                let irradiance = self.irradiance()?;
                Ok(radiance
                    .into_iter()
                    .zip(irradiance)
                    .map(|(plane, e)| {
                        let factor = (PI / e) as f32;
                        plane.mapv(|v| v * factor)
                    })
                    .collect())
            }
        }
    }
}

/// All captures found beneath an image-set directory, in path order
#[derive(Debug, Clone, Default)]
pub struct ImageSet {
    pub captures: Vec<DirectoryCapture>,
}

impl ImageSet {
    /// Find every directory holding a capture manifest below `root`.
    ///
    /// Directories whose manifest cannot be read are logged and left out.
    pub fn from_directory<P: AsRef<Path>>(root: P) -> BandResult<Self> {
        let root = root.as_ref();
        log::info!("Loading image set from {}", root.display());
        if !root.is_dir() {
            return Err(BandError::CaptureRead(format!(
                "Image path {} is not a directory",
                root.display()
            )));
        }

        let mut dirs = Vec::new();
        find_capture_dirs(root, &mut dirs)?;
        dirs.sort();

        let mut captures = Vec::with_capacity(dirs.len());
        for dir in dirs {
            match DirectoryCapture::open(&dir) {
                Ok(capture) => captures.push(capture),
                Err(e) => log::error!("Skipping unreadable capture at {}: {}", dir.display(), e),
            }
        }

        log::info!("Loaded {} captures.", captures.len());
        Ok(Self { captures })
    }

    pub fn len(&self) -> usize {
        self.captures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.captures.is_empty()
    }

    /// Apply panel-derived irradiance to every capture
    pub fn apply_panel(&mut self, panel: &DirectoryCapture) -> BandResult<()> {
        let irradiance = panel.panel_irradiance()?;
        log::info!("Panel irradiance from capture {}: {:?}", panel.id(), irradiance);
        for capture in &mut self.captures {
            capture.set_panel_irradiance(irradiance.clone())?;
        }
        Ok(())
    }
}

fn find_capture_dirs(dir: &Path, found: &mut Vec<PathBuf>) -> BandResult<()> {
    if dir.join(MANIFEST_FILE).is_file() {
        found.push(dir.to_path_buf());
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            find_capture_dirs(&path, found)?;
        }
    }
    Ok(())
}
