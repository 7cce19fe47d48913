use crate::core::normalize::{quantize, BandNormalizer, NormalizeParams};
use crate::io::capture::Capture;
use crate::io::raster::{write_gray, write_rgb_jpeg};
use crate::types::{AlignedStack, BandError, BandResult, BitDepth};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Export parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportParams {
    /// Write an RGB JPEG thumbnail next to the band rasters
    pub generate_thumbnails: bool,
    pub bit_depth: BitDepth,
    pub normalize: NormalizeParams,
}

impl Default for ExportParams {
    fn default() -> Self {
        Self {
            generate_thumbnails: false,
            bit_depth: BitDepth::U8,
            normalize: NormalizeParams::default(),
        }
    }
}

/// `{capture_id}_band_{band_name}.tif`
pub fn band_file_name(capture_id: &str, band_name: &str) -> String {
    format!("{}_band_{}.tif", capture_id, band_name)
}

/// `{capture_id}_thumbnail.jpg`
pub fn thumbnail_file_name(capture_id: &str) -> String {
    format!("{}_thumbnail.jpg", capture_id)
}

/// Writes normalized per-band rasters for aligned stacks
pub struct BandExporter {
    params: ExportParams,
    normalizer: BandNormalizer,
}

impl BandExporter {
    pub fn new(params: ExportParams) -> Self {
        let normalizer = BandNormalizer::new(params.normalize.clone());
        Self { params, normalizer }
    }

    pub fn standard() -> Self {
        Self::new(ExportParams::default())
    }

    pub fn params(&self) -> &ExportParams {
        &self.params
    }

    /// Write one grayscale GeoTIFF per band, in band order.
    ///
    /// Stops at the first failed write; files already written stay on disk.
    pub fn export(
        &self,
        stack: &AlignedStack,
        band_names: &[String],
        output_dir: &Path,
        capture_id: &str,
    ) -> BandResult<Vec<PathBuf>> {
        if band_names.len() != stack.band_count() {
            return Err(BandError::Export(format!(
                "Capture {} has {} bands but {} names",
                capture_id,
                stack.band_count(),
                band_names.len()
            )));
        }

        let mut written = Vec::with_capacity(band_names.len());
        for (i, name) in band_names.iter().enumerate() {
            let path = output_dir.join(band_file_name(capture_id, name));
            let normalized = self.normalizer.normalize(&stack.band(i));

            let result = match self.params.bit_depth {
                BitDepth::U8 => write_gray(&path, &quantize::<u8>(&normalized)),
                BitDepth::U16 => write_gray(&path, &quantize::<u16>(&normalized)),
            };
            result.map_err(|e| BandError::Export(format!("band {}: {}", name, e)))?;

            log::debug!("Wrote {}", path.display());
            written.push(path);
        }

        Ok(written)
    }

    /// Band rasters plus, when enabled, the capture's RGB thumbnail
    pub fn export_capture(
        &self,
        capture: &dyn Capture,
        stack: &AlignedStack,
        output_dir: &Path,
    ) -> BandResult<Vec<PathBuf>> {
        let mut written = self.export(stack, &stack.band_names, output_dir, capture.id())?;

        if self.params.generate_thumbnails {
            let rgb = capture.rgb_composite(stack)?;
            let path = output_dir.join(thumbnail_file_name(capture.id()));
            write_rgb_jpeg(&path, &rgb)
                .map_err(|e| BandError::Export(format!("thumbnail: {}", e)))?;
            log::debug!("Wrote {}", path.display());
            written.push(path);
        }

        Ok(written)
    }
}
