use crate::core::pansharpen::PanSharpener;
use crate::core::registration::{Registration, RegistrationParams};
use crate::core::transform::{warp_image, ProjectiveTransform, ReferenceFrame, WarpMatrixSet};
use crate::io::capture::Capture;
use crate::types::{AlignedStack, BandError, BandImage, BandResult, CalibrationMode};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Alignment parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentParams {
    /// Reference band for native-resolution alignment
    pub reference_band: usize,
    /// Registration settings used when warp matrices must be computed
    pub registration: RegistrationParams,
}

impl Default for AlignmentParams {
    fn default() -> Self {
        Self {
            reference_band: 1,
            registration: RegistrationParams::default(),
        }
    }
}

/// Result of aligning one capture
#[derive(Debug)]
pub struct Alignment {
    pub stack: AlignedStack,
    /// Warp matrices derived during this call, for the caller to persist.
    /// `None` when the supplied matrices were used.
    pub computed_warp_matrices: Option<WarpMatrixSet>,
}

/// Produces spatially registered band stacks
pub struct AlignmentEngine {
    params: AlignmentParams,
}

impl AlignmentEngine {
    pub fn new(params: AlignmentParams) -> Self {
        Self { params }
    }

    pub fn standard() -> Self {
        Self::new(AlignmentParams::default())
    }

    /// Align one capture.
    ///
    /// With `panchromatic` the stack is built on the panchromatic grid and the
    /// spectral bands are pansharpened; otherwise bands are registered onto
    /// the native reference band. Supplied matrices that do not fit this
    /// capture and mode are ignored and new ones computed.
    pub fn align(
        &self,
        capture: &dyn Capture,
        mode: CalibrationMode,
        warp_matrices: Option<&WarpMatrixSet>,
        panchromatic: bool,
    ) -> BandResult<Alignment> {
        let start = Instant::now();
        log::info!(
            "Aligning capture {} ({}, {})",
            capture.id(),
            if panchromatic { "pansharpened" } else { "native resolution" },
            mode
        );

        let bands = capture.calibrated_bands(mode)?;
        if bands.len() != capture.band_count() {
            return Err(BandError::CaptureRead(format!(
                "Capture {} returned {} bands, expected {}",
                capture.id(),
                bands.len(),
                capture.band_count()
            )));
        }

        let (frame, reference) = self.reference_for(capture, panchromatic)?;

        let usable = warp_matrices.filter(|set| set.is_compatible(frame, reference, bands.len()));
        if warp_matrices.is_some() && usable.is_none() {
            log::warn!(
                "Ignoring warp matrices that do not match capture {} ({:?} frame, reference band {})",
                capture.id(),
                frame,
                reference
            );
        }

        let (transforms, computed) = match usable {
            Some(set) => (set.transforms()?, None),
            None => {
                let set = self.compute_warp_matrices(capture.camera_serial(), &bands, frame, reference)?;
                (set.transforms()?, Some(set))
            }
        };

        let shape = bands[reference].dim();
        let mut aligned: Vec<BandImage> = bands
            .iter()
            .zip(&transforms)
            .enumerate()
            .map(|(i, (band, transform))| {
                if i == reference {
                    band.clone()
                } else {
                    warp_image(band, transform, shape)
                }
            })
            .collect();

        if panchromatic {
            let pan = &bands[reference];
            let mut sharpener = PanSharpener::new();
            for (i, band) in aligned.iter_mut().enumerate() {
                if i == reference {
                    continue;
                }
                let window = PanSharpener::footprint_window(shape, bands[i].dim());
                *band = sharpener.sharpen(band, pan, window);
            }
        }

        let stack = AlignedStack::from_bands(&aligned, capture.band_names().to_vec(), mode)?;
        log::debug!(
            "Aligned capture {} to {:?} in {:?}",
            capture.id(),
            stack.dim(),
            start.elapsed()
        );

        Ok(Alignment {
            stack,
            computed_warp_matrices: computed,
        })
    }

    /// Reference frame and band index used for a capture
    pub fn reference_for(&self, capture: &dyn Capture, panchromatic: bool) -> BandResult<(ReferenceFrame, usize)> {
        if panchromatic {
            let pan = capture.panchromatic_band().ok_or_else(|| {
                BandError::Alignment(format!(
                    "Capture {} ({}) has no panchromatic band",
                    capture.id(),
                    capture.camera_model()
                ))
            })?;
            Ok((ReferenceFrame::Panchromatic, pan))
        } else {
            let count = capture.band_count();
            if count == 0 {
                return Err(BandError::CaptureRead(format!("Capture {} has no bands", capture.id())));
            }
            Ok((ReferenceFrame::Native, self.params.reference_band.min(count - 1)))
        }
    }

    /// Register every band onto the reference band
    pub fn compute_warp_matrices(
        &self,
        camera_serial: &str,
        bands: &[BandImage],
        frame: ReferenceFrame,
        reference: usize,
    ) -> BandResult<WarpMatrixSet> {
        log::info!(
            "Computing warp matrices for camera {} against band {} ({:?} frame)",
            camera_serial,
            reference,
            frame
        );
        let start = Instant::now();
        let registration = Registration::new(self.params.registration.clone());

        let transforms = bands
            .iter()
            .enumerate()
            .map(|(i, band)| {
                if i == reference {
                    Ok(ProjectiveTransform::identity())
                } else {
                    registration
                        .register(&bands[reference], band)
                        .map_err(|e| BandError::Alignment(format!("band {}: {}", i, e)))
                }
            })
            .collect::<BandResult<Vec<_>>>()?;

        log::info!("Warp matrices computed in {:?}", start.elapsed());
        Ok(WarpMatrixSet::new(camera_serial, frame, reference, &transforms))
    }
}
