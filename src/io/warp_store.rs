use crate::core::transform::{ReferenceFrame, WarpMatrixSet};
use crate::types::{is_file_name_component, BandError, BandResult};
use std::path::{Path, PathBuf};

/// Persistence of per-camera warp matrices, keyed by camera serial number
pub trait WarpMatrixStore {
    /// Stored set for a camera; `Ok(None)` when nothing has been persisted yet
    fn load(&self, camera_serial: &str) -> BandResult<Option<WarpMatrixSet>>;

    fn save(&self, camera_serial: &str, set: &WarpMatrixSet) -> BandResult<()>;

    /// Load a set usable for `frame`.
    ///
    /// Sets computed for another frame count as absent. Every matrix must be
    /// a finite, invertible transform; panchromatic-frame matrices are also
    /// rebuilt in normalized form.
    fn load_for_frame(&self, camera_serial: &str, frame: ReferenceFrame) -> BandResult<Option<WarpMatrixSet>> {
        let set = match self.load(camera_serial)? {
            Some(set) => set,
            None => return Ok(None),
        };

        if set.frame != frame {
            log::warn!(
                "Stored warp matrices for {} were computed for the {:?} frame, need {:?}",
                camera_serial,
                set.frame,
                frame
            );
            return Ok(None);
        }

        let invalid = |e: BandError| BandError::WarpStore(format!("Invalid stored matrix for {}: {}", camera_serial, e));
        match frame {
            ReferenceFrame::Panchromatic => set.into_projective().map(Some).map_err(invalid),
            ReferenceFrame::Native => {
                set.transforms().map_err(invalid)?;
                Ok(Some(set))
            }
        }
    }
}

impl<S: WarpMatrixStore + ?Sized> WarpMatrixStore for &S {
    fn load(&self, camera_serial: &str) -> BandResult<Option<WarpMatrixSet>> {
        (**self).load(camera_serial)
    }

    fn save(&self, camera_serial: &str, set: &WarpMatrixSet) -> BandResult<()> {
        (**self).save(camera_serial, set)
    }
}

/// Warp matrices as `{camera_serial}_warp_matrices.json` files in one directory
#[derive(Debug, Clone)]
pub struct FileWarpMatrixStore {
    dir: PathBuf,
}

impl FileWarpMatrixStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn path_for(&self, camera_serial: &str) -> BandResult<PathBuf> {
        if !is_file_name_component(camera_serial) {
            return Err(BandError::WarpStore(format!(
                "Camera serial {:?} cannot name a warp matrix file",
                camera_serial
            )));
        }
        Ok(self.dir.join(format!("{}_warp_matrices.json", camera_serial)))
    }
}

impl WarpMatrixStore for FileWarpMatrixStore {
    fn load(&self, camera_serial: &str) -> BandResult<Option<WarpMatrixSet>> {
        let path = self.path_for(camera_serial)?;
        if !path.exists() {
            log::info!("No warp matrices stored at {}", path.display());
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| BandError::WarpStore(format!("Failed to read {}: {}", path.display(), e)))?;
        let set: WarpMatrixSet = serde_json::from_str(&content)
            .map_err(|e| BandError::WarpStore(format!("Failed to parse {}: {}", path.display(), e)))?;

        if set.camera_serial != camera_serial {
            return Err(BandError::WarpStore(format!(
                "{} holds matrices for camera {}, expected {}",
                path.display(),
                set.camera_serial,
                camera_serial
            )));
        }

        log::info!("Loaded {} warp matrices from {}", set.len(), path.display());
        Ok(Some(set))
    }

    fn save(&self, camera_serial: &str, set: &WarpMatrixSet) -> BandResult<()> {
        let path = self.path_for(camera_serial)?;
        let json = serde_json::to_string_pretty(set)
            .map_err(|e| BandError::WarpStore(format!("Failed to serialize warp matrices: {}", e)))?;

        if !self.dir.as_os_str().is_empty() {
            std::fs::create_dir_all(&self.dir)?;
        }
        // write-then-rename so an interrupted run never leaves a truncated file
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;

        log::info!("Saved warp matrices to {}", path.display());
        Ok(())
    }
}
