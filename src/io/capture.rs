use crate::core::normalize::percentiles;
use crate::types::{AlignedStack, BandError, BandImage, BandResult, CalibrationMode};
use ndarray::Array3;

/// Name of the panchromatic band on panchromatic-capable cameras
pub const PANCHROMATIC_BAND: &str = "Panchro";

/// Display gamma applied to RGB composites
const RGB_GAMMA: f32 = 1.0 / 2.2;

/// One synchronized multi-sensor exposure.
///
/// This is the only surface the alignment, export and batch stages use;
/// image-set libraries and test doubles implement it.
pub trait Capture {
    /// Identifier stable across runs; names the capture's output directory
    fn id(&self) -> &str;

    /// Band names in band order
    fn band_names(&self) -> &[String];

    fn camera_model(&self) -> &str;

    fn camera_serial(&self) -> &str;

    /// Uncalibrated sensor counts, in band order
    fn raw_bands(&self) -> BandResult<Vec<BandImage>>;

    /// Per-band planes converted to `mode` units, in band order.
    ///
    /// Bands may differ in size (e.g. a higher-resolution panchromatic band).
    fn calibrated_bands(&self, mode: CalibrationMode) -> BandResult<Vec<BandImage>>;

    fn band_count(&self) -> usize {
        self.band_names().len()
    }

    /// Index of the panchromatic band, if the capture has one
    fn panchromatic_band(&self) -> Option<usize> {
        self.band_names()
            .iter()
            .position(|name| name.eq_ignore_ascii_case(PANCHROMATIC_BAND))
    }

    /// 8-bit RGB composite (rows x columns x 3) of an aligned stack.
    ///
    /// Red, green and blue share one 0.5/99.5 percentile stretch, then gamma.
    fn rgb_composite(&self, stack: &AlignedStack) -> BandResult<Array3<u8>> {
        let mut channels = [0usize; 3];
        for (slot, name) in ["red", "green", "blue"].iter().enumerate() {
            channels[slot] = stack.band_index(name).ok_or_else(|| {
                BandError::Export(format!(
                    "Capture {} has no {} band for an RGB composite",
                    self.id(),
                    name
                ))
            })?;
        }

        // one percentile range over all three channels
        let values = channels.iter().flat_map(|&i| stack.band(i).into_iter().copied());
        let limits = percentiles(values, &[0.5, 99.5]).ok_or_else(|| {
            BandError::Export(format!("Capture {} has no finite RGB pixels", self.id()))
        })?;
        let (min, max) = (limits[0], limits[1]);
        let width = if max > min { max - min } else { 1.0 };

        let (rows, cols, _) = stack.dim();
        let mut rgb = Array3::zeros((rows, cols, 3));
        for (slot, &band) in channels.iter().enumerate() {
            let plane = stack.band(band);
            for ((r, c), &v) in plane.indexed_iter() {
                let n = if v.is_finite() { ((v - min) / width).clamp(0.0, 1.0) } else { 0.0 };
                rgb[[r, c, slot]] = (n.powf(RGB_GAMMA) * 255.0).round() as u8;
            }
        }

        Ok(rgb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    struct FixedCapture {
        names: Vec<String>,
    }

    impl Capture for FixedCapture {
        fn id(&self) -> &str {
            "fixed"
        }
        fn band_names(&self) -> &[String] {
            &self.names
        }
        fn camera_model(&self) -> &str {
            "RedEdge-P"
        }
        fn camera_serial(&self) -> &str {
            "SN001"
        }
        fn raw_bands(&self) -> BandResult<Vec<BandImage>> {
            Ok(vec![Array2::zeros((2, 2)); self.names.len()])
        }
        fn calibrated_bands(&self, _mode: CalibrationMode) -> BandResult<Vec<BandImage>> {
            self.raw_bands()
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_panchromatic_band_lookup() {
        let capture = FixedCapture { names: names(&["Blue", "Green", "Red", "NIR", "Red edge", "Panchro"]) };
        assert_eq!(capture.panchromatic_band(), Some(5));
        assert_eq!(capture.band_count(), 6);

        let plain = FixedCapture { names: names(&["Blue", "Green", "Red"]) };
        assert_eq!(plain.panchromatic_band(), None);
    }

    #[test]
    fn test_rgb_composite_channel_order() {
        let capture = FixedCapture { names: names(&["Blue", "Green", "Red"]) };
        let bands = vec![
            Array2::from_elem((2, 2), 0.0),
            Array2::from_elem((2, 2), 0.5),
            Array2::from_elem((2, 2), 1.0),
        ];
        let stack = AlignedStack::from_bands(&bands, capture.names.clone(), CalibrationMode::Reflectance).unwrap();

        let rgb = capture.rgb_composite(&stack).unwrap();
        assert_eq!(rgb.dim(), (2, 2, 3));
        assert_eq!(rgb[[0, 0, 0]], 255);
        assert_eq!(rgb[[0, 0, 2]], 0);
        assert!(rgb[[0, 0, 1]] > 128);
    }

    #[test]
    fn test_rgb_composite_requires_visible_bands() {
        let capture = FixedCapture { names: names(&["NIR", "Red edge"]) };
        let bands = vec![Array2::zeros((2, 2)), Array2::zeros((2, 2))];
        let stack = AlignedStack::from_bands(&bands, capture.names.clone(), CalibrationMode::Radiance).unwrap();
        assert!(matches!(capture.rgb_composite(&stack), Err(BandError::Export(_))));
    }
}
