use crate::types::BandImage;
use ndarray::{Array2, Zip};
use std::collections::HashMap;

/// Ratio-modulation pansharpening (SFIM).
///
/// Each upsampled spectral band is multiplied by `pan / lowpass(pan)`, where the
/// low-pass window approximates the footprint of one spectral pixel on the
/// panchromatic grid. Spectral ratios between bands are preserved.
pub struct PanSharpener {
    /// Low-pass images already computed, keyed by window size
    lowpass_cache: HashMap<usize, BandImage>,
}

impl PanSharpener {
    pub fn new() -> Self {
        Self {
            lowpass_cache: HashMap::new(),
        }
    }

    /// Odd box-filter size covering one `band_dim` pixel on the `pan_dim` grid
    pub fn footprint_window(pan_dim: (usize, usize), band_dim: (usize, usize)) -> usize {
        let ratio_rows = pan_dim.0 as f64 / band_dim.0.max(1) as f64;
        let ratio_cols = pan_dim.1 as f64 / band_dim.1.max(1) as f64;
        let size = ratio_rows.max(ratio_cols).round().max(1.0) as usize;
        let size = if size % 2 == 0 { size + 1 } else { size };
        size.max(3)
    }

    /// Sharpen one band already resampled onto the panchromatic grid
    pub fn sharpen(&mut self, upsampled: &BandImage, pan: &BandImage, window: usize) -> BandImage {
        let lowpass = self
            .lowpass_cache
            .entry(window)
            .or_insert_with(|| box_filter(pan, window / 2));

        Zip::from(upsampled)
            .and(pan)
            .and(&*lowpass)
            .map_collect(|&band, &p, &low| {
                if low > f32::EPSILON && band != 0.0 {
                    band * p / low
                } else {
                    band
                }
            })
    }
}

impl Default for PanSharpener {
    fn default() -> Self {
        Self::new()
    }
}

/// Mean over a `(2 * radius + 1)^2` window, shrunk at the borders
pub fn box_filter(image: &BandImage, radius: usize) -> BandImage {
    let (rows, cols) = image.dim();
    let mut integral = Array2::<f64>::zeros((rows + 1, cols + 1));
    for r in 0..rows {
        let mut row_sum = 0.0;
        for c in 0..cols {
            let v = image[[r, c]];
            row_sum += if v.is_finite() { v as f64 } else { 0.0 };
            integral[[r + 1, c + 1]] = integral[[r, c + 1]] + row_sum;
        }
    }

    Array2::from_shape_fn((rows, cols), |(r, c)| {
        let r0 = r.saturating_sub(radius);
        let c0 = c.saturating_sub(radius);
        let r1 = (r + radius + 1).min(rows);
        let c1 = (c + radius + 1).min(cols);
        let sum = integral[[r1, c1]] - integral[[r0, c1]] - integral[[r1, c0]] + integral[[r0, c0]];
        let area = ((r1 - r0) * (c1 - c0)) as f64;
        (sum / area) as f32
    })
}
