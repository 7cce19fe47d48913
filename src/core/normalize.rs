use crate::types::BandImage;
use ndarray::{Array2, ArrayView2};
use num_traits::{Bounded, NumCast};
use serde::{Deserialize, Serialize};

/// Percentile clip limits for display normalization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeParams {
    /// Lower clip percentile (0-100)
    pub low_percentile: f64,
    /// Upper clip percentile (0-100)
    pub high_percentile: f64,
}

impl Default for NormalizeParams {
    fn default() -> Self {
        Self {
            low_percentile: 0.5,
            high_percentile: 99.5,
        }
    }
}

/// Percentiles of `values` with linear interpolation between order statistics.
///
/// Non-finite values are ignored. Returns `None` when no finite value remains.
pub fn percentiles<I>(values: I, percents: &[f64]) -> Option<Vec<f32>>
where
    I: IntoIterator<Item = f32>,
{
    let mut sorted: Vec<f32> = values.into_iter().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_unstable_by(|a, b| a.total_cmp(b));

    let last = (sorted.len() - 1) as f64;
    let result = percents
        .iter()
        .map(|&p| {
            let rank = (p.clamp(0.0, 100.0) / 100.0) * last;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            let frac = (rank - lo as f64) as f32;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        })
        .collect();

    Some(result)
}

/// Linear rescale of `band` so `[min, max]` maps to `[0, 1]`, clipping outside values
pub fn normalize(band: &ArrayView2<f32>, min: f32, max: f32) -> BandImage {
    let width = max - min;
    if !(width > 0.0) {
        return Array2::zeros(band.dim());
    }
    band.mapv(|v| {
        if v.is_finite() {
            ((v - min) / width).clamp(0.0, 1.0)
        } else {
            0.0
        }
    })
}

/// Percentile-based normalization of single bands
#[derive(Debug, Clone)]
pub struct BandNormalizer {
    params: NormalizeParams,
}

impl BandNormalizer {
    pub fn new(params: NormalizeParams) -> Self {
        Self { params }
    }

    pub fn standard() -> Self {
        Self::new(NormalizeParams::default())
    }

    /// Clip limits of a band; `None` for a band with no finite values
    pub fn clip_range(&self, band: &ArrayView2<f32>) -> Option<(f32, f32)> {
        let limits = percentiles(
            band.iter().copied(),
            &[self.params.low_percentile, self.params.high_percentile],
        )?;
        Some((limits[0], limits[1]))
    }

    /// Band rescaled to `[0, 1]` between its clip percentiles
    pub fn normalize(&self, band: &ArrayView2<f32>) -> BandImage {
        match self.clip_range(band) {
            Some((min, max)) => {
                log::debug!("Normalization range: {:.4e} to {:.4e}", min, max);
                normalize(band, min, max)
            }
            None => Array2::zeros(band.dim()),
        }
    }
}

/// Map `[0, 1]` values onto the full range of an unsigned sample type
pub fn quantize<T>(normalized: &BandImage) -> Array2<T>
where
    T: NumCast + Bounded + Copy,
{
    let max = T::max_value().to_f32().unwrap_or(1.0);
    normalized.mapv(|v| {
        let scaled = (v.clamp(0.0, 1.0) * max).round();
        T::from(scaled).unwrap_or_else(T::min_value)
    })
}
