use crate::types::{BandError, BandImage, BandResult};
use nalgebra::{Matrix3, Vector3};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

/// Planar projective transform mapping reference-grid pixels into a band's grid.
///
/// Pixel coordinates are `(x, y) = (column, row)` on pixel centres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectiveTransform {
    matrix: Matrix3<f64>,
    inverse: Matrix3<f64>,
}

impl ProjectiveTransform {
    pub fn identity() -> Self {
        Self {
            matrix: Matrix3::identity(),
            inverse: Matrix3::identity(),
        }
    }

    /// Build from a raw 3x3 matrix, normalized so `h[2][2] == 1`
    pub fn from_matrix(matrix: Matrix3<f64>) -> BandResult<Self> {
        if matrix.iter().any(|v| !v.is_finite()) {
            return Err(BandError::Alignment(
                "Transform contains non-finite values".to_string(),
            ));
        }

        let scale = matrix[(2, 2)];
        let matrix = if scale.abs() > f64::EPSILON {
            matrix / scale
        } else {
            matrix
        };

        let inverse = matrix.try_inverse().ok_or_else(|| {
            BandError::Alignment("Transform matrix is singular".to_string())
        })?;

        Ok(Self { matrix, inverse })
    }

    pub fn from_rows(rows: [[f64; 3]; 3]) -> BandResult<Self> {
        Self::from_matrix(Matrix3::from_fn(|r, c| rows[r][c]))
    }

    pub fn to_rows(&self) -> [[f64; 3]; 3] {
        let m = &self.matrix;
        [
            [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
            [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
            [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
        ]
    }

    pub fn translation(dx: f64, dy: f64) -> Self {
        let matrix = Matrix3::new(1.0, 0.0, dx, 0.0, 1.0, dy, 0.0, 0.0, 1.0);
        let inverse = Matrix3::new(1.0, 0.0, -dx, 0.0, 1.0, -dy, 0.0, 0.0, 1.0);
        Self { matrix, inverse }
    }

    /// Scale about pixel centres: `x' = (x + 0.5) * sx - 0.5`
    pub fn centred_scaling(sx: f64, sy: f64) -> Self {
        let matrix = Matrix3::new(
            sx, 0.0, 0.5 * sx - 0.5,
            0.0, sy, 0.5 * sy - 0.5,
            0.0, 0.0, 1.0,
        );
        let inverse = Matrix3::new(
            1.0 / sx, 0.0, 0.5 / sx - 0.5,
            0.0, 1.0 / sy, 0.5 / sy - 0.5,
            0.0, 0.0, 1.0,
        );
        Self { matrix, inverse }
    }

    /// Transform taking a `from` grid onto a `to` grid of different size
    pub fn grid_scaling(from: (usize, usize), to: (usize, usize)) -> Self {
        let sy = to.0 as f64 / from.0 as f64;
        let sx = to.1 as f64 / from.1 as f64;
        Self::centred_scaling(sx, sy)
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    pub fn inverse_matrix(&self) -> &Matrix3<f64> {
        &self.inverse
    }

    /// `self` applied after `first`
    pub fn compose(&self, first: &ProjectiveTransform) -> Self {
        Self {
            matrix: self.matrix * first.matrix,
            inverse: first.inverse * self.inverse,
        }
    }

    /// Express this transform on grids rescaled by `factor` about pixel centres
    pub fn rescaled(&self, factor: f64) -> Self {
        let s = Self::centred_scaling(factor, factor);
        let s_inv = Self::centred_scaling(1.0 / factor, 1.0 / factor);
        s.compose(&self.compose(&s_inv))
    }

    #[inline]
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let p = self.matrix * Vector3::new(x, y, 1.0);
        (p[0] / p[2], p[1] / p[2])
    }
}

/// Reference grid a set of warp matrices was computed against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceFrame {
    /// Panchromatic band grid (pansharpening path)
    Panchromatic,
    /// Native-resolution reference band grid
    Native,
}

/// Per-band registration for one camera serial number
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarpMatrixSet {
    pub camera_serial: String,
    pub frame: ReferenceFrame,
    pub reference_band: usize,
    /// One row-major 3x3 matrix per band; the reference band's entry is identity
    pub matrices: Vec<[[f64; 3]; 3]>,
}

impl WarpMatrixSet {
    pub fn new(
        camera_serial: &str,
        frame: ReferenceFrame,
        reference_band: usize,
        transforms: &[ProjectiveTransform],
    ) -> Self {
        Self {
            camera_serial: camera_serial.to_string(),
            frame,
            reference_band,
            matrices: transforms.iter().map(|t| t.to_rows()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.matrices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matrices.is_empty()
    }

    /// Whether this set can register a capture with the given layout
    pub fn is_compatible(&self, frame: ReferenceFrame, reference_band: usize, band_count: usize) -> bool {
        self.frame == frame && self.reference_band == reference_band && self.matrices.len() == band_count
    }

    pub fn transforms(&self) -> BandResult<Vec<ProjectiveTransform>> {
        self.matrices
            .iter()
            .map(|rows| ProjectiveTransform::from_rows(*rows))
            .collect()
    }

    /// Rebuild every raw matrix as a validated, normalized projective transform
    pub fn into_projective(self) -> BandResult<Self> {
        let transforms = self.transforms()?;
        Ok(Self {
            matrices: transforms.iter().map(|t| t.to_rows()).collect(),
            ..self
        })
    }
}

/// Bilinear sample at `(x, y)`; `None` outside the image
#[inline]
pub fn sample_bilinear(image: &BandImage, x: f64, y: f64) -> Option<f32> {
    let (rows, cols) = image.dim();
    if rows == 0 || cols == 0 {
        return None;
    }
    if !(x >= 0.0 && y >= 0.0 && x <= (cols - 1) as f64 && y <= (rows - 1) as f64) {
        return None;
    }

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(cols - 1);
    let y1 = (y0 + 1).min(rows - 1);
    let fx = (x - x0 as f64) as f32;
    let fy = (y - y0 as f64) as f32;

    let top = image[[y0, x0]] * (1.0 - fx) + image[[y0, x1]] * fx;
    let bottom = image[[y1, x0]] * (1.0 - fx) + image[[y1, x1]] * fx;
    Some(top * (1.0 - fy) + bottom * fy)
}

/// Resample `source` onto an output grid of `shape` through `transform`.
///
/// Output pixels that map outside the source are set to zero.
pub fn warp_image(
    source: &BandImage,
    transform: &ProjectiveTransform,
    shape: (usize, usize),
) -> BandImage {
    let mut output = Array2::zeros(shape);

    #[cfg(feature = "parallel")]
    Zip::indexed(&mut output).par_for_each(|(r, c), value| {
        let (x, y) = transform.apply(c as f64, r as f64);
        *value = sample_bilinear(source, x, y).unwrap_or(0.0);
    });

    #[cfg(not(feature = "parallel"))]
    Zip::indexed(&mut output).for_each(|(r, c), value| {
        let (x, y) = transform.apply(c as f64, r as f64);
        *value = sample_bilinear(source, x, y).unwrap_or(0.0);
    });

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_compose_and_inverse() {
        let t = ProjectiveTransform::translation(3.0, -2.0);
        let s = ProjectiveTransform::centred_scaling(2.0, 2.0);
        let combined = s.compose(&t);

        let (x, y) = combined.apply(1.0, 1.0);
        // translate to (4, -1), then scale about pixel centres
        assert_abs_diff_eq!(x, 8.5, epsilon = 1e-12);
        assert_abs_diff_eq!(y, -1.5, epsilon = 1e-12);

        let back = combined.inverse_matrix() * Vector3::new(x, y, 1.0);
        assert_abs_diff_eq!(back[0] / back[2], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(back[1] / back[2], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_from_matrix_normalizes_and_rejects_singular() {
        let rows = [[2.0, 0.0, 4.0], [0.0, 2.0, 6.0], [0.0, 0.0, 2.0]];
        let t = ProjectiveTransform::from_rows(rows).unwrap();
        assert_eq!(t.to_rows()[2][2], 1.0);
        assert_eq!(t.to_rows()[0][2], 2.0);

        let singular = [[1.0, 2.0, 0.0], [2.0, 4.0, 0.0], [0.0, 0.0, 1.0]];
        assert!(ProjectiveTransform::from_rows(singular).is_err());
    }

    #[test]
    fn test_rescaled_translation() {
        let t = ProjectiveTransform::translation(4.0, 2.0);
        let half = t.rescaled(0.5);
        let (x, y) = half.apply(10.0, 10.0);
        assert_abs_diff_eq!(x, 12.0, epsilon = 1e-12);
        assert_abs_diff_eq!(y, 11.0, epsilon = 1e-12);
    }

    #[test]
    fn test_warp_translation() {
        let source = Array2::from_shape_fn((8, 8), |(r, c)| (r * 8 + c) as f32);
        let warped = warp_image(&source, &ProjectiveTransform::translation(1.0, 2.0), (8, 8));

        assert_eq!(warped[[0, 0]], source[[2, 1]]);
        assert_eq!(warped[[5, 6]], source[[7, 7]]);
        // maps outside the source
        assert_eq!(warped[[7, 7]], 0.0);
    }

    #[test]
    fn test_bilinear_midpoint() {
        let source = Array2::from_shape_vec((2, 2), vec![0.0, 2.0, 4.0, 6.0]).unwrap();
        assert_abs_diff_eq!(sample_bilinear(&source, 0.5, 0.5).unwrap(), 3.0);
        assert!(sample_bilinear(&source, 1.5, 0.0).is_none());
    }

    #[test]
    fn test_warp_matrix_set_compatibility() {
        let transforms = vec![ProjectiveTransform::identity(); 5];
        let set = WarpMatrixSet::new("SN001", ReferenceFrame::Native, 1, &transforms);

        assert!(set.is_compatible(ReferenceFrame::Native, 1, 5));
        assert!(!set.is_compatible(ReferenceFrame::Panchromatic, 1, 5));
        assert!(!set.is_compatible(ReferenceFrame::Native, 1, 6));
        assert_eq!(set.transforms().unwrap().len(), 5);
    }
}
