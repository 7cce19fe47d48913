//! Band-to-band image registration.
//!
//! Both images are first reduced to normalized gradient magnitude so bands
//! with different spectral response become comparable. A coarse translation
//! is found by FFT phase correlation, then a full warp is refined by
//! enhanced-correlation-coefficient (ECC) maximization over an image pyramid.

use crate::core::normalize::{normalize, percentiles};
use crate::core::transform::{sample_bilinear, warp_image, ProjectiveTransform};
use crate::types::{BandError, BandImage, BandResult};
use nalgebra::{DMatrix, DVector};
use ndarray::Array2;
use num_complex::Complex;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};

/// Degrees of freedom of the estimated warp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionModel {
    Translation,
    Affine,
    Homography,
}

impl MotionModel {
    /// Indices into `[h00, h01, h02, h10, h11, h12, h20, h21]`
    fn parameters(&self) -> &'static [usize] {
        match self {
            MotionModel::Translation => &[2, 5],
            MotionModel::Affine => &[0, 1, 2, 3, 4, 5],
            MotionModel::Homography => &[0, 1, 2, 3, 4, 5, 6, 7],
        }
    }
}

/// Registration parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationParams {
    /// Warp model refined by ECC
    pub motion_model: MotionModel,
    /// Number of pyramid levels (1 = full resolution only)
    pub pyramid_levels: usize,
    /// ECC iteration cap per level
    pub max_iterations: usize,
    /// ECC stops once the parameter update norm drops below this
    pub epsilon: f64,
    /// Coarsest pyramid level keeps at least this many pixels per side
    pub min_level_size: usize,
    /// Phase correlation runs on a level no larger than this per side
    pub max_correlation_size: usize,
}

impl Default for RegistrationParams {
    fn default() -> Self {
        Self {
            motion_model: MotionModel::Homography,
            pyramid_levels: 3,
            max_iterations: 50,
            epsilon: 1e-4,
            min_level_size: 32,
            max_correlation_size: 512,
        }
    }
}

/// Estimates the transform mapping a reference grid into a band's grid
pub struct Registration {
    params: RegistrationParams,
}

impl Registration {
    pub fn new(params: RegistrationParams) -> Self {
        Self { params }
    }

    pub fn standard() -> Self {
        Self::new(RegistrationParams::default())
    }

    /// Register `band` against `reference`.
    ///
    /// The returned transform maps reference pixels to band pixels, so
    /// `warp_image(band, &t, reference.dim())` overlays the reference.
    pub fn register(&self, reference: &BandImage, band: &BandImage) -> BandResult<ProjectiveTransform> {
        let template = prepare(reference)?;
        let image = prepare(band)?;

        let levels = self.level_count(template.dim(), image.dim());
        log::debug!(
            "Registering {:?} band against {:?} reference over {} pyramid levels",
            band.dim(),
            reference.dim(),
            levels
        );

        let mut template_pyramid = vec![template];
        let mut image_pyramid = vec![image];
        for level in 1..levels {
            let t = downsample(&template_pyramid[level - 1]);
            let i = downsample(&image_pyramid[level - 1]);
            template_pyramid.push(t);
            image_pyramid.push(i);
        }

        // Initial guess: the pixel-centre scaling between the two grids
        let mut transform = ProjectiveTransform::grid_scaling(reference.dim(), band.dim());

        let correlation_level = self.correlation_level(&template_pyramid);
        let factor = 0.5f64.powi(correlation_level as i32);
        let level_transform = transform.rescaled(factor);
        let resampled = warp_image(
            &image_pyramid[correlation_level],
            &level_transform,
            template_pyramid[correlation_level].dim(),
        );
        let (dx, dy) = phase_correlation(&template_pyramid[correlation_level], &resampled)?;
        log::debug!(
            "Phase correlation shift at level {}: ({:.2}, {:.2}) px",
            correlation_level,
            dx,
            dy
        );
        transform = level_transform
            .compose(&ProjectiveTransform::translation(dx, dy))
            .rescaled(1.0 / factor);

        for level in (0..levels).rev() {
            let factor = 0.5f64.powi(level as i32);
            let refined = self.ecc(
                &template_pyramid[level],
                &image_pyramid[level],
                transform.rescaled(factor),
            )?;
            transform = refined.rescaled(1.0 / factor);
        }

        Ok(transform)
    }

    fn level_count(&self, template_dim: (usize, usize), image_dim: (usize, usize)) -> usize {
        let min_side = template_dim
            .0
            .min(template_dim.1)
            .min(image_dim.0)
            .min(image_dim.1);
        let mut levels = 1;
        while levels < self.params.pyramid_levels.max(1)
            && (min_side >> levels) >= self.params.min_level_size
        {
            levels += 1;
        }
        levels
    }

    fn correlation_level(&self, pyramid: &[BandImage]) -> usize {
        pyramid
            .iter()
            .position(|level| {
                let (rows, cols) = level.dim();
                rows.max(cols) <= self.params.max_correlation_size
            })
            .unwrap_or(pyramid.len() - 1)
    }

    /// ECC refinement of `initial` so `image(W(x))` correlates with `template(x)`
    fn ecc(
        &self,
        template: &BandImage,
        image: &BandImage,
        initial: ProjectiveTransform,
    ) -> BandResult<ProjectiveTransform> {
        let (gx, gy) = gradients(image);
        let selected = self.params.motion_model.parameters();
        let mut rows = initial.to_rows();

        for iteration in 0..self.params.max_iterations {
            let warp = ProjectiveTransform::from_rows(rows)?;
            let sums = accumulate_ecc(template, image, &gx, &gy, &warp);

            let minimum_overlap = (template.len() / 10).max(16);
            if sums.count < minimum_overlap {
                return Err(BandError::Alignment(format!(
                    "Insufficient overlap for registration: {} of {} pixels",
                    sums.count,
                    template.len()
                )));
            }

            let n = sums.count as f64;
            let t_mean = sums.t / n;
            let i_mean = sums.i / n;
            let image_norm2 = sums.ii - n * i_mean * i_mean;
            let correlation = sums.ti - n * t_mean * i_mean;

            let p = selected.len();
            let hessian = DMatrix::from_fn(p, p, |r, c| sums.gg[selected[r]][selected[c]]);
            let image_projection = DVector::from_fn(p, |r, _| {
                sums.gi[selected[r]] - i_mean * sums.g[selected[r]]
            });
            let template_projection = DVector::from_fn(p, |r, _| {
                sums.gt[selected[r]] - t_mean * sums.g[selected[r]]
            });

            let hessian_inv = scaled_inverse(&hessian).ok_or_else(|| {
                BandError::Alignment("Registration Hessian is singular (featureless band?)".to_string())
            })?;

            let image_projection_h = &hessian_inv * &image_projection;
            let lambda_n = image_norm2 - image_projection.dot(&image_projection_h);
            let lambda_d = correlation - template_projection.dot(&image_projection_h);
            if lambda_d <= 0.0 {
                return Err(BandError::Alignment(
                    "Registration diverged: bands are uncorrelated or do not overlap".to_string(),
                ));
            }
            let lambda = lambda_n / lambda_d;

            let delta = &hessian_inv * (template_projection * lambda - image_projection);
            for (k, &index) in selected.iter().enumerate() {
                rows[index / 3][index % 3] += delta[k];
            }

            let step = delta.norm();
            if !step.is_finite() {
                return Err(BandError::Alignment(
                    "Registration produced a non-finite update".to_string(),
                ));
            }
            if step < self.params.epsilon {
                log::debug!("ECC converged after {} iterations", iteration + 1);
                break;
            }
        }

        ProjectiveTransform::from_rows(rows)
    }
}

/// Running sums for one ECC iteration
#[derive(Clone)]
struct EccSums {
    count: usize,
    t: f64,
    i: f64,
    ii: f64,
    ti: f64,
    g: [f64; 8],
    gt: [f64; 8],
    gi: [f64; 8],
    gg: [[f64; 8]; 8],
}

impl Default for EccSums {
    fn default() -> Self {
        Self {
            count: 0,
            t: 0.0,
            i: 0.0,
            ii: 0.0,
            ti: 0.0,
            g: [0.0; 8],
            gt: [0.0; 8],
            gi: [0.0; 8],
            gg: [[0.0; 8]; 8],
        }
    }
}

impl EccSums {
    fn merge(mut self, other: EccSums) -> EccSums {
        self.count += other.count;
        self.t += other.t;
        self.i += other.i;
        self.ii += other.ii;
        self.ti += other.ti;
        for a in 0..8 {
            self.g[a] += other.g[a];
            self.gt[a] += other.gt[a];
            self.gi[a] += other.gi[a];
            for b in 0..8 {
                self.gg[a][b] += other.gg[a][b];
            }
        }
        self
    }

    fn add_row(&mut self, template: &BandImage, image: &BandImage, gx: &BandImage, gy: &BandImage, warp: &ProjectiveTransform, row: usize) {
        let m = warp.matrix();
        let y = row as f64;
        for col in 0..template.ncols() {
            let x = col as f64;
            let den = m[(2, 0)] * x + m[(2, 1)] * y + m[(2, 2)];
            if den.abs() < f64::EPSILON {
                continue;
            }
            let wx = (m[(0, 0)] * x + m[(0, 1)] * y + m[(0, 2)]) / den;
            let wy = (m[(1, 0)] * x + m[(1, 1)] * y + m[(1, 2)]) / den;

            let (Some(iv), Some(dx), Some(dy)) = (
                sample_bilinear(image, wx, wy),
                sample_bilinear(gx, wx, wy),
                sample_bilinear(gy, wx, wy),
            ) else {
                continue;
            };

            let tv = template[[row, col]] as f64;
            let iv = iv as f64;
            let (dx, dy) = (dx as f64, dy as f64);
            let proj = dx * wx + dy * wy;
            let jacobian = [
                dx * x / den,
                dx * y / den,
                dx / den,
                dy * x / den,
                dy * y / den,
                dy / den,
                -proj * x / den,
                -proj * y / den,
            ];

            self.count += 1;
            self.t += tv;
            self.i += iv;
            self.ii += iv * iv;
            self.ti += tv * iv;
            for a in 0..8 {
                self.g[a] += jacobian[a];
                self.gt[a] += jacobian[a] * tv;
                self.gi[a] += jacobian[a] * iv;
                for b in a..8 {
                    self.gg[a][b] += jacobian[a] * jacobian[b];
                }
            }
        }
    }

    fn symmetrize(mut self) -> Self {
        for a in 0..8 {
            for b in 0..a {
                self.gg[a][b] = self.gg[b][a];
            }
        }
        self
    }
}

fn accumulate_ecc(
    template: &BandImage,
    image: &BandImage,
    gx: &BandImage,
    gy: &BandImage,
    warp: &ProjectiveTransform,
) -> EccSums {
    #[cfg(feature = "parallel")]
    let sums = {
        use rayon::prelude::*;
        (0..template.nrows())
            .into_par_iter()
            .map(|row| {
                let mut sums = EccSums::default();
                sums.add_row(template, image, gx, gy, warp, row);
                sums
            })
            .reduce(EccSums::default, EccSums::merge)
    };

    #[cfg(not(feature = "parallel"))]
    let sums = {
        let mut sums = EccSums::default();
        for row in 0..template.nrows() {
            sums.add_row(template, image, gx, gy, warp, row);
        }
        sums
    };

    sums.symmetrize()
}

/// Inverse of a symmetric matrix after Jacobi (diagonal) preconditioning
fn scaled_inverse(matrix: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let n = matrix.nrows();
    let scale = DVector::from_fn(n, |i, _| {
        let d = matrix[(i, i)];
        if d > 0.0 {
            1.0 / d.sqrt()
        } else {
            1.0
        }
    });
    let scaled = DMatrix::from_fn(n, n, |r, c| matrix[(r, c)] * scale[r] * scale[c]);
    let inverse = scaled.try_inverse()?;
    Some(DMatrix::from_fn(n, n, |r, c| inverse[(r, c)] * scale[r] * scale[c]))
}

/// Percentile-stretched gradient magnitude used as the registration signal
pub fn prepare(image: &BandImage) -> BandResult<BandImage> {
    let limits = percentiles(image.iter().copied(), &[1.0, 99.0]).ok_or_else(|| {
        BandError::Alignment("Band contains no finite pixels".to_string())
    })?;
    if !(limits[1] > limits[0]) {
        return Err(BandError::Alignment(
            "Band is featureless (constant intensity)".to_string(),
        ));
    }

    let stretched = normalize(&image.view(), limits[0], limits[1]);
    let (gx, gy) = gradients(&stretched);
    Ok(ndarray::Zip::from(&gx)
        .and(&gy)
        .map_collect(|&a, &b| (a * a + b * b).sqrt()))
}

/// Central-difference gradients (one-sided at the borders)
pub fn gradients(image: &BandImage) -> (BandImage, BandImage) {
    let (rows, cols) = image.dim();
    let mut gx = Array2::zeros((rows, cols));
    let mut gy = Array2::zeros((rows, cols));
    if rows < 2 || cols < 2 {
        return (gx, gy);
    }

    for r in 0..rows {
        for c in 0..cols {
            gx[[r, c]] = if c == 0 {
                image[[r, 1]] - image[[r, 0]]
            } else if c == cols - 1 {
                image[[r, c]] - image[[r, c - 1]]
            } else {
                (image[[r, c + 1]] - image[[r, c - 1]]) / 2.0
            };
            gy[[r, c]] = if r == 0 {
                image[[1, c]] - image[[0, c]]
            } else if r == rows - 1 {
                image[[r, c]] - image[[r - 1, c]]
            } else {
                (image[[r + 1, c]] - image[[r - 1, c]]) / 2.0
            };
        }
    }

    (gx, gy)
}

/// Halve resolution by 2x2 block averaging
pub fn downsample(image: &BandImage) -> BandImage {
    let (rows, cols) = image.dim();
    let (out_rows, out_cols) = ((rows / 2).max(1), (cols / 2).max(1));
    Array2::from_shape_fn((out_rows, out_cols), |(r, c)| {
        let r0 = (2 * r).min(rows - 1);
        let c0 = (2 * c).min(cols - 1);
        let r1 = (r0 + 1).min(rows - 1);
        let c1 = (c0 + 1).min(cols - 1);
        (image[[r0, c0]] + image[[r0, c1]] + image[[r1, c0]] + image[[r1, c1]]) / 4.0
    })
}

/// Translation `(dx, dy)` such that `moving(x + dx, y + dy) ≈ reference(x, y)`
pub fn phase_correlation(reference: &BandImage, moving: &BandImage) -> BandResult<(f64, f64)> {
    if reference.dim() != moving.dim() {
        return Err(BandError::Alignment(format!(
            "Phase correlation needs equal sizes, got {:?} and {:?}",
            reference.dim(),
            moving.dim()
        )));
    }
    let (rows, cols) = reference.dim();
    if rows < 4 || cols < 4 {
        return Err(BandError::Alignment(format!(
            "Image {}x{} is too small for phase correlation",
            rows, cols
        )));
    }

    let mut planner = FftPlanner::<f64>::new();
    let reference_spectrum = fft2(&mut planner, &windowed(reference), rows, cols, false);
    let moving_spectrum = fft2(&mut planner, &windowed(moving), rows, cols, false);

    let cross: Vec<Complex<f64>> = moving_spectrum
        .iter()
        .zip(&reference_spectrum)
        .map(|(m, r)| {
            let product = m * r.conj();
            let magnitude = product.norm();
            if magnitude > 1e-12 {
                product / magnitude
            } else {
                Complex::new(0.0, 0.0)
            }
        })
        .collect();

    let surface = fft2(&mut planner, &cross, rows, cols, true);
    let (peak_index, _) = surface
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (idx, v)| {
            if v.re > best.1 {
                (idx, v.re)
            } else {
                best
            }
        });
    let (pr, pc) = (peak_index / cols, peak_index % cols);

    let at = |r: usize, c: usize| surface[(r % rows) * cols + (c % cols)].re;
    let centre = at(pr, pc);
    let sub_x = parabolic_offset(at(pr, pc + cols - 1), centre, at(pr, pc + 1));
    let sub_y = parabolic_offset(at(pr + rows - 1, pc), centre, at(pr + 1, pc));

    let wrap = |p: usize, n: usize| if p > n / 2 { p as f64 - n as f64 } else { p as f64 };
    Ok((wrap(pc, cols) + sub_x, wrap(pr, rows) + sub_y))
}

fn parabolic_offset(left: f64, centre: f64, right: f64) -> f64 {
    let denominator = left - 2.0 * centre + right;
    if denominator.abs() < 1e-12 {
        0.0
    } else {
        (0.5 * (left - right) / denominator).clamp(-0.5, 0.5)
    }
}

/// Zero-mean, Hann-windowed complex copy of an image
fn windowed(image: &BandImage) -> Vec<Complex<f64>> {
    let (rows, cols) = image.dim();
    let mean = image.iter().map(|&v| v as f64).sum::<f64>() / image.len() as f64;
    let hann = |i: usize, n: usize| {
        0.5 - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / (n - 1) as f64).cos()
    };

    let mut out = Vec::with_capacity(rows * cols);
    for r in 0..rows {
        let wr = hann(r, rows);
        for c in 0..cols {
            let v = (image[[r, c]] as f64 - mean) * wr * hann(c, cols);
            out.push(Complex::new(v, 0.0));
        }
    }
    out
}

/// Row-major 2D FFT built from 1D transforms along rows then columns
fn fft2(
    planner: &mut FftPlanner<f64>,
    data: &[Complex<f64>],
    rows: usize,
    cols: usize,
    inverse: bool,
) -> Vec<Complex<f64>> {
    let (row_fft, col_fft) = if inverse {
        (planner.plan_fft_inverse(cols), planner.plan_fft_inverse(rows))
    } else {
        (planner.plan_fft_forward(cols), planner.plan_fft_forward(rows))
    };

    let mut buffer = data.to_vec();
    for row in buffer.chunks_mut(cols) {
        row_fft.process(row);
    }

    let mut column = vec![Complex::new(0.0, 0.0); rows];
    for c in 0..cols {
        for r in 0..rows {
            column[r] = buffer[r * cols + c];
        }
        col_fft.process(&mut column);
        for r in 0..rows {
            buffer[r * cols + c] = column[r];
        }
    }

    buffer
}
