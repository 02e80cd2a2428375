//! # Writhe geometric kernel
//!
//! Contribution of one segment pair `(a0, a1)`, `(b0, b1)` to the writhe of a curve,
//! from Gauss's linking integrand discretized over straight segments:
//!
//! 1. unit displacements `b0-a0`, `b1-a0`, `b0-a1`, `b1-a1`
//! 2. sign of `((b1-b0) x (a1-a0)) . (b0-a0)`
//! 3. unit normals of the four faces spanned by cyclically adjacent displacements
//! 4. `sum asin(clamp(n_i . n_{i+1}, -1, 1))`, the solid angle
//! 5. `sign * omega / 2pi`
//!
//! Coplanar or collinear configurations have sign 0 and contribute exactly 0.
//!
//! ## Parameters
//! - **segment_length**: index offset spanned by one segment (default: 1)
//!
//! ## Errors
//! - **EmptyData**: no samples or no points
//! - **InvalidArgument**: shape mismatch, pair index outside the curve, segment length 0
//!
//! ## Returns
//! - **`Ok(WritheOutput)`**: `rows = samples`, `cols = pairs`, row-major, with the pairs used
//! - **`Err(WritheError)`** otherwise

use crate::utilities::data_loader::Trajectory;
use crate::utilities::enums::Kernel;
use crate::utilities::helpers::resolve_kernel;
use crate::utilities::math_functions::{cross3, dot3, sign0, sub3, unit3, WritheFloat};
use crate::writhe::segments::{get_segments, SegmentPair};
use crate::writhe::{WritheError, WritheMatrix};
#[cfg(feature = "python")]
use crate::utilities::kernel_validation::validate_kernel;
#[cfg(feature = "python")]
use numpy::{IntoPyArray, PyArrayDyn, PyArrayMethods, PyReadonlyArrayDyn, PyUntypedArrayMethods};
#[cfg(feature = "python")]
use pyo3::exceptions::PyValueError;
#[cfg(feature = "python")]
use pyo3::prelude::*;
use rayon::prelude::*;

const PAIR_BLOCK: usize = 4096;

/// Writhe contribution of segment `a0 -> a1` against segment `b0 -> b1`.
///
/// Evaluated in the precision of the inputs. A non-finite coordinate yields NaN.
#[inline]
pub fn writhe_pair<T: WritheFloat>(a0: [T; 3], a1: [T; 3], b0: [T; 3], b1: [T; 3]) -> T {
    let d0 = unit3(sub3(b0, a0));
    let d1 = unit3(sub3(b1, a0));
    let d2 = unit3(sub3(b0, a1));
    let d3 = unit3(sub3(b1, a1));

    let sign = sign0(dot3(cross3(sub3(b1, b0), sub3(a1, a0)), d0));
    if sign == T::zero() {
        return T::zero();
    }

    let n = [
        unit3(cross3(d0, d1)),
        unit3(cross3(d1, d3)),
        unit3(cross3(d3, d2)),
        unit3(cross3(d2, d0)),
    ];

    let one = T::one();
    let mut omega = T::zero();
    for i in 0..4 {
        omega = omega + dot3(n[i], n[(i + 1) & 3]).max(-one).min(one).asin();
    }
    sign * omega / T::TAU()
}

#[inline(always)]
fn point_at<T: WritheFloat>(sample: &[T], p: usize) -> [T; 3] {
    [sample[3 * p], sample[3 * p + 1], sample[3 * p + 2]]
}

#[inline]
fn writhe_row_scalar<T: WritheFloat>(sample: &[T], pairs: &[SegmentPair], out: &mut [T]) {
    for (dst, q) in out.iter_mut().zip(pairs) {
        *dst = writhe_pair(
            point_at(sample, q.start1),
            point_at(sample, q.end1),
            point_at(sample, q.start2),
            point_at(sample, q.end2),
        );
    }
}

/// First non-finite coordinate as `(sample, point)`, if any.
pub(crate) fn first_non_finite<T: WritheFloat>(xyz: &[T], n_points: usize) -> Option<(usize, usize)> {
    let i = xyz.iter().position(|v| !v.is_finite())?;
    let p = i / 3;
    Some((p / n_points.max(1), p % n_points.max(1)))
}

fn validate_block<T: WritheFloat>(
    pairs: &[SegmentPair],
    xyz: &[T],
    n_samples: usize,
    n_points: usize,
) -> Result<(), WritheError> {
    if n_samples == 0 || n_points == 0 {
        return Err(WritheError::EmptyData {
            n_samples,
            n_points,
        });
    }
    let expected = n_samples
        .checked_mul(n_points)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| WritheError::InvalidArgument("samples*points*3 overflow".into()))?;
    if xyz.len() != expected {
        return Err(WritheError::InvalidArgument(format!(
            "coordinate buffer has {} values, expected {} ({} samples x {} points x 3)",
            xyz.len(),
            expected,
            n_samples,
            n_points
        )));
    }
    if let Some((s, p)) = first_non_finite(xyz, n_points) {
        return Err(WritheError::InvalidArgument(format!(
            "non-finite coordinate at sample {} point {}",
            s, p
        )));
    }
    if let Some((i, q)) = pairs
        .iter()
        .enumerate()
        .find(|(_, q)| q.max_index() >= n_points)
    {
        return Err(WritheError::InvalidArgument(format!(
            "segment pair {} {:?} indexes past the last point ({})",
            i,
            q.as_array(),
            n_points - 1
        )));
    }
    Ok(())
}

/// Evaluates every pair for every sample of a flat `samples × points × 3` buffer into `out`
/// (`samples × pairs`, row-major), in the precision of the buffer.
pub fn writhe_segments_into_slice<T: WritheFloat>(
    pairs: &[SegmentPair],
    xyz: &[T],
    n_samples: usize,
    n_points: usize,
    kernel: Kernel,
    out: &mut [T],
) -> Result<(), WritheError> {
    validate_block(pairs, xyz, n_samples, n_points)?;
    let cols = pairs.len();
    let expected = n_samples
        .checked_mul(cols)
        .ok_or_else(|| WritheError::InvalidArgument("rows*cols overflow".into()))?;
    if out.len() != expected {
        return Err(WritheError::InvalidArgument(format!(
            "output length {} does not match {} samples x {} pairs",
            out.len(),
            n_samples,
            cols
        )));
    }
    if cols == 0 {
        return Ok(());
    }

    let stride = n_points * 3;
    let sample = |s: usize| &xyz[s * stride..(s + 1) * stride];

    match resolve_kernel(kernel) {
        Kernel::ScalarBatch => {
            if n_samples == 1 {
                let row = sample(0);
                out.par_chunks_mut(PAIR_BLOCK)
                    .enumerate()
                    .for_each(|(b, slice)| {
                        let lo = b * PAIR_BLOCK;
                        writhe_row_scalar(row, &pairs[lo..lo + slice.len()], slice)
                    });
            } else {
                out.par_chunks_mut(cols)
                    .enumerate()
                    .for_each(|(s, slice)| writhe_row_scalar(sample(s), pairs, slice));
            }
        }
        _ => {
            for (s, slice) in out.chunks_mut(cols).enumerate() {
                writhe_row_scalar(sample(s), pairs, slice);
            }
        }
    }
    Ok(())
}

/// [`writhe_segments_into_slice`] into a freshly allocated matrix of the buffer's precision.
pub fn writhe_segments_slice<T: WritheFloat>(
    pairs: &[SegmentPair],
    xyz: &[T],
    n_samples: usize,
    n_points: usize,
    kernel: Kernel,
) -> Result<WritheMatrix<T>, WritheError> {
    let mut out = WritheMatrix::zeros(n_samples, pairs.len());
    writhe_segments_into_slice(pairs, xyz, n_samples, n_points, kernel, &mut out.values)?;
    Ok(out)
}

/// Evaluates every pair for every sample into `out` (`samples × pairs`, row-major).
pub fn writhe_segments_into(
    pairs: &[SegmentPair],
    traj: &Trajectory,
    kernel: Kernel,
    out: &mut [f64],
) -> Result<(), WritheError> {
    writhe_segments_into_slice(pairs, &traj.xyz, traj.n_samples, traj.n_points, kernel, out)
}

/// Per-sample, per-pair writhe contributions. Not summed; see [`WritheMatrix::total`].
pub fn writhe_segments(
    pairs: &[SegmentPair],
    traj: &Trajectory,
    kernel: Kernel,
) -> Result<WritheMatrix, WritheError> {
    writhe_segments_slice(pairs, &traj.xyz, traj.n_samples, traj.n_points, kernel)
}

#[derive(Debug, Clone)]
pub enum WritheData<'a> {
    Trajectory(&'a Trajectory),
    Slice {
        xyz: &'a [f64],
        n_samples: usize,
        n_points: usize,
    },
}

#[derive(Debug, Clone)]
pub struct WritheParams {
    pub segment_length: Option<usize>,
}

impl Default for WritheParams {
    fn default() -> Self {
        Self {
            segment_length: Some(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WritheInput<'a> {
    pub data: WritheData<'a>,
    pub params: WritheParams,
}

impl<'a> WritheInput<'a> {
    #[inline]
    pub fn from_trajectory(traj: &'a Trajectory, params: WritheParams) -> Self {
        Self {
            data: WritheData::Trajectory(traj),
            params,
        }
    }
    #[inline]
    pub fn from_slice(xyz: &'a [f64], n_samples: usize, n_points: usize, params: WritheParams) -> Self {
        Self {
            data: WritheData::Slice {
                xyz,
                n_samples,
                n_points,
            },
            params,
        }
    }
    #[inline]
    pub fn with_default_trajectory(traj: &'a Trajectory) -> Self {
        Self::from_trajectory(traj, WritheParams::default())
    }
    #[inline]
    pub fn get_segment_length(&self) -> usize {
        self.params.segment_length.unwrap_or(1)
    }
    #[inline]
    fn block(&self) -> (&'a [f64], usize, usize) {
        match self.data {
            WritheData::Trajectory(t) => (&t.xyz, t.n_samples, t.n_points),
            WritheData::Slice {
                xyz,
                n_samples,
                n_points,
            } => (xyz, n_samples, n_points),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WritheOutput {
    pub values: Vec<f64>,
    pub pairs: Vec<SegmentPair>,
    pub rows: usize,
    pub cols: usize,
}

impl WritheOutput {
    pub fn row(&self, sample: usize) -> &[f64] {
        &self.values[sample * self.cols..(sample + 1) * self.cols]
    }

    /// Contribution column of `pair` across samples, if `pair` was evaluated.
    pub fn values_for(&self, pair: &SegmentPair) -> Option<Vec<f64>> {
        let col = self.pairs.iter().position(|p| p == pair)?;
        Some((0..self.rows).map(|r| self.values[r * self.cols + col]).collect())
    }

    /// Total writhe per sample.
    pub fn total(&self) -> Vec<f64> {
        if self.cols == 0 {
            return vec![0.0; self.rows];
        }
        self.values
            .chunks_exact(self.cols)
            .map(|row| row.iter().sum())
            .collect()
    }

    pub fn into_matrix(self) -> WritheMatrix {
        WritheMatrix {
            values: self.values,
            rows: self.rows,
            cols: self.cols,
        }
    }
}

#[inline]
pub fn writhe(input: &WritheInput) -> Result<WritheOutput, WritheError> {
    writhe_with_kernel(input, Kernel::Auto)
}

/// All-pairs writhe of the curve (segments over every point, adjacency excluded).
pub fn writhe_with_kernel(input: &WritheInput, kernel: Kernel) -> Result<WritheOutput, WritheError> {
    let (xyz, n_samples, n_points) = input.block();
    if n_samples == 0 || n_points == 0 {
        return Err(WritheError::EmptyData {
            n_samples,
            n_points,
        });
    }
    let pairs = get_segments(Some(n_points), input.get_segment_length(), None, None)?;
    let rows = n_samples;
    let cols = pairs.len();
    let mut values = vec![0.0; rows * cols];
    writhe_segments_into_slice(&pairs, xyz, n_samples, n_points, kernel, &mut values)?;
    Ok(WritheOutput {
        values,
        pairs,
        rows,
        cols,
    })
}

#[derive(Copy, Clone, Debug)]
pub struct WritheBuilder {
    segment_length: Option<usize>,
    kernel: Kernel,
}

impl Default for WritheBuilder {
    fn default() -> Self {
        Self {
            segment_length: None,
            kernel: Kernel::Auto,
        }
    }
}

impl WritheBuilder {
    #[inline(always)]
    pub fn new() -> Self {
        Self::default()
    }
    #[inline(always)]
    pub fn segment_length(mut self, n: usize) -> Self {
        self.segment_length = Some(n);
        self
    }
    #[inline(always)]
    pub fn kernel(mut self, k: Kernel) -> Self {
        self.kernel = k;
        self
    }
    #[inline(always)]
    pub fn apply(self, traj: &Trajectory) -> Result<WritheOutput, WritheError> {
        let p = WritheParams {
            segment_length: self.segment_length,
        };
        writhe_with_kernel(&WritheInput::from_trajectory(traj, p), self.kernel)
    }
    #[inline(always)]
    pub fn apply_slice(
        self,
        xyz: &[f64],
        n_samples: usize,
        n_points: usize,
    ) -> Result<WritheOutput, WritheError> {
        let p = WritheParams {
            segment_length: self.segment_length,
        };
        writhe_with_kernel(&WritheInput::from_slice(xyz, n_samples, n_points, p), self.kernel)
    }
}

/// Segment set precomputed for a fixed curve length, reused across trajectories.
#[derive(Debug, Clone)]
pub struct WritheModule {
    n_points: usize,
    segment_length: usize,
    pairs: Vec<SegmentPair>,
    kernel: Kernel,
}

impl WritheModule {
    pub fn new(n_points: usize, segment_length: usize) -> Result<Self, WritheError> {
        let pairs = get_segments(Some(n_points), segment_length, None, None)?;
        Ok(Self {
            n_points,
            segment_length,
            pairs,
            kernel: Kernel::Auto,
        })
    }

    pub fn with_kernel(mut self, kernel: Kernel) -> Self {
        self.kernel = kernel;
        self
    }

    #[inline]
    pub fn n_points(&self) -> usize {
        self.n_points
    }

    #[inline]
    pub fn segment_length(&self) -> usize {
        self.segment_length
    }

    #[inline]
    pub fn pairs(&self) -> &[SegmentPair] {
        &self.pairs
    }

    /// Re-enumerates the segment set for a new segment length.
    pub fn set_segment_length(&mut self, length: usize) -> Result<(), WritheError> {
        self.pairs = get_segments(Some(self.n_points), length, None, None)?;
        self.segment_length = length;
        Ok(())
    }

    pub fn compute(&self, traj: &Trajectory) -> Result<WritheMatrix, WritheError> {
        if traj.n_points != self.n_points {
            return Err(WritheError::InvalidArgument(format!(
                "module built for {} points, trajectory has {}",
                self.n_points, traj.n_points
            )));
        }
        writhe_segments(&self.pairs, traj, self.kernel)
    }
}

/// Splits a `(points, 3)` or `(samples, points, 3)` shape into `(samples, points)`.
#[cfg(feature = "python")]
pub(crate) fn coordinate_shape(shape: &[usize]) -> PyResult<(usize, usize)> {
    match shape {
        [p, 3] => Ok((1, *p)),
        [s, p, 3] => Ok((*s, *p)),
        other => Err(PyValueError::new_err(format!(
            "writhe: expected xyz of shape (points, 3) or (samples, points, 3), got {:?}",
            other
        ))),
    }
}

#[cfg(feature = "python")]
fn writhe_array_py<'py, T: WritheFloat + numpy::Element>(
    py: Python<'py>,
    xyz: PyReadonlyArrayDyn<'py, T>,
    segment_length: usize,
    kernel: Kernel,
) -> PyResult<Bound<'py, PyAny>> {
    let (n_samples, n_points) = coordinate_shape(xyz.shape())?;
    let slice_in = xyz.as_slice()?;

    let out = py
        .allow_threads(|| -> Result<WritheMatrix<T>, WritheError> {
            if n_samples == 0 || n_points == 0 {
                return Err(WritheError::EmptyData {
                    n_samples,
                    n_points,
                });
            }
            let pairs = get_segments(Some(n_points), segment_length, None, None)?;
            writhe_segments_slice(&pairs, slice_in, n_samples, n_points, kernel)
        })
        .map_err(|e| PyValueError::new_err(e.to_string()))?;
    let (rows, cols) = (out.rows, out.cols);
    Ok(out.values.into_pyarray(py).reshape((rows, cols))?.into_any())
}

/// `float32` input gives a `float32` result; anything else must be `float64`.
#[cfg(feature = "python")]
#[pyfunction(name = "writhe")]
#[pyo3(signature = (xyz, segment_length=1, kernel=None))]
pub fn writhe_py<'py>(
    py: Python<'py>,
    xyz: &Bound<'py, PyAny>,
    segment_length: usize,
    kernel: Option<&str>,
) -> PyResult<Bound<'py, PyAny>> {
    let kern = validate_kernel(kernel, true)?;
    if let Ok(arr) = xyz.downcast::<PyArrayDyn<f32>>() {
        return writhe_array_py(py, arr.readonly(), segment_length, kern);
    }
    let arr = xyz.downcast::<PyArrayDyn<f64>>()?;
    writhe_array_py(py, arr.readonly(), segment_length, kern)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utilities::math_functions::Vec3;
    use crate::writhe::segments::get_segments;
    use std::error::Error;
    use std::f64::consts::PI;

    fn helix(n: usize, pitch: f64) -> Vec<Vec3> {
        (0..n)
            .map(|i| {
                let t = i as f64 * PI / 2.5;
                [t.cos(), t.sin(), pitch * t]
            })
            .collect()
    }

    fn check_writhe_square_is_zero(test: &str, kernel: Kernel) -> Result<(), Box<dyn Error>> {
        let square = Trajectory::from_points(&[
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0],
            [0.0, 1.0, 0.0],
        ]);
        let out = WritheBuilder::new().kernel(kernel).apply(&square)?;
        assert_eq!(out.cols, 1, "[{test}] square has one non-adjacent pair");
        assert_eq!(out.total(), vec![0.0], "[{test}] planar curve must have zero writhe");
        Ok(())
    }

    fn check_writhe_collinear_is_zero(test: &str, kernel: Kernel) -> Result<(), Box<dyn Error>> {
        let line = Trajectory::from_points(&[
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [2.0, 0.0, 0.0],
            [3.0, 0.0, 0.0],
        ]);
        let out = WritheBuilder::new().kernel(kernel).apply(&line)?;
        for &v in &out.values {
            assert_eq!(v, 0.0, "[{test}] collinear contribution must be exactly 0");
        }
        Ok(())
    }

    fn check_writhe_helix_known_value(test: &str, kernel: Kernel) -> Result<(), Box<dyn Error>> {
        let traj = Trajectory::from_points(&helix(6, 0.5));
        let out = WritheBuilder::new().kernel(kernel).apply(&traj)?;
        let expected = [
            0.0242445229,
            0.0384950927,
            0.0322325871,
            0.0242445229,
            0.0384950927,
            0.0242445229,
        ];
        assert_eq!(out.cols, expected.len());
        for (i, (&v, &e)) in out.values.iter().zip(expected.iter()).enumerate() {
            assert!((v - e).abs() < 1e-9, "[{test}] pair {i}: got {v}, expected {e}");
        }
        let total = out.total()[0];
        assert!(total > 0.0, "[{test}] right-handed helix must have positive writhe");
        assert!((total - 0.18195634132324676).abs() < 1e-9, "[{test}] total {total}");
        Ok(())
    }

    fn check_writhe_mirror_flips_sign(test: &str, kernel: Kernel) -> Result<(), Box<dyn Error>> {
        let traj = Trajectory::from_samples(&[helix(10, 0.5), helix(10, 1.3)])?;
        let a = WritheBuilder::new().kernel(kernel).apply(&traj)?;
        let b = WritheBuilder::new().kernel(kernel).apply(&traj.mirrored())?;
        for (i, (&x, &y)) in a.values.iter().zip(b.values.iter()).enumerate() {
            assert!((x + y).abs() < 1e-12, "[{test}] pair {i}: {x} vs mirrored {y}");
        }
        Ok(())
    }

    fn check_writhe_perpendicular_pair(test: &str, kernel: Kernel) -> Result<(), Box<dyn Error>> {
        // two length-2 segments crossing at unit distance subtend a third of the sphere
        let w: f64 = writhe_pair([-1.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, -1.0, 1.0], [0.0, 1.0, 1.0]);
        assert!((w + 1.0 / 3.0).abs() < 1e-12, "[{test}] got {w}");
        let touching = writhe_pair([0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.5, -0.5, 1.0], [0.5, 0.5, -1.0]);
        assert_eq!(touching, 0.0, "[{test}] intersecting segments");
        Ok(())
    }

    fn check_writhe_idempotent(test: &str, kernel: Kernel) -> Result<(), Box<dyn Error>> {
        let traj = Trajectory::from_samples(&[helix(20, 0.4), helix(20, 0.9), helix(20, 2.0)])?;
        let pairs = get_segments(Some(20), 2, None, None)?;
        let a = writhe_segments(&pairs, &traj, kernel)?;
        let b = writhe_segments(&pairs, &traj, kernel)?;
        assert_eq!(a.values, b.values, "[{test}] results must be bit-identical");
        Ok(())
    }

    fn check_writhe_matches_scalar(test: &str, kernel: Kernel) -> Result<(), Box<dyn Error>> {
        let traj = Trajectory::from_samples(&[helix(30, 0.3), helix(30, 0.7)])?;
        let pairs = get_segments(Some(30), 1, None, None)?;
        let a = writhe_segments(&pairs, &traj, kernel)?;
        let b = writhe_segments(&pairs, &traj, Kernel::Scalar)?;
        assert_eq!(a.values, b.values, "[{test}] kernel disagrees with scalar");
        Ok(())
    }

    fn check_writhe_chunks_concat(test: &str, kernel: Kernel) -> Result<(), Box<dyn Error>> {
        let traj = Trajectory::from_samples(&[helix(16, 0.5), helix(16, 1.5)])?;
        let pairs = get_segments(Some(16), 1, None, None)?;
        let whole = writhe_segments(&pairs, &traj, kernel)?;
        for size in [1usize, 3, 7, 50] {
            let parts = pairs
                .chunks(size)
                .map(|c| writhe_segments(c, &traj, kernel))
                .collect::<Result<Vec<_>, _>>()?;
            let joined = WritheMatrix::concat_cols(&parts)?;
            assert_eq!(joined, whole, "[{test}] chunk size {size}");
        }
        Ok(())
    }

    fn check_writhe_empty_data(test: &str, kernel: Kernel) -> Result<(), Box<dyn Error>> {
        let xyz: [f64; 0] = [];
        let res = WritheBuilder::new().kernel(kernel).apply_slice(&xyz, 0, 0);
        assert!(matches!(res, Err(WritheError::EmptyData { .. })), "[{test}] expected EmptyData");
        Ok(())
    }

    fn check_writhe_pair_out_of_range(test: &str, kernel: Kernel) -> Result<(), Box<dyn Error>> {
        let traj = Trajectory::from_points(&helix(5, 0.5));
        let pairs = vec![SegmentPair::new(0, 1, 4, 5)];
        let res = writhe_segments(&pairs, &traj, kernel);
        assert!(matches!(res, Err(WritheError::InvalidArgument(_))), "[{test}] expected InvalidArgument");
        Ok(())
    }

    fn check_writhe_slice_shape_mismatch(test: &str, kernel: Kernel) -> Result<(), Box<dyn Error>> {
        let xyz = vec![0.0; 11];
        let res = WritheBuilder::new().kernel(kernel).apply_slice(&xyz, 1, 4);
        assert!(matches!(res, Err(WritheError::InvalidArgument(_))), "[{test}] expected InvalidArgument");
        Ok(())
    }

    fn check_writhe_segment_length(test: &str, kernel: Kernel) -> Result<(), Box<dyn Error>> {
        let traj = Trajectory::from_points(&helix(12, 0.5));
        let out = WritheBuilder::new().segment_length(3).kernel(kernel).apply(&traj)?;
        assert_eq!(out.pairs, get_segments(Some(12), 3, None, None)?);
        assert_eq!(out.cols, out.pairs.len());
        let col = out.values_for(&out.pairs[0]).expect("first pair present");
        assert_eq!(col.len(), 1);
        Ok(())
    }

    fn check_writhe_module(test: &str, kernel: Kernel) -> Result<(), Box<dyn Error>> {
        let traj = Trajectory::from_samples(&[helix(14, 0.5), helix(14, 0.8)])?;
        let mut module = WritheModule::new(14, 1)?.with_kernel(kernel);
        let a = module.compute(&traj)?;
        assert_eq!(a.values, WritheBuilder::new().kernel(kernel).apply(&traj)?.values);
        module.set_segment_length(2)?;
        assert_eq!(module.segment_length(), 2);
        let b = module.compute(&traj)?;
        assert_eq!(b.cols, module.pairs().len());
        let short = Trajectory::from_points(&helix(9, 0.5));
        assert!(module.compute(&short).is_err(), "[{test}] point count mismatch must fail");
        Ok(())
    }

    fn check_writhe_non_finite_rejected(test: &str, kernel: Kernel) -> Result<(), Box<dyn Error>> {
        let mut traj = Trajectory::from_samples(&[helix(8, 0.5), helix(8, 0.9)])?;
        traj.xyz[(8 + 3) * 3 + 1] = f64::NAN;
        let pairs = get_segments(Some(8), 1, None, None)?;
        match writhe_segments(&pairs, &traj, kernel) {
            Err(WritheError::InvalidArgument(msg)) => {
                assert!(msg.contains("sample 1 point 3"), "[{test}] {msg}")
            }
            other => panic!("[{test}] expected InvalidArgument, got {:?}", other),
        }
        traj.xyz[(8 + 3) * 3 + 1] = f64::INFINITY;
        assert!(
            matches!(WritheBuilder::new().kernel(kernel).apply(&traj), Err(WritheError::InvalidArgument(_))),
            "[{test}] infinite coordinate must be rejected"
        );
        Ok(())
    }

    fn check_writhe_f32_precision(test: &str, kernel: Kernel) -> Result<(), Box<dyn Error>> {
        let traj = Trajectory::from_samples(&[helix(24, 0.4), helix(24, 1.1)])?;
        let pairs = get_segments(Some(24), 1, None, None)?;
        let xyz32: Vec<f32> = traj.xyz.iter().map(|&v| v as f32).collect();
        let lo: WritheMatrix<f32> = writhe_segments_slice(&pairs, &xyz32, 2, 24, kernel)?;
        let hi = writhe_segments(&pairs, &traj, kernel)?;
        assert_eq!((lo.rows, lo.cols), (hi.rows, hi.cols));
        for (i, (&a, &b)) in lo.values.iter().zip(hi.values.iter()).enumerate() {
            assert!(((a as f64) - b).abs() < 1e-4, "[{test}] pair {i}: f32 {a} vs f64 {b}");
        }
        for (a, b) in lo.total().iter().zip(hi.total()) {
            assert!(((*a as f64) - b).abs() < 1e-3, "[{test}] total f32 {a} vs f64 {b}");
        }
        let mut bad = xyz32.clone();
        bad[0] = f32::NAN;
        assert!(writhe_segments_slice(&pairs, &bad, 2, 24, kernel).is_err(), "[{test}] NaN in f32 input");
        Ok(())
    }

    #[test]
    fn writhe_pair_propagates_nan() {
        let w = writhe_pair([f64::NAN, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, -1.0, 1.0], [0.0, 1.0, 1.0]);
        assert!(w.is_nan(), "got {w}");
        let w32 = writhe_pair([-1.0f32, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, -1.0, 1.0], [0.0, 1.0, f32::NAN]);
        assert!(w32.is_nan(), "got {w32}");
    }

    macro_rules! generate_all_writhe_tests {
        ($($test_fn:ident),*) => {
            paste::paste! {
                $( #[test] fn [<$test_fn _scalar>]() { $test_fn(stringify!([<$test_fn _scalar>]), Kernel::Scalar).unwrap(); } )*
                $( #[test] fn [<$test_fn _scalar_batch>]() { $test_fn(stringify!([<$test_fn _scalar_batch>]), Kernel::ScalarBatch).unwrap(); } )*
                $( #[test] fn [<$test_fn _auto_detect>]() { $test_fn(stringify!([<$test_fn _auto_detect>]), Kernel::Auto).unwrap(); } )*
            }
        }
    }

    generate_all_writhe_tests!(
        check_writhe_square_is_zero,
        check_writhe_collinear_is_zero,
        check_writhe_helix_known_value,
        check_writhe_mirror_flips_sign,
        check_writhe_perpendicular_pair,
        check_writhe_idempotent,
        check_writhe_matches_scalar,
        check_writhe_chunks_concat,
        check_writhe_empty_data,
        check_writhe_pair_out_of_range,
        check_writhe_slice_shape_mismatch,
        check_writhe_segment_length,
        check_writhe_module,
        check_writhe_non_finite_rejected,
        check_writhe_f32_precision
    );
}
