//! # Segment-pair enumeration
//!
//! A segment is the chord `(x[i], x[i + length])` of an index sequence `x`. Pairs are
//! returned as quadruplets `(start1, end1, start2, end2)` in a stable order: combinations
//! in lexicographic order for a single index set, row-major cross product for two.
//!
//! ## Modes
//! - **Points** (`n`, no indices): segments over `0..n`, unordered pairs, pairs with
//!   `end1 == start2` dropped.
//! - **Indices** (`index0` only): same rule over the supplied indices.
//! - **Cross** (`index0` and `index1`): every segment of `index0` against every segment
//!   of `index1`, nothing dropped.
//!
//! Only exact adjacency is excluded. For `length > 1`, pairs whose intervals overlap
//! without touching (`start2 < end1`, `end1 != start2`) are kept.

use crate::writhe::WritheError;
#[cfg(feature = "python")]
use numpy::{IntoPyArray, PyArray2, PyArrayMethods};
#[cfg(feature = "python")]
use pyo3::exceptions::PyValueError;
#[cfg(feature = "python")]
use pyo3::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentPair {
    pub start1: usize,
    pub end1: usize,
    pub start2: usize,
    pub end2: usize,
}

impl SegmentPair {
    #[inline(always)]
    pub const fn new(start1: usize, end1: usize, start2: usize, end2: usize) -> Self {
        Self {
            start1,
            end1,
            start2,
            end2,
        }
    }

    #[inline(always)]
    pub const fn as_array(&self) -> [usize; 4] {
        [self.start1, self.end1, self.start2, self.end2]
    }

    #[inline(always)]
    pub fn max_index(&self) -> usize {
        self.start1.max(self.end1).max(self.start2).max(self.end2)
    }
}

impl From<[usize; 4]> for SegmentPair {
    fn from(q: [usize; 4]) -> Self {
        Self::new(q[0], q[1], q[2], q[3])
    }
}

impl From<SegmentPair> for [usize; 4] {
    fn from(p: SegmentPair) -> Self {
        p.as_array()
    }
}

#[derive(Debug, Clone, Copy)]
pub enum SegmentInput<'a> {
    Points(usize),
    Indices(&'a [usize]),
    Cross(&'a [usize], &'a [usize]),
}

/// Chords `(x[i], x[i + shift])` for every `i` with `i + shift < x.len()`.
#[inline]
pub fn shifted_pairs(x: &[usize], shift: usize) -> Vec<(usize, usize)> {
    if shift == 0 || x.len() <= shift {
        return Vec::new();
    }
    x.iter()
        .zip(x[shift..].iter())
        .map(|(&a, &b)| (a, b))
        .collect()
}

fn combinations_nonadjacent(segments: &[(usize, usize)]) -> Vec<SegmentPair> {
    let m = segments.len();
    let mut out = Vec::with_capacity(m.saturating_mul(m.saturating_sub(1)) / 2);
    for i in 0..m {
        let (s1, e1) = segments[i];
        for &(s2, e2) in &segments[i + 1..] {
            if e1 != s2 {
                out.push(SegmentPair::new(s1, e1, s2, e2));
            }
        }
    }
    out
}

fn cross_product(a: &[(usize, usize)], b: &[(usize, usize)]) -> Vec<SegmentPair> {
    let mut out = Vec::with_capacity(a.len().saturating_mul(b.len()));
    for &(s1, e1) in a {
        for &(s2, e2) in b {
            out.push(SegmentPair::new(s1, e1, s2, e2));
        }
    }
    out
}

/// Typed entry point over [`SegmentInput`].
pub fn segment_pairs(input: &SegmentInput, length: usize) -> Result<Vec<SegmentPair>, WritheError> {
    if length == 0 {
        return Err(WritheError::InvalidArgument(
            "segment length must be at least 1".into(),
        ));
    }
    Ok(match *input {
        SegmentInput::Points(n) => {
            let idx: Vec<usize> = (0..n).collect();
            combinations_nonadjacent(&shifted_pairs(&idx, length))
        }
        SegmentInput::Indices(index0) => combinations_nonadjacent(&shifted_pairs(index0, length)),
        SegmentInput::Cross(index0, index1) => cross_product(
            &shifted_pairs(index0, length),
            &shifted_pairs(index1, length),
        ),
    })
}

/// Enumerates segment pairs from either a point count or explicit index arrays.
///
/// Indices take precedence over `n` when given. Supplying `index1` without `index0`, or
/// supplying neither indices nor `n`, is an `InvalidArgument`.
pub fn get_segments(
    n: Option<usize>,
    length: usize,
    index0: Option<&[usize]>,
    index1: Option<&[usize]>,
) -> Result<Vec<SegmentPair>, WritheError> {
    let input = match (index0, index1) {
        (None, None) => match n {
            Some(n) => SegmentInput::Points(n),
            None => {
                return Err(WritheError::InvalidArgument(
                    "must provide indices (index0, optionally index1) or the number of points".into(),
                ))
            }
        },
        (None, Some(_)) => {
            return Err(WritheError::InvalidArgument(
                "index1 given without index0; a single index set must be passed as index0".into(),
            ))
        }
        (Some(i0), None) => SegmentInput::Indices(i0),
        (Some(i0), Some(i1)) => SegmentInput::Cross(i0, i1),
    };
    segment_pairs(&input, length)
}

/// Closed-form pair count for a single index set of `n` entries.
///
/// `m = n - length` segments give `m(m-1)/2` combinations, of which the `m - length`
/// pairs `(i, i + length)` are adjacent and dropped.
pub fn expected_pair_count(n: usize, length: usize) -> usize {
    if length == 0 || n <= length {
        return 0;
    }
    let m = n - length;
    m * (m - 1) / 2 - m.saturating_sub(length)
}

#[cfg(feature = "python")]
#[pyfunction(name = "writhe_segments")]
#[pyo3(signature = (n=None, length=1, index0=None, index1=None))]
pub fn writhe_segments_py<'py>(
    py: Python<'py>,
    n: Option<usize>,
    length: usize,
    index0: Option<Vec<usize>>,
    index1: Option<Vec<usize>>,
) -> PyResult<Bound<'py, PyArray2<i64>>> {
    let pairs = get_segments(n, length, index0.as_deref(), index1.as_deref())
        .map_err(|e| PyValueError::new_err(e.to_string()))?;
    let rows = pairs.len();
    let flat: Vec<i64> = pairs
        .iter()
        .flat_map(|p| p.as_array())
        .map(|v| v as i64)
        .collect();
    flat.into_pyarray(py).reshape((rows, 4))
}
