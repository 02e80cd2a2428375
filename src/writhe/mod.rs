//! # Writhe
//!
//! Writhe of a discretized space curve, summed from closed-form contributions of
//! segment pairs. The computation is split into:
//!
//! - [`segments`]: enumerates the ordered segment-pair set
//! - [`kernel`]: the per-pair geometric formula (CPU)
//! - [`memory`]: linear peak-memory model for a batched evaluation
//! - [`planner`]: memory-bounded chunking of the pair set
//! - [`device`] / [`dispatch`]: device capabilities and chunk execution across devices
//!
//! ## Errors
//! - **InvalidArgument**: malformed enumerator input, shapes or pair indices
//! - **EmptyData**: no samples or no points
//! - **ResourceExhaustion**: the memory budget does not fit a single pair
//! - **DeviceUnavailable**: no accelerator / empty device pool
//! - **WorkerFailure**: a chunk failed on a device; carries the chunk index and device id

pub mod device;
pub mod dispatch;
pub mod kernel;
pub mod memory;
pub mod planner;
pub mod segments;

pub use device::{CpuDevice, DevicePool, MemoryInfo, WritheDevice, WritheSession};
pub use dispatch::{
    calc_writhe_parallel, Chunk, DeviceTask, DistributedExecutor, ExecutionMode, Executor,
    LocalExecutor, WritheDispatcher,
};
pub use kernel::{
    writhe, writhe_pair, writhe_segments, writhe_segments_into, writhe_segments_into_slice,
    writhe_segments_slice, writhe_with_kernel, WritheBuilder, WritheInput, WritheModule,
    WritheOutput, WritheParams,
};
pub use memory::MemoryCostModel;
pub use planner::{BatchPlan, BatchPlanner, MemoryBudget, PlannerConfig};
pub use segments::{get_segments, segment_pairs, SegmentInput, SegmentPair};

use thiserror::Error;

use crate::utilities::math_functions::WritheFloat;

#[derive(Debug, Error)]
pub enum WritheError {
    #[error("writhe: invalid argument: {0}")]
    InvalidArgument(String),
    #[error("writhe: empty coordinate data (samples={n_samples}, points={n_points})")]
    EmptyData { n_samples: usize, n_points: usize },
    #[error("writhe: memory budget exhausted: budget={budget_gb:.3} GB, batch size={batch_size}")]
    ResourceExhaustion { budget_gb: f64, batch_size: i64 },
    #[error("writhe: device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("writhe: device error: {0}")]
    Device(String),
    #[error("writhe: chunk {chunk} failed on device {device}: {source}")]
    WorkerFailure {
        device: usize,
        chunk: usize,
        #[source]
        source: Box<WritheError>,
    },
}

/// Writhe contributions laid out as `rows = samples`, `cols = segment pairs`, row-major.
///
/// Column order is the order of the segment-pair set the matrix was computed from. The
/// element type follows the coordinate precision.
#[derive(Debug, Clone, PartialEq)]
pub struct WritheMatrix<T = f64> {
    pub values: Vec<T>,
    pub rows: usize,
    pub cols: usize,
}

impl<T: WritheFloat> WritheMatrix<T> {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            values: vec![T::zero(); rows * cols],
            rows,
            cols,
        }
    }

    #[inline]
    pub fn row(&self, r: usize) -> &[T] {
        &self.values[r * self.cols..(r + 1) * self.cols]
    }

    /// Total writhe per sample (sum over the pair axis).
    pub fn total(&self) -> Vec<T> {
        if self.cols == 0 {
            return vec![T::zero(); self.rows];
        }
        self.values
            .chunks_exact(self.cols)
            .map(|row| row.iter().fold(T::zero(), |acc, &v| acc + v))
            .collect()
    }

    /// Concatenates matrices along the pair axis, in the given order.
    pub fn concat_cols(parts: &[Self]) -> Result<Self, WritheError> {
        let rows = match parts.first() {
            Some(p) => p.rows,
            None => return Ok(Self::zeros(0, 0)),
        };
        if let Some(bad) = parts.iter().find(|p| p.rows != rows) {
            return Err(WritheError::InvalidArgument(format!(
                "cannot concatenate blocks with {} and {} samples",
                rows, bad.rows
            )));
        }
        let cols: usize = parts.iter().map(|p| p.cols).sum();
        let mut out = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for p in parts {
                out.extend_from_slice(p.row(r));
            }
        }
        Ok(Self {
            values: out,
            rows,
            cols,
        })
    }
}
