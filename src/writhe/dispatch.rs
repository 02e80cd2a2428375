//! # Chunk dispatch
//!
//! Runs a [`BatchPlan`] on a [`DevicePool`] and reassembles the result in segment-pair order.
//!
//! - everything fits in one chunk: one call on the primary device
//! - one device, or less than `parallel_threshold` batches of work: every chunk in order on the
//!   primary device
//! - otherwise the chunk list is split into one balanced sub-list per device and each device
//!   works through its sub-list; outputs are joined in device assignment order, never in
//!   completion order
//!
//! How the per-device work is scheduled is the [`Executor`]'s business, selected by the caller
//! through [`ExecutionMode`]. The coordinates are shared read-only behind an `Arc`.
//!
//! ## Errors
//! - **InvalidArgument** / **EmptyData**: raised before any device is touched
//! - **ResourceExhaustion**: from the planner
//! - **WorkerFailure**: any chunk failure; names the global chunk index and the device id

use std::ops::Range;
use std::sync::Arc;
use std::thread;

use crate::utilities::data_loader::Trajectory;
use crate::utilities::helpers::split_list;
use crate::writhe::device::{DevicePool, WritheDevice};
use crate::writhe::kernel::first_non_finite;
use crate::writhe::memory::MemoryCostModel;
use crate::writhe::planner::{BatchPlan, BatchPlanner, MemoryBudget, PlannerConfig};
use crate::writhe::segments::SegmentPair;
use crate::writhe::{WritheError, WritheMatrix};
#[cfg(feature = "python")]
use numpy::{
    IntoPyArray, PyArrayDyn, PyArrayMethods, PyReadonlyArray2, PyUntypedArrayMethods,
};
#[cfg(feature = "python")]
use pyo3::exceptions::{PyRuntimeError, PyValueError};
#[cfg(feature = "python")]
use pyo3::prelude::*;

/// A contiguous slice of the segment-pair set bound to the device with id `device`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub range: Range<usize>,
    pub device: usize,
}

#[derive(Debug, Clone)]
pub struct DeviceTask {
    pub device: Arc<dyn WritheDevice>,
    pub chunks: Vec<Chunk>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Device tasks run one after another on the calling thread.
    #[default]
    Local,
    /// One worker thread per device task.
    Distributed,
}

/// Numbers the chunks globally and deals them out into at most `device_ids.len()` balanced
/// lists, the i-th list tagged with `device_ids[i]`.
pub fn assign_chunks(ranges: &[Range<usize>], device_ids: &[usize]) -> Vec<Vec<Chunk>> {
    let numbered: Vec<(usize, Range<usize>)> = ranges.iter().cloned().enumerate().collect();
    split_list(&numbered, device_ids.len())
        .into_iter()
        .zip(device_ids)
        .map(|(part, &device)| {
            part.into_iter()
                .map(|(index, range)| Chunk {
                    index,
                    range,
                    device,
                })
                .collect()
        })
        .collect()
}

fn run_task(
    task: &DeviceTask,
    traj: &Trajectory,
    pairs: &[SegmentPair],
) -> Result<WritheMatrix, WritheError> {
    let device = task.device.id();
    let fail = |chunk: usize, e: WritheError| WritheError::WorkerFailure {
        device,
        chunk,
        source: Box::new(e),
    };
    let first = match task.chunks.first() {
        Some(c) => c.index,
        None => return Ok(WritheMatrix::zeros(traj.n_samples, 0)),
    };

    log::debug!(
        "writhe worker: device {} starting {} chunk(s) from chunk {}",
        device,
        task.chunks.len(),
        first
    );
    let mut session = task.device.open().map_err(|e| fail(first, e))?;
    let mut parts = Vec::with_capacity(task.chunks.len());
    for chunk in &task.chunks {
        let block = pairs.get(chunk.range.clone()).ok_or_else(|| {
            fail(
                chunk.index,
                WritheError::InvalidArgument(format!(
                    "chunk range {:?} outside {} pairs",
                    chunk.range,
                    pairs.len()
                )),
            )
        })?;
        let m = session.compute(block, traj).map_err(|e| fail(chunk.index, e))?;
        if m.rows != traj.n_samples || m.cols != block.len() {
            return Err(fail(
                chunk.index,
                WritheError::Device(format!(
                    "device returned {}x{} for {} samples x {} pairs",
                    m.rows,
                    m.cols,
                    traj.n_samples,
                    block.len()
                )),
            ));
        }
        parts.push(m);
    }
    drop(session);
    log::debug!("writhe worker: device {} done", device);
    WritheMatrix::concat_cols(&parts)
}

pub trait Executor {
    /// Runs every task and returns one matrix per task, in task order.
    fn execute(
        &self,
        tasks: Vec<DeviceTask>,
        shared: &Arc<Trajectory>,
        pairs: &[SegmentPair],
    ) -> Result<Vec<WritheMatrix>, WritheError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalExecutor;

impl Executor for LocalExecutor {
    fn execute(
        &self,
        tasks: Vec<DeviceTask>,
        shared: &Arc<Trajectory>,
        pairs: &[SegmentPair],
    ) -> Result<Vec<WritheMatrix>, WritheError> {
        tasks
            .iter()
            .map(|t| run_task(t, shared, pairs))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DistributedExecutor;

impl Executor for DistributedExecutor {
    fn execute(
        &self,
        tasks: Vec<DeviceTask>,
        shared: &Arc<Trajectory>,
        pairs: &[SegmentPair],
    ) -> Result<Vec<WritheMatrix>, WritheError> {
        let results: Vec<Result<WritheMatrix, WritheError>> = thread::scope(|s| {
            let handles: Vec<_> = tasks
                .iter()
                .map(|task| {
                    let traj = Arc::clone(shared);
                    s.spawn(move || run_task(task, &traj, pairs))
                })
                .collect();
            // join in assignment order; every worker finishes before any error is reported
            handles
                .into_iter()
                .zip(tasks.iter())
                .map(|(h, task)| {
                    h.join().unwrap_or_else(|_| {
                        Err(WritheError::WorkerFailure {
                            device: task.device.id(),
                            chunk: task.chunks.first().map(|c| c.index).unwrap_or(0),
                            source: Box::new(WritheError::Device("worker panicked".into())),
                        })
                    })
                })
                .collect()
        });
        results.into_iter().collect()
    }
}

pub struct WritheDispatcher {
    pool: DevicePool,
    planner: BatchPlanner,
}

impl WritheDispatcher {
    pub fn new(pool: DevicePool, planner: BatchPlanner) -> Self {
        Self { pool, planner }
    }

    #[inline]
    pub fn pool(&self) -> &DevicePool {
        &self.pool
    }

    #[inline]
    pub fn planner(&self) -> &BatchPlanner {
        &self.planner
    }

    fn validate(pairs: &[SegmentPair], traj: &Trajectory) -> Result<(), WritheError> {
        if traj.is_empty() {
            return Err(WritheError::EmptyData {
                n_samples: traj.n_samples,
                n_points: traj.n_points,
            });
        }
        if let Some((s, p)) = first_non_finite(&traj.xyz, traj.n_points) {
            return Err(WritheError::InvalidArgument(format!(
                "non-finite coordinate at sample {} point {}",
                s, p
            )));
        }
        if let Some((i, q)) = pairs
            .iter()
            .enumerate()
            .find(|(_, q)| q.max_index() >= traj.n_points)
        {
            return Err(WritheError::InvalidArgument(format!(
                "segment pair {} {:?} indexes past the last point ({})",
                i,
                q.as_array(),
                traj.n_points - 1
            )));
        }
        Ok(())
    }

    /// Sizes batches against the primary device's live free memory.
    pub fn plan(&self, n_pairs: usize, n_samples: usize) -> Result<BatchPlan, WritheError> {
        let info = self.pool.primary().memory_info()?;
        let budget = MemoryBudget::from_memory_info(info, self.planner.config.safety_margin_gb);
        self.planner.plan(n_pairs, n_samples, budget)
    }

    /// Device tasks for `plan`, following the single/sequential/parallel policy.
    pub fn tasks_for(&self, plan: &BatchPlan) -> Vec<DeviceTask> {
        let devices = self.pool.devices();
        if plan.is_parallel_worthy(devices.len(), self.planner.config.parallel_threshold) {
            let ids: Vec<usize> = devices.iter().map(|d| d.id()).collect();
            assign_chunks(&plan.chunks, &ids)
                .into_iter()
                .zip(devices)
                .map(|(chunks, device)| DeviceTask {
                    device: Arc::clone(device),
                    chunks,
                })
                .collect()
        } else {
            let primary = self.pool.primary();
            vec![DeviceTask {
                device: Arc::clone(primary),
                chunks: assign_chunks(&plan.chunks, &[primary.id()])
                    .into_iter()
                    .flatten()
                    .collect(),
            }]
        }
    }

    pub fn compute(
        &self,
        pairs: &[SegmentPair],
        traj: &Arc<Trajectory>,
        mode: ExecutionMode,
    ) -> Result<WritheMatrix, WritheError> {
        Self::validate(pairs, traj)?;
        if pairs.is_empty() {
            return Ok(WritheMatrix::zeros(traj.n_samples, 0));
        }
        let plan = self.plan(pairs.len(), traj.n_samples)?;
        let tasks = self.tasks_for(&plan);
        log::info!(
            "writhe dispatch: {} pairs x {} samples, {} chunk(s) of <= {} on {} device(s), {:?}",
            pairs.len(),
            traj.n_samples,
            plan.n_chunks(),
            plan.batch_size,
            tasks.len(),
            mode
        );
        let parts = match mode {
            ExecutionMode::Local => LocalExecutor.execute(tasks, traj, pairs)?,
            ExecutionMode::Distributed => DistributedExecutor.execute(tasks, traj, pairs)?,
        };
        WritheMatrix::concat_cols(&parts)
    }
}

/// Chunked, memory-bounded writhe over every device of `pool`, with the default cost model
/// and [`PlannerConfig::from_env`]. Workers share `traj` without copying it.
pub fn calc_writhe_parallel(
    pairs: &[SegmentPair],
    traj: &Arc<Trajectory>,
    pool: &DevicePool,
) -> Result<WritheMatrix, WritheError> {
    let planner = BatchPlanner::new(MemoryCostModel::default(), PlannerConfig::from_env());
    let dispatcher = WritheDispatcher::new(pool.clone(), planner);
    dispatcher.compute(pairs, traj, ExecutionMode::Distributed)
}

#[cfg(feature = "python")]
#[pyfunction(name = "calc_writhe_parallel")]
#[pyo3(signature = (segments, xyz, reduce_batch_size=0, device="cpu"))]
pub fn calc_writhe_parallel_py<'py>(
    py: Python<'py>,
    segments: PyReadonlyArray2<'py, i64>,
    xyz: &Bound<'py, PyAny>,
    reduce_batch_size: usize,
    device: &str,
) -> PyResult<Bound<'py, PyAny>> {
    let seg_shape = segments.shape();
    if seg_shape[1] != 4 {
        return Err(PyValueError::new_err(format!(
            "calc_writhe_parallel: segments must have shape (pairs, 4), got {:?}",
            seg_shape
        )));
    }
    let pairs = segments
        .as_slice()?
        .chunks_exact(4)
        .map(|q| {
            if q.iter().any(|&v| v < 0) {
                return Err(PyValueError::new_err(format!(
                    "calc_writhe_parallel: negative index in segment {:?}",
                    q
                )));
            }
            Ok(SegmentPair::new(q[0] as usize, q[1] as usize, q[2] as usize, q[3] as usize))
        })
        .collect::<PyResult<Vec<_>>>()?;

    // float32 coordinates are widened for the devices and the result narrowed back
    let (shape, flat, single) = if let Ok(arr) = xyz.downcast::<PyArrayDyn<f32>>() {
        let ro = arr.readonly();
        let wide: Vec<f64> = ro.as_slice()?.iter().map(|&v| v as f64).collect();
        (ro.shape().to_vec(), wide, true)
    } else {
        let ro = xyz.downcast::<PyArrayDyn<f64>>()?.readonly();
        (ro.shape().to_vec(), ro.as_slice()?.to_vec(), false)
    };
    let (n_samples, n_points) = crate::writhe::kernel::coordinate_shape(&shape)?;
    let traj = Trajectory::new(flat, n_samples, n_points)
        .map_err(|e| PyValueError::new_err(e.to_string()))?;

    let pool = match device.trim().to_ascii_lowercase().as_str() {
        "cpu" => DevicePool::cpu(),
        "cuda" | "gpu" => DevicePool::cuda().map_err(|e| PyRuntimeError::new_err(e.to_string()))?,
        other => {
            return Err(PyValueError::new_err(format!(
                "calc_writhe_parallel: unknown device '{}': expected 'cpu' or 'cuda'",
                other
            )))
        }
    };
    let mut config = PlannerConfig::from_env();
    if reduce_batch_size > 0 {
        config = config.with_reduce_batch_size(reduce_batch_size);
    }
    let planner = BatchPlanner::new(MemoryCostModel::default(), config);
    let dispatcher = WritheDispatcher::new(pool, planner);
    let shared = Arc::new(traj);

    let out = py
        .allow_threads(|| dispatcher.compute(&pairs, &shared, ExecutionMode::Distributed))
        .map_err(|e| match e {
            WritheError::InvalidArgument(_) | WritheError::EmptyData { .. } => {
                PyValueError::new_err(e.to_string())
            }
            _ => PyRuntimeError::new_err(e.to_string()),
        })?;
    let (rows, cols) = (out.rows, out.cols);
    if single {
        let narrow: Vec<f32> = out.values.iter().map(|&v| v as f32).collect();
        Ok(narrow.into_pyarray(py).reshape((rows, cols))?.into_any())
    } else {
        Ok(out.values.into_pyarray(py).reshape((rows, cols))?.into_any())
    }
}
