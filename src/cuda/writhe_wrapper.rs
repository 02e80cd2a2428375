//! CUDA support for the writhe kernel.
//!
//! PTX is loaded with DetermineTargetFromContext + OptLevel O2 (with fallbacks) onto a
//! NON_BLOCKING stream. Allocations pass a VRAM fit check first (`CUDA_MEM_CHECK=0` disables
//! it). `BENCH_DEBUG=1` prints the selected launch configuration once.
//!
//! Math pattern: one thread per (sample, segment pair), FP64 throughout so device output keeps
//! the precision of the host coordinates.

#![cfg(feature = "cuda")]

use crate::utilities::data_loader::Trajectory;
use crate::writhe::device::{MemoryInfo, WritheDevice, WritheSession};
use crate::writhe::segments::SegmentPair;
use crate::writhe::{WritheError, WritheMatrix};
use cust::context::Context;
use cust::device::Device;
use cust::function::{BlockSize, GridSize};
use cust::memory::{mem_get_info, DeviceBuffer};
use cust::module::{Module, ModuleJitOption, OptLevel};
use cust::prelude::*;
use cust::stream::{Stream, StreamFlags};
use std::env;
use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

const KERNEL_NAME: &str = "writhe_segments_f64";
const HEADROOM_BYTES: usize = 64 << 20;

#[derive(Debug, Error)]
pub enum CudaWritheError {
    #[error(transparent)]
    Cuda(#[from] cust::error::CudaError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("out of memory: required={required} free={free} headroom={headroom}")]
    OutOfMemory {
        required: usize,
        free: usize,
        headroom: usize,
    },
    #[error("missing kernel symbol: {name}")]
    MissingKernelSymbol { name: &'static str },
    #[error("launch config too large: grid=({gx},{gy},{gz}) block=({bx},{by},{bz})")]
    LaunchConfigTooLarge {
        gx: u32,
        gy: u32,
        gz: u32,
        bx: u32,
        by: u32,
        bz: u32,
    },
}

impl From<CudaWritheError> for WritheError {
    fn from(e: CudaWritheError) -> Self {
        match e {
            CudaWritheError::InvalidInput(s) => WritheError::InvalidArgument(s),
            other => WritheError::Device(other.to_string()),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub enum WritheKernelPolicy {
    #[default]
    Auto,
    Plain {
        block_x: u32,
    },
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CudaWrithePolicy {
    pub kernel: WritheKernelPolicy,
}

#[derive(Clone, Copy, Debug)]
pub enum WritheKernelSelected {
    Plain { block_x: u32, grid_x: u32 },
}

/// Row-major `rows × cols` FP64 result left on the device.
pub struct DeviceArrayF64 {
    pub buf: DeviceBuffer<f64>,
    pub rows: usize,
    pub cols: usize,
}

impl DeviceArrayF64 {
    #[inline]
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_host(&self) -> Result<Vec<f64>, CudaWritheError> {
        let mut out = vec![0.0f64; self.len()];
        if !out.is_empty() {
            self.buf.copy_to(&mut out)?;
        }
        Ok(out)
    }
}

/// Coordinates uploaded once and reused for every chunk.
pub struct DeviceTrajectory {
    pub buf: DeviceBuffer<f64>,
    pub n_samples: usize,
    pub n_points: usize,
}

pub struct CudaWrithe {
    module: Module,
    stream: Stream,
    context: Arc<Context>,
    device_id: u32,
    policy: CudaWrithePolicy,
    sm_count: u32,
    debug_logged: AtomicBool,
}

impl CudaWrithe {
    pub fn new(device_id: usize) -> Result<Self, CudaWritheError> {
        cust::init(CudaFlags::empty())?;
        let device = Device::get_device(device_id as u32)?;
        let context = Arc::new(Context::new(device)?);

        let ptx: &str = include_str!(concat!(env!("OUT_DIR"), "/writhe_kernel.ptx"));
        let jit_opts = &[
            ModuleJitOption::DetermineTargetFromContext,
            ModuleJitOption::OptLevel(OptLevel::O2),
        ];
        let module = Module::from_ptx(ptx, jit_opts)
            .or_else(|_| Module::from_ptx(ptx, &[ModuleJitOption::DetermineTargetFromContext]))
            .or_else(|_| Module::from_ptx(ptx, &[]))?;
        let stream = Stream::new(StreamFlags::NON_BLOCKING, None)?;
        let sm_count = device
            .get_attribute(cust::device::DeviceAttribute::MultiprocessorCount)
            .map(|v| v.max(1) as u32)
            .unwrap_or(1);

        Ok(Self {
            module,
            stream,
            context,
            device_id: device_id as u32,
            policy: CudaWrithePolicy::default(),
            sm_count,
            debug_logged: AtomicBool::new(false),
        })
    }

    pub fn new_with_policy(device_id: usize, policy: CudaWrithePolicy) -> Result<Self, CudaWritheError> {
        let mut s = Self::new(device_id)?;
        s.policy = policy;
        Ok(s)
    }

    #[inline]
    pub fn context_arc(&self) -> Arc<Context> {
        self.context.clone()
    }

    #[inline]
    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    #[inline]
    pub fn synchronize(&self) -> Result<(), CudaWritheError> {
        self.stream.synchronize().map_err(Into::into)
    }

    #[inline]
    fn mem_check_enabled() -> bool {
        match env::var("CUDA_MEM_CHECK") {
            Ok(v) => v != "0" && v.to_lowercase() != "false",
            Err(_) => true,
        }
    }

    #[inline]
    fn ensure_fit(required_bytes: usize, headroom_bytes: usize) -> Result<(), CudaWritheError> {
        if !Self::mem_check_enabled() {
            return Ok(());
        }
        match mem_get_info() {
            Ok((free, _total)) if required_bytes.saturating_add(headroom_bytes) > free => {
                Err(CudaWritheError::OutOfMemory {
                    required: required_bytes,
                    free,
                    headroom: headroom_bytes,
                })
            }
            _ => Ok(()),
        }
    }

    fn select_launch(&self, total: usize) -> Result<(GridSize, BlockSize, WritheKernelSelected), CudaWritheError> {
        let block_x = match self.policy.kernel {
            WritheKernelPolicy::Auto => 256,
            WritheKernelPolicy::Plain { block_x } => block_x.max(32),
        };
        if block_x > 1024 {
            return Err(CudaWritheError::LaunchConfigTooLarge {
                gx: 0,
                gy: 1,
                gz: 1,
                bx: block_x,
                by: 1,
                bz: 1,
            });
        }
        // grid-stride kernel: enough blocks to fill the SMs, no more than the work needs
        let needed = total.div_ceil(block_x as usize).max(1);
        let cap = (self.sm_count as usize) * 32;
        let grid_x = needed.min(cap).min(u32::MAX as usize) as u32;
        let sel = WritheKernelSelected::Plain { block_x, grid_x };
        Ok(((grid_x, 1, 1).into(), (block_x, 1, 1).into(), sel))
    }

    fn maybe_log_debug(&self, sel: WritheKernelSelected) {
        if std::env::var("BENCH_DEBUG").ok().as_deref() != Some("1") {
            return;
        }
        if !self.debug_logged.swap(true, Ordering::Relaxed) {
            eprintln!("[DEBUG] writhe selected kernel: {:?}", sel);
        }
    }

    pub fn upload_trajectory(&self, traj: &Trajectory) -> Result<DeviceTrajectory, CudaWritheError> {
        if traj.is_empty() {
            return Err(CudaWritheError::InvalidInput("empty trajectory".into()));
        }
        let bytes = traj.size_bytes();
        Self::ensure_fit(bytes, HEADROOM_BYTES)?;
        let buf = DeviceBuffer::from_slice(&traj.xyz)?;
        Ok(DeviceTrajectory {
            buf,
            n_samples: traj.n_samples,
            n_points: traj.n_points,
        })
    }

    /// Contributions of `pairs` against device-resident coordinates, left on the device.
    pub fn writhe_segments_device(
        &self,
        d_traj: &DeviceTrajectory,
        pairs: &[SegmentPair],
    ) -> Result<DeviceArrayF64, CudaWritheError> {
        if let Some((i, q)) = pairs
            .iter()
            .enumerate()
            .find(|(_, q)| q.max_index() >= d_traj.n_points)
        {
            return Err(CudaWritheError::InvalidInput(format!(
                "segment pair {} {:?} indexes past the last point ({})",
                i,
                q.as_array(),
                d_traj.n_points.saturating_sub(1)
            )));
        }
        let n_pairs = pairs.len();
        let total = d_traj
            .n_samples
            .checked_mul(n_pairs)
            .ok_or_else(|| CudaWritheError::InvalidInput("samples*pairs overflow".into()))?;
        if d_traj.n_samples > i32::MAX as usize
            || d_traj.n_points > i32::MAX as usize
            || n_pairs > i32::MAX as usize
        {
            return Err(CudaWritheError::InvalidInput("dimensions exceed i32 range".into()));
        }
        let pairs_i32: Vec<i32> = pairs
            .iter()
            .flat_map(|q| q.as_array())
            .map(|v| v as i32)
            .collect();

        let out_bytes = total
            .checked_mul(std::mem::size_of::<f64>())
            .ok_or_else(|| CudaWritheError::InvalidInput("output bytes overflow".into()))?;
        let pair_bytes = pairs_i32.len() * std::mem::size_of::<i32>();
        Self::ensure_fit(out_bytes.saturating_add(pair_bytes), HEADROOM_BYTES)?;

        let mut d_out: DeviceBuffer<f64> = unsafe { DeviceBuffer::uninitialized(total.max(1)) }?;
        if total == 0 {
            return Ok(DeviceArrayF64 {
                buf: d_out,
                rows: d_traj.n_samples,
                cols: 0,
            });
        }
        let d_pairs = DeviceBuffer::from_slice(&pairs_i32)?;

        let func = self
            .module
            .get_function(KERNEL_NAME)
            .map_err(|_| CudaWritheError::MissingKernelSymbol { name: KERNEL_NAME })?;
        let (grid, block, sel) = self.select_launch(total)?;
        self.maybe_log_debug(sel);
        unsafe {
            let mut xyz_ptr = d_traj.buf.as_device_ptr().as_raw();
            let mut ns_i = d_traj.n_samples as i32;
            let mut np_i = d_traj.n_points as i32;
            let mut pairs_ptr = d_pairs.as_device_ptr().as_raw();
            let mut npairs_i = n_pairs as i32;
            let mut out_ptr = d_out.as_device_ptr().as_raw();
            let args: &mut [*mut c_void] = &mut [
                &mut xyz_ptr as *mut _ as *mut c_void,
                &mut ns_i as *mut _ as *mut c_void,
                &mut np_i as *mut _ as *mut c_void,
                &mut pairs_ptr as *mut _ as *mut c_void,
                &mut npairs_i as *mut _ as *mut c_void,
                &mut out_ptr as *mut _ as *mut c_void,
            ];
            self.stream.launch(&func, grid, block, 0, args)?;
        }
        self.stream.synchronize()?;
        // d_pairs drops here; only the output stays resident
        Ok(DeviceArrayF64 {
            buf: d_out,
            rows: d_traj.n_samples,
            cols: n_pairs,
        })
    }

    /// Host-in, host-out convenience: uploads, computes, copies back, frees.
    pub fn writhe_segments(
        &self,
        pairs: &[SegmentPair],
        traj: &Trajectory,
    ) -> Result<WritheMatrix, CudaWritheError> {
        let d_traj = self.upload_trajectory(traj)?;
        let d_out = self.writhe_segments_device(&d_traj, pairs)?;
        Ok(WritheMatrix {
            values: d_out.to_host()?,
            rows: d_out.rows,
            cols: d_out.cols,
        })
    }
}

/// Free/total memory of device `device_id` as the driver reports it.
pub fn device_memory_info(device_id: usize) -> Result<MemoryInfo, CudaWritheError> {
    cust::init(CudaFlags::empty())?;
    let device = Device::get_device(device_id as u32)?;
    let _ctx = Context::new(device)?;
    let (free, total) = mem_get_info()?;
    Ok(MemoryInfo {
        total_bytes: total as u64,
        allocated_bytes: total.saturating_sub(free) as u64,
    })
}

/// A CUDA ordinal as seen by the dispatcher. Nothing is created until a worker opens it.
#[derive(Debug, Clone)]
pub struct CudaWritheDevice {
    id: usize,
    policy: CudaWrithePolicy,
}

impl CudaWritheDevice {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            policy: CudaWrithePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: CudaWrithePolicy) -> Self {
        self.policy = policy;
        self
    }
}

// Field order is drop order: device buffers go before the context that owns them.
struct CudaWritheSession {
    // keyed on the host buffer address so each worker uploads the shared coordinates once
    resident: Option<(usize, DeviceTrajectory)>,
    cuda: CudaWrithe,
}

impl WritheSession for CudaWritheSession {
    fn compute(
        &mut self,
        pairs: &[SegmentPair],
        traj: &Trajectory,
    ) -> Result<WritheMatrix, WritheError> {
        let key = traj.xyz.as_ptr() as usize;
        let cached = matches!(&self.resident, Some((k, d)) if *k == key
            && d.n_samples == traj.n_samples
            && d.n_points == traj.n_points);
        if !cached {
            self.resident = None;
            self.resident = Some((key, self.cuda.upload_trajectory(traj)?));
        }
        let d_traj = match &self.resident {
            Some((_, d)) => d,
            None => return Err(WritheError::Device("coordinates not resident".into())),
        };
        let d_out = self.cuda.writhe_segments_device(d_traj, pairs)?;
        let values = d_out.to_host()?;
        Ok(WritheMatrix {
            values,
            rows: d_out.rows,
            cols: d_out.cols,
        })
    }
}

impl WritheDevice for CudaWritheDevice {
    fn id(&self) -> usize {
        self.id
    }

    fn memory_info(&self) -> Result<Option<MemoryInfo>, WritheError> {
        Ok(Some(device_memory_info(self.id)?))
    }

    fn open(&self) -> Result<Box<dyn WritheSession>, WritheError> {
        let cuda = CudaWrithe::new_with_policy(self.id, self.policy)?;
        Ok(Box::new(CudaWritheSession {
            resident: None,
            cuda,
        }))
    }
}
