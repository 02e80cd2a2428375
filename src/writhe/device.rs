//! Compute devices for chunked writhe evaluation.
//!
//! A [`WritheDevice`] reports its memory (or `None` for an unbounded host) and opens a
//! [`WritheSession`] that evaluates chunks. A session owns whatever the device needs for the
//! duration of one worker (context, uploaded coordinates) and releases it when dropped.
//!
//! [`DevicePool`] is resolved once and handed to the dispatcher; nothing downstream queries
//! accelerators again.

use std::fmt;
use std::sync::Arc;

use crate::utilities::data_loader::Trajectory;
use crate::utilities::enums::Kernel;
use crate::writhe::kernel::writhe_segments;
use crate::writhe::segments::SegmentPair;
use crate::writhe::{WritheError, WritheMatrix};

const GIB: f64 = (1u64 << 30) as f64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryInfo {
    pub total_bytes: u64,
    pub allocated_bytes: u64,
}

impl MemoryInfo {
    #[inline]
    pub fn free_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.allocated_bytes)
    }

    /// Free memory in GiB.
    #[inline]
    pub fn free_gb(&self) -> f64 {
        self.free_bytes() as f64 / GIB
    }

    pub fn from_gb(total_gb: f64, allocated_gb: f64) -> Self {
        Self {
            total_bytes: (total_gb.max(0.0) * GIB) as u64,
            allocated_bytes: (allocated_gb.max(0.0) * GIB) as u64,
        }
    }
}

/// Opened and used on the worker thread that owns it.
pub trait WritheSession {
    /// Contributions of `pairs` for every sample of `traj` (`samples × pairs`).
    fn compute(
        &mut self,
        pairs: &[SegmentPair],
        traj: &Trajectory,
    ) -> Result<WritheMatrix, WritheError>;
}

pub trait WritheDevice: Send + Sync + fmt::Debug {
    fn id(&self) -> usize;

    /// `None` means the device is not memory bounded.
    fn memory_info(&self) -> Result<Option<MemoryInfo>, WritheError>;

    fn open(&self) -> Result<Box<dyn WritheSession>, WritheError>;
}

/// Host device running the rayon kernel.
///
/// A synthetic [`MemoryInfo`] makes the planner chunk exactly as it would for an accelerator
/// of that size.
#[derive(Debug, Clone)]
pub struct CpuDevice {
    id: usize,
    memory: Option<MemoryInfo>,
    kernel: Kernel,
}

impl CpuDevice {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            memory: None,
            kernel: Kernel::Auto,
        }
    }

    pub fn with_memory(mut self, info: MemoryInfo) -> Self {
        self.memory = Some(info);
        self
    }

    pub fn with_kernel(mut self, kernel: Kernel) -> Self {
        self.kernel = kernel;
        self
    }
}

struct CpuSession {
    kernel: Kernel,
}

impl WritheSession for CpuSession {
    fn compute(
        &mut self,
        pairs: &[SegmentPair],
        traj: &Trajectory,
    ) -> Result<WritheMatrix, WritheError> {
        writhe_segments(pairs, traj, self.kernel)
    }
}

impl WritheDevice for CpuDevice {
    fn id(&self) -> usize {
        self.id
    }

    fn memory_info(&self) -> Result<Option<MemoryInfo>, WritheError> {
        Ok(self.memory)
    }

    fn open(&self) -> Result<Box<dyn WritheSession>, WritheError> {
        Ok(Box::new(CpuSession {
            kernel: self.kernel,
        }))
    }
}

#[derive(Clone)]
pub struct DevicePool {
    devices: Vec<Arc<dyn WritheDevice>>,
}

impl fmt::Debug for DevicePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.devices.iter().map(|d| d.id()))
            .finish()
    }
}

impl DevicePool {
    /// Single host device with an unlimited budget.
    pub fn cpu() -> Self {
        Self {
            devices: vec![Arc::new(CpuDevice::new(0)) as Arc<dyn WritheDevice>],
        }
    }

    pub fn from_devices(devices: Vec<Arc<dyn WritheDevice>>) -> Result<Self, WritheError> {
        if devices.is_empty() {
            return Err(WritheError::DeviceUnavailable("empty device pool".into()));
        }
        Ok(Self { devices })
    }

    /// Every visible CUDA device, in ordinal order.
    pub fn cuda() -> Result<Self, WritheError> {
        #[cfg(feature = "cuda")]
        {
            use crate::cuda::writhe_wrapper::CudaWritheDevice;
            let n = crate::cuda::cuda_device_count();
            if n == 0 {
                return Err(WritheError::DeviceUnavailable(
                    "no CUDA device detected".into(),
                ));
            }
            let devices = (0..n)
                .map(|id| Arc::new(CudaWritheDevice::new(id)) as Arc<dyn WritheDevice>)
                .collect();
            log::info!("writhe: using {} CUDA device(s)", n);
            Self::from_devices(devices)
        }

        #[cfg(not(feature = "cuda"))]
        {
            Err(WritheError::DeviceUnavailable(
                "built without the `cuda` feature".into(),
            ))
        }
    }

    #[inline]
    pub fn devices(&self) -> &[Arc<dyn WritheDevice>] {
        &self.devices
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Device whose memory sizes the batches.
    #[inline]
    pub fn primary(&self) -> &Arc<dyn WritheDevice> {
        &self.devices[0]
    }
}
