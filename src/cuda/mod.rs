//! CUDA integration (cust-based)
//!
//! The wrapper is built only with the `cuda` feature. The detection helpers are always
//! available and report no devices when the feature is off.

#[cfg(feature = "cuda")]
pub mod writhe_wrapper;

#[cfg(feature = "cuda")]
pub use writhe_wrapper::{
    device_memory_info, CudaWrithe, CudaWritheDevice, CudaWritheError, CudaWrithePolicy,
    DeviceArrayF64, DeviceTrajectory, WritheKernelPolicy, WritheKernelSelected,
};

/// Returns true if a CUDA device is available and the driver API can be initialized.
#[inline]
pub fn cuda_available() -> bool {
    cuda_device_count() > 0
}

/// Returns the number of CUDA devices available (0 on error or when disabled).
#[inline]
pub fn cuda_device_count() -> usize {
    #[cfg(feature = "cuda")]
    {
        use cust::{device::Device, prelude::CudaFlags};
        if cust::init(CudaFlags::empty()).is_err() {
            return 0;
        }
        match Device::num_devices() {
            Ok(n) => n as usize,
            Err(_) => 0,
        }
    }

    #[cfg(not(feature = "cuda"))]
    {
        0
    }
}
