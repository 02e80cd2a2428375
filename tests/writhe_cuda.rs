mod common;

#[cfg(feature = "cuda")]
use std::sync::Arc;

#[cfg(feature = "cuda")]
use common::{assert_array_close, helix};
#[cfg(feature = "cuda")]
use vector_writhe::cuda::{cuda_available, CudaWrithe, CudaWritheDevice};
#[cfg(feature = "cuda")]
use vector_writhe::utilities::enums::Kernel;
#[cfg(feature = "cuda")]
use vector_writhe::writhe::kernel::writhe_segments;
#[cfg(feature = "cuda")]
use vector_writhe::writhe::{
    get_segments, BatchPlanner, DevicePool, ExecutionMode, WritheDevice, WritheDispatcher,
};

#[test]
fn cuda_feature_off_noop() {
    #[cfg(not(feature = "cuda"))]
    {
        assert_eq!(vector_writhe::cuda::cuda_device_count(), 0);
        assert!(vector_writhe::writhe::DevicePool::cuda().is_err());
    }
}

#[cfg(feature = "cuda")]
#[test]
fn writhe_cuda_segments_match_cpu() -> Result<(), Box<dyn std::error::Error>> {
    if !cuda_available() {
        eprintln!("[writhe_cuda_segments_match_cpu] skipped - no CUDA device");
        return Ok(());
    }

    let traj = helix(16, 80);
    let pairs = get_segments(Some(80), 1, None, None)?;
    let cpu = writhe_segments(&pairs, &traj, Kernel::ScalarBatch)?;

    let cuda = CudaWrithe::new(0).map_err(|e| Box::new(e) as Box<dyn std::error::Error>)?;
    let gpu = cuda
        .writhe_segments(&pairs, &traj)
        .map_err(|e| Box::new(e) as Box<dyn std::error::Error>)?;

    assert_eq!((gpu.rows, gpu.cols), (cpu.rows, cpu.cols));
    assert_array_close(&gpu.values, &cpu.values, 0.0, 1e-9, "cuda vs cpu");
    Ok(())
}

#[cfg(feature = "cuda")]
#[test]
fn writhe_cuda_session_reuses_upload() -> Result<(), Box<dyn std::error::Error>> {
    if !cuda_available() {
        eprintln!("[writhe_cuda_session_reuses_upload] skipped - no CUDA device");
        return Ok(());
    }

    let traj = helix(4, 50);
    let pairs = get_segments(Some(50), 2, None, None)?;
    let cpu = writhe_segments(&pairs, &traj, Kernel::Scalar)?;

    let device = CudaWritheDevice::new(0);
    assert!(device.memory_info()?.is_some());
    let mut session = device.open()?;
    let (head, tail) = pairs.split_at(pairs.len() / 2);
    let a = session.compute(head, &traj)?;
    let b = session.compute(tail, &traj)?;
    let joined = vector_writhe::writhe::WritheMatrix::concat_cols(&[a, b])?;

    assert_array_close(&joined.values, &cpu.values, 0.0, 1e-9, "split session");
    Ok(())
}

#[cfg(feature = "cuda")]
#[test]
fn writhe_cuda_dispatch_matches_cpu() -> Result<(), Box<dyn std::error::Error>> {
    if !cuda_available() {
        eprintln!("[writhe_cuda_dispatch_matches_cpu] skipped - no CUDA device");
        return Ok(());
    }

    let traj = Arc::new(helix(8, 120));
    let pairs = get_segments(Some(120), 1, None, None)?;
    let cpu = writhe_segments(&pairs, &traj, Kernel::ScalarBatch)?;

    let dispatcher = WritheDispatcher::new(DevicePool::cuda()?, BatchPlanner::default());
    let gpu = dispatcher.compute(&pairs, &traj, ExecutionMode::Distributed)?;

    assert_array_close(&gpu.values, &cpu.values, 0.0, 1e-9, "cuda dispatch");
    Ok(())
}
