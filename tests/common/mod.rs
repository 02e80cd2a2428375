/// Shared helpers for the integration tests
use std::error::Error;
use std::sync::Arc;

use vector_writhe::utilities::data_loader::{read_trajectory_from_csv, Trajectory};
use vector_writhe::utilities::enums::Kernel;
use vector_writhe::writhe::{
    BatchPlanner, CpuDevice, DevicePool, MemoryCostModel, MemoryInfo, PlannerConfig,
    WritheDevice,
};

pub const HELIX_CSV: &str = "src/data/helix_trajectory.csv";

pub fn load_helix() -> Result<Trajectory, Box<dyn Error>> {
    read_trajectory_from_csv(HELIX_CSV)
}

/// `n_samples` helices of `n_points` points, each with its own pitch.
pub fn helix(n_samples: usize, n_points: usize) -> Trajectory {
    let samples: Vec<Vec<[f64; 3]>> = (0..n_samples)
        .map(|s| {
            let pitch = 0.3 + 0.15 * s as f64;
            (0..n_points)
                .map(|i| {
                    let t = i as f64 * std::f64::consts::PI / 2.5;
                    [t.cos(), t.sin(), pitch * t]
                })
                .collect()
        })
        .collect();
    Trajectory::from_samples(&samples).unwrap()
}

/// Planner sized so that a 1 GiB device holds `floor(1 / (0.01 * n_samples))` pairs per chunk.
pub fn small_planner() -> BatchPlanner {
    BatchPlanner::new(
        MemoryCostModel::new(0.01, 0.0).unwrap(),
        PlannerConfig::default().with_safety_margin_gb(0.0),
    )
}

pub fn cpu_pool(n: usize) -> DevicePool {
    let devices: Vec<Arc<dyn WritheDevice>> = (0..n)
        .map(|id| {
            Arc::new(
                CpuDevice::new(id)
                    .with_kernel(Kernel::Scalar)
                    .with_memory(MemoryInfo::from_gb(1.0, 0.0)),
            ) as Arc<dyn WritheDevice>
        })
        .collect();
    DevicePool::from_devices(devices).unwrap()
}

/// Compare two arrays with a tolerance
pub fn assert_array_close(actual: &[f64], expected: &[f64], rtol: f64, atol: f64, name: &str) {
    assert_eq!(actual.len(), expected.len(),
        "{}: Length mismatch: actual {} vs expected {}", name, actual.len(), expected.len());

    for (i, (&a, &e)) in actual.iter().zip(expected.iter()).enumerate() {
        let diff = (a - e).abs();
        let tol = atol + rtol * e.abs();

        assert!(diff <= tol,
            "{}: Value mismatch at index {}: actual {} vs expected {} (diff: {}, tol: {})",
            name, i, a, e, diff, tol);
    }
}
