use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use vector_writhe::utilities::data_loader::Trajectory;
use vector_writhe::utilities::enums::Kernel;
use vector_writhe::writhe::kernel::writhe_segments;
use vector_writhe::writhe::{
    get_segments, BatchPlanner, CpuDevice, DevicePool, ExecutionMode, MemoryCostModel,
    MemoryInfo, PlannerConfig, WritheDevice, WritheDispatcher,
};

fn gen_helix(n_samples: usize, n_points: usize) -> Trajectory {
    let mut xyz = Vec::with_capacity(n_samples * n_points * 3);
    for s in 0..n_samples {
        let pitch = 0.2 + 0.001 * s as f64;
        for i in 0..n_points {
            let t = i as f64 * 0.4;
            xyz.extend_from_slice(&[t.cos(), t.sin(), pitch * t]);
        }
    }
    Trajectory::new(xyz, n_samples, n_points).unwrap()
}

fn bench_kernels(c: &mut Criterion) {
    let mut group = c.benchmark_group("writhe_segments");
    for &(n_samples, n_points) in &[(1usize, 100usize), (64, 100), (256, 200)] {
        let traj = gen_helix(n_samples, n_points);
        let pairs = get_segments(Some(n_points), 1, None, None).unwrap();
        for kernel in [Kernel::Scalar, Kernel::ScalarBatch] {
            let id = BenchmarkId::new(format!("{:?}", kernel), format!("{}x{}", n_samples, n_points));
            group.bench_with_input(id, &kernel, |b, &k| {
                b.iter(|| black_box(writhe_segments(&pairs, &traj, k).unwrap()))
            });
        }
    }
    group.finish();
}

fn bench_dispatch(c: &mut Criterion) {
    let traj = Arc::new(gen_helix(128, 150));
    let pairs = get_segments(Some(150), 1, None, None).unwrap();
    // 16 chunks of 700 pairs at 1 GiB
    let planner = BatchPlanner::new(
        MemoryCostModel::new(1.0 / (128.0 * 700.0), 0.0).unwrap(),
        PlannerConfig::default().with_safety_margin_gb(0.0),
    );

    let mut group = c.benchmark_group("writhe_dispatch");
    for n_devices in [1usize, 2, 4] {
        let devices: Vec<Arc<dyn WritheDevice>> = (0..n_devices)
            .map(|id| {
                Arc::new(
                    CpuDevice::new(id)
                        .with_kernel(Kernel::Scalar)
                        .with_memory(MemoryInfo::from_gb(1.0, 0.0)),
                ) as Arc<dyn WritheDevice>
            })
            .collect();
        let dispatcher = WritheDispatcher::new(DevicePool::from_devices(devices).unwrap(), planner);
        group.bench_with_input(
            BenchmarkId::from_parameter(n_devices),
            &dispatcher,
            |b, d| b.iter(|| black_box(d.compute(&pairs, &traj, ExecutionMode::Distributed).unwrap())),
        );
    }
    group.finish();
}

criterion_group!(benches, bench_kernels, bench_dispatch);
criterion_main!(benches);
