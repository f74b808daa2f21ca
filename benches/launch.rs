use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kdispatch::fusion::{BlockLevelParameters, FusionNode, LaunchPlanner};
use kdispatch::pipeline::plan_fusion;
use kdispatch::types::{DType, TensorType};
use kdispatch::DeviceDescription;

/// Reference tiling: f32[125,127] with 3x127 tiles and 4 warps.
const REFERENCE_CONFIG: &str = r#"{"fusion_backend_config":{"kind":"__triton",
    "block_level_fusion_config":{"output_tile_sizes":["3","127"],"num_warps":"4"}}}"#;

fn bench_launch_planner(c: &mut Criterion) {
    let device = DeviceDescription::rtx_a6000();
    let planner = LaunchPlanner::new(&device);
    let mut group = c.benchmark_group("launch_planner");

    for (name, dims, tiles) in [
        ("rank2", vec![125u64, 127], vec![3u64, 127]),
        ("rank4", vec![8, 64, 128, 256], vec![1, 16, 32, 64]),
        ("rank6", vec![2, 3, 5, 7, 11, 13], vec![1, 2, 2, 4, 4, 8]),
    ] {
        let params = BlockLevelParameters::new(tiles, 4);
        group.bench_with_input(BenchmarkId::new("plan", name), &dims, |b, dims| {
            b.iter(|| planner.plan(black_box(&params), black_box(dims)).expect("plan"));
        });
    }

    group.finish();
}

fn bench_plan_fusion(c: &mut Criterion) {
    let device = DeviceDescription::rtx_a6000();
    let node = FusionNode::new(
        "fusion",
        TensorType::with_dims(DType::F32, &[125, 127]),
        REFERENCE_CONFIG,
    );

    c.bench_function("plan_fusion/reference", |b| {
        b.iter(|| plan_fusion(black_box(&node), &device).expect("plan_fusion"));
    });
}

criterion_group!(benches, bench_launch_planner, bench_plan_fusion);
criterion_main!(benches);
