use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use half::bf16;
use kdispatch::memref::BufferDescriptor;
use kdispatch::{dispatch_matmul, MatmulConfig, RunOptions};

fn operand<T: Copy>(len: usize, f: impl Fn(usize) -> T) -> Vec<T> {
    (0..len).map(f).collect()
}

fn bench_dispatch_f32(c: &mut Criterion) {
    let pool = rayon::ThreadPoolBuilder::new()
        .build()
        .expect("thread pool");
    let options = RunOptions::new().with_intra_op_thread_pool(&pool);
    let config = MatmulConfig::plain().encode();
    let mut group = c.benchmark_group("dispatch_matmul_f32");

    for size in [32u64, 128, 256] {
        let len = (size * size) as usize;
        let a = operand(len, |i| (i % 17) as f32 * 0.25);
        let b = operand(len, |i| (i % 5) as f32 - 2.0);
        let mut out = vec![0.0f32; len];

        group.throughput(Throughput::Elements(2 * size * size * size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |bench, &size| {
            let lhs = BufferDescriptor::from_slice(&a, &[size, size]).expect("lhs");
            let rhs = BufferDescriptor::from_slice(&b, &[size, size]).expect("rhs");
            let dst = BufferDescriptor::from_mut_slice(&mut out, &[size, size]).expect("dst");
            bench.iter(|| {
                dispatch_matmul(&options, black_box(&lhs), black_box(&rhs), &dst, &config)
                    .expect("dispatch")
            });
        });
    }

    group.finish();
}

fn bench_dispatch_bf16_batched(c: &mut Criterion) {
    let pool = rayon::ThreadPoolBuilder::new()
        .build()
        .expect("thread pool");
    let options = RunOptions::new().with_intra_op_thread_pool(&pool);
    let config = MatmulConfig::plain().encode();
    let (batch, m, k, n) = (8u64, 64u64, 64u64, 64u64);

    let a = operand((batch * m * k) as usize, |i| bf16::from_f32((i % 9) as f32));
    let b = operand((k * n) as usize, |i| bf16::from_f32((i % 3) as f32));
    let mut out = vec![0.0f32; (batch * m * n) as usize];

    c.bench_function("dispatch_matmul_bf16/broadcast_rhs", |bench| {
        let lhs = BufferDescriptor::from_slice(&a, &[batch, m, k]).expect("lhs");
        let rhs = BufferDescriptor::from_slice(&b, &[1, k, n]).expect("rhs");
        let dst = BufferDescriptor::from_mut_slice(&mut out, &[batch, m, n]).expect("dst");
        bench.iter(|| dispatch_matmul(&options, &lhs, &rhs, &dst, &config).expect("dispatch"));
    });
}

criterion_group!(benches, bench_dispatch_f32, bench_dispatch_bf16_batched);
criterion_main!(benches);
