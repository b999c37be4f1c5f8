//! Benchmarks for segment allocation, pooling and scope teardown
//!
//! Run with: cargo bench -p densa-core

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use densa_core::{PoolConfig, ShapedTensor, TensorContext};

fn bench_pooled_vs_fresh(c: &mut Criterion) {
    let mut group = c.benchmark_group("segment_allocation");

    for &size in [256usize, 4_096, 65_536].iter() {
        group.throughput(Throughput::Elements(size as u64));

        let pooled = TensorContext::default();
        group.bench_with_input(BenchmarkId::new("pooled", size), &size, |bencher, &size| {
            bencher.iter(|| {
                let vector = pooled.create_vector(size, true);
                black_box(vector.size());
            });
        });

        let fresh = TensorContext::new(PoolConfig {
            enabled: false,
            ..PoolConfig::default()
        });
        group.bench_with_input(BenchmarkId::new("fresh", size), &size, |bencher, &size| {
            bencher.iter(|| {
                let vector = fresh.create_vector(size, true);
                black_box(vector.size());
            });
        });
    }
    group.finish();
}

fn bench_scope_teardown(c: &mut Criterion) {
    let mut group = c.benchmark_group("scope_teardown");

    for &count in [10usize, 100, 1_000].iter() {
        let context = TensorContext::default();
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |bencher, &count| {
            bencher.iter(|| {
                context.push_scope();
                let tensors: Vec<_> =
                    (0..count).map(|_| context.create_vector(64, false)).collect();
                black_box(context.pop_scope());
                drop(tensors);
            });
        });
    }
    group.finish();
}

fn bench_views(c: &mut Criterion) {
    let context = TensorContext::default();
    let matrix = context.create_random_matrix(256, 256, -1.0, 1.0);

    c.bench_function("matrix_row_views", |bencher| {
        bencher.iter(|| {
            let rows = matrix.all_rows().unwrap();
            black_box(rows.len());
        });
    });

    c.bench_function("strided_row_to_vec", |bencher| {
        let row = matrix.row(17).unwrap();
        bencher.iter(|| black_box(row.to_vec().unwrap()));
    });
}

criterion_group!(benches, bench_pooled_vs_fresh, bench_scope_teardown, bench_views);
criterion_main!(benches);
