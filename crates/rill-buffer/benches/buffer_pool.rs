//! Buffer pool benchmarks.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rill_buffer::BufferPool;

fn root_allocate_free_benchmark(c: &mut Criterion) {
    let pool = BufferPool::new(4096, 1024).unwrap();

    c.bench_function("root_allocate_free_1000", |b| {
        b.iter(|| {
            let blocks: Vec<_> = (0..1000).filter_map(|_| pool.allocate()).collect();
            black_box(blocks.len());
            pool.free_all(blocks);
        })
    });
}

fn chained_allocate_free_benchmark(c: &mut Criterion) {
    let root = Arc::new(BufferPool::new(4096, 4096).unwrap());
    let child = BufferPool::chained(Arc::clone(&root), 1000, 16).unwrap();

    c.bench_function("chained_allocate_free_1000", |b| {
        b.iter(|| {
            let blocks: Vec<_> = (0..1000).filter_map(|_| child.allocate()).collect();
            black_box(blocks.len());
            child.free_all(blocks);
        })
    });
}

criterion_group!(
    benches,
    root_allocate_free_benchmark,
    chained_allocate_free_benchmark
);
criterion_main!(benches);
