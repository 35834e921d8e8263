//! # Allocator Benchmark
//!
//! Alloc/free throughput of the three fixed-capacity allocators.
//!
//! Run with: `cargo bench --package kiln_core --bench allocator_benchmark`

// Benchmarks don't need docs
#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kiln_core::{BuddyAllocator, FixedBlockPool, RingBuffer};

/// Allocations per iteration.
const BATCH: usize = 1024;

/// Benchmark: fill and drain a block pool.
fn bench_block_pool(c: &mut Criterion) {
    let mut pool = FixedBlockPool::new(256, BATCH, 16).unwrap();
    let mut handles = Vec::with_capacity(BATCH);

    c.bench_function("block_pool_fill_drain_1024", |b| {
        b.iter(|| {
            for _ in 0..BATCH {
                handles.push(pool.alloc(black_box(200)).unwrap());
            }
            for handle in handles.drain(..) {
                pool.free(handle);
            }
        });
    });
}

/// Benchmark: streaming allocations through a ring, freed in order.
fn bench_ring(c: &mut Criterion) {
    let mut ring = RingBuffer::new(1024 * 1024, 256).unwrap();

    c.bench_function("ring_stream_1024", |b| {
        b.iter(|| {
            let mut oldest = None;
            for i in 0..BATCH {
                let size = black_box(64 + (i % 7) * 128);
                match ring.alloc(size) {
                    Ok(allocation) => {
                        if let Some(previous) = oldest.replace(allocation) {
                            ring.free(previous).unwrap();
                        }
                    }
                    Err(_) => {
                        ring.reset();
                        oldest = None;
                    }
                }
            }
            ring.reset();
        });
    });
}

/// Benchmark: buddy alloc/free of mixed sizes.
fn bench_buddy(c: &mut Criterion) {
    let mut group = c.benchmark_group("buddy_alloc_free");

    for size in [64usize, 1000, 16 * 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let mut buddy = BuddyAllocator::new(64 * 1024 * 1024, 64).unwrap();
            let mut live = Vec::with_capacity(BATCH);
            b.iter(|| {
                for _ in 0..BATCH {
                    live.push(buddy.alloc(black_box(size)).unwrap());
                }
                for block in live.drain(..) {
                    buddy.free(block).unwrap();
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_block_pool, bench_ring, bench_buddy);
criterion_main!(benches);
