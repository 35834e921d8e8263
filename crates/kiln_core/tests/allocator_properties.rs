//! # Allocator Property Tests
//!
//! Saturation, round-trip, exclusivity and FIFO properties of the three
//! fixed-capacity allocators, driven by seeded random workloads.
//!
//! Run with: cargo test --package kiln_core --test allocator_properties

use kiln_core::{BuddyAllocation, BuddyAllocator, CoreError, FixedBlockPool, RingBuffer};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;

// ============================================================================
// FIXED-BLOCK POOL
// ============================================================================

#[test]
fn block_pool_saturation_scenario() {
    let mut pool = FixedBlockPool::new(256, 16, 16).unwrap();

    let handles: Vec<_> = (0..16).map(|_| pool.alloc(256).unwrap()).collect();
    assert!((pool.usage() - 1.0).abs() < f64::EPSILON);

    assert!(matches!(pool.alloc(256), Err(CoreError::OutOfMemory { .. })));

    pool.free(handles[7]);
    let again = pool.alloc(256).unwrap();
    assert_eq!(again, handles[7]);
    assert!((pool.usage() - 1.0).abs() < f64::EPSILON);

    pool.free(again);
    assert!((pool.usage() - 0.9375).abs() < f64::EPSILON);
    let _ = pool.alloc(1).unwrap();
    assert!((pool.peak_usage() - 1.0).abs() < f64::EPSILON);
}

#[test]
fn block_pool_round_trip_restores_usage() {
    let mut rng = StdRng::seed_from_u64(0xB10C);
    let mut pool = FixedBlockPool::new(128, 32, 8).unwrap();
    let mut live = Vec::new();

    for _ in 0..500 {
        if live.len() < 32 && rng.gen_bool(0.6) {
            let before = pool.usage();
            let size = rng.gen_range(0..=128usize);
            let handle = pool.alloc(size).unwrap();
            assert_eq!(pool.bytes(handle).unwrap().len(), size);

            // Immediate round trip
            if rng.gen_bool(0.3) {
                pool.free(handle);
                assert!((pool.usage() - before).abs() < f64::EPSILON);
            } else {
                live.push(handle);
            }
        } else if let Some(handle) = live.pop() {
            pool.free(handle);
        }
        assert_eq!(pool.allocated_count(), live.len());
    }
}

// ============================================================================
// BUDDY ALLOCATOR
// ============================================================================

#[test]
fn buddy_scenario_1024_by_64() {
    let mut buddy = BuddyAllocator::new(1024, 64).unwrap();
    assert_eq!(buddy.max_order(), 4);

    let block = buddy.alloc(100).unwrap();
    assert_eq!(block.size(), 128);
    assert_eq!(block.order(), 1);

    assert!(matches!(buddy.alloc(1025), Err(CoreError::BlockTooLarge { .. })));
}

#[test]
fn buddy_round_trip_coalesces_to_root() {
    for size in [1, 63, 64, 65, 100, 200, 511, 512, 1000, 1024] {
        let mut buddy = BuddyAllocator::new(1024, 64).unwrap();
        let block = buddy.alloc(size).unwrap();
        buddy.free(block).unwrap();

        let whole = buddy.alloc(1024).unwrap();
        assert_eq!(whole.offset(), 0, "size {size}");
    }
}

#[test]
fn buddy_live_blocks_never_overlap() {
    let mut rng = StdRng::seed_from_u64(0xB0DD);
    let mut buddy = BuddyAllocator::new(64 * 1024, 64).unwrap();
    let mut live: Vec<BuddyAllocation> = Vec::new();

    for _ in 0..2_000 {
        if live.is_empty() || rng.gen_bool(0.55) {
            let size = rng.gen_range(1..=4096usize);
            match buddy.alloc(size) {
                Ok(block) => {
                    assert!(block.size() >= size);
                    assert_eq!(block.offset() % block.size(), 0);
                    for other in &live {
                        let (a, b) = (block.range(), other.range());
                        assert!(a.end <= b.start || b.end <= a.start, "{a:?} overlaps {b:?}");
                    }
                    live.push(block);
                }
                Err(CoreError::OutOfMemory { .. }) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        } else {
            let victim = live.swap_remove(rng.gen_range(0..live.len()));
            buddy.free(victim).unwrap();
        }

        let live_bytes: usize = live.iter().map(|block| block.size()).sum();
        assert_eq!(buddy.free_bytes(), buddy.total_size() - live_bytes);
    }

    for block in live.drain(..) {
        buddy.free(block).unwrap();
    }
    assert_eq!(buddy.largest_free_block(), 64 * 1024);
}

// ============================================================================
// RING BUFFER
// ============================================================================

#[test]
fn ring_fifo_never_fails_spuriously() {
    let mut rng = StdRng::seed_from_u64(0x121E);
    let mut ring = RingBuffer::new(4096, 16).unwrap();
    let mut live = VecDeque::new();
    let mut wraps = 0;

    for _ in 0..5_000 {
        let size = rng.gen_range(1..=700usize);
        let aligned = size.div_ceil(16) * 16;

        loop {
            let head = ring.head();
            let tail = ring.tail();
            let contiguous = if live.is_empty() {
                ring.capacity()
            } else if head > tail {
                (ring.capacity() - head).max(tail)
            } else {
                tail - head
            };

            match ring.alloc(size) {
                Ok(allocation) => {
                    if allocation.offset() < head {
                        wraps += 1;
                    }
                    live.push_back(allocation);
                    break;
                }
                Err(CoreError::OutOfMemory { .. }) => {
                    assert!(aligned > contiguous, "spurious failure: {aligned} <= {contiguous}");
                    let oldest = live.pop_front().expect("empty ring cannot be full");
                    ring.free(oldest).unwrap();
                }
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        if rng.gen_bool(0.4) {
            if let Some(oldest) = live.pop_front() {
                ring.free(oldest).unwrap();
            }
        }

        let in_flight: usize = live.iter().map(|a| a.size()).sum();
        assert_eq!(ring.bytes_in_flight(), in_flight);
        assert!(in_flight <= ring.capacity());
    }

    assert!(wraps > 0, "workload never wrapped");
}

#[test]
fn ring_allocations_do_not_overlap() {
    let mut ring = RingBuffer::new(1024, 64).unwrap();
    let mut live = VecDeque::new();

    for round in 0..200usize {
        let size = 64 + (round * 37) % 300;
        while ring.alloc(size).map(|a| live.push_back(a)).is_err() {
            ring.free(live.pop_front().unwrap()).unwrap();
        }

        for (i, a) in live.iter().enumerate() {
            for b in live.iter().skip(i + 1) {
                let (a_end, b_end) = (a.offset() + a.size(), b.offset() + b.size());
                assert!(a_end <= b.offset() || b_end <= a.offset());
                assert!(a_end <= ring.capacity() && b_end <= ring.capacity());
            }
        }
    }
}
