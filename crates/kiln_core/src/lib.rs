//! # KILN Core
//!
//! Resource-management and task-scheduling substrate beneath the KILN
//! graphics backends:
//! - Fixed-capacity allocators with no per-allocation syscalls
//! - A bounded priority job queue drained by a fixed worker pool
//! - Fork-join helpers for splitting per-frame work across workers
//!
//! ## Architecture Rules
//!
//! 1. **Sized once** - every arena and queue is allocated at construction
//! 2. **Typed exhaustion** - running out is an error, never a silent regrow
//! 3. **Single writer** - allocators do not lock; the job queue does
//!
//! ## Example
//!
//! ```rust,ignore
//! use kiln_core::{BuddyAllocator, JobSystem, KilnConfig};
//!
//! let config = KilnConfig::load("kiln.toml")?;
//! let mut heap = BuddyAllocator::from_config(&config.buddy)?;
//! let jobs = JobSystem::from_config(&config.jobs)?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod error;
pub mod jobs;
pub mod memory;

pub use config::{
    default_worker_count, BlockPoolConfig, BuddyConfig, JobsConfig, KilnConfig, RenderConfig,
    RingConfig,
};
pub use error::{CoreError, CoreResult};
pub use jobs::{
    fork_join, CompletionSignal, Job, JobHandle, JobPriority, JobQueue, JobSystem, Partition,
    ThreadPool,
};
pub use memory::{
    BlockHandle, BuddyAllocation, BuddyAllocator, FixedBlockPool, RingAllocation, RingBuffer,
};
