//! # Core Error Types
//!
//! All errors that can occur in the allocator suite and the job system.
//!
//! Three families:
//! - **Capacity**: `OutOfMemory`, `BlockTooLarge`, `JobQueueFull`. Recoverable by
//!   picking a different size or pool, or by backing off.
//! - **Configuration**: `InvalidAlignment`, `InvalidSize`, `InvalidThreadCount`,
//!   `InvalidConfig`. Raised once, at construction.
//! - **Lifecycle / misuse**: `ThreadPoolShutdown`, `ThreadCreationFailed`,
//!   `JobPanicked`, `InvalidFree`, `OutOfOrderFree`.

use thiserror::Error;

/// Errors that can occur in the core substrate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// No free block or contiguous region large enough for the request.
    #[error("out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory {
        /// Bytes requested (after rounding).
        requested: usize,
        /// Bytes still available in the allocator.
        available: usize,
    },

    /// The request exceeds the largest block the allocator can ever hand out.
    #[error("block too large: requested {requested} bytes, max {max}")]
    BlockTooLarge {
        /// Bytes requested.
        requested: usize,
        /// Largest servable request.
        max: usize,
    },

    /// Alignment is not a power of two.
    #[error("invalid alignment: {0} is not a power of two")]
    InvalidAlignment(usize),

    /// A size parameter is zero or otherwise unusable.
    #[error("invalid size for {what}: {value}")]
    InvalidSize {
        /// Which parameter was rejected.
        what: &'static str,
        /// The rejected value.
        value: usize,
    },

    /// The job queue is at capacity.
    #[error("job queue full: capacity {capacity}")]
    JobQueueFull {
        /// Configured queue capacity.
        capacity: usize,
    },

    /// A thread pool needs at least one worker.
    #[error("thread count must be greater than zero")]
    InvalidThreadCount,

    /// Submission after shutdown was requested.
    #[error("thread pool is shutting down")]
    ThreadPoolShutdown,

    /// The OS refused to spawn a worker thread.
    #[error("failed to spawn worker thread: {0}")]
    ThreadCreationFailed(String),

    /// A fork-join partition panicked; its items were dropped.
    #[error("job for partition {partition} panicked")]
    JobPanicked {
        /// Index of the partition whose job panicked.
        partition: usize,
    },

    /// The handle does not name a live allocation.
    #[error("invalid free at offset {offset}")]
    InvalidFree {
        /// Offset named by the rejected handle.
        offset: usize,
    },

    /// Ring buffer allocations must be released in allocation order.
    #[error("out-of-order ring free: expected offset {expected}, got {found}")]
    OutOfOrderFree {
        /// Offset of the oldest live allocation.
        expected: usize,
        /// Offset that was passed in.
        found: usize,
    },

    /// Invalid configuration file or value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
