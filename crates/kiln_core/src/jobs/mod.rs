//! # Job Scheduling
//!
//! One shared priority queue, a fixed set of worker threads, and fork-join
//! helpers on top.
//!
//! ```text
//!   submit ──> [ JobQueue: Critical | High | Normal | Low ] ──> worker 0..N
//!                   (lock + condvar, bounded)                     │
//!                                                      run, signal completion
//! ```
//!
//! No work stealing and no cooperative scheduling: priority only orders the
//! jobs that are queued at the moment a worker pops.

mod fork_join;
mod job_system;
mod queue;
mod signal;
mod thread_pool;

pub use fork_join::{fork_join, partition_len, Partition};
pub use job_system::JobSystem;
pub use queue::{Job, JobFn, JobPriority, JobQueue};
pub use signal::{CompletionSignal, JobHandle};
pub use thread_pool::{ThreadPool, WorkerThread};
