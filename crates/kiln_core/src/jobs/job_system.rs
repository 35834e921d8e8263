//! # Job System
//!
//! General-purpose facade over a [`ThreadPool`]: fire-and-forget scheduling
//! and a parallel-for over owned items.

use super::fork_join::{fork_join, Partition};
use super::queue::JobPriority;
use super::signal::JobHandle;
use super::thread_pool::ThreadPool;
use crate::config::{default_worker_count, JobsConfig};
use crate::error::CoreResult;

/// Job system facade.
///
/// # Example
///
/// ```rust,ignore
/// let jobs = JobSystem::new(4, 1024)?;
///
/// jobs.schedule(|| stream_audio_chunk())?;
///
/// let particles = jobs.parallel_for(particles, |_, p| p.integrate(dt))?;
/// ```
#[derive(Debug)]
pub struct JobSystem {
    pool: ThreadPool,
}

impl JobSystem {
    /// Creates a job system with `thread_count` workers.
    ///
    /// # Errors
    ///
    /// Same as [`ThreadPool::new`].
    pub fn new(thread_count: usize, queue_capacity: usize) -> CoreResult<Self> {
        Ok(Self {
            pool: ThreadPool::new(thread_count, queue_capacity)?,
        })
    }

    /// Creates a job system with one worker per CPU minus one.
    ///
    /// # Errors
    ///
    /// Same as [`ThreadPool::new`].
    pub fn with_default_threads(queue_capacity: usize) -> CoreResult<Self> {
        Self::new(default_worker_count(), queue_capacity)
    }

    /// Creates a job system from its configuration section.
    ///
    /// # Errors
    ///
    /// Same as [`ThreadPool::new`].
    pub fn from_config(config: &JobsConfig) -> CoreResult<Self> {
        Ok(Self {
            pool: ThreadPool::from_config(config)?,
        })
    }

    /// Number of worker threads.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.pool.thread_count()
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &ThreadPool {
        &self.pool
    }

    /// Schedules a closure at [`JobPriority::Normal`], fire-and-forget.
    ///
    /// # Errors
    ///
    /// Same as [`ThreadPool::submit`].
    pub fn schedule<F>(&self, func: F) -> CoreResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool.submit(JobPriority::Normal, func)
    }

    /// Schedules a closure at the given priority, fire-and-forget.
    ///
    /// # Errors
    ///
    /// Same as [`ThreadPool::submit`].
    pub fn schedule_with_priority<F>(&self, priority: JobPriority, func: F) -> CoreResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool.submit(priority, func)
    }

    /// Schedules a closure and returns a handle to wait on.
    ///
    /// # Errors
    ///
    /// Same as [`ThreadPool::submit`].
    pub fn schedule_tracked<F>(&self, priority: JobPriority, func: F) -> CoreResult<JobHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool.submit_tracked(priority, func)
    }

    /// Calls `func(index, &mut item)` for every item, split into one
    /// contiguous partition per worker, and returns the items in order.
    ///
    /// # Errors
    ///
    /// Same as [`fork_join`].
    pub fn parallel_for<T, F>(&self, items: Vec<T>, func: F) -> CoreResult<Vec<T>>
    where
        T: Send + 'static,
        F: Fn(usize, &mut T) + Send + Sync + 'static,
    {
        fork_join(
            &self.pool,
            items,
            self.pool.thread_count(),
            JobPriority::Normal,
            move |partition: Partition, slice: &mut [T]| {
                for (offset, item) in slice.iter_mut().enumerate() {
                    func(partition.first + offset, item);
                }
            },
        )
    }

    /// Blocks until nothing is queued or running.
    pub fn wait_idle(&self) {
        self.pool.wait_idle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_schedule_and_wait() {
        let jobs = JobSystem::new(2, 64).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..20 {
            let counter = Arc::clone(&counter);
            jobs.schedule(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        }

        jobs.wait_idle();
        assert_eq!(counter.load(Ordering::Relaxed), 20);
    }

    #[test]
    fn test_parallel_for_indexes() {
        let jobs = JobSystem::new(3, 16).unwrap();
        let out = jobs.parallel_for(vec![0usize; 25], |index, item| *item = index).unwrap();
        assert_eq!(out, (0..25).collect::<Vec<_>>());
    }

    #[test]
    fn test_parallel_for_with_single_slot_queue() {
        let jobs = JobSystem::new(4, 1).unwrap();
        let out = jobs.parallel_for(vec![1u64; 64], |index, item| *item += index as u64).unwrap();
        assert_eq!(out, (1..65).collect::<Vec<u64>>());
    }
}
