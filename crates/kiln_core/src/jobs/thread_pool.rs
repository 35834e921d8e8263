//! # Thread Pool
//!
//! Fixed set of OS worker threads draining one shared [`JobQueue`].
//!
//! ## Lifecycle
//!
//! ```text
//!   Running ──shutdown()──> ShuttingDown ──join──> Joined
//!      │                         │
//!   accepts jobs            refuses jobs, drains what is queued
//! ```
//!
//! There is no cancellation: a job that was accepted always runs.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::queue::{Job, JobPriority, JobQueue};
use super::signal::{CompletionSignal, JobHandle};
use crate::config::JobsConfig;
use crate::error::{CoreError, CoreResult};

/// One worker thread owned by a [`ThreadPool`].
#[derive(Debug)]
pub struct WorkerThread {
    /// Ordinal id, `0..thread_count`.
    id: usize,
    /// Join handle; taken when the pool joins.
    handle: Option<JoinHandle<()>>,
    /// True while the worker loop is running.
    running: Arc<AtomicBool>,
}

impl WorkerThread {
    /// Returns the worker ordinal.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }

    /// Returns true while the worker loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Worker pool with a bounded priority queue.
///
/// # Example
///
/// ```rust,ignore
/// let mut pool = ThreadPool::new(4, 256)?;
///
/// let handle = pool.submit_tracked(JobPriority::High, || upload_textures())?;
/// handle.wait();
///
/// pool.shutdown();
/// ```
pub struct ThreadPool {
    queue: Arc<JobQueue>,
    workers: Vec<WorkerThread>,
    thread_count: usize,
}

impl ThreadPool {
    /// Spawns `thread_count` workers sharing a queue of `queue_capacity`.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidThreadCount`] if `thread_count` is zero.
    /// - [`CoreError::InvalidSize`] if `queue_capacity` is zero.
    /// - [`CoreError::ThreadCreationFailed`] if any worker fails to spawn;
    ///   workers already started are stopped and joined first.
    pub fn new(thread_count: usize, queue_capacity: usize) -> CoreResult<Self> {
        if thread_count == 0 {
            return Err(CoreError::InvalidThreadCount);
        }

        let queue = Arc::new(JobQueue::new(queue_capacity)?);
        let mut workers = Vec::with_capacity(thread_count);

        for id in 0..thread_count {
            let worker_queue = Arc::clone(&queue);
            let running = Arc::new(AtomicBool::new(true));
            let worker_running = Arc::clone(&running);

            let spawned = thread::Builder::new()
                .name(format!("kiln-worker-{id}"))
                .spawn(move || Self::worker_loop(id, &worker_queue, &worker_running));

            match spawned {
                Ok(handle) => workers.push(WorkerThread {
                    id,
                    handle: Some(handle),
                    running,
                }),
                Err(e) => {
                    queue.close();
                    Self::join_workers(&mut workers);
                    return Err(CoreError::ThreadCreationFailed(e.to_string()));
                }
            }
        }

        tracing::info!(threads = thread_count, capacity = queue_capacity, "thread pool started");

        Ok(Self {
            queue,
            workers,
            thread_count,
        })
    }

    /// Creates a pool from its configuration section.
    ///
    /// # Errors
    ///
    /// Same as [`ThreadPool::new`].
    pub fn from_config(config: &JobsConfig) -> CoreResult<Self> {
        Self::new(config.resolved_thread_count(), config.queue_capacity)
    }

    /// Worker thread main loop.
    fn worker_loop(id: usize, queue: &JobQueue, running: &AtomicBool) {
        tracing::debug!(worker = id, "worker started");

        while let Some(job) = queue.pop() {
            Self::execute(id, job);
            queue.complete();
            thread::yield_now();
        }

        running.store(false, Ordering::Release);
        tracing::debug!(worker = id, "worker exited");
    }

    /// Runs one job; a panicking body is contained and still signals.
    fn execute(id: usize, job: Job) {
        let priority = job.priority();
        let (func, completion) = job.into_parts();

        if panic::catch_unwind(AssertUnwindSafe(func)).is_err() {
            tracing::error!(worker = id, ?priority, "job panicked");
        }
        if let Some(signal) = completion {
            signal.signal();
        }
    }

    fn join_workers(workers: &mut Vec<WorkerThread>) {
        for mut worker in workers.drain(..) {
            if let Some(handle) = worker.handle.take() {
                if handle.join().is_err() {
                    tracing::error!(worker = worker.id, "worker thread panicked");
                }
            }
        }
    }

    /// Number of workers the pool was created with.
    #[inline]
    #[must_use]
    pub const fn thread_count(&self) -> usize {
        self.thread_count
    }

    /// Workers whose loop is still running.
    #[must_use]
    pub fn live_workers(&self) -> usize {
        self.workers.iter().filter(|worker| worker.is_running()).count()
    }

    /// The worker threads, in spawn order.
    #[must_use]
    pub fn workers(&self) -> &[WorkerThread] {
        &self.workers
    }

    /// Jobs queued and not yet picked up.
    #[must_use]
    pub fn pending_jobs(&self) -> usize {
        self.queue.len()
    }

    /// Maximum number of queued jobs.
    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Returns true once shutdown has been requested.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.queue.is_closed()
    }

    /// Queues a prepared job.
    ///
    /// # Errors
    ///
    /// - [`CoreError::ThreadPoolShutdown`] after shutdown was requested.
    /// - [`CoreError::JobQueueFull`] if the queue is at capacity.
    pub fn submit_job(&self, job: Job) -> CoreResult<()> {
        self.queue.push(job)
    }

    /// Queues a closure.
    ///
    /// # Errors
    ///
    /// Same as [`ThreadPool::submit_job`].
    pub fn submit<F>(&self, priority: JobPriority, func: F) -> CoreResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue.push(Job::new(priority, func))
    }

    /// Queues a closure and returns a handle that completes after it ran.
    ///
    /// # Errors
    ///
    /// Same as [`ThreadPool::submit_job`].
    pub fn submit_tracked<F>(&self, priority: JobPriority, func: F) -> CoreResult<JobHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        let signal = Arc::new(CompletionSignal::new());
        self.queue
            .push(Job::new(priority, func).with_completion(Arc::clone(&signal)))?;
        Ok(JobHandle::new(signal))
    }

    /// Blocks until nothing is queued.
    ///
    /// Jobs already picked up by a worker may still be running when this
    /// returns; use [`wait_idle`](Self::wait_idle) to wait for those too.
    pub fn wait_for_all(&self) {
        self.queue.wait_until_empty();
    }

    /// Blocks until nothing is queued and no worker is running a job.
    pub fn wait_idle(&self) {
        self.queue.wait_idle();
    }

    /// Stops accepting jobs, lets workers drain the queue, and joins them.
    ///
    /// Idempotent. Must not be called from a worker of this pool.
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }

        self.queue.close();
        Self::join_workers(&mut self.workers);

        tracing::info!(threads = self.thread_count, "thread pool shut down");
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("thread_count", &self.thread_count)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_zero_threads_rejected() {
        assert_eq!(ThreadPool::new(0, 16).unwrap_err(), CoreError::InvalidThreadCount);
    }

    #[test]
    fn test_jobs_run() {
        let pool = ThreadPool::new(2, 64).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..32 {
            let counter = Arc::clone(&counter);
            pool.submit(JobPriority::Normal, move || {
                counter.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        }

        pool.wait_idle();
        assert_eq!(counter.load(Ordering::Relaxed), 32);
    }

    #[test]
    fn test_tracked_job_signals() {
        let pool = ThreadPool::new(1, 4).unwrap();
        let handle = pool
            .submit_tracked(JobPriority::High, || thread::sleep(Duration::from_millis(5)))
            .unwrap();

        assert!(handle.wait_timeout(Duration::from_secs(5)));
    }

    #[test]
    fn test_submit_after_shutdown() {
        let mut pool = ThreadPool::new(2, 4).unwrap();
        pool.shutdown();

        assert!(pool.is_shutting_down());
        assert_eq!(pool.live_workers(), 0);
        assert_eq!(
            pool.submit(JobPriority::Normal, || {}).unwrap_err(),
            CoreError::ThreadPoolShutdown
        );

        // Second shutdown is a no-op
        pool.shutdown();
    }

    #[test]
    fn test_shutdown_drains_queued_jobs() {
        let mut pool = ThreadPool::new(1, 64).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..16 {
            let counter = Arc::clone(&counter);
            pool.submit(JobPriority::Low, move || {
                thread::sleep(Duration::from_millis(1));
                counter.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        }

        pool.shutdown();
        assert_eq!(counter.load(Ordering::Relaxed), 16);
    }

    #[test]
    fn test_panicking_job_is_contained() {
        let pool = ThreadPool::new(1, 8).unwrap();
        let handle = pool
            .submit_tracked(JobPriority::Normal, || panic!("job failure"))
            .unwrap();
        handle.wait();

        let after = pool.submit_tracked(JobPriority::Normal, || {}).unwrap();
        after.wait();
        assert_eq!(pool.live_workers(), 1);
    }
}
