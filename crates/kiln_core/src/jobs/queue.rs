//! # Job Queue
//!
//! Bounded priority queue shared by every worker of a pool.
//!
//! Insertion is a stable insertion sort: a new job goes in front of the
//! first queued job with a strictly lower priority, so equal priorities keep
//! arrival order. Push fails rather than growing past the capacity.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use super::signal::CompletionSignal;
use crate::error::{CoreError, CoreResult};

/// Job priority. Higher variants pop first.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum JobPriority {
    /// Background work.
    Low = 0,
    /// Default.
    #[default]
    Normal = 1,
    /// Frame-critical work.
    High = 2,
    /// Must run before anything else queued.
    Critical = 3,
}

/// Boxed job body.
pub type JobFn = Box<dyn FnOnce() + Send + 'static>;

/// A unit of work: body, priority and an optional completion signal.
///
/// Whatever the body captures stays owned by the body; the queue never
/// looks inside it.
pub struct Job {
    func: JobFn,
    priority: JobPriority,
    completion: Option<Arc<CompletionSignal>>,
}

impl Job {
    /// Creates a job without a completion signal.
    pub fn new<F>(priority: JobPriority, func: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            func: Box::new(func),
            priority,
            completion: None,
        }
    }

    /// Attaches a signal the worker raises once the body has returned.
    #[must_use]
    pub fn with_completion(mut self, signal: Arc<CompletionSignal>) -> Self {
        self.completion = Some(signal);
        self
    }

    /// Returns the job priority.
    #[inline]
    #[must_use]
    pub const fn priority(&self) -> JobPriority {
        self.priority
    }

    /// Splits the job into its body and completion signal.
    #[must_use]
    pub fn into_parts(self) -> (JobFn, Option<Arc<CompletionSignal>>) {
        (self.func, self.completion)
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("priority", &self.priority)
            .field("tracked", &self.completion.is_some())
            .finish_non_exhaustive()
    }
}

/// Queue contents guarded by one lock.
struct QueueState {
    jobs: VecDeque<Job>,
    /// Jobs popped but not yet reported through [`JobQueue::complete`].
    in_flight: usize,
    /// No more pushes; blocking pops return `None` once drained.
    closed: bool,
}

/// Bounded, lock-protected priority queue.
///
/// Every job taken with [`pop`](Self::pop) or [`try_pop`](Self::try_pop)
/// must be reported with [`complete`](Self::complete) once it has run,
/// otherwise [`wait_idle`](Self::wait_idle) never returns.
pub struct JobQueue {
    state: Mutex<QueueState>,
    /// Signalled on push and on close.
    not_empty: Condvar,
    /// Signalled when the queue drains or the last in-flight job completes.
    idle: Condvar,
    capacity: usize,
}

impl JobQueue {
    /// Creates a queue holding at most `capacity` jobs.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidSize`] if `capacity` is zero.
    pub fn new(capacity: usize) -> CoreResult<Self> {
        if capacity == 0 {
            return Err(CoreError::InvalidSize { what: "queue capacity", value: capacity });
        }
        Ok(Self {
            state: Mutex::new(QueueState {
                jobs: VecDeque::with_capacity(capacity),
                in_flight: 0,
                closed: false,
            }),
            not_empty: Condvar::new(),
            idle: Condvar::new(),
            capacity,
        })
    }

    /// Maximum number of queued jobs.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of queued jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().jobs.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().jobs.is_empty()
    }

    /// Number of popped jobs not yet completed.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight
    }

    /// Returns true once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Inserts a job by priority.
    ///
    /// # Errors
    ///
    /// - [`CoreError::ThreadPoolShutdown`] after [`close`](Self::close).
    /// - [`CoreError::JobQueueFull`] at capacity.
    pub fn push(&self, job: Job) -> CoreResult<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(CoreError::ThreadPoolShutdown);
        }
        if state.jobs.len() >= self.capacity {
            return Err(CoreError::JobQueueFull { capacity: self.capacity });
        }

        let position = state
            .jobs
            .iter()
            .position(|queued| queued.priority < job.priority)
            .unwrap_or(state.jobs.len());
        state.jobs.insert(position, job);

        self.not_empty.notify_one();
        Ok(())
    }

    /// Takes the highest-priority job without blocking.
    pub fn try_pop(&self) -> Option<Job> {
        let mut state = self.state.lock();
        self.take_front(&mut state)
    }

    /// Takes the highest-priority job, blocking while the queue is empty.
    ///
    /// Returns `None` only once the queue is closed and drained.
    pub fn pop(&self) -> Option<Job> {
        let mut state = self.state.lock();
        loop {
            if let Some(job) = self.take_front(&mut state) {
                return Some(job);
            }
            if state.closed {
                return None;
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Reports that a popped job has finished running.
    pub fn complete(&self) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        if state.jobs.is_empty() && state.in_flight == 0 {
            self.idle.notify_all();
        }
    }

    /// Refuses further pushes and wakes every blocked popper.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.not_empty.notify_all();
    }

    /// Blocks until nothing is queued. Jobs already popped may still be
    /// running when this returns.
    pub fn wait_until_empty(&self) {
        let mut state = self.state.lock();
        while !state.jobs.is_empty() {
            self.idle.wait(&mut state);
        }
    }

    /// Blocks until nothing is queued and nothing is running.
    pub fn wait_idle(&self) {
        let mut state = self.state.lock();
        while !state.jobs.is_empty() || state.in_flight > 0 {
            self.idle.wait(&mut state);
        }
    }

    fn take_front(&self, state: &mut QueueState) -> Option<Job> {
        let job = state.jobs.pop_front()?;
        state.in_flight += 1;
        if state.jobs.is_empty() {
            self.idle.notify_all();
        }
        Some(job)
    }
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("JobQueue")
            .field("capacity", &self.capacity)
            .field("queued", &state.jobs.len())
            .field("in_flight", &state.in_flight)
            .field("closed", &state.closed)
            .finish()
    }
}
