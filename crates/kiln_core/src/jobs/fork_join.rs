//! Fork-join over owned work items.
//!
//! The items are moved into contiguous partitions, one job per partition,
//! and handed back in their original order once every partition's
//! completion signal has fired.
//!
//! A partition the queue has no room for runs on the calling thread
//! instead, so a queue smaller than the partition count still completes.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use super::queue::{Job, JobPriority};
use super::signal::CompletionSignal;
use super::thread_pool::ThreadPool;
use crate::error::{CoreError, CoreResult};

/// Where a partition sits in the original item list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Partition {
    /// Partition ordinal, `0..partition_count`.
    pub index: usize,
    /// Index of the partition's first item in the original list.
    pub first: usize,
}

/// Items per partition when `len` items are split `partitions` ways.
#[inline]
#[must_use]
pub fn partition_len(len: usize, partitions: usize) -> usize {
    len.div_ceil(partitions.max(1)).max(1)
}

/// Per-partition item slots. A slot is empty while its partition runs and
/// stays empty if the partition panicked.
type Slots<T> = Mutex<Vec<Option<Vec<T>>>>;

/// Takes a partition's items out of its slot, runs `func` and puts them back.
fn run_partition<T, F>(func: &F, slots: &Slots<T>, partition: Partition)
where
    F: Fn(Partition, &mut [T]),
{
    let Some(mut items) = slots.lock()[partition.index].take() else {
        return;
    };
    func(partition, &mut items);
    slots.lock()[partition.index] = Some(items);
}

/// Runs `func` over `ceil(len / partition_len)` contiguous partitions of
/// `items` on `pool` and blocks until all of them have finished.
///
/// Partitions rejected with [`CoreError::JobQueueFull`] run on the calling
/// thread. Must not be called from a job running on the same pool: with
/// every worker blocked in a barrier nobody is left to run the partitions.
///
/// # Errors
///
/// - [`CoreError::ThreadPoolShutdown`]; partitions already submitted are
///   waited for before returning.
/// - [`CoreError::JobPanicked`] if a partition panicked.
pub fn fork_join<T, F>(
    pool: &ThreadPool,
    items: Vec<T>,
    partitions: usize,
    priority: JobPriority,
    func: F,
) -> CoreResult<Vec<T>>
where
    T: Send + 'static,
    F: Fn(Partition, &mut [T]) + Send + Sync + 'static,
{
    let len = items.len();
    if len == 0 {
        return Ok(items);
    }

    let chunk = partition_len(len, partitions);
    let mut chunks = Vec::with_capacity(len.div_ceil(chunk));
    let mut rest = items;
    while !rest.is_empty() {
        let tail = rest.split_off(chunk.min(rest.len()));
        chunks.push(Some(std::mem::replace(&mut rest, tail)));
    }

    let count = chunks.len();
    let func = Arc::new(func);
    let slots: Arc<Slots<T>> = Arc::new(Mutex::new(chunks));
    let mut signals: Vec<Arc<CompletionSignal>> = Vec::with_capacity(count);

    tracing::debug!(items = len, partitions = count, "fork");

    for index in 0..count {
        let partition = Partition { index, first: index * chunk };
        let signal = Arc::new(CompletionSignal::new());
        let job_func = Arc::clone(&func);
        let job_slots = Arc::clone(&slots);

        let job = Job::new(priority, move || run_partition(&*job_func, &job_slots, partition))
            .with_completion(Arc::clone(&signal));

        match pool.submit_job(job) {
            Ok(()) => signals.push(signal),
            Err(CoreError::JobQueueFull { .. }) => {
                let inline = AssertUnwindSafe(|| run_partition(&*func, &slots, partition));
                if panic::catch_unwind(inline).is_err() {
                    tracing::error!(partition = index, "inline partition panicked");
                }
            }
            Err(e) => {
                for submitted in &signals {
                    submitted.wait();
                }
                return Err(e);
            }
        }
    }

    for signal in &signals {
        signal.wait();
    }

    let filled = std::mem::take(&mut *slots.lock());
    let mut joined = Vec::with_capacity(len);
    for (partition, slot) in filled.into_iter().enumerate() {
        joined.extend(slot.ok_or(CoreError::JobPanicked { partition })?);
    }
    Ok(joined)
}
