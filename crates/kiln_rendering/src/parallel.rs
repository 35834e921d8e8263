//! # Parallel Render System
//!
//! Fork-join command recording: a work array is split into one contiguous
//! chunk per worker, each chunk records into that worker's
//! [`RenderCommandBuffer`], and the caller blocks until every chunk is done.
//!
//! ## Replay order
//!
//! The main-thread buffer replays first, then worker buffers in index
//! order. Chunk `i` always records into worker buffer `i`, so a frame
//! recorded from the same items replays the same way regardless of which
//! thread ran which chunk.

use std::sync::Arc;

use kiln_core::jobs::partition_len;
use kiln_core::{default_worker_count, fork_join, JobPriority, Partition, RenderConfig, ThreadPool};

use crate::command_buffer::{CommandSink, RenderCommandBuffer, ReplayStats};
use crate::error::RenderResult;

/// Commands reserved per buffer at construction.
const INITIAL_COMMANDS: usize = 256;

/// Main-thread buffer plus one buffer per worker.
#[derive(Debug)]
struct FrameBuffers {
    main: RenderCommandBuffer,
    workers: Vec<RenderCommandBuffer>,
}

impl FrameBuffers {
    /// Worker buffer `id`, or the main buffer for ids out of range.
    fn get(&self, id: usize) -> &RenderCommandBuffer {
        self.workers.get(id).unwrap_or(&self.main)
    }
}

/// Parallel command recording over a dedicated worker pool.
///
/// # Example
///
/// ```rust,ignore
/// let render = ParallelRenderSystem::new(4, 256)?;
///
/// render.begin_frame();
/// render.command_buffer(usize::MAX).clear_target([0.0, 0.0, 0.0, 1.0]);
/// let meshes = render.submit_parallel_work(meshes, |_, chunk, commands| {
///     for mesh in chunk.iter() {
///         commands.set_vertex_buffer(0, mesh.vertices);
///         commands.draw(0..mesh.vertex_count, 0..1);
///     }
/// })?;
/// let stats = render.execute_command_buffers(&mut pass);
/// ```
#[derive(Debug)]
pub struct ParallelRenderSystem {
    pool: ThreadPool,
    buffers: Arc<FrameBuffers>,
}

impl ParallelRenderSystem {
    /// Creates a render system with `worker_count` recording workers.
    ///
    /// # Errors
    ///
    /// Same as [`ThreadPool::new`].
    pub fn new(worker_count: usize, queue_capacity: usize) -> RenderResult<Self> {
        let pool = ThreadPool::new(worker_count, queue_capacity)?;
        let buffers = FrameBuffers {
            main: RenderCommandBuffer::with_capacity(INITIAL_COMMANDS),
            workers: (0..worker_count)
                .map(|_| RenderCommandBuffer::with_capacity(INITIAL_COMMANDS))
                .collect(),
        };

        Ok(Self {
            pool,
            buffers: Arc::new(buffers),
        })
    }

    /// Creates a render system with one worker per CPU minus one.
    ///
    /// # Errors
    ///
    /// Same as [`ThreadPool::new`].
    pub fn with_default_workers(queue_capacity: usize) -> RenderResult<Self> {
        Self::new(default_worker_count(), queue_capacity)
    }

    /// Creates a render system from the render configuration section.
    ///
    /// # Errors
    ///
    /// Same as [`ThreadPool::new`].
    pub fn from_config(config: &RenderConfig) -> RenderResult<Self> {
        Self::new(config.resolved_worker_count(), config.queue_capacity)
    }

    /// Number of recording workers.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.buffers.workers.len()
    }

    /// The recording pool.
    #[must_use]
    pub fn pool(&self) -> &ThreadPool {
        &self.pool
    }

    /// Command buffer of worker `thread_id`.
    ///
    /// Any id outside `0..worker_count` gets the main-thread buffer.
    #[must_use]
    pub fn command_buffer(&self, thread_id: usize) -> &RenderCommandBuffer {
        self.buffers.get(thread_id)
    }

    /// The main-thread buffer.
    #[must_use]
    pub fn main_command_buffer(&self) -> &RenderCommandBuffer {
        &self.buffers.main
    }

    /// Clears every buffer for a new frame, keeping their allocations.
    pub fn begin_frame(&self) {
        self.buffers.main.clear();
        for buffer in &self.buffers.workers {
            buffer.clear();
        }
    }

    /// Commands recorded across all buffers.
    #[must_use]
    pub fn recorded_commands(&self) -> usize {
        let workers: usize = self.buffers.workers.iter().map(RenderCommandBuffer::len).sum();
        self.buffers.main.len() + workers
    }

    /// Splits `items` into one contiguous chunk per worker, runs
    /// `func(partition, chunk, buffer)` for every chunk with chunk `i`
    /// recording into worker buffer `i`, and blocks until all chunks are
    /// done. The items come back in their original order.
    ///
    /// Must not be called from a job running on this system's own pool.
    ///
    /// # Errors
    ///
    /// Same as [`fork_join`]: a chunk panicked. Chunks the queue has no room
    /// for are recorded on the calling thread.
    pub fn submit_parallel_work<T, F>(&self, items: Vec<T>, func: F) -> RenderResult<Vec<T>>
    where
        T: Send + 'static,
        F: Fn(Partition, &mut [T], &RenderCommandBuffer) + Send + Sync + 'static,
    {
        let workers = self.worker_count();
        let len = items.len();
        if len > 0 {
            tracing::debug!(
                items = len,
                chunks = len.div_ceil(partition_len(len, workers)),
                "recording in parallel"
            );
        }

        let buffers = Arc::clone(&self.buffers);
        let items = fork_join(
            &self.pool,
            items,
            workers,
            JobPriority::High,
            move |partition, chunk| func(partition, chunk, buffers.get(partition.index)),
        )?;
        Ok(items)
    }

    /// Replays the main buffer, then every worker buffer in index order,
    /// into `sink`.
    pub fn execute_command_buffers<S: CommandSink + ?Sized>(&self, sink: &mut S) -> ReplayStats {
        let mut stats = self.buffers.main.execute(sink);
        for buffer in &self.buffers.workers {
            stats += buffer.execute(sink);
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_buffer::RenderCommand;
    use crate::error::RenderError;
    use kiln_core::CoreError;

    #[test]
    fn test_out_of_range_id_falls_back_to_main() {
        let render = ParallelRenderSystem::new(2, 16).unwrap();
        render.command_buffer(2).barrier();
        render.command_buffer(usize::MAX).barrier();
        render.command_buffer(1).draw(0..3, 0..1);

        assert_eq!(render.main_command_buffer().len(), 2);
        assert_eq!(render.command_buffer(1).len(), 1);
        assert!(render.command_buffer(0).is_empty());
    }

    #[test]
    fn test_chunk_records_into_its_own_buffer() {
        let render = ParallelRenderSystem::new(3, 16).unwrap();
        let items: Vec<u32> = (0..9).collect();

        let items = render
            .submit_parallel_work(items, |_, chunk, commands| {
                for item in chunk.iter() {
                    commands.draw(*item..*item + 1, 0..1);
                }
            })
            .unwrap();

        assert_eq!(items, (0..9).collect::<Vec<_>>());
        for worker in 0..3u32 {
            let expected: Vec<_> = (worker * 3..worker * 3 + 3)
                .map(|v| RenderCommand::Draw {
                    vertices: v..v + 1,
                    instances: 0..1,
                })
                .collect();
            assert_eq!(render.command_buffer(worker as usize).snapshot(), expected);
        }
    }

    #[test]
    fn test_begin_frame_clears_everything() {
        let render = ParallelRenderSystem::new(2, 16).unwrap();
        render.main_command_buffer().barrier();
        render.command_buffer(0).barrier();
        render.command_buffer(1).barrier();
        assert_eq!(render.recorded_commands(), 3);

        render.begin_frame();
        assert_eq!(render.recorded_commands(), 0);
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert_eq!(
            ParallelRenderSystem::new(0, 16).unwrap_err(),
            RenderError::Core(CoreError::InvalidThreadCount)
        );
    }
}
