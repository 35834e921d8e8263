//! # Render Command Buffers
//!
//! Append-only logs of drawing operations, recorded from any thread and
//! replayed later against a [`CommandSink`] (usually a render pass).
//!
//! Buffers are cleared, not reallocated, each frame.

use std::ops::{AddAssign, Range};

use parking_lot::Mutex;

use crate::backend::{BufferHandle, PipelineHandle};

/// One recorded operation.
#[derive(Clone, Debug, PartialEq)]
pub enum RenderCommand {
    /// Non-indexed draw.
    Draw {
        /// Vertex range.
        vertices: Range<u32>,
        /// Instance range.
        instances: Range<u32>,
    },
    /// Indexed draw.
    DrawIndexed {
        /// Index range.
        indices: Range<u32>,
        /// Value added to each index before vertex lookup.
        base_vertex: i32,
        /// Instance range.
        instances: Range<u32>,
    },
    /// Bind a pipeline.
    SetPipeline(PipelineHandle),
    /// Bind a vertex buffer to a slot.
    SetVertexBuffer {
        /// Vertex buffer slot.
        slot: u32,
        /// Buffer to bind.
        buffer: BufferHandle,
    },
    /// Clear the current target to a color.
    Clear {
        /// RGBA clear color.
        color: [f32; 4],
    },
    /// Ordering barrier between the commands before and after it.
    Barrier,
}

impl RenderCommand {
    /// Whether this command issues a draw call.
    #[must_use]
    pub const fn is_draw(&self) -> bool {
        matches!(self, Self::Draw { .. } | Self::DrawIndexed { .. })
    }
}

/// Receiver of replayed commands.
///
/// The four binding/draw calls mirror a render pass and are invoked
/// verbatim. Clears and barriers default to no-ops for sinks that handle
/// them at pass boundaries instead.
pub trait CommandSink {
    /// Non-indexed draw.
    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>);

    /// Indexed draw.
    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>);

    /// Bind a pipeline.
    fn set_pipeline(&mut self, pipeline: PipelineHandle);

    /// Bind a vertex buffer.
    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle);

    /// Clear the current target.
    fn clear(&mut self, _color: [f32; 4]) {}

    /// Ordering barrier.
    fn barrier(&mut self) {}
}

/// Collecting sink: replaying into a `Vec` copies the commands out.
impl CommandSink for Vec<RenderCommand> {
    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        self.push(RenderCommand::Draw { vertices, instances });
    }

    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>) {
        self.push(RenderCommand::DrawIndexed {
            indices,
            base_vertex,
            instances,
        });
    }

    fn set_pipeline(&mut self, pipeline: PipelineHandle) {
        self.push(RenderCommand::SetPipeline(pipeline));
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle) {
        self.push(RenderCommand::SetVertexBuffer { slot, buffer });
    }

    fn clear(&mut self, color: [f32; 4]) {
        self.push(RenderCommand::Clear { color });
    }

    fn barrier(&mut self) {
        self.push(RenderCommand::Barrier);
    }
}

/// Counts from one replay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Commands replayed.
    pub commands: usize,
    /// Draw calls among them.
    pub draw_calls: usize,
}

impl AddAssign for ReplayStats {
    fn add_assign(&mut self, other: Self) {
        self.commands += other.commands;
        self.draw_calls += other.draw_calls;
    }
}

/// Lock-protected command log.
///
/// Several jobs may append to the same buffer at once (the main-thread
/// buffer is the fallback for every out-of-range worker id). Order within
/// one buffer is the order the lock was acquired in.
#[derive(Debug, Default)]
pub struct RenderCommandBuffer {
    commands: Mutex<Vec<RenderCommand>>,
}

impl RenderCommandBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty buffer with room for `capacity` commands.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            commands: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    /// Appends a command.
    #[inline]
    pub fn record(&self, command: RenderCommand) {
        self.commands.lock().push(command);
    }

    /// Appends several commands under one lock acquisition, keeping them
    /// contiguous.
    pub fn record_all(&self, commands: impl IntoIterator<Item = RenderCommand>) {
        self.commands.lock().extend(commands);
    }

    /// Records a non-indexed draw.
    pub fn draw(&self, vertices: Range<u32>, instances: Range<u32>) {
        self.record(RenderCommand::Draw { vertices, instances });
    }

    /// Records an indexed draw.
    pub fn draw_indexed(&self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>) {
        self.record(RenderCommand::DrawIndexed {
            indices,
            base_vertex,
            instances,
        });
    }

    /// Records a pipeline bind.
    pub fn set_pipeline(&self, pipeline: PipelineHandle) {
        self.record(RenderCommand::SetPipeline(pipeline));
    }

    /// Records a vertex buffer bind.
    pub fn set_vertex_buffer(&self, slot: u32, buffer: BufferHandle) {
        self.record(RenderCommand::SetVertexBuffer { slot, buffer });
    }

    /// Records a clear of the current target.
    pub fn clear_target(&self, color: [f32; 4]) {
        self.record(RenderCommand::Clear { color });
    }

    /// Records an ordering barrier.
    pub fn barrier(&self) {
        self.record(RenderCommand::Barrier);
    }

    /// Drops every command, keeping the allocation.
    pub fn clear(&self) {
        self.commands.lock().clear();
    }

    /// Number of recorded commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.lock().len()
    }

    /// Whether nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.lock().is_empty()
    }

    /// Copy of the recorded commands.
    #[must_use]
    pub fn snapshot(&self) -> Vec<RenderCommand> {
        self.commands.lock().clone()
    }

    /// Replays every command, in recording order, into `sink`.
    ///
    /// The buffer stays locked for the whole replay; recording into it from
    /// inside the sink deadlocks.
    pub fn execute<S: CommandSink + ?Sized>(&self, sink: &mut S) -> ReplayStats {
        let commands = self.commands.lock();
        let mut stats = ReplayStats::default();

        for command in commands.iter() {
            match command {
                RenderCommand::Draw { vertices, instances } => {
                    sink.draw(vertices.clone(), instances.clone());
                }
                RenderCommand::DrawIndexed {
                    indices,
                    base_vertex,
                    instances,
                } => sink.draw_indexed(indices.clone(), *base_vertex, instances.clone()),
                RenderCommand::SetPipeline(pipeline) => sink.set_pipeline(*pipeline),
                RenderCommand::SetVertexBuffer { slot, buffer } => {
                    sink.set_vertex_buffer(*slot, *buffer);
                }
                RenderCommand::Clear { color } => sink.clear(*color),
                RenderCommand::Barrier => sink.barrier(),
            }

            stats.commands += 1;
            if command.is_draw() {
                stats.draw_calls += 1;
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replay_preserves_order() {
        let buffer = RenderCommandBuffer::new();
        buffer.set_pipeline(PipelineHandle(7));
        buffer.set_vertex_buffer(0, BufferHandle(3));
        buffer.draw(0..3, 0..1);
        buffer.draw_indexed(0..6, -2, 0..4);
        buffer.barrier();

        let mut replayed = Vec::new();
        let stats = buffer.execute(&mut replayed);

        assert_eq!(replayed, buffer.snapshot());
        assert_eq!(replayed[0], RenderCommand::SetPipeline(PipelineHandle(7)));
        assert_eq!(
            stats,
            ReplayStats {
                commands: 5,
                draw_calls: 2
            }
        );
    }

    #[test]
    fn test_clear_keeps_buffer_usable() {
        let buffer = RenderCommandBuffer::with_capacity(8);
        buffer.clear_target([0.0, 0.0, 0.0, 1.0]);
        buffer.draw(0..3, 0..1);
        assert_eq!(buffer.len(), 2);

        buffer.clear();
        assert!(buffer.is_empty());

        buffer.draw(0..6, 0..1);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_default_sink_ignores_clear_and_barrier() {
        #[derive(Default)]
        struct DrawCounter(usize);

        impl CommandSink for DrawCounter {
            fn draw(&mut self, _: Range<u32>, _: Range<u32>) {
                self.0 += 1;
            }
            fn draw_indexed(&mut self, _: Range<u32>, _: i32, _: Range<u32>) {
                self.0 += 1;
            }
            fn set_pipeline(&mut self, _: PipelineHandle) {}
            fn set_vertex_buffer(&mut self, _: u32, _: BufferHandle) {}
        }

        let buffer = RenderCommandBuffer::new();
        buffer.clear_target([1.0; 4]);
        buffer.barrier();
        buffer.draw(0..3, 0..1);

        let mut counter = DrawCounter::default();
        let stats = buffer.execute(&mut counter);
        assert_eq!(counter.0, 1);
        assert_eq!(stats.commands, 3);
    }
}
