//! # KILN Rendering
//!
//! GPU-facing half of the KILN substrate:
//! - A size-bucketed buffer pool that keeps device allocations off the
//!   frame path and mirrors every buffer in a CPU shadow block
//! - Render command buffers that workers append to in parallel
//! - A fork-join render system that records one buffer per worker and
//!   replays them in a fixed order
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  ParallelRenderSystem                                    │
//! │    items ─► fork ─► worker 0 ─► RenderCommandBuffer[0]   │
//! │                 ├─► worker 1 ─► RenderCommandBuffer[1]   │
//! │                 └─► ...                                  │
//! │    join ─► replay main, then [0], [1], ... ─► CommandSink│
//! ├──────────────────────────────────────────────────────────┤
//! │  GpuBufferPool ─► FixedBlockPool per size ─► GpuBackend  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use kiln_rendering::{GpuBufferPool, HeadlessBackend, ParallelRenderSystem};
//!
//! let mut buffers = GpuBufferPool::new(HeadlessBackend::new(), 64 << 20, 16);
//! let vertices = buffers.alloc_buffer(4096)?;
//!
//! let render = ParallelRenderSystem::new(4, 256)?;
//! render.begin_frame();
//! let meshes = render.submit_parallel_work(meshes, |_, chunk, commands| {
//!     for mesh in chunk {
//!         commands.draw(0..mesh.vertex_count, 0..1);
//!     }
//! })?;
//! let stats = render.execute_command_buffers(&mut pass);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod backend;
pub mod buffer_pool;
pub mod command_buffer;
pub mod error;
pub mod parallel;

pub use backend::{
    BufferDescriptor, BufferHandle, GpuBackend, HeadlessBackend, PipelineHandle, WgpuBackend,
};
pub use buffer_pool::{
    BucketStats, GpuBuffer, GpuBufferPool, GpuMemoryBlock, BUFFER_ALIGNMENT, POOL_USAGE,
};
pub use command_buffer::{CommandSink, RenderCommand, RenderCommandBuffer, ReplayStats};
pub use error::{BackendError, RenderError, RenderResult};
pub use parallel::ParallelRenderSystem;
