//! # GPU Buffer Pool
//!
//! Size-bucketed registry of device buffers.
//!
//! Every request is rounded up to [`BUFFER_ALIGNMENT`] and served from a
//! [`FixedBlockPool`] dedicated to that rounded size. The block is the
//! buffer's CPU shadow copy and fixes its [`GpuMemoryBlock`] inside the
//! bucket arena; the device buffer itself comes from the injected
//! [`GpuBackend`].
//!
//! ## Budget
//!
//! The pool never hands out more than its configured budget. The same
//! budget bounds the host shadow arenas: a new bucket gets at most as many
//! blocks as still fit, and idle buckets are released before a new one is
//! refused. Exhaustion is a typed [`CoreError::OutOfMemory`], never a
//! silent regrow.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use kiln_core::{BlockHandle, CoreError, FixedBlockPool, RenderConfig};

use crate::backend::{BufferDescriptor, BufferHandle, GpuBackend};
use crate::error::{BackendError, RenderError, RenderResult};

/// Every pooled buffer is a multiple of this many bytes.
pub const BUFFER_ALIGNMENT: usize = 256;

/// Usage flags requested for every pooled buffer, so one bucket can back
/// vertex, index, uniform and storage data alike.
pub const POOL_USAGE: wgpu::BufferUsages = wgpu::BufferUsages::VERTEX
    .union(wgpu::BufferUsages::INDEX)
    .union(wgpu::BufferUsages::UNIFORM)
    .union(wgpu::BufferUsages::STORAGE)
    .union(wgpu::BufferUsages::COPY_SRC)
    .union(wgpu::BufferUsages::COPY_DST);

/// Pool identities, so buffers cannot be returned to the wrong pool.
static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Logical region of a buffer inside its bucket arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GpuMemoryBlock {
    /// Byte offset inside the bucket arena.
    pub offset: usize,
    /// Rounded size in bytes.
    pub size: usize,
}

/// A buffer handed out by a [`GpuBufferPool`].
///
/// Not `Clone`: the value is the ownership token and must be given back
/// through [`GpuBufferPool::free_buffer`].
#[derive(Debug, PartialEq, Eq)]
pub struct GpuBuffer {
    pool_id: u64,
    block: BlockHandle,
    requested: usize,
    memory: GpuMemoryBlock,
    handle: Option<BufferHandle>,
}

impl GpuBuffer {
    /// Size that was asked for.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.requested
    }

    /// Size actually reserved (rounded to [`BUFFER_ALIGNMENT`]).
    #[must_use]
    pub const fn allocated_size(&self) -> usize {
        self.memory.size
    }

    /// Region inside the bucket arena.
    #[must_use]
    pub const fn memory(&self) -> GpuMemoryBlock {
        self.memory
    }

    /// Device buffer, or `None` when the backend has no device path.
    #[must_use]
    pub const fn handle(&self) -> Option<BufferHandle> {
        self.handle
    }
}

/// Usage statistics of one size bucket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BucketStats {
    /// Rounded buffer size served by this bucket.
    pub block_size: usize,
    /// Blocks in the bucket.
    pub capacity: usize,
    /// Live buffers.
    pub live: usize,
    /// Highest number of live buffers ever reached.
    pub peak: usize,
    /// Buffers handed out since the bucket was created.
    pub total_allocations: u64,
}

/// One size class.
struct Bucket {
    blocks: FixedBlockPool,
    peak: usize,
    total_allocations: u64,
}

impl Bucket {
    fn stats(&self) -> BucketStats {
        BucketStats {
            block_size: self.blocks.block_size(),
            capacity: self.blocks.capacity(),
            live: self.blocks.allocated_count(),
            peak: self.peak,
            total_allocations: self.total_allocations,
        }
    }
}

/// Size-bucketed GPU buffer pool.
///
/// # Thread Safety
///
/// Single writer, like the block pools it is built on. The backend may be
/// shared; wrap it in an `Arc` to hand it to several pools.
///
/// # Example
///
/// ```rust,ignore
/// let mut pool = GpuBufferPool::new(HeadlessBackend::new(), 64 << 20, 16);
///
/// let uniforms = pool.alloc_buffer(200)?; // served from the 256-byte bucket
/// pool.upload(&uniforms, 0, &[camera])?;
/// pool.free_buffer(uniforms)?;
/// ```
pub struct GpuBufferPool<B: GpuBackend> {
    id: u64,
    backend: B,
    buckets: BTreeMap<usize, Bucket>,
    blocks_per_bucket: usize,
    budget: u64,
    used: u64,
    /// Bytes of shadow arena held by all buckets.
    reserved: u64,
    shadow_only_reported: bool,
}

impl<B: GpuBackend> GpuBufferPool<B> {
    /// Creates an empty pool with a budget of `budget` bytes and up to
    /// `blocks_per_bucket` buffers per size class.
    #[must_use]
    pub fn new(backend: B, budget: u64, blocks_per_bucket: usize) -> Self {
        Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            backend,
            buckets: BTreeMap::new(),
            blocks_per_bucket,
            budget,
            used: 0,
            reserved: 0,
            shadow_only_reported: false,
        }
    }

    /// Creates a pool from the render configuration section.
    #[must_use]
    pub fn from_config(backend: B, config: &RenderConfig) -> Self {
        Self::new(backend, config.gpu_budget, config.blocks_per_bucket)
    }

    /// The injected backend.
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Allocates a buffer of at least `size` bytes.
    ///
    /// # Errors
    ///
    /// - [`CoreError::OutOfMemory`] if the budget or the size bucket is
    ///   exhausted, or a new bucket does not fit next to the live ones.
    /// - [`CoreError::InvalidSize`] if `blocks_per_bucket` is zero.
    /// - Any backend error other than [`BackendError::Unimplemented`],
    ///   unchanged. `Unimplemented` leaves the buffer shadow-only.
    pub fn alloc_buffer(&mut self, size: usize) -> RenderResult<GpuBuffer> {
        let rounded = size
            .max(1)
            .checked_next_multiple_of(BUFFER_ALIGNMENT)
            .ok_or(CoreError::BlockTooLarge {
                requested: size,
                max: usize::MAX - BUFFER_ALIGNMENT + 1,
            })?;

        let available = self.budget.saturating_sub(self.used);
        if rounded as u64 > available {
            return Err(CoreError::OutOfMemory {
                requested: rounded,
                available: usize::try_from(available).unwrap_or(usize::MAX),
            }
            .into());
        }

        if !self.buckets.contains_key(&rounded) {
            let fresh = self.new_bucket(rounded)?;
            self.buckets.insert(rounded, fresh);
        }
        let Some(bucket) = self.buckets.get_mut(&rounded) else {
            return Err(CoreError::OutOfMemory { requested: rounded, available: 0 }.into());
        };

        let block = bucket.blocks.alloc(size)?;

        let descriptor = BufferDescriptor {
            label: Some(format!("kiln.pool.{rounded}")),
            size: rounded as u64,
            usage: POOL_USAGE,
        };
        let handle = match self.backend.create_buffer(&descriptor) {
            Ok(handle) => Some(handle),
            Err(BackendError::Unimplemented) => {
                if !self.shadow_only_reported {
                    tracing::warn!("backend cannot create device buffers, pool is shadow-only");
                    self.shadow_only_reported = true;
                }
                None
            }
            Err(e) => {
                bucket.blocks.free(block);
                return Err(e.into());
            }
        };

        bucket.total_allocations += 1;
        bucket.peak = bucket.peak.max(bucket.blocks.allocated_count());
        self.used += rounded as u64;

        Ok(GpuBuffer {
            pool_id: self.id,
            block,
            requested: size,
            memory: GpuMemoryBlock {
                offset: bucket.blocks.offset_of(block),
                size: rounded,
            },
            handle,
        })
    }

    /// Releases a buffer and its device resource.
    ///
    /// The pool bookkeeping is released even if the backend then fails to
    /// destroy the device buffer.
    ///
    /// # Errors
    ///
    /// - [`RenderError::ForeignBuffer`] if another pool allocated it.
    /// - The backend's error from destroying the device buffer.
    pub fn free_buffer(&mut self, buffer: GpuBuffer) -> RenderResult<()> {
        self.bucket_mut(&buffer)?.blocks.free(buffer.block);
        self.used = self.used.saturating_sub(buffer.memory.size as u64);

        if let Some(handle) = buffer.handle {
            self.backend.destroy_buffer(handle)?;
        }
        Ok(())
    }

    /// CPU shadow of the buffer, exactly [`GpuBuffer::size`] bytes.
    #[must_use]
    pub fn shadow(&self, buffer: &GpuBuffer) -> Option<&[u8]> {
        if buffer.pool_id != self.id {
            return None;
        }
        self.buckets
            .get(&buffer.memory.size)?
            .blocks
            .bytes(buffer.block)
    }

    /// Mutable CPU shadow of the buffer.
    #[must_use]
    pub fn shadow_mut(&mut self, buffer: &GpuBuffer) -> Option<&mut [u8]> {
        self.bucket_mut(buffer).ok()?.blocks.bytes_mut(buffer.block)
    }

    /// Copies `data` into the shadow copy at byte `offset`.
    ///
    /// # Errors
    ///
    /// - [`RenderError::ForeignBuffer`] if another pool allocated it.
    /// - [`CoreError::BlockTooLarge`] if the data runs past the buffer.
    pub fn upload<T: bytemuck::Pod>(
        &mut self,
        buffer: &GpuBuffer,
        offset: usize,
        data: &[T],
    ) -> RenderResult<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let end = offset.checked_add(bytes.len()).ok_or(CoreError::BlockTooLarge {
            requested: usize::MAX,
            max: buffer.requested,
        })?;
        if end > buffer.requested {
            return Err(CoreError::BlockTooLarge {
                requested: end,
                max: buffer.requested,
            }
            .into());
        }

        let bucket = self.bucket_mut(buffer)?;
        if let Some(shadow) = bucket.blocks.bytes_mut(buffer.block) {
            shadow[offset..end].copy_from_slice(bytes);
        }
        Ok(())
    }

    /// Fraction of the budget in use, in `[0, 1]`.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn memory_usage(&self) -> f64 {
        if self.budget == 0 {
            return 0.0;
        }
        self.used as f64 / self.budget as f64
    }

    /// Bytes in use (rounded sizes).
    #[must_use]
    pub const fn used_bytes(&self) -> u64 {
        self.used
    }

    /// Bytes of shadow arena held by all buckets, live or idle.
    #[must_use]
    pub const fn reserved_bytes(&self) -> u64 {
        self.reserved
    }

    /// Configured budget in bytes.
    #[must_use]
    pub const fn budget(&self) -> u64 {
        self.budget
    }

    /// Live buffers across all buckets.
    #[must_use]
    pub fn live_buffers(&self) -> usize {
        self.buckets.values().map(|b| b.blocks.allocated_count()).sum()
    }

    /// Statistics of the bucket that serves `size`-byte requests.
    #[must_use]
    pub fn bucket_stats(&self, size: usize) -> Option<BucketStats> {
        let rounded = size.max(1).checked_next_multiple_of(BUFFER_ALIGNMENT)?;
        self.buckets.get(&rounded).map(Bucket::stats)
    }

    /// Statistics of every bucket, smallest size first.
    pub fn buckets(&self) -> impl Iterator<Item = BucketStats> + '_ {
        self.buckets.values().map(Bucket::stats)
    }

    /// Releases the arenas of buckets with no live buffers.
    ///
    /// Live buffers never move. Returns the number of arena bytes released.
    pub fn defragment(&mut self) -> usize {
        let before = self.buckets.len();
        let mut reclaimed = 0;

        self.buckets.retain(|&size, bucket| {
            let idle = bucket.blocks.allocated_count() == 0;
            if idle {
                reclaimed += size * bucket.blocks.capacity();
            }
            !idle
        });

        self.reserved = self.reserved.saturating_sub(reclaimed as u64);
        if reclaimed > 0 {
            tracing::debug!(
                buckets = before - self.buckets.len(),
                bytes = reclaimed,
                "released idle buffer buckets"
            );
        }
        reclaimed
    }

    /// Blocks a new `rounded`-byte bucket may hold within the budget.
    fn blocks_that_fit(&self, rounded: usize) -> usize {
        let headroom = self.budget.saturating_sub(self.reserved) / rounded as u64;
        self.blocks_per_bucket
            .min(usize::try_from(headroom).unwrap_or(usize::MAX))
    }

    /// Carves a bucket for `rounded`-byte buffers, releasing idle buckets
    /// first if the budget is already reserved.
    fn new_bucket(&mut self, rounded: usize) -> RenderResult<Bucket> {
        if self.blocks_per_bucket == 0 {
            return Err(CoreError::InvalidSize {
                what: "blocks_per_bucket",
                value: 0,
            }
            .into());
        }

        let mut count = self.blocks_that_fit(rounded);
        if count == 0 && self.defragment() > 0 {
            count = self.blocks_that_fit(rounded);
        }
        if count == 0 {
            return Err(CoreError::OutOfMemory {
                requested: rounded,
                available: usize::try_from(self.budget.saturating_sub(self.reserved))
                    .unwrap_or(usize::MAX),
            }
            .into());
        }

        let blocks = FixedBlockPool::new(rounded, count, BUFFER_ALIGNMENT)?;
        self.reserved += (rounded * count) as u64;
        tracing::debug!(block_size = rounded, blocks = count, "created buffer bucket");

        Ok(Bucket {
            blocks,
            peak: 0,
            total_allocations: 0,
        })
    }

    fn bucket_mut(&mut self, buffer: &GpuBuffer) -> RenderResult<&mut Bucket> {
        let foreign = RenderError::ForeignBuffer {
            owner: buffer.pool_id,
            pool: self.id,
        };
        if buffer.pool_id != self.id {
            return Err(foreign);
        }
        self.buckets.get_mut(&buffer.memory.size).ok_or(foreign)
    }
}

impl<B: GpuBackend> std::fmt::Debug for GpuBufferPool<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuBufferPool")
            .field("id", &self.id)
            .field("buckets", &self.buckets.len())
            .field("used", &self.used)
            .field("budget", &self.budget)
            .finish_non_exhaustive()
    }
}
