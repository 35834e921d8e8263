//! # Fixed-Block Pool
//!
//! Equal-size block allocator carved from one arena at construction.

use crate::config::BlockPoolConfig;
use crate::error::{CoreError, CoreResult};

use super::{align_up, aligned_base};

/// End-of-list marker for the free list.
const NO_BLOCK: usize = usize::MAX;

/// Handle to a block handed out by a [`FixedBlockPool`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockHandle {
    /// Index of the block within the pool.
    index: usize,
}

impl BlockHandle {
    /// Returns the block index within its pool.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.index
    }
}

/// A pool of `block_count` equal-size blocks.
///
/// Every block starts on an `alignment` boundary inside a single arena that
/// is allocated once and never resized. The free list is an array of
/// "next free" indices parallel to the blocks, so alloc and free are O(1)
/// with no pointer chasing through the arena itself.
///
/// # Thread Safety
///
/// This pool is NOT thread-safe. Use one pool per thread or wrap in a mutex.
///
/// # Example
///
/// ```rust,ignore
/// let mut pool = FixedBlockPool::new(256, 16, 16)?;
///
/// let handle = pool.alloc(200)?;
/// pool.bytes_mut(handle).unwrap().fill(0xAB);
/// pool.free(handle);
/// ```
pub struct FixedBlockPool {
    /// Backing arena (over-allocated by `alignment - 1` bytes).
    storage: Box<[u8]>,
    /// Offset of the first aligned byte in `storage`.
    base: usize,
    /// Distance between two block starts.
    stride: usize,
    /// Nominal block size.
    block_size: usize,
    /// Block alignment.
    alignment: usize,
    /// Number of blocks.
    block_count: usize,
    /// Free-list links, parallel to the blocks.
    next_free: Box<[usize]>,
    /// Size requested for each live block.
    sizes: Box<[usize]>,
    /// Live flag for each block.
    in_use: Box<[bool]>,
    /// Head of the free list.
    free_head: usize,
    /// Number of live blocks.
    allocated_count: usize,
    /// Highest `allocated_count` ever reached.
    peak_count: usize,
}

impl FixedBlockPool {
    /// Creates a pool of `block_count` blocks of `block_size` bytes.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidAlignment`] if `alignment` is not a power of two.
    /// - [`CoreError::InvalidSize`] if `block_size` or `block_count` is zero,
    ///   or the arena size overflows.
    pub fn new(block_size: usize, block_count: usize, alignment: usize) -> CoreResult<Self> {
        if !alignment.is_power_of_two() {
            return Err(CoreError::InvalidAlignment(alignment));
        }
        if block_size == 0 {
            return Err(CoreError::InvalidSize { what: "block_size", value: block_size });
        }
        if block_count == 0 {
            return Err(CoreError::InvalidSize { what: "block_count", value: block_count });
        }

        let stride = align_up(block_size, alignment)
            .ok_or(CoreError::InvalidSize { what: "block_size", value: block_size })?;
        let arena_size = stride
            .checked_mul(block_count)
            .and_then(|size| size.checked_add(alignment - 1))
            .ok_or(CoreError::InvalidSize { what: "block_count", value: block_count })?;

        let storage = vec![0u8; arena_size].into_boxed_slice();
        let base = aligned_base(&storage, alignment);

        let mut pool = Self {
            storage,
            base,
            stride,
            block_size,
            alignment,
            block_count,
            next_free: vec![NO_BLOCK; block_count].into_boxed_slice(),
            sizes: vec![0; block_count].into_boxed_slice(),
            in_use: vec![false; block_count].into_boxed_slice(),
            free_head: NO_BLOCK,
            allocated_count: 0,
            peak_count: 0,
        };
        pool.rebuild_free_list();
        Ok(pool)
    }

    /// Creates a pool from its configuration section.
    ///
    /// # Errors
    ///
    /// Same as [`FixedBlockPool::new`].
    pub fn from_config(config: &BlockPoolConfig) -> CoreResult<Self> {
        Self::new(config.block_size, config.block_count, config.alignment)
    }

    /// Returns the nominal block size.
    #[inline]
    #[must_use]
    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    /// Returns the total number of blocks.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.block_count
    }

    /// Returns the block alignment.
    #[inline]
    #[must_use]
    pub const fn alignment(&self) -> usize {
        self.alignment
    }

    /// Returns the number of live blocks.
    #[inline]
    #[must_use]
    pub const fn allocated_count(&self) -> usize {
        self.allocated_count
    }

    /// Returns the number of free blocks.
    #[inline]
    #[must_use]
    pub const fn free_count(&self) -> usize {
        self.block_count - self.allocated_count
    }

    /// Allocates one block and reserves `size` bytes of it.
    ///
    /// This is a **O(1)** operation with **zero heap allocations**.
    ///
    /// # Errors
    ///
    /// - [`CoreError::BlockTooLarge`] if `size` exceeds the block size.
    /// - [`CoreError::OutOfMemory`] if every block is in use.
    pub fn alloc(&mut self, size: usize) -> CoreResult<BlockHandle> {
        if size > self.block_size {
            return Err(CoreError::BlockTooLarge { requested: size, max: self.block_size });
        }
        if self.free_head == NO_BLOCK {
            return Err(CoreError::OutOfMemory { requested: size, available: 0 });
        }

        let index = self.free_head;
        self.free_head = self.next_free[index];
        self.next_free[index] = NO_BLOCK;
        self.in_use[index] = true;
        self.sizes[index] = size;

        self.allocated_count += 1;
        self.peak_count = self.peak_count.max(self.allocated_count);

        Ok(BlockHandle { index })
    }

    /// Returns a block to the free list.
    ///
    /// Freeing a block that is already free, or a handle that does not
    /// belong to this pool, is a silent no-op.
    pub fn free(&mut self, handle: BlockHandle) {
        let index = handle.index;
        if index >= self.block_count || !self.in_use[index] {
            return;
        }

        self.in_use[index] = false;
        self.sizes[index] = 0;
        self.next_free[index] = self.free_head;
        self.free_head = index;
        self.allocated_count -= 1;
    }

    /// Returns true if the handle names a live block.
    #[inline]
    #[must_use]
    pub fn is_live(&self, handle: BlockHandle) -> bool {
        self.in_use.get(handle.index).copied().unwrap_or(false)
    }

    /// Byte offset of the block inside the arena.
    #[inline]
    #[must_use]
    pub const fn offset_of(&self, handle: BlockHandle) -> usize {
        handle.index * self.stride
    }

    /// Returns the `size` bytes reserved by a live block.
    #[must_use]
    pub fn bytes(&self, handle: BlockHandle) -> Option<&[u8]> {
        if !self.is_live(handle) {
            return None;
        }
        let start = self.base + self.offset_of(handle);
        self.storage.get(start..start + self.sizes[handle.index])
    }

    /// Returns the `size` bytes reserved by a live block, mutably.
    pub fn bytes_mut(&mut self, handle: BlockHandle) -> Option<&mut [u8]> {
        if !self.is_live(handle) {
            return None;
        }
        let start = self.base + self.offset_of(handle);
        let end = start + self.sizes[handle.index];
        self.storage.get_mut(start..end)
    }

    /// Marks every block free again.
    ///
    /// All outstanding handles become invalid. The caller must guarantee
    /// that nothing still reads through them.
    pub fn reset(&mut self) {
        self.in_use.fill(false);
        self.sizes.fill(0);
        self.allocated_count = 0;
        self.rebuild_free_list();
    }

    /// Fraction of blocks currently in use, in `[0, 1]`.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn usage(&self) -> f64 {
        self.allocated_count as f64 / self.block_count as f64
    }

    /// Highest fraction of blocks ever in use at once, in `[0, 1]`.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn peak_usage(&self) -> f64 {
        self.peak_count as f64 / self.block_count as f64
    }

    /// Links every block into the free list in ascending order.
    fn rebuild_free_list(&mut self) {
        for (index, next) in self.next_free.iter_mut().enumerate() {
            *next = if index + 1 < self.block_count { index + 1 } else { NO_BLOCK };
        }
        self.free_head = 0;
    }
}

impl std::fmt::Debug for FixedBlockPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedBlockPool")
            .field("block_size", &self.block_size)
            .field("block_count", &self.block_count)
            .field("alignment", &self.alignment)
            .field("allocated", &self.allocated_count)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_alloc_free() {
        let mut pool = FixedBlockPool::new(64, 4, 8).unwrap();

        let handle = pool.alloc(10).unwrap();
        assert_eq!(pool.bytes(handle).unwrap().len(), 10);
        assert_eq!(pool.allocated_count(), 1);

        pool.free(handle);
        assert_eq!(pool.allocated_count(), 0);
        assert!(pool.bytes(handle).is_none());
    }

    #[test]
    fn test_pool_reuse() {
        let mut pool = FixedBlockPool::new(32, 1, 8).unwrap();

        let h1 = pool.alloc(32).unwrap();
        pool.free(h1);

        let h2 = pool.alloc(16).unwrap();
        assert_eq!(h1.index(), h2.index()); // Same slot reused
    }

    #[test]
    fn test_pool_double_free_is_noop() {
        let mut pool = FixedBlockPool::new(32, 2, 8).unwrap();
        let h1 = pool.alloc(8).unwrap();
        let _h2 = pool.alloc(8).unwrap();

        pool.free(h1);
        pool.free(h1);
        assert_eq!(pool.allocated_count(), 1);

        // Free list must still hold exactly one block
        let _ = pool.alloc(8).unwrap();
        assert!(matches!(pool.alloc(8), Err(CoreError::OutOfMemory { .. })));
    }

    #[test]
    fn test_pool_rejects_bad_alignment() {
        assert_eq!(
            FixedBlockPool::new(64, 4, 12).unwrap_err(),
            CoreError::InvalidAlignment(12)
        );
    }

    #[test]
    fn test_pool_block_too_large() {
        let mut pool = FixedBlockPool::new(64, 4, 8).unwrap();
        assert_eq!(
            pool.alloc(65).unwrap_err(),
            CoreError::BlockTooLarge { requested: 65, max: 64 }
        );
    }

    #[test]
    fn test_pool_blocks_are_aligned() {
        let mut pool = FixedBlockPool::new(24, 8, 64).unwrap();
        for _ in 0..8 {
            let handle = pool.alloc(24).unwrap();
            let ptr = pool.bytes(handle).unwrap().as_ptr();
            assert_eq!(ptr as usize % 64, 0);
        }
    }

    #[test]
    fn test_pool_writes_are_isolated() {
        let mut pool = FixedBlockPool::new(16, 2, 16).unwrap();
        let a = pool.alloc(16).unwrap();
        let b = pool.alloc(16).unwrap();

        pool.bytes_mut(a).unwrap().fill(0xAA);
        pool.bytes_mut(b).unwrap().fill(0xBB);

        assert!(pool.bytes(a).unwrap().iter().all(|&byte| byte == 0xAA));
        assert!(pool.bytes(b).unwrap().iter().all(|&byte| byte == 0xBB));
    }

    #[test]
    fn test_pool_reset_and_peak() {
        let mut pool = FixedBlockPool::new(8, 4, 8).unwrap();
        for _ in 0..3 {
            let _ = pool.alloc(8).unwrap();
        }
        pool.reset();

        assert_eq!(pool.allocated_count(), 0);
        assert!((pool.usage() - 0.0).abs() < f64::EPSILON);
        assert!((pool.peak_usage() - 0.75).abs() < f64::EPSILON);
        assert_eq!(pool.free_count(), 4);
    }
}
