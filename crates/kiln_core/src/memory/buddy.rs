//! # Buddy Allocator
//!
//! Power-of-two buddy system for variable, unpredictable-size allocations.
//!
//! ## Layout
//!
//! ```text
//! order 4  [                         1024                          ]
//! order 3  [            512            ][            512            ]
//! order 2  [     256     ][     256     ][     256     ][     256     ]
//! order 1  [ 128 ][ 128 ] ...
//! order 0  [64][64] ...
//! ```
//!
//! An order-`k` block spans `min_block_size << k` bytes and starts at an
//! arena offset that is a multiple of its own size. Its buddy is found by
//! flipping bit `k` of its index in min-block units. Offsets are relative to
//! the arena, so the XOR never depends on where the arena lives in memory.
//!
//! Free lists are singly linked through an index array parallel to the
//! min-size blocks; `free_order` records which list (if any) a block heads
//! so that a buddy's presence is an O(1) check and removal is one walk.

use crate::config::BuddyConfig;
use crate::error::{CoreError, CoreResult};

use super::aligned_base;

/// End-of-list marker.
const NO_BLOCK: usize = usize::MAX;

/// Arena base alignment cap; offsets stay correct beyond it, only the
/// absolute address alignment of huge blocks is not guaranteed.
const MAX_BASE_ALIGN: usize = 4096;

/// A live allocation handed out by a [`BuddyAllocator`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BuddyAllocation {
    offset: usize,
    order: usize,
    block_size: usize,
    requested: usize,
}

impl BuddyAllocation {
    /// Byte offset inside the arena.
    #[inline]
    #[must_use]
    pub const fn offset(self) -> usize {
        self.offset
    }

    /// Order of the block backing this allocation.
    #[inline]
    #[must_use]
    pub const fn order(self) -> usize {
        self.order
    }

    /// Size of the backing block (`min_block_size << order`).
    #[inline]
    #[must_use]
    pub const fn size(self) -> usize {
        self.block_size
    }

    /// Size originally requested.
    #[inline]
    #[must_use]
    pub const fn requested(self) -> usize {
        self.requested
    }

    /// Byte range covered by the backing block.
    #[inline]
    #[must_use]
    pub const fn range(self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.block_size
    }
}

/// Buddy allocator over one arena of `total_size` bytes.
///
/// # Thread Safety
///
/// NOT thread-safe. Callers sharing one across threads must lock it.
pub struct BuddyAllocator {
    storage: Box<[u8]>,
    base: usize,
    total_size: usize,
    min_block_size: usize,
    max_order: usize,
    /// Free-list head per order (index in min-block units).
    free_heads: Box<[usize]>,
    /// Free-list links, per min-block index.
    next_free: Box<[usize]>,
    /// Order of the free list a block starting here is linked into.
    free_order: Box<[Option<usize>]>,
    /// Order of the live allocation starting here.
    live_order: Box<[Option<usize>]>,
    free_bytes: usize,
}

impl BuddyAllocator {
    /// Creates an allocator over `total_size` bytes with the given minimum
    /// block size.
    ///
    /// `max_order = log2(total_size / min_block_size)`; the arena starts as a
    /// single free block of that order.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidAlignment`] if `min_block_size` is not a power
    ///   of two.
    /// - [`CoreError::InvalidSize`] if `total_size` is not a power-of-two
    ///   multiple of `min_block_size`.
    pub fn new(total_size: usize, min_block_size: usize) -> CoreResult<Self> {
        if !min_block_size.is_power_of_two() {
            return Err(CoreError::InvalidAlignment(min_block_size));
        }
        if total_size < min_block_size
            || total_size % min_block_size != 0
            || !(total_size / min_block_size).is_power_of_two()
        {
            return Err(CoreError::InvalidSize { what: "buddy total_size", value: total_size });
        }

        let block_count = total_size / min_block_size;
        let max_order = block_count.trailing_zeros() as usize;
        let base_align = min_block_size.min(MAX_BASE_ALIGN);

        let storage = vec![0u8; total_size + base_align - 1].into_boxed_slice();
        let base = aligned_base(&storage, base_align);

        let mut allocator = Self {
            storage,
            base,
            total_size,
            min_block_size,
            max_order,
            free_heads: vec![NO_BLOCK; max_order + 1].into_boxed_slice(),
            next_free: vec![NO_BLOCK; block_count].into_boxed_slice(),
            free_order: vec![None; block_count].into_boxed_slice(),
            live_order: vec![None; block_count].into_boxed_slice(),
            free_bytes: total_size,
        };
        allocator.push_free(max_order, 0);
        Ok(allocator)
    }

    /// Creates an allocator from its configuration section.
    ///
    /// # Errors
    ///
    /// Same as [`BuddyAllocator::new`].
    pub fn from_config(config: &BuddyConfig) -> CoreResult<Self> {
        Self::new(config.total_size, config.min_block_size)
    }

    /// Arena size in bytes.
    #[inline]
    #[must_use]
    pub const fn total_size(&self) -> usize {
        self.total_size
    }

    /// Size of an order-0 block.
    #[inline]
    #[must_use]
    pub const fn min_block_size(&self) -> usize {
        self.min_block_size
    }

    /// Highest order (the whole arena).
    #[inline]
    #[must_use]
    pub const fn max_order(&self) -> usize {
        self.max_order
    }

    /// Bytes not covered by a live block.
    #[inline]
    #[must_use]
    pub const fn free_bytes(&self) -> usize {
        self.free_bytes
    }

    /// Fraction of the arena covered by live blocks, in `[0, 1]`.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn usage(&self) -> f64 {
        (self.total_size - self.free_bytes) as f64 / self.total_size as f64
    }

    /// Size of the largest block currently free, or 0.
    #[must_use]
    pub fn largest_free_block(&self) -> usize {
        (0..=self.max_order)
            .rev()
            .find(|&order| self.free_heads[order] != NO_BLOCK)
            .map_or(0, |order| self.min_block_size << order)
    }

    /// Smallest order whose block covers `size` bytes.
    ///
    /// Saturates at `usize::BITS` for sizes no power of two can cover.
    #[must_use]
    pub fn order_for(&self, size: usize) -> usize {
        let blocks = size.div_ceil(self.min_block_size).max(1);
        blocks
            .checked_next_power_of_two()
            .map_or(usize::BITS as usize, |blocks| blocks.trailing_zeros() as usize)
    }

    /// Allocates a block covering `size` bytes.
    ///
    /// Takes the smallest free block of sufficient order and splits it down,
    /// pushing each unused upper half onto the next-lower free list.
    ///
    /// # Errors
    ///
    /// - [`CoreError::BlockTooLarge`] if `size` exceeds the arena.
    /// - [`CoreError::OutOfMemory`] if no free block is large enough.
    pub fn alloc(&mut self, size: usize) -> CoreResult<BuddyAllocation> {
        if size > self.total_size {
            return Err(CoreError::BlockTooLarge { requested: size, max: self.total_size });
        }

        let target = self.order_for(size);
        let Some(mut order) = (target..=self.max_order).find(|&k| self.free_heads[k] != NO_BLOCK)
        else {
            return Err(CoreError::OutOfMemory {
                requested: self.min_block_size << target,
                available: self.free_bytes,
            });
        };

        let index = self.pop_free(order);
        while order > target {
            order -= 1;
            self.push_free(order, index + (1 << order));
        }

        let block_size = self.min_block_size << target;
        self.live_order[index] = Some(target);
        self.free_bytes -= block_size;

        Ok(BuddyAllocation {
            offset: index * self.min_block_size,
            order: target,
            block_size,
            requested: size,
        })
    }

    /// Returns a block and coalesces it with free buddies as far up as
    /// possible.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidFree`] if the handle does not name a live block.
    pub fn free(&mut self, allocation: BuddyAllocation) -> CoreResult<()> {
        self.release(allocation.offset, allocation.order)
    }

    /// Frees by offset and original request size; the order is recomputed
    /// from `size`.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidFree`] if `size` exceeds the arena or no live
    /// block of that order starts at `offset`.
    pub fn free_region(&mut self, offset: usize, size: usize) -> CoreResult<()> {
        if size > self.total_size {
            return Err(CoreError::InvalidFree { offset });
        }
        let order = self.order_for(size);
        self.release(offset, order)
    }

    /// Returns the requested bytes of a live allocation.
    #[must_use]
    pub fn bytes(&self, allocation: BuddyAllocation) -> Option<&[u8]> {
        let index = self.live_index(allocation.offset, allocation.order)?;
        let start = self.base + index * self.min_block_size;
        self.storage.get(start..start + allocation.requested)
    }

    /// Returns the requested bytes of a live allocation, mutably.
    pub fn bytes_mut(&mut self, allocation: BuddyAllocation) -> Option<&mut [u8]> {
        let index = self.live_index(allocation.offset, allocation.order)?;
        let start = self.base + index * self.min_block_size;
        self.storage.get_mut(start..start + allocation.requested)
    }

    /// Frees every block and restores the single root block.
    pub fn reset(&mut self) {
        self.free_heads.fill(NO_BLOCK);
        self.next_free.fill(NO_BLOCK);
        self.free_order.fill(None);
        self.live_order.fill(None);
        self.free_bytes = self.total_size;
        self.push_free(self.max_order, 0);
    }

    /// Number of blocks in the free list of `order`.
    #[must_use]
    pub fn free_blocks_at(&self, order: usize) -> usize {
        if order > self.max_order {
            return 0;
        }
        let mut count = 0;
        let mut current = self.free_heads[order];
        while current != NO_BLOCK {
            count += 1;
            current = self.next_free[current];
        }
        count
    }

    fn release(&mut self, offset: usize, order: usize) -> CoreResult<()> {
        let mut index = self
            .live_index(offset, order)
            .ok_or(CoreError::InvalidFree { offset })?;

        self.live_order[index] = None;
        self.free_bytes += self.min_block_size << order;

        let mut order = order;
        while order < self.max_order {
            let buddy = index ^ (1 << order);
            if self.free_order[buddy] != Some(order) {
                break;
            }
            self.unlink_free(order, buddy);
            index = index.min(buddy);
            order += 1;
        }
        self.push_free(order, index);
        Ok(())
    }

    /// Index of a live block of `order` starting at `offset`.
    fn live_index(&self, offset: usize, order: usize) -> Option<usize> {
        if offset % self.min_block_size != 0 {
            return None;
        }
        let index = offset / self.min_block_size;
        (self.live_order.get(index).copied().flatten() == Some(order)).then_some(index)
    }

    fn push_free(&mut self, order: usize, index: usize) {
        self.next_free[index] = self.free_heads[order];
        self.free_heads[order] = index;
        self.free_order[index] = Some(order);
    }

    /// Pops the head of a non-empty free list.
    fn pop_free(&mut self, order: usize) -> usize {
        let index = self.free_heads[order];
        debug_assert_ne!(index, NO_BLOCK, "pop from empty free list");
        self.free_heads[order] = self.next_free[index];
        self.next_free[index] = NO_BLOCK;
        self.free_order[index] = None;
        index
    }

    /// Removes `index` from the free list of `order` (prev/current walk).
    fn unlink_free(&mut self, order: usize, index: usize) {
        let mut prev = NO_BLOCK;
        let mut current = self.free_heads[order];
        while current != NO_BLOCK && current != index {
            prev = current;
            current = self.next_free[current];
        }
        debug_assert_eq!(current, index, "block missing from its free list");
        if current == NO_BLOCK {
            return;
        }

        let next = self.next_free[current];
        if prev == NO_BLOCK {
            self.free_heads[order] = next;
        } else {
            self.next_free[prev] = next;
        }
        self.next_free[current] = NO_BLOCK;
        self.free_order[current] = None;
    }
}

impl std::fmt::Debug for BuddyAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuddyAllocator")
            .field("total_size", &self.total_size)
            .field("min_block_size", &self.min_block_size)
            .field("max_order", &self.max_order)
            .field("free_bytes", &self.free_bytes)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buddy_orders() {
        let buddy = BuddyAllocator::new(1024, 64).unwrap();
        assert_eq!(buddy.max_order(), 4);
        assert_eq!(buddy.order_for(0), 0);
        assert_eq!(buddy.order_for(64), 0);
        assert_eq!(buddy.order_for(65), 1);
        assert_eq!(buddy.order_for(100), 1);
        assert_eq!(buddy.order_for(1024), 4);
    }

    #[test]
    fn test_buddy_split_pushes_upper_halves() {
        let mut buddy = BuddyAllocator::new(1024, 64).unwrap();
        let alloc = buddy.alloc(64).unwrap();

        assert_eq!(alloc.offset(), 0);
        for order in 0..4 {
            assert_eq!(buddy.free_blocks_at(order), 1, "order {order}");
        }
        assert_eq!(buddy.free_blocks_at(4), 0);
        assert_eq!(buddy.free_bytes(), 1024 - 64);
    }

    #[test]
    fn test_buddy_coalesce_restores_root() {
        let mut buddy = BuddyAllocator::new(1024, 64).unwrap();
        let a = buddy.alloc(64).unwrap();
        let b = buddy.alloc(64).unwrap();
        assert_eq!(b.offset(), 64);

        buddy.free(a).unwrap();
        assert_eq!(buddy.free_blocks_at(4), 0);
        buddy.free(b).unwrap();
        assert_eq!(buddy.free_blocks_at(4), 1);
        assert_eq!(buddy.largest_free_block(), 1024);
    }

    #[test]
    fn test_buddy_double_free_rejected() {
        let mut buddy = BuddyAllocator::new(512, 64).unwrap();
        let a = buddy.alloc(100).unwrap();
        buddy.free(a).unwrap();
        assert_eq!(buddy.free(a).unwrap_err(), CoreError::InvalidFree { offset: 0 });
    }

    #[test]
    fn test_buddy_free_region() {
        let mut buddy = BuddyAllocator::new(1024, 64).unwrap();
        let a = buddy.alloc(200).unwrap();
        assert_eq!(a.size(), 256);

        assert!(buddy.free_region(a.offset(), 100).is_err()); // wrong order
        buddy.free_region(a.offset(), 200).unwrap();
        assert_eq!(buddy.free_bytes(), 1024);
    }

    #[test]
    fn test_buddy_free_region_rejects_oversized() {
        let mut buddy = BuddyAllocator::new(1024, 1).unwrap();
        let a = buddy.alloc(10).unwrap();

        assert_eq!(buddy.order_for(usize::MAX), usize::BITS as usize);
        assert_eq!(
            buddy.free_region(a.offset(), usize::MAX),
            Err(CoreError::InvalidFree { offset: a.offset() })
        );
        assert_eq!(
            buddy.free_region(a.offset(), 1025),
            Err(CoreError::InvalidFree { offset: a.offset() })
        );

        // Still live and releasable with the right size.
        buddy.free_region(a.offset(), 10).unwrap();
        assert_eq!(buddy.free_bytes(), 1024);
    }

    #[test]
    fn test_buddy_rejects_bad_config() {
        assert_eq!(
            BuddyAllocator::new(1024, 48).unwrap_err(),
            CoreError::InvalidAlignment(48)
        );
        assert!(matches!(
            BuddyAllocator::new(1000, 64),
            Err(CoreError::InvalidSize { .. })
        ));
        assert!(matches!(
            BuddyAllocator::new(64 * 3, 64),
            Err(CoreError::InvalidSize { .. })
        ));
    }

    #[test]
    fn test_buddy_out_of_memory() {
        let mut buddy = BuddyAllocator::new(256, 64).unwrap();
        let _a = buddy.alloc(128).unwrap();
        let _b = buddy.alloc(64).unwrap();
        assert!(matches!(buddy.alloc(128), Err(CoreError::OutOfMemory { .. })));
        assert!(buddy.alloc(64).is_ok());
    }

    #[test]
    fn test_buddy_bytes() {
        let mut buddy = BuddyAllocator::new(256, 64).unwrap();
        let a = buddy.alloc(10).unwrap();
        buddy.bytes_mut(a).unwrap().copy_from_slice(b"0123456789");
        assert_eq!(buddy.bytes(a).unwrap(), b"0123456789");

        buddy.free(a).unwrap();
        assert!(buddy.bytes(a).is_none());
    }

    #[test]
    fn test_buddy_reset() {
        let mut buddy = BuddyAllocator::new(256, 64).unwrap();
        let _ = buddy.alloc(256).unwrap();
        buddy.reset();
        assert_eq!(buddy.free_bytes(), 256);
        assert!(buddy.alloc(256).is_ok());
    }
}
