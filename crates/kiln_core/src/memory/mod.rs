//! # Memory Management
//!
//! Fixed-capacity allocators carved from one arena each.
//!
//! ## Design Philosophy
//!
//! Every arena is allocated once, at construction. Afterwards:
//! - No heap allocations on alloc/free
//! - No growth: exhaustion is a [`CoreError`](crate::CoreError), never a reallocation
//! - Handles and offsets instead of raw pointers into the arena
//!
//! | Allocator          | Sizes            | Free order      |
//! |--------------------|------------------|-----------------|
//! | [`FixedBlockPool`] | one, fixed       | any             |
//! | [`RingBuffer`]     | any              | strict FIFO     |
//! | [`BuddyAllocator`] | powers of two    | any             |
//!
//! None of them lock internally.

mod buddy;
mod fixed_block;
mod ring;

pub use buddy::{BuddyAllocation, BuddyAllocator};
pub use fixed_block::{BlockHandle, FixedBlockPool};
pub use ring::{RingAllocation, RingBuffer};

/// Rounds `value` up to a power-of-two `alignment`, or `None` on overflow.
#[inline]
pub(crate) fn align_up(value: usize, alignment: usize) -> Option<usize> {
    debug_assert!(alignment.is_power_of_two());
    Some(value.checked_add(alignment - 1)? & !(alignment - 1))
}

/// Offset of the first `alignment`-aligned byte of an arena that was
/// over-allocated by `alignment - 1` bytes.
#[inline]
pub(crate) fn aligned_base(storage: &[u8], alignment: usize) -> usize {
    storage.as_ptr().align_offset(alignment).min(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 16), Some(0));
        assert_eq!(align_up(1, 16), Some(16));
        assert_eq!(align_up(16, 16), Some(16));
        assert_eq!(align_up(300, 256), Some(512));
        assert_eq!(align_up(usize::MAX, 16), None);
    }
}
