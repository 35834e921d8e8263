//! # Ring Buffer
//!
//! Circular byte region for short-lived streaming allocations (per-frame
//! uniforms, staging uploads). Allocation only moves `head`, freeing only
//! moves `tail`, and frees must arrive in allocation order.

use crate::config::RingConfig;
use crate::error::{CoreError, CoreResult};

use super::{align_up, aligned_base};

/// A region handed out by [`RingBuffer::alloc`].
///
/// The token must be handed back to [`RingBuffer::free`] in the same order
/// the allocations were made.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RingAllocation {
    offset: usize,
    size: usize,
}

impl RingAllocation {
    /// Byte offset inside the ring.
    #[inline]
    #[must_use]
    pub const fn offset(self) -> usize {
        self.offset
    }

    /// Reserved size (the request rounded up to the ring alignment).
    #[inline]
    #[must_use]
    pub const fn size(self) -> usize {
        self.size
    }
}

/// Fixed-capacity circular allocator.
///
/// ```text
///  not wrapped:   [ free | tail ===live=== head | free ]
///  wrapped:       [ ==live== head | free | tail ==live== wrap_end | gap ]
/// ```
///
/// A single allocation never straddles the end of the arena: if it does not
/// fit in `[head, capacity)` the head wraps to 0 and the remainder of the
/// arena is skipped until the tail passes it.
///
/// # Thread Safety
///
/// NOT thread-safe. One ring per producer thread.
pub struct RingBuffer {
    storage: Box<[u8]>,
    base: usize,
    capacity: usize,
    alignment: usize,
    /// Next write position.
    head: usize,
    /// Oldest live allocation.
    tail: usize,
    /// End of live data before the last wrap, while the tail has not passed it.
    wrap_end: Option<usize>,
    /// Live bytes (excluding the skipped gap).
    in_flight: usize,
}

impl RingBuffer {
    /// Creates a ring of `capacity` bytes.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidAlignment`] if `alignment` is not a power of two.
    /// - [`CoreError::InvalidSize`] if `capacity` is zero or not a multiple
    ///   of `alignment`.
    pub fn new(capacity: usize, alignment: usize) -> CoreResult<Self> {
        if !alignment.is_power_of_two() {
            return Err(CoreError::InvalidAlignment(alignment));
        }
        if capacity == 0 || capacity % alignment != 0 {
            return Err(CoreError::InvalidSize { what: "ring capacity", value: capacity });
        }

        let storage = vec![0u8; capacity + alignment - 1].into_boxed_slice();
        let base = aligned_base(&storage, alignment);

        Ok(Self {
            storage,
            base,
            capacity,
            alignment,
            head: 0,
            tail: 0,
            wrap_end: None,
            in_flight: 0,
        })
    }

    /// Creates a ring from its configuration section.
    ///
    /// # Errors
    ///
    /// Same as [`RingBuffer::new`].
    pub fn from_config(config: &RingConfig) -> CoreResult<Self> {
        Self::new(config.capacity, config.alignment)
    }

    /// Returns the capacity in bytes.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the alignment every allocation is rounded to.
    #[inline]
    #[must_use]
    pub const fn alignment(&self) -> usize {
        self.alignment
    }

    /// Next write position.
    #[inline]
    #[must_use]
    pub const fn head(&self) -> usize {
        self.head
    }

    /// Position of the oldest live allocation.
    #[inline]
    #[must_use]
    pub const fn tail(&self) -> usize {
        self.tail
    }

    /// Bytes currently allocated and not yet freed.
    #[inline]
    #[must_use]
    pub const fn bytes_in_flight(&self) -> usize {
        self.in_flight
    }

    /// Fraction of the capacity in flight, in `[0, 1]`.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn usage(&self) -> f64 {
        self.in_flight as f64 / self.capacity as f64
    }

    /// Reserves `size` bytes (rounded up to the alignment; zero-byte
    /// requests take one alignment unit).
    ///
    /// Tries `[head, capacity)` first, then wraps to `[0, tail)`. Never
    /// blocks.
    ///
    /// # Errors
    ///
    /// - [`CoreError::BlockTooLarge`] if the aligned request exceeds the
    ///   whole ring.
    /// - [`CoreError::OutOfMemory`] if neither region can hold the request.
    pub fn alloc(&mut self, size: usize) -> CoreResult<RingAllocation> {
        let too_large = CoreError::BlockTooLarge {
            requested: size,
            max: self.capacity,
        };
        let aligned = align_up(size.max(1), self.alignment).ok_or(too_large.clone())?;
        if aligned > self.capacity {
            return Err(too_large);
        }
        let out_of_memory = CoreError::OutOfMemory {
            requested: size,
            available: self.capacity - self.in_flight,
        };

        if self.in_flight == 0 {
            // Empty: rewind so the whole arena is contiguous again.
            self.head = 0;
            self.tail = 0;
            self.wrap_end = None;
        }

        let end = self.head.checked_add(aligned);
        let offset = match self.wrap_end {
            None if end.is_some_and(|end| end <= self.capacity) => self.head,
            None if aligned <= self.tail => {
                self.wrap_end = Some(self.head);
                0
            }
            Some(_) if end.is_some_and(|end| end <= self.tail) => self.head,
            _ => return Err(out_of_memory),
        };

        self.head = offset + aligned;
        self.in_flight += aligned;

        Ok(RingAllocation { offset, size: aligned })
    }

    /// Releases the oldest live allocation.
    ///
    /// # Errors
    ///
    /// - [`CoreError::OutOfOrderFree`] if `allocation` is not the oldest one.
    /// - [`CoreError::InvalidFree`] if nothing is in flight or the token is
    ///   larger than what is in flight.
    pub fn free(&mut self, allocation: RingAllocation) -> CoreResult<()> {
        if self.in_flight == 0 || allocation.size > self.in_flight {
            return Err(CoreError::InvalidFree { offset: allocation.offset });
        }
        if allocation.offset != self.tail {
            return Err(CoreError::OutOfOrderFree {
                expected: self.tail,
                found: allocation.offset,
            });
        }

        self.tail += allocation.size;
        self.in_flight -= allocation.size;

        if self.wrap_end == Some(self.tail) {
            self.tail = 0;
            self.wrap_end = None;
        }
        if self.in_flight == 0 {
            self.head = 0;
            self.tail = 0;
            self.wrap_end = None;
        }
        Ok(())
    }

    /// Releases `size` bytes from the tail without a token.
    ///
    /// Equivalent to freeing the oldest allocation, provided `size` is the
    /// size that allocation was requested with.
    ///
    /// # Errors
    ///
    /// Same as [`RingBuffer::free`].
    pub fn free_bytes(&mut self, size: usize) -> CoreResult<()> {
        let aligned = align_up(size.max(1), self.alignment)
            .ok_or(CoreError::InvalidFree { offset: self.tail })?;
        self.free(RingAllocation { offset: self.tail, size: aligned })
    }

    /// Drops every allocation at once.
    pub fn reset(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.wrap_end = None;
        self.in_flight = 0;
    }

    /// Returns the bytes of an allocation.
    #[must_use]
    pub fn bytes(&self, allocation: RingAllocation) -> Option<&[u8]> {
        let start = self.base + allocation.offset;
        if allocation.offset + allocation.size > self.capacity {
            return None;
        }
        self.storage.get(start..start + allocation.size)
    }

    /// Returns the bytes of an allocation, mutably.
    pub fn bytes_mut(&mut self, allocation: RingAllocation) -> Option<&mut [u8]> {
        let start = self.base + allocation.offset;
        if allocation.offset + allocation.size > self.capacity {
            return None;
        }
        self.storage.get_mut(start..start + allocation.size)
    }

    /// Copies plain-old-data into an allocation, starting at its first byte.
    ///
    /// # Errors
    ///
    /// [`CoreError::BlockTooLarge`] if the data does not fit the allocation.
    pub fn write_pod<T: bytemuck::Pod>(
        &mut self,
        allocation: RingAllocation,
        data: &[T],
    ) -> CoreResult<()> {
        let src: &[u8] = bytemuck::cast_slice(data);
        let dst = self
            .bytes_mut(allocation)
            .ok_or(CoreError::InvalidFree { offset: allocation.offset })?;
        if src.len() > dst.len() {
            return Err(CoreError::BlockTooLarge { requested: src.len(), max: dst.len() });
        }
        dst[..src.len()].copy_from_slice(src);
        Ok(())
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("head", &self.head)
            .field("tail", &self.tail)
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}
