//! Boundary-tagged arena with segregated free lists
//!
//! # Safety
//!
//! An arena owns one byte buffer carved into blocks of whole units:
//! - Blocks tile the buffer; each carries its size in a header and a footer,
//!   so neighbors are reachable in both directions
//! - Free blocks store `(prev, next)` unit indices in their payload and are
//!   filed in bucket `floor(log2(size))`
//! - Live blocks hold `size` initialized `T` starting at their payload
//!
//! ## Invariants
//!
//! - No two adjacent blocks are both free (release coalesces immediately)
//! - Every free block is linked into exactly one bucket, the one of its size
//! - `used` is the total size of live blocks
//! - A live block never moves until it is released or the arena is cleared

mod buffer;
mod diagnostics;
mod layout;
mod tags;

use core::marker::PhantomData;
use core::ptr::{self, NonNull};

#[cfg(feature = "logging")]
use tracing::trace;

use self::buffer::Buffer;
use self::diagnostics::Diagnostics;
pub(crate) use self::layout::UnitLayout;
use self::tags::NONE;
use crate::class::{bucket_count, class_at_least, class_of};
use crate::config::PoolConfig;
use crate::error::{PoolError, PoolResult, fatal};
use crate::stats::ArenaStats;

/// One backing buffer of a pool
pub(crate) struct Arena<T> {
    buffer: Buffer,
    /// Byte offset of the first header, chosen so payloads are aligned
    origin: usize,
    /// Units in the arena
    capacity: u32,
    /// Units held by live blocks
    used: u32,
    /// Head unit index of each free list, `NONE` when empty
    buckets: Box<[u32]>,
    layout: UnitLayout,
    diagnostics: Diagnostics,
    _marker: PhantomData<T>,
}

impl<T> Arena<T> {
    /// Creates an arena holding one free block of `capacity` units.
    pub(crate) fn new(capacity: u32, layout: UnitLayout, config: &PoolConfig) -> PoolResult<Self> {
        if capacity == 0 {
            return Err(PoolError::invalid_config("arena capacity must be non-zero"));
        }
        let len = layout.buffer_len(capacity)?;
        let buffer = Buffer::new(len, config.fill_pattern);
        let origin = layout.origin(buffer.addr());

        let mut arena = Self {
            buffer,
            origin,
            capacity,
            used: 0,
            buckets: vec![NONE; bucket_count(capacity)].into_boxed_slice(),
            layout,
            diagnostics: Diagnostics::new(config),
            _marker: PhantomData,
        };
        arena.reset();

        #[cfg(feature = "logging")]
        trace!(capacity, unit = layout.unit, bytes = len, "arena created");

        Ok(arena)
    }

    #[inline]
    pub(crate) fn capacity(&self) -> u32 {
        self.capacity
    }

    #[inline]
    pub(crate) fn used(&self) -> u32 {
        self.used
    }

    #[inline]
    pub(crate) fn remaining(&self) -> u32 {
        self.capacity - self.used
    }

    /// Takes a block of exactly `units` units, or `None` when no bucket fits.
    ///
    /// The search starts at the first bucket guaranteed to fit and takes the
    /// head of the first non-empty one; any surplus is split off and filed
    /// as a new free block.
    pub(crate) fn acquire(&mut self, units: u32) -> Option<NonNull<T>> {
        debug_assert!(units > 0, "acquire of zero units");
        let first = class_at_least(units);
        let index = self
            .buckets
            .get(first..)?
            .iter()
            .copied()
            .find(|&head| head != NONE)?;
        Some(self.take(index, units))
    }

    fn take(&mut self, index: u32, units: u32) -> NonNull<T> {
        self.unregister(index);
        let size = self.size(index);
        debug_assert!(size >= units, "bucket held a block of {size} < {units}");

        if size > units {
            self.set_size(index, units);
            let rest = index + units;
            self.set_size(rest, size - units);
            self.register(rest);
        }
        self.stamp(index);
        self.verify_after("acquire");
        self.payload(index)
    }

    /// Returns the block at `ptr` to the free lists, merging free neighbors.
    ///
    /// With `drop_payload` the block's elements are dropped first.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`Arena::acquire`] on this arena and
    /// not released since; with `drop_payload`, every element of the block
    /// must be initialized.
    pub(crate) unsafe fn release(&mut self, ptr: NonNull<T>, drop_payload: bool) -> PoolResult<()> {
        let index = self.index_of(ptr)?;
        if !self.is_used(index) {
            return Err(PoolError::double_free(ptr.as_ptr() as usize));
        }
        let size = self.size(index);
        if size == 0 || size > self.capacity - index || self.footer_size(index, size) != size {
            return Err(PoolError::corruption(
                "arena",
                &format!("released block {index} has inconsistent boundary tags"),
            ));
        }
        self.check_canary(index)?;

        if drop_payload {
            // SAFETY: Dropping the elements of a live block.
            // - The block holds `size` initialized T (caller contract)
            // - ptr is the block payload, aligned for T (index_of succeeded)
            // - The slots are never read again before being rewritten
            unsafe { ptr::drop_in_place(ptr::slice_from_raw_parts_mut(ptr.as_ptr(), size as usize)) };
        }
        if let Some(pattern) = self.diagnostics.fill() {
            self.fill_payload(index, size, pattern);
        }

        // stale headers swallowed by a merge must still read as free
        self.set_used(index, false);

        let mut start = index;
        let mut total = size;
        if let Some(prev) = self.prev_block(index).filter(|&prev| !self.is_used(prev)) {
            total += self.size(prev);
            self.unregister(prev);
            start = prev;
        }
        let next = index + size;
        if next < self.capacity && !self.is_used(next) {
            total += self.size(next);
            self.unregister(next);
            self.set_used(next, false);
        }

        self.set_size(start, total);
        self.register(start);
        self.verify_after("release");
        Ok(())
    }

    /// Drops live elements when asked, then resets to a single free block.
    ///
    /// A panicking destructor still leaves the arena reset; the elements not
    /// yet dropped are leaked.
    pub(crate) fn clear(&mut self, run_destructors: bool) {
        let mut guard = ResetOnDrop(self);
        if run_destructors {
            guard.0.drop_live();
        }
    }

    fn drop_live(&mut self) {
        let mut index = 0;
        while index < self.capacity {
            let size = self.size(index);
            if size == 0 || size > self.capacity - index {
                fatal(&PoolError::corruption(
                    "arena",
                    &format!("block {index} records {size} units during clear"),
                ));
            }
            if self.is_used(index) {
                let payload = self.payload(index);
                // SAFETY: Live blocks hold `size` initialized T, and the
                // reset that follows never drops them again.
                unsafe {
                    ptr::drop_in_place(ptr::slice_from_raw_parts_mut(
                        payload.as_ptr(),
                        size as usize,
                    ));
                }
            }
            index += size;
        }
    }

    fn reset(&mut self) {
        self.used = 0;
        self.buckets.fill(NONE);
        self.set_used(0, false);
        self.set_size(0, self.capacity);
        self.set_links(0, NONE, NONE);
        self.buckets[class_of(self.capacity)] = 0;
        self.stamp(0);
        self.verify_after("clear");
    }

    /// Files a block under its exact class, marking it free.
    ///
    /// The block's units stop counting as used.
    fn register(&mut self, index: u32) {
        let size = self.size(index);
        debug_assert!(self.used >= size);
        self.used -= size;
        self.set_used(index, false);

        let class = class_of(size);
        let head = self.buckets[class];
        self.set_links(index, NONE, head);
        if head != NONE {
            debug_assert!(!self.is_used(head));
            self.set_prev(head, index);
        }
        self.buckets[class] = index;
        self.stamp(index);
    }

    /// Unlinks a free block from its bucket, marking it used.
    fn unregister(&mut self, index: u32) {
        debug_assert!(!self.is_used(index));
        if let Err(err) = self.check_canary(index) {
            fatal(&err);
        }
        let size = self.size(index);
        let (prev, next) = self.links(index);

        if next != NONE {
            self.set_prev(next, prev);
        }
        if prev == NONE {
            let class = class_of(size);
            if self.buckets[class] != index {
                fatal(&PoolError::corruption(
                    "arena",
                    &format!("block {index} has no predecessor but is not head of bucket {class}"),
                ));
            }
            self.buckets[class] = next;
        } else {
            self.set_next(prev, next);
        }

        self.used += size;
        self.set_used(index, true);
    }

    pub(crate) fn stats(&self) -> ArenaStats {
        let mut free_blocks = 0usize;
        let mut largest_free = 0u32;
        for &head in &self.buckets {
            let mut cursor = head;
            while cursor != NONE && free_blocks < self.capacity as usize {
                largest_free = largest_free.max(self.size(cursor));
                free_blocks += 1;
                cursor = self.links(cursor).1;
            }
        }
        ArenaStats {
            capacity: self.capacity as usize,
            used: self.used as usize,
            free_blocks,
            largest_free: largest_free as usize,
        }
    }
}

/// Resets the arena when dropped, including during unwinding.
struct ResetOnDrop<'a, T>(&'a mut Arena<T>);

impl<T> Drop for ResetOnDrop<'_, T> {
    fn drop(&mut self) {
        self.0.reset();
    }
}
