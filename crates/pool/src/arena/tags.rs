//! Boundary-tag and free-node accessors
//!
//! # Safety
//!
//! Every read or write of arena metadata funnels through [`Arena::tag_ptr`],
//! which asserts that the accessed bytes lie inside the buffer. Tags are
//! packed, so all multi-byte fields use unaligned reads and writes. Blocks are
//! addressed by unit index; byte offsets are derived from the arena origin.

use core::ptr::{self, NonNull};

use super::Arena;
use super::layout::{
    FLAG_FREE, FLAG_USED, HEADER_CANARY, HEADER_SIZE_FIELD, IN_USE, NODE_NEXT, NODE_PREV,
    UnitLayout,
};
use crate::error::{PoolError, PoolResult, fatal};

/// Sentinel unit index meaning "no block".
pub(crate) const NONE: u32 = u32::MAX;

impl<T> Arena<T> {
    #[inline]
    fn tag_ptr(&self, offset: usize, len: usize) -> *mut u8 {
        assert!(
            offset + len <= self.buffer.len(),
            "boundary tag access at {offset}+{len} outside arena of {} bytes",
            self.buffer.len()
        );
        // SAFETY: offset + len is within the buffer (asserted above).
        unsafe { self.buffer.as_ptr().add(offset) }
    }

    #[inline]
    fn read_u32(&self, offset: usize) -> u32 {
        // SAFETY: tag_ptr checked the 4 bytes are in bounds; packed fields
        // are read unaligned.
        unsafe { ptr::read_unaligned(self.tag_ptr(offset, 4).cast::<u32>()) }
    }

    #[inline]
    fn write_u32(&mut self, offset: usize, value: u32) {
        // SAFETY: tag_ptr checked the 4 bytes are in bounds.
        unsafe { ptr::write_unaligned(self.tag_ptr(offset, 4).cast::<u32>(), value) }
    }

    #[inline]
    fn read_u8(&self, offset: usize) -> u8 {
        // SAFETY: tag_ptr checked the byte is in bounds.
        unsafe { *self.tag_ptr(offset, 1) }
    }

    #[inline]
    fn write_u8(&mut self, offset: usize, value: u8) {
        // SAFETY: tag_ptr checked the byte is in bounds.
        unsafe { *self.tag_ptr(offset, 1) = value }
    }

    /// Byte offset of the header of unit `index`.
    #[inline]
    pub(super) fn header_offset(&self, index: u32) -> usize {
        self.origin + index as usize * self.layout.unit
    }

    /// Byte offset just past a block of `size` units starting at `index`.
    #[inline]
    pub(super) fn end_offset(&self, index: u32, size: u32) -> usize {
        self.origin + (index as usize + size as usize) * self.layout.unit
    }

    #[inline]
    pub(super) fn is_used(&self, index: u32) -> bool {
        self.read_u8(self.header_offset(index) + IN_USE) == FLAG_USED
    }

    #[inline]
    pub(super) fn set_used(&mut self, index: u32, used: bool) {
        let flag = if used { FLAG_USED } else { FLAG_FREE };
        self.write_u8(self.header_offset(index) + IN_USE, flag);
    }

    /// Size recorded in the header.
    #[inline]
    pub(super) fn size(&self, index: u32) -> u32 {
        self.read_u32(self.header_offset(index) + HEADER_SIZE_FIELD)
    }

    /// Size recorded in the footer of a block assumed to span `size` units.
    #[inline]
    pub(super) fn footer_size(&self, index: u32, size: u32) -> u32 {
        self.read_u32(UnitLayout::footer_size_field(self.end_offset(index, size)))
    }

    /// Writes `size` into both the header and the matching footer.
    pub(super) fn set_size(&mut self, index: u32, size: u32) {
        debug_assert!(size > 0 && index as usize + size as usize <= self.capacity as usize);
        self.write_u32(self.header_offset(index) + HEADER_SIZE_FIELD, size);
        let footer = UnitLayout::footer_size_field(self.end_offset(index, size));
        self.write_u32(footer, size);
    }

    /// Block ending right before `index`, found through its footer.
    pub(super) fn prev_block(&self, index: u32) -> Option<u32> {
        if index == 0 {
            return None;
        }
        let size = self.read_u32(UnitLayout::footer_size_field(self.header_offset(index)));
        if size == 0 || size > index {
            fatal(&PoolError::corruption(
                "arena",
                &format!("footer before block {index} records {size} units"),
            ));
        }
        Some(index - size)
    }

    /// `(prev, next)` free-list links of a free block.
    #[inline]
    pub(super) fn links(&self, index: u32) -> (u32, u32) {
        let node = self.header_offset(index) + self.layout.header;
        (
            self.read_u32(node + NODE_PREV),
            self.read_u32(node + NODE_NEXT),
        )
    }

    pub(super) fn set_links(&mut self, index: u32, prev: u32, next: u32) {
        debug_assert!(!self.is_used(index));
        let node = self.header_offset(index) + self.layout.header;
        self.write_u32(node + NODE_PREV, prev);
        self.write_u32(node + NODE_NEXT, next);
    }

    #[inline]
    pub(super) fn set_prev(&mut self, index: u32, prev: u32) {
        let node = self.header_offset(index) + self.layout.header;
        self.write_u32(node + NODE_PREV, prev);
    }

    #[inline]
    pub(super) fn set_next(&mut self, index: u32, next: u32) {
        let node = self.header_offset(index) + self.layout.header;
        self.write_u32(node + NODE_NEXT, next);
    }

    /// `(header, footer)` canaries of a block. Only meaningful with canaries on.
    pub(super) fn canaries(&self, index: u32) -> (u32, u32) {
        let end = self.end_offset(index, self.size(index));
        (
            self.read_u32(self.header_offset(index) + HEADER_CANARY),
            self.read_u32(UnitLayout::footer_canary(end)),
        )
    }

    pub(super) fn set_canaries(&mut self, index: u32, canary: u32) {
        let end = self.end_offset(index, self.size(index));
        self.write_u32(self.header_offset(index) + HEADER_CANARY, canary);
        self.write_u32(UnitLayout::footer_canary(end), canary);
    }

    /// Fills the payload of a block with `pattern`, leaving its tags intact.
    pub(super) fn fill_payload(&mut self, index: u32, size: u32, pattern: u8) {
        let start = self.header_offset(index) + self.layout.header;
        let len = self.end_offset(index, size) - self.layout.footer - start;
        let first = self.tag_ptr(start, len);
        // SAFETY: tag_ptr checked [start, start + len) is in bounds.
        unsafe { ptr::write_bytes(first, pattern, len) };
    }

    /// First element slot of the block at `index`.
    #[inline]
    pub(super) fn payload(&self, index: u32) -> NonNull<T> {
        let offset = self.header_offset(index) + self.layout.header;
        // SAFETY: offset < buffer length for any index < capacity, and the
        // buffer pointer is non-null.
        unsafe { NonNull::new_unchecked(self.tag_ptr(offset, 1).cast::<T>()) }
    }

    /// Unit index of the block whose payload starts at `ptr`.
    pub(super) fn index_of(&self, ptr: NonNull<T>) -> PoolResult<u32> {
        let address = ptr.as_ptr() as usize;
        let first = self.buffer.addr() + self.origin + self.layout.header;
        let Some(relative) = address.checked_sub(first) else {
            return Err(PoolError::misaligned_pointer(address));
        };
        if relative % self.layout.unit != 0 {
            return Err(PoolError::misaligned_pointer(address));
        }
        match u32::try_from(relative / self.layout.unit) {
            Ok(index) if index < self.capacity => Ok(index),
            _ => Err(PoolError::foreign_pointer(address)),
        }
    }

    /// Whether `ptr` points into the blocks of this arena.
    pub(crate) fn contains(&self, ptr: *const T) -> bool {
        let address = ptr as usize;
        let start = self.buffer.addr() + self.origin;
        let end = self.buffer.addr() + self.end_offset(0, self.capacity);
        (start..end).contains(&address)
    }
}
