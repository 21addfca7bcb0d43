//! Unit geometry for a pooled element type
//!
//! Every block is a run of equally sized units. A unit has room for a header,
//! one element (or one free-list node, whichever is larger) and a footer, and
//! is padded to the element's alignment:
//!
//! ```text
//!  unit 0                          unit 1
//! +--------+---------------+------+--------+---------------+------+
//! | header | payload       |footer| header | payload       |footer|
//! +--------+---------------+------+--------+---------------+------+
//!          ^ aligned for T                 ^ aligned for T
//! ```
//!
//! Header bytes: `[in_use: u8][size: u32][canary: u32]?`.
//! Footer bytes: `[canary: u32]?[size: u32]`.
//! Both are packed, so every tag access is unaligned.
//!
//! When `k` units form one block only the first header and the last footer
//! are meaningful; the payload of a live block spans everything in between,
//! which always fits `k` contiguous elements.

use core::alloc::Layout;
use core::mem::size_of;

use crate::error::{PoolError, PoolResult};

/// Offset of the in-use flag inside a header.
pub(crate) const IN_USE: usize = 0;
/// Offset of the size field inside a header.
pub(crate) const HEADER_SIZE_FIELD: usize = 1;
/// Offset of the canary inside a header.
pub(crate) const HEADER_CANARY: usize = 5;

/// Free-list node stored in the payload of a free block: `[prev: u32][next: u32]`.
pub(crate) const FREE_NODE: usize = 2 * size_of::<u32>();
pub(crate) const NODE_PREV: usize = 0;
pub(crate) const NODE_NEXT: usize = 4;

/// Byte value of the in-use flag for a live block.
pub(crate) const FLAG_USED: u8 = 1;
/// Byte value of the in-use flag for a free block.
pub(crate) const FLAG_FREE: u8 = 0;

/// Geometry shared by all arenas of one pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct UnitLayout {
    /// Header length in bytes
    pub header: usize,
    /// Footer length in bytes
    pub footer: usize,
    /// Unit length in bytes, a multiple of `align`
    pub unit: usize,
    /// Element alignment
    pub align: usize,
    /// Whether headers and footers carry canaries
    pub canaries: bool,
}

impl UnitLayout {
    /// Computes the unit geometry for `T`.
    pub(crate) fn of<T>(canaries: bool) -> PoolResult<Self> {
        Self::for_layout(Layout::new::<T>(), canaries)
    }

    pub(crate) fn for_layout(element: Layout, canaries: bool) -> PoolResult<Self> {
        let canary = if canaries { size_of::<u32>() } else { 0 };
        let header = 1 + size_of::<u32>() + canary;
        let footer = size_of::<u32>() + canary;
        let payload = element.size().max(FREE_NODE);
        let align = element.align();

        let unit = payload
            .checked_add(header + footer)
            .and_then(|raw| raw.checked_next_multiple_of(align))
            .ok_or_else(|| PoolError::size_overflow("unit size"))?;

        Ok(Self {
            header,
            footer,
            unit,
            align,
            canaries,
        })
    }

    /// Bytes needed to host `capacity` units at any buffer address.
    pub(crate) fn buffer_len(&self, capacity: u32) -> PoolResult<usize> {
        (capacity as usize)
            .checked_mul(self.unit)
            .and_then(|bytes| bytes.checked_add(self.align - 1))
            .ok_or_else(|| PoolError::size_overflow("arena buffer size"))
    }

    /// Offset of the first header so that the first payload is aligned.
    pub(crate) fn origin(&self, base: usize) -> usize {
        let first_payload = (base + self.header).next_multiple_of(self.align);
        first_payload - self.header - base
    }

    /// Offset of the size field inside the footer of a block ending at `end`.
    #[inline]
    pub(crate) fn footer_size_field(end: usize) -> usize {
        end - size_of::<u32>()
    }

    /// Offset of the canary inside the footer of a block ending at `end`.
    #[inline]
    pub(crate) fn footer_canary(end: usize) -> usize {
        end - 2 * size_of::<u32>()
    }
}
