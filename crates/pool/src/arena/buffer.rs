//! Owned backing storage of an arena
//!
//! # Safety
//!
//! The buffer is allocated as a `Box<[u8]>` and immediately turned into a raw
//! pointer, so every later access (boundary tags, free-list nodes, live `T`
//! values) goes through pointers that share the allocation's provenance and no
//! `&`/`&mut` to the bytes is ever created while callers hold element pointers.

use core::ptr::{self, NonNull};

/// Contiguous byte buffer with a stable address for its whole lifetime
pub(crate) struct Buffer {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: Buffer exclusively owns its allocation.
// - No thread-local state, the bytes can move with the owner
// - Not Sync: all mutation goes through &mut Arena, shared access is not
//   synchronized
unsafe impl Send for Buffer {}

impl Buffer {
    /// Allocates `len` bytes, filled with `pattern` or zeroed.
    ///
    /// Allocation failure aborts through the global allocator's error hook.
    pub(crate) fn new(len: usize, pattern: Option<u8>) -> Self {
        let boxed = vec![pattern.unwrap_or(0); len].into_boxed_slice();
        let raw = Box::into_raw(boxed).cast::<u8>();
        // SAFETY: Box::into_raw never returns null.
        let ptr = unsafe { NonNull::new_unchecked(raw) };
        Self { ptr, len }
    }

    #[inline]
    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    pub(crate) fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        // SAFETY: Reconstituting the Box created in `new`.
        // - ptr/len come from Box::into_raw of a Box<[u8]> of exactly len bytes
        // - The buffer is dropped once; nothing reads it afterwards
        drop(unsafe {
            Box::from_raw(ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.len))
        });
    }
}
