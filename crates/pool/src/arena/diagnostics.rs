//! Optional corruption detection for arenas
//!
//! Canaries, fill patterns and the full-structure walk are all driven by
//! [`PoolConfig`]; with them disabled the core split/merge paths only pay for
//! a branch on a boolean.

use super::tags::NONE;
use super::Arena;
use crate::class::class_range;
use crate::config::PoolConfig;
use crate::error::{PoolError, PoolResult, fatal};

#[cfg(feature = "logging")]
use tracing::error;

/// Per-arena diagnostic state
#[derive(Debug, Clone)]
pub(crate) struct Diagnostics {
    /// Next canary to stamp, `None` when canaries are disabled
    canary: Option<u32>,
    /// Run [`Arena::check`] after every mutating operation
    verify: bool,
    /// Byte written over released payloads
    fill: Option<u8>,
}

impl Diagnostics {
    pub(crate) fn new(config: &PoolConfig) -> Self {
        Self {
            canary: config.canaries.then_some(0),
            verify: config.verify,
            fill: config.fill_pattern,
        }
    }

    fn next_canary(&mut self) -> Option<u32> {
        let current = self.canary.as_mut()?;
        *current = current.wrapping_add(1);
        Some(*current)
    }

    pub(crate) fn fill(&self) -> Option<u8> {
        self.fill
    }
}

impl<T> Arena<T> {
    /// Writes a fresh canary into the header and footer of `index`.
    pub(super) fn stamp(&mut self, index: u32) {
        if let Some(canary) = self.diagnostics.next_canary() {
            self.set_canaries(index, canary);
        }
    }

    /// Compares the header and footer canaries of `index`.
    pub(super) fn check_canary(&self, index: u32) -> PoolResult<()> {
        if !self.layout.canaries {
            return Ok(());
        }
        let (header, footer) = self.canaries(index);
        if header == footer {
            Ok(())
        } else {
            Err(PoolError::corruption(
                "arena",
                &format!("block {index} canary mismatch: header {header:#x}, footer {footer:#x}"),
            ))
        }
    }

    /// Runs [`Arena::check`] when verification is enabled; a failure is fatal.
    pub(super) fn verify_after(&self, operation: &'static str) {
        if !self.diagnostics.verify {
            return;
        }
        if let Err(err) = self.check() {
            #[cfg(feature = "logging")]
            error!(operation, code = err.code(), "arena validation failed");
            #[cfg(not(feature = "logging"))]
            let _ = operation;
            fatal(&err);
        }
    }

    /// Validates the whole arena.
    ///
    /// Checks that blocks tile the buffer, header and footer agree, no two
    /// free blocks touch, every free block is linked exactly once into the
    /// bucket of its exact class with consistent back links, and the in-use
    /// count matches the live blocks.
    pub(crate) fn check(&self) -> PoolResult<()> {
        let capacity = self.capacity;
        let mut free_starts = vec![false; capacity as usize];
        let mut free_blocks = 0usize;
        let mut used_units = 0u32;
        let mut prev_free = false;
        let mut index = 0u32;

        while index < capacity {
            let size = self.size(index);
            if size == 0 || size > capacity - index {
                return Err(corrupt(format!("block {index} records {size} units")));
            }
            let footer = self.footer_size(index, size);
            if footer != size {
                return Err(corrupt(format!(
                    "block {index} header size {size} != footer size {footer}"
                )));
            }
            self.check_canary(index)?;

            if self.is_used(index) {
                used_units += size;
                prev_free = false;
            } else {
                if prev_free {
                    return Err(corrupt(format!("free block {index} follows a free block")));
                }
                prev_free = true;
                free_blocks += 1;
                free_starts[index as usize] = true;
            }
            index += size;
        }

        if used_units != self.used {
            return Err(corrupt(format!(
                "in-use count {} but live blocks span {used_units} units",
                self.used
            )));
        }

        let mut listed = 0usize;
        for (class, &head) in self.buckets.iter().enumerate() {
            let mut prev = NONE;
            let mut cursor = head;
            while cursor != NONE {
                if cursor >= capacity || !free_starts[cursor as usize] {
                    return Err(corrupt(format!(
                        "bucket {class} links to {cursor}, which is not a free block"
                    )));
                }
                // each free block may be reached once
                free_starts[cursor as usize] = false;

                let size = self.size(cursor);
                let (min, max) = class_range(class);
                if !(min..max).contains(&u64::from(size)) {
                    return Err(corrupt(format!(
                        "block {cursor} of {size} units filed under bucket {class}"
                    )));
                }
                let (back, next) = self.links(cursor);
                if back != prev {
                    return Err(corrupt(format!(
                        "block {cursor} links back to {back}, expected {prev}"
                    )));
                }
                listed += 1;
                prev = cursor;
                cursor = next;
            }
        }

        if listed != free_blocks {
            return Err(corrupt(format!(
                "{free_blocks} free blocks but {listed} listed in buckets"
            )));
        }
        Ok(())
    }
}

fn corrupt(details: String) -> PoolError {
    PoolError::corruption("arena", &details)
}
