//! Pool configuration

use crate::error::{PoolError, PoolResult};

/// Units in the first arena when no capacity is given.
pub const DEFAULT_CAPACITY: usize = 8;

/// Largest number of units a single arena (or array request) may span.
///
/// Block sizes and free-list links are stored as `u32` unit counts, and the
/// growth policy doubles capacities, so arenas stop at `2^31` units.
pub const MAX_CAPACITY: usize = 1 << 31;

/// Configuration for a [`Pool`](crate::Pool)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Units in the first arena; every later arena doubles the previous one
    pub initial_capacity: usize,

    /// Store canary words in block headers and footers
    pub canaries: bool,

    /// Validate the whole arena after every mutating operation
    pub verify: bool,

    /// Fill pattern byte for fresh buffers and released payloads (for debugging)
    pub fill_pattern: Option<u8>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_capacity: DEFAULT_CAPACITY,
            canaries: cfg!(debug_assertions),
            verify: cfg!(feature = "verify"),
            fill_pattern: if cfg!(debug_assertions) {
                Some(0xFD)
            } else {
                None
            },
        }
    }
}

impl PoolConfig {
    /// Production configuration - no canaries, no validation, no fill
    #[must_use]
    pub fn production() -> Self {
        Self {
            initial_capacity: DEFAULT_CAPACITY,
            canaries: false,
            verify: false,
            fill_pattern: None,
        }
    }

    /// Debug configuration - canaries, fill pattern and full validation
    #[must_use]
    pub fn debug() -> Self {
        Self {
            initial_capacity: DEFAULT_CAPACITY,
            canaries: true,
            verify: true,
            fill_pattern: Some(0xFD),
        }
    }

    /// Sets the capacity of the first arena
    #[must_use = "builder methods must be chained or built"]
    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Checks that the configuration can build an arena
    pub fn validate(&self) -> PoolResult<()> {
        if self.initial_capacity == 0 {
            return Err(PoolError::invalid_config(
                "initial capacity must be at least one unit",
            ));
        }
        if self.initial_capacity > MAX_CAPACITY {
            return Err(PoolError::invalid_config(&format!(
                "initial capacity {} exceeds maximum of {MAX_CAPACITY} units",
                self.initial_capacity
            )));
        }
        Ok(())
    }
}
