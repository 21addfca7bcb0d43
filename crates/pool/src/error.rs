//! Standalone error types for tagpool
//!
//! Uses thiserror for clean, idiomatic Rust error definitions.
//!
//! Most of these describe programming errors (double free, foreign pointer,
//! corrupted boundary tags). The plain `Pool` entry points treat them as fatal
//! and panic; the `try_*` entry points hand them back as values.

use thiserror::Error;

#[cfg(feature = "logging")]
use tracing::{error, warn};

// ============================================================================
// Main Error Type
// ============================================================================

/// Pool and arena errors
#[must_use = "errors should be handled"]
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    // --- Configuration Errors ---
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // --- Growth Errors ---
    #[error("Capacity overflow: {requested} units requested (max: {max})")]
    CapacityOverflow { requested: usize, max: usize },

    #[error("Size overflow during operation: {operation}")]
    SizeOverflow { operation: String },

    // --- Release Errors ---
    #[error("Pointer {address:#x} does not belong to any arena of this pool")]
    ForeignPointer { address: usize },

    #[error("Pointer {address:#x} is not the start of a block")]
    MisalignedPointer { address: usize },

    #[error("Double free of block at {address:#x}")]
    DoubleFree { address: usize },

    // --- Integrity Errors ---
    #[error("Memory corruption detected in {component}: {details}")]
    Corruption { component: String, details: String },
}

impl PoolError {
    /// Whether the error signals a broken invariant rather than a bad request.
    ///
    /// Continuing after a fatal error risks further corruption of the arena.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ForeignPointer { .. }
                | Self::MisalignedPointer { .. }
                | Self::DoubleFree { .. }
                | Self::Corruption { .. }
        )
    }

    /// Get error code for categorization
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "POOL:CONFIG:INVALID",
            Self::CapacityOverflow { .. } => "POOL:GROW:CAPACITY",
            Self::SizeOverflow { .. } => "POOL:GROW:OVERFLOW",
            Self::ForeignPointer { .. } => "POOL:RELEASE:FOREIGN",
            Self::MisalignedPointer { .. } => "POOL:RELEASE:MISALIGNED",
            Self::DoubleFree { .. } => "POOL:RELEASE:DOUBLE_FREE",
            Self::Corruption { .. } => "POOL:ARENA:CORRUPTION",
        }
    }

    // ============================================================================
    // Convenience Constructors
    // ============================================================================

    /// Create invalid config error
    pub fn invalid_config(reason: &str) -> Self {
        Self::InvalidConfig {
            reason: reason.to_string(),
        }
    }

    /// Create capacity overflow error
    pub fn capacity_overflow(requested: usize, max: usize) -> Self {
        #[cfg(feature = "logging")]
        warn!(requested, max, "pool capacity overflow");

        Self::CapacityOverflow { requested, max }
    }

    /// Create size overflow error
    pub fn size_overflow(operation: &str) -> Self {
        Self::SizeOverflow {
            operation: operation.to_string(),
        }
    }

    /// Create foreign pointer error
    pub fn foreign_pointer(address: usize) -> Self {
        #[cfg(feature = "logging")]
        error!("Release of foreign pointer {address:#x}");

        Self::ForeignPointer { address }
    }

    /// Create misaligned pointer error
    pub fn misaligned_pointer(address: usize) -> Self {
        #[cfg(feature = "logging")]
        error!("Release of pointer {address:#x} off the unit grid");

        Self::MisalignedPointer { address }
    }

    /// Create double free error
    pub fn double_free(address: usize) -> Self {
        #[cfg(feature = "logging")]
        error!("Double free at {address:#x}");

        Self::DoubleFree { address }
    }

    /// Create memory corruption error
    pub fn corruption(component: &str, details: &str) -> Self {
        #[cfg(feature = "logging")]
        error!("Memory corruption: {component} - {details}");

        Self::Corruption {
            component: component.to_string(),
            details: details.to_string(),
        }
    }
}

/// Aborts the current operation on a broken invariant.
#[cold]
#[track_caller]
pub(crate) fn fatal(err: &PoolError) -> ! {
    panic!("tagpool: {err} [{}]", err.code())
}

// ============================================================================
// Result Types
// ============================================================================

/// Result type for pool operations
pub type PoolResult<T> = core::result::Result<T, PoolError>;

// ============================================================================
// Tests
// ============================================================================
