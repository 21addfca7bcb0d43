//! # tagpool
//!
//! Typed pool allocator built on boundary-tagged arenas.
//!
//! A [`Pool<T>`] serves values of a single type from a few large buffers
//! instead of the general-purpose heap:
//! - Each arena is a run of fixed-size units grouped into blocks; a block
//!   carries its size in a header and a footer, so freed blocks merge with
//!   their neighbors in constant time
//! - Free blocks are filed in power-of-two size classes and found with a
//!   single bucket probe
//! - When no arena fits a request, an arena of twice the previous capacity is
//!   appended; existing values never move
//!
//! ## Quick Start
//!
//! ```rust
//! use tagpool::prelude::*;
//!
//! let mut pool = Pool::<[u64; 4]>::new()?;
//! let single = pool.allocate([1, 2, 3, 4]);
//! let array = pool.allocate_array(16).expect("non-empty array");
//! assert_eq!(pool.used(), 17);
//!
//! unsafe {
//!     pool.destroy(single.as_ptr());
//!     pool.destroy(array.as_ptr().cast::<[u64; 4]>());
//! }
//! assert_eq!(pool.used(), 0);
//! # Ok::<(), PoolError>(())
//! ```
//!
//! ## Features
//!
//! - `logging` (default): `tracing` events for growth, clears and detected
//!   corruption
//! - `verify`: validate every arena after each mutating operation by default
//!
//! The pool is single-threaded; it is `Send` when `T` is, and never `Sync`.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(rust_2018_idioms)]
// Boundary tags and intrusive free lists are raw-pointer code by nature
#![allow(unsafe_code)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
// Unit counts are u32 by layout, and widen to usize at the API boundary
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
// Packed tags are read and written unaligned on purpose
#![allow(clippy::cast_ptr_alignment)]

pub mod class;
pub mod config;
pub mod error;
pub mod stats;

mod arena;
mod pool;

pub use crate::config::{DEFAULT_CAPACITY, MAX_CAPACITY, PoolConfig};
pub use crate::error::{PoolError, PoolResult};
pub use crate::pool::Pool;
pub use crate::stats::{ArenaStats, PoolStats};

pub mod prelude {
    //! Convenient re-exports of commonly used types.

    pub use crate::config::PoolConfig;
    pub use crate::error::{PoolError, PoolResult};
    pub use crate::pool::Pool;
    pub use crate::stats::{ArenaStats, PoolStats};
}
