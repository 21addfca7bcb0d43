//! Size-class arithmetic for the free-list buckets
//!
//! A free block of `n` units lives in bucket `floor(log2(n))`, so bucket `c`
//! holds blocks of `2^c ..= 2^(c+1) - 1` units. A request for `n` units starts
//! its search at bucket `ceil(log2(n))`: every block found there or above is
//! large enough without being inspected.
//!
//! ```
//! use tagpool::class::{class_at_least, class_of};
//!
//! assert_eq!(class_of(1), 0);
//! assert_eq!(class_of(7), 2);
//! assert_eq!(class_at_least(5), 3);
//! assert_eq!(class_at_least(8), 3);
//! ```

/// Bucket of a free block holding `units` units: `floor(log2(units))`.
#[inline]
pub const fn class_of(units: u32) -> usize {
    debug_assert!(units > 0);
    (u32::BITS - 1 - units.leading_zeros()) as usize
}

/// First bucket whose every block holds at least `units` units:
/// `ceil(log2(units))`.
#[inline]
pub const fn class_at_least(units: u32) -> usize {
    debug_assert!(units > 0);
    if units == 1 {
        0
    } else {
        class_of(units - 1) + 1
    }
}

/// Number of buckets an arena of `capacity` units needs.
#[inline]
pub const fn bucket_count(capacity: u32) -> usize {
    class_of(capacity) + 1
}

/// Unit range `[min, max)` covered by bucket `class`.
#[inline]
pub const fn class_range(class: usize) -> (u64, u64) {
    let min = 1u64 << class;
    (min, min << 1)
}
