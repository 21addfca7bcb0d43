//! Behavior of the pool through its public API: growth, reuse, coalescing,
//! arrays, clearing and misuse reporting.

use std::cell::Cell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::ptr::{self, NonNull};

use pretty_assertions::assert_eq;
use rstest::rstest;
use tagpool::{Pool, PoolConfig, PoolError};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

thread_local! {
    static BUILT: Cell<usize> = const { Cell::new(0) };
    static DROPPED: Cell<usize> = const { Cell::new(0) };
    static PANIC_AT: Cell<Option<usize>> = const { Cell::new(None) };
}

/// Counts constructions and drops on the current thread.
struct Probe(#[allow(dead_code)] u64);

impl Probe {
    fn new(value: u64) -> Self {
        BUILT.with(|built| built.set(built.get() + 1));
        Self(value)
    }
}

impl Default for Probe {
    fn default() -> Self {
        let built = BUILT.with(Cell::get);
        if PANIC_AT.with(Cell::get) == Some(built) {
            panic!("probe {built} refused to build");
        }
        Self::new(0)
    }
}

impl Drop for Probe {
    fn drop(&mut self) {
        DROPPED.with(|dropped| dropped.set(dropped.get() + 1));
    }
}

fn reset_counters() {
    BUILT.with(|built| built.set(0));
    DROPPED.with(|dropped| dropped.set(0));
    PANIC_AT.with(|at| at.set(None));
}

fn built() -> usize {
    BUILT.with(Cell::get)
}

fn dropped() -> usize {
    DROPPED.with(Cell::get)
}

#[repr(align(64))]
#[derive(Default)]
struct CacheLine {
    value: u64,
}

fn debug_pool<T>() -> Pool<T> {
    Pool::with_config(PoolConfig::debug()).unwrap()
}

// ---------------------------------------------------------------------------
// Growth
// ---------------------------------------------------------------------------

#[test]
fn ninth_allocation_appends_double_arena() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let mut pool = Pool::<u64>::new().unwrap();
    for value in 0..8 {
        pool.allocate(value);
    }
    assert_eq!(pool.arena_count(), 1);
    assert_eq!(pool.remaining(), 0);

    pool.allocate(8);
    assert_eq!(pool.arena_count(), 2);
    assert_eq!(pool.capacity(), 8 + 16);
    assert_eq!(pool.remaining(), 15);
    assert_eq!(pool.used(), 9);

    let stats = pool.stats();
    assert_eq!(stats.growths, 1);
    assert_eq!(stats.allocations, 9);
    assert_eq!(stats.arenas[1].capacity, 16);
}

#[rstest]
#[case::fits_after_one_doubling(9, &[8, 16])]
#[case::exact_power(32, &[8, 16, 32])]
#[case::walks_every_doubling(100, &[8, 16, 32, 64, 128])]
fn large_array_grows_until_it_fits(#[case] len: usize, #[case] expected: &[usize]) {
    let mut pool = debug_pool::<u32>();
    let array = pool.allocate_array(len).unwrap();
    assert_eq!(array.len(), len);

    let capacities: Vec<usize> = pool.stats().arenas.iter().map(|arena| arena.capacity).collect();
    assert_eq!(capacities, expected);
    assert_eq!(pool.arena_count(), expected.len());
    assert_eq!(pool.used(), len);
    assert_eq!(pool.remaining(), expected.iter().sum::<usize>() - len);
}

#[test]
fn growth_keeps_existing_addresses() {
    let mut pool = debug_pool::<u64>();
    let early: Vec<_> = (0..8).map(|value| pool.allocate(value)).collect();
    let late: Vec<_> = (8..40).map(|value| pool.allocate(value)).collect();
    assert!(pool.arena_count() > 1);

    for (value, ptr) in early.iter().chain(&late).enumerate() {
        assert_eq!(unsafe { *ptr.as_ptr() }, value as u64);
        assert!(pool.contains(ptr.as_ptr()));
    }
}

// ---------------------------------------------------------------------------
// Reuse and coalescing
// ---------------------------------------------------------------------------

#[test]
fn freed_slot_is_reused_exactly() {
    let mut pool = Pool::<u64>::new().unwrap();
    let slots: Vec<_> = (0..5).map(|value| pool.allocate(value)).collect();

    unsafe { pool.destroy(slots[2].as_ptr()) };
    let again = pool.allocate(99);
    assert_eq!(again, slots[2]);
    assert_eq!(unsafe { *again.as_ptr() }, 99);
    assert_eq!(pool.arena_count(), 1);
}

#[rstest]
#[case::forward(&[0, 1, 2, 3, 4, 5, 6, 7])]
#[case::backward(&[7, 6, 5, 4, 3, 2, 1, 0])]
#[case::interleaved(&[1, 3, 5, 7, 0, 2, 4, 6])]
fn full_release_coalesces_to_one_block(#[case] order: &[usize]) {
    let mut pool = debug_pool::<u64>();
    let slots: Vec<_> = (0..8).map(|value| pool.allocate(value)).collect();
    assert_eq!(pool.remaining(), 0);

    for &index in order {
        unsafe { pool.destroy(slots[index].as_ptr()) };
    }
    assert_eq!(pool.remaining(), 8);
    let stats = pool.stats();
    assert_eq!(stats.arenas[0].free_blocks, 1);
    assert_eq!(stats.arenas[0].largest_free, 8);

    assert!(pool.allocate_array(8).is_some());
    assert_eq!(pool.arena_count(), 1);
}

#[test]
fn unrelated_traffic_leaves_values_intact() {
    let mut pool = debug_pool::<[u64; 3]>();
    let keep: Vec<_> = (0..10u64).map(|n| pool.allocate([n, n + 1, n + 2])).collect();

    for round in 0..5 {
        let churn: Vec<_> = (0..7).map(|_| pool.allocate([round; 3])).collect();
        let array = pool.allocate_array(5).unwrap();
        for ptr in churn {
            unsafe { pool.destroy(ptr.as_ptr()) };
        }
        unsafe { pool.destroy(array.as_ptr().cast::<[u64; 3]>()) };
    }

    for (n, ptr) in keep.iter().enumerate() {
        let n = n as u64;
        assert_eq!(unsafe { *ptr.as_ptr() }, [n, n + 1, n + 2]);
    }
    assert_eq!(pool.used(), 10);
    assert!(pool.check().is_ok());
}

// ---------------------------------------------------------------------------
// Arrays and destructors
// ---------------------------------------------------------------------------

#[test]
fn empty_array_is_none() {
    let mut pool = Pool::<u64>::new().unwrap();
    assert!(pool.allocate_array(0).is_none());
    assert_eq!(pool.try_allocate_array(0), Ok(None));
    assert_eq!(pool.used(), 0);
}

#[rstest]
#[case(1)]
#[case(3)]
#[case(8)]
#[case(21)]
fn array_destroy_runs_every_destructor(#[case] len: usize) {
    reset_counters();
    let mut pool = debug_pool::<Probe>();
    let array = pool.allocate_array(len).unwrap();
    assert_eq!(built(), len);
    assert_eq!(pool.used(), len);

    unsafe { pool.destroy(array.as_ptr().cast::<Probe>()) };
    assert_eq!(dropped(), len);
    assert_eq!(pool.used(), 0);
}

#[test]
fn panicking_default_rolls_back_the_array() {
    reset_counters();
    PANIC_AT.with(|at| at.set(Some(3)));

    let mut pool = debug_pool::<Probe>();
    let keep = pool.allocate(Probe::new(7));
    let result = catch_unwind(AssertUnwindSafe(|| pool.allocate_array(6)));
    assert!(result.is_err());

    // the value allocated before plus two array elements were built
    assert_eq!(built(), 3);
    assert_eq!(dropped(), 2);
    assert_eq!(pool.used(), 1);
    assert!(pool.check().is_ok());

    PANIC_AT.with(|at| at.set(None));
    unsafe { pool.destroy(keep.as_ptr()) };
    assert_eq!(pool.remaining(), pool.capacity());
}

#[test]
fn allocate_with_builds_before_taking_a_block() {
    let mut pool = debug_pool::<String>();
    let result = catch_unwind(AssertUnwindSafe(|| {
        pool.allocate_with(|| panic!("constructor failed"))
    }));
    assert!(result.is_err());
    assert_eq!(pool.used(), 0);

    let text = pool.allocate_with(|| "pooled".to_owned());
    assert_eq!(unsafe { text.as_ref() }, "pooled");
    unsafe { pool.destroy(text.as_ptr()) };
}

#[test]
fn dropping_the_pool_skips_destructors() {
    reset_counters();
    {
        let mut pool = Pool::<Probe>::new().unwrap();
        for value in 0..4 {
            pool.allocate(Probe::new(value));
        }
    }
    assert_eq!(built(), 4);
    assert_eq!(dropped(), 0);
}

// ---------------------------------------------------------------------------
// Clearing
// ---------------------------------------------------------------------------

#[test]
fn clear_with_shrink_keeps_first_arena() {
    reset_counters();
    let mut pool = debug_pool::<Probe>();
    for value in 0..20 {
        pool.allocate(Probe::new(value));
    }
    assert_eq!(pool.arena_count(), 2);

    pool.clear(true, true);
    assert_eq!(dropped(), 20);
    assert_eq!(pool.arena_count(), 1);
    assert_eq!(pool.capacity(), 8);
    assert_eq!(pool.remaining(), 8);
    assert!(pool.check().is_ok());
}

#[test]
fn clear_without_shrink_keeps_capacity() {
    reset_counters();
    let mut pool = debug_pool::<Probe>();
    for value in 0..20 {
        pool.allocate(Probe::new(value));
    }

    pool.clear(false, false);
    assert_eq!(dropped(), 0);
    assert_eq!(pool.arena_count(), 2);
    assert_eq!(pool.remaining(), 24);
    assert!(pool.allocate_array(16).is_some());
    assert_eq!(pool.arena_count(), 2);
}

// ---------------------------------------------------------------------------
// Alignment
// ---------------------------------------------------------------------------

#[test]
fn over_aligned_values_are_aligned() {
    let mut pool = debug_pool::<CacheLine>();
    for value in 0..12 {
        let ptr = pool.allocate(CacheLine { value });
        assert_eq!(ptr.as_ptr() as usize % 64, 0);
    }
    let array = pool.allocate_array(5).unwrap();
    let first = array.as_ptr().cast::<CacheLine>();
    for offset in 0..5 {
        let element = unsafe { first.add(offset) };
        assert_eq!(element as usize % 64, 0);
        assert_eq!(unsafe { (*element).value }, 0);
    }
    assert_eq!(pool.unit_size() % 64, 0);
}

// ---------------------------------------------------------------------------
// Misuse
// ---------------------------------------------------------------------------

#[test]
fn null_destroy_is_a_no_op() {
    let mut pool = Pool::<u64>::new().unwrap();
    unsafe { pool.destroy(ptr::null_mut()) };
    assert_eq!(unsafe { pool.try_destroy(ptr::null_mut()) }, Ok(()));
    assert_eq!(pool.stats().releases, 0);
}

#[test]
fn double_free_is_reported() {
    let mut pool = debug_pool::<u64>();
    let a = pool.allocate(1);
    let b = pool.allocate(2);
    let _c = pool.allocate(3);

    unsafe { pool.destroy(b.as_ptr()) };
    let err = unsafe { pool.try_destroy(b.as_ptr()) }.unwrap_err();
    assert!(matches!(err, PoolError::DoubleFree { .. }));
    assert!(err.is_fatal());

    // a merges into the free block left by b
    unsafe { pool.destroy(a.as_ptr()) };
    let err = unsafe { pool.try_destroy(b.as_ptr()) }.unwrap_err();
    assert_eq!(err.code(), "POOL:RELEASE:DOUBLE_FREE");
    assert!(pool.check().is_ok());
}

#[test]
fn foreign_pointer_is_reported() {
    let mut pool = debug_pool::<u64>();
    let _owned = pool.allocate(1);
    let mut outside = 5u64;

    assert!(!pool.contains(&outside));
    let err = unsafe { pool.try_destroy(&mut outside) }.unwrap_err();
    assert_eq!(err.code(), "POOL:RELEASE:FOREIGN");
    assert_eq!(outside, 5);
}

#[test]
fn interior_pointer_is_reported() {
    let mut pool = debug_pool::<u64>();
    let owned = pool.allocate(1);
    let inside = owned.as_ptr().cast::<u8>().wrapping_add(2).cast::<u64>();

    let err = unsafe { pool.try_destroy(inside) }.unwrap_err();
    assert_eq!(err.code(), "POOL:RELEASE:MISALIGNED");
    assert_eq!(pool.used(), 1);
}

#[test]
#[should_panic(expected = "POOL:RELEASE:FOREIGN")]
fn destroying_a_foreign_pointer_panics() {
    let mut pool = Pool::<u64>::new().unwrap();
    let mut outside = Box::new(3u64);
    unsafe { pool.destroy(&mut *outside) };
}

#[test]
fn pools_do_not_accept_each_others_pointers() {
    let mut first = debug_pool::<u64>();
    let mut second = debug_pool::<u64>();
    let ptr: NonNull<u64> = first.allocate(1);

    assert!(!second.contains(ptr.as_ptr()));
    assert!(unsafe { second.try_destroy(ptr.as_ptr()) }.is_err());
    unsafe { first.destroy(ptr.as_ptr()) };
}
