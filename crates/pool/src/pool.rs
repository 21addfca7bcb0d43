//! Growable pool of typed arenas
//!
//! # Safety
//!
//! A [`Pool`] hands out raw pointers into buffers owned by its arenas:
//! - Arenas are only appended (or dropped by `clear(true, ..)`), so a pointer
//!   stays valid until it is destroyed, the pool is cleared, or the pool drops
//! - Each pointer must be destroyed at most once, through the pool that
//!   returned it
//! - Dropping the pool frees every buffer without running `T` destructors

use core::fmt;
use core::ptr::NonNull;

#[cfg(feature = "logging")]
use tracing::{debug, trace};

use crate::arena::{Arena, UnitLayout};
use crate::class::{class_at_least, class_of};
use crate::config::{MAX_CAPACITY, PoolConfig};
use crate::error::{PoolError, PoolResult, fatal};
use crate::stats::PoolStats;

/// Allocator for many values of one type `T`
///
/// Values live in blocks carved out of a growing list of arenas; each new
/// arena doubles the capacity of the last one. Single-values and arrays share
/// the same arenas, and released blocks are merged with free neighbors right
/// away.
///
/// ```
/// use tagpool::Pool;
///
/// let mut pool = Pool::<u64>::new()?;
/// let value = pool.allocate(42);
/// assert_eq!(unsafe { *value.as_ptr() }, 42);
/// assert_eq!(pool.used(), 1);
///
/// unsafe { pool.destroy(value.as_ptr()) };
/// assert_eq!(pool.used(), 0);
/// # Ok::<(), tagpool::PoolError>(())
/// ```
pub struct Pool<T> {
    arenas: Vec<Arena<T>>,
    layout: UnitLayout,
    config: PoolConfig,
    allocations: u64,
    releases: u64,
    growths: u64,
    peak_used: usize,
}

impl<T> Pool<T> {
    /// Creates a pool whose first arena holds the default 8 units.
    pub fn new() -> PoolResult<Self> {
        Self::with_config(PoolConfig::default())
    }

    /// Creates a pool whose first arena holds `capacity` units.
    pub fn with_capacity(capacity: usize) -> PoolResult<Self> {
        Self::with_config(PoolConfig::default().with_initial_capacity(capacity))
    }

    /// Creates a pool from an explicit configuration.
    pub fn with_config(config: PoolConfig) -> PoolResult<Self> {
        config.validate()?;
        let layout = UnitLayout::of::<T>(config.canaries)?;
        let first = Arena::new(config.initial_capacity as u32, layout, &config)?;

        #[cfg(feature = "logging")]
        debug!(
            capacity = config.initial_capacity,
            unit = layout.unit,
            element = core::any::type_name::<T>(),
            "pool created"
        );

        Ok(Self {
            arenas: vec![first],
            layout,
            config,
            allocations: 0,
            releases: 0,
            growths: 0,
            peak_used: 0,
        })
    }

    /// Moves `value` into the pool.
    ///
    /// # Panics
    ///
    /// Panics when the pool cannot grow any further.
    pub fn allocate(&mut self, value: T) -> NonNull<T> {
        match self.try_allocate(value) {
            Ok(ptr) => ptr,
            Err(err) => fatal(&err),
        }
    }

    /// Builds a value with `f` and moves it into the pool.
    ///
    /// `f` runs before any block is taken, so a panic inside it leaves the
    /// pool untouched.
    pub fn allocate_with<F>(&mut self, f: F) -> NonNull<T>
    where
        F: FnOnce() -> T,
    {
        self.allocate(f())
    }

    /// Moves `value` into the pool, reporting growth failure as an error.
    pub fn try_allocate(&mut self, value: T) -> PoolResult<NonNull<T>> {
        let ptr = self.acquire(1)?;
        // SAFETY: Writing into a freshly acquired block.
        // - The block holds one unit, room for one T, aligned for T
        // - Nothing else points into it until we return
        unsafe { ptr.as_ptr().write(value) };
        self.record_allocation();
        Ok(ptr)
    }

    /// Allocates `len` contiguous default values.
    ///
    /// Returns `None` for `len == 0`.
    ///
    /// # Panics
    ///
    /// Panics when the pool cannot grow to fit `len` units. A panic raised by
    /// `T::default` is propagated after the values built so far are dropped
    /// and the block is returned to the pool.
    pub fn allocate_array(&mut self, len: usize) -> Option<NonNull<[T]>>
    where
        T: Default,
    {
        match self.try_allocate_array(len) {
            Ok(slice) => slice,
            Err(err) => fatal(&err),
        }
    }

    /// Fallible form of [`Pool::allocate_array`].
    pub fn try_allocate_array(&mut self, len: usize) -> PoolResult<Option<NonNull<[T]>>>
    where
        T: Default,
    {
        if len == 0 {
            return Ok(None);
        }
        if len > MAX_CAPACITY {
            return Err(PoolError::capacity_overflow(len, MAX_CAPACITY));
        }
        let first = self.acquire(len as u32)?;

        let mut init = ArrayInit {
            pool: self,
            first,
            len,
            built: 0,
        };
        while init.built < len {
            // SAFETY: built < len, and the block spans len contiguous slots
            // aligned for T.
            unsafe { first.as_ptr().add(init.built).write(T::default()) };
            init.built += 1;
        }
        drop(init);

        self.record_allocation();
        Ok(Some(NonNull::slice_from_raw_parts(first, len)))
    }

    /// Drops the value(s) at `ptr` and returns the block to the pool.
    ///
    /// A null pointer is ignored. For an array pass the pointer to its first
    /// element; every element is dropped.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or have been returned by this pool and not
    /// destroyed since, and the values must not be used afterwards.
    ///
    /// # Panics
    ///
    /// Panics when `ptr` does not belong to this pool, is not the start of a
    /// block, or names a block that is already free.
    pub unsafe fn destroy(&mut self, ptr: *mut T) {
        // SAFETY: forwarded caller contract.
        if let Err(err) = unsafe { self.try_destroy(ptr) } {
            fatal(&err);
        }
    }

    /// Fallible form of [`Pool::destroy`].
    ///
    /// Foreign pointers, pointers off the unit grid and double frees are
    /// reported instead of panicking; nothing is dropped in those cases.
    ///
    /// # Safety
    ///
    /// Same as [`Pool::destroy`], except that misuse the pool can detect is
    /// returned as an error.
    pub unsafe fn try_destroy(&mut self, ptr: *mut T) -> PoolResult<()> {
        let Some(ptr) = NonNull::new(ptr) else {
            return Ok(());
        };
        // SAFETY: forwarded caller contract.
        unsafe { self.release(ptr, true)? };
        self.releases += 1;
        Ok(())
    }

    /// Resets every arena to a single free block.
    ///
    /// With `run_destructors` every live value is dropped first; otherwise
    /// live values are forgotten. With `shrink` only the first arena is
    /// kept. All outstanding pointers are invalidated.
    pub fn clear(&mut self, shrink: bool, run_destructors: bool) {
        for arena in &mut self.arenas {
            arena.clear(run_destructors);
        }
        if shrink {
            self.arenas.truncate(1);
        }

        #[cfg(feature = "logging")]
        debug!(
            shrink,
            run_destructors,
            arenas = self.arenas.len(),
            capacity = self.capacity(),
            "pool cleared"
        );
    }

    /// Free units across all arenas.
    pub fn remaining(&self) -> usize {
        self.arenas.iter().map(|arena| arena.remaining() as usize).sum()
    }

    /// Units held by live values across all arenas.
    pub fn used(&self) -> usize {
        self.arenas.iter().map(|arena| arena.used() as usize).sum()
    }

    /// Total units across all arenas.
    pub fn capacity(&self) -> usize {
        self.arenas.iter().map(|arena| arena.capacity() as usize).sum()
    }

    pub fn arena_count(&self) -> usize {
        self.arenas.len()
    }

    /// Bytes per unit, tags and padding included.
    pub fn unit_size(&self) -> usize {
        self.layout.unit
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Whether `ptr` points into memory managed by this pool.
    pub fn contains(&self, ptr: *const T) -> bool {
        self.arenas.iter().any(|arena| arena.contains(ptr))
    }

    /// Validates the boundary tags and free lists of every arena.
    pub fn check(&self) -> PoolResult<()> {
        self.arenas.iter().try_for_each(Arena::check)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocations: self.allocations,
            releases: self.releases,
            growths: self.growths,
            peak_used: self.peak_used,
            unit_size: self.layout.unit,
            arenas: self.arenas.iter().map(Arena::stats).collect(),
        }
    }

    /// Takes `units` units from the first arena that fits, appending doubled
    /// arenas one at a time until one does.
    fn acquire(&mut self, units: u32) -> PoolResult<NonNull<T>> {
        if let Some(ptr) = self.arenas.iter_mut().find_map(|arena| arena.acquire(units)) {
            return Ok(ptr);
        }
        let target = self.growth_target(units)?;
        loop {
            let capacity = self.grow(units)?;
            if let Some(ptr) = self.arenas.last_mut().and_then(|arena| arena.acquire(units)) {
                return Ok(ptr);
            }
            if capacity >= target {
                return Err(PoolError::corruption(
                    "pool",
                    &format!("new arena of {capacity} units cannot fit {units} units"),
                ));
            }
        }
    }

    /// Capacity of the first arena in the doubling sequence whose single free
    /// block is found by a request of `units` units.
    ///
    /// Fails before anything is allocated when that arena would exceed
    /// [`MAX_CAPACITY`].
    fn growth_target(&self, units: u32) -> PoolResult<u32> {
        let search = class_at_least(units);
        let mut capacity = u64::from(self.arenas.last().map_or(0, Arena::capacity));
        loop {
            capacity = (capacity * 2).max(1);
            if capacity > MAX_CAPACITY as u64 {
                return Err(PoolError::capacity_overflow(
                    usize::try_from(capacity).unwrap_or(usize::MAX),
                    MAX_CAPACITY,
                ));
            }
            if search <= class_of(capacity as u32) {
                return Ok(capacity as u32);
            }
        }
    }

    /// Appends one arena of twice the last capacity and returns its capacity.
    fn grow(&mut self, requested: u32) -> PoolResult<u32> {
        let last = self.arenas.last().map_or(0, Arena::capacity);
        let capacity = (u64::from(last) * 2).max(1);
        if capacity > MAX_CAPACITY as u64 {
            return Err(PoolError::capacity_overflow(
                usize::try_from(capacity).unwrap_or(usize::MAX),
                MAX_CAPACITY,
            ));
        }
        let capacity = capacity as u32;

        let arena = Arena::new(capacity, self.layout, &self.config)?;
        self.arenas.push(arena);
        self.growths += 1;

        #[cfg(feature = "logging")]
        debug!(
            capacity,
            requested,
            arenas = self.arenas.len(),
            "pool grew"
        );
        #[cfg(not(feature = "logging"))]
        let _ = requested;

        Ok(capacity)
    }

    /// Finds the owning arena and releases the block at `ptr`.
    unsafe fn release(&mut self, ptr: NonNull<T>, drop_payload: bool) -> PoolResult<()> {
        let arena = self
            .arenas
            .iter_mut()
            .find(|arena| arena.contains(ptr.as_ptr()))
            .ok_or_else(|| PoolError::foreign_pointer(ptr.as_ptr() as usize))?;
        // SAFETY: forwarded caller contract; the arena owns the address.
        unsafe { arena.release(ptr, drop_payload) }
    }

    fn record_allocation(&mut self) {
        self.allocations += 1;
        self.peak_used = self.peak_used.max(self.used());

        #[cfg(feature = "logging")]
        trace!(allocations = self.allocations, peak_used = self.peak_used, "pool allocation");
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("element", &core::any::type_name::<T>())
            .field("arenas", &self.arenas.len())
            .field("capacity", &self.capacity())
            .field("used", &self.used())
            .field("unit_size", &self.layout.unit)
            .finish()
    }
}

/// Rolls back a partially built array when `T::default` panics.
struct ArrayInit<'a, T> {
    pool: &'a mut Pool<T>,
    first: NonNull<T>,
    len: usize,
    built: usize,
}

impl<T> Drop for ArrayInit<'_, T> {
    fn drop(&mut self) {
        if self.built == self.len {
            return;
        }
        // SAFETY: Unwinding out of T::default.
        // - The first `built` slots hold initialized values, the rest do not
        // - The block was acquired above and is released exactly once,
        //   without dropping its (partly uninitialized) payload again
        unsafe {
            core::ptr::drop_in_place(core::ptr::slice_from_raw_parts_mut(
                self.first.as_ptr(),
                self.built,
            ));
            if let Err(err) = self.pool.release(self.first, false) {
                fatal(&err);
            }
        }
    }
}
