//! Pool statistics

/// Snapshot of one arena
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaStats {
    /// Units in the arena
    pub capacity: usize,
    /// Units held by live blocks
    pub used: usize,
    /// Free blocks linked into the buckets
    pub free_blocks: usize,
    /// Units in the largest free block
    pub largest_free: usize,
}

impl ArenaStats {
    /// Units not held by live blocks
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity - self.used
    }
}

/// Statistics for a pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    /// Total allocations performed (arrays count once)
    pub allocations: u64,
    /// Total releases performed
    pub releases: u64,
    /// Arenas appended after the first
    pub growths: u64,
    /// Peak number of units in use
    pub peak_used: usize,
    /// Size of each unit in bytes
    pub unit_size: usize,
    /// Per-arena snapshots in creation order
    pub arenas: Vec<ArenaStats>,
}

impl PoolStats {
    /// Units across all arenas
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.arenas.iter().map(|arena| arena.capacity).sum()
    }

    /// Units in use across all arenas
    #[must_use]
    pub fn used(&self) -> usize {
        self.arenas.iter().map(|arena| arena.used).sum()
    }

    /// Fraction of units in use, `0.0` for an empty pool
    #[must_use]
    pub fn utilization(&self) -> f64 {
        let capacity = self.capacity();
        if capacity == 0 {
            0.0
        } else {
            self.used() as f64 / capacity as f64
        }
    }

    /// Free units outside the largest free block of each arena, relative to
    /// all free units. `0.0` means every arena's free space is one block.
    #[must_use]
    pub fn fragmentation(&self) -> f64 {
        let free: usize = self.arenas.iter().map(ArenaStats::remaining).sum();
        if free == 0 {
            return 0.0;
        }
        let largest: usize = self.arenas.iter().map(|arena| arena.largest_free).sum();
        (free - largest) as f64 / free as f64
    }
}
