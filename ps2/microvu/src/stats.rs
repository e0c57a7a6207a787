use core::fmt;

/// Counters for one vector unit's cache, since init
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    /// resolve() served from a bucket's quick reference
    pub quick_hits: u64,
    /// resolve() served by searching a bucket
    pub search_hits: u64,
    /// resolve() that had to compile
    pub misses: u64,
    /// Program comparisons performed while searching
    pub comparisons: u64,
    /// Programs cleared to make room
    pub evictions: u64,
    /// Times the whole cache was thrown away because it filled up
    pub cache_resets: u64,
}

impl Stats {
    pub fn lookups(&self) -> u64 {
        self.quick_hits + self.search_hits + self.misses
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lookups={} quick={} search={} miss={} cmp={} evict={} resets={}",
            self.lookups(), self.quick_hits, self.search_hits, self.misses,
            self.comparisons, self.evictions, self.cache_resets)
    }
}
