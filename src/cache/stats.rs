use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic per-region counters. Never reset by eviction or expiry.
#[derive(Debug, Default)]
pub(crate) struct RegionCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl RegionCounters {
    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expirations(&self, count: u64) {
        self.expirations.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self, name: &str, size: usize, capacity: usize) -> RegionStats {
        RegionStats::new(
            name.to_string(),
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.evictions.load(Ordering::Relaxed),
            self.expirations.load(Ordering::Relaxed),
            size,
            capacity,
        )
    }
}

/// Point-in-time view of a region's statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionStats {
    pub region: String,
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, or 0.0 before the first access
    pub hit_rate: f64,
    pub evictions: u64,
    pub expirations: u64,
    pub size: usize,
    pub capacity: usize,
}

impl RegionStats {
    fn new(
        region: String,
        hits: u64,
        misses: u64,
        evictions: u64,
        expirations: u64,
        size: usize,
        capacity: usize,
    ) -> Self {
        let total = hits + misses;
        let hit_rate = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        };
        Self {
            region,
            hits,
            misses,
            hit_rate,
            evictions,
            expirations,
            size,
            capacity,
        }
    }

    pub fn requests(&self) -> u64 {
        self.hits + self.misses
    }
}
