//! Cache counters.
//!
//! One [`CacheStats`] is shared by the tiers of a coordinator. Counters are
//! relaxed atomics; a [`CacheStatsSnapshot`] is a point-in-time copy.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters for a layered cache.
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Reads answered by the memory tier.
    pub memory_hits: AtomicU64,
    /// Reads answered by the durable tier.
    pub durable_hits: AtomicU64,
    /// Reads that found nothing fresh in either tier.
    pub misses: AtomicU64,
    /// Successful durable writes.
    pub puts: AtomicU64,
    /// Durable writes that failed (and were reported as `false`).
    pub failed_puts: AtomicU64,
    /// Explicit invalidations.
    pub invalidations: AtomicU64,
    /// Stale durable records removed by a read.
    pub lazy_expirations: AtomicU64,
    /// Storage faults converted into misses or failed writes.
    pub storage_errors: AtomicU64,
    /// Memory tier entries removed by capacity eviction.
    pub memory_evictions: AtomicU64,
    /// Durable records removed by compaction.
    pub compacted_records: AtomicU64,
}

impl CacheStats {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Get current snapshot of all counters.
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            durable_hits: self.durable_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            failed_puts: self.failed_puts.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            lazy_expirations: self.lazy_expirations.load(Ordering::Relaxed),
            storage_errors: self.storage_errors.load(Ordering::Relaxed),
            memory_evictions: self.memory_evictions.load(Ordering::Relaxed),
            compacted_records: self.compacted_records.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of cache counters at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    pub memory_hits: u64,
    pub durable_hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub failed_puts: u64,
    pub invalidations: u64,
    pub lazy_expirations: u64,
    pub storage_errors: u64,
    pub memory_evictions: u64,
    pub compacted_records: u64,
}

impl CacheStatsSnapshot {
    /// Hits from either tier.
    pub fn hits(&self) -> u64 {
        self.memory_hits + self.durable_hits
    }

    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }
}
