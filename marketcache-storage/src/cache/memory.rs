//! Process-local memory tier.
//!
//! A bounded map of hot payloads keyed by flat strings (`collection:key`,
//! see [`marketcache_core::memory_key`]). Entries carry the time they were
//! set and are fresh for a fixed window that is independent of durable TTLs.
//! They also carry the time their payload was first written, which caller
//! TTLs are measured against; the two differ only for backfilled records.
//!
//! Reads never delete. Size is controlled only by
//! [`MemoryTier::evict_if_over_capacity`], which the eviction job calls
//! periodically: when the tier holds more than `max_entries`, the oldest
//! `eviction_fraction` of entries are dropped, fresh or not.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use marketcache_core::{CacheSettings, Clock, Payload, Timestamp};

use super::stats::CacheStats;

#[derive(Debug, Clone)]
struct MemoryEntry {
    payload: Payload,
    /// When the entry was set. Drives the tier TTL and eviction order.
    timestamp: Timestamp,
    written_at: Timestamp,
}

/// Bounded in-memory cache with a fixed freshness window.
#[derive(Debug)]
pub struct MemoryTier {
    entries: RwLock<HashMap<String, MemoryEntry>>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    max_entries: usize,
    eviction_fraction: f64,
    stats: Arc<CacheStats>,
}

impl MemoryTier {
    /// Create a tier with the given freshness window and capacity.
    ///
    /// The eviction fraction defaults to the configured default (20%).
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
            ttl,
            max_entries,
            eviction_fraction: marketcache_core::config::DEFAULT_EVICTION_FRACTION,
            stats: Arc::new(CacheStats::new()),
        }
    }

    /// Create a tier from settings.
    pub fn from_settings(settings: &CacheSettings, clock: Arc<dyn Clock>) -> Self {
        Self::new(clock, settings.memory_ttl, settings.memory_max_entries)
            .with_eviction_fraction(settings.eviction_fraction)
    }

    /// Set the share of entries removed by one eviction pass, clamped to `(0, 1]`.
    pub fn with_eviction_fraction(mut self, fraction: f64) -> Self {
        self.eviction_fraction = if fraction.is_finite() && fraction > 0.0 {
            fraction.min(1.0)
        } else {
            marketcache_core::config::DEFAULT_EVICTION_FRACTION
        };
        self
    }

    /// Record eviction counts into a shared stats instance.
    pub fn with_stats(mut self, stats: Arc<CacheStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Payload for `key` if it was set less than the tier TTL ago.
    pub fn get(&self, key: &str) -> Option<Payload> {
        self.get_within(key, Duration::MAX)
    }

    /// Payload for `key` if it was set less than the tier TTL ago and written
    /// less than `max_age` ago.
    ///
    /// A stale entry is reported absent but stays in the map.
    pub fn get_within(&self, key: &str, max_age: Duration) -> Option<Payload> {
        let entries = self.read_entries();
        let entry = entries.get(key)?;

        if self.clock.elapsed_since(entry.timestamp) < self.ttl
            && self.clock.elapsed_since(entry.written_at) < max_age
        {
            Some(entry.payload.clone())
        } else {
            None
        }
    }

    /// Store `payload` under `key`, stamped with the current time.
    pub fn set(&self, key: impl Into<String>, payload: Payload) {
        self.set_at(key, payload, self.clock.now());
    }

    /// Store `payload` under `key` for a payload first written at `written_at`.
    ///
    /// The tier TTL still starts now; `max_age` checks in
    /// [`get_within`](Self::get_within) count from `written_at`. Used when
    /// copying a durable record into memory.
    pub fn set_at(&self, key: impl Into<String>, payload: Payload, written_at: Timestamp) {
        let entry = MemoryEntry {
            payload,
            timestamp: self.clock.now(),
            written_at,
        };
        self.write_entries().insert(key.into(), entry);
    }

    /// Remove `key`. Returns whether an entry existed.
    pub fn remove(&self, key: &str) -> bool {
        self.write_entries().remove(key).is_some()
    }

    /// Number of entries, fresh or stale.
    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.write_entries().clear();
    }

    /// Run one capacity eviction pass.
    ///
    /// Does nothing unless the entry count exceeds `max_entries`. Otherwise
    /// removes `ceil(len * eviction_fraction)` entries in ascending timestamp
    /// order (ties broken by key). Returns the number removed.
    pub fn evict_if_over_capacity(&self) -> usize {
        let mut entries = self.write_entries();
        let len = entries.len();
        if len <= self.max_entries {
            return 0;
        }

        let to_remove = ((len as f64) * self.eviction_fraction).ceil() as usize;
        let to_remove = to_remove.clamp(1, len);

        let mut by_age: Vec<(Timestamp, String)> = entries
            .iter()
            .map(|(key, entry)| (entry.timestamp, key.clone()))
            .collect();
        by_age.sort_unstable();

        for (_, key) in by_age.into_iter().take(to_remove) {
            entries.remove(&key);
        }
        drop(entries);

        CacheStats::add(&self.stats.memory_evictions, to_remove as u64);
        to_remove
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, HashMap<String, MemoryEntry>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, HashMap<String, MemoryEntry>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}
