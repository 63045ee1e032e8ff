//! Durable cache tier.
//!
//! Applies TTL envelopes on top of a [`DurableStore`] and fails open: every
//! storage fault is logged and turned into a miss (`None`) or a failed write
//! (`false`). Nothing in this module returns an error to its caller.
//!
//! Expiration is lazy. A read that finds a stale record deletes it before
//! reporting the miss; there is no sweep on the hot path. [`DurableCacheTier::compact`]
//! exists for optional background cleanup only.

use std::sync::Arc;

use marketcache_core::{Clock, MarketCacheError, Payload, TtlMs};

use super::durable::DurableStore;
use super::envelope::TtlEnvelope;
use super::stats::CacheStats;

/// Outcome of one compaction pass over a collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionReport {
    /// Records examined.
    pub scanned: u64,
    /// Stale or undecodable records deleted.
    pub removed: u64,
}

/// TTL-aware, fail-open view of a durable store.
pub struct DurableCacheTier<S: DurableStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    stats: Arc<CacheStats>,
}

impl<S: DurableStore> DurableCacheTier<S> {
    /// Create a tier over `store` using `clock` for freshness.
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            stats: Arc::new(CacheStats::new()),
        }
    }

    /// Record counters into a shared stats instance.
    pub fn with_stats(mut self, stats: Arc<CacheStats>) -> Self {
        self.stats = stats;
        self
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The clock used for freshness decisions.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// The counters this tier records into.
    pub fn stats(&self) -> &Arc<CacheStats> {
        &self.stats
    }

    /// Wrap `payload` in an envelope and persist it.
    ///
    /// Returns `false` if the store rejected the write.
    pub async fn put(&self, collection: &str, key: &str, payload: Payload, ttl_ms: TtlMs) -> bool {
        let envelope = TtlEnvelope::wrap(payload, ttl_ms, self.clock.as_ref());

        match self.store.write(collection, key, &envelope).await {
            Ok(()) => {
                CacheStats::incr(&self.stats.puts);
                true
            }
            Err(e) => {
                CacheStats::incr(&self.stats.failed_puts);
                CacheStats::incr(&self.stats.storage_errors);
                tracing::warn!(collection, key, error = %e, "Durable cache write failed");
                false
            }
        }
    }

    /// Read a payload that is fresh under `ttl_ms`.
    ///
    /// `ttl_ms` is the reader's duration and overrides the one stored with
    /// the record. A stale record is deleted before `None` is returned.
    pub async fn get(&self, collection: &str, key: &str, ttl_ms: TtlMs) -> Option<Payload> {
        self.get_envelope(collection, key, ttl_ms)
            .await
            .map(TtlEnvelope::into_payload)
    }

    /// Like [`get`](Self::get), but keeps the envelope so callers can see
    /// when the record was written.
    ///
    /// A returned envelope always carries `writtenAt`.
    pub async fn get_envelope(
        &self,
        collection: &str,
        key: &str,
        ttl_ms: TtlMs,
    ) -> Option<TtlEnvelope> {
        let envelope = match self.store.read(collection, key).await {
            Ok(Some(envelope)) => envelope,
            Ok(None) => {
                CacheStats::incr(&self.stats.misses);
                tracing::trace!(collection, key, "Durable cache miss");
                return None;
            }
            Err(e) => {
                self.record_read_fault(collection, key, &e).await;
                CacheStats::incr(&self.stats.misses);
                return None;
            }
        };

        if envelope.is_expired(Some(ttl_ms), self.clock.as_ref()) {
            tracing::debug!(
                collection,
                key,
                ttl_ms,
                age_ms = envelope.age(self.clock.as_ref()).map(|a| a.as_millis() as u64),
                "Durable record expired, removing"
            );
            self.remove_quietly(collection, key).await;
            CacheStats::incr(&self.stats.lazy_expirations);
            CacheStats::incr(&self.stats.misses);
            return None;
        }

        CacheStats::incr(&self.stats.durable_hits);
        Some(envelope)
    }

    /// Delete the record regardless of freshness.
    ///
    /// Deleting a missing record succeeds. Returns `false` only on a storage fault.
    pub async fn invalidate(&self, collection: &str, key: &str) -> bool {
        CacheStats::incr(&self.stats.invalidations);
        match self.store.delete(collection, key).await {
            Ok(_) => true,
            Err(e) => {
                CacheStats::incr(&self.stats.storage_errors);
                tracing::warn!(collection, key, error = %e, "Durable cache invalidation failed");
                false
            }
        }
    }

    /// Delete every record in `collection` that is stale under its own stored
    /// TTL, or that does not decode.
    pub async fn compact(&self, collection: &str) -> CompactionReport {
        let listing = match self.store.list_all(collection).await {
            Ok(listing) => listing,
            Err(e) => {
                CacheStats::incr(&self.stats.storage_errors);
                tracing::warn!(collection, error = %e, "Compaction listing failed");
                return CompactionReport::default();
            }
        };

        let mut report = CompactionReport::default();
        for (key, envelope) in listing {
            report.scanned += 1;
            let stale = envelope
                .as_ref()
                .map_or(true, |env| env.is_expired(None, self.clock.as_ref()));
            if !stale {
                continue;
            }
            match self.store.delete(collection, &key).await {
                Ok(true) => report.removed += 1,
                // Someone else removed it first.
                Ok(false) => {}
                Err(e) => {
                    CacheStats::incr(&self.stats.storage_errors);
                    tracing::warn!(collection, key = %key, error = %e, "Compaction delete failed");
                }
            }
        }

        CacheStats::add(&self.stats.compacted_records, report.removed);
        report
    }

    async fn record_read_fault(&self, collection: &str, key: &str, error: &MarketCacheError) {
        CacheStats::incr(&self.stats.storage_errors);

        let malformed = matches!(error, MarketCacheError::Storage(e) if e.is_malformed());
        if malformed {
            tracing::warn!(collection, key, error = %error, "Malformed durable record, treating as expired");
            self.remove_quietly(collection, key).await;
        } else {
            tracing::warn!(collection, key, error = %error, "Durable cache read failed, treating as miss");
        }
    }

    async fn remove_quietly(&self, collection: &str, key: &str) {
        if let Err(e) = self.store.delete(collection, key).await {
            CacheStats::incr(&self.stats.storage_errors);
            tracing::warn!(collection, key, error = %e, "Failed to remove durable record");
        }
    }
}

impl<S: DurableStore> Clone for DurableCacheTier<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            stats: Arc::clone(&self.stats),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::durable::{CollectionListing, InMemoryDurableStore};
    use async_trait::async_trait;
    use marketcache_core::{ManualClock, MarketCacheResult, StorageError};
    use serde_json::json;

    fn tier() -> (DurableCacheTier<InMemoryDurableStore>, ManualClock) {
        let clock = ManualClock::starting_now();
        let store = Arc::new(InMemoryDurableStore::new());
        (DurableCacheTier::new(store, Arc::new(clock.clone())), clock)
    }

    /// Store whose every operation fails.
    struct BrokenStore;

    #[async_trait]
    impl DurableStore for BrokenStore {
        async fn read(&self, _: &str, _: &str) -> MarketCacheResult<Option<TtlEnvelope>> {
            Err(StorageError::unavailable("read", "disk on fire").into())
        }

        async fn write(&self, _: &str, _: &str, _: &TtlEnvelope) -> MarketCacheResult<()> {
            Err(StorageError::unavailable("write", "disk on fire").into())
        }

        async fn delete(&self, _: &str, _: &str) -> MarketCacheResult<bool> {
            Err(StorageError::unavailable("delete", "disk on fire").into())
        }

        async fn list_all(&self, _: &str) -> MarketCacheResult<CollectionListing> {
            Err(StorageError::unavailable("list", "disk on fire").into())
        }
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let (tier, _clock) = tier();
        assert!(tier.put("holders", "token_a", json!({"count": 10}), 30_000).await);
        assert_eq!(tier.get("holders", "token_a", 30_000).await, Some(json!({"count": 10})));
    }

    #[tokio::test]
    async fn test_expired_record_is_deleted_on_read() {
        let (tier, clock) = tier();
        assert!(tier.put("prices", "sol", json!(150.0), 50).await);

        clock.advance_ms(60);
        assert_eq!(tier.get("prices", "sol", 50).await, None);
        assert!(tier.store().is_empty(), "stale record should be removed");
        assert_eq!(tier.get("prices", "sol", 50).await, None);

        let snap = tier.stats().snapshot();
        assert_eq!(snap.lazy_expirations, 1);
        assert_eq!(snap.misses, 2);
    }

    #[tokio::test]
    async fn test_reader_ttl_overrides_writer_ttl() {
        let (tier, clock) = tier();
        assert!(tier.put("holders", "k", json!("v"), 100_000).await);

        clock.advance_ms(20);
        assert_eq!(tier.get("holders", "k", 10).await, None);
        // The shorter read removed the record for everyone.
        assert_eq!(tier.get("holders", "k", 100_000).await, None);
    }

    #[tokio::test]
    async fn test_longer_reader_ttl_keeps_record_alive() {
        let (tier, clock) = tier();
        assert!(tier.put("holders", "k", json!("v"), 10).await);

        clock.advance_ms(20);
        assert_eq!(tier.get("holders", "k", 120_000).await, Some(json!("v")));
    }

    #[tokio::test]
    async fn test_invalidate_is_idempotent() {
        let (tier, _clock) = tier();
        assert!(tier.invalidate("trades", "absent").await);
        assert!(tier.invalidate("trades", "absent").await);

        assert!(tier.put("trades", "k", json!(1), 1000).await);
        assert!(tier.invalidate("trades", "k").await);
        assert_eq!(tier.get("trades", "k", 1000).await, None);
    }

    #[tokio::test]
    async fn test_malformed_record_is_a_miss_and_removed() {
        let (tier, _clock) = tier();
        tier.store().write_raw("trades", "bad", b"}{".to_vec()).unwrap();

        assert_eq!(tier.get("trades", "bad", 1000).await, None);
        assert!(tier.store().is_empty());
        assert_eq!(tier.stats().snapshot().storage_errors, 1);
    }

    #[tokio::test]
    async fn test_missing_written_at_is_a_miss() {
        let (tier, _clock) = tier();
        tier.store()
            .write_raw("trades", "old", br#"{"payload": 1, "ttlMs": 99999999}"#.to_vec())
            .unwrap();

        assert_eq!(tier.get("trades", "old", 99_999_999).await, None);
        assert!(tier.store().is_empty());
    }

    #[tokio::test]
    async fn test_broken_store_fails_open() {
        let tier = DurableCacheTier::new(Arc::new(BrokenStore), Arc::new(ManualClock::starting_now()));

        assert!(!tier.put("holders", "k", json!(1), 1000).await);
        assert_eq!(tier.get("holders", "k", 1000).await, None);
        assert!(!tier.invalidate("holders", "k").await);
        assert_eq!(tier.compact("holders").await, CompactionReport::default());

        let snap = tier.stats().snapshot();
        assert_eq!(snap.failed_puts, 1);
        assert!(snap.storage_errors >= 4);
    }

    #[tokio::test]
    async fn test_compact_removes_stale_and_corrupt_records() {
        let (tier, clock) = tier();
        assert!(tier.put("holders", "short", json!(1), 10).await);
        assert!(tier.put("holders", "long", json!(2), 60_000).await);
        assert!(tier.put("prices", "short", json!(3), 10).await);
        tier.store().write_raw("holders", "corrupt", b"xx".to_vec()).unwrap();

        clock.advance_ms(100);
        let report = tier.compact("holders").await;

        assert_eq!(report, CompactionReport { scanned: 3, removed: 2 });
        assert_eq!(tier.get("holders", "long", 60_000).await, Some(json!(2)));
        // Other collections are untouched.
        assert_eq!(tier.store().len(), 2);
        assert_eq!(tier.stats().snapshot().compacted_records, 2);
    }
}
