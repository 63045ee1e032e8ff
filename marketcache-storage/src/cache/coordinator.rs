//! Cache coordinator.
//!
//! The facade callers use. Reads try the memory tier, then the durable tier,
//! then report a miss; durable hits are copied back into memory. Writes go to
//! the durable tier first and reach memory only if the durable write
//! succeeded.
//!
//! Nothing here returns an error. A broken store degrades to a cold cache.
//!
//! # Example
//!
//! ```ignore
//! let cache = CacheCoordinator::open(&CacheSettings::from_env(), system_clock())?;
//!
//! let key = composite_key(&[token_id, "page", "1"]);
//! match cache.get("holders", &key, 30_000).await {
//!     Some(payload) => respond(payload),
//!     None => {
//!         let fresh = upstream.holders(token_id).await?;
//!         cache.put("holders", &key, fresh.clone(), 30_000).await;
//!         respond(fresh)
//!     }
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use marketcache_core::{memory_key, CacheSettings, Clock, MarketCacheResult, Payload, TtlMs};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;

use super::durable::DurableStore;
use super::jobs::{compaction_task, memory_eviction_task, BackgroundJobs};
use super::lmdb_backend::LmdbDurableStore;
use super::memory::MemoryTier;
use super::stats::{CacheStats, CacheStatsSnapshot};
use super::tier::DurableCacheTier;

/// Source of fresh payloads for [`CacheCoordinator::get_or_fetch`].
#[async_trait]
pub trait UpstreamFetcher: Send + Sync {
    /// Fetch the value for `(collection, key)` from the system of record.
    ///
    /// `Ok(None)` means the upstream has nothing for this key; it is not cached.
    async fn fetch(&self, collection: &str, key: &str) -> MarketCacheResult<Option<Payload>>;
}

/// Two-tier cache: process-local memory in front of a durable store.
pub struct CacheCoordinator<S: DurableStore> {
    durable: DurableCacheTier<S>,
    memory: Arc<MemoryTier>,
    stats: Arc<CacheStats>,
}

impl<S: DurableStore> CacheCoordinator<S> {
    /// Assemble a coordinator from a store and a memory tier.
    ///
    /// Both tiers are rewired to record into one shared [`CacheStats`].
    pub fn new(store: Arc<S>, memory: MemoryTier, clock: Arc<dyn Clock>) -> Self {
        let stats = Arc::new(CacheStats::new());
        Self {
            durable: DurableCacheTier::new(store, clock).with_stats(Arc::clone(&stats)),
            memory: Arc::new(memory.with_stats(Arc::clone(&stats))),
            stats,
        }
    }

    /// Build the memory tier from `settings` and put it in front of `store`.
    pub fn with_settings(store: Arc<S>, settings: &CacheSettings, clock: Arc<dyn Clock>) -> Self {
        let memory = MemoryTier::from_settings(settings, Arc::clone(&clock));
        Self::new(store, memory, clock)
    }

    /// Fresh payload for `(collection, key)` under `ttl_ms`, or `None`.
    ///
    /// The memory tier answers only while its entry is younger than its own
    /// TTL and the payload was written less than `ttl_ms` ago. Backfilled
    /// entries keep the durable record's write time.
    pub async fn get(&self, collection: &str, key: &str, ttl_ms: TtlMs) -> Option<Payload> {
        let flat = memory_key(collection, key);

        if let Some(payload) = self.memory.get_within(&flat, Duration::from_millis(ttl_ms)) {
            CacheStats::incr(&self.stats.memory_hits);
            tracing::debug!(collection, key, "Memory cache hit");
            return Some(payload);
        }

        let envelope = self.durable.get_envelope(collection, key, ttl_ms).await?;
        tracing::debug!(collection, key, "Durable cache hit, backfilling memory");
        let written_at = envelope.written_at();
        let payload = envelope.into_payload();
        if let Some(written_at) = written_at {
            self.memory.set_at(flat, payload.clone(), written_at);
        }
        Some(payload)
    }

    /// Durable-only read. Skips the memory tier and does not backfill it.
    pub async fn get_durable(&self, collection: &str, key: &str, ttl_ms: TtlMs) -> Option<Payload> {
        self.durable.get(collection, key, ttl_ms).await
    }

    /// Write through both tiers.
    ///
    /// Returns the durable result. The memory tier is updated only when the
    /// durable write succeeded.
    pub async fn put(&self, collection: &str, key: &str, payload: Payload, ttl_ms: TtlMs) -> bool {
        let mirrored = payload.clone();
        if !self.durable.put(collection, key, payload, ttl_ms).await {
            return false;
        }
        self.memory.set(memory_key(collection, key), mirrored);
        true
    }

    /// Remove `(collection, key)` from both tiers. Returns the durable result.
    ///
    /// The durable record goes first, so a read racing the delete cannot
    /// backfill memory after it has been cleared.
    pub async fn invalidate(&self, collection: &str, key: &str) -> bool {
        let removed = self.durable.invalidate(collection, key).await;
        self.memory.remove(&memory_key(collection, key));
        removed
    }

    /// Cached payload if fresh, otherwise ask `fetcher` and cache its answer.
    ///
    /// Fetch errors are logged and reported as `None`. Concurrent misses for
    /// the same key each call the fetcher.
    pub async fn get_or_fetch<F>(
        &self,
        collection: &str,
        key: &str,
        ttl_ms: TtlMs,
        fetcher: &F,
    ) -> Option<Payload>
    where
        F: UpstreamFetcher + ?Sized,
    {
        if let Some(payload) = self.get(collection, key, ttl_ms).await {
            return Some(payload);
        }

        match fetcher.fetch(collection, key).await {
            Ok(Some(payload)) => {
                if !self.put(collection, key, payload.clone(), ttl_ms).await {
                    tracing::debug!(collection, key, "Fetched value was not cached");
                }
                Some(payload)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(collection, key, error = %e, "Upstream fetch failed");
                None
            }
        }
    }

    /// Typed [`get`](Self::get). A payload that does not deserialize into `T`
    /// is reported as `None`.
    pub async fn get_as<T: DeserializeOwned>(
        &self,
        collection: &str,
        key: &str,
        ttl_ms: TtlMs,
    ) -> Option<T> {
        let payload = self.get(collection, key, ttl_ms).await?;
        match serde_json::from_value(payload) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(collection, key, error = %e, "Cached payload has unexpected shape");
                None
            }
        }
    }

    /// Typed [`put`](Self::put). Returns `false` if `value` does not serialize.
    pub async fn put_as<T: Serialize + ?Sized>(
        &self,
        collection: &str,
        key: &str,
        value: &T,
        ttl_ms: TtlMs,
    ) -> bool {
        match serde_json::to_value(value) {
            Ok(payload) => self.put(collection, key, payload, ttl_ms).await,
            Err(e) => {
                tracing::warn!(collection, key, error = %e, "Failed to serialize cache payload");
                false
            }
        }
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn memory(&self) -> &Arc<MemoryTier> {
        &self.memory
    }

    pub fn durable(&self) -> &DurableCacheTier<S> {
        &self.durable
    }
}

impl<S: DurableStore + 'static> CacheCoordinator<S> {
    /// Spawn the memory eviction task and, when configured, durable compaction.
    ///
    /// Both tasks stop when `shutdown_rx` observes `true` or its sender is dropped.
    pub fn spawn_background_jobs(
        &self,
        settings: &CacheSettings,
        shutdown_rx: watch::Receiver<bool>,
    ) -> BackgroundJobs {
        let eviction = tokio::spawn(memory_eviction_task(
            Arc::clone(&self.memory),
            settings.eviction_interval,
            shutdown_rx.clone(),
        ));

        let compaction = match settings.compaction_interval {
            Some(interval) if !settings.compaction_collections.is_empty() => {
                Some(tokio::spawn(compaction_task(
                    self.durable.clone(),
                    settings.compaction_collections.clone(),
                    interval,
                    shutdown_rx,
                )))
            }
            _ => None,
        };

        BackgroundJobs::new(eviction, compaction)
    }
}

impl CacheCoordinator<LmdbDurableStore> {
    /// Validate `settings`, open the LMDB store and build a coordinator on it.
    pub fn open(settings: &CacheSettings, clock: Arc<dyn Clock>) -> MarketCacheResult<Self> {
        settings.validate()?;
        let store = LmdbDurableStore::from_settings(settings)?;
        Ok(Self::with_settings(Arc::new(store), settings, clock))
    }
}

impl<S: DurableStore> Clone for CacheCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            durable: self.durable.clone(),
            memory: Arc::clone(&self.memory),
            stats: Arc::clone(&self.stats),
        }
    }
}
