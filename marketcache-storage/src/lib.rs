//! marketcache Storage - Durable Store, Cache Tiers and Coordinator
//!
//! Persistence and caching for the market cache. Shared types (errors,
//! settings, the clock) live in `marketcache-core`.

pub mod cache;

// Re-export cache types for service integration
pub use cache::{
    BackgroundJobs, CacheCoordinator, CacheStats, CacheStatsSnapshot, CollectionKey,
    CollectionListing, CompactionReport, DurableCacheTier, DurableStore, InMemoryDurableStore,
    LmdbDurableStore, LmdbStoreError, MemoryTier, TtlEnvelope, UpstreamFetcher,
};

pub use marketcache_core::{
    composite_key, memory_key, system_clock, CacheSettings, Clock, ManualClock, MarketCacheError,
    MarketCacheResult, Payload, SystemClock, TtlMs,
};
