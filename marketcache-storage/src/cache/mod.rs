//! Layered TTL cache for market data.
//!
//! Payloads fetched from slow or rate-limited upstreams are kept in two tiers:
//!
//! - a **durable tier** ([`DurableCacheTier`] over a [`DurableStore`], LMDB in
//!   production) that survives restarts and is shared by every process
//!   pointing at the same store, and
//! - a **memory tier** ([`MemoryTier`]) that keeps hot keys close with a short,
//!   fixed freshness window and a capacity bound.
//!
//! [`CacheCoordinator`] is the entry point. Every read names the TTL the
//! caller is willing to accept, so two call sites may read the same record
//! with different durations:
//!
//! ```ignore
//! let cache = CacheCoordinator::open(&settings, system_clock())?;
//! if cache.get("prices", "sol", 10_000).await.is_none() {
//!     let price = upstream.price("sol").await?;
//!     cache.put("prices", "sol", price, 10_000).await;
//! }
//! ```
//!
//! # Failure Model
//!
//! The cache fails open. Storage faults and corrupt records are logged and
//! surface as misses (`None`) or failed writes (`false`), never as errors.
//! Worst case is a cold cache.
//!
//! # Expiration
//!
//! Durable records expire lazily: the read that finds a record stale deletes
//! it. The memory tier never deletes on read; its size is bounded by the
//! eviction job. Both background jobs live in [`jobs`].

pub mod coordinator;
pub mod durable;
pub mod envelope;
pub mod jobs;
pub mod key;
pub mod lmdb_backend;
pub mod memory;
pub mod stats;
pub mod tier;

pub use coordinator::{CacheCoordinator, UpstreamFetcher};
pub use durable::{CollectionListing, DurableStore, InMemoryDurableStore};
pub use envelope::TtlEnvelope;
pub use jobs::{
    compaction_task, memory_eviction_task, BackgroundJobs, CompactionMetrics, CompactionSnapshot,
    EvictionMetrics, EvictionSnapshot,
};
pub use key::CollectionKey;
pub use lmdb_backend::{LmdbDurableStore, LmdbStoreError};
pub use memory::MemoryTier;
pub use stats::{CacheStats, CacheStatsSnapshot};
pub use tier::{CompactionReport, DurableCacheTier};
