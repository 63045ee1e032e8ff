//! Fail-Open Behavior
//!
//! Storage faults must never reach callers: reads degrade to misses and
//! writes report `false`. These tests drive the coordinator over a store
//! whose operations fail on demand.

use marketcache_core::MarketCacheResult;
use marketcache_storage::{Payload, UpstreamFetcher};
use marketcache_test_utils::assertions::{assert_hit, assert_miss};
use marketcache_test_utils::fixtures::{faulty_cache, TEST_MEMORY_TTL};
use marketcache_test_utils::init_test_tracing;
use serde_json::json;

struct StaticFetcher(Payload);

#[async_trait::async_trait]
impl UpstreamFetcher for StaticFetcher {
    async fn fetch(&self, _: &str, _: &str) -> MarketCacheResult<Option<Payload>> {
        Ok(Some(self.0.clone()))
    }
}

#[tokio::test]
async fn test_failed_write_returns_false_and_skips_memory() {
    init_test_tracing();
    let (cache, store, _clock) = faulty_cache();
    store.fail_writes(true);

    assert!(!cache.put("holders", "k", json!(1), 60_000).await);
    assert!(cache.memory().is_empty());

    let stats = cache.stats();
    assert_eq!(stats.failed_puts, 1);
    assert_eq!(stats.storage_errors, 1);
}

#[tokio::test]
async fn test_failed_read_is_a_miss() {
    let (cache, store, clock) = faulty_cache();
    assert!(cache.put("holders", "k", json!(1), 600_000).await);

    // Push the memory entry out of its window so the read reaches the store.
    clock.advance(TEST_MEMORY_TTL);
    store.fail_reads(true);
    assert_miss(&cache.get("holders", "k", 600_000).await);

    store.fail_reads(false);
    assert_hit(&cache.get("holders", "k", 600_000).await, &json!(1));
}

#[tokio::test]
async fn test_failed_read_does_not_delete() {
    let (cache, store, clock) = faulty_cache();
    assert!(cache.put("trades", "k", json!("v"), 600_000).await);
    clock.advance(TEST_MEMORY_TTL);

    store.fail_reads(true);
    assert_miss(&cache.get_durable("trades", "k", 600_000).await);
    assert_eq!(store.delete_calls(), 0);
    assert_eq!(store.inner().len(), 1);
}

#[tokio::test]
async fn test_memory_still_serves_while_store_is_down() {
    let (cache, store, _clock) = faulty_cache();
    assert!(cache.put("prices", "sol", json!(150), 60_000).await);

    store.fail_everything(true);
    assert_hit(&cache.get("prices", "sol", 60_000).await, &json!(150));
    assert_eq!(store.read_calls(), 0);
}

#[tokio::test]
async fn test_failed_invalidate_returns_false_but_clears_memory() {
    let (cache, store, _clock) = faulty_cache();
    assert!(cache.put("holders", "k", json!(1), 60_000).await);

    store.fail_deletes(true);
    assert!(!cache.invalidate("holders", "k").await);
    assert!(cache.memory().get("holders:k").is_none());
}

#[tokio::test]
async fn test_failed_lazy_delete_still_misses() {
    let (cache, store, clock) = faulty_cache();
    assert!(cache.put("prices", "sol", json!(1), 50).await);
    clock.advance_ms(60);

    store.fail_deletes(true);
    assert_miss(&cache.get("prices", "sol", 50).await);
    assert_eq!(store.inner().len(), 1);

    // Once the store recovers the next read cleans up.
    store.fail_deletes(false);
    assert_miss(&cache.get("prices", "sol", 50).await);
    assert!(store.inner().is_empty());
}

#[tokio::test]
async fn test_get_or_fetch_returns_value_even_if_caching_fails() {
    let (cache, store, _clock) = faulty_cache();
    store.fail_everything(true);

    let fetched = cache
        .get_or_fetch("holders", "tok", 60_000, &StaticFetcher(json!({"n": 3})))
        .await;
    assert_eq!(fetched, Some(json!({"n": 3})));
    assert!(cache.memory().is_empty());
}

#[tokio::test]
async fn test_compaction_survives_listing_failure() {
    let (cache, store, _clock) = faulty_cache();
    store.fail_listings(true);

    let report = cache.durable().compact("holders").await;
    assert_eq!(report.scanned, 0);
    assert_eq!(cache.stats().storage_errors, 1);
}
