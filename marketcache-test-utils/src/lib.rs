//! marketcache Test Utilities
//!
//! Shared test infrastructure for the marketcache workspace:
//! - Proptest generators for collections, keys, payloads and TTLs
//! - Fixtures: temporary LMDB stores and ready-made coordinators on a manual clock
//! - A fault-injecting durable store for fail-open tests
//! - Custom assertions for cache-specific checks

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

// Re-export core types for convenience
pub use marketcache_core::{
    memory_key, CacheSettings, Clock, ManualClock, MarketCacheError, MarketCacheResult, Payload,
    StorageError, Timestamp, TtlMs,
};
pub use marketcache_storage::{
    CacheCoordinator, CollectionListing, DurableCacheTier, DurableStore, InMemoryDurableStore,
    LmdbDurableStore, MemoryTier, TtlEnvelope,
};

/// Install a `tracing` subscriber for tests, filtered by `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// FAULT INJECTION
// ============================================================================

/// Durable store wrapper whose operations can be made to fail on demand.
///
/// Faults are reported as [`StorageError::Unavailable`]. Counters record how
/// many calls reached the wrapper, failed or not.
#[derive(Debug)]
pub struct FaultyDurableStore<S> {
    inner: S,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_deletes: AtomicBool,
    fail_listings: AtomicBool,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl<S: DurableStore> FaultyDurableStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
            fail_listings: AtomicBool::new(false),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_listings(&self, fail: bool) {
        self.fail_listings.store(fail, Ordering::SeqCst);
    }

    /// Toggle every fault at once.
    pub fn fail_everything(&self, fail: bool) {
        self.fail_reads(fail);
        self.fail_writes(fail);
        self.fail_deletes(fail);
        self.fail_listings(fail);
    }

    pub fn read_calls(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn write_calls(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> u64 {
        self.deletes.load(Ordering::SeqCst)
    }

    fn check(flag: &AtomicBool, operation: &str) -> MarketCacheResult<()> {
        if flag.load(Ordering::SeqCst) {
            Err(StorageError::unavailable(operation, "injected fault").into())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl<S: DurableStore> DurableStore for FaultyDurableStore<S> {
    async fn read(&self, collection: &str, key: &str) -> MarketCacheResult<Option<TtlEnvelope>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Self::check(&self.fail_reads, "read")?;
        self.inner.read(collection, key).await
    }

    async fn write(
        &self,
        collection: &str,
        key: &str,
        envelope: &TtlEnvelope,
    ) -> MarketCacheResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Self::check(&self.fail_writes, "write")?;
        self.inner.write(collection, key, envelope).await
    }

    async fn delete(&self, collection: &str, key: &str) -> MarketCacheResult<bool> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Self::check(&self.fail_deletes, "delete")?;
        self.inner.delete(collection, key).await
    }

    async fn list_all(&self, collection: &str) -> MarketCacheResult<CollectionListing> {
        Self::check(&self.fail_listings, "list_all")?;
        self.inner.list_all(collection).await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for cache inputs.

    use super::*;
    use proptest::prelude::*;
    use serde_json::{Map, Value};

    /// A collection name drawn from the ones the service actually uses,
    /// plus arbitrary lowercase names.
    pub fn arb_collection() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("holders".to_string()),
            Just("trades".to_string()),
            Just("prices".to_string()),
            "[a-z]{1,12}",
        ]
    }

    /// A cache key: composite route parameters or free-form unicode.
    pub fn arb_key() -> impl Strategy<Value = String> {
        prop_oneof![
            ("[1-9A-HJ-NP-Za-km-z]{32,44}", 1u32..50, prop_oneof![Just(20u32), Just(50), Just(100)])
                .prop_map(|(token, page, limit)| format!("{token}_{page}_{limit}")),
            "\\PC{0,40}",
        ]
    }

    /// An arbitrary JSON payload (bounded depth).
    pub fn arb_payload() -> impl Strategy<Value = Payload> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            // Halves survive a JSON round trip exactly.
            (-2_000_000i64..2_000_000).prop_map(|n| Value::from(n as f64 / 2.0)),
            "\\PC{0,24}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                prop::collection::btree_map("[a-zA-Z_]{1,10}", inner, 0..6)
                    .prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>())),
            ]
        })
    }

    /// A positive TTL between 1 ms and one day.
    pub fn arb_ttl_ms() -> impl Strategy<Value = TtlMs> {
        1u64..86_400_000
    }

    /// A write timestamp between 2020 and 2030.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800000i64..1893456000000i64).prop_map(|ms| {
            chrono::DateTime::from_timestamp_millis(ms).unwrap_or_else(chrono::Utc::now)
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built stores and coordinators.

    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Memory tier TTL used by [`TestCache`].
    pub const TEST_MEMORY_TTL: Duration = Duration::from_secs(30);

    /// Memory tier capacity used by [`TestCache`].
    pub const TEST_MEMORY_MAX_ENTRIES: usize = 100;

    /// Settings pointing at `dir`, with a small map.
    pub fn test_settings(dir: &TempDir) -> CacheSettings {
        CacheSettings::development()
            .with_store_path(dir.path().join("lmdb"))
            .with_memory_ttl(TEST_MEMORY_TTL)
            .with_memory_max_entries(TEST_MEMORY_MAX_ENTRIES)
    }

    /// A fresh LMDB store in its own temporary directory.
    ///
    /// Keep the `TempDir` alive for as long as the store is used.
    pub fn temp_lmdb_store() -> (TempDir, LmdbDurableStore) {
        let dir = TempDir::new().expect("create temp dir");
        let store = LmdbDurableStore::open(dir.path().join("lmdb"), 16).expect("open lmdb");
        (dir, store)
    }

    /// A coordinator on a temporary LMDB store driven by a manual clock.
    pub struct TestCache {
        pub cache: CacheCoordinator<LmdbDurableStore>,
        pub clock: ManualClock,
        pub settings: CacheSettings,
        _dir: TempDir,
    }

    impl TestCache {
        pub fn new() -> Self {
            Self::with(|settings| settings)
        }

        /// Build with adjusted settings.
        pub fn with(adjust: impl FnOnce(CacheSettings) -> CacheSettings) -> Self {
            let dir = TempDir::new().expect("create temp dir");
            let settings = adjust(test_settings(&dir));
            let clock = ManualClock::starting_now();
            let cache = CacheCoordinator::open(&settings, Arc::new(clock.clone()))
                .expect("open test cache");
            Self {
                cache,
                clock,
                settings,
                _dir: dir,
            }
        }

        pub fn store(&self) -> &Arc<LmdbDurableStore> {
            self.cache.durable().store()
        }
    }

    impl Default for TestCache {
        fn default() -> Self {
            Self::new()
        }
    }

    /// A coordinator over a fault-injecting in-memory store.
    pub fn faulty_cache() -> (
        CacheCoordinator<FaultyDurableStore<InMemoryDurableStore>>,
        Arc<FaultyDurableStore<InMemoryDurableStore>>,
        ManualClock,
    ) {
        let clock = ManualClock::starting_now();
        let handle: Arc<dyn Clock> = Arc::new(clock.clone());
        let store = Arc::new(FaultyDurableStore::new(InMemoryDurableStore::new()));
        let memory = MemoryTier::new(Arc::clone(&handle), TEST_MEMORY_TTL, TEST_MEMORY_MAX_ENTRIES);
        let cache = CacheCoordinator::new(Arc::clone(&store), memory, handle);
        (cache, store, clock)
    }

    /// Payload shaped like a holders page response.
    pub fn holders_page(token: &str, page: u32, holders: &[&str]) -> Payload {
        serde_json::json!({
            "token": token,
            "page": page,
            "holders": holders,
        })
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for cache-specific validation.

    use super::*;

    /// Assert that a MarketCacheResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &MarketCacheResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that a MarketCacheResult is a MalformedRecord storage error.
    #[track_caller]
    pub fn assert_malformed<T: std::fmt::Debug>(result: &MarketCacheResult<T>) {
        match result {
            Err(MarketCacheError::Storage(e)) if e.is_malformed() => {}
            other => panic!("Expected MalformedRecord error, got: {:?}", other),
        }
    }

    /// Assert that a MarketCacheResult is a Config error.
    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &MarketCacheResult<T>) {
        match result {
            Err(MarketCacheError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    /// Assert that a read hit with the expected payload.
    #[track_caller]
    pub fn assert_hit(read: &Option<Payload>, expected: &Payload) {
        match read {
            Some(payload) => assert_eq!(payload, expected, "Cache hit with wrong payload"),
            None => panic!("Expected cache hit with {expected}, got miss"),
        }
    }

    /// Assert that a read missed.
    #[track_caller]
    pub fn assert_miss(read: &Option<Payload>) {
        if let Some(payload) = read {
            panic!("Expected cache miss, got hit with {payload}");
        }
    }
}
