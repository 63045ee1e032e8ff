//! Durable store trait and an in-memory implementation.
//!
//! The durable store is the system of record for cached payloads. It holds at
//! most one record per `(collection, key)`, and writes overwrite. It knows
//! nothing about freshness: it stores and returns [`TtlEnvelope`]s as-is.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use marketcache_core::{MarketCacheResult, StorageError};

use super::envelope::TtlEnvelope;

/// Records of one collection as returned by [`DurableStore::list_all`].
///
/// A `None` value marks a record that exists but could not be decoded.
pub type CollectionListing = BTreeMap<String, Option<TtlEnvelope>>;

/// Collection-keyed persistence for TTL envelopes.
///
/// Implementations must be safe to share across tasks. Errors are reported
/// as `Err`; the durable cache tier is responsible for logging them and
/// failing open, so implementations should not swallow errors themselves.
///
/// # Errors
///
/// - [`StorageError::Unavailable`] when the medium cannot be read or written
/// - [`StorageError::MalformedRecord`] from `read` when stored bytes do not
///   decode to an envelope
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Read the envelope stored for `(collection, key)`.
    async fn read(&self, collection: &str, key: &str) -> MarketCacheResult<Option<TtlEnvelope>>;

    /// Store `envelope`, replacing any existing record.
    ///
    /// The envelope is fully serialized before anything is written, so a
    /// failed write never leaves a partial record behind.
    async fn write(&self, collection: &str, key: &str, envelope: &TtlEnvelope)
        -> MarketCacheResult<()>;

    /// Delete the record. Returns whether a record existed.
    ///
    /// Deleting a missing key is not an error.
    async fn delete(&self, collection: &str, key: &str) -> MarketCacheResult<bool>;

    /// Enumerate every record of a collection.
    ///
    /// Intended for maintenance (compaction, inspection), never the read path.
    async fn list_all(&self, collection: &str) -> MarketCacheResult<CollectionListing>;
}

fn encode_envelope(envelope: &TtlEnvelope) -> Result<Vec<u8>, StorageError> {
    envelope
        .encode()
        .map_err(|e| StorageError::unavailable("serialize", e))
}

/// Process-local durable store backed by a `HashMap`.
///
/// Records are kept in their serialized form so that decoding behaves exactly
/// like a persistent backend. Useful for tests and single-process deployments
/// that do not need persistence across restarts.
#[derive(Debug, Default)]
pub struct InMemoryDurableStore {
    collections: RwLock<HashMap<String, HashMap<String, Vec<u8>>>>,
}

impl InMemoryDurableStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store raw bytes under `(collection, key)` without encoding them.
    pub fn write_raw(&self, collection: &str, key: &str, bytes: Vec<u8>) -> MarketCacheResult<()> {
        let mut collections = self
            .collections
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), bytes);
        Ok(())
    }

    /// Total number of records across all collections.
    pub fn len(&self) -> usize {
        self.collections
            .read()
            .map(|c| c.values().map(HashMap::len).sum())
            .unwrap_or(0)
    }

    /// Returns true if no records are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DurableStore for InMemoryDurableStore {
    async fn read(&self, collection: &str, key: &str) -> MarketCacheResult<Option<TtlEnvelope>> {
        let collections = self
            .collections
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;

        let Some(bytes) = collections.get(collection).and_then(|c| c.get(key)) else {
            return Ok(None);
        };

        TtlEnvelope::decode(bytes)
            .map(Some)
            .map_err(|e| StorageError::malformed(collection, key, e).into())
    }

    async fn write(
        &self,
        collection: &str,
        key: &str,
        envelope: &TtlEnvelope,
    ) -> MarketCacheResult<()> {
        let bytes = encode_envelope(envelope)?;
        self.write_raw(collection, key, bytes)
    }

    async fn delete(&self, collection: &str, key: &str) -> MarketCacheResult<bool> {
        let mut collections = self
            .collections
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;

        let removed = collections
            .get_mut(collection)
            .map(|c| c.remove(key).is_some())
            .unwrap_or(false);

        if collections.get(collection).is_some_and(HashMap::is_empty) {
            collections.remove(collection);
        }

        Ok(removed)
    }

    async fn list_all(&self, collection: &str) -> MarketCacheResult<CollectionListing> {
        let collections = self
            .collections
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;

        Ok(collections
            .get(collection)
            .map(|records| {
                records
                    .iter()
                    .map(|(key, bytes)| (key.clone(), TtlEnvelope::decode(bytes).ok()))
                    .collect()
            })
            .unwrap_or_default())
    }
}
