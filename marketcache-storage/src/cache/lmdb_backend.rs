//! LMDB-backed durable store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a memory-mapped
//! key-value store that several server processes can open at the same time.
//!
//! # Layout
//!
//! One unnamed database. Keys are [`CollectionKey`] encodings, values are
//! JSON-encoded [`TtlEnvelope`]s.
//!
//! # Consistency
//!
//! - Every write is a single LMDB write transaction: readers see either the
//!   previous record or the new one, never a partial value
//! - Concurrent writers to the same key are serialized by LMDB; the last
//!   transaction to commit wins
//! - No locking beyond that: two writers racing on the same key is allowed

use std::path::Path;

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use marketcache_core::{CacheSettings, MarketCacheError, MarketCacheResult, StorageError};

use super::durable::{CollectionListing, DurableStore};
use super::envelope::TtlEnvelope;
use super::key::CollectionKey;

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convert LmdbStoreError to MarketCacheError.
impl From<LmdbStoreError> for MarketCacheError {
    fn from(e: LmdbStoreError) -> Self {
        MarketCacheError::Storage(StorageError::unavailable("lmdb", e))
    }
}

/// Durable store on top of LMDB.
///
/// # Example
///
/// ```ignore
/// use marketcache_storage::cache::{DurableStore, LmdbDurableStore, TtlEnvelope};
///
/// let store = LmdbDurableStore::open("/var/lib/marketcache", 256)?;
/// store.write("holders", "token_So11", &envelope).await?;
/// let envelope = store.read("holders", "token_So11").await?;
/// ```
pub struct LmdbDurableStore {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
}

impl LmdbDurableStore {
    /// Open (or create) an LMDB durable store.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        let map_size = max_size_mb.checked_mul(1024 * 1024).ok_or_else(|| {
            LmdbStoreError::EnvOpen(format!("map size of {max_size_mb} MB overflows usize"))
        })?;

        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per process for this path and
        // the memory map is never accessed outside heed's transactions.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        tracing::debug!(
            path = %path.as_ref().display(),
            max_size_mb,
            "Opened LMDB durable store"
        );

        Ok(Self { env, db })
    }

    /// Open the store described by `settings`.
    pub fn from_settings(settings: &CacheSettings) -> Result<Self, LmdbStoreError> {
        Self::open(&settings.store_path, settings.map_size_mb)
    }

    /// Store raw bytes under `(collection, key)` without encoding them.
    pub fn write_raw(&self, collection: &str, key: &str, bytes: &[u8]) -> Result<(), LmdbStoreError> {
        let encoded_key = CollectionKey::new(collection, key).encode();

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        self.db
            .put(&mut wtxn, &encoded_key, bytes)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))
    }

    /// Read the raw stored bytes for `(collection, key)`.
    pub fn read_raw(&self, collection: &str, key: &str) -> Result<Option<Vec<u8>>, LmdbStoreError> {
        let encoded_key = CollectionKey::new(collection, key).encode();

        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        self.db
            .get(&rtxn, &encoded_key)
            .map(|bytes| bytes.map(<[u8]>::to_vec))
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))
    }

    /// Number of records across all collections.
    pub fn entry_count(&self) -> Result<u64, LmdbStoreError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        self.db
            .len(&rtxn)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))
    }

    /// Collect `(key, bytes)` for every record in `collection`.
    fn collect_collection(&self, collection: &str) -> Result<Vec<(String, Vec<u8>)>, LmdbStoreError> {
        let prefix = CollectionKey::collection_prefix(collection);

        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let iter = self
            .db
            .prefix_iter(&rtxn, &prefix)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let mut records = Vec::new();
        for result in iter {
            let (raw_key, value) = match result {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(error = %e, collection, "Skipping unreadable LMDB entry");
                    continue;
                }
            };
            match CollectionKey::decode(raw_key) {
                Some(key) => records.push((key.key().to_string(), value.to_vec())),
                None => tracing::warn!(collection, "Skipping LMDB entry with undecodable key"),
            }
        }

        Ok(records)
    }
}

impl std::fmt::Debug for LmdbDurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbDurableStore")
            .field("path", &self.env.path())
            .finish()
    }
}

#[async_trait]
impl DurableStore for LmdbDurableStore {
    async fn read(&self, collection: &str, key: &str) -> MarketCacheResult<Option<TtlEnvelope>> {
        let Some(bytes) = self.read_raw(collection, key)? else {
            return Ok(None);
        };

        TtlEnvelope::decode(&bytes)
            .map(Some)
            .map_err(|e| StorageError::malformed(collection, key, e).into())
    }

    async fn write(
        &self,
        collection: &str,
        key: &str,
        envelope: &TtlEnvelope,
    ) -> MarketCacheResult<()> {
        // Serialize before opening the write transaction.
        let bytes = envelope
            .encode()
            .map_err(|e| LmdbStoreError::Serialization(e.to_string()))?;

        self.write_raw(collection, key, &bytes)?;
        Ok(())
    }

    async fn delete(&self, collection: &str, key: &str) -> MarketCacheResult<bool> {
        let encoded_key = CollectionKey::new(collection, key).encode();

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let deleted = self
            .db
            .delete(&mut wtxn, &encoded_key)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(deleted)
    }

    async fn list_all(&self, collection: &str) -> MarketCacheResult<CollectionListing> {
        let records = self.collect_collection(collection)?;

        Ok(records
            .into_iter()
            .map(|(key, bytes)| {
                let envelope = TtlEnvelope::decode(&bytes).ok();
                if envelope.is_none() {
                    tracing::debug!(collection, key = %key, "Listed record does not decode");
                }
                (key, envelope)
            })
            .collect())
    }
}
