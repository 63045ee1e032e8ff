//! marketcache Core - Shared Types
//!
//! Errors, configuration, the clock abstraction and key helpers shared by
//! the cache tiers. No I/O lives here.

use chrono::{DateTime, Utc};

pub mod clock;
pub mod config;
pub mod error;

pub use clock::{system_clock, Clock, ManualClock, SystemClock};
pub use config::CacheSettings;
pub use error::{ConfigError, MarketCacheError, MarketCacheResult, StorageError};

// ============================================================================
// SHARED TYPES
// ============================================================================

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Record lifetime in milliseconds, supplied per call.
pub type TtlMs = u64;

/// A cached value. Opaque to the cache; whatever the caller serialized.
pub type Payload = serde_json::Value;

/// Separator between collection and key in memory tier keys.
pub const MEMORY_KEY_SEPARATOR: char = ':';

/// Separator used by [`composite_key`].
pub const COMPOSITE_KEY_SEPARATOR: &str = "_";

// ============================================================================
// KEY HELPERS
// ============================================================================

/// Flat memory tier key for a (collection, key) pair: `collection:key`.
pub fn memory_key(collection: &str, key: &str) -> String {
    let mut flat = String::with_capacity(collection.len() + key.len() + 1);
    flat.push_str(collection);
    flat.push(MEMORY_KEY_SEPARATOR);
    flat.push_str(key);
    flat
}

/// Join route parameters into a single cache key.
///
/// ```
/// use marketcache_core::composite_key;
/// assert_eq!(composite_key(&["token", "So11", "page", "2"]), "token_So11_page_2");
/// ```
pub fn composite_key<S: AsRef<str>>(parts: &[S]) -> String {
    parts
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(COMPOSITE_KEY_SEPARATOR)
}
