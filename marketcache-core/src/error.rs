//! Error types for marketcache operations

use thiserror::Error;

/// Durable storage errors.
///
/// These never reach callers of the coordinator. The durable cache tier logs
/// them and degrades to a miss (or a `false` write result).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Storage unavailable during {operation}: {reason}")]
    Unavailable { operation: String, reason: String },

    #[error("Malformed record {collection}/{key}: {reason}")]
    MalformedRecord {
        collection: String,
        key: String,
        reason: String,
    },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

impl StorageError {
    /// Shorthand for an `Unavailable` error.
    pub fn unavailable(operation: impl Into<String>, reason: impl ToString) -> Self {
        Self::Unavailable {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Shorthand for a `MalformedRecord` error.
    pub fn malformed(
        collection: impl Into<String>,
        key: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        Self::MalformedRecord {
            collection: collection.into(),
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns true if the stored bytes were readable but not a valid record.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::MalformedRecord { .. })
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all marketcache errors.
#[derive(Debug, Clone, Error)]
pub enum MarketCacheError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for marketcache operations.
pub type MarketCacheResult<T> = Result<T, MarketCacheError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_unavailable() {
        let err = StorageError::unavailable("write", "disk full");
        let msg = format!("{}", err);
        assert!(msg.contains("Storage unavailable"));
        assert!(msg.contains("write"));
        assert!(msg.contains("disk full"));
    }

    #[test]
    fn test_storage_error_display_malformed() {
        let err = StorageError::malformed("holders", "token_abc", "expected value");
        let msg = format!("{}", err);
        assert!(msg.contains("holders/token_abc"));
        assert!(msg.contains("expected value"));
        assert!(err.is_malformed());
        assert!(!StorageError::LockPoisoned.is_malformed());
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "eviction_fraction".to_string(),
            value: "1.5".to_string(),
            reason: "must be in (0.0, 1.0]".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("eviction_fraction"));
        assert!(msg.contains("1.5"));
        assert!(msg.contains("must be in"));
    }

    #[test]
    fn test_market_cache_error_from_variants() {
        let storage = MarketCacheError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, MarketCacheError::Storage(_)));

        let config = MarketCacheError::from(ConfigError::MissingRequired {
            field: "store_path".to_string(),
        });
        assert!(matches!(config, MarketCacheError::Config(_)));
    }

    #[test]
    fn test_storage_error_display_lock_poisoned() {
        let msg = format!("{}", StorageError::LockPoisoned);
        assert!(msg.contains("lock poisoned"));
    }
}
