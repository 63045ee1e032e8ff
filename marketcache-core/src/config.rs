//! Configuration types

use crate::{ConfigError, MarketCacheError, MarketCacheResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_STORE_PATH: &str = "./data/marketcache";
pub const DEFAULT_MAP_SIZE_MB: usize = 256;
pub const DEFAULT_MEMORY_TTL_SECS: u64 = 30;
pub const DEFAULT_MEMORY_MAX_ENTRIES: usize = 1000;
pub const DEFAULT_EVICTION_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_EVICTION_FRACTION: f64 = 0.2;

/// Settings for the layered cache.
///
/// Durable record lifetimes are NOT configured here. Every `put`/`get`
/// call site passes its own `ttl_ms`, and call sites legitimately use
/// different durations for the same collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    // Durable tier
    /// Directory holding the LMDB environment.
    pub store_path: PathBuf,
    /// Upper bound for the LMDB memory map, in megabytes.
    pub map_size_mb: usize,

    // Memory tier
    /// Freshness window for memory tier entries.
    pub memory_ttl: Duration,
    /// Entry count above which the eviction pass trims the memory tier.
    pub memory_max_entries: usize,
    /// How often the memory eviction task wakes up.
    pub eviction_interval: Duration,
    /// Share of entries (oldest first) removed by one eviction pass.
    pub eviction_fraction: f64,

    // Durable compaction (disabled when `None`)
    pub compaction_interval: Option<Duration>,
    pub compaction_collections: Vec<String>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from(DEFAULT_STORE_PATH),
            map_size_mb: DEFAULT_MAP_SIZE_MB,
            memory_ttl: Duration::from_secs(DEFAULT_MEMORY_TTL_SECS),
            memory_max_entries: DEFAULT_MEMORY_MAX_ENTRIES,
            eviction_interval: Duration::from_secs(DEFAULT_EVICTION_INTERVAL_SECS),
            eviction_fraction: DEFAULT_EVICTION_FRACTION,
            compaction_interval: None,
            compaction_collections: Vec::new(),
        }
    }
}

impl CacheSettings {
    /// Create settings with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create CacheSettings from environment variables.
    ///
    /// # Environment Variables
    /// - `MARKETCACHE_STORE_PATH`: LMDB directory (default: ./data/marketcache)
    /// - `MARKETCACHE_MAP_SIZE_MB`: LMDB map size (default: 256)
    /// - `MARKETCACHE_MEMORY_TTL_SECS`: memory tier freshness window (default: 30)
    /// - `MARKETCACHE_MEMORY_MAX_ENTRIES`: memory tier capacity (default: 1000)
    /// - `MARKETCACHE_EVICTION_INTERVAL_SECS`: eviction task period (default: 300)
    /// - `MARKETCACHE_EVICTION_FRACTION`: share evicted per pass (default: 0.2)
    /// - `MARKETCACHE_COMPACTION_INTERVAL_SECS`: durable compaction period (default: off)
    /// - `MARKETCACHE_COMPACTION_COLLECTIONS`: comma separated collection names
    ///
    /// Unparsable values fall back to their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let store_path = std::env::var("MARKETCACHE_STORE_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.store_path);

        let map_size_mb = env_parse("MARKETCACHE_MAP_SIZE_MB").unwrap_or(defaults.map_size_mb);

        let memory_ttl = env_parse("MARKETCACHE_MEMORY_TTL_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.memory_ttl);

        let memory_max_entries =
            env_parse("MARKETCACHE_MEMORY_MAX_ENTRIES").unwrap_or(defaults.memory_max_entries);

        let eviction_interval = env_parse("MARKETCACHE_EVICTION_INTERVAL_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.eviction_interval);

        let eviction_fraction =
            env_parse("MARKETCACHE_EVICTION_FRACTION").unwrap_or(defaults.eviction_fraction);

        let compaction_interval =
            env_parse::<u64>("MARKETCACHE_COMPACTION_INTERVAL_SECS").map(Duration::from_secs);

        let compaction_collections = std::env::var("MARKETCACHE_COMPACTION_COLLECTIONS")
            .map(|s| parse_collection_list(&s))
            .unwrap_or_default();

        Self {
            store_path,
            map_size_mb,
            memory_ttl,
            memory_max_entries,
            eviction_interval,
            eviction_fraction,
            compaction_interval,
            compaction_collections,
        }
    }

    /// Settings for development and tests: tiny map, short intervals.
    pub fn development() -> Self {
        Self {
            map_size_mb: 16,
            memory_ttl: Duration::from_secs(5),
            memory_max_entries: 100,
            eviction_interval: Duration::from_secs(10),
            ..Self::default()
        }
    }

    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = path.into();
        self
    }

    pub fn with_map_size_mb(mut self, map_size_mb: usize) -> Self {
        self.map_size_mb = map_size_mb;
        self
    }

    pub fn with_memory_ttl(mut self, ttl: Duration) -> Self {
        self.memory_ttl = ttl;
        self
    }

    pub fn with_memory_max_entries(mut self, max: usize) -> Self {
        self.memory_max_entries = max;
        self
    }

    pub fn with_eviction_interval(mut self, interval: Duration) -> Self {
        self.eviction_interval = interval;
        self
    }

    pub fn with_eviction_fraction(mut self, fraction: f64) -> Self {
        self.eviction_fraction = fraction;
        self
    }

    /// Enable periodic durable compaction for the given collections.
    pub fn with_compaction<I, S>(mut self, interval: Duration, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.compaction_interval = Some(interval);
        self.compaction_collections = collections.into_iter().map(Into::into).collect();
        self
    }

    /// Validate the configuration.
    /// Returns Ok(()) if valid, Err(MarketCacheError::Config) if invalid.
    pub fn validate(&self) -> MarketCacheResult<()> {
        if self.store_path.as_os_str().is_empty() {
            return Err(MarketCacheError::Config(ConfigError::MissingRequired {
                field: "store_path".to_string(),
            }));
        }

        if self.map_size_mb == 0 {
            return Err(invalid(
                "map_size_mb",
                self.map_size_mb.to_string(),
                "map_size_mb must be greater than 0",
            ));
        }

        if self.memory_ttl.is_zero() {
            return Err(invalid(
                "memory_ttl",
                format!("{:?}", self.memory_ttl),
                "memory_ttl must be positive",
            ));
        }

        if self.memory_max_entries == 0 {
            return Err(invalid(
                "memory_max_entries",
                self.memory_max_entries.to_string(),
                "memory_max_entries must be greater than 0",
            ));
        }

        if self.eviction_interval.is_zero() {
            return Err(invalid(
                "eviction_interval",
                format!("{:?}", self.eviction_interval),
                "eviction_interval must be positive",
            ));
        }

        if !(self.eviction_fraction > 0.0 && self.eviction_fraction <= 1.0) {
            return Err(invalid(
                "eviction_fraction",
                self.eviction_fraction.to_string(),
                "eviction_fraction must be in (0.0, 1.0]",
            ));
        }

        if let Some(interval) = self.compaction_interval {
            if interval.is_zero() {
                return Err(invalid(
                    "compaction_interval",
                    format!("{:?}", interval),
                    "compaction_interval must be positive when set",
                ));
            }
        }

        Ok(())
    }
}

fn invalid(field: &str, value: String, reason: &str) -> MarketCacheError {
    MarketCacheError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value,
        reason: reason.to_string(),
    })
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn parse_collection_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = CacheSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.memory_ttl, Duration::from_secs(30));
        assert_eq!(settings.eviction_interval, Duration::from_secs(300));
        assert!((settings.eviction_fraction - 0.2).abs() < f64::EPSILON);
        assert!(settings.compaction_interval.is_none());
    }

    #[test]
    fn test_development_settings_are_valid() {
        assert!(CacheSettings::development().validate().is_ok());
    }

    #[test]
    fn test_builder_setters() {
        let settings = CacheSettings::new()
            .with_store_path("/tmp/mc")
            .with_map_size_mb(8)
            .with_memory_ttl(Duration::from_secs(2))
            .with_memory_max_entries(10)
            .with_eviction_interval(Duration::from_secs(1))
            .with_eviction_fraction(0.5)
            .with_compaction(Duration::from_secs(60), ["holders", "prices"]);

        assert_eq!(settings.store_path, PathBuf::from("/tmp/mc"));
        assert_eq!(settings.map_size_mb, 8);
        assert_eq!(settings.memory_max_entries, 10);
        assert_eq!(settings.compaction_interval, Some(Duration::from_secs(60)));
        assert_eq!(settings.compaction_collections, vec!["holders", "prices"]);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_memory_ttl() {
        let settings = CacheSettings::default().with_memory_ttl(Duration::ZERO);
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("memory_ttl"));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let settings = CacheSettings::default().with_memory_max_entries(0);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_fraction() {
        for fraction in [0.0, -0.1, 1.5, f64::NAN] {
            let settings = CacheSettings::default().with_eviction_fraction(fraction);
            assert!(settings.validate().is_err(), "fraction {} accepted", fraction);
        }
        let full = CacheSettings::default().with_eviction_fraction(1.0);
        assert!(full.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_store_path() {
        let settings = CacheSettings::default().with_store_path("");
        let err = settings.validate().unwrap_err();
        assert!(matches!(
            err,
            MarketCacheError::Config(ConfigError::MissingRequired { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_compaction_interval() {
        let settings = CacheSettings::default().with_compaction(Duration::ZERO, ["holders"]);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_parse_collection_list() {
        assert_eq!(
            parse_collection_list(" holders, trades,,prices "),
            vec!["holders", "trades", "prices"]
        );
        assert!(parse_collection_list("").is_empty());
    }

    #[test]
    fn test_settings_serde_roundtrip() {
        let settings = CacheSettings::development().with_compaction(Duration::from_secs(90), ["trades"]);
        let json = serde_json::to_string(&settings).expect("serialize settings");
        let back: CacheSettings = serde_json::from_str(&json).expect("deserialize settings");
        assert_eq!(settings, back);
    }
}
