//! SDK Configuration
//!
//! Defines configuration options for the memroute SDK. Every section has a
//! `Default` carrying the documented constants; a TOML file may override any
//! subset of fields.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use memroute_core::ContentKind;

use crate::SDKResult;

/// Environment variable naming a config file
pub const CONFIG_ENV: &str = "MEMROUTE_CONFIG";

/// Top-level manager configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Cache configuration
    pub cache: CacheConfig,

    /// Routing configuration
    pub routing: RoutingConfig,

    /// Cross-backend sync configuration
    pub sync: SyncConfig,

    /// Deduplication configuration
    pub dedup: DedupConfig,

    /// Batch execution configuration
    pub batch: BatchConfig,

    /// List/search execution configuration
    pub query: QueryConfig,

    /// Predictive preload configuration
    pub prediction: PredictionConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum total estimated size of cached entries (default: 50 MiB)
    pub max_bytes: usize,

    /// TTL for session payloads in seconds (default: 600 = 10 minutes)
    pub session_ttl_secs: u64,

    /// TTL for pattern payloads in seconds (default: 1800 = 30 minutes)
    pub pattern_ttl_secs: u64,

    /// TTL for architectural payloads in seconds (default: 3600 = 1 hour)
    pub architectural_ttl_secs: u64,

    /// TTL for everything else in seconds (default: 300 = 5 minutes)
    pub default_ttl_secs: u64,

    /// Payloads larger than this get half the TTL (default: 1 MiB)
    pub large_payload_bytes: usize,

    /// Utilization eviction brings the cache down to (default: 0.8)
    pub eviction_target_ratio: f64,

    /// Expiry sweep interval in seconds (default: 60)
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: 50 * 1024 * 1024,
            session_ttl_secs: 600,       // 10 minutes
            pattern_ttl_secs: 1800,      // 30 minutes
            architectural_ttl_secs: 3600, // 1 hour
            default_ttl_secs: 300,       // 5 minutes
            large_payload_bytes: 1024 * 1024,
            eviction_target_ratio: 0.8,
            sweep_interval_secs: 60,
        }
    }
}

impl CacheConfig {
    /// Base TTL for a payload kind, before the large-payload halving
    pub fn ttl_secs_for(&self, kind: Option<ContentKind>) -> u64 {
        match kind {
            Some(ContentKind::Session) => self.session_ttl_secs,
            Some(ContentKind::Pattern) => self.pattern_ttl_secs,
            Some(ContentKind::Architectural) => self.architectural_ttl_secs,
            _ => self.default_ttl_secs,
        }
    }
}

/// Routing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Primary backend is kept while its average latency is below this (default: 100ms)
    pub latency_threshold_ms: u64,

    /// Access pattern frequency above which the learned backend wins (default: 0.7)
    pub pattern_override_threshold: f64,

    /// Frequency increment on repeated agreement (default: 0.1)
    pub pattern_increment: f64,

    /// Frequency a pattern resets to on disagreement (default: 0.5)
    pub pattern_reset: f64,

    /// Latency samples kept per backend (default: 100)
    pub latency_window: usize,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            latency_threshold_ms: 100,
            pattern_override_threshold: 0.7,
            pattern_increment: 0.1,
            pattern_reset: 0.5,
            latency_window: 100,
        }
    }
}

/// Cross-backend sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Enable cross-backend replication (default: true)
    pub enabled: bool,

    /// Queue drain interval in seconds (default: 5)
    pub drain_interval_secs: u64,

    /// Medium priority items executed per drain cycle (default: 3)
    pub max_medium_per_cycle: usize,

    /// Low priority items executed in an otherwise idle cycle (default: 3)
    pub max_low_per_cycle: usize,

    /// Failed attempts after which an item is abandoned, 0 retries forever (default: 0)
    pub max_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            drain_interval_secs: 5,
            max_medium_per_cycle: 3,
            max_low_per_cycle: 3,
            max_attempts: 0,
        }
    }
}

/// Deduplication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Enable duplicate detection on write (default: true)
    pub enabled: bool,

    /// Minimum signature similarity for a candidate (default: 0.3)
    pub candidate_threshold: f64,

    /// Score above which the newer content replaces the older (default: 0.9)
    pub replace_threshold: f64,

    /// Score above which contents are merged (default: 0.7)
    pub merge_threshold: f64,

    /// Score above which content is stored as related (default: 0.5)
    pub append_threshold: f64,

    /// Terms kept in the semantic fingerprint (default: 20)
    pub fingerprint_terms: usize,

    /// Bodies larger than this are not fingerprinted (default: 4 MiB)
    pub max_signature_bytes: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            candidate_threshold: 0.3,
            replace_threshold: 0.9,
            merge_threshold: 0.7,
            append_threshold: 0.5,
            fingerprint_terms: 20,
            max_signature_bytes: 4 * 1024 * 1024,
        }
    }
}

/// Batch execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Items executed concurrently (default: 8)
    pub max_concurrency: usize,

    /// Whole-batch timeout in milliseconds (default: 30000)
    pub timeout_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            timeout_ms: 30_000,
        }
    }
}

/// List/search execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Filter key count at which a list runs against both backends (default: 3)
    pub complex_filter_keys: usize,

    /// Search result limit when the query sets none (default: 20)
    pub default_search_limit: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            complex_filter_keys: 3,
            default_search_limit: 20,
        }
    }
}

/// Predictive preload configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    /// Enable predictive preloading (default: true)
    pub enabled: bool,

    /// Matches above this confidence are preloaded (default: 0.7)
    pub min_confidence: f64,

    /// Pattern refresh interval in seconds (default: 300)
    pub refresh_interval_secs: u64,

    /// Matches a pattern needs before its confidence is re-estimated (default: 5)
    pub refresh_min_matches: u64,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_confidence: 0.7,
            refresh_interval_secs: 300,
            refresh_min_matches: 5,
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Recent samples kept for averages (default: 1000)
    pub window: usize,

    /// Recalculation interval in seconds (default: 30)
    pub recalc_interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            window: 1000,
            recalc_interval_secs: 30,
        }
    }
}

impl ManagerConfig {
    /// Set cache configuration
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Set routing configuration
    pub fn with_routing(mut self, routing: RoutingConfig) -> Self {
        self.routing = routing;
        self
    }

    /// Set sync configuration
    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }

    /// Set dedup configuration
    pub fn with_dedup(mut self, dedup: DedupConfig) -> Self {
        self.dedup = dedup;
        self
    }

    /// Set batch configuration
    pub fn with_batch(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    /// Set prediction configuration
    pub fn with_prediction(mut self, prediction: PredictionConfig) -> Self {
        self.prediction = prediction;
        self
    }

    /// Parse a TOML document; missing fields take their defaults
    pub fn from_toml_str(s: &str) -> SDKResult<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file
    pub fn from_file(path: impl AsRef<Path>) -> SDKResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Default config file location (`~/.memroute/config.toml`)
    pub fn default_path() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(".memroute").join("config.toml")
    }

    /// Load configuration from `MEMROUTE_CONFIG`, the default path, or defaults
    pub fn load() -> SDKResult<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            tracing::info!(path = %path, "Loading memroute config from environment");
            return Self::from_file(path);
        }

        let path = Self::default_path();
        if path.exists() {
            tracing::info!(path = ?path, "Loading memroute config");
            return Self::from_file(path);
        }

        Ok(Self::default())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.cache.max_bytes == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "cache.max_bytes".into(),
                message: "must be greater than 0".into(),
            });
        }

        if self.cache.eviction_target_ratio <= 0.0 || self.cache.eviction_target_ratio > 1.0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "cache.eviction_target_ratio".into(),
                message: "must be between 0 and 1".into(),
            });
        }

        let d = &self.dedup;
        let ordered = 0.0 <= d.append_threshold
            && d.append_threshold < d.merge_threshold
            && d.merge_threshold < d.replace_threshold
            && d.replace_threshold <= 1.0;
        if !ordered {
            return Err(ConfigValidationError::InvalidValue {
                field: "dedup".into(),
                message: "thresholds must satisfy 0 <= append < merge < replace <= 1".into(),
            });
        }

        if self.batch.max_concurrency == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "batch.max_concurrency".into(),
                message: "must be greater than 0".into(),
            });
        }

        if self.routing.latency_window == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "routing.latency_window".into(),
                message: "must be greater than 0".into(),
            });
        }

        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
