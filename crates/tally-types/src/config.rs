//! Configuration types for the Tally command core.
//!
//! [`TallyConfig`] is the top-level configuration loaded from
//! `.tally/config.toml`, controlling rate-limit windows, cache sizing, the
//! audit ledger location, and the background task queue.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::TallyError;

/// Name of the config file inside a `.tally/` directory.
pub const CONFIG_FILENAME: &str = "config.toml";

/// Default filename of the SQLite audit ledger.
pub const LEDGER_FILENAME: &str = "audit.db";

/// Fixed-window rate limit settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Window length in seconds. Default: 300.
    pub window_secs: u64,
    /// Commands allowed per (actor, scope) per window. Default: 10.
    pub capacity: u32,
    /// Optional Redis URL for a shared window store. When absent the
    /// in-process store is used.
    pub redis_url: Option<String>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 300,
            capacity: 10,
            redis_url: None,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Two-tier cache settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    /// Hard capacity of the in-process fallback tier. Default: 1000.
    pub local_capacity: usize,
    /// TTL used by call sites that do not pick their own. Default: 60.
    pub default_ttl_secs: u64,
    /// Optional Redis URL for the primary tier.
    pub redis_url: Option<String>,
    /// Prefix for every key written to the primary tier.
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            local_capacity: 1000,
            default_ttl_secs: 60,
            redis_url: None,
            key_prefix: "tally".to_string(),
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

/// Audit ledger and async pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AuditConfig {
    /// Path to the SQLite ledger.
    pub db_path: PathBuf,
    /// Bounded channel capacity of the async writer. Default: 4096.
    pub channel_capacity: usize,
    /// Entries per batch insert. Default: 64.
    pub batch_size: usize,
    /// Flush interval in milliseconds. Default: 100.
    pub flush_interval_ms: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(".tally").join(LEDGER_FILENAME),
            channel_capacity: 4096,
            batch_size: 64,
            flush_interval_ms: 100,
        }
    }
}

/// Background task queue settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TaskQueueConfig {
    /// Maximum number of queued, not yet started tasks. Default: 256.
    pub queue_capacity: usize,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self { queue_capacity: 256 }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TallyConfig {
    pub rate_limit: RateLimitConfig,
    pub cache: CacheConfig,
    pub audit: AuditConfig,
    pub tasks: TaskQueueConfig,
}

impl TallyConfig {
    /// Parse a config from TOML text. Missing sections take their defaults.
    pub fn from_toml(content: &str) -> Result<Self, TallyError> {
        let config: TallyConfig = toml::from_str(content)
            .map_err(|e| TallyError::ConfigError(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, TallyError> {
        toml::to_string_pretty(self)
            .map_err(|e| TallyError::ConfigError(format!("failed to serialize config: {e}")))
    }

    /// Reject values that would disable a subsystem by accident.
    pub fn validate(&self) -> Result<(), TallyError> {
        if self.rate_limit.window_secs == 0 {
            return Err(TallyError::ConfigError(
                "rate_limit.window_secs must be greater than zero".into(),
            ));
        }
        if self.rate_limit.capacity == 0 {
            return Err(TallyError::ConfigError(
                "rate_limit.capacity must be greater than zero".into(),
            ));
        }
        if self.cache.local_capacity == 0 {
            return Err(TallyError::ConfigError(
                "cache.local_capacity must be greater than zero".into(),
            ));
        }
        if self.audit.channel_capacity == 0 || self.audit.batch_size == 0 {
            return Err(TallyError::ConfigError(
                "audit.channel_capacity and audit.batch_size must be greater than zero".into(),
            ));
        }
        if self.tasks.queue_capacity == 0 {
            return Err(TallyError::ConfigError(
                "tasks.queue_capacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
