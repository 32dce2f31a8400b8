//! Configuration management for baton
//!
//! This module handles loading and validating configuration from environment
//! variables and TOML files. Every section has defaults, so a file only needs
//! to name what it overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shared store configuration
    pub store: StoreConfig,

    /// Scheduler configuration
    pub scheduler: SchedulerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Shared store (Redis) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Redis URL (e.g., redis://localhost:6379)
    pub url: String,

    /// Connection pool size
    pub pool_size: usize,

    /// Key prefix for namespacing; empty for none
    pub key_prefix: String,

    /// Connect / checkout timeout in seconds
    pub connect_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            key_prefix: String::new(),
            connect_timeout_secs: 5,
        }
    }
}

impl StoreConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: std::env::var("BATON_REDIS_URL")
                .or_else(|_| std::env::var("REDIS_URL"))
                .unwrap_or(defaults.url),
            pool_size: env_parse("BATON_REDIS_POOL_SIZE").unwrap_or(defaults.pool_size),
            key_prefix: std::env::var("BATON_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            connect_timeout_secs: env_parse("BATON_REDIS_CONNECT_TIMEOUT")
                .unwrap_or(defaults.connect_timeout_secs),
        }
    }

    /// Get connect timeout as Duration
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Replica identity; defaults to `{hostname}-{pid}`
    pub pod_id: Option<String>,

    /// How long `stop` waits for in-flight job bodies, in seconds
    pub shutdown_grace_secs: u64,

    /// Upper bound (exclusive) of the per-job start jitter, in seconds
    pub max_initial_jitter_secs: u64,

    /// Lower bound of derived lock leases, in seconds
    pub min_lock_lease_secs: u64,

    /// Upper bound of derived lock leases, in seconds
    pub max_lock_lease_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pod_id: None,
            shutdown_grace_secs: 10,
            max_initial_jitter_secs: 31,
            min_lock_lease_secs: 30,
            max_lock_lease_secs: 300,
        }
    }
}

impl SchedulerConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            pod_id: std::env::var("BATON_POD_ID").ok().filter(|s| !s.is_empty()),
            shutdown_grace_secs: env_parse("BATON_SHUTDOWN_GRACE_SECS")
                .unwrap_or(defaults.shutdown_grace_secs),
            max_initial_jitter_secs: env_parse("BATON_MAX_JITTER_SECS")
                .unwrap_or(defaults.max_initial_jitter_secs),
            min_lock_lease_secs: env_parse("BATON_MIN_LOCK_LEASE_SECS")
                .unwrap_or(defaults.min_lock_lease_secs),
            max_lock_lease_secs: env_parse("BATON_MAX_LOCK_LEASE_SECS")
                .unwrap_or(defaults.max_lock_lease_secs),
        }
    }

    /// Get shutdown grace period as Duration
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Configured pod id, or `{hostname}-{pid}`
    pub fn resolve_pod_id(&self) -> String {
        self.pod_id.clone().unwrap_or_else(default_pod_id)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            store: StoreConfig::from_env(),
            scheduler: SchedulerConfig::from_env(),
            logging: LoggingConfig {
                level: std::env::var("BATON_LOG_LEVEL").unwrap_or_else(|_| String::from("info")),
                format: std::env::var("BATON_LOG_FORMAT")
                    .unwrap_or_else(|_| String::from("text")),
            },
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let config: Self = toml::from_str(&content).map_err(|e| Error::toml(path, e))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.store.pool_size == 0 {
            return Err(Error::config("store.pool_size must be greater than 0"));
        }

        if self.store.url.is_empty() {
            return Err(Error::config("store.url must not be empty"));
        }

        if self.scheduler.min_lock_lease_secs == 0 {
            return Err(Error::config("scheduler.min_lock_lease_secs must be greater than 0"));
        }

        if self.scheduler.min_lock_lease_secs > self.scheduler.max_lock_lease_secs {
            return Err(Error::config(format!(
                "scheduler.min_lock_lease_secs ({}) exceeds max_lock_lease_secs ({})",
                self.scheduler.min_lock_lease_secs, self.scheduler.max_lock_lease_secs
            )));
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err(Error::config("logging.format must be 'text' or 'json'"));
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// `{hostname}-{pid}`, stable for the life of the process
pub fn default_pod_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| String::from("localhost"));

    format!("{host}-{}", std::process::id())
}
