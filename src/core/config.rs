//! Configuration - Type-safe, validated config
//!
//! Loads from `config.toml` at the project root. Every section has defaults,
//! so a partial file (or none at all) is valid.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::core::{Error, Result};
use crate::resilience::Backoff;

/// Runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Application settings
    #[serde(default)]
    pub app: AppConfig,

    /// Worker pool and scheduler
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Cache defaults and declared regions
    #[serde(default)]
    pub cache: CacheConfig,

    /// Retry defaults
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Log filter used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Worker threads in the general pool
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Bounded queue in front of the pool; overflow runs on the caller
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Threads dedicated to periodic tasks
    #[serde(default = "default_scheduler_threads")]
    pub scheduler_threads: usize,

    /// Tasks running longer than this are logged as slow
    #[serde(default = "default_slow_task_threshold_ms")]
    pub slow_task_threshold_ms: u64,

    /// Drain period for the worker pool on shutdown
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    /// Drain period for the scheduler on shutdown
    #[serde(default = "default_scheduler_shutdown_grace_secs")]
    pub scheduler_shutdown_grace_secs: u64,
}

impl ExecutorConfig {
    pub fn slow_task_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_task_threshold_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn scheduler_shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.scheduler_shutdown_grace_secs)
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            queue_capacity: default_queue_capacity(),
            scheduler_threads: default_scheduler_threads(),
            slow_task_threshold_ms: default_slow_task_threshold_ms(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            scheduler_shutdown_grace_secs: default_scheduler_shutdown_grace_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Capacity for regions created on first use
    #[serde(default = "default_cache_capacity")]
    pub default_capacity: usize,

    /// TTL for regions created on first use
    #[serde(default = "default_cache_ttl_ms")]
    pub default_ttl_ms: u64,

    /// How often expired entries are swept across all regions
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// Regions with their own sizing
    #[serde(default)]
    pub regions: Vec<RegionConfig>,
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    /// Declared sizing for a region, if any.
    pub fn region(&self, name: &str) -> Option<&RegionConfig> {
        self.regions.iter().find(|r| r.name == name)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_capacity: default_cache_capacity(),
            default_ttl_ms: default_cache_ttl_ms(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            regions: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionConfig {
    pub name: String,
    pub capacity: usize,
    pub ttl_ms: u64,
}

impl RegionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff interval
    #[serde(default = "default_base_interval_ms")]
    pub base_interval_ms: u64,

    /// Backoff growth
    #[serde(default)]
    pub backoff: Backoff,

    /// `execute_safely` calls slower than this are logged at debug
    #[serde(default = "default_slow_operation_threshold_ms")]
    pub slow_operation_threshold_ms: u64,
}

impl RetryConfig {
    pub fn base_interval(&self) -> Duration {
        Duration::from_millis(self.base_interval_ms)
    }

    pub fn slow_operation_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_operation_threshold_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_interval_ms: default_base_interval_ms(),
            backoff: Backoff::default(),
            slow_operation_threshold_ms: default_slow_operation_threshold_ms(),
        }
    }
}

fn default_log_level() -> String {
    "info,aleph_runtime=debug".to_string()
}
fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
fn default_queue_capacity() -> usize {
    1000
}
fn default_scheduler_threads() -> usize {
    2
}
fn default_slow_task_threshold_ms() -> u64 {
    1000
}
fn default_shutdown_grace_secs() -> u64 {
    30
}
fn default_scheduler_shutdown_grace_secs() -> u64 {
    10
}
fn default_cache_capacity() -> usize {
    1000
}
fn default_cache_ttl_ms() -> u64 {
    5 * 60 * 1000
}
fn default_cleanup_interval_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    3
}
fn default_base_interval_ms() -> u64 {
    1000
}
fn default_slow_operation_threshold_ms() -> u64 {
    10
}

impl Config {
    /// Load from TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load from the default location (project root config.toml).
    pub fn load_default() -> Self {
        let candidates = [
            "config.toml",
            concat!(env!("CARGO_MANIFEST_DIR"), "/config.toml"),
        ];

        for path in &candidates {
            match Self::load(Path::new(path)) {
                Ok(cfg) => {
                    tracing::info!("📋 Loaded config from {}", path);
                    return cfg;
                }
                Err(e) if Path::new(path).exists() => {
                    tracing::warn!("⚠️ Ignoring {}: {}", path, e);
                }
                Err(_) => {}
            }
        }

        tracing::warn!("⚠️ No config.toml found, using defaults");
        Self::default()
    }

    /// Reject values the runtime cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.executor.pool_size == 0 {
            return Err(Error::Config("executor.pool_size must be > 0".into()));
        }
        if self.executor.queue_capacity == 0 {
            return Err(Error::Config("executor.queue_capacity must be > 0".into()));
        }
        if self.executor.scheduler_threads == 0 {
            return Err(Error::Config("executor.scheduler_threads must be > 0".into()));
        }
        if self.cache.default_capacity == 0 {
            return Err(Error::Config("cache.default_capacity must be > 0".into()));
        }
        if self.cache.cleanup_interval_secs == 0 {
            return Err(Error::Config("cache.cleanup_interval_secs must be > 0".into()));
        }
        for region in &self.cache.regions {
            if region.name.is_empty() {
                return Err(Error::Config("cache region name must not be empty".into()));
            }
            if region.capacity == 0 {
                return Err(Error::Config(format!(
                    "cache region '{}' capacity must be > 0",
                    region.name
                )));
            }
        }
        Ok(())
    }
}
