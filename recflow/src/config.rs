//! Explorer configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::cache::CacheManager;
use crate::errors::{RecflowError, Result};
use crate::model::{CacheConfig, CachePolicy, DEFAULT_MAX_MEMORY_BYTES};

const ENV_MAX_MEMORY_BYTES: &str = "RECFLOW_MAX_MEMORY_BYTES";
const ENV_CACHE_POLICY: &str = "RECFLOW_CACHE_POLICY";
const ENV_SPILL_DIR: &str = "RECFLOW_SPILL_DIR";
const ENV_LOG_LEVEL: &str = "RECFLOW_LOG_LEVEL";
const ENV_LOG_JSON: &str = "RECFLOW_LOG_JSON";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Settings for a pipeline explorer session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplorerConfig {
    /// In-memory cache budget in bytes.
    #[serde(default = "default_max_memory")]
    pub max_memory_bytes: u64,
    /// Which stages the cache admits.
    #[serde(default)]
    pub cache_policy: CachePolicy,
    /// Directory for spilled results. No spilling when unset.
    #[serde(default)]
    pub spill_dir: Option<PathBuf>,
    /// Fallback log filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit JSON log lines.
    #[serde(default)]
    pub log_json: bool,
}

fn default_max_memory() -> u64 {
    DEFAULT_MAX_MEMORY_BYTES
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            max_memory_bytes: default_max_memory(),
            cache_policy: CachePolicy::default(),
            spill_dir: None,
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

impl ExplorerConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cache budget.
    #[must_use]
    pub const fn with_max_memory_bytes(mut self, bytes: u64) -> Self {
        self.max_memory_bytes = bytes;
        self
    }

    /// Sets the cache policy.
    #[must_use]
    pub const fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    /// Sets the spill directory.
    #[must_use]
    pub fn with_spill_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spill_dir = Some(dir.into());
        self
    }

    /// Sets the fallback log level.
    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Switches JSON log output on or off.
    #[must_use]
    pub const fn with_log_json(mut self, enabled: bool) -> Self {
        self.log_json = enabled;
        self
    }

    /// Reads overrides from `RECFLOW_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary variable lookup.
    ///
    /// Unset variables keep their defaults. The result is validated.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_MAX_MEMORY_BYTES) {
            config.max_memory_bytes = raw.trim().parse().map_err(|_| {
                RecflowError::Config(format!("{ENV_MAX_MEMORY_BYTES} is not a byte count: {raw}"))
            })?;
        }
        if let Some(raw) = lookup(ENV_CACHE_POLICY) {
            config.cache_policy = raw.parse()?;
        }
        if let Some(raw) = lookup(ENV_SPILL_DIR).filter(|v| !v.trim().is_empty()) {
            config.spill_dir = Some(PathBuf::from(raw));
        }
        if let Some(raw) = lookup(ENV_LOG_LEVEL) {
            config.log_level = raw.trim().to_ascii_lowercase();
        }
        if let Some(raw) = lookup(ENV_LOG_JSON) {
            config.log_json = parse_flag(ENV_LOG_JSON, &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for values the cache and logger reject.
    pub fn validate(&self) -> Result<()> {
        if self.max_memory_bytes == 0 {
            return Err(RecflowError::Config(
                "max_memory_bytes must be greater than zero".to_string(),
            ));
        }
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(RecflowError::Config(format!(
                "unknown log level: {}",
                self.log_level
            )));
        }
        if let Some(dir) = &self.spill_dir {
            if dir.is_file() {
                return Err(RecflowError::Config(format!(
                    "spill directory {} is a file",
                    dir.display()
                )));
            }
        }
        Ok(())
    }

    /// The cache settings, with no pinned stages.
    #[must_use]
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_memory_bytes: self.max_memory_bytes,
            cache_policy: self.cache_policy,
            ..CacheConfig::default()
        }
    }

    /// A cache manager using these settings.
    #[must_use]
    pub fn cache_manager(&self) -> CacheManager {
        CacheManager::new(&self.cache_config(), self.spill_dir.clone())
    }
}

fn parse_flag(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(RecflowError::Config(format!("{name} is not a flag: {other}"))),
    }
}
