//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Cache read path configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Step used for projects registered without one
    #[serde(default = "default_step_secs")]
    pub default_step_secs: i64,

    /// Shard count of each query's merge sink
    #[serde(default = "default_merge_shards")]
    pub merge_shards: usize,

    /// Per-query deadline, 0 disables it
    #[serde(default)]
    pub query_timeout_ms: u64,
}

fn default_step_secs() -> i64 {
    30
}

fn default_merge_shards() -> usize {
    1
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_step_secs: default_step_secs(),
            merge_shards: default_merge_shards(),
            query_timeout_ms: 0,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|e| match e {
            ConfigError::Parse { error, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                error,
            },
            other => other,
        })
    }

    /// Parse configuration from TOML text and validate it
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            error: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("rangecache").join("config.toml")),
            Some(PathBuf::from("/etc/rangecache/config.toml")),
            Some(PathBuf::from("./rangecache.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Reject values the cache cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.default_step_secs <= 0 {
            return Err(ConfigError::Invalid(format!(
                "cache.default_step_secs must be positive, got {}",
                self.cache.default_step_secs
            )));
        }
        if self.cache.merge_shards == 0 {
            return Err(ConfigError::Invalid(
                "cache.merge_shards must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        if let Ok(step) = std::env::var("RANGECACHE_DEFAULT_STEP") {
            if let Ok(s) = step.parse() {
                self.cache.default_step_secs = s;
            }
        }
        if let Ok(shards) = std::env::var("RANGECACHE_MERGE_SHARDS") {
            if let Ok(n) = shards.parse() {
                self.cache.merge_shards = n;
            }
        }
        if let Ok(timeout) = std::env::var("RANGECACHE_QUERY_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.cache.query_timeout_ms = ms;
            }
        }

        if let Ok(level) = std::env::var("RANGECACHE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("RANGECACHE_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# rangecache Configuration
#
# Environment variables override these settings:
# - RANGECACHE_DEFAULT_STEP
# - RANGECACHE_MERGE_SHARDS
# - RANGECACHE_QUERY_TIMEOUT_MS
# - RANGECACHE_LOG_LEVEL
# - RANGECACHE_LOG_FORMAT

[cache]
# Step (seconds) for projects registered without one
default_step_secs = 30

# Shards per query merge sink; 1 keeps a single critical section
merge_shards = 1

# Per-query deadline in milliseconds, 0 disables it
query_timeout_ms = 0

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
