//! Configuration System
//!
//! Loads configuration from TOML files with environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Admission queue capacity
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Flush once this many series are buffered (0 disables)
    #[serde(default = "default_flush_max_series")]
    pub flush_max_series: usize,

    /// Flush once this many points are buffered (0 disables)
    #[serde(default = "default_flush_max_points")]
    pub flush_max_points: usize,

    /// Periodic flush of a non-empty table (0 disables)
    #[serde(default)]
    pub flush_interval_ms: u64,
}

fn default_data_dir() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("tickdb").to_string_lossy().to_string())
        .unwrap_or_else(|| "./tickdb_data".to_string())
}

fn default_queue_capacity() -> usize {
    100
}

fn default_flush_max_series() -> usize {
    1000
}

fn default_flush_max_points() -> usize {
    100_000
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            queue_capacity: default_queue_capacity(),
            flush_max_series: default_flush_max_series(),
            flush_max_points: default_flush_max_points(),
            flush_interval_ms: 0,
        }
    }
}

/// API server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Largest accepted request body
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8086
}

fn default_max_body_bytes() -> usize {
    4 * 1024 * 1024
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
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

        Self::parse(&content).map_err(|error| ConfigError::Parse {
            path: path.to_path_buf(),
            error,
        })
    }

    fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Default configuration with environment variable overrides
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("tickdb").join("config.toml")),
            Some(PathBuf::from("/etc/tickdb/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        // Storage overrides
        if let Some(data_dir) = var("TICKDB_DATA_DIR") {
            self.storage.data_dir = data_dir;
        }
        if let Some(capacity) = var("TICKDB_QUEUE_CAPACITY") {
            match capacity.parse() {
                Ok(c) => self.storage.queue_capacity = c,
                Err(_) => tracing::warn!("Ignoring invalid TICKDB_QUEUE_CAPACITY {:?}", capacity),
            }
        }

        // API overrides
        if let Some(host) = var("TICKDB_API_HOST") {
            self.api.host = host;
        }
        if let Some(port) = var("TICKDB_API_PORT") {
            match port.parse() {
                Ok(p) => self.api.port = p,
                Err(_) => tracing::warn!("Ignoring invalid TICKDB_API_PORT {:?}", port),
            }
        }

        // Logging overrides
        if let Some(level) = var("TICKDB_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("TICKDB_LOG_FORMAT") {
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
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# tickdb Configuration
#
# Environment variables override these settings:
# - TICKDB_DATA_DIR
# - TICKDB_QUEUE_CAPACITY
# - TICKDB_API_HOST
# - TICKDB_API_PORT
# - TICKDB_LOG_LEVEL
# - TICKDB_LOG_FORMAT

[storage]
# Directory holding the wal/ and sstable/ subdirectories
data_dir = "./tickdb_data"

# Points that may wait for the ingest consumer before submissions are rejected
queue_capacity = 100

# Flush the in-memory table once it holds this many series (0 disables)
flush_max_series = 1000

# ...or this many points (0 disables)
flush_max_points = 100000

# Also flush on a timer, in milliseconds (0 disables)
flush_interval_ms = 0

[api]
# API server host
host = "0.0.0.0"

# API server port
port = 8086

# Largest accepted request body (bytes)
max_body_bytes = 4194304

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
