//! Configuration management
//!
//! TOML-backed configuration with environment variable overrides and
//! sensible defaults. The query executor reads its pool sizing here, the
//! parser reads the process timestamp resolution, and the server reads its
//! listen address and response limits.

use crate::types::TsResolution;
use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Query engine configuration
    #[serde(default)]
    pub query: QueryConfig,

    /// Database-wide settings
    #[serde(default)]
    pub tsdb: TsdbConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Server listen address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Allowed CORS origins (empty = allow any)
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
}

/// Query engine configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueryConfig {
    /// Executor pool settings
    #[serde(default)]
    pub executor: ExecutorSettings,

    /// Maximum serialized response size in bytes; larger responses are
    /// rejected with HTTP 413
    #[serde(default = "default_max_response_size")]
    pub max_response_size: usize,
}

/// Worker pool sizing for parallel query execution
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutorSettings {
    /// Number of worker threads
    #[serde(default = "default_thread_count")]
    pub thread_count: usize,

    /// Bounded submission queue depth; submission blocks when full
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// Whether queries run through the pool or on the calling thread
    #[serde(default = "default_true")]
    pub parallel: bool,
}

/// Database-wide settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TsdbConfig {
    /// Process timestamp resolution, `s` or `ms`
    #[serde(default)]
    pub timestamp_resolution: TsResolution,

    /// Start of the off-peak window (hour of day, 0-23)
    #[serde(default = "default_off_hour_begin")]
    pub off_hour_begin: u8,

    /// End of the off-peak window (hour of day, 0-23)
    #[serde(default = "default_off_hour_end")]
    pub off_hour_end: u8,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    6182
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_response_size() -> usize {
    16 * 1024 * 1024
}
fn default_thread_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
fn default_queue_size() -> usize {
    1024
}
fn default_off_hour_begin() -> u8 {
    23
}
fn default_off_hour_end() -> u8 {
    5
}
fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            cors_allowed_origins: Vec::new(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            executor: ExecutorSettings::default(),
            max_response_size: default_max_response_size(),
        }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            thread_count: default_thread_count(),
            queue_size: default_queue_size(),
            parallel: true,
        }
    }
}

impl Default for TsdbConfig {
    fn default() -> Self {
        Self {
            timestamp_resolution: TsResolution::default(),
            off_hour_begin: default_off_hour_begin(),
            off_hour_end: default_off_hour_end(),
        }
    }
}

impl TsdbConfig {
    /// Whether the given hour of day falls in the off-peak window
    ///
    /// The window may wrap midnight (e.g. 23..5).
    pub fn is_off_hour(&self, hour: u8) -> bool {
        if self.off_hour_begin <= self.off_hour_end {
            (self.off_hour_begin..=self.off_hour_end).contains(&hour)
        } else {
            hour >= self.off_hour_begin || hour <= self.off_hour_end
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self, String> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read config file {}: {}", path, e))?;

        toml::from_str(&contents).map_err(|e| format!("failed to parse config file {}: {}", path, e))
    }

    /// Load configuration from a file with environment variable overrides
    pub fn from_file_with_env(path: &str) -> Result<Self, String> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("BASALT_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("BASALT_PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }
        if let Ok(threads) = std::env::var("BASALT_QUERY_THREADS") {
            if let Ok(n) = threads.parse() {
                self.query.executor.thread_count = n;
            }
        }
        if let Ok(parallel) = std::env::var("BASALT_QUERY_PARALLEL") {
            if let Ok(b) = parallel.parse() {
                self.query.executor.parallel = b;
            }
        }
        if let Ok(res) = std::env::var("BASALT_TIMESTAMP_RESOLUTION") {
            match res.as_str() {
                "s" => self.tsdb.timestamp_resolution = TsResolution::Seconds,
                "ms" => self.tsdb.timestamp_resolution = TsResolution::Milliseconds,
                _ => {}
            }
        }
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.server.log_level = log_level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server port cannot be 0".to_string());
        }
        if self.query.executor.thread_count == 0 {
            return Err("executor thread count must be > 0".to_string());
        }
        if self.query.executor.queue_size == 0 {
            return Err("executor queue size must be > 0".to_string());
        }
        if self.query.max_response_size == 0 {
            return Err("max response size must be > 0".to_string());
        }
        if self.tsdb.off_hour_begin > 23 || self.tsdb.off_hour_end > 23 {
            return Err("off-hour bounds must be hours of day (0-23)".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.query.executor.parallel);
        assert!(config.query.executor.thread_count > 0);
        assert_eq!(config.tsdb.timestamp_resolution, TsResolution::Seconds);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let mut config = Config::default();
        config.query.executor.thread_count = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.tsdb.off_hour_begin = 24;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolution_parse_from_toml() {
        let config: Config = toml::from_str(
            r#"
            [tsdb]
            timestamp_resolution = "ms"
            "#,
        )
        .unwrap();
        assert_eq!(config.tsdb.timestamp_resolution, TsResolution::Milliseconds);
    }

    #[test]
    fn test_off_hour_wraps_midnight() {
        let tsdb = TsdbConfig {
            off_hour_begin: 23,
            off_hour_end: 5,
            ..TsdbConfig::default()
        };
        assert!(tsdb.is_off_hour(23));
        assert!(tsdb.is_off_hour(2));
        assert!(!tsdb.is_off_hour(12));
    }
}
