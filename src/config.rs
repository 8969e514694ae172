//! # Configuration Management Module
//!
//! ## Purpose
//! Centralized configuration for the constitution service, supporting TOML
//! files, environment variable overrides and validated defaults.
//!
//! ## Input/Output Specification
//! - **Input**: Configuration files (TOML), environment variables
//! - **Output**: Validated configuration structs with defaults and overrides
//!
//! ## Configuration Sources (in order of precedence)
//! 1. Environment variables
//! 2. Configuration file
//! 3. Default values

use crate::errors::{Result, ServiceError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

/// Main configuration structure containing all system settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server and API configuration
    pub server: ServerConfig,
    /// Document source settings
    pub document: DocumentConfig,
    /// Cache backend and TTL tiers
    pub cache: CacheConfig,
    /// Search behavior
    pub search: SearchConfig,
    /// View analytics settings
    pub analytics: AnalyticsConfig,
    /// Reading completion estimation
    pub reading: ReadingConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Server and API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Enable CORS for web frontends
    pub enable_cors: bool,
}

/// Document source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentConfig {
    /// Path to the constitution JSON source file
    pub file_path: PathBuf,
}

/// Cache backend and TTL tier configuration.
///
/// TTL tiers reflect update frequency: the whole document rarely changes,
/// search results and popularity aggregates churn hourly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Key namespace prefix shared by every cache entry
    pub prefix: String,
    /// Whole-document overview TTL in seconds
    pub overview_ttl_seconds: u64,
    /// Per-chapter/article TTL in seconds
    pub content_ttl_seconds: u64,
    /// Search response TTL in seconds
    pub search_ttl_seconds: u64,
    /// Popularity aggregate TTL in seconds
    pub popular_ttl_seconds: u64,
    /// View counter TTL in seconds
    pub counter_ttl_seconds: u64,
}

/// Search behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Characters of context kept before and after a match
    pub context_chars: usize,
    /// Marker pair wrapped around matches (bold-markdown delimiters)
    pub highlight_marker: String,
    /// Default page size when the caller omits a limit
    pub default_limit: usize,
    /// Hard cap on page size
    pub max_limit: usize,
    /// Maximum accepted query length in characters
    pub max_query_length: usize,
    /// Query length recorded in search-view analytics events
    pub tracked_query_length: usize,
}

/// View analytics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Sled database directory for cache entries and view aggregates
    pub db_path: PathBuf,
    /// Default number of popular items returned
    pub default_popular_limit: usize,
}

/// Reading completion estimation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadingConfig {
    /// Assumed reading speed
    pub words_per_minute: f64,
    /// Share of the full-read estimate required to count as read
    pub completion_ratio: f64,
    /// Floor so trivially short sections stay reachable
    pub minimum_minutes: f64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Enable structured JSON logging
    pub json_format: bool,
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        Self::from_file("config.toml")
    }

    /// Load configuration from a specific file, falling back to defaults
    /// when the file does not exist
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| ServiceError::Config {
                message: format!("Failed to read config file {:?}: {}", path, e),
            })?;
            toml::from_str(&content).map_err(|e| ServiceError::Config {
                message: format!("Failed to parse config file {:?}: {}", path, e),
            })?
        } else {
            tracing::warn!("Configuration file not found: {:?}, using defaults", path);
            Self::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(host) = std::env::var("CONSTITUTION_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("CONSTITUTION_PORT") {
            self.server.port = port.parse().map_err(|_| ServiceError::Config {
                message: "Invalid port number in CONSTITUTION_PORT".to_string(),
            })?;
        }
        if let Ok(path) = std::env::var("CONSTITUTION_DOCUMENT_PATH") {
            self.document.file_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("CONSTITUTION_DB_PATH") {
            self.analytics.db_path = PathBuf::from(path);
        }
        if let Ok(level) = std::env::var("CONSTITUTION_LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(ServiceError::Config {
                message: "server.port cannot be zero".to_string(),
            });
        }
        if self.search.default_limit == 0 || self.search.default_limit > self.search.max_limit {
            return Err(ServiceError::Config {
                message: "search.default_limit must be between 1 and search.max_limit".to_string(),
            });
        }
        if self.search.highlight_marker.is_empty() {
            return Err(ServiceError::Config {
                message: "search.highlight_marker cannot be empty".to_string(),
            });
        }
        if self.reading.words_per_minute <= 0.0 {
            return Err(ServiceError::Config {
                message: "reading.words_per_minute must be positive".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.reading.completion_ratio) {
            return Err(ServiceError::Config {
                message: "reading.completion_ratio must be within 0..=1".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            document: DocumentConfig::default(),
            cache: CacheConfig::default(),
            search: SearchConfig::default(),
            analytics: AnalyticsConfig::default(),
            reading: ReadingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            enable_cors: true,
        }
    }
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            file_path: PathBuf::from("./data/constitution.json"),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            prefix: "constitution".to_string(),
            overview_ttl_seconds: 6 * HOUR,
            content_ttl_seconds: DAY,
            search_ttl_seconds: HOUR,
            popular_ttl_seconds: HOUR,
            counter_ttl_seconds: 7 * DAY,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            context_chars: 50,
            highlight_marker: "**".to_string(),
            default_limit: 10,
            max_limit: 100,
            max_query_length: 500,
            tracked_query_length: 100,
        }
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/constitution_store"),
            default_popular_limit: 10,
        }
    }
}

impl Default for ReadingConfig {
    fn default() -> Self {
        Self {
            words_per_minute: 200.0,
            completion_ratio: 0.3,
            minimum_minutes: 2.0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.overview_ttl_seconds, 6 * 3600);
        assert_eq!(config.cache.content_ttl_seconds, 86_400);
        assert_eq!(config.cache.search_ttl_seconds, 3600);
        assert_eq!(config.reading.minimum_minutes, 2.0);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server]\nport = 9999\n").unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.cache.prefix, "constitution");
    }

    #[test]
    fn test_invalid_limits_rejected() {
        let mut config = Config::default();
        config.search.default_limit = 0;
        assert!(config.validate().is_err());
        config.search.default_limit = 1000;
        assert!(config.validate().is_err());
    }
}
