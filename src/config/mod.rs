//! Configuration management
//!
//! This module handles loading and parsing configuration for the Natours core.
//! Configuration can be loaded from:
//! - config.yml file
//! - Environment variables (override file settings)
//!
//! Missing optional values are filled with sensible defaults.

use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Tour behaviour configuration
    #[serde(default)]
    pub tours: TourConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database path or URL
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Maximum pooled connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_database_url() -> String {
    "data/natours.db".to_string()
}

fn default_max_connections() -> u32 {
    20
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is not set
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "natours=info".to_string()
}

/// Tour behaviour configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TourConfig {
    /// Queries slower than this are logged at warn level
    #[serde(default = "default_slow_query_ms")]
    pub slow_query_ms: u64,
    /// Page size used when a list request carries no `limit`
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,
    /// Re-check `priceDiscount < price` on partial updates
    #[serde(default)]
    pub enforce_discount_on_update: bool,
}

impl Default for TourConfig {
    fn default() -> Self {
        Self {
            slow_query_ms: default_slow_query_ms(),
            default_page_size: default_page_size(),
            enforce_discount_on_update: false,
        }
    }
}

fn default_slow_query_ms() -> u64 {
    1000
}

fn default_page_size() -> u32 {
    100
}

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError {
        path: String,
        message: String,
    },
}

impl Config {
    /// Load configuration from file
    ///
    /// If the file doesn't exist, returns default configuration.
    /// If the file exists but is invalid YAML, returns an error with details.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = serde_yaml::from_str(&content).map_err(|e| {
            ConfigError::ParseError {
                path: path.display().to_string(),
                message: format_yaml_error(&e),
            }
        })?;

        Ok(config)
    }

    /// Load configuration from file with environment variable overrides
    ///
    /// Environment variables follow the pattern:
    /// - NATOURS_DATABASE_URL
    /// - NATOURS_DATABASE_MAX_CONNECTIONS
    /// - NATOURS_LOG_FILTER
    /// - NATOURS_TOURS_SLOW_QUERY_MS
    /// - NATOURS_TOURS_DEFAULT_PAGE_SIZE
    /// - NATOURS_TOURS_ENFORCE_DISCOUNT_ON_UPDATE
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("NATOURS_DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(max) = std::env::var("NATOURS_DATABASE_MAX_CONNECTIONS") {
            if let Ok(max) = max.parse::<u32>() {
                self.database.max_connections = max;
            }
        }

        if let Ok(filter) = std::env::var("NATOURS_LOG_FILTER") {
            self.logging.filter = filter;
        }

        if let Ok(ms) = std::env::var("NATOURS_TOURS_SLOW_QUERY_MS") {
            if let Ok(ms) = ms.parse::<u64>() {
                self.tours.slow_query_ms = ms;
            }
        }
        if let Ok(size) = std::env::var("NATOURS_TOURS_DEFAULT_PAGE_SIZE") {
            match size.parse::<u32>() {
                Ok(size) if size > 0 => self.tours.default_page_size = size,
                _ => {} // Ignore invalid values
            }
        }
        if let Ok(flag) = std::env::var("NATOURS_TOURS_ENFORCE_DISCOUNT_ON_UPDATE") {
            match flag.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.tours.enforce_discount_on_update = true,
                "false" | "0" | "no" => self.tours.enforce_discount_on_update = false,
                _ => {}
            }
        }
    }
}

/// Format YAML parsing error with location and context
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
