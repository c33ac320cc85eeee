// logpipe-config - Unified configuration for the ingestion pipeline
//
// Supports configuration from multiple sources:
// 1. Environment variables (highest priority)
// 2. Config file path from LOGPIPE_CONFIG env var
// 3. Config file contents from LOGPIPE_CONFIG_CONTENT env var
// 4. Default config file locations (./config.toml, ./.logpipe.toml)
// 5. Built-in defaults (lowest priority)
//
// Loading never validates: the binary layers CLI flags on top and then calls
// `validate()` once.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

mod env_overrides;
mod sources;
mod validation;

pub use env_overrides::{EnvSource, ENV_PREFIX};

/// Main runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub broker: BrokerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

/// Batch writer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Size threshold that triggers a flush.
    pub max_rows: usize,
    /// Period of the flush timer.
    pub flush_interval_secs: u64,
    /// Capacity of the hand-off buffer between consumer and writer.
    /// `0` selects an unbounded buffer.
    pub channel_capacity: usize,
}

impl BatchConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_rows: 100,
            flush_interval_secs: 5,
            channel_capacity: 1000,
        }
    }
}

/// AMQP broker and subscription configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub url: String,
    pub queue: String,
    pub durable: bool,
    pub prefetch: u16,
    pub heartbeat_secs: u16,
    pub connection_name: String,
    pub connect_attempts: u32,
    pub connect_backoff_secs: u64,
    pub max_reconnect_backoff_secs: u64,
}

impl BrokerConfig {
    pub fn connect_backoff(&self) -> Duration {
        Duration::from_secs(self.connect_backoff_secs)
    }

    pub fn max_reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.max_reconnect_backoff_secs)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            queue: "logs".to_string(),
            durable: true,
            prefetch: 1,
            heartbeat_secs: 10,
            connection_name: "logs-service".to_string(),
            connect_attempts: 5,
            connect_backoff_secs: 1,
            max_reconnect_backoff_secs: 30,
        }
    }
}

/// Relational store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    /// Apply the idempotent schema bootstrap at startup.
    pub run_migrations: bool,
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 5,
            acquire_timeout_secs: 30,
            run_migrations: true,
        }
    }
}

/// Process-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Unsupported log format: {}. Supported: text, json", s),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from all sources with priority
    pub fn load() -> Result<Self> {
        sources::load_config()
    }

    /// Load configuration from a specific file path (for CLI usage).
    pub fn load_from_path(path: impl AsRef<std::path::Path>) -> Result<Self> {
        sources::load_from_file_path(path)
    }

    /// Merge another config into this one (used for TOML layering).
    pub fn merge(&mut self, other: RuntimeConfig) {
        self.batch = other.batch;
        self.broker = other.broker;
        self.database = other.database;
        self.server = other.server;
    }

    /// Apply environment overrides from a custom source.
    pub fn apply_env_overrides_from<E: EnvSource>(&mut self, env: &E) -> Result<()> {
        env_overrides::apply_env_overrides(self, env)
    }

    /// Build a configuration from inline TOML plus overrides supplied by an
    /// `EnvSource`, without touching the host environment or filesystem.
    pub fn load_with_env<E: EnvSource>(inline_config: Option<&str>, env: &E) -> Result<Self> {
        let mut config = RuntimeConfig::default();

        if let Some(inline) = inline_config {
            let file_config: RuntimeConfig =
                toml::from_str(inline).context("Failed to parse inline config content")?;
            config.merge(file_config);
        }

        config.apply_env_overrides_from(env)?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }
}
