//! PROCON Offline Queue Configuration
//!
//! Settings are read from an optional TOML file and then overridden by
//! environment variables.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `PC_CONFIG` | `config/outbox.toml` | Path of the TOML file (optional) |
//! | `PC_DATABASE_URL` | `sqlite://data/procon-queue.db` | Queue database |
//! | `PC_MAX_ITEMS` | - | Queue capacity, unlimited when unset |
//! | `PC_MAX_RETRY_ATTEMPTS` | `3` | Delivery attempts per item over its lifetime |
//! | `PC_RETRY_DELAY_MS` | `1000` | Base backoff delay |
//! | `PC_MAX_CONCURRENT` | `3` | Items delivered in parallel per chunk |
//! | `PC_RETENTION_DAYS` | `7` | Days completed items are kept |
//! | `PC_DEBOUNCE_MS` | `100` | Delay before a triggered sync starts |
//! | `PC_STUCK_TIMEOUT_SECS` | `300` | Age at which a `processing` item is released |
//! | `PC_API_BASE_URL` | `http://localhost:8000` | Backend API base URL |
//! | `PC_API_TOKEN` | - | Bearer token for the backend |
//! | `PC_HTTP_PORT` | `9090` | Processor health/operations port |
//! | `PC_PROBE_INTERVAL_SECS` | `15` | Connectivity probe interval |
//! | `PC_SYNC_INTERVAL_SECS` | `60` | Periodic sync interval while online |
//! | `PC_CLEANUP_INTERVAL_SECS` | `3600` | Retention cleanup interval |
//! | `PC_LOG_JSON` | `false` | JSON log output |

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_CONFIG_PATH: &str = "config/outbox.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Queue store and delivery settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub database_url: String,
    /// Maximum number of rows the queue may hold
    pub max_items: Option<u64>,
    pub max_retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub max_concurrent: usize,
    pub retention_days: u32,
    pub debounce_ms: u64,
    /// Items stuck in processing longer than this are released
    pub stuck_timeout_secs: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://data/procon-queue.db".to_string(),
            max_items: None,
            max_retry_attempts: 3,
            retry_delay_ms: 1000,
            max_concurrent: 3,
            retention_days: 7,
            debounce_ms: 100,
            stuck_timeout_secs: 300,
        }
    }
}

impl QueueSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(u64::from(self.retention_days) * 24 * 60 * 60)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn stuck_timeout(&self) -> Duration {
        Duration::from_secs(self.stuck_timeout_secs)
    }

    /// Sum of the backoff waits one item may spend across its whole retry budget.
    pub fn total_backoff(&self) -> Duration {
        let waits = 2u32
            .saturating_pow(self.max_retry_attempts.saturating_sub(1))
            .saturating_sub(1);
        self.retry_delay().saturating_mul(waits)
    }
}

/// Backend API settings used by the HTTP remote calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub base_url: String,
    pub token: Option<String>,
    /// Path probed to decide whether the backend is reachable
    pub health_path: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            token: None,
            health_path: "/api/health/".to_string(),
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
        }
    }
}

impl ApiSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Settings for the long-running processor binary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorSettings {
    pub http_port: u16,
    pub probe_interval_secs: u64,
    pub sync_interval_secs: u64,
    pub cleanup_interval_secs: u64,
    pub log_json: bool,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            http_port: 9090,
            probe_interval_secs: 15,
            sync_interval_secs: 60,
            cleanup_interval_secs: 3600,
            log_json: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProconConfig {
    pub queue: QueueSettings,
    pub api: ApiSettings,
    pub processor: ProcessorSettings,
}

impl ProconConfig {
    /// Load from `PC_CONFIG` (or the default path when present), then apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let explicit = std::env::var("PC_CONFIG").ok().map(PathBuf::from);
        let path = explicit
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        let mut config = if explicit.is_some() || path.exists() {
            Self::from_file(&path)?
        } else {
            debug!("No config file at {}, using defaults", path.display());
            Self::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&contents)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply `PC_*` overrides. `lookup` abstracts the environment for tests.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("PC_DATABASE_URL") {
            self.queue.database_url = v;
        }
        if let Some(v) = lookup("PC_MAX_ITEMS") {
            self.queue.max_items = Some(parse_env("PC_MAX_ITEMS", &v)?);
        }
        override_parsed(&lookup, "PC_MAX_RETRY_ATTEMPTS", &mut self.queue.max_retry_attempts)?;
        override_parsed(&lookup, "PC_RETRY_DELAY_MS", &mut self.queue.retry_delay_ms)?;
        override_parsed(&lookup, "PC_MAX_CONCURRENT", &mut self.queue.max_concurrent)?;
        override_parsed(&lookup, "PC_RETENTION_DAYS", &mut self.queue.retention_days)?;
        override_parsed(&lookup, "PC_DEBOUNCE_MS", &mut self.queue.debounce_ms)?;
        override_parsed(&lookup, "PC_STUCK_TIMEOUT_SECS", &mut self.queue.stuck_timeout_secs)?;

        if let Some(v) = lookup("PC_API_BASE_URL") {
            self.api.base_url = v;
        }
        if let Some(v) = lookup("PC_API_TOKEN") {
            self.api.token = Some(v).filter(|t| !t.is_empty());
        }

        override_parsed(&lookup, "PC_HTTP_PORT", &mut self.processor.http_port)?;
        override_parsed(&lookup, "PC_PROBE_INTERVAL_SECS", &mut self.processor.probe_interval_secs)?;
        override_parsed(&lookup, "PC_SYNC_INTERVAL_SECS", &mut self.processor.sync_interval_secs)?;
        override_parsed(&lookup, "PC_CLEANUP_INTERVAL_SECS", &mut self.processor.cleanup_interval_secs)?;
        override_parsed(&lookup, "PC_LOG_JSON", &mut self.processor.log_json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue.max_concurrent == 0 {
            return Err(ConfigError::Invalid("queue.max_concurrent must be at least 1".into()));
        }
        if self.queue.max_retry_attempts == 0 {
            return Err(ConfigError::Invalid("queue.max_retry_attempts must be at least 1".into()));
        }
        if self.api.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("api.base_url must not be empty".into()));
        }

        // Longest an item can stay claimed if every attempt runs into the request timeout
        let worst_delivery = self
            .api
            .request_timeout()
            .saturating_mul(self.queue.max_retry_attempts)
            .saturating_add(self.queue.total_backoff());
        if self.queue.stuck_timeout() <= worst_delivery {
            return Err(ConfigError::Invalid(format!(
                "queue.stuck_timeout_secs must exceed {}s (max_retry_attempts x api.request_timeout_secs plus backoff)",
                worst_delivery.as_secs()
            )));
        }

        for (key, secs) in [
            ("processor.probe_interval_secs", self.processor.probe_interval_secs),
            ("processor.sync_interval_secs", self.processor.sync_interval_secs),
            ("processor.cleanup_interval_secs", self.processor.cleanup_interval_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError::Invalid(format!("{key} must be at least 1")));
            }
        }
        Ok(())
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(v) = lookup(key) {
        *target = parse_env(key, &v)?;
    }
    Ok(())
}
