//! Engine configuration
//!
//! Loaded from a JSON file. Only `data_dir` is required:
//!
//! ```json
//! {
//!   "data_dir": "/var/lib/colldb",
//!   "lock_timeout_ms": 900000,
//!   "is_db_server": false,
//!   "max_merge_depth": 64,
//!   "estimates_ttl_secs": 60,
//!   "log_level": "info"
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::collection::{CollectionContext, VersionTracker, DEFAULT_LOCK_TIMEOUT};
use crate::document::DEFAULT_MAX_MERGE_DEPTH;
use crate::observability::{log_event_with_fields, Event, Logger, MetricsRegistry, Severity};
use crate::revision::HybridLogicalClock;

/// Upper bound accepted for `max_merge_depth`.
const MAX_MERGE_DEPTH_LIMIT: usize = 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::Read { .. } => "COLLDB_CONFIG_READ",
            ConfigError::Parse(_) => "COLLDB_CONFIG_PARSE",
            ConfigError::Invalid(_) => "COLLDB_CONFIG_INVALID",
        }
    }
}

fn default_lock_timeout_ms() -> u64 {
    DEFAULT_LOCK_TIMEOUT.as_millis() as u64
}

fn default_max_merge_depth() -> usize {
    DEFAULT_MAX_MERGE_DEPTH
}

fn default_estimates_ttl_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Data directory (required)
    pub data_dir: String,

    /// Default collection write lock timeout
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Collections are shards on a DB server; shard keys become immutable
    #[serde(default)]
    pub is_db_server: bool,

    #[serde(default = "default_max_merge_depth")]
    pub max_merge_depth: usize,

    #[serde(default = "default_estimates_ttl_secs")]
    pub estimates_ttl_secs: u64,

    /// One of trace, info, warn, error, fatal
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl EngineConfig {
    /// Configuration with defaults for everything but the data directory.
    pub fn new(data_dir: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            lock_timeout_ms: default_lock_timeout_ms(),
            is_db_server: false,
            max_merge_depth: default_max_merge_depth(),
            estimates_ttl_secs: default_estimates_ttl_secs(),
            log_level: default_log_level(),
        }
    }

    /// Loads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        config.validate()?;

        log_event_with_fields(
            Event::ConfigLoaded,
            &[("data_dir", config.data_dir.as_str()), ("log_level", config.log_level.as_str())],
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_dir.trim().is_empty() {
            return Err(ConfigError::Invalid("data_dir must not be empty".into()));
        }
        if self.lock_timeout_ms == 0 {
            return Err(ConfigError::Invalid("lock_timeout_ms must be > 0".into()));
        }
        if self.max_merge_depth == 0 || self.max_merge_depth > MAX_MERGE_DEPTH_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "max_merge_depth must be between 1 and {}",
                MAX_MERGE_DEPTH_LIMIT
            )));
        }
        if self.estimates_ttl_secs == 0 {
            return Err(ConfigError::Invalid("estimates_ttl_secs must be > 0".into()));
        }
        self.severity()?;
        Ok(())
    }

    pub fn severity(&self) -> Result<Severity, ConfigError> {
        Severity::parse(&self.log_level)
            .ok_or_else(|| ConfigError::Invalid(format!("unknown log_level '{}'", self.log_level)))
    }

    /// Applies the configured log level process-wide.
    pub fn apply_logging(&self) -> Result<(), ConfigError> {
        Logger::set_min_severity(self.severity()?);
        Ok(())
    }

    pub fn data_path(&self) -> &Path {
        Path::new(&self.data_dir)
    }

    /// Directory holding one subdirectory per collection.
    pub fn collections_path(&self) -> PathBuf {
        self.data_path().join("collections")
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Collaborators for the collections opened under this configuration.
    pub fn context(&self, tracker: Arc<dyn VersionTracker>) -> CollectionContext {
        CollectionContext {
            clock: Arc::new(HybridLogicalClock::new()),
            tracker,
            metrics: Arc::new(MetricsRegistry::new()),
            is_db_server: self.is_db_server,
            lock_timeout: self.lock_timeout(),
            max_merge_depth: self.max_merge_depth,
            estimates_ttl: Duration::from_secs(self.estimates_ttl_secs),
        }
    }
}
