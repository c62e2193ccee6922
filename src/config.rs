//! Configuration management for quotafs
//!
//! `QuotaConfig` is the immutable per-store configuration. `StoreSettings`
//! is what the binary loads from `quotafs.toml` plus `QUOTAFS_*` environment
//! overrides before building a store.

use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::StoreError;
use crate::storage::LARGE_FILE_THRESHOLD;

pub const DEFAULT_WARNING_THRESHOLD: f64 = 0.9;
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Quota limits for one store. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaConfig {
    max_bytes: u64,
    root_path: PathBuf,
    warning_threshold: f64,
    enforce: bool,
}

impl QuotaConfig {
    /// Enforcing config with the default warning threshold.
    pub fn new(root_path: impl Into<PathBuf>, max_bytes: u64) -> Result<Self, StoreError> {
        let root_path = root_path.into();
        if max_bytes == 0 {
            return Err(StoreError::InvalidConfig(
                "max_bytes must be greater than 0".into(),
            ));
        }
        if root_path.as_os_str().is_empty() {
            return Err(StoreError::InvalidConfig("root_path cannot be empty".into()));
        }
        Ok(Self {
            max_bytes,
            root_path,
            warning_threshold: DEFAULT_WARNING_THRESHOLD,
            enforce: true,
        })
    }

    pub fn with_warning_threshold(mut self, threshold: f64) -> Result<Self, StoreError> {
        // NaN fails both comparisons.
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(StoreError::InvalidConfig(format!(
                "warning_threshold must be in (0, 1], got {threshold}"
            )));
        }
        self.warning_threshold = threshold;
        Ok(self)
    }

    pub fn with_enforce(mut self, enforce: bool) -> Self {
        self.enforce = enforce;
        self
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    pub fn warning_threshold(&self) -> f64 {
        self.warning_threshold
    }

    pub fn enforce(&self) -> bool {
        self.enforce
    }

    pub(crate) fn with_root(&self, root_path: PathBuf) -> Self {
        Self {
            root_path,
            ..self.clone()
        }
    }
}

/// Which platform watch primitive backs change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchBackend {
    /// Native watcher, falling back to polling if it cannot start.
    #[default]
    Auto,
    Native,
    Polling,
}

/// Store tuning that is not part of the quota itself.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub cache_ttl: Duration,
    pub watch_backend: WatchBackend,
    pub poll_interval: Duration,
    pub event_capacity: usize,
    /// Files at or above this size are streamed by `open` instead of buffered.
    pub large_file_threshold: u64,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            watch_backend: WatchBackend::Auto,
            poll_interval: DEFAULT_POLL_INTERVAL,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            large_file_threshold: LARGE_FILE_THRESHOLD,
        }
    }
}

/// Settings file / environment representation.
#[derive(Debug, Deserialize, Clone)]
pub struct StoreSettings {
    /// Default storage root, used when no custom root has been persisted.
    pub root_path: String,

    pub max_bytes: u64,

    #[serde(default = "default_warning_threshold")]
    pub warning_threshold: f64,

    #[serde(default = "default_enforce")]
    pub enforce: bool,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    #[serde(default)]
    pub watch_backend: WatchBackend,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    #[serde(default = "default_large_file_threshold")]
    pub large_file_threshold_bytes: u64,

    /// File holding a user-chosen root, if any.
    #[serde(default)]
    pub root_state_file: Option<String>,
}

fn default_warning_threshold() -> f64 {
    DEFAULT_WARNING_THRESHOLD
}

fn default_enforce() -> bool {
    true
}

fn default_cache_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL.as_secs()
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

fn default_large_file_threshold() -> u64 {
    LARGE_FILE_THRESHOLD
}

impl StoreSettings {
    /// Load from `./quotafs.toml` (optional) with `QUOTAFS_*` overrides.
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from(Path::new("quotafs"), false)
    }

    /// Load from an explicit settings file, still honouring the environment.
    pub fn load_from(path: &Path, required: bool) -> Result<Self, config::ConfigError> {
        let name = path.to_string_lossy();
        let settings = Config::builder()
            .add_source(File::with_name(&name).required(required))
            .add_source(Environment::with_prefix("QUOTAFS").try_parsing(true))
            .build()?;
        let settings: StoreSettings = settings.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        if self.root_path.trim().is_empty() {
            return Err(config::ConfigError::Message(
                "root_path cannot be empty".into(),
            ));
        }

        if self.max_bytes == 0 {
            return Err(config::ConfigError::Message(
                "max_bytes must be greater than 0".into(),
            ));
        }

        if !(self.warning_threshold > 0.0 && self.warning_threshold <= 1.0) {
            return Err(config::ConfigError::Message(
                "warning_threshold must be in (0, 1]".into(),
            ));
        }

        if self.event_capacity == 0 {
            return Err(config::ConfigError::Message(
                "event_capacity must be greater than 0".into(),
            ));
        }

        if self.poll_interval_ms == 0 {
            return Err(config::ConfigError::Message(
                "poll_interval_ms must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Quota config for the given root (normally the PathProvider's answer).
    pub fn quota_config(&self, root_path: impl Into<PathBuf>) -> Result<QuotaConfig, StoreError> {
        Ok(QuotaConfig::new(root_path, self.max_bytes)?
            .with_warning_threshold(self.warning_threshold)?
            .with_enforce(self.enforce))
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            watch_backend: self.watch_backend,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            event_capacity: self.event_capacity,
            large_file_threshold: self.large_file_threshold_bytes,
        }
    }
}
