//! Configuration types for trisync.
//!
//! This module provides the [`Config`] struct which stores the sync root and
//! the tuning knobs of the engine. Configuration is persisted as TOML
//! (typically at `~/.config/trisync/config.toml` on Unix systems).
//!
//! # Key Configuration Fields
//!
//! - `sync_path`: the local directory kept in sync
//! - `cache_path`: persistent metadata cache location
//! - `platform`: override of the filesystem naming rules
//! - `debounce_ms`, `batch_capacity`: event producer batching
//! - `io_timeout_secs`, `max_errors`, `transient_retries`: failure policy
//! - `ignore`: extra glob patterns excluded from sync
//!
//! At runtime the engine consumes a [`SyncOptions`], derived with
//! [`Config::sync_options`].
//!
//! # Example
//!
//! ```ignore
//! use trisync_core::config::Config;
//! use std::path::PathBuf;
//!
//! let config = Config::new(PathBuf::from("/home/user/Sync"));
//! config.save()?;
//!
//! let options = Config::load()?.sync_options()?;
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, SyncError};
use crate::ignore::IgnoreRules;
use crate::path_identity::{PlatformKind, PlatformProfile};
use crate::path_restrictions::PathRestrictions;

/// Consecutive non-transient failures before a Doc is parked.
pub const DEFAULT_MAX_ERRORS: u32 = 5;

/// `Config` represents the parts of trisync that the user can configure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Local directory kept in sync
    pub sync_path: PathBuf,

    /// Metadata cache file (defaults to the user data directory)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_path: Option<PathBuf>,

    /// Filesystem naming rules; defaults to the running platform
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<PlatformKind>,

    /// Window during which raw notifications are coalesced into one batch
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Bound of the raw event and batch channels
    #[serde(default = "default_batch_capacity")]
    pub batch_capacity: usize,

    // ========================================================================
    // Failure policy
    // ========================================================================
    /// Upper bound on every filesystem or remote call
    #[serde(default = "default_io_timeout_secs")]
    pub io_timeout_secs: u64,

    /// Consecutive failures before a Doc is parked
    #[serde(default = "default_max_errors")]
    pub max_errors: u32,

    /// In-cycle retries for transient failures
    #[serde(default = "default_transient_retries")]
    pub transient_retries: u32,

    /// Base delay of the exponential retry backoff
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    // ========================================================================
    // Loop
    // ========================================================================
    /// Pause between reconciliation cycles
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Cross-entity applications in flight at the same tree depth
    #[serde(default = "default_apply_concurrency")]
    pub apply_concurrency: usize,

    /// Extra glob patterns excluded from sync
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore: Vec<String>,
}

fn default_debounce_ms() -> u64 {
    200
}

fn default_batch_capacity() -> usize {
    64
}

fn default_io_timeout_secs() -> u64 {
    30
}

fn default_max_errors() -> u32 {
    DEFAULT_MAX_ERRORS
}

fn default_transient_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    250
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_apply_concurrency() -> usize {
    4
}

impl Config {
    /// Create a new config with the given sync root and default settings
    pub fn new(sync_path: PathBuf) -> Self {
        Self {
            sync_path,
            cache_path: None,
            platform: None,
            debounce_ms: default_debounce_ms(),
            batch_capacity: default_batch_capacity(),
            io_timeout_secs: default_io_timeout_secs(),
            max_errors: default_max_errors(),
            transient_retries: default_transient_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            poll_interval_secs: default_poll_interval_secs(),
            apply_concurrency: default_apply_concurrency(),
            ignore: Vec::new(),
        }
    }

    /// Platform profile in effect.
    pub fn profile(&self) -> PlatformProfile {
        self.platform
            .map(PlatformKind::profile)
            .unwrap_or_else(PlatformProfile::current)
    }

    /// Metadata cache location, falling back to the user data directory.
    pub fn cache_path(&self) -> Option<PathBuf> {
        self.cache_path.clone().or_else(|| {
            dirs::data_dir().map(|dir| dir.join("trisync").join("cache.sqlite3"))
        })
    }

    /// Runtime options derived from this config.
    pub fn sync_options(&self) -> Result<SyncOptions> {
        let profile = self.profile();
        Ok(SyncOptions {
            root: self.sync_path.clone(),
            profile,
            debounce: Duration::from_millis(self.debounce_ms),
            batch_capacity: self.batch_capacity.max(1),
            io_timeout: Duration::from_secs(self.io_timeout_secs.max(1)),
            max_errors: self.max_errors.max(1),
            transient_retries: self.transient_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            apply_concurrency: self.apply_concurrency.max(1),
            ignore: IgnoreRules::new(&self.ignore, &profile)?,
        })
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| SyncError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save config to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create parent directory if needed
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents).map_err(|e| SyncError::FileWrite {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(())
    }

    /// Get the config file path (~/.config/trisync/config.toml)
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("trisync").join("config.toml"))
    }

    /// Load config from the default location.
    ///
    /// Unlike an editor preference there is no sensible default sync root, so
    /// a missing file is reported as [`SyncError::ConfigNotInitialized`].
    pub fn load() -> Result<Self> {
        let path = Self::config_path().ok_or(SyncError::NoConfigDir)?;
        if !path.exists() {
            return Err(SyncError::ConfigNotInitialized);
        }
        Self::load_from(&path)
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path().ok_or(SyncError::NoConfigDir)?;
        self.save_to(&path)
    }
}

/// Runtime settings shared by the producer and the orchestrator.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Absolute sync root.
    pub root: PathBuf,
    /// Filesystem naming rules.
    pub profile: PlatformProfile,
    /// Batching window of the event producer.
    pub debounce: Duration,
    /// Bound of the raw event and batch channels.
    pub batch_capacity: usize,
    /// Upper bound on every filesystem or remote call.
    pub io_timeout: Duration,
    /// Consecutive failures before a Doc is parked.
    pub max_errors: u32,
    /// In-cycle retries for transient failures.
    pub transient_retries: u32,
    /// Base delay of the exponential retry backoff.
    pub retry_backoff: Duration,
    /// Pause between reconciliation cycles.
    pub poll_interval: Duration,
    /// Cross-entity applications in flight at the same tree depth.
    pub apply_concurrency: usize,
    /// Excluded paths.
    pub ignore: IgnoreRules,
}

impl SyncOptions {
    /// Options with default tuning for a root and a profile.
    pub fn new(root: impl Into<PathBuf>, profile: PlatformProfile) -> Self {
        Self {
            root: root.into(),
            profile,
            debounce: Duration::from_millis(default_debounce_ms()),
            batch_capacity: default_batch_capacity(),
            io_timeout: Duration::from_secs(default_io_timeout_secs()),
            max_errors: default_max_errors(),
            transient_retries: default_transient_retries(),
            retry_backoff: Duration::from_millis(default_retry_backoff_ms()),
            poll_interval: Duration::from_secs(default_poll_interval_secs()),
            apply_concurrency: default_apply_concurrency(),
            ignore: IgnoreRules::builtin(&profile),
        }
    }

    /// Builder: set the debounce window.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Builder: set the retry policy.
    pub fn with_retries(mut self, max_errors: u32, transient_retries: u32, backoff: Duration) -> Self {
        self.max_errors = max_errors.max(1);
        self.transient_retries = transient_retries;
        self.retry_backoff = backoff;
        self
    }

    /// Builder: set the I/O timeout.
    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    /// Builder: set the ignore rules.
    pub fn with_ignore(mut self, ignore: IgnoreRules) -> Self {
        self.ignore = ignore;
        self
    }

    /// Naming limits for paths under this root.
    pub fn restrictions(&self) -> PathRestrictions {
        PathRestrictions::for_profile(&self.profile).with_root(&self.root)
    }
}
