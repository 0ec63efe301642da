//! Command dispatch for the `trisync` binary.

/// Clap argument definitions
mod args;

/// `init` and `config` commands
mod config;

/// `scan` command
mod scan;

/// `status` and `unpark` commands
mod status;

/// `watch` command
mod watch;

use clap::Parser;
use std::path::Path;
use std::sync::Arc;

use trisync_core::config::{Config, SyncOptions};
use trisync_core::error::{Result, SyncError};
use trisync_core::events::ChangeEvent;
use trisync_core::merge::Merge;
use trisync_core::normalizer::PathNormalizer;
use trisync_core::store::{MetadataStore, SqliteStore};

pub use args::Cli;
use args::Commands;

/// Main entry point for the CLI. Returns whether the command succeeded.
pub fn run_cli() -> bool {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config_path = cli.config.as_deref();

    let result = match cli.command {
        Commands::Init {
            path,
            platform,
            cache,
            force,
        } => config::handle_init(config_path, path, platform, cache, force),
        Commands::Config => config::handle_show(config_path),
        Commands::Scan => Session::open(config_path).and_then(|s| scan::handle_scan(&s)),
        Commands::Status { json } => Session::open(config_path).and_then(|s| status::handle_status(&s, json)),
        Commands::Unpark { id } => Session::open(config_path).and_then(|s| status::handle_unpark(&s, &id)),
        Commands::Watch => Session::open(config_path).and_then(|s| watch::handle_watch(&s)),
    };

    match result {
        Ok(()) => true,
        Err(e) => {
            eprintln!("✗ {}", e);
            false
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

/// Load a config from an explicit path or the default location.
fn load_config(config_path: Option<&Path>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

/// Everything a command needs to touch the metadata cache.
pub struct Session {
    pub config: Config,
    pub options: SyncOptions,
    pub store: Arc<dyn MetadataStore>,
}

impl Session {
    fn open(config_path: Option<&Path>) -> Result<Self> {
        let config = load_config(config_path)?;
        let options = config.sync_options()?;
        let cache = config.cache_path().ok_or(SyncError::NoConfigDir)?;
        log::debug!("Opening metadata cache at {}", cache.display());
        let store = SqliteStore::open(&cache)?;
        Ok(Self {
            config,
            options,
            store: Arc::new(store),
        })
    }

    /// Merge engine writing to this session's cache.
    pub fn merge(&self) -> Merge {
        Merge::new(Arc::clone(&self.store), self.options.profile).with_restrictions(self.options.restrictions())
    }

    /// Normalize and merge a batch of local events. Returns the number of
    /// cache mutations.
    pub fn merge_local(&self, merge: &Merge, batch: Vec<ChangeEvent>) -> Result<usize> {
        let normalizer = PathNormalizer::new(self.options.profile);
        let events = normalizer.normalize_batch(self.store.as_ref(), batch)?;
        Ok(merge.apply_batch(&events)?.len())
    }
}
