//! Config command handlers

use std::path::{Path, PathBuf};

use trisync_core::config::Config;
use trisync_core::error::{Result, SyncError};
use trisync_core::path_identity::PlatformKind;

use super::load_config;

/// Handle the init command - create and save a configuration.
pub fn handle_init(
    config_path: Option<&Path>,
    path: PathBuf,
    platform: Option<PlatformKind>,
    cache: Option<PathBuf>,
    force: bool,
) -> Result<()> {
    let target = match config_path {
        Some(path) => path.to_path_buf(),
        None => Config::config_path().ok_or(SyncError::NoConfigDir)?,
    };
    if target.exists() && !force {
        eprintln!("Configuration already exists at {}", target.display());
        eprintln!("Use --force to overwrite it.");
        return Ok(());
    }

    let sync_path = absolute(expand_home(path))?;
    std::fs::create_dir_all(&sync_path).map_err(|e| SyncError::FileWrite {
        path: sync_path.clone(),
        source: e,
    })?;

    let mut config = Config::new(sync_path);
    config.platform = platform;
    config.cache_path = cache.map(expand_home);
    match config_path {
        Some(path) => config.save_to(path)?,
        None => config.save()?,
    }

    println!("✓ Initialized trisync");
    println!("  Sync root: {}", config.sync_path.display());
    println!("  Config file: {}", target.display());
    Ok(())
}

/// Handle the config command - print the configuration in effect.
pub fn handle_show(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let profile = config.profile();

    println!("trisync Configuration");
    println!("=====================");
    println!("Sync root: {}", config.sync_path.display());
    match config.cache_path() {
        Some(cache) => println!("Metadata cache: {}", cache.display()),
        None => println!("Metadata cache: (no data directory)"),
    }
    match config.platform {
        Some(kind) => println!("Platform: {:?}", kind),
        None => println!("Platform: this machine"),
    }
    println!(
        "  case sensitive: {}, unicode normalizing: {}, executable bits: {}",
        profile.case_sensitive, profile.normalizes_unicode, profile.native_executable
    );
    println!("Debounce: {} ms", config.debounce_ms);
    println!("I/O timeout: {} s", config.io_timeout_secs);
    println!("Parking after: {} failures", config.max_errors);
    if !config.ignore.is_empty() {
        println!("Ignored: {}", config.ignore.join(", "));
    }
    if let Some(path) = config_path.map(Path::to_path_buf).or_else(Config::config_path) {
        println!("Config file: {}", path.display());
    }
    Ok(())
}

/// Expand a leading `~` to the home directory.
fn expand_home(path: PathBuf) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path,
    }
}

fn absolute(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path);
    }
    Ok(std::env::current_dir()?.join(path))
}
