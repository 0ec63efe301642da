//! Command-line argument structures and enums

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use trisync_core::path_identity::PlatformKind;

#[derive(Parser)]
#[command(name = "trisync")]
#[command(version)]
#[command(about = "Keep a local directory in sync with a remote document store", long_about = None)]
pub struct Cli {
    /// Use this config file instead of the default location
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Show debug output (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the configuration for a sync root
    Init {
        /// Local directory to keep in sync
        path: PathBuf,

        /// Filesystem naming rules (linux, macos, windows); defaults to this machine
        #[arg(long)]
        platform: Option<PlatformKind>,

        /// Metadata cache file (defaults to the user data directory)
        #[arg(long)]
        cache: Option<PathBuf>,

        /// Overwrite an existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show the current configuration
    Config,

    /// Walk the sync root once and record what changed in the metadata cache
    Scan,

    /// Show pending and parked documents
    Status {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },

    /// Re-enable automatic retries for a parked document
    Unpark {
        /// Document id, as printed by `trisync status`
        id: String,
    },

    /// Watch the sync root and record changes until interrupted
    Watch,
}
