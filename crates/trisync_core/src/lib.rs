//! Bidirectional sync between a local directory tree and a remote document
//! store, reconciled through a persistent metadata cache.
//!
//! ```text
//! OS notifications ──> local (producer/batcher) ──> normalizer ──┐
//!                                                               ├──> merge ──> store
//! remote feed ───────> remote::analysis ────────────────────────┘      │
//!                                                                      v
//!                                      sync (orchestrator, local and remote appliers)
//! ```
//!
//! Every entity is a [`doc::Doc`] keyed by a platform-folded id. Each Doc
//! carries a `target` generation plus the generation each replica has
//! applied; the orchestrator brings the lagging side up to date and the
//! merge engine keeps paths collision-free under the platform's naming rules.
#![warn(missing_docs)]

/// Content fingerprints (SHA-256, base64)
pub mod checksum;

/// Configuration file and runtime options
pub mod config;

/// Identity conflict resolution and conflict file names
pub mod conflict;

/// The Doc record and its generation counters
pub mod doc;

/// Error (common error types)
pub mod error;

/// Change events, domain events and subscribers
pub mod events;

/// Filesystem abstraction
pub mod fs;

/// Paths excluded from sync
pub mod ignore;

/// Local event producer: scan, batcher, watcher
pub mod local;

/// The merge engine
pub mod merge;

/// Unicode spelling reconciliation for local events
pub mod normalizer;

/// Platform naming rules and id derivation
pub mod path_identity;

/// Names the local platform cannot hold
pub mod path_restrictions;

/// Path utilities for root-relative sync paths
pub mod path_utils;

/// Remote store interface and feed analysis
pub mod remote;

/// Metadata cache backends
pub mod store;

/// Reconciliation cycles
pub mod sync;

pub use config::{Config, SyncOptions};
pub use doc::{Doc, DocKind, Side};
pub use error::{Result, SyncError};
pub use merge::Merge;
pub use path_identity::PlatformProfile;
pub use sync::{SyncEngine, SyncResult, SyncStatus};
