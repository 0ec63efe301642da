//! The remote document store.
//!
//! The remote replica is reachable only through an API that exposes a linear
//! feed of document revisions ([`RemoteStore::changes_since`]) and a handful
//! of write operations. Every write is conditional on the generation the
//! caller last saw; a stale generation fails with
//! [`SyncError::RemoteConflict`](crate::error::SyncError::RemoteConflict),
//! which is transient: the next pull refreshes the generation.
//!
//! - [`analysis`]: turns feed entries into change events
//! - [`MemoryRemote`]: in-memory implementation for tests and demos

pub mod analysis;
mod memory;

pub use analysis::{analyze, analyze_changes};
pub use memory::MemoryRemote;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::doc::{DocKind, RemoteRef};
use crate::error::Result;
use crate::events::FileStats;
use crate::fs::BoxFuture;

/// One entry of the remote feed: the latest revision of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDoc {
    /// Stable remote id.
    pub id: String,
    /// Root-relative path in the remote tree.
    pub path: String,
    /// File or folder.
    pub kind: DocKind,
    /// Content fingerprint, files only.
    #[serde(default)]
    pub content_hash: Option<String>,
    /// Size in bytes, files only.
    #[serde(default)]
    pub size: Option<u64>,
    /// Executable flag.
    #[serde(default)]
    pub executable: bool,
    /// Moved to the remote trash.
    #[serde(default)]
    pub trashed: bool,
    /// Feed position of this revision.
    pub generation: u64,
    /// Modification time recorded by the remote.
    pub updated_at: DateTime<Utc>,
}

impl RemoteDoc {
    /// Reference to this revision, as stored on a Doc.
    pub fn to_ref(&self) -> RemoteRef {
        RemoteRef {
            id: self.id.clone(),
            generation: self.generation,
            path: self.path.clone(),
            content_hash: self.content_hash.clone(),
            executable: self.executable,
        }
    }

    /// Stats carried into change events.
    pub fn stats(&self) -> FileStats {
        match self.kind {
            DocKind::Folder => FileStats::folder(self.updated_at),
            DocKind::File => FileStats {
                size: self.size.unwrap_or(0),
                modified_at: self.updated_at,
                executable: self.executable,
                content_hash: self.content_hash.clone(),
            },
        }
    }
}

/// One page of the remote feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteChanges {
    /// Revisions in feed order.
    pub docs: Vec<RemoteDoc>,
    /// Generation to resume from.
    pub last_generation: u64,
}

/// API of the remote document store.
pub trait RemoteStore: Send + Sync {
    /// Revisions after `generation`, oldest first.
    fn changes_since<'a>(&'a self, generation: u64) -> BoxFuture<'a, Result<RemoteChanges>>;

    /// Create a document. The parent folder must exist remotely.
    fn create<'a>(
        &'a self,
        path: &'a str,
        kind: DocKind,
        content: Option<&'a [u8]>,
        executable: bool,
    ) -> BoxFuture<'a, Result<RemoteDoc>>;

    /// Replace the content and executable flag of a file.
    fn update<'a>(
        &'a self,
        remote: &'a RemoteRef,
        content: &'a [u8],
        executable: bool,
    ) -> BoxFuture<'a, Result<RemoteDoc>>;

    /// Move a document; a folder carries its descendants along.
    fn move_to<'a>(&'a self, remote: &'a RemoteRef, path: &'a str) -> BoxFuture<'a, Result<RemoteDoc>>;

    /// Move a document to the remote trash. Trashing a trashed document is a no-op.
    fn trash<'a>(&'a self, remote: &'a RemoteRef) -> BoxFuture<'a, Result<RemoteDoc>>;

    /// Content of the revision `remote` points at.
    fn download<'a>(&'a self, remote: &'a RemoteRef) -> BoxFuture<'a, Result<Vec<u8>>>;
}

impl<T: RemoteStore + ?Sized> RemoteStore for std::sync::Arc<T> {
    fn changes_since<'a>(&'a self, generation: u64) -> BoxFuture<'a, Result<RemoteChanges>> {
        (**self).changes_since(generation)
    }

    fn create<'a>(
        &'a self,
        path: &'a str,
        kind: DocKind,
        content: Option<&'a [u8]>,
        executable: bool,
    ) -> BoxFuture<'a, Result<RemoteDoc>> {
        (**self).create(path, kind, content, executable)
    }

    fn update<'a>(
        &'a self,
        remote: &'a RemoteRef,
        content: &'a [u8],
        executable: bool,
    ) -> BoxFuture<'a, Result<RemoteDoc>> {
        (**self).update(remote, content, executable)
    }

    fn move_to<'a>(&'a self, remote: &'a RemoteRef, path: &'a str) -> BoxFuture<'a, Result<RemoteDoc>> {
        (**self).move_to(remote, path)
    }

    fn trash<'a>(&'a self, remote: &'a RemoteRef) -> BoxFuture<'a, Result<RemoteDoc>> {
        (**self).trash(remote)
    }

    fn download<'a>(&'a self, remote: &'a RemoteRef) -> BoxFuture<'a, Result<Vec<u8>>> {
        (**self).download(remote)
    }
}
