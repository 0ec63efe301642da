//! Change events flowing into the merge engine.
//!
//! A [`ChangeEvent`] is one structured observation of one entity, tagged with
//! the replica it was observed on. Events are transient and never persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::doc::{DocKind, RemoteRef, Side};

/// What happened to the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// A new entity appeared.
    Created,
    /// Content or metadata changed.
    Modified,
    /// The entity disappeared.
    Deleted,
    /// The entity moved from `old_path` to `path`.
    Renamed,
    /// The entity was found by a full tree walk.
    Scan,
}

impl ChangeKind {
    /// Get the kind as a string.
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Created => "created",
            ChangeKind::Modified => "modified",
            ChangeKind::Deleted => "deleted",
            ChangeKind::Renamed => "renamed",
            ChangeKind::Scan => "scan",
        }
    }
}

/// Content and metadata observed alongside an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStats {
    /// Size in bytes (0 for folders).
    pub size: u64,
    /// Modification time reported by the replica.
    pub modified_at: DateTime<Utc>,
    /// Executable flag as normalized for the platform.
    #[serde(default)]
    pub executable: bool,
    /// Content fingerprint, files only.
    #[serde(default)]
    pub content_hash: Option<String>,
}

impl FileStats {
    /// Stats of a folder.
    pub fn folder(modified_at: DateTime<Utc>) -> Self {
        Self {
            size: 0,
            modified_at,
            executable: false,
            content_hash: None,
        }
    }

    /// Stats of a file.
    pub fn file(size: u64, modified_at: DateTime<Utc>, content_hash: impl Into<String>) -> Self {
        Self {
            size,
            modified_at,
            executable: false,
            content_hash: Some(content_hash.into()),
        }
    }

    /// Builder: set the executable flag.
    pub fn executable(mut self, executable: bool) -> Self {
        self.executable = executable;
        self
    }
}

/// One structured observation, relative to the sync root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Replica the change was observed on.
    pub origin: Side,
    /// What happened.
    pub kind: ChangeKind,
    /// File or folder.
    pub entity: DocKind,
    /// Current path (destination for renames).
    pub path: String,
    /// Previous path, renames only.
    #[serde(default)]
    pub old_path: Option<String>,
    /// Local inode, when known.
    #[serde(default)]
    pub ino: Option<u64>,
    /// Content and metadata, when known.
    #[serde(default)]
    pub stats: Option<FileStats>,
    /// Remote document state, remote origin only.
    #[serde(default)]
    pub remote: Option<RemoteRef>,
}

impl ChangeEvent {
    /// Create an event observed on the local filesystem.
    pub fn local(kind: ChangeKind, entity: DocKind, path: impl Into<String>) -> Self {
        Self {
            origin: Side::Local,
            kind,
            entity,
            path: path.into(),
            old_path: None,
            ino: None,
            stats: None,
            remote: None,
        }
    }

    /// Create an event observed on the remote store.
    pub fn remote(kind: ChangeKind, entity: DocKind, path: impl Into<String>, remote: RemoteRef) -> Self {
        Self {
            origin: Side::Remote,
            kind,
            entity,
            path: path.into(),
            old_path: None,
            ino: None,
            stats: None,
            remote: Some(remote),
        }
    }

    /// Create a local rename event.
    pub fn local_rename(entity: DocKind, old_path: impl Into<String>, path: impl Into<String>) -> Self {
        Self::local(ChangeKind::Renamed, entity, path).with_old_path(old_path)
    }

    /// Builder: set the previous path.
    pub fn with_old_path(mut self, old_path: impl Into<String>) -> Self {
        self.old_path = Some(old_path.into());
        self
    }

    /// Builder: set the inode.
    pub fn with_ino(mut self, ino: Option<u64>) -> Self {
        self.ino = ino;
        self
    }

    /// Builder: set the stats.
    pub fn with_stats(mut self, stats: FileStats) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Same event with a different kind, used when an event is resynthesized.
    pub fn as_kind(&self, kind: ChangeKind) -> Self {
        Self {
            kind,
            old_path: if kind == ChangeKind::Renamed {
                self.old_path.clone()
            } else {
                None
            },
            ..self.clone()
        }
    }

    /// Content fingerprint carried by the event.
    pub fn content_hash(&self) -> Option<&str> {
        self.stats.as_ref().and_then(|s| s.content_hash.as_deref())
    }

    /// Executable flag carried by the event.
    pub fn executable(&self) -> bool {
        self.stats.as_ref().is_some_and(|s| s.executable)
    }

    /// Size carried by the event.
    pub fn size(&self) -> Option<u64> {
        self.stats.as_ref().map(|s| s.size)
    }

    /// Modification time carried by the event, or now.
    pub fn modified_at(&self) -> DateTime<Utc> {
        self.stats
            .as_ref()
            .map(|s| s.modified_at)
            .unwrap_or_else(Utc::now)
    }

    /// Whether this event creates or re-observes an entity.
    pub fn is_creation(&self) -> bool {
        matches!(self.kind, ChangeKind::Created | ChangeKind::Scan)
    }
}

impl std::fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.old_path {
            Some(old) => write!(f, "{} {} {} -> {}", self.origin, self.kind.as_str(), old, self.path),
            None => write!(f, "{} {} {}", self.origin, self.kind.as_str(), self.path),
        }
    }
}
