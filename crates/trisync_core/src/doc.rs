//! Metadata records for synced files and folders.
//!
//! A [`Doc`] is the single authoritative record of one logical file or folder,
//! shared by the local and remote replicas. Replicas agree on a record through
//! its [`Sides`] counters: `target` grows with every recorded change and each
//! side remembers the generation it has applied.
//!
//! Docs are never patched in place. Every mutation computes the next record
//! from the previous one and replaces it with a single `put`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::path_restrictions::Incompatibility;
use crate::path_utils;

/// Which replica a change came from, or which replica applies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// The local filesystem.
    Local,
    /// The remote document store.
    Remote,
}

impl Side {
    /// The opposite replica.
    pub fn other(self) -> Side {
        match self {
            Side::Local => Side::Remote,
            Side::Remote => Side::Local,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Local => write!(f, "local"),
            Side::Remote => write!(f, "remote"),
        }
    }
}

/// File or folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocKind {
    /// Regular file with content.
    File,
    /// Directory.
    Folder,
}

impl DocKind {
    /// Whether this is a folder.
    pub fn is_folder(self) -> bool {
        matches!(self, DocKind::Folder)
    }
}

/// Generation counters of a Doc.
///
/// `local <= target` and `remote <= target` always hold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sides {
    /// Generation of the latest recorded change.
    pub target: u64,
    /// Generation the local filesystem has applied.
    pub local: u64,
    /// Generation the remote store has applied.
    pub remote: u64,
}

impl Sides {
    /// Counters of a record first observed on `origin`.
    pub fn observed_on(origin: Side) -> Self {
        Sides::default().bump(origin)
    }

    /// Counter of one side.
    pub fn get(&self, side: Side) -> u64 {
        match side {
            Side::Local => self.local,
            Side::Remote => self.remote,
        }
    }

    /// Record a new change that `origin` already has.
    pub fn bump(self, origin: Side) -> Self {
        let target = self.target + 1;
        self.with(origin, target).with_target(target)
    }

    /// Record a new change that neither side has applied yet.
    pub fn bump_target(self) -> Self {
        self.with_target(self.target + 1)
    }

    /// Mark `side` as having applied `generation` (capped at `target`).
    pub fn applied(self, side: Side, generation: u64) -> Self {
        let value = generation.min(self.target).max(self.get(side));
        self.with(side, value)
    }

    /// Bring every counter to `target`.
    pub fn settle(self) -> Self {
        Sides {
            target: self.target,
            local: self.target,
            remote: self.target,
        }
    }

    /// Whether `side` still has to apply the latest change.
    pub fn behind(&self, side: Side) -> bool {
        self.get(side) < self.target
    }

    /// Whether all replicas agree.
    pub fn is_settled(&self) -> bool {
        self.local == self.target && self.remote == self.target
    }

    fn with(self, side: Side, value: u64) -> Self {
        match side {
            Side::Local => Sides { local: value, ..self },
            Side::Remote => Sides {
                remote: value,
                ..self
            },
        }
    }

    fn with_target(self, target: u64) -> Self {
        Sides { target, ..self }
    }
}

/// Previous location of a Doc whose current change is a move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveFrom {
    /// Id before the move.
    pub id: String,
    /// Path before the move.
    pub path: String,
    /// Set on descendants carried along by a folder move.
    #[serde(default)]
    pub child_move: bool,
}

/// What the remote store last told us about a Doc.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRef {
    /// Remote document id.
    pub id: String,
    /// Remote generation of the last observed or written revision.
    pub generation: u64,
    /// Path the remote store has for the document.
    pub path: String,
    /// Content fingerprint the remote store has.
    #[serde(default)]
    pub content_hash: Option<String>,
    /// Executable flag the remote store has.
    #[serde(default)]
    pub executable: bool,
}

/// Persisted metadata record for one logical file or folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Doc {
    /// Folded path, unique across the cache.
    pub id: String,
    /// Display path relative to the sync root.
    pub path: String,
    /// File or folder.
    pub kind: DocKind,
    /// Last known local inode.
    #[serde(default)]
    pub ino: Option<u64>,
    /// Content fingerprint (files only).
    #[serde(default)]
    pub content_hash: Option<String>,
    /// Size in bytes (files only).
    #[serde(default)]
    pub size: Option<u64>,
    /// Fingerprint of the bytes last known to be on the local disk.
    #[serde(default)]
    pub local_hash: Option<String>,
    /// Executable flag (files only).
    #[serde(default)]
    pub executable: bool,
    /// Logical modification time.
    pub updated_at: DateTime<Utc>,
    /// Generation counters.
    pub sides: Sides,
    /// Previous location while a move is being propagated.
    #[serde(default)]
    pub move_from: Option<MoveFrom>,
    /// Remote document this record is associated with.
    #[serde(default)]
    pub remote: Option<RemoteRef>,
    /// Remote document that a move onto this path replaced.
    #[serde(default)]
    pub overwrite: Option<RemoteRef>,
    /// Soft-deleted on the remote side.
    #[serde(default)]
    pub trashed: bool,
    /// Awaiting removal from the cache.
    #[serde(default)]
    pub deleted: bool,
    /// Consecutive application failures.
    #[serde(default)]
    pub error_count: u32,
    /// Excluded from automatic retries after too many failures.
    #[serde(default)]
    pub parked: bool,
    /// Message of the last application failure.
    #[serde(default)]
    pub last_error: Option<String>,
    /// Why the path cannot exist on the local platform.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub incompatibilities: Vec<Incompatibility>,
    /// Storage revision, assigned by the metadata store on `put`.
    #[serde(default)]
    pub rev: u64,
}

impl Doc {
    /// A fresh record first observed on `origin`.
    pub fn new(id: impl Into<String>, path: impl Into<String>, kind: DocKind, origin: Side) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            kind,
            ino: None,
            content_hash: None,
            size: None,
            local_hash: None,
            executable: false,
            updated_at: Utc::now(),
            sides: Sides::observed_on(origin),
            move_from: None,
            remote: None,
            overwrite: None,
            trashed: false,
            deleted: false,
            error_count: 0,
            parked: false,
            last_error: None,
            incompatibilities: Vec::new(),
            rev: 0,
        }
    }

    /// Builder: set the local inode.
    pub fn with_ino(mut self, ino: Option<u64>) -> Self {
        self.ino = ino;
        self
    }

    /// Builder: set the content fingerprint and size.
    pub fn with_content(mut self, content_hash: Option<String>, size: Option<u64>) -> Self {
        self.content_hash = content_hash;
        self.size = size;
        self
    }

    /// Builder: set the remote reference.
    pub fn with_remote(mut self, remote: Option<RemoteRef>) -> Self {
        self.remote = remote;
        self
    }

    /// Builder: set the executable flag.
    pub fn with_executable(mut self, executable: bool) -> Self {
        self.executable = executable;
        self
    }

    /// Builder: set the modification time.
    pub fn with_updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = updated_at;
        self
    }

    /// Whether this is a folder.
    pub fn is_folder(&self) -> bool {
        self.kind.is_folder()
    }

    /// Neither trashed nor deleted.
    pub fn is_live(&self) -> bool {
        !self.trashed && !self.deleted
    }

    /// Whether the path cannot exist on the local platform.
    pub fn is_incompatible(&self) -> bool {
        !self.incompatibilities.is_empty()
    }

    /// Whether all replicas agree on this record.
    pub fn is_settled(&self) -> bool {
        self.sides.is_settled()
    }

    /// Path of the parent folder (`""` at top level).
    pub fn parent_path(&self) -> &str {
        path_utils::parent(&self.path)
    }

    /// Tree depth of the current path.
    pub fn depth(&self) -> usize {
        path_utils::depth(&self.path)
    }

    /// Whether the other replica never received any generation of this record.
    pub fn unknown_to(&self, side: Side) -> bool {
        self.sides.get(side) == 0
    }

    /// Whether the fingerprint (and, when `compare_exec`, the executable flag) match.
    pub fn same_content(&self, content_hash: Option<&str>, executable: bool, compare_exec: bool) -> bool {
        if self.is_folder() {
            return true;
        }
        self.content_hash.as_deref() == content_hash && (!compare_exec || self.executable == executable)
    }

    /// Whether this record carries a pending move that started locally and has
    /// not reached the remote store yet.
    pub fn has_pending_local_move(&self) -> bool {
        self.move_from.is_some() && self.sides.local > self.sides.remote
    }

    /// Next record for a content or metadata change recorded on `origin`.
    pub fn updated(&self, origin: Side) -> Doc {
        Doc {
            sides: self.sides.bump(origin),
            error_count: 0,
            parked: false,
            last_error: None,
            ..self.clone()
        }
    }
}
