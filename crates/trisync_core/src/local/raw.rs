//! Raw notifications as delivered by a platform watcher.

use std::fmt;

use tokio::sync::mpsc;

use crate::error::{Result, SyncError};

/// What the platform reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawKind {
    /// An entry appeared.
    Created,
    /// Content or metadata changed.
    Modified,
    /// An entry disappeared.
    Removed,
    /// An entry moved; `path` is the destination.
    Renamed {
        /// Root-relative source path.
        from: String,
    },
}

/// One low-level notification. Paths are root-relative with `/` separators.
///
/// Notifications may be duplicated, reordered within a debounce window, or
/// lack an inode; the batcher copes with all three.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// What happened.
    pub kind: RawKind,
    /// Root-relative path.
    pub path: String,
    /// Whether the entry is a folder, when known.
    pub is_dir: Option<bool>,
    /// Inode or file id, when known.
    pub ino: Option<u64>,
}

impl RawEvent {
    /// An entry appeared.
    pub fn created(path: impl Into<String>) -> Self {
        Self::new(RawKind::Created, path)
    }

    /// Content or metadata changed.
    pub fn modified(path: impl Into<String>) -> Self {
        Self::new(RawKind::Modified, path)
    }

    /// An entry disappeared.
    pub fn removed(path: impl Into<String>) -> Self {
        Self::new(RawKind::Removed, path)
    }

    /// An entry moved from `from` to `to`.
    pub fn renamed(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::new(RawKind::Renamed { from: from.into() }, to)
    }

    fn new(kind: RawKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            is_dir: None,
            ino: None,
        }
    }

    /// Builder: set the inode.
    pub fn with_ino(mut self, ino: u64) -> Self {
        self.ino = Some(ino);
        self
    }

    /// Builder: mark the entry as a folder or a file.
    pub fn with_dir(mut self, is_dir: bool) -> Self {
        self.is_dir = Some(is_dir);
        self
    }
}

impl fmt::Display for RawEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            RawKind::Created => write!(f, "raw create {}", self.path),
            RawKind::Modified => write!(f, "raw modify {}", self.path),
            RawKind::Removed => write!(f, "raw remove {}", self.path),
            RawKind::Renamed { from } => write!(f, "raw rename {} -> {}", from, self.path),
        }
    }
}

/// Producer handle of the bounded raw event channel.
///
/// Cloneable; platform adapters running on their own thread use
/// [`RawEventSender::send_blocking`].
#[derive(Debug, Clone)]
pub struct RawEventSender {
    tx: mpsc::Sender<RawEvent>,
}

impl RawEventSender {
    pub(crate) fn new(tx: mpsc::Sender<RawEvent>) -> Self {
        Self { tx }
    }

    /// Queue a notification, waiting for room in the channel.
    pub async fn send(&self, event: RawEvent) -> Result<()> {
        self.tx.send(event).await.map_err(|_| SyncError::ChannelClosed)
    }

    /// Queue a notification from a thread outside the runtime.
    pub fn send_blocking(&self, event: RawEvent) -> Result<()> {
        self.tx
            .blocking_send(event)
            .map_err(|_| SyncError::ChannelClosed)
    }

    /// Whether the watcher stopped consuming.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
