use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Unified error type for trisync operations
#[derive(Debug, Error)]
pub enum SyncError {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Path '{0}' is outside of the sync root")]
    OutsideRoot(PathBuf),

    // Config errors
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Configuration not initialized. Run 'trisync init' first.")]
    ConfigNotInitialized,

    #[error("Invalid ignore pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    // Metadata cache errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Metadata store error: {0}")]
    Store(String),

    #[error("Metadata store is busy")]
    LockContention,

    // Event errors
    #[error("Invalid change event for '{path}': {reason}")]
    InvalidEvent { path: String, reason: String },

    #[error("Event channel closed")]
    ChannelClosed,

    #[cfg(feature = "watcher")]
    #[error("Watcher error: {0}")]
    Watcher(#[from] notify::Error),

    // Application errors
    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Remote error: {message}")]
    Remote { message: String, transient: bool },

    #[error("Remote conflict on document '{0}'")]
    RemoteConflict(String),

    #[error("Remote document '{0}' not found")]
    RemoteNotFound(String),

    #[error("Checksum mismatch for '{path}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("Content for '{0}' is not available on either side")]
    ContentUnavailable(String),

    #[error("Document '{0}' not found in metadata cache")]
    DocNotFound(String),

    #[error("Postponed '{path}': {reason}")]
    Deferred { path: String, reason: String },
}

/// Result type alias for trisync operations
pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// Build a remote failure that will be retried without counting against the error bound.
    pub fn remote_transient(message: impl Into<String>) -> Self {
        SyncError::Remote {
            message: message.into(),
            transient: true,
        }
    }

    /// Build a remote failure that counts against the error bound.
    pub fn remote_fatal(message: impl Into<String>) -> Self {
        SyncError::Remote {
            message: message.into(),
            transient: false,
        }
    }

    /// Whether the failure is expected to go away on its own (lock contention,
    /// timeouts, network hiccups). Transient failures are retried with backoff
    /// and never increment a Doc's `error_count`.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Timeout(_) | SyncError::LockContention | SyncError::RemoteConflict(_) => {
                true
            }
            SyncError::Remote { transient, .. } => *transient,
            SyncError::Io(e) | SyncError::FileRead { source: e, .. } | SyncError::FileWrite { source: e, .. } => {
                is_transient_io(e)
            }
            _ => false,
        }
    }

    /// Whether the Doc waits on another stage of the cycle. Deferred failures
    /// are neither retried in place nor counted against the error bound.
    pub fn is_deferred(&self) -> bool {
        matches!(self, SyncError::Deferred { .. })
    }

    /// Convert to a serializable representation for IPC
    pub fn to_serializable(&self) -> SerializableError {
        SerializableError::from(self)
    }
}

fn is_transient_io(err: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        err.kind(),
        ErrorKind::TimedOut
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
            | ErrorKind::ResourceBusy
    )
}

/// A serializable representation of SyncError for IPC (e.g., a status UI)
#[derive(Debug, Clone, Serialize)]
pub struct SerializableError {
    /// Error kind/variant name
    pub kind: String,
    /// Human-readable error message
    pub message: String,
    /// Associated path (if applicable)
    pub path: Option<PathBuf>,
}

impl From<&SyncError> for SerializableError {
    fn from(err: &SyncError) -> Self {
        let kind = match err {
            SyncError::Io(_) => "Io",
            SyncError::FileRead { .. } => "FileRead",
            SyncError::FileWrite { .. } => "FileWrite",
            SyncError::OutsideRoot(_) => "OutsideRoot",
            SyncError::ConfigParse(_) => "ConfigParse",
            SyncError::ConfigSerialize(_) => "ConfigSerialize",
            SyncError::NoConfigDir => "NoConfigDir",
            SyncError::ConfigNotInitialized => "ConfigNotInitialized",
            SyncError::InvalidPattern { .. } => "InvalidPattern",
            SyncError::Json(_) => "Json",
            #[cfg(feature = "sqlite")]
            SyncError::Sqlite(_) => "Sqlite",
            SyncError::Store(_) => "Store",
            SyncError::LockContention => "LockContention",
            SyncError::InvalidEvent { .. } => "InvalidEvent",
            SyncError::ChannelClosed => "ChannelClosed",
            #[cfg(feature = "watcher")]
            SyncError::Watcher(_) => "Watcher",
            SyncError::Timeout(_) => "Timeout",
            SyncError::Remote { .. } => "Remote",
            SyncError::RemoteConflict(_) => "RemoteConflict",
            SyncError::RemoteNotFound(_) => "RemoteNotFound",
            SyncError::ChecksumMismatch { .. } => "ChecksumMismatch",
            SyncError::ContentUnavailable(_) => "ContentUnavailable",
            SyncError::DocNotFound(_) => "DocNotFound",
            SyncError::Deferred { .. } => "Deferred",
        }
        .to_string();

        let path = match err {
            SyncError::FileRead { path, .. } => Some(path.clone()),
            SyncError::FileWrite { path, .. } => Some(path.clone()),
            SyncError::OutsideRoot(path) => Some(path.clone()),
            SyncError::InvalidEvent { path, .. } => Some(PathBuf::from(path)),
            SyncError::ChecksumMismatch { path, .. } => Some(PathBuf::from(path)),
            SyncError::ContentUnavailable(path) => Some(PathBuf::from(path)),
            SyncError::Deferred { path, .. } => Some(PathBuf::from(path)),
            _ => None,
        };

        Self {
            kind,
            message: err.to_string(),
            path,
        }
    }
}

impl From<SyncError> for SerializableError {
    fn from(err: SyncError) -> Self {
        SerializableError::from(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::time::Duration;

    #[test]
    fn test_transient_classification() {
        assert!(SyncError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(SyncError::LockContention.is_transient());
        assert!(SyncError::RemoteConflict("abc".into()).is_transient());
        assert!(SyncError::remote_transient("connection reset").is_transient());
        assert!(!SyncError::remote_fatal("forbidden").is_transient());
        assert!(!SyncError::ContentUnavailable("a.txt".into()).is_transient());
    }

    #[test]
    fn test_deferred_is_not_transient() {
        let err = SyncError::Deferred {
            path: "a.txt".into(),
            reason: "local edit not merged yet".into(),
        };
        assert!(err.is_deferred());
        assert!(!err.is_transient());
        assert_eq!(err.to_serializable().kind, "Deferred");
    }

    #[test]
    fn test_io_transient_kinds() {
        let busy = SyncError::Io(io::Error::new(io::ErrorKind::ResourceBusy, "locked"));
        assert!(busy.is_transient());

        let denied = SyncError::FileWrite {
            path: PathBuf::from("a.txt"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(!denied.is_transient());
    }

    #[test]
    fn test_serializable_error_carries_path() {
        let err = SyncError::ChecksumMismatch {
            path: "docs/a.txt".into(),
            expected: "x".into(),
            actual: "y".into(),
        };
        let ser = err.to_serializable();
        assert_eq!(ser.kind, "ChecksumMismatch");
        assert_eq!(ser.path, Some(PathBuf::from("docs/a.txt")));
        assert!(ser.message.contains("expected x"));
    }
}
