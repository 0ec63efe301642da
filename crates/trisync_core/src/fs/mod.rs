//! Local filesystem abstraction.
//!
//! The [`FileSystem`] trait covers what the sync engine needs from the local
//! replica: stat with inode and mode, content read/write, directory creation,
//! moves and executable-bit writes. Paths are absolute.
//!
//! Implementations are synchronous. The orchestrator runs them on the blocking
//! pool under a timeout, so a hung mount cannot stall the reconciliation loop.

mod mode;
mod native;

pub use mode::{DEFAULT_MODE, EXECUTABLE_MODE, ModePolicy, OWNER_EXECUTE};
pub use native::RealFileSystem;

use std::future::Future;
use std::io::Result;
use std::path::Path;
use std::pin::Pin;

use chrono::{DateTime, Utc};

use crate::checksum;

/// A boxed future for object-safe async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Metadata of one filesystem entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    /// Inode or file id, when the platform exposes a stable one.
    pub ino: Option<u64>,
    /// Whether the entry is a directory.
    pub is_dir: bool,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub modified_at: DateTime<Utc>,
    /// Raw permission bits (0 when the platform has none).
    pub mode: u32,
}

/// Abstraction over local filesystem operations.
/// Send + Sync required because operations run on the blocking pool.
pub trait FileSystem: Send + Sync {
    /// Stat an entry without following a final symlink.
    fn stat(&self, path: &Path) -> Result<FileStat>;

    /// Checks if an entry exists.
    fn exists(&self, path: &Path) -> bool {
        self.stat(path).is_ok()
    }

    /// Read a whole file.
    fn read_binary(&self, path: &Path) -> Result<Vec<u8>>;

    /// Create or truncate a file with the given content.
    fn write_binary(&self, path: &Path, content: &[u8]) -> Result<()>;

    /// Creates a directory and all parent directories.
    fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Move an entry.
    ///
    /// Errors if the source does not exist or if the destination exists and is
    /// a different entry (a case-only rename of the same entry is allowed).
    fn move_path(&self, from: &Path, to: &Path) -> Result<()>;

    /// Remove a file or a directory tree.
    fn remove_all(&self, path: &Path) -> Result<()>;

    /// Replace the permission bits of a file.
    fn set_mode(&self, path: &Path, mode: u32) -> Result<()>;

    /// Content fingerprint of a file.
    fn checksum(&self, path: &Path) -> Result<String> {
        Ok(checksum::checksum_bytes(&self.read_binary(path)?))
    }
}

impl<T: FileSystem + ?Sized> FileSystem for std::sync::Arc<T> {
    fn stat(&self, path: &Path) -> Result<FileStat> {
        (**self).stat(path)
    }

    fn exists(&self, path: &Path) -> bool {
        (**self).exists(path)
    }

    fn read_binary(&self, path: &Path) -> Result<Vec<u8>> {
        (**self).read_binary(path)
    }

    fn write_binary(&self, path: &Path, content: &[u8]) -> Result<()> {
        (**self).write_binary(path, content)
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        (**self).create_dir_all(path)
    }

    fn move_path(&self, from: &Path, to: &Path) -> Result<()> {
        (**self).move_path(from, to)
    }

    fn remove_all(&self, path: &Path) -> Result<()> {
        (**self).remove_all(path)
    }

    fn set_mode(&self, path: &Path, mode: u32) -> Result<()> {
        (**self).set_mode(path, mode)
    }

    fn checksum(&self, path: &Path) -> Result<String> {
        (**self).checksum(path)
    }
}
