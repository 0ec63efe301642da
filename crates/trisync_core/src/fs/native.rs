//! Native filesystem implementation.

use std::fs::{self, File};
use std::io::{Error, ErrorKind, Result};
use std::path::Path;

use chrono::{DateTime, Utc};

use super::{FileStat, FileSystem};
use crate::checksum;

/// This is a simple filesystem implementation that maps to std::fs methods
#[derive(Debug, Clone, Copy, Default)]
pub struct RealFileSystem;

/// Inode and permission bits of an entry, where the platform has them.
#[cfg(unix)]
pub(crate) fn ino_and_mode(meta: &fs::Metadata) -> (Option<u64>, u32) {
    use std::os::unix::fs::MetadataExt;
    (Some(meta.ino()), meta.mode())
}

/// Inode and permission bits of an entry, where the platform has them.
#[cfg(not(unix))]
pub(crate) fn ino_and_mode(_meta: &fs::Metadata) -> (Option<u64>, u32) {
    (None, 0)
}

pub(crate) fn stat_from_metadata(meta: &fs::Metadata) -> FileStat {
    let (ino, mode) = ino_and_mode(meta);
    let modified_at = meta
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    FileStat {
        ino,
        is_dir: meta.is_dir(),
        size: if meta.is_dir() { 0 } else { meta.len() },
        modified_at,
        mode,
    }
}

fn same_entry(a: &Path, b: &Path) -> bool {
    match (fs::symlink_metadata(a), fs::symlink_metadata(b)) {
        (Ok(ma), Ok(mb)) => {
            let (ia, _) = ino_and_mode(&ma);
            let (ib, _) = ino_and_mode(&mb);
            ia.is_some() && ia == ib
        }
        _ => false,
    }
}

impl FileSystem for RealFileSystem {
    fn stat(&self, path: &Path) -> Result<FileStat> {
        fs::symlink_metadata(path).map(|meta| stat_from_metadata(&meta))
    }

    fn exists(&self, path: &Path) -> bool {
        fs::symlink_metadata(path).is_ok()
    }

    fn read_binary(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path)
    }

    fn write_binary(&self, path: &Path, content: &[u8]) -> Result<()> {
        fs::write(path, content)
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)
    }

    fn move_path(&self, from: &Path, to: &Path) -> Result<()> {
        if !self.exists(from) {
            return Err(Error::new(
                ErrorKind::NotFound,
                format!("Source not found: {:?}", from),
            ));
        }
        if self.exists(to) && !same_entry(from, to) {
            return Err(Error::new(
                ErrorKind::AlreadyExists,
                format!("Destination already exists: {:?}", to),
            ));
        }

        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::rename(from, to)
    }

    fn remove_all(&self, path: &Path) -> Result<()> {
        let meta = fs::symlink_metadata(path)?;
        if meta.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        }
    }

    #[cfg(unix)]
    fn set_mode(&self, path: &Path, mode: u32) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
    }

    #[cfg(not(unix))]
    fn set_mode(&self, _path: &Path, _mode: u32) -> Result<()> {
        Ok(())
    }

    fn checksum(&self, path: &Path) -> Result<String> {
        checksum::checksum_reader(File::open(path)?)
    }
}
