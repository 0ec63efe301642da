//! Bringing the local tree up to date with a Doc.
//!
//! Filesystem calls run on the blocking pool. Downloads are written into the
//! internal temp directory, checked against the expected fingerprint and only
//! then renamed into place; whatever they replace, and every local deletion,
//! is moved under `.trisync-tmp/trash/` rather than removed.
//!
//! A file is only replaced or removed while it still holds the bytes the cache
//! last recorded for the local side (`Doc::local_hash`). Anything else is an
//! edit the scan has not merged yet; the application is deferred so the merge
//! can fork a conflict copy first.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, warn};
use uuid::Uuid;

use crate::checksum;
use crate::doc::{Doc, RemoteRef};
use crate::error::{Result, SyncError};
use crate::fs::{FileStat, FileSystem, ModePolicy};
use crate::ignore::TMP_DIR_NAME;
use crate::merge::Applied;
use crate::path_utils;
use crate::remote::RemoteStore;

/// Applies Docs to the local filesystem.
pub(crate) struct LocalApplier {
    tree: Tree,
    remote: Arc<dyn RemoteStore>,
}

impl LocalApplier {
    pub(crate) fn new(
        fs: Arc<dyn FileSystem>,
        remote: Arc<dyn RemoteStore>,
        root: PathBuf,
        modes: ModePolicy,
    ) -> Self {
        Self {
            tree: Tree { fs, root, modes },
            remote,
        }
    }

    /// Make the local tree match the Doc's current generation.
    pub(crate) async fn apply(&self, doc: &Doc) -> Result<Applied> {
        if doc.is_incompatible() {
            return self.blocking(doc, |tree, doc| tree.skip_incompatible(doc)).await;
        }
        if !doc.is_live() {
            return self.blocking(doc, |tree, doc| tree.remove(doc)).await;
        }
        if doc.is_folder() {
            return self.blocking(doc, |tree, doc| tree.place_folder(doc)).await;
        }

        if let Some(applied) = self.blocking(doc, |tree, doc| tree.place_file(doc)).await? {
            return Ok(applied);
        }
        let remote = doc
            .remote
            .as_ref()
            .ok_or_else(|| SyncError::ContentUnavailable(doc.path.clone()))?;
        let content = self.remote.download(remote).await?;
        verify(doc, remote, &content)?;
        debug!("Downloaded {} ({} bytes)", doc.path, content.len());
        self.blocking(doc, move |tree, doc| tree.write_file(doc, &content))
            .await
    }

    async fn blocking<T, F>(&self, doc: &Doc, op: F) -> Result<T>
    where
        F: FnOnce(&Tree, &Doc) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let tree = self.tree.clone();
        let doc = doc.clone();
        tokio::task::spawn_blocking(move || op(&tree, &doc))
            .await
            .map_err(|e| SyncError::Io(std::io::Error::other(e)))?
    }
}

/// Downloaded bytes must match the revision they were requested for.
fn verify(doc: &Doc, remote: &RemoteRef, content: &[u8]) -> Result<()> {
    let Some(expected) = remote.content_hash.as_ref().or(doc.content_hash.as_ref()) else {
        return Ok(());
    };
    let actual = checksum::checksum_bytes(content);
    if *expected != actual {
        return Err(SyncError::ChecksumMismatch {
            path: doc.path.clone(),
            expected: expected.clone(),
            actual,
        });
    }
    Ok(())
}

#[derive(Clone)]
struct Tree {
    fs: Arc<dyn FileSystem>,
    root: PathBuf,
    modes: ModePolicy,
}

impl Tree {
    fn abs(&self, path: &str) -> PathBuf {
        path_utils::to_absolute(&self.root, path)
    }

    fn stat(&self, path: &str) -> Result<Option<FileStat>> {
        let abs = self.abs(path);
        match self.fs.stat(&abs) {
            Ok(stat) => Ok(Some(stat)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SyncError::FileRead { path: abs, source: e }),
        }
    }

    fn write_err(path: &Path) -> impl FnOnce(std::io::Error) -> SyncError + '_ {
        move |source| SyncError::FileWrite {
            path: path.to_path_buf(),
            source,
        }
    }

    fn ensure_parent(&self, path: &str) -> Result<()> {
        let parent = path_utils::parent(path);
        if parent.is_empty() {
            return Ok(());
        }
        let abs = self.abs(parent);
        self.fs.create_dir_all(&abs).map_err(Self::write_err(&abs))
    }

    fn tmp_dir(&self, sub: Option<&str>) -> Result<PathBuf> {
        let mut dir = self.root.join(TMP_DIR_NAME);
        if let Some(sub) = sub {
            dir = dir.join(sub);
        }
        self.fs.create_dir_all(&dir).map_err(Self::write_err(&dir))?;
        Ok(dir)
    }

    /// Move an entry into the local trash.
    fn trash(&self, path: &str) -> Result<()> {
        let from = self.abs(path);
        let to = self
            .tmp_dir(Some("trash"))?
            .join(format!("{}-{}", Uuid::new_v4().simple(), path_utils::leaf(path)));
        self.fs.move_path(&from, &to).map_err(Self::write_err(&from))?;
        debug!("Moved {} to the local trash", path);
        Ok(())
    }

    fn checksum(&self, path: &str) -> Result<String> {
        let abs = self.abs(path);
        self.fs
            .checksum(&abs)
            .map_err(|source| SyncError::FileRead { path: abs, source })
    }

    /// Fail with a deferral unless the file at `doc.path` holds `actual`
    /// bytes the cache has already seen locally.
    fn ensure_observed(&self, doc: &Doc, actual: &str) -> Result<()> {
        if doc.local_hash.as_deref() == Some(actual) {
            return Ok(());
        }
        Err(SyncError::Deferred {
            path: doc.path.clone(),
            reason: "the local file changed since it was last merged".to_string(),
        })
    }

    fn remove(&self, doc: &Doc) -> Result<Applied> {
        match self.stat(&doc.path)? {
            Some(stat) if stat.is_dir == doc.is_folder() && same_ino(doc.ino, stat.ino) => {
                if !stat.is_dir && doc.local_hash.is_some() {
                    let actual = self.checksum(&doc.path)?;
                    self.ensure_observed(doc, &actual)?;
                }
                self.trash(&doc.path)?;
            }
            Some(_) => debug!("{} now holds another entry, left in place", doc.path),
            None => debug!("{} already gone locally", doc.path),
        }
        Ok(Applied::default())
    }

    fn place_folder(&self, doc: &Doc) -> Result<Applied> {
        self.move_from_source(doc)?;
        match self.stat(&doc.path)? {
            Some(stat) if stat.is_dir => {}
            Some(_) => {
                self.trash(&doc.path)?;
                self.create_dir(&doc.path)?;
            }
            None => self.create_dir(&doc.path)?,
        }
        self.applied(doc)
    }

    fn create_dir(&self, path: &str) -> Result<()> {
        let abs = self.abs(path);
        self.fs.create_dir_all(&abs).map_err(Self::write_err(&abs))?;
        debug!("Created folder {}", path);
        Ok(())
    }

    /// Put a file in place without downloading when possible. `None` means
    /// the content has to come from the remote store.
    fn place_file(&self, doc: &Doc) -> Result<Option<Applied>> {
        self.move_from_source(doc)?;
        let Some(stat) = self.stat(&doc.path)? else {
            return Ok(None);
        };
        if stat.is_dir {
            self.trash(&doc.path)?;
            return Ok(None);
        }
        let Some(expected) = &doc.content_hash else {
            return self.finish(doc).map(Some);
        };
        let actual = self.checksum(&doc.path)?;
        if actual == *expected {
            return self.finish(doc).map(Some);
        }
        self.ensure_observed(doc, &actual)?;
        Ok(None)
    }

    /// Leave a Doc the platform cannot hold out of the local tree. A remote
    /// move from a valid name takes the old local entry away.
    fn skip_incompatible(&self, doc: &Doc) -> Result<Applied> {
        if doc.is_live()
            && let Some(from) = doc.move_from.as_ref().filter(|m| !m.child_move)
            && let Some(source) = self.stat(&from.path)?
            && source.is_dir == doc.is_folder()
            && same_ino(doc.ino, source.ino)
        {
            warn!("Trashing local {} since it was renamed to {} remotely", from.path, doc.path);
            self.trash(&from.path)?;
        }
        if let Some(issue) = doc.incompatibilities.first() {
            warn!("Not syncing {} locally: {}", doc.path, issue);
        }
        Ok(Applied::default())
    }

    /// Carry out the physical move recorded in `move_from`. Children carried
    /// by a folder move need nothing; a missing source falls back to the
    /// regular placement (creation or download).
    fn move_from_source(&self, doc: &Doc) -> Result<()> {
        let Some(from) = doc.move_from.as_ref().filter(|m| !m.child_move) else {
            return Ok(());
        };
        let Some(source) = self.stat(&from.path)? else {
            debug!("Source {} of {} is gone, placing from scratch", from.path, doc.path);
            return Ok(());
        };
        if source.is_dir != doc.is_folder() || !same_ino(doc.ino, source.ino) {
            debug!("{} holds another entry, not moving it", from.path);
            return Ok(());
        }
        if let Some(target) = self.stat(&doc.path)? {
            // Case-only renames see the source at the destination too.
            if target.ino.is_none() || target.ino != source.ino {
                let abs = self.abs(&doc.path);
                return Err(SyncError::FileWrite {
                    path: abs,
                    source: std::io::Error::new(ErrorKind::AlreadyExists, "destination is occupied"),
                });
            }
        }
        self.ensure_parent(&doc.path)?;
        let (src, dst) = (self.abs(&from.path), self.abs(&doc.path));
        self.fs.move_path(&src, &dst).map_err(Self::write_err(&dst))?;
        debug!("Moved {} -> {}", from.path, doc.path);
        Ok(())
    }

    fn write_file(&self, doc: &Doc, content: &[u8]) -> Result<Applied> {
        let tmp = self.tmp_dir(None)?.join(Uuid::new_v4().simple().to_string());
        self.fs.write_binary(&tmp, content).map_err(Self::write_err(&tmp))?;

        let placed = self.replace_with(&tmp, doc);
        if placed.is_err() {
            let _ = self.fs.remove_all(&tmp);
        }
        placed?;
        self.finish(doc)
    }

    fn replace_with(&self, tmp: &Path, doc: &Doc) -> Result<()> {
        let path = doc.path.as_str();
        if let Some(stat) = self.stat(path)? {
            // The file may have been edited while the download ran.
            if !stat.is_dir {
                let actual = self.checksum(path)?;
                self.ensure_observed(doc, &actual)?;
            }
            self.trash(path)?;
        }
        self.ensure_parent(path)?;
        let dst = self.abs(path);
        self.fs.move_path(tmp, &dst).map_err(Self::write_err(&dst))
    }

    /// Apply the executable flag and report the final inode.
    fn finish(&self, doc: &Doc) -> Result<Applied> {
        let abs = self.abs(&doc.path);
        let stat = self.fs.stat(&abs).map_err(|source| SyncError::FileRead {
            path: abs.clone(),
            source,
        })?;
        if let Some(mode) = self.modes.mode_for(stat.mode, doc.executable) {
            self.fs.set_mode(&abs, mode).map_err(Self::write_err(&abs))?;
            debug!("Set mode {:o} on {}", mode, doc.path);
        }
        Ok(Applied {
            ino: stat.ino,
            local_hash: doc.content_hash.clone(),
            remote: None,
        })
    }

    fn applied(&self, doc: &Doc) -> Result<Applied> {
        Ok(Applied {
            ino: self.stat(&doc.path)?.and_then(|s| s.ino),
            ..Applied::default()
        })
    }
}

/// Unknown inodes on either side do not prove a mismatch.
fn same_ino(known: Option<u64>, found: Option<u64>) -> bool {
    match (known, found) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::{DocKind, MoveFrom, Side};
    use crate::fs::RealFileSystem;
    use crate::path_identity::PlatformProfile;
    use crate::remote::MemoryRemote;
    use std::fs;

    fn applier(root: &Path, remote: &MemoryRemote) -> LocalApplier {
        LocalApplier::new(
            Arc::new(RealFileSystem),
            Arc::new(remote.clone()),
            root.to_path_buf(),
            ModePolicy::for_profile(&PlatformProfile::LINUX),
        )
    }

    fn remote_doc(remote: &MemoryRemote, path: &str, content: &[u8]) -> Doc {
        let entry = remote.put_file(path, content).unwrap();
        Doc::new(path, path, DocKind::File, Side::Remote)
            .with_content(entry.content_hash.clone(), entry.size)
            .with_remote(Some(entry.to_ref()))
    }

    #[tokio::test]
    async fn test_download_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MemoryRemote::new();
        let doc = remote_doc(&remote, "docs/a.txt", b"hello");

        let applied = applier(dir.path(), &remote).apply(&doc).await.unwrap();
        assert_eq!(fs::read(dir.path().join("docs/a.txt")).unwrap(), b"hello");
        #[cfg(unix)]
        assert!(applied.ino.is_some());
        let _ = applied;
    }

    #[tokio::test]
    async fn test_matching_file_is_not_downloaded() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MemoryRemote::new();
        fs::write(dir.path().join("a.txt"), "same").unwrap();
        // No remote reference: a download would fail.
        let doc = Doc::new("a.txt", "a.txt", DocKind::File, Side::Remote)
            .with_content(Some(checksum::checksum_bytes(b"same")), Some(4));

        applier(dir.path(), &remote).apply(&doc).await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_file_goes_to_trash() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MemoryRemote::new();
        fs::write(dir.path().join("a.txt"), "old").unwrap();
        let mut doc = remote_doc(&remote, "a.txt", b"new");
        doc.local_hash = Some(checksum::checksum_bytes(b"old"));

        let applied = applier(dir.path(), &remote).apply(&doc).await.unwrap();
        assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"new");
        assert_eq!(applied.local_hash, doc.content_hash);
        let trashed = fs::read_dir(dir.path().join(TMP_DIR_NAME).join("trash")).unwrap().count();
        assert_eq!(trashed, 1);
    }

    #[tokio::test]
    async fn test_unmerged_local_edit_is_not_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MemoryRemote::new();
        fs::write(dir.path().join("a.txt"), "local edit").unwrap();
        let mut doc = remote_doc(&remote, "a.txt", b"remote edit");
        doc.local_hash = Some(checksum::checksum_bytes(b"v1"));

        let err = applier(dir.path(), &remote).apply(&doc).await.unwrap_err();
        assert!(err.is_deferred(), "{:?}", err);
        assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"local edit");
        assert!(!dir.path().join(TMP_DIR_NAME).join("trash").exists());

        // A file the cache never saw is left alone as well.
        doc.local_hash = None;
        let err = applier(dir.path(), &remote).apply(&doc).await.unwrap_err();
        assert!(err.is_deferred());
        assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"local edit");
    }

    #[tokio::test]
    async fn test_unmerged_local_edit_survives_remote_trash() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MemoryRemote::new();
        fs::write(dir.path().join("a.txt"), "local edit").unwrap();
        let mut doc = Doc::new("a.txt", "a.txt", DocKind::File, Side::Remote);
        doc.local_hash = Some(checksum::checksum_bytes(b"v1"));
        doc.trashed = true;

        let err = applier(dir.path(), &remote).apply(&doc).await.unwrap_err();
        assert!(err.is_deferred());
        assert!(dir.path().join("a.txt").exists());

        doc.local_hash = Some(checksum::checksum_bytes(b"local edit"));
        applier(dir.path(), &remote).apply(&doc).await.unwrap();
        assert!(!dir.path().join("a.txt").exists());
    }

    #[tokio::test]
    async fn test_incompatible_doc_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MemoryRemote::new();
        fs::write(dir.path().join("ab.txt"), "content").unwrap();
        let mut doc = remote_doc(&remote, "a:b.txt", b"content");
        doc.incompatibilities = crate::path_restrictions::PathRestrictions::WINDOWS.check(&doc.path, doc.kind);
        doc.move_from = Some(MoveFrom {
            id: "ab.txt".into(),
            path: "ab.txt".into(),
            child_move: false,
        });

        let applied = applier(dir.path(), &remote).apply(&doc).await.unwrap();
        assert_eq!(applied, Applied::default());
        assert!(!dir.path().join("ab.txt").exists());
        assert!(!dir.path().join("a:b.txt").exists());
    }

    #[tokio::test]
    async fn test_move_without_download() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MemoryRemote::new();
        fs::write(dir.path().join("a.txt"), "content").unwrap();
        let mut doc = Doc::new("sub/b.txt", "sub/b.txt", DocKind::File, Side::Remote)
            .with_content(Some(checksum::checksum_bytes(b"content")), Some(7));
        doc.move_from = Some(MoveFrom {
            id: "a.txt".into(),
            path: "a.txt".into(),
            child_move: false,
        });

        applier(dir.path(), &remote).apply(&doc).await.unwrap();
        assert!(!dir.path().join("a.txt").exists());
        assert_eq!(fs::read(dir.path().join("sub/b.txt")).unwrap(), b"content");
    }

    #[tokio::test]
    async fn test_trashed_doc_moves_to_local_trash() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MemoryRemote::new();
        fs::create_dir(dir.path().join("folder")).unwrap();
        let mut doc = Doc::new("folder", "folder", DocKind::Folder, Side::Local);
        doc.trashed = true;

        applier(dir.path(), &remote).apply(&doc).await.unwrap();
        assert!(!dir.path().join("folder").exists());
    }

    #[tokio::test]
    async fn test_folder_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MemoryRemote::new();
        fs::write(dir.path().join("x"), "file").unwrap();
        let doc = Doc::new("x", "x", DocKind::Folder, Side::Remote);

        applier(dir.path(), &remote).apply(&doc).await.unwrap();
        assert!(dir.path().join("x").is_dir());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_executable_flag_sets_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let remote = MemoryRemote::new();
        let doc = remote_doc(&remote, "run.sh", b"#!/bin/sh").with_executable(true);

        applier(dir.path(), &remote).apply(&doc).await.unwrap();
        let mode = fs::metadata(dir.path().join("run.sh")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_verify_rejects_other_bytes() {
        let doc = Doc::new("a", "a", DocKind::File, Side::Remote);
        let remote = RemoteRef {
            id: "r1".into(),
            generation: 1,
            path: "a".into(),
            content_hash: Some(checksum::checksum_bytes(b"expected")),
            executable: false,
        };
        assert!(verify(&doc, &remote, b"expected").is_ok());
        assert!(matches!(
            verify(&doc, &remote, b"tampered"),
            Err(SyncError::ChecksumMismatch { .. })
        ));
    }
}
