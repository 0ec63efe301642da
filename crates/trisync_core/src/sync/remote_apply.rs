//! Pushing a Doc to the remote store.

use std::path::PathBuf;
use std::sync::Arc;

use log::debug;

use crate::doc::{Doc, DocKind, RemoteRef, Side};
use crate::error::{Result, SyncError};
use crate::fs::FileSystem;
use crate::merge::Applied;
use crate::path_utils;
use crate::remote::{RemoteDoc, RemoteStore};

/// Applies Docs to the remote store.
pub(crate) struct RemoteApplier {
    fs: Arc<dyn FileSystem>,
    remote: Arc<dyn RemoteStore>,
    root: PathBuf,
}

impl RemoteApplier {
    pub(crate) fn new(fs: Arc<dyn FileSystem>, remote: Arc<dyn RemoteStore>, root: PathBuf) -> Self {
        Self { fs, remote, root }
    }

    /// Make the remote document match the Doc's current generation.
    pub(crate) async fn apply(&self, doc: &Doc) -> Result<Applied> {
        // A rename onto an occupied path trashes the displaced document first.
        if let Some(displaced) = &doc.overwrite {
            self.trash(displaced).await?;
        }

        if !doc.is_live() {
            let remote = match &doc.remote {
                Some(known) => self.trash(known).await?.map(|d| d.to_ref()),
                None => None,
            };
            return Ok(Applied::remote(remote));
        }

        let Some(mut current) = doc.remote.clone() else {
            let created = self.create(doc).await?;
            return Ok(Applied::remote(Some(created.to_ref())));
        };

        if current.path != doc.path {
            current = match &doc.move_from {
                // The parent's remote move carried this one along.
                Some(from) if from.child_move => RemoteRef {
                    path: doc.path.clone(),
                    ..current
                },
                _ => {
                    debug!("Moving remote {} -> {}", current.path, doc.path);
                    self.remote.move_to(&current, &doc.path).await?.to_ref()
                }
            };
        }

        let stale = doc.kind == DocKind::File
            && (current.content_hash != doc.content_hash || current.executable != doc.executable);
        if stale {
            let content = self.read(doc).await?;
            debug!("Uploading {} ({} bytes)", doc.path, content.len());
            current = self.remote.update(&current, &content, doc.executable).await?.to_ref();
        }

        Ok(Applied::remote(Some(current)))
    }

    async fn create(&self, doc: &Doc) -> Result<RemoteDoc> {
        match doc.kind {
            DocKind::Folder => {
                debug!("Creating remote folder {}", doc.path);
                self.remote.create(&doc.path, DocKind::Folder, None, false).await
            }
            DocKind::File => {
                let content = self.read(doc).await?;
                debug!("Creating remote file {} ({} bytes)", doc.path, content.len());
                self.remote
                    .create(&doc.path, DocKind::File, Some(&content), doc.executable)
                    .await
            }
        }
    }

    /// Trash a remote document; one already gone counts as trashed.
    async fn trash(&self, remote: &RemoteRef) -> Result<Option<RemoteDoc>> {
        match self.remote.trash(remote).await {
            Ok(doc) => {
                debug!("Trashed remote {}", remote.path);
                Ok(Some(doc))
            }
            Err(SyncError::RemoteNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn read(&self, doc: &Doc) -> Result<Vec<u8>> {
        // The bytes to upload are not at this path until the local side moves them there.
        if doc.sides.behind(Side::Local) {
            return Err(SyncError::Deferred {
                path: doc.path.clone(),
                reason: "waiting for the local side to place the file".to_string(),
            });
        }
        let fs = Arc::clone(&self.fs);
        let path = path_utils::to_absolute(&self.root, &doc.path);
        tokio::task::spawn_blocking(move || {
            fs.read_binary(&path)
                .map_err(|source| SyncError::FileRead { path, source })
        })
        .await
        .map_err(|e| SyncError::Io(std::io::Error::other(e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum;
    use crate::doc::{MoveFrom, Side};
    use crate::fs::RealFileSystem;
    use crate::remote::MemoryRemote;
    use std::fs;

    fn applier(root: &std::path::Path, remote: &MemoryRemote) -> RemoteApplier {
        RemoteApplier::new(Arc::new(RealFileSystem), Arc::new(remote.clone()), root.to_path_buf())
    }

    fn local_doc(root: &std::path::Path, path: &str, content: &[u8]) -> Doc {
        fs::write(root.join(path), content).unwrap();
        Doc::new(path, path, DocKind::File, Side::Local)
            .with_content(Some(checksum::checksum_bytes(content)), Some(content.len() as u64))
    }

    #[tokio::test]
    async fn test_create_uploads_content() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MemoryRemote::new();
        let doc = local_doc(dir.path(), "a.txt", b"hello").with_executable(true);

        let applied = applier(dir.path(), &remote).apply(&doc).await.unwrap();
        let known = applied.remote.unwrap();
        assert_eq!(known.path, "a.txt");
        assert!(known.executable);
        assert_eq!(remote.content_at("a.txt").unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_move_then_update() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MemoryRemote::new();
        let entry = remote.put_file("old.txt", b"v1").unwrap();
        let mut doc = local_doc(dir.path(), "new.txt", b"v2").with_remote(Some(entry.to_ref()));
        doc.move_from = Some(MoveFrom {
            id: "old.txt".into(),
            path: "old.txt".into(),
            child_move: false,
        });

        let applied = applier(dir.path(), &remote).apply(&doc).await.unwrap();
        assert!(remote.doc_at("old.txt").is_none());
        assert_eq!(remote.content_at("new.txt").unwrap(), b"v2");
        assert_eq!(applied.remote.unwrap().content_hash, doc.content_hash);
    }

    #[tokio::test]
    async fn test_child_move_only_refreshes_reference() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MemoryRemote::new();
        let entry = remote.put_file("a/x.txt", b"x").unwrap();
        fs::create_dir(dir.path().join("b")).unwrap();
        let mut doc = local_doc(dir.path(), "b/x.txt", b"x").with_remote(Some(entry.to_ref()));
        doc.move_from = Some(MoveFrom {
            id: "a/x.txt".into(),
            path: "a/x.txt".into(),
            child_move: true,
        });

        let applied = applier(dir.path(), &remote).apply(&doc).await.unwrap();
        assert_eq!(applied.remote.unwrap().path, "b/x.txt");
        // Nothing was sent: the document is still where the folder move left it.
        assert!(remote.doc_at("a/x.txt").is_some());
    }

    #[tokio::test]
    async fn test_deleted_doc_is_trashed() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MemoryRemote::new();
        let entry = remote.put_file("gone.txt", b"x").unwrap();
        let mut doc = Doc::new("gone.txt", "gone.txt", DocKind::File, Side::Local)
            .with_remote(Some(entry.to_ref()));
        doc.deleted = true;

        let applied = applier(dir.path(), &remote).apply(&doc).await.unwrap();
        assert!(applied.remote.unwrap().generation > entry.generation);
        assert!(remote.doc_at("gone.txt").is_none());
    }

    #[tokio::test]
    async fn test_overwrite_is_trashed_first() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MemoryRemote::new();
        let displaced = remote.put_file("b.txt", b"other").unwrap();
        let entry = remote.put_file("a.txt", b"mine").unwrap();
        let mut doc = local_doc(dir.path(), "b.txt", b"mine").with_remote(Some(entry.to_ref()));
        doc.overwrite = Some(displaced.to_ref());

        applier(dir.path(), &remote).apply(&doc).await.unwrap();
        assert_eq!(remote.content_at("b.txt").unwrap(), b"mine");
        assert_eq!(remote.live_docs().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_local_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MemoryRemote::new();
        let doc = Doc::new("ghost.txt", "ghost.txt", DocKind::File, Side::Local)
            .with_content(Some("h".into()), Some(1));

        let err = applier(dir.path(), &remote).apply(&doc).await.unwrap_err();
        assert!(matches!(err, SyncError::FileRead { .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_upload_waits_for_local_placement() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MemoryRemote::new();
        // A conflict copy whose file still sits at the original path.
        fs::write(dir.path().join("a.txt"), "local").unwrap();
        let mut doc = Doc::new("a-conflict-x.txt", "a-conflict-x.txt", DocKind::File, Side::Local)
            .with_content(Some(checksum::checksum_bytes(b"local")), Some(5));
        doc.sides = crate::doc::Sides::default().bump_target();

        let err = applier(dir.path(), &remote).apply(&doc).await.unwrap_err();
        assert!(err.is_deferred(), "{:?}", err);
        assert!(remote.live_docs().is_empty());
    }
}
