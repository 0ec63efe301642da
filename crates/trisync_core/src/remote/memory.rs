//! In-memory remote store.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use indexmap::IndexMap;

use crate::checksum;
use crate::doc::{DocKind, RemoteRef};
use crate::error::{Result, SyncError};
use crate::fs::BoxFuture;
use crate::path_utils;

use super::{RemoteChanges, RemoteDoc, RemoteStore};

#[derive(Debug, Default)]
struct Inner {
    docs: IndexMap<String, RemoteDoc>,
    contents: HashMap<String, Vec<u8>>,
    generation: u64,
    next_id: u64,
    failures: VecDeque<SyncError>,
}

impl Inner {
    fn bump(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn live_at(&self, path: &str) -> Option<&RemoteDoc> {
        self.docs.values().find(|d| !d.trashed && d.path == path)
    }

    fn current(&self, remote: &RemoteRef) -> Result<&RemoteDoc> {
        self.docs
            .get(&remote.id)
            .ok_or_else(|| SyncError::RemoteNotFound(remote.id.clone()))
    }

    /// Writes are conditional on the generation the caller saw.
    fn check(&self, remote: &RemoteRef) -> Result<RemoteDoc> {
        let current = self.current(remote)?;
        if current.generation != remote.generation {
            return Err(SyncError::RemoteConflict(remote.id.clone()));
        }
        Ok(current.clone())
    }

    fn check_parent(&self, path: &str) -> Result<()> {
        let parent = path_utils::parent(path);
        if parent.is_empty() {
            return Ok(());
        }
        match self.live_at(parent) {
            Some(doc) if doc.kind == DocKind::Folder => Ok(()),
            _ => Err(SyncError::RemoteNotFound(parent.to_string())),
        }
    }

    fn check_free(&self, path: &str, except: Option<&str>) -> Result<()> {
        match self.live_at(path) {
            Some(doc) if Some(doc.id.as_str()) != except => {
                Err(SyncError::remote_fatal(format!("'{}' already exists", path)))
            }
            _ => Ok(()),
        }
    }

    fn create(&mut self, path: &str, kind: DocKind, content: Option<&[u8]>, executable: bool) -> Result<RemoteDoc> {
        self.check_parent(path)?;
        self.check_free(path, None)?;
        self.next_id += 1;
        let id = format!("r{}", self.next_id);
        let generation = self.bump();
        let doc = RemoteDoc {
            id: id.clone(),
            path: path.to_string(),
            kind,
            content_hash: content.map(checksum::checksum_bytes),
            size: content.map(|c| c.len() as u64),
            executable: kind == DocKind::File && executable,
            trashed: false,
            generation,
            updated_at: Utc::now(),
        };
        if let Some(content) = content {
            self.contents.insert(id.clone(), content.to_vec());
        }
        self.docs.insert(id, doc.clone());
        Ok(doc)
    }

    fn update(&mut self, remote: &RemoteRef, content: &[u8], executable: bool) -> Result<RemoteDoc> {
        let mut doc = self.check(remote)?;
        if doc.trashed {
            return Err(SyncError::RemoteNotFound(remote.id.clone()));
        }
        doc.content_hash = Some(checksum::checksum_bytes(content));
        doc.size = Some(content.len() as u64);
        doc.executable = executable;
        doc.generation = self.bump();
        doc.updated_at = Utc::now();
        self.contents.insert(doc.id.clone(), content.to_vec());
        self.docs.insert(doc.id.clone(), doc.clone());
        Ok(doc)
    }

    fn move_to(&mut self, remote: &RemoteRef, path: &str) -> Result<RemoteDoc> {
        let mut doc = self.check(remote)?;
        if doc.trashed {
            return Err(SyncError::RemoteNotFound(remote.id.clone()));
        }
        self.check_parent(path)?;
        self.check_free(path, Some(&doc.id))?;

        let from = std::mem::replace(&mut doc.path, path.to_string());
        doc.generation = self.bump();
        self.docs.insert(doc.id.clone(), doc.clone());

        if doc.kind == DocKind::Folder {
            let children: Vec<String> = self
                .docs
                .values()
                .filter(|d| path_utils::is_descendant(&d.path, &from))
                .map(|d| d.id.clone())
                .collect();
            for id in children {
                let generation = self.bump();
                if let Some(child) = self.docs.get_mut(&id)
                    && let Some(new) = path_utils::replace_prefix(&child.path, &from, path)
                {
                    child.path = new;
                    child.generation = generation;
                }
            }
        }
        Ok(doc)
    }

    fn trash(&mut self, remote: &RemoteRef) -> Result<RemoteDoc> {
        let current = self.current(remote)?.clone();
        if current.trashed {
            return Ok(current);
        }
        let doc = self.check(remote)?;

        let mut targets = vec![doc.id.clone()];
        if doc.kind == DocKind::Folder {
            targets.extend(
                self.docs
                    .values()
                    .filter(|d| !d.trashed && path_utils::is_descendant(&d.path, &doc.path))
                    .map(|d| d.id.clone()),
            );
        }
        for id in targets {
            let generation = self.bump();
            if let Some(target) = self.docs.get_mut(&id) {
                target.trashed = true;
                target.generation = generation;
            }
        }
        self.current(remote).cloned()
    }

    fn download(&self, remote: &RemoteRef) -> Result<Vec<u8>> {
        let current = self.current(remote)?;
        if current.content_hash != remote.content_hash {
            // Newer content is waiting in the feed.
            return Err(SyncError::RemoteConflict(remote.id.clone()));
        }
        self.contents
            .get(&remote.id)
            .cloned()
            .ok_or_else(|| SyncError::ContentUnavailable(remote.path.clone()))
    }
}

/// Remote store kept in memory.
///
/// Cloning shares the same state, so a test can keep a handle for direct
/// manipulation (`put_file`, `trash_path`, ...) while the engine owns another.
/// Writes through the helper methods go through the feed exactly like writes
/// from another client.
#[derive(Debug, Clone, Default)]
pub struct MemoryRemote {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryRemote {
    /// Create an empty remote.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_failure(&self) -> Result<()> {
        match self.lock().failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Make the next API call fail with `err`.
    pub fn fail_next(&self, err: SyncError) {
        self.lock().failures.push_back(err);
    }

    /// Create or overwrite a file, creating missing parent folders.
    pub fn put_file(&self, path: &str, content: &[u8]) -> Result<RemoteDoc> {
        self.ensure_folders(path_utils::parent(path))?;
        let mut inner = self.lock();
        match inner.live_at(path).map(RemoteDoc::to_ref) {
            Some(existing) => {
                let executable = inner.current(&existing)?.executable;
                inner.update(&existing, content, executable)
            }
            None => inner.create(path, DocKind::File, Some(content), false),
        }
    }

    /// Create a folder and its missing parents.
    pub fn put_folder(&self, path: &str) -> Result<RemoteDoc> {
        self.ensure_folders(path)?;
        self.doc_at(path)
            .ok_or_else(|| SyncError::RemoteNotFound(path.to_string()))
    }

    /// Flip the executable flag of a file.
    pub fn set_executable(&self, path: &str, executable: bool) -> Result<RemoteDoc> {
        let mut inner = self.lock();
        let existing = inner
            .live_at(path)
            .map(RemoteDoc::to_ref)
            .ok_or_else(|| SyncError::RemoteNotFound(path.to_string()))?;
        let content = inner.contents.get(&existing.id).cloned().unwrap_or_default();
        inner.update(&existing, &content, executable)
    }

    /// Move the live document at `from`.
    pub fn move_path(&self, from: &str, to: &str) -> Result<RemoteDoc> {
        let mut inner = self.lock();
        let existing = inner
            .live_at(from)
            .map(RemoteDoc::to_ref)
            .ok_or_else(|| SyncError::RemoteNotFound(from.to_string()))?;
        inner.move_to(&existing, to)
    }

    /// Trash the live document at `path`.
    pub fn trash_path(&self, path: &str) -> Result<RemoteDoc> {
        let mut inner = self.lock();
        let existing = inner
            .live_at(path)
            .map(RemoteDoc::to_ref)
            .ok_or_else(|| SyncError::RemoteNotFound(path.to_string()))?;
        inner.trash(&existing)
    }

    /// The live document at `path`.
    pub fn doc_at(&self, path: &str) -> Option<RemoteDoc> {
        self.lock().live_at(path).cloned()
    }

    /// Content of the live file at `path`.
    pub fn content_at(&self, path: &str) -> Option<Vec<u8>> {
        let inner = self.lock();
        let doc = inner.live_at(path)?;
        inner.contents.get(&doc.id).cloned()
    }

    /// Every live document, ordered by path.
    pub fn live_docs(&self) -> Vec<RemoteDoc> {
        let mut docs: Vec<RemoteDoc> = self.lock().docs.values().filter(|d| !d.trashed).cloned().collect();
        docs.sort_by(|a, b| a.path.cmp(&b.path));
        docs
    }

    /// Current feed position.
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    fn ensure_folders(&self, path: &str) -> Result<()> {
        if path.is_empty() {
            return Ok(());
        }
        let mut inner = self.lock();
        let mut chain = path_utils::ancestors(path);
        chain.push(path);
        for folder in chain {
            if inner.live_at(folder).is_none() {
                inner.create(folder, DocKind::Folder, None, false)?;
            }
        }
        Ok(())
    }
}

impl RemoteStore for MemoryRemote {
    fn changes_since<'a>(&'a self, generation: u64) -> BoxFuture<'a, Result<RemoteChanges>> {
        Box::pin(async move {
            self.take_failure()?;
            let inner = self.lock();
            let mut docs: Vec<RemoteDoc> = inner
                .docs
                .values()
                .filter(|d| d.generation > generation)
                .cloned()
                .collect();
            docs.sort_by_key(|d| d.generation);
            Ok(RemoteChanges {
                docs,
                last_generation: inner.generation.max(generation),
            })
        })
    }

    fn create<'a>(
        &'a self,
        path: &'a str,
        kind: DocKind,
        content: Option<&'a [u8]>,
        executable: bool,
    ) -> BoxFuture<'a, Result<RemoteDoc>> {
        Box::pin(async move {
            self.take_failure()?;
            self.lock().create(path, kind, content, executable)
        })
    }

    fn update<'a>(
        &'a self,
        remote: &'a RemoteRef,
        content: &'a [u8],
        executable: bool,
    ) -> BoxFuture<'a, Result<RemoteDoc>> {
        Box::pin(async move {
            self.take_failure()?;
            self.lock().update(remote, content, executable)
        })
    }

    fn move_to<'a>(&'a self, remote: &'a RemoteRef, path: &'a str) -> BoxFuture<'a, Result<RemoteDoc>> {
        Box::pin(async move {
            self.take_failure()?;
            self.lock().move_to(remote, path)
        })
    }

    fn trash<'a>(&'a self, remote: &'a RemoteRef) -> BoxFuture<'a, Result<RemoteDoc>> {
        Box::pin(async move {
            self.take_failure()?;
            self.lock().trash(remote)
        })
    }

    fn download<'a>(&'a self, remote: &'a RemoteRef) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            self.take_failure()?;
            self.lock().download(remote)
        })
    }
}
