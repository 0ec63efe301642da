//! In-memory metadata cache.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use super::{MetadataStore, StoreResult, descendant_range};
use crate::doc::Doc;
use crate::error::SyncError;

/// In-memory metadata cache.
///
/// Docs live in a `BTreeMap` keyed by id so prefix queries are range scans.
/// Cloning shares the underlying data, which lets tests inspect a store
/// handed to the engine.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    docs: Arc<RwLock<BTreeMap<String, Doc>>>,
    checkpoint: Arc<RwLock<u64>>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored Docs.
    pub fn len(&self) -> usize {
        self.docs.read().map(|docs| docs.len()).unwrap_or(0)
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> SyncError {
    SyncError::Store("memory store lock poisoned".to_string())
}

impl MetadataStore for MemoryStore {
    fn get(&self, id: &str) -> StoreResult<Option<Doc>> {
        let docs = self.docs.read().map_err(poisoned)?;
        Ok(docs.get(id).cloned())
    }

    fn put(&self, doc: &Doc) -> StoreResult<u64> {
        let mut docs = self.docs.write().map_err(poisoned)?;
        let rev = docs.get(&doc.id).map(|d| d.rev).unwrap_or(0) + 1;
        let mut stored = doc.clone();
        stored.rev = rev;
        docs.insert(doc.id.clone(), stored);
        Ok(rev)
    }

    fn remove(&self, id: &str) -> StoreResult<()> {
        let mut docs = self.docs.write().map_err(poisoned)?;
        docs.remove(id);
        Ok(())
    }

    fn query_by_parent_path(&self, prefix: &str) -> StoreResult<Vec<Doc>> {
        let docs = self.docs.read().map_err(poisoned)?;
        if prefix.is_empty() {
            return Ok(docs.values().cloned().collect());
        }
        let (start, end) = descendant_range(prefix);
        Ok(docs.range(start..end).map(|(_, doc)| doc.clone()).collect())
    }

    fn query_by_ino(&self, ino: u64) -> StoreResult<Vec<Doc>> {
        let docs = self.docs.read().map_err(poisoned)?;
        Ok(docs
            .values()
            .filter(|doc| doc.ino == Some(ino))
            .cloned()
            .collect())
    }

    fn get_by_remote_id(&self, remote_id: &str) -> StoreResult<Option<Doc>> {
        let docs = self.docs.read().map_err(poisoned)?;
        Ok(docs
            .values()
            .find(|doc| doc.remote.as_ref().is_some_and(|r| r.id == remote_id))
            .cloned())
    }

    fn list_all(&self) -> StoreResult<Vec<Doc>> {
        let docs = self.docs.read().map_err(poisoned)?;
        Ok(docs.values().cloned().collect())
    }

    fn remote_checkpoint(&self) -> StoreResult<u64> {
        Ok(*self.checkpoint.read().map_err(poisoned)?)
    }

    fn set_remote_checkpoint(&self, generation: u64) -> StoreResult<()> {
        *self.checkpoint.write().map_err(poisoned)? = generation;
        Ok(())
    }
}
