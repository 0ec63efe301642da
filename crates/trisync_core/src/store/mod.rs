//! Metadata cache abstraction.
//!
//! The [`MetadataStore`] trait is the only view the sync components have of the
//! persistent metadata cache. `put` is atomic per Doc and assigns a storage
//! revision, but there is no cross-Doc transaction: invariants spanning several
//! Docs (such as the no-collision rule) are enforced by the merge engine, which
//! is the only writer.
//!
//! Backends:
//!
//! - [`MemoryStore`]: in-memory, for tests and ephemeral sessions
//! - [`SqliteStore`]: persistent, behind the `sqlite` feature

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use crate::doc::Doc;
use crate::error::SyncError;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, SyncError>;

/// Trait for metadata cache backends.
///
/// Docs are keyed by their folded `id`. Secondary lookups by inode and by
/// remote id must see every stored Doc, including trashed and deleted ones.
pub trait MetadataStore: Send + Sync {
    /// Load one Doc by id.
    fn get(&self, id: &str) -> StoreResult<Option<Doc>>;

    /// Insert or replace a Doc, returning its new storage revision.
    fn put(&self, doc: &Doc) -> StoreResult<u64>;

    /// Remove a Doc. Removing a missing id is not an error.
    fn remove(&self, id: &str) -> StoreResult<()>;

    /// All Docs strictly below the folder with id `prefix`, ordered by id so
    /// parents come before their children. An empty prefix lists everything.
    fn query_by_parent_path(&self, prefix: &str) -> StoreResult<Vec<Doc>>;

    /// Docs recorded with the given local inode.
    fn query_by_ino(&self, ino: u64) -> StoreResult<Vec<Doc>>;

    /// The Doc associated with a remote document id.
    fn get_by_remote_id(&self, remote_id: &str) -> StoreResult<Option<Doc>>;

    /// Every Doc, ordered by id.
    fn list_all(&self) -> StoreResult<Vec<Doc>>;

    /// Last remote generation merged into the cache.
    fn remote_checkpoint(&self) -> StoreResult<u64>;

    /// Record the last remote generation merged into the cache.
    fn set_remote_checkpoint(&self, generation: u64) -> StoreResult<()>;
}

/// Upper bound (exclusive) of the id range holding descendants of `prefix`.
///
/// Descendant ids start with `prefix/`; `0` is the byte right after `/`.
pub(crate) fn descendant_range(prefix: &str) -> (String, String) {
    (format!("{}/", prefix), format!("{}0", prefix))
}
