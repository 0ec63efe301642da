//! SQLite-backed metadata cache.
//!
//! Each Doc is stored as a JSON body next to the columns needed for lookups
//! (path, inode, remote id). A single-row table keeps the remote checkpoint.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension, params};

use super::{MetadataStore, StoreResult, descendant_range};
use crate::doc::Doc;
use crate::error::SyncError;

/// SQLite-backed metadata cache.
///
/// # Thread Safety
///
/// The connection is wrapped in a `Mutex` for thread-safe access.
/// SQLite itself is used in serialized threading mode.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a cache database at the given path.
    ///
    /// This will create the necessary tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or if schema
    /// initialization fails.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        if let Some(parent) = path.as_ref().parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory database for testing.
    ///
    /// Data is lost when the store is dropped.
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| SyncError::Store("sqlite connection lock poisoned".to_string()))
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS docs (
                id TEXT PRIMARY KEY,
                path TEXT NOT NULL,
                ino INTEGER,
                remote_id TEXT,
                rev INTEGER NOT NULL,
                body TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_docs_ino ON docs(ino);
            CREATE INDEX IF NOT EXISTS idx_docs_remote_id ON docs(remote_id);

            CREATE TABLE IF NOT EXISTS checkpoint (
                key INTEGER PRIMARY KEY CHECK (key = 0),
                generation INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    fn query_docs(&self, sql: &str, params: impl rusqlite::Params) -> StoreResult<Vec<Doc>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let bodies = stmt
            .query_map(params, |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        bodies
            .iter()
            .map(|body| decode(body))
            .collect()
    }
}

fn decode(body: &str) -> StoreResult<Doc> {
    Ok(serde_json::from_str(body)?)
}

impl MetadataStore for SqliteStore {
    fn get(&self, id: &str) -> StoreResult<Option<Doc>> {
        let conn = self.conn()?;
        let body: Option<String> = conn
            .query_row("SELECT body FROM docs WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        body.as_deref().map(decode).transpose()
    }

    fn put(&self, doc: &Doc) -> StoreResult<u64> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let previous: Option<i64> = tx
            .query_row("SELECT rev FROM docs WHERE id = ?1", params![doc.id], |row| {
                row.get(0)
            })
            .optional()?;
        let rev = previous.unwrap_or(0) as u64 + 1;

        let mut stored = doc.clone();
        stored.rev = rev;
        let body = serde_json::to_string(&stored)?;
        tx.execute(
            "INSERT OR REPLACE INTO docs (id, path, ino, remote_id, rev, body)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                stored.id,
                stored.path,
                stored.ino.map(|i| i as i64),
                stored.remote.as_ref().map(|r| r.id.as_str()),
                rev as i64,
                body
            ],
        )?;
        tx.commit()?;
        Ok(rev)
    }

    fn remove(&self, id: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM docs WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn query_by_parent_path(&self, prefix: &str) -> StoreResult<Vec<Doc>> {
        if prefix.is_empty() {
            return self.list_all();
        }
        let (start, end) = descendant_range(prefix);
        self.query_docs(
            "SELECT body FROM docs WHERE id >= ?1 AND id < ?2 ORDER BY id",
            params![start, end],
        )
    }

    fn query_by_ino(&self, ino: u64) -> StoreResult<Vec<Doc>> {
        self.query_docs(
            "SELECT body FROM docs WHERE ino = ?1 ORDER BY id",
            params![ino as i64],
        )
    }

    fn get_by_remote_id(&self, remote_id: &str) -> StoreResult<Option<Doc>> {
        Ok(self
            .query_docs(
                "SELECT body FROM docs WHERE remote_id = ?1 LIMIT 1",
                params![remote_id],
            )?
            .into_iter()
            .next())
    }

    fn list_all(&self) -> StoreResult<Vec<Doc>> {
        self.query_docs("SELECT body FROM docs ORDER BY id", [])
    }

    fn remote_checkpoint(&self) -> StoreResult<u64> {
        let conn = self.conn()?;
        let generation: Option<i64> = conn
            .query_row("SELECT generation FROM checkpoint WHERE key = 0", [], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(generation.unwrap_or(0) as u64)
    }

    fn set_remote_checkpoint(&self, generation: u64) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO checkpoint (key, generation) VALUES (0, ?1)",
            params![generation as i64],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::{DocKind, RemoteRef, Side};

    fn doc(id: &str) -> Doc {
        Doc::new(id, id, DocKind::File, Side::Local)
    }

    #[test]
    fn test_put_and_get() {
        let store = SqliteStore::in_memory().unwrap();
        let rev = store.put(&doc("a").with_ino(Some(3))).unwrap();
        assert_eq!(rev, 1);

        let loaded = store.get("a").unwrap().unwrap();
        assert_eq!(loaded.ino, Some(3));
        assert_eq!(loaded.rev, 1);
        assert_eq!(store.put(&loaded).unwrap(), 2);
    }

    #[test]
    fn test_get_missing() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_prefix_and_index_queries() {
        let store = SqliteStore::in_memory().unwrap();
        for id in ["dir", "dir/a", "dir/sub/b", "dir2", "dir 3"] {
            store.put(&doc(id)).unwrap();
        }
        store
            .put(&doc("x").with_ino(Some(9)).with_remote(Some(RemoteRef {
                id: "r9".into(),
                generation: 1,
                path: "x".into(),
                content_hash: None,
                executable: false,
            })))
            .unwrap();

        let ids: Vec<_> = store
            .query_by_parent_path("dir")
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["dir/a", "dir/sub/b"]);
        assert_eq!(store.query_by_ino(9).unwrap().len(), 1);
        assert_eq!(store.get_by_remote_id("r9").unwrap().unwrap().id, "x");
    }

    #[test]
    fn test_remove_and_checkpoint() {
        let store = SqliteStore::in_memory().unwrap();
        store.put(&doc("a")).unwrap();
        store.remove("a").unwrap();
        assert!(store.list_all().unwrap().is_empty());

        store.set_remote_checkpoint(41).unwrap();
        store.set_remote_checkpoint(42).unwrap();
        assert_eq!(store.remote_checkpoint().unwrap(), 42);
    }

    #[test]
    fn test_persists_across_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.sqlite3");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.put(&doc("kept")).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert!(store.get("kept").unwrap().is_some());
    }
}
