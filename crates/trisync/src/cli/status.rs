//! Status and unpark command handlers

use serde_json::json;

use trisync_core::error::Result;
use trisync_core::sync::{ParkedDoc, SyncStatus};

use super::Session;

/// Handle the status command - summarize the metadata cache.
pub fn handle_status(session: &Session, as_json: bool) -> Result<()> {
    let docs = session.store.list_all()?;
    let status = SyncStatus::from_docs(&docs);
    let parked: Vec<ParkedDoc> = docs.iter().filter(|d| d.parked).map(ParkedDoc::from).collect();
    let incompatible: Vec<_> = docs
        .iter()
        .filter(|d| d.is_live() && d.is_incompatible())
        .map(|d| (d.path.as_str(), &d.incompatibilities))
        .collect();
    let checkpoint = session.store.remote_checkpoint()?;

    if as_json {
        let out = json!({
            "root": session.config.sync_path,
            "status": status,
            "parked": parked,
            "incompatible": incompatible
                .iter()
                .map(|(path, issues)| json!({ "path": path, "issues": issues }))
                .collect::<Vec<_>>(),
            "remoteCheckpoint": checkpoint,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Sync root: {}", session.config.sync_path.display());
    println!("  Tracked: {}", status.total);
    println!("  Settled: {}", status.settled);
    println!("  Waiting to reach disk: {}", status.pending_local);
    println!("  Waiting to reach remote: {}", status.pending_remote);
    println!("  Remote checkpoint: {}", checkpoint);

    if !incompatible.is_empty() {
        println!();
        println!("Not synced locally ({}):", incompatible.len());
        for (path, issues) in &incompatible {
            for issue in issues.iter() {
                println!("  {}: {}", path, issue);
            }
        }
    }

    if parked.is_empty() {
        if status.is_settled() {
            println!("✓ Everything is in sync");
        }
        return Ok(());
    }

    println!();
    println!("Parked ({}):", parked.len());
    for doc in &parked {
        println!(
            "  {} [{}] after {} failures: {}",
            doc.path,
            doc.id,
            doc.error_count,
            doc.last_error.as_deref().unwrap_or("unknown error")
        );
    }
    println!("Run `trisync unpark <id>` to retry one.");
    Ok(())
}

/// Handle the unpark command - give a parked Doc another round of attempts.
pub fn handle_unpark(session: &Session, id: &str) -> Result<()> {
    if session.merge().unpark(id)? {
        println!("✓ Unparked {}", id);
    } else {
        eprintln!("{} is not parked", id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use trisync_core::config::SyncOptions;
    use trisync_core::doc::{Doc, DocKind, Side};
    use trisync_core::path_identity::PlatformKind;
    use trisync_core::path_restrictions::PathRestrictions;
    use trisync_core::store::{MemoryStore, MetadataStore};
    use trisync_core::Config;

    #[test]
    fn test_unpark_clears_flag() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let mut doc = Doc::new("a.txt", "a.txt", DocKind::File, Side::Local);
        doc.parked = true;
        doc.error_count = 5;
        store.put(&doc).unwrap();
        let mut reserved = Doc::new("CON", "con", DocKind::File, Side::Remote);
        reserved.incompatibilities = PathRestrictions::WINDOWS.check("con", DocKind::File);
        store.put(&reserved).unwrap();

        let session = Session {
            config: Config::new(dir.path().to_path_buf()),
            options: SyncOptions::new(dir.path(), PlatformKind::Linux.profile()),
            store: store.clone(),
        };
        handle_status(&session, true).unwrap();
        handle_status(&session, false).unwrap();
        handle_unpark(&session, "a.txt").unwrap();

        let doc = store.get("a.txt").unwrap().unwrap();
        assert!(!doc.parked);
        assert_eq!(doc.error_count, 0);
    }
}
