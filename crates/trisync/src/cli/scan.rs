//! Scan command handler

use trisync_core::error::Result;
use trisync_core::fs::RealFileSystem;
use trisync_core::local::scan_tree;

use super::Session;

/// Handle the scan command - walk the sync root once and merge what changed.
pub fn handle_scan(session: &Session) -> Result<()> {
    let root = &session.options.root;
    println!("Scanning {}...", root.display());

    let report = scan_tree(&RealFileSystem, &session.options, session.store.as_ref())?;
    let found = report.events.len();
    let merge = session.merge();
    let mutations = session.merge_local(&merge, report.events)?;

    println!("  Entries: {}", report.entries);
    if report.skipped > 0 {
        println!("  Skipped: {}", report.skipped);
    }
    if report.offline_moves > 0 {
        println!("  Moved while offline: {}", report.offline_moves);
    }
    if report.offline_deletions > 0 {
        println!("  Deleted while offline: {}", report.offline_deletions);
    }
    if mutations == 0 {
        println!("✓ Cache is up to date");
    } else {
        println!("✓ Merged {} changes ({} cache updates)", found, mutations);
    }
    Ok(())
}
