//! Watch command handler

use std::sync::Arc;

use log::{debug, info, warn};

use trisync_core::error::{Result, SyncError};
use trisync_core::Merge;
use trisync_core::events::{ChangeEvent, DocEvent};
use trisync_core::fs::{FileSystem, RealFileSystem};
use trisync_core::local::{LocalWatcher, NotifyAdapter};

use super::Session;

/// Handle the watch command - keep the cache in step with the sync root
/// until interrupted.
pub fn handle_watch(session: &Session) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(watch(session))
}

async fn watch(session: &Session) -> Result<()> {
    let root = session.options.root.clone();
    let merge = session.merge();
    merge.registry().subscribe(Arc::new(|event: &DocEvent| {
        println!(
            "{} {:<8} {}",
            chrono::Local::now().format("%H:%M:%S"),
            event.event_type(),
            event.path()
        );
    }));

    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let (watcher, mut batches) =
        LocalWatcher::start(session.options.clone(), Arc::clone(&session.store), fs);
    let adapter = NotifyAdapter::start(&root, watcher.sender())?;

    println!("Watching {}", root.display());
    println!("Press Ctrl+C to stop");

    loop {
        tokio::select! {
            batch = batches.recv() => {
                let Some(batch) = batch else { break };
                merge_batch(session, &merge, batch);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, flushing pending changes");
                break;
            }
        }
    }

    adapter.stop()?;
    // The producer flushes its last window on the way out; keep receiving
    // so a full queue cannot stall it.
    let stopping = tokio::spawn(watcher.stop());
    while let Some(batch) = batches.recv().await {
        merge_batch(session, &merge, batch);
    }
    stopping
        .await
        .map_err(|e| SyncError::Io(std::io::Error::other(e)))??;

    println!("✓ Stopped");
    Ok(())
}

fn merge_batch(session: &Session, merge: &Merge, batch: Vec<ChangeEvent>) {
    let size = batch.len();
    match session.merge_local(merge, batch) {
        Ok(mutations) => debug!("Merged batch of {} ({} cache updates)", size, mutations),
        Err(e) => warn!("Failed to merge batch of {}: {}", size, e),
    }
}
