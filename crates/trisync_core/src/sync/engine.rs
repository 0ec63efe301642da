//! Sync engine orchestrator.
//!
//! The SyncEngine runs reconciliation cycles between the local tree and the
//! remote store, with the metadata cache in between. Within a cycle, one
//! side of a Doc is applied at a time: the local side during
//! `ApplyingRemote`, the remote side during `ApplyingLocal`.
//!
//! ```ignore
//! let (watcher, batches) = LocalWatcher::start(options.clone(), store.clone(), fs.clone());
//! let mut engine = SyncEngine::new(options, store, fs, remote).with_batches(batches);
//! let (stop, shutdown) = tokio::sync::watch::channel(false);
//! engine.run(shutdown).await?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use log::{debug, info, warn};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::watch;

use crate::config::SyncOptions;
use crate::conflict::ConflictResolver;
use crate::doc::{Doc, Side};
use crate::error::{Result, SyncError};
use crate::events::{ChangeEvent, EventRegistry};
use crate::fs::{FileSystem, ModePolicy};
use crate::local::{BatchReceiver, scan_tree};
use crate::merge::Merge;
use crate::normalizer::PathNormalizer;
use crate::remote::{RemoteStore, analyze};
use crate::store::MetadataStore;

use super::local_apply::LocalApplier;
use super::remote_apply::RemoteApplier;
use super::retry::RetryPolicy;
use super::{ParkedDoc, SyncProgress, SyncResult, SyncStage, SyncStatus};

/// Type alias for sync progress callback.
/// Parameters: progress info
pub type SyncProgressCallback<'a> = &'a (dyn Fn(SyncProgress) + Send + Sync);

/// Outcome of one application attempt.
enum Outcome {
    Applied,
    Failed(Option<ParkedDoc>),
}

#[derive(Default)]
struct ApplyReport {
    applied: usize,
    failed: usize,
    parked: Vec<ParkedDoc>,
}

/// The sync engine for one sync root.
pub struct SyncEngine {
    options: SyncOptions,
    store: Arc<dyn MetadataStore>,
    fs: Arc<dyn FileSystem>,
    remote: Arc<dyn RemoteStore>,
    merge: Arc<Merge>,
    normalizer: PathNormalizer,
    local_applier: LocalApplier,
    remote_applier: RemoteApplier,
    retry: RetryPolicy,
    batches: Option<BatchReceiver>,
    stage: SyncStage,
}

impl SyncEngine {
    /// Create an engine. Without a batch queue every cycle walks the tree.
    pub fn new(
        options: SyncOptions,
        store: Arc<dyn MetadataStore>,
        fs: Arc<dyn FileSystem>,
        remote: Arc<dyn RemoteStore>,
    ) -> Self {
        let merge = Arc::new(
            Merge::new(Arc::clone(&store), options.profile).with_restrictions(options.restrictions()),
        );
        let modes = ModePolicy::for_profile(&options.profile);
        Self {
            normalizer: PathNormalizer::new(options.profile),
            local_applier: LocalApplier::new(
                Arc::clone(&fs),
                Arc::clone(&remote),
                options.root.clone(),
                modes,
            ),
            remote_applier: RemoteApplier::new(Arc::clone(&fs), Arc::clone(&remote), options.root.clone()),
            retry: RetryPolicy::from_options(&options),
            options,
            store,
            fs,
            remote,
            merge,
            batches: None,
            stage: SyncStage::Idle,
        }
    }

    /// Builder: use a specific conflict resolver.
    pub fn with_resolver(mut self, resolver: ConflictResolver) -> Self {
        let registry = Arc::clone(self.merge.registry());
        self.merge = Arc::new(
            Merge::new(Arc::clone(&self.store), self.options.profile)
                .with_restrictions(self.options.restrictions())
                .with_resolver(resolver)
                .with_registry(registry),
        );
        self
    }

    /// Builder: consume batches of a running [`LocalWatcher`](crate::local::LocalWatcher)
    /// instead of walking the tree every cycle.
    pub fn with_batches(mut self, batches: BatchReceiver) -> Self {
        self.batches = Some(batches);
        self
    }

    /// The merge engine, shared with other writers of local events.
    pub fn merge(&self) -> &Arc<Merge> {
        &self.merge
    }

    /// Subscribers of domain events.
    pub fn registry(&self) -> &Arc<EventRegistry> {
        self.merge.registry()
    }

    /// Runtime options.
    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Stage the engine is currently in.
    pub fn stage(&self) -> SyncStage {
        self.stage
    }

    // ========================================================================
    // Cycles
    // ========================================================================

    /// Run one reconciliation cycle.
    pub async fn sync(&mut self) -> SyncResult {
        self.sync_with_progress(&|_| {}).await
    }

    /// Run one reconciliation cycle with progress reporting.
    pub async fn sync_with_progress(&mut self, on_progress: SyncProgressCallback<'_>) -> SyncResult {
        let mut result = SyncResult::success();
        match self.cycle(on_progress, &mut result).await {
            Ok(()) => {
                self.enter(SyncStage::Idle);
                on_progress(SyncProgress::new(SyncStage::Idle, 0, 0).with_message(summary(&result)));
                if result.is_noop() {
                    debug!("Sync cycle complete, nothing to do");
                } else {
                    info!("Sync cycle complete: {}", summary(&result));
                }
                result
            }
            Err(e) => {
                warn!("Sync cycle aborted during {:?}: {}", self.stage, e);
                self.enter(SyncStage::Error);
                on_progress(SyncProgress::new(SyncStage::Error, 0, 0).with_message(e.to_string()));
                self.enter(SyncStage::Idle);
                SyncResult {
                    success: false,
                    error: Some(e.to_string()),
                    ..result
                }
            }
        }
    }

    async fn cycle(&mut self, on_progress: SyncProgressCallback<'_>, result: &mut SyncResult) -> Result<()> {
        self.enter(SyncStage::PullingRemote);
        on_progress(SyncProgress::new(SyncStage::PullingRemote, 0, 0));
        result.remote_changes = self.pull().await?;

        self.enter(SyncStage::ApplyingRemote);
        let report = self.apply_side(Side::Local, SyncStage::ApplyingRemote, on_progress).await?;
        result.applied_local = report.applied;
        result.failed += report.failed;
        result.newly_parked.extend(report.parked);

        self.enter(SyncStage::ScanningLocal);
        on_progress(SyncProgress::new(SyncStage::ScanningLocal, 0, 0));
        result.local_changes = self.scan_local().await?;

        self.enter(SyncStage::ApplyingLocal);
        let report = self.apply_side(Side::Remote, SyncStage::ApplyingLocal, on_progress).await?;
        result.applied_remote = report.applied;
        result.failed += report.failed;
        result.newly_parked.extend(report.parked);

        self.enter(SyncStage::Settling);
        on_progress(SyncProgress::new(SyncStage::Settling, 0, 0));
        result.purged = self.settle()?;
        Ok(())
    }

    /// Run cycles until `shutdown` turns true. A batch that arrives between
    /// cycles is merged right away and starts the next cycle early.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("Sync loop started for {}", self.options.root.display());
        while !*shutdown.borrow() {
            let result = self.sync().await;
            if let Some(error) = &result.error {
                warn!("Retrying in {:?} after failed cycle: {}", self.options.poll_interval, error);
            }

            let batch = tokio::select! {
                _ = tokio::time::sleep(self.options.poll_interval) => None,
                batch = next_batch(&mut self.batches) => batch,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    None
                }
            };
            if let Some(batch) = batch
                && let Err(e) = self.merge_local(batch)
            {
                warn!("Failed to merge local batch: {}", e);
            }
        }

        let drained = self.drain_batches()?;
        if drained > 0 {
            debug!("Merged {} pending local changes before stopping", drained);
        }
        info!("Sync loop stopped for {}", self.options.root.display());
        Ok(())
    }

    // ========================================================================
    // Stages
    // ========================================================================

    fn enter(&mut self, stage: SyncStage) {
        if self.stage != stage {
            debug!("Sync stage {:?} -> {:?}", self.stage, stage);
            self.stage = stage;
        }
    }

    /// Merge the remote feed since the checkpoint. Returns the number of
    /// cache mutations.
    async fn pull(&self) -> Result<usize> {
        let since = self.store.remote_checkpoint()?;
        let changes = self
            .retry
            .run("remote feed", || self.remote.changes_since(since))
            .await?;

        let mut mutations = 0;
        for entry in &changes.docs {
            let events = analyze(self.store.as_ref(), entry)?;
            mutations += self.merge.apply_batch(&events)?.len();
        }
        if changes.last_generation > since {
            self.store.set_remote_checkpoint(changes.last_generation)?;
        }
        debug!(
            "Pulled {} remote revisions up to generation {}",
            changes.docs.len(),
            changes.last_generation
        );
        Ok(mutations)
    }

    /// Merge queued local batches, or walk the tree when no producer runs.
    async fn scan_local(&mut self) -> Result<usize> {
        if self.batches.is_some() {
            return self.drain_batches();
        }

        let fs = Arc::clone(&self.fs);
        let store = Arc::clone(&self.store);
        let options = self.options.clone();
        let report = tokio::task::spawn_blocking(move || scan_tree(fs.as_ref(), &options, store.as_ref()))
            .await
            .map_err(|e| SyncError::Io(std::io::Error::other(e)))??;
        self.merge_local(report.events)
    }

    fn drain_batches(&mut self) -> Result<usize> {
        let mut pending = Vec::new();
        if let Some(rx) = self.batches.as_mut() {
            loop {
                match rx.try_recv() {
                    Ok(batch) => pending.push(batch),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        warn!("Local event producer stopped, falling back to tree walks");
                        self.batches = None;
                        break;
                    }
                }
            }
        }

        let mut mutations = 0;
        for batch in pending {
            mutations += self.merge_local(batch)?;
        }
        Ok(mutations)
    }

    /// Normalize and merge one batch of local events. Returns the number of
    /// cache mutations.
    pub fn merge_local(&self, batch: Vec<ChangeEvent>) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        let events = self.normalizer.normalize_batch(self.store.as_ref(), batch)?;
        let committed = self.merge.apply_batch(&events)?;
        debug!(
            "Merged local batch of {} events, {} mutations",
            events.len(),
            committed.len()
        );
        Ok(committed.len())
    }

    /// Apply every Doc behind on `side`, parents first for creations and
    /// moves, children first for deletions.
    async fn apply_side(
        &self,
        side: Side,
        stage: SyncStage,
        on_progress: SyncProgressCallback<'_>,
    ) -> Result<ApplyReport> {
        let pending: Vec<Doc> = self
            .store
            .list_all()?
            .into_iter()
            .filter(|doc| doc.sides.behind(side) && !doc.parked)
            .collect();
        let mut report = ApplyReport::default();
        let total = pending.len();
        if total == 0 {
            return Ok(report);
        }
        debug!("{} Docs to apply on the {} side", total, side);
        on_progress(SyncProgress::new(stage, 0, total).with_message(stage.description()));

        let concurrency = self.options.apply_concurrency.max(1);
        let mut done = 0;
        for group in schedule(pending, side) {
            let outcomes: Vec<Result<Outcome>> = stream::iter(group)
                .map(|doc| self.apply_one(side, doc))
                .buffer_unordered(concurrency)
                .collect()
                .await;
            for outcome in outcomes {
                done += 1;
                match outcome? {
                    Outcome::Applied => report.applied += 1,
                    Outcome::Failed(parked) => {
                        report.failed += 1;
                        report.parked.extend(parked);
                    }
                }
            }
            on_progress(SyncProgress::new(stage, done, total));
        }
        Ok(report)
    }

    async fn apply_one(&self, side: Side, doc: Doc) -> Result<Outcome> {
        let generation = doc.sides.target;
        let what = format!("{} {}", side, doc.path);
        let result = match side {
            Side::Local => self.retry.run(&what, || self.local_applier.apply(&doc)).await,
            Side::Remote => self.retry.run(&what, || self.remote_applier.apply(&doc)).await,
        };

        match result {
            Ok(applied) => {
                self.merge.mark_applied(&doc.id, side, generation, applied)?;
                Ok(Outcome::Applied)
            }
            Err(e) => {
                if e.is_transient() {
                    warn!("Giving up on {} for this cycle: {}", what, e);
                } else if e.is_deferred() {
                    debug!("{}", e);
                }
                let parked = self
                    .merge
                    .record_failure(&doc.id, &e, self.options.max_errors)?
                    .filter(|doc| doc.parked)
                    .map(|doc| ParkedDoc::from(&doc));
                Ok(Outcome::Failed(parked))
            }
        }
    }

    /// Purge deleted Docs both sides agree on.
    fn settle(&self) -> Result<usize> {
        let mut purged = 0;
        for doc in self.store.list_all()? {
            if doc.deleted && doc.is_settled() && self.merge.purge(&doc.id)? {
                purged += 1;
            }
        }
        Ok(purged)
    }

    // ========================================================================
    // Operator surface
    // ========================================================================

    /// Counts of settled, pending and parked Docs.
    pub fn status(&self) -> Result<SyncStatus> {
        Ok(SyncStatus::from_docs(&self.store.list_all()?))
    }

    /// Docs excluded from automatic retries.
    pub fn parked(&self) -> Result<Vec<ParkedDoc>> {
        Ok(self
            .store
            .list_all()?
            .iter()
            .filter(|doc| doc.parked)
            .map(ParkedDoc::from)
            .collect())
    }

    /// Re-enable automatic retries for a parked Doc.
    pub fn unpark(&self, id: &str) -> Result<bool> {
        let unparked = self.merge.unpark(id)?;
        if unparked {
            info!("Unparked {}", id);
        }
        Ok(unparked)
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("root", &self.options.root)
            .field("stage", &self.stage)
            .field("watching", &self.batches.is_some())
            .finish_non_exhaustive()
    }
}

/// Group Docs into waves that may run concurrently. Within a depth, moves go
/// first so that a path they free can be reused by a creation.
fn schedule(docs: Vec<Doc>, side: Side) -> Vec<Vec<Doc>> {
    let mut waves: BTreeMap<(u8, i64, u8), Vec<Doc>> = BTreeMap::new();
    for doc in docs {
        let depth = doc.depth() as i64;
        let key = if doc.is_live() {
            (0, depth, u8::from(!is_move(&doc, side)))
        } else {
            (1, -depth, 0)
        };
        waves.entry(key).or_default().push(doc);
    }
    waves.into_values().collect()
}

fn is_move(doc: &Doc, side: Side) -> bool {
    if doc.move_from.as_ref().is_some_and(|m| m.child_move) {
        return false;
    }
    match side {
        Side::Local => doc.move_from.is_some(),
        Side::Remote => doc.remote.as_ref().is_some_and(|r| r.path != doc.path),
    }
}

async fn next_batch(batches: &mut Option<BatchReceiver>) -> Option<Vec<ChangeEvent>> {
    let Some(rx) = batches.as_mut() else {
        return std::future::pending().await;
    };
    let batch = rx.recv().await;
    if batch.is_none() {
        *batches = None;
    }
    batch
}

fn summary(result: &SyncResult) -> String {
    format!(
        "{} remote and {} local changes merged, {} applied locally, {} applied remotely, {} purged, {} failed",
        result.remote_changes,
        result.local_changes,
        result.applied_local,
        result.applied_remote,
        result.purged,
        result.failed
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::DocKind;
    use crate::fs::RealFileSystem;
    use crate::path_identity::PlatformProfile;
    use crate::remote::{MemoryRemote, RemoteChanges, RemoteDoc};
    use crate::store::MemoryStore;
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    fn options(root: &Path) -> SyncOptions {
        SyncOptions::new(root, PlatformProfile::LINUX).with_retries(3, 1, Duration::from_millis(1))
    }

    fn engine(root: &Path, store: &MemoryStore, remote: &MemoryRemote) -> SyncEngine {
        SyncEngine::new(
            options(root),
            Arc::new(store.clone()),
            Arc::new(RealFileSystem),
            Arc::new(remote.clone()),
        )
    }

    #[tokio::test]
    async fn test_remote_file_reaches_disk() {
        let dir = tempfile::tempdir().unwrap();
        let (store, remote) = (MemoryStore::new(), MemoryRemote::new());
        remote.put_file("docs/a.txt", b"hello").unwrap();

        let mut engine = engine(dir.path(), &store, &remote);
        let result = engine.sync().await;
        assert!(result.is_clean(), "{:?}", result);
        assert_eq!(fs::read(dir.path().join("docs/a.txt")).unwrap(), b"hello");
        assert!(engine.status().unwrap().is_settled());

        let again = engine.sync().await;
        assert!(again.is_noop(), "{:?}", again);
    }

    #[tokio::test]
    async fn test_local_file_is_uploaded() {
        let dir = tempfile::tempdir().unwrap();
        let (store, remote) = (MemoryStore::new(), MemoryRemote::new());
        fs::create_dir(dir.path().join("notes")).unwrap();
        fs::write(dir.path().join("notes/todo.md"), "- ship").unwrap();

        let mut engine = engine(dir.path(), &store, &remote);
        assert!(engine.sync().await.is_clean());
        assert_eq!(remote.content_at("notes/todo.md").unwrap(), b"- ship");
        assert!(engine.status().unwrap().is_settled());
        assert!(engine.sync().await.is_noop());
    }

    #[tokio::test]
    async fn test_local_delete_reaches_remote_and_purges() {
        let dir = tempfile::tempdir().unwrap();
        let (store, remote) = (MemoryStore::new(), MemoryRemote::new());
        fs::write(dir.path().join("a.txt"), "x").unwrap();
        let mut engine = engine(dir.path(), &store, &remote);
        engine.sync().await;

        fs::remove_file(dir.path().join("a.txt")).unwrap();
        let result = engine.sync().await;
        assert!(result.is_clean(), "{:?}", result);
        assert!(remote.doc_at("a.txt").is_none());
        assert_eq!(result.purged, 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_remote_trash_removes_local_entry() {
        let dir = tempfile::tempdir().unwrap();
        let (store, remote) = (MemoryStore::new(), MemoryRemote::new());
        remote.put_file("dir/a.txt", b"x").unwrap();
        let mut engine = engine(dir.path(), &store, &remote);
        engine.sync().await;
        assert!(dir.path().join("dir/a.txt").exists());

        remote.trash_path("dir").unwrap();
        let result = engine.sync().await;
        assert!(result.is_clean(), "{:?}", result);
        assert!(!dir.path().join("dir").exists());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_remote_move_moves_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let (store, remote) = (MemoryStore::new(), MemoryRemote::new());
        remote.put_file("a.txt", b"x").unwrap();
        remote.put_folder("sub").unwrap();
        let mut engine = engine(dir.path(), &store, &remote);
        engine.sync().await;

        remote.move_path("a.txt", "sub/b.txt").unwrap();
        assert!(engine.sync().await.is_clean());
        assert!(!dir.path().join("a.txt").exists());
        assert_eq!(fs::read(dir.path().join("sub/b.txt")).unwrap(), b"x");
        assert!(engine.status().unwrap().is_settled());
    }

    #[tokio::test]
    async fn test_progress_walks_the_stages() {
        let dir = tempfile::tempdir().unwrap();
        let (store, remote) = (MemoryStore::new(), MemoryRemote::new());
        remote.put_file("a.txt", b"x").unwrap();
        fs::write(dir.path().join("b.txt"), "y").unwrap();
        let mut engine = engine(dir.path(), &store, &remote);

        let stages = Mutex::new(Vec::new());
        let record = |p: SyncProgress| {
            let mut stages = stages.lock().unwrap();
            if stages.last() != Some(&p.stage) {
                stages.push(p.stage);
            }
        };
        engine.sync_with_progress(&record).await;
        assert_eq!(
            *stages.lock().unwrap(),
            vec![
                SyncStage::PullingRemote,
                SyncStage::ApplyingRemote,
                SyncStage::ScanningLocal,
                SyncStage::ApplyingLocal,
                SyncStage::Settling,
                SyncStage::Idle,
            ]
        );
        assert_eq!(engine.stage(), SyncStage::Idle);
    }

    #[tokio::test]
    async fn test_failed_pull_aborts_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let (store, remote) = (MemoryStore::new(), MemoryRemote::new());
        remote.fail_next(SyncError::remote_fatal("unauthorized"));
        let mut engine = engine(dir.path(), &store, &remote);

        let result = engine.sync().await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("unauthorized"));
        assert!(engine.sync().await.success);
    }

    /// Remote store refusing every creation.
    struct RefusingRemote(MemoryRemote);

    impl RemoteStore for RefusingRemote {
        fn changes_since<'a>(&'a self, generation: u64) -> crate::fs::BoxFuture<'a, Result<RemoteChanges>> {
            self.0.changes_since(generation)
        }

        fn create<'a>(
            &'a self,
            _path: &'a str,
            _kind: DocKind,
            _content: Option<&'a [u8]>,
            _executable: bool,
        ) -> crate::fs::BoxFuture<'a, Result<RemoteDoc>> {
            Box::pin(async { Err(SyncError::remote_fatal("quota exceeded")) })
        }

        fn update<'a>(
            &'a self,
            remote: &'a crate::doc::RemoteRef,
            content: &'a [u8],
            executable: bool,
        ) -> crate::fs::BoxFuture<'a, Result<RemoteDoc>> {
            self.0.update(remote, content, executable)
        }

        fn move_to<'a>(
            &'a self,
            remote: &'a crate::doc::RemoteRef,
            path: &'a str,
        ) -> crate::fs::BoxFuture<'a, Result<RemoteDoc>> {
            self.0.move_to(remote, path)
        }

        fn trash<'a>(&'a self, remote: &'a crate::doc::RemoteRef) -> crate::fs::BoxFuture<'a, Result<RemoteDoc>> {
            self.0.trash(remote)
        }

        fn download<'a>(&'a self, remote: &'a crate::doc::RemoteRef) -> crate::fs::BoxFuture<'a, Result<Vec<u8>>> {
            self.0.download(remote)
        }
    }

    #[tokio::test]
    async fn test_repeated_failures_park_and_unpark() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        fs::write(dir.path().join("big.bin"), "x").unwrap();
        let mut engine = SyncEngine::new(
            options(dir.path()).with_retries(2, 0, Duration::from_millis(1)),
            Arc::new(store.clone()),
            Arc::new(RealFileSystem),
            Arc::new(RefusingRemote(MemoryRemote::new())),
        );

        let first = engine.sync().await;
        assert_eq!(first.failed, 1);
        assert!(first.newly_parked.is_empty());

        let second = engine.sync().await;
        assert_eq!(second.newly_parked.len(), 1);
        let parked = engine.parked().unwrap();
        assert_eq!(parked[0].path, "big.bin");
        assert!(parked[0].last_error.as_deref().unwrap().contains("quota"));

        // Parked Docs are not retried.
        assert_eq!(engine.sync().await.failed, 0);

        assert!(engine.unpark(&parked[0].id).unwrap());
        assert_eq!(engine.status().unwrap().parked, 0);
        assert_eq!(engine.sync().await.failed, 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let (store, remote) = (MemoryStore::new(), MemoryRemote::new());
        remote.put_file("a.txt", b"x").unwrap();
        let mut engine = engine(dir.path(), &store, &remote);

        let (stop, shutdown) = watch::channel(false);
        let handle = tokio::spawn(async move {
            engine.run(shutdown).await.unwrap();
            engine
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        stop.send(true).unwrap();

        let engine = handle.await.unwrap();
        assert_eq!(engine.stage(), SyncStage::Idle);
        assert!(dir.path().join("a.txt").exists());
    }

    #[test]
    fn test_schedule_orders_waves() {
        let folder = Doc::new("a", "a", DocKind::Folder, Side::Remote);
        let child = Doc::new("a/x", "a/x", DocKind::File, Side::Remote);
        let mut moved = Doc::new("b", "b", DocKind::File, Side::Remote);
        moved.move_from = Some(crate::doc::MoveFrom {
            id: "c".into(),
            path: "c".into(),
            child_move: false,
        });
        let mut gone_parent = Doc::new("d", "d", DocKind::Folder, Side::Remote);
        gone_parent.trashed = true;
        let mut gone_child = Doc::new("d/y", "d/y", DocKind::File, Side::Remote);
        gone_child.trashed = true;

        let waves = schedule(
            vec![gone_parent, child, folder, gone_child, moved],
            Side::Local,
        );
        let paths: Vec<Vec<&str>> = waves
            .iter()
            .map(|w| w.iter().map(|d| d.path.as_str()).collect())
            .collect();
        assert_eq!(paths, vec![vec!["b"], vec!["a"], vec!["a/x"], vec!["d/y"], vec!["d"]]);
    }
}
