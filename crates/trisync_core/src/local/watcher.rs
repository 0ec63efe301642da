//! Lifecycle of the local event producer.
//!
//! [`LocalWatcher::start`] spawns one task that owns the [`Batcher`]. The task
//! first walks the tree and hands the scan over as the first batch, then
//! debounces raw notifications: every notification pushes the flush deadline
//! back by the debounce window, and a full window flushes early. Batches are
//! delivered whole through a bounded channel to a single consumer.
//!
//! ```ignore
//! let (watcher, mut batches) = LocalWatcher::start(options, store, fs);
//! let adapter = NotifyAdapter::start(&root, watcher.sender())?;
//! while let Some(batch) = batches.recv().await {
//!     engine.merge_local(batch)?;
//! }
//! watcher.stop().await?;
//! ```

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};

use crate::config::SyncOptions;
use crate::error::{Result, SyncError};
use crate::events::ChangeEvent;
use crate::fs::{FileSystem, ModePolicy};
use crate::store::MetadataStore;

use super::batcher::{Batcher, enrich};
use super::raw::{RawEvent, RawEventSender};
use super::scan::scan_tree;

/// Consumer side of the batch queue.
pub type BatchReceiver = mpsc::Receiver<Vec<ChangeEvent>>;

/// Running event producer for one sync root.
#[derive(Debug)]
pub struct LocalWatcher {
    sender: RawEventSender,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl LocalWatcher {
    /// Spawn the producer task. Must be called from within a Tokio runtime.
    pub fn start(
        options: SyncOptions,
        store: Arc<dyn MetadataStore>,
        fs: Arc<dyn FileSystem>,
    ) -> (Self, BatchReceiver) {
        let capacity = options.batch_capacity.max(1);
        let (raw_tx, raw_rx) = mpsc::channel(capacity);
        let (batch_tx, batch_rx) = mpsc::channel(capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let producer = Producer {
            batcher: Batcher::new(options.ignore.clone()),
            options,
            store,
            fs,
            batch_tx,
        };
        let task = tokio::spawn(producer.run(raw_rx, shutdown_rx));

        let watcher = Self {
            sender: RawEventSender::new(raw_tx),
            shutdown: Some(shutdown_tx),
            task: Some(task),
        };
        (watcher, batch_rx)
    }

    /// Handle for platform adapters to feed raw notifications.
    pub fn sender(&self) -> RawEventSender {
        self.sender.clone()
    }

    /// Flush the pending window and wait for the producer to exit.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| SyncError::Io(std::io::Error::other(e)))?;
        }
        Ok(())
    }
}

struct Producer {
    batcher: Batcher,
    options: SyncOptions,
    store: Arc<dyn MetadataStore>,
    fs: Arc<dyn FileSystem>,
    batch_tx: mpsc::Sender<Vec<ChangeEvent>>,
}

impl Producer {
    async fn run(
        mut self,
        mut raw_rx: mpsc::Receiver<RawEvent>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        if self.initial_scan().await.is_err() {
            return;
        }

        let mut deadline: Option<Instant> = None;
        loop {
            tokio::select! {
                raw = raw_rx.recv() => match raw {
                    Some(raw) => {
                        debug!("{}", raw);
                        self.batcher.push(raw);
                        if self.batcher.len() >= self.options.batch_capacity {
                            deadline = None;
                            if self.flush().await.is_err() {
                                return;
                            }
                        } else {
                            deadline = Some(Instant::now() + self.options.debounce);
                        }
                    }
                    None => break,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    deadline = None;
                    if self.flush().await.is_err() {
                        return;
                    }
                }
                _ = &mut shutdown_rx => break,
            }
        }

        // Notifications already queued belong to the last window.
        while let Ok(raw) = raw_rx.try_recv() {
            self.batcher.push(raw);
        }
        let _ = self.flush().await;
        debug!("Local watcher stopped");
    }

    async fn initial_scan(&mut self) -> Result<()> {
        let fs = self.fs.clone();
        let store = self.store.clone();
        let options = self.options.clone();
        let scanned = tokio::task::spawn_blocking(move || scan_tree(fs.as_ref(), &options, store.as_ref()))
            .await
            .map_err(|e| SyncError::Io(std::io::Error::other(e)));

        match scanned.and_then(|report| report) {
            Ok(report) => {
                info!("Initial scan found {} entries", report.entries);
                self.batcher.seed(report.inodes);
                self.send(report.events).await
            }
            Err(e) => {
                // Watching still works; the next start rescans.
                warn!("Initial scan failed: {}", e);
                Ok(())
            }
        }
    }

    async fn flush(&mut self) -> Result<()> {
        let changes = self.batcher.drain();
        if changes.is_empty() {
            return Ok(());
        }
        let fs = self.fs.clone();
        let root = self.options.root.clone();
        let modes = ModePolicy::for_profile(&self.options.profile);
        let events = tokio::task::spawn_blocking(move || enrich(fs.as_ref(), &root, &modes, changes))
            .await
            .map_err(|e| SyncError::Io(std::io::Error::other(e)))?;
        if events.is_empty() {
            return Ok(());
        }
        self.send(events).await
    }

    async fn send(&self, events: Vec<ChangeEvent>) -> Result<()> {
        debug!("Handing over a batch of {} events", events.len());
        self.batch_tx.send(events).await.map_err(|_| {
            debug!("Batch consumer went away");
            SyncError::ChannelClosed
        })
    }
}
