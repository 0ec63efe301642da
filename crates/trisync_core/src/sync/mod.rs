//! Sync orchestration.
//!
//! One reconciliation cycle walks through these stages:
//!
//! ```text
//! Idle -> PullingRemote -> ApplyingRemote -> ScanningLocal -> ApplyingLocal -> Settling -> Idle
//! ```
//!
//! - `PullingRemote`: merge the remote feed since the stored checkpoint
//! - `ApplyingRemote`: bring the local tree up to date (Docs behind on the local side)
//! - `ScanningLocal`: merge the local batches queued by the event producer
//! - `ApplyingLocal`: push local changes to the remote store (Docs behind on the remote side)
//! - `Settling`: purge deleted Docs both sides agree on
//!
//! # Key Components
//!
//! - [`SyncEngine`] - runs cycles, alone or in a long-running loop
//! - [`SyncProgress`] / [`SyncStage`] - progress reporting
//! - [`SyncResult`] / [`SyncStatus`] - cycle outcome and cache summary

mod engine;
mod local_apply;
mod remote_apply;
mod retry;

pub use engine::{SyncEngine, SyncProgressCallback};
pub use retry::RetryPolicy;

use serde::{Deserialize, Serialize};

use crate::doc::Doc;

/// Outcome of one reconciliation cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncResult {
    /// Whether the cycle ran to the end
    pub success: bool,
    /// Change events merged from the remote feed
    pub remote_changes: usize,
    /// Change events merged from the local producer
    pub local_changes: usize,
    /// Docs brought up to date on the local filesystem
    pub applied_local: usize,
    /// Docs brought up to date on the remote store
    pub applied_remote: usize,
    /// Deleted Docs removed from the cache
    pub purged: usize,
    /// Applications that failed this cycle
    pub failed: usize,
    /// Docs parked by this cycle
    pub newly_parked: Vec<ParkedDoc>,
    /// Error message if the cycle aborted
    pub error: Option<String>,
}

impl SyncResult {
    /// Create an empty successful result
    pub fn success() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    /// Create a failed result
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Whether the cycle completed without any failed application.
    pub fn is_clean(&self) -> bool {
        self.success && self.failed == 0
    }

    /// Whether the cycle changed anything.
    pub fn is_noop(&self) -> bool {
        self.remote_changes == 0
            && self.local_changes == 0
            && self.applied_local == 0
            && self.applied_remote == 0
            && self.purged == 0
    }
}

/// Progress information for sync operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncProgress {
    /// Current stage of the cycle
    pub stage: SyncStage,
    /// Current item being processed (1-indexed)
    pub current: usize,
    /// Total items to process in this stage
    pub total: usize,
    /// Overall percentage complete (0-100)
    pub percent: u8,
    /// Optional detail message
    pub message: Option<String>,
}

impl SyncProgress {
    fn new(stage: SyncStage, current: usize, total: usize) -> Self {
        Self {
            stage,
            current,
            total,
            percent: stage.percent(current, total),
            message: None,
        }
    }

    fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Stages of a reconciliation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    /// Between cycles
    Idle,
    /// Merging the remote feed
    PullingRemote,
    /// Applying pending changes to the local filesystem
    ApplyingRemote,
    /// Merging queued local batches
    ScanningLocal,
    /// Pushing pending changes to the remote store
    ApplyingLocal,
    /// Purging Docs deleted on both sides
    Settling,
    /// The cycle aborted
    Error,
}

impl SyncStage {
    /// Get a human-readable description of this stage
    pub fn description(&self) -> &'static str {
        match self {
            SyncStage::Idle => "Up to date",
            SyncStage::PullingRemote => "Fetching remote changes...",
            SyncStage::ApplyingRemote => "Updating local files...",
            SyncStage::ScanningLocal => "Collecting local changes...",
            SyncStage::ApplyingLocal => "Uploading local changes...",
            SyncStage::Settling => "Cleaning up...",
            SyncStage::Error => "Sync failed",
        }
    }

    /// Percent range covered by this stage.
    fn span(&self) -> (u8, u8) {
        match self {
            SyncStage::Idle => (100, 100),
            SyncStage::PullingRemote => (0, 20),
            SyncStage::ApplyingRemote => (20, 45),
            SyncStage::ScanningLocal => (45, 55),
            SyncStage::ApplyingLocal => (55, 90),
            SyncStage::Settling => (90, 99),
            SyncStage::Error => (0, 0),
        }
    }

    fn percent(&self, current: usize, total: usize) -> u8 {
        let (start, end) = self.span();
        if total == 0 {
            return start;
        }
        let done = current.min(total) as u64 * u64::from(end - start) / total as u64;
        start + done as u8
    }
}

impl std::fmt::Display for SyncStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// Summary of the metadata cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// Docs in the cache, deleted ones included
    pub total: usize,
    /// Docs both replicas agree on
    pub settled: usize,
    /// Docs waiting for the local filesystem
    pub pending_local: usize,
    /// Docs waiting for the remote store
    pub pending_remote: usize,
    /// Docs excluded from automatic retries
    pub parked: usize,
    /// Live Docs whose path the local platform cannot hold
    pub incompatible: usize,
}

impl SyncStatus {
    /// Tally a list of Docs.
    pub fn from_docs<'a>(docs: impl IntoIterator<Item = &'a Doc>) -> Self {
        let mut status = SyncStatus::default();
        for doc in docs {
            status.total += 1;
            if doc.is_settled() {
                status.settled += 1;
            }
            if doc.sides.behind(crate::doc::Side::Local) {
                status.pending_local += 1;
            }
            if doc.sides.behind(crate::doc::Side::Remote) {
                status.pending_remote += 1;
            }
            if doc.parked {
                status.parked += 1;
            }
            if doc.is_live() && doc.is_incompatible() {
                status.incompatible += 1;
            }
        }
        status
    }

    /// Whether nothing is pending.
    pub fn is_settled(&self) -> bool {
        self.pending_local == 0 && self.pending_remote == 0
    }
}

/// A Doc excluded from automatic retries, surfaced to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParkedDoc {
    /// Doc id
    pub id: String,
    /// Current path
    pub path: String,
    /// Consecutive failures
    pub error_count: u32,
    /// Message of the last failure
    pub last_error: Option<String>,
}

impl From<&Doc> for ParkedDoc {
    fn from(doc: &Doc) -> Self {
        Self {
            id: doc.id.clone(),
            path: doc.path.clone(),
            error_count: doc.error_count,
            last_error: doc.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::{DocKind, Side};

    #[test]
    fn test_sync_result_constructors() {
        let ok = SyncResult::success();
        assert!(ok.is_clean());
        assert!(ok.is_noop());

        let failed = SyncResult::failure("remote unreachable");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("remote unreachable"));
    }

    #[test]
    fn test_stage_percent_stays_in_span() {
        assert_eq!(SyncStage::PullingRemote.percent(0, 0), 0);
        assert_eq!(SyncStage::ApplyingLocal.percent(0, 10), 55);
        assert_eq!(SyncStage::ApplyingLocal.percent(10, 10), 90);
        assert_eq!(SyncStage::ApplyingLocal.percent(50, 10), 90);
        assert_eq!(SyncStage::Idle.percent(0, 0), 100);
    }

    #[test]
    fn test_stage_serializes_snake_case() {
        let json = serde_json::to_string(&SyncStage::PullingRemote).unwrap();
        assert_eq!(json, "\"pulling_remote\"");
    }

    #[test]
    fn test_status_from_docs() {
        let pending = Doc::new("a", "a", DocKind::File, Side::Remote);
        let mut settled = Doc::new("b", "b", DocKind::File, Side::Local);
        settled.sides = settled.sides.settle();
        let mut parked = Doc::new("c", "c", DocKind::File, Side::Local);
        parked.parked = true;
        let mut incompatible = Doc::new("CON", "con", DocKind::File, Side::Remote);
        incompatible.sides = incompatible.sides.settle();
        incompatible.incompatibilities = crate::path_restrictions::PathRestrictions::WINDOWS.check("con", DocKind::File);

        let status = SyncStatus::from_docs([&pending, &settled, &parked, &incompatible]);
        assert_eq!(status.total, 4);
        assert_eq!(status.settled, 2);
        assert_eq!(status.incompatible, 1);
        assert_eq!(status.pending_local, 1);
        assert_eq!(status.pending_remote, 1);
        assert_eq!(status.parked, 1);
        assert!(!status.is_settled());
    }
}
