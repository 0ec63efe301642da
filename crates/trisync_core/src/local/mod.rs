//! The local event producer.
//!
//! Turns the raw, unordered and possibly duplicated notification stream of the
//! local filesystem into ordered batches of [`ChangeEvent`](crate::events::ChangeEvent)s:
//!
//! - [`scan_tree`]: full walk on start, with offline move and deletion detection
//! - [`Batcher`]: debounce window coalescing and inode-based rename pairing
//! - [`LocalWatcher`]: the task tying both to a bounded batch queue
//! - `NotifyAdapter` (feature `watcher`): native OS notifications

mod batcher;
mod raw;
mod scan;
mod watcher;

#[cfg(feature = "watcher")]
mod notify_adapter;

pub use batcher::{Batcher, PendingChange, enrich};
pub use raw::{RawEvent, RawEventSender, RawKind};
pub use scan::{ScanReport, scan_tree};
pub use watcher::{BatchReceiver, LocalWatcher};

#[cfg(feature = "watcher")]
pub use notify_adapter::NotifyAdapter;
