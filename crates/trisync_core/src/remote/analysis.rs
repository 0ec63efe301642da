//! Remote feed analysis.
//!
//! Compares feed entries with the remote reference each Doc carries and emits
//! the change events that explain the difference. Paths are compared against
//! the remote path last seen (`Doc::remote.path`), not against `Doc::path`: a
//! Doc renamed locally but not yet pushed must not look like a remote move.

use log::{debug, trace};

use crate::doc::DocKind;
use crate::error::Result;
use crate::events::{ChangeEvent, ChangeKind};
use crate::store::MetadataStore;

use super::{RemoteChanges, RemoteDoc};

/// Change events explaining one feed entry (zero, one or two).
pub fn analyze(store: &dyn MetadataStore, entry: &RemoteDoc) -> Result<Vec<ChangeEvent>> {
    let event = |kind| {
        ChangeEvent::remote(kind, entry.kind, entry.path.clone(), entry.to_ref()).with_stats(entry.stats())
    };

    let Some(doc) = store.get_by_remote_id(&entry.id)? else {
        if entry.trashed {
            trace!("Ignoring trashed remote document {} we never had", entry.id);
            return Ok(Vec::new());
        }
        return Ok(vec![event(ChangeKind::Created)]);
    };

    let known = doc.remote.as_ref();
    if known.is_some_and(|r| r.generation >= entry.generation) {
        trace!("Skipping echo of {} at generation {}", entry.path, entry.generation);
        return Ok(Vec::new());
    }

    if entry.trashed {
        if !doc.is_live() {
            return Ok(Vec::new());
        }
        return Ok(vec![event(ChangeKind::Deleted)]);
    }

    let Some(known) = known else {
        return Ok(vec![event(ChangeKind::Created)]);
    };
    if known.path == entry.path {
        return Ok(vec![event(ChangeKind::Modified)]);
    }

    debug!("Remote move {} -> {}", known.path, entry.path);
    let mut events = vec![event(ChangeKind::Renamed).with_old_path(known.path.clone())];
    let content_changed = entry.kind == DocKind::File
        && (known.content_hash != entry.content_hash || known.executable != entry.executable);
    if content_changed {
        events.push(event(ChangeKind::Modified));
    }
    Ok(events)
}

/// Change events for a whole feed page, in feed order.
pub fn analyze_changes(store: &dyn MetadataStore, changes: &RemoteChanges) -> Result<Vec<ChangeEvent>> {
    let mut events = Vec::with_capacity(changes.docs.len());
    for entry in &changes.docs {
        events.extend(analyze(store, entry)?);
    }
    Ok(events)
}
