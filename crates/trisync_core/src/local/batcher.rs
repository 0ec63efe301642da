//! Coalescing of raw notifications into ordered change batches.
//!
//! The [`Batcher`] is a synchronous state machine: the watcher task pushes raw
//! notifications as they arrive and drains the batcher when the debounce
//! window closes. Draining yields one [`PendingChange`] per touched path, in
//! first-touch order. [`enrich`] then stats each survivor to build the
//! [`ChangeEvent`]s handed to the merge engine.
//!
//! Coalescing rules, per path:
//!
//! | Pending | Incoming | Result |
//! |---|---|---|
//! | created | modified | created |
//! | created | removed | nothing |
//! | removed | created | modified (a rename when the inode matches another removal) |
//! | renamed | modified | renamed, then modified |
//! | renamed a->b | renamed b->c | renamed a->c |
//!
//! A delete and a create carrying the same inode inside one window become a
//! single rename.

use std::collections::HashMap;
use std::path::Path;

use indexmap::IndexMap;
use log::{debug, warn};

use crate::doc::DocKind;
use crate::events::{ChangeEvent, ChangeKind, FileStats};
use crate::fs::{FileSystem, ModePolicy};
use crate::ignore::IgnoreRules;
use crate::path_utils;

use super::raw::{RawEvent, RawKind};

#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingKind {
    Created,
    Modified,
    Removed,
    Renamed { from: String },
}

#[derive(Debug, Clone)]
struct Pending {
    kind: PendingKind,
    is_dir: Option<bool>,
    ino: Option<u64>,
    /// Content also changed after a rename.
    modified: bool,
}

impl Pending {
    fn new(kind: PendingKind, raw: &RawEvent, ino: Option<u64>) -> Self {
        Self {
            kind,
            is_dir: raw.is_dir,
            ino,
            modified: false,
        }
    }
}

/// A coalesced change waiting for enrichment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChange {
    /// Structured kind (never `Scan`).
    pub kind: ChangeKind,
    /// Root-relative path.
    pub path: String,
    /// Source path of a rename.
    pub old_path: Option<String>,
    /// Inode, when known.
    pub ino: Option<u64>,
    /// Whether the entry is a folder, when known.
    pub is_dir: Option<bool>,
}

/// Debounce state of the event producer.
#[derive(Debug)]
pub struct Batcher {
    ignore: IgnoreRules,
    pending: IndexMap<String, Pending>,
    paths_by_ino: HashMap<u64, String>,
    inos_by_path: HashMap<String, u64>,
}

impl Batcher {
    /// Create an empty batcher.
    pub fn new(ignore: IgnoreRules) -> Self {
        Self {
            ignore,
            pending: IndexMap::new(),
            paths_by_ino: HashMap::new(),
            inos_by_path: HashMap::new(),
        }
    }

    /// Record known inode/path pairs (typically from the initial scan).
    pub fn seed<I>(&mut self, inodes: I)
    where
        I: IntoIterator<Item = (u64, String)>,
    {
        for (ino, path) in inodes {
            self.remember(ino, &path);
        }
    }

    /// Last known path of an inode.
    pub fn path_of(&self, ino: u64) -> Option<&str> {
        self.paths_by_ino.get(&ino).map(String::as_str)
    }

    /// Whether nothing is waiting to be flushed.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Number of paths waiting to be flushed.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Fold one raw notification into the pending window.
    pub fn push(&mut self, raw: RawEvent) {
        let path = raw.path.trim_matches('/').to_string();
        if path.is_empty() {
            return;
        }
        match raw.kind.clone() {
            RawKind::Created => self.on_created(path, &raw),
            RawKind::Modified => self.on_modified(path, &raw),
            RawKind::Removed => self.on_removed(path, &raw),
            RawKind::Renamed { from } => {
                let from = from.trim_matches('/').to_string();
                if from.is_empty() || from == path {
                    self.on_modified(path, &raw);
                } else {
                    self.on_renamed(from, path, &raw);
                }
            }
        }
    }

    /// Close the window: return the coalesced changes in order.
    ///
    /// Renames partially covered by ignore rules degrade to a creation (source
    /// ignored) or a deletion (destination ignored).
    pub fn drain(&mut self) -> Vec<PendingChange> {
        let mut out = Vec::with_capacity(self.pending.len());
        for (path, pending) in std::mem::take(&mut self.pending) {
            let change = |kind, path: String, old_path| PendingChange {
                kind,
                path,
                old_path,
                ino: pending.ino,
                is_dir: pending.is_dir,
            };
            let ignored = self.ignore.is_ignored(&path);

            match &pending.kind {
                PendingKind::Renamed { from } => {
                    let from_ignored = self.ignore.is_ignored(from);
                    match (from_ignored, ignored) {
                        (true, true) => {}
                        (true, false) => out.push(change(ChangeKind::Created, path, None)),
                        (false, true) => {
                            out.push(change(ChangeKind::Deleted, from.clone(), None));
                        }
                        (false, false) => {
                            out.push(change(ChangeKind::Renamed, path.clone(), Some(from.clone())));
                            if pending.modified {
                                out.push(change(ChangeKind::Modified, path, None));
                            }
                        }
                    }
                }
                _ if ignored => {}
                PendingKind::Created => out.push(change(ChangeKind::Created, path, None)),
                PendingKind::Modified => out.push(change(ChangeKind::Modified, path, None)),
                PendingKind::Removed => {
                    self.forget(&path);
                    out.push(change(ChangeKind::Deleted, path, None));
                }
            }
        }
        if !out.is_empty() {
            debug!("Batcher flushed {} changes", out.len());
        }
        out
    }

    fn on_created(&mut self, path: String, raw: &RawEvent) {
        let ino = raw.ino;

        // A removal of the same inode elsewhere in this window is a move.
        if let Some(ino) = ino
            && let Some(from) = self.pending_removal_of(ino, &path)
        {
            self.pending.shift_remove(&from);
            debug!("Paired remove of {} with create of {} (ino {})", from, path, ino);
            self.remember(ino, &path);
            self.pending
                .insert(path, Pending::new(PendingKind::Renamed { from }, raw, Some(ino)));
            return;
        }

        if let Some(ino) = ino {
            self.remember(ino, &path);
        }
        match self.pending.get_mut(&path) {
            Some(existing) => {
                if existing.kind == PendingKind::Removed {
                    // Replaced in place, as editors do on save.
                    existing.kind = PendingKind::Modified;
                }
                existing.ino = ino.or(existing.ino);
                existing.is_dir = raw.is_dir.or(existing.is_dir);
            }
            None => {
                self.pending
                    .insert(path, Pending::new(PendingKind::Created, raw, ino));
            }
        }
    }

    fn on_modified(&mut self, path: String, raw: &RawEvent) {
        let ino = raw.ino.or_else(|| self.inos_by_path.get(&path).copied());
        match self.pending.get_mut(&path) {
            Some(existing) => {
                match existing.kind {
                    PendingKind::Removed => existing.kind = PendingKind::Modified,
                    PendingKind::Renamed { .. } => existing.modified = true,
                    PendingKind::Created | PendingKind::Modified => {}
                }
                existing.ino = ino.or(existing.ino);
            }
            None => {
                self.pending
                    .insert(path, Pending::new(PendingKind::Modified, raw, ino));
            }
        }
    }

    fn on_removed(&mut self, path: String, raw: &RawEvent) {
        let ino = raw.ino.or_else(|| self.inos_by_path.get(&path).copied());

        // Whatever happened below a removed folder is moot.
        let prefix = format!("{}/", path);
        self.pending.retain(|p, pending| {
            !(p.starts_with(&prefix)
                && matches!(pending.kind, PendingKind::Created | PendingKind::Modified))
        });

        match self.pending.shift_remove(&path) {
            Some(Pending {
                kind: PendingKind::Created,
                ..
            }) => {
                debug!("{} created and removed within one window", path);
                self.forget(&path);
            }
            Some(Pending {
                kind: PendingKind::Renamed { from },
                is_dir,
                ..
            }) => {
                self.pending.insert(
                    from,
                    Pending {
                        kind: PendingKind::Removed,
                        is_dir,
                        ino,
                        modified: false,
                    },
                );
            }
            Some(existing) => {
                self.pending.insert(
                    path,
                    Pending {
                        kind: PendingKind::Removed,
                        ino,
                        ..existing
                    },
                );
            }
            None => {
                self.pending
                    .insert(path, Pending::new(PendingKind::Removed, raw, ino));
            }
        }
    }

    fn on_renamed(&mut self, from: String, to: String, raw: &RawEvent) {
        let ino = raw.ino.or_else(|| self.inos_by_path.get(&from).copied());
        self.move_known(&from, &to);

        let mut next = match self.pending.shift_remove(&from) {
            Some(Pending {
                kind: PendingKind::Created | PendingKind::Removed,
                ..
            }) => Pending::new(PendingKind::Created, raw, ino),
            Some(Pending {
                kind: PendingKind::Renamed { from: origin },
                modified,
                ..
            }) if origin == to => {
                // Moved back where it started.
                if modified {
                    Pending::new(PendingKind::Modified, raw, ino)
                } else {
                    return;
                }
            }
            Some(Pending {
                kind: PendingKind::Renamed { from: origin },
                modified,
                ..
            }) => Pending {
                modified,
                ..Pending::new(PendingKind::Renamed { from: origin }, raw, ino)
            },
            Some(Pending {
                kind: PendingKind::Modified,
                ..
            }) => Pending {
                modified: true,
                ..Pending::new(PendingKind::Renamed { from: from.clone() }, raw, ino)
            },
            None => Pending::new(PendingKind::Renamed { from: from.clone() }, raw, ino),
        };

        if let Some(existing) = self.pending.shift_remove(&to)
            && existing.kind == PendingKind::Removed
            && next.kind == PendingKind::Created
        {
            next.kind = PendingKind::Modified;
        }
        self.pending.insert(to.clone(), next);

        // Pending changes below a moved folder follow it. Removals keep their
        // original path.
        let prefix = format!("{}/", from);
        let moved: Vec<String> = self
            .pending
            .iter()
            .filter(|(p, pending)| p.starts_with(&prefix) && pending.kind != PendingKind::Removed)
            .map(|(p, _)| p.clone())
            .collect();
        for old in moved {
            if let Some(new) = path_utils::replace_prefix(&old, &from, &to)
                && let Some(pending) = self.pending.shift_remove(&old)
            {
                self.pending.insert(new, pending);
            }
        }
    }

    fn pending_removal_of(&self, ino: u64, path: &str) -> Option<String> {
        self.pending
            .iter()
            .find(|(p, pending)| {
                p.as_str() != path && pending.kind == PendingKind::Removed && pending.ino == Some(ino)
            })
            .map(|(p, _)| p.clone())
    }

    fn remember(&mut self, ino: u64, path: &str) {
        if let Some(previous) = self.paths_by_ino.insert(ino, path.to_string())
            && previous != path
        {
            self.inos_by_path.remove(&previous);
        }
        self.inos_by_path.insert(path.to_string(), ino);
    }

    fn forget(&mut self, path: &str) {
        if let Some(ino) = self.inos_by_path.remove(path)
            && self.paths_by_ino.get(&ino).is_some_and(|p| p == path)
        {
            self.paths_by_ino.remove(&ino);
        }
    }

    /// Carry the inode map over a move, descendants included.
    fn move_known(&mut self, from: &str, to: &str) {
        let affected: Vec<(String, u64)> = self
            .inos_by_path
            .iter()
            .filter(|(p, _)| p.as_str() == from || path_utils::is_descendant(p, from))
            .map(|(p, ino)| (p.clone(), *ino))
            .collect();
        for (old, ino) in affected {
            let new = if old == from {
                Some(to.to_string())
            } else {
                path_utils::replace_prefix(&old, from, to)
            };
            self.inos_by_path.remove(&old);
            if let Some(new) = new {
                self.remember(ino, &new);
            }
        }
    }
}

/// Stat every pending change and build merge-ready events.
///
/// Entries that vanished before they could be read are dropped; the removal
/// that follows reports them. A rename whose destination vanished becomes a
/// deletion of its source.
pub fn enrich(fs: &dyn FileSystem, root: &Path, modes: &ModePolicy, changes: Vec<PendingChange>) -> Vec<ChangeEvent> {
    let mut out = Vec::with_capacity(changes.len());
    for change in changes {
        let entity = if change.is_dir.unwrap_or(false) {
            DocKind::Folder
        } else {
            DocKind::File
        };

        if change.kind == ChangeKind::Deleted {
            out.push(ChangeEvent::local(ChangeKind::Deleted, entity, change.path).with_ino(change.ino));
            continue;
        }

        let abs = path_utils::to_absolute(root, &change.path);
        let stat = match fs.stat(&abs) {
            Ok(stat) => stat,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{} vanished before it could be read", change.path);
                if let Some(old) = change.old_path {
                    out.push(ChangeEvent::local(ChangeKind::Deleted, entity, old).with_ino(change.ino));
                }
                continue;
            }
            Err(e) => {
                warn!("Skipping {}: {}", change.path, e);
                continue;
            }
        };

        let (entity, stats) = if stat.is_dir {
            (DocKind::Folder, FileStats::folder(stat.modified_at))
        } else {
            let hash = match fs.checksum(&abs) {
                Ok(hash) => hash,
                Err(e) => {
                    warn!("Skipping {}: cannot read content: {}", change.path, e);
                    continue;
                }
            };
            let stats = FileStats::file(stat.size, stat.modified_at, hash)
                .executable(modes.is_executable(stat.mode));
            (DocKind::File, stats)
        };

        let event = ChangeEvent::local(change.kind, entity, change.path)
            .with_ino(stat.ino.or(change.ino))
            .with_stats(stats);
        out.push(match change.old_path {
            Some(old) => event.with_old_path(old),
            None => event,
        });
    }
    out
}
