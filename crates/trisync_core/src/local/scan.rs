//! Full tree walk of the sync root.
//!
//! Run when the producer starts. Every entry found becomes a `scan` event;
//! the walk is then compared with the metadata cache to find what changed
//! while nothing was watching:
//!
//! - an entry carrying the inode of a cached Doc whose path is gone from disk
//!   is an offline move (`renamed`), and descendants of a moved folder are
//!   matched against their translated path
//! - a live cached Doc that the walk did not see is an offline deletion
//!
//! Docs still waiting for the local applier are considered seen: what is on
//! disk for them is the state before the pending application.

use std::collections::HashSet;
use std::path::Path;

use log::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::SyncOptions;
use crate::doc::{Doc, DocKind, Side};
use crate::error::{Result, SyncError};
use crate::events::{ChangeEvent, ChangeKind, FileStats};
use crate::fs::{FileStat, FileSystem, ModePolicy};
use crate::path_utils;
use crate::store::MetadataStore;

/// Outcome of a tree walk.
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Events to merge, parents before children, deletions last.
    pub events: Vec<ChangeEvent>,
    /// Entries found on disk.
    pub entries: usize,
    /// Unreadable entries whose subtree was skipped.
    pub skipped: usize,
    /// Entries moved while offline.
    pub offline_moves: usize,
    /// Docs deleted while offline.
    pub offline_deletions: usize,
    /// Inode of every entry found, to seed the batcher.
    pub inodes: Vec<(u64, String)>,
}

/// Walk the sync root and diff it against the metadata cache.
pub fn scan_tree(
    fs: &dyn FileSystem,
    options: &SyncOptions,
    store: &dyn MetadataStore,
) -> Result<ScanReport> {
    let root = options.root.as_path();
    fs.stat(root).map_err(|e| SyncError::FileRead {
        path: root.to_path_buf(),
        source: e,
    })?;

    let profile = &options.profile;
    let modes = ModePolicy::for_profile(profile);
    let mut report = ScanReport::default();
    let mut seen: HashSet<String> = HashSet::new();
    // (old, new) prefixes of folders moved while offline.
    let mut moved_folders: Vec<(String, String)> = Vec::new();
    // Subtrees that could not be listed; their Docs are not deletions.
    let mut unreadable: Vec<String> = Vec::new();

    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| match relative(root, entry.path()) {
            Ok(rel) => !options.ignore.is_ignored(&rel),
            Err(_) => false,
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry during scan: {}", e);
                report.skipped += 1;
                if let Some(path) = e.path().and_then(|p| relative(root, p).ok()) {
                    unreadable.push(path);
                }
                continue;
            }
        };
        let path = relative(root, entry.path())?;
        let stat = match fs.stat(entry.path()) {
            Ok(stat) => stat,
            Err(e) => {
                warn!("Skipping {}: {}", path, e);
                report.skipped += 1;
                continue;
            }
        };
        report.entries += 1;
        if let Some(ino) = stat.ino {
            report.inodes.push((ino, path.clone()));
        }

        let entity = if stat.is_dir {
            DocKind::Folder
        } else {
            DocKind::File
        };
        let lookup = translate(&path, &moved_folders);
        let known = store
            .get(&profile.id_for(&lookup))?
            .filter(|doc| doc.is_live() && doc.kind == entity);

        if let Some(doc) = &known {
            seen.insert(doc.id.clone());
            if doc.sides.behind(Side::Local) && doc.ino.is_some() && doc.ino == stat.ino {
                debug!("{} has a pending local application, not rescanned", doc.path);
                continue;
            }
        } else if let Some(source) = moved_source(fs, options, store, &stat, entity, &lookup)? {
            seen.insert(source.id.clone());
            if source.sides.behind(Side::Local) {
                debug!("{} will be moved by the local applier", source.path);
                continue;
            }
            debug!("Offline move {} -> {}", source.path, path);
            if source.is_folder() {
                moved_folders.push((source.path.clone(), path.clone()));
            }
            let Some(stats) = stats_or_skip(fs, &modes, entry.path(), &stat, Some(&source), &mut report) else {
                continue;
            };
            report.offline_moves += 1;
            report.events.push(
                ChangeEvent::local_rename(entity, source.path.clone(), path)
                    .with_ino(stat.ino)
                    .with_stats(stats),
            );
            continue;
        }

        let Some(stats) = stats_or_skip(fs, &modes, entry.path(), &stat, known.as_ref(), &mut report) else {
            continue;
        };
        report.events.push(
            ChangeEvent::local(ChangeKind::Scan, entity, path)
                .with_ino(stat.ino)
                .with_stats(stats),
        );
    }

    let deletions = offline_deletions(options, store, &seen, &unreadable)?;
    report.offline_deletions = deletions.len();
    report.events.extend(deletions);

    info!(
        "Scan complete: {} entries, {} offline moves, {} offline deletions, {} skipped",
        report.entries, report.offline_moves, report.offline_deletions, report.skipped
    );
    Ok(report)
}

fn relative(root: &Path, path: &Path) -> Result<String> {
    let rel = path.strip_prefix(root).unwrap_or(path);
    path_utils::to_relative(root, rel)
}

/// Path an entry had before the offline folder moves found so far.
fn translate(path: &str, moved_folders: &[(String, String)]) -> String {
    moved_folders
        .iter()
        .rev()
        .find_map(|(old, new)| path_utils::replace_prefix(path, new, old))
        .unwrap_or_else(|| path.to_string())
}

/// A cached Doc elsewhere carrying this entry's inode, whose own path no
/// longer exists on disk.
fn moved_source(
    fs: &dyn FileSystem,
    options: &SyncOptions,
    store: &dyn MetadataStore,
    stat: &FileStat,
    entity: DocKind,
    lookup: &str,
) -> Result<Option<Doc>> {
    let Some(ino) = stat.ino else {
        return Ok(None);
    };
    for doc in store.query_by_ino(ino)? {
        if !doc.is_live() || doc.kind != entity || doc.path == lookup {
            continue;
        }
        if fs.exists(&path_utils::to_absolute(&options.root, &doc.path)) {
            continue;
        }
        return Ok(Some(doc));
    }
    Ok(None)
}

fn stats_for(
    fs: &dyn FileSystem,
    modes: &ModePolicy,
    abs: &Path,
    stat: &FileStat,
    known: Option<&Doc>,
) -> Result<FileStats> {
    if stat.is_dir {
        return Ok(FileStats::folder(stat.modified_at));
    }

    // Unchanged size and mtime: trust the cached fingerprint.
    let cached = known.and_then(|doc| {
        (doc.size == Some(stat.size) && doc.updated_at == stat.modified_at)
            .then(|| doc.content_hash.clone())
            .flatten()
    });
    let hash = match cached {
        Some(hash) => hash,
        None => fs.checksum(abs).map_err(|e| SyncError::FileRead {
            path: abs.to_path_buf(),
            source: e,
        })?,
    };
    Ok(FileStats::file(stat.size, stat.modified_at, hash).executable(modes.is_executable(stat.mode)))
}

/// An unreadable file does not abort the walk.
fn stats_or_skip(
    fs: &dyn FileSystem,
    modes: &ModePolicy,
    abs: &Path,
    stat: &FileStat,
    known: Option<&Doc>,
    report: &mut ScanReport,
) -> Option<FileStats> {
    match stats_for(fs, modes, abs, stat, known) {
        Ok(stats) => Some(stats),
        Err(e) => {
            warn!("Skipping {}: {}", abs.display(), e);
            report.skipped += 1;
            None
        }
    }
}

/// `deleted` events for live Docs the walk did not see. Only the topmost
/// deletion of a subtree is reported.
fn offline_deletions(
    options: &SyncOptions,
    store: &dyn MetadataStore,
    seen: &HashSet<String>,
    unreadable: &[String],
) -> Result<Vec<ChangeEvent>> {
    let mut docs = store.list_all()?;
    docs.sort_by(|a, b| a.path.cmp(&b.path));

    let mut reported: Vec<String> = Vec::new();
    let mut events = Vec::new();
    for doc in docs {
        if !doc.is_live()
            || seen.contains(&doc.id)
            || doc.sides.local == 0
            || doc.sides.behind(Side::Local)
            || doc.has_pending_local_move()
            || doc.is_incompatible()
            || options.ignore.is_ignored(&doc.path)
        {
            continue;
        }
        if reported
            .iter()
            .chain(unreadable)
            .any(|r| doc.path == *r || path_utils::is_descendant(&doc.path, r))
        {
            continue;
        }
        debug!("Offline deletion of {}", doc.path);
        reported.push(doc.path.clone());
        events.push(ChangeEvent::local(ChangeKind::Deleted, doc.kind, doc.path).with_ino(doc.ino));
    }
    Ok(events)
}
