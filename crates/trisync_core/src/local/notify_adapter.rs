//! Native OS notifications through the `notify` crate.

use std::path::{Path, PathBuf};

use log::{debug, trace, warn};
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::error::Result;
use crate::fs::{FileSystem, RealFileSystem};
use crate::path_utils;

use super::raw::{RawEvent, RawEventSender};

/// Forwards `notify` events for one root into a [`RawEventSender`].
///
/// The watch stops when the adapter is dropped.
pub struct NotifyAdapter {
    watcher: RecommendedWatcher,
    root: PathBuf,
}

impl NotifyAdapter {
    /// Watch `root` recursively.
    pub fn start(root: &Path, sender: RawEventSender) -> Result<Self> {
        let base = root.to_path_buf();
        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| match result {
                Ok(event) => {
                    for raw in translate(&base, &event) {
                        if sender.send_blocking(raw).is_err() {
                            debug!("Raw event channel closed, dropping notification");
                            return;
                        }
                    }
                }
                Err(e) => warn!("Watcher error: {}", e),
            },
            Config::default(),
        )?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        debug!("Watching {}", root.display());

        Ok(Self {
            watcher,
            root: root.to_path_buf(),
        })
    }

    /// Stop watching.
    pub fn stop(mut self) -> Result<()> {
        self.watcher.unwatch(&self.root)?;
        Ok(())
    }
}

impl std::fmt::Debug for NotifyAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyAdapter")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

/// Translate one `notify` event into raw notifications.
fn translate(root: &Path, event: &Event) -> Vec<RawEvent> {
    let paths: Vec<String> = event
        .paths
        .iter()
        .filter_map(|p| {
            let rel = p.strip_prefix(root).ok()?;
            path_utils::to_relative(root, rel).ok()
        })
        .filter(|p| !p.is_empty())
        .collect();
    if paths.is_empty() {
        return Vec::new();
    }

    let with_stat = |raw: RawEvent| {
        match RealFileSystem.stat(&path_utils::to_absolute(root, &raw.path)) {
            Ok(stat) => {
                let raw = raw.with_dir(stat.is_dir);
                match stat.ino {
                    Some(ino) => raw.with_ino(ino),
                    None => raw,
                }
            }
            Err(_) => raw,
        }
    };

    match event.kind {
        EventKind::Create(_) => paths.into_iter().map(|p| with_stat(RawEvent::created(p))).collect(),
        EventKind::Remove(_) => paths.into_iter().map(RawEvent::removed).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if paths.len() == 2 => {
            vec![with_stat(RawEvent::renamed(paths[0].clone(), paths[1].clone()))]
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            paths.into_iter().map(RawEvent::removed).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            paths.into_iter().map(|p| with_stat(RawEvent::created(p))).collect()
        }
        // Some backends only say "renamed": look at what is there now.
        EventKind::Modify(ModifyKind::Name(_)) => paths
            .into_iter()
            .map(|p| {
                if RealFileSystem.exists(&path_utils::to_absolute(root, &p)) {
                    with_stat(RawEvent::created(p))
                } else {
                    RawEvent::removed(p)
                }
            })
            .collect(),
        EventKind::Modify(_) => paths.into_iter().map(|p| with_stat(RawEvent::modified(p))).collect(),
        _ => {
            trace!("Ignoring notify event: {:?}", event.kind);
            Vec::new()
        }
    }
}
