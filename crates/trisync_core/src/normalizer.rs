//! Path normalization against the metadata cache.
//!
//! On filesystems that treat NFC and NFD spellings as one name, the watcher
//! may report a path in a different normalization form than the one recorded
//! in the cache. The [`PathNormalizer`] rewrites local events to reuse the
//! stored spelling so that an encoding difference never looks like a new
//! entity. Parents are resolved first and memoized per batch, so a folder
//! rename and the events of its descendants resolve consistently.

use std::collections::HashMap;

use log::debug;

use crate::doc::Side;
use crate::error::Result;
use crate::events::{ChangeEvent, ChangeKind};
use crate::path_identity::{self, PlatformProfile};
use crate::path_utils;
use crate::store::MetadataStore;

/// Rewrites event paths to the spellings already stored in the cache.
#[derive(Debug, Clone)]
pub struct PathNormalizer {
    profile: PlatformProfile,
}

impl PathNormalizer {
    /// Create a normalizer for a platform profile.
    pub fn new(profile: PlatformProfile) -> Self {
        Self { profile }
    }

    /// Whether this profile needs any rewriting at all.
    pub fn is_active(&self) -> bool {
        self.profile.normalizes_unicode
    }

    /// Normalize one batch of events, in order.
    ///
    /// Remote events are passed through: the remote store is the source of
    /// the spelling they carry.
    pub fn normalize_batch(
        &self,
        store: &dyn MetadataStore,
        events: Vec<ChangeEvent>,
    ) -> Result<Vec<ChangeEvent>> {
        if !self.is_active() {
            return Ok(events);
        }

        let mut resolved = HashMap::new();
        let mut out = Vec::with_capacity(events.len());
        for event in events {
            if event.origin != Side::Local {
                out.push(event);
                continue;
            }
            out.push(self.normalize_event(store, event, &mut resolved)?);
        }
        Ok(out)
    }

    fn normalize_event(
        &self,
        store: &dyn MetadataStore,
        mut event: ChangeEvent,
        resolved: &mut HashMap<String, String>,
    ) -> Result<ChangeEvent> {
        match event.kind {
            ChangeKind::Renamed => {
                if let Some(old) = event.old_path.take() {
                    let old = self.resolve_existing(store, &old, resolved)?;
                    let parent = self.resolve_existing(store, path_utils::parent(&event.path), resolved)?;
                    let leaf = path_identity::same_form_as(
                        path_utils::leaf(&event.path),
                        path_utils::leaf(&old),
                    );
                    let new_path = path_utils::join(&parent, &leaf);
                    if new_path != event.path {
                        debug!("Normalized rename target {} -> {}", event.path, new_path);
                    }
                    resolved.insert(self.profile.id_for(&new_path), new_path.clone());
                    event.path = new_path;
                    event.old_path = Some(old);
                }
            }
            _ => {
                let path = self.resolve_existing(store, &event.path, resolved)?;
                if path != event.path {
                    debug!("Normalized {} -> {}", event.path, path);
                    event.path = path;
                }
            }
        }
        Ok(event)
    }

    /// Canonical spelling of `path`: every component reuses the stored
    /// spelling when the only difference is Unicode normalization.
    fn resolve_existing(
        &self,
        store: &dyn MetadataStore,
        path: &str,
        resolved: &mut HashMap<String, String>,
    ) -> Result<String> {
        if path.is_empty() {
            return Ok(String::new());
        }
        let id = self.profile.id_for(path);
        if let Some(known) = resolved.get(&id) {
            return Ok(known.clone());
        }

        let parent = self.resolve_existing(store, path_utils::parent(path), resolved)?;
        let candidate = path_utils::join(&parent, path_utils::leaf(path));
        let canonical = match store.get(&id)? {
            Some(doc) if path_identity::canonically_equivalent(&doc.path, &candidate) => doc.path,
            // First writer wins.
            _ => candidate,
        };

        resolved.insert(id, canonical.clone());
        Ok(canonical)
    }
}
