//! The merge engine: the only writer of Docs.
//!
//! [`Merge::apply`] turns one normalized [`ChangeEvent`] into metadata cache
//! mutations. Every mutation computes the next Doc from the previous one,
//! passes it through the [`ConflictResolver`] and stores it with a single
//! `put`. A global lock covers one event together with its conflict pass, so
//! two events touching the same entity are never interleaved.
//!
//! The appliers report back through [`Merge::mark_applied`] and
//! [`Merge::record_failure`], which take the same lock.
//!
//! # Rules
//!
//! | Event | Outcome |
//! |---|---|
//! | created / scan | insert, or rename when the inode (local) or remote id matches a Doc elsewhere |
//! | modified | bump and update content; resynthesized as created when no live Doc exists |
//! | renamed | move the Doc and its descendants, keeping the earliest `move_from` |
//! | deleted | `deleted` (local) or `trashed` (remote), folders deepest first |
//!
//! Content that changes on one side while the other side still has an
//! unapplied change forks a conflict copy instead of overwriting.

use std::cmp::Reverse;
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, error, warn};

use crate::conflict::{ConflictResolver, Resolution};
use crate::doc::{Doc, MoveFrom, RemoteRef, Side, Sides};
use crate::error::{Result, SyncError};
use crate::events::{ChangeEvent, ChangeKind, DocEvent, EventRegistry};
use crate::path_identity::PlatformProfile;
use crate::path_restrictions::PathRestrictions;
use crate::path_utils;
use crate::store::MetadataStore;

/// Bookkeeping reported by an applier once a side caught up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Applied {
    /// Local inode after the operation.
    pub ino: Option<u64>,
    /// Fingerprint of the file left on the local disk.
    pub local_hash: Option<String>,
    /// Remote state after the operation.
    pub remote: Option<RemoteRef>,
}

impl Applied {
    /// Outcome of a remote application.
    pub fn remote(remote: Option<RemoteRef>) -> Self {
        Self {
            remote,
            ..Self::default()
        }
    }
}

/// Merge engine over a metadata store.
pub struct Merge {
    store: Arc<dyn MetadataStore>,
    profile: PlatformProfile,
    restrictions: PathRestrictions,
    resolver: ConflictResolver,
    registry: Arc<EventRegistry>,
    lock: Mutex<()>,
}

impl Merge {
    /// Create a merge engine with a fresh subscriber registry.
    pub fn new(store: Arc<dyn MetadataStore>, profile: PlatformProfile) -> Self {
        Self {
            store,
            profile,
            restrictions: PathRestrictions::for_profile(&profile),
            resolver: ConflictResolver::new(profile),
            registry: Arc::new(EventRegistry::new()),
            lock: Mutex::new(()),
        }
    }

    /// Builder: use a specific conflict resolver.
    pub fn with_resolver(mut self, resolver: ConflictResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Builder: check paths against specific naming limits.
    pub fn with_restrictions(mut self, restrictions: PathRestrictions) -> Self {
        self.restrictions = restrictions;
        self
    }

    /// Builder: share an existing subscriber registry.
    pub fn with_registry(mut self, registry: Arc<EventRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// The metadata store.
    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    /// The platform profile.
    pub fn profile(&self) -> &PlatformProfile {
        &self.profile
    }

    /// Subscribers of domain events.
    pub fn registry(&self) -> &Arc<EventRegistry> {
        &self.registry
    }

    /// Merge one event. Returns the domain events of the committed mutation,
    /// empty when the event changed nothing.
    pub fn apply(&self, event: &ChangeEvent) -> Result<Vec<DocEvent>> {
        let events = {
            let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
            let mut pass = self.pass();
            pass.apply(event)?;
            pass.out
        };
        self.emit(&events);
        Ok(events)
    }

    /// Merge a batch in order.
    ///
    /// Invalid events are logged and skipped; store failures abort the batch.
    pub fn apply_batch(&self, events: &[ChangeEvent]) -> Result<Vec<DocEvent>> {
        let mut out = Vec::new();
        for event in events {
            match self.apply(event) {
                Ok(mut committed) => out.append(&mut committed),
                Err(SyncError::InvalidEvent { path, reason }) => {
                    warn!("Dropping event for '{}': {}", path, reason);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// Record that `side` applied `generation` of a Doc.
    ///
    /// Returns `None` when the Doc no longer exists under `id` (it moved or was
    /// purged meanwhile); the applier then simply retries next cycle.
    pub fn mark_applied(
        &self,
        id: &str,
        side: Side,
        generation: u64,
        applied: Applied,
    ) -> Result<Option<Doc>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(doc) = self.store.get(id)? else {
            return Ok(None);
        };

        let mut next = doc.clone();
        next.sides = doc.sides.applied(side, generation);
        next.error_count = 0;
        next.last_error = None;
        match side {
            Side::Local => {
                if applied.ino.is_some() {
                    next.ino = applied.ino;
                }
                if applied.local_hash.is_some() {
                    next.local_hash = applied.local_hash;
                }
                // A remote trash reached the disk.
                if doc.trashed && !next.sides.behind(Side::Local) {
                    next.deleted = true;
                }
            }
            Side::Remote => {
                if applied.remote.is_some() {
                    next.remote = applied.remote;
                }
                if !next.sides.behind(Side::Remote) {
                    next.overwrite = None;
                }
            }
        }
        if next.sides.is_settled() {
            next.move_from = None;
        }

        if next == doc {
            return Ok(Some(doc));
        }
        debug!(
            "{} applied {} generation {} (target {})",
            side, next.path, generation, next.sides.target
        );
        let rev = self.store.put(&next)?;
        Ok(Some(Doc { rev, ..next }))
    }

    /// Count a failed application. Transient and deferred failures are not
    /// counted.
    ///
    /// Once `max_errors` consecutive failures accumulate the Doc is parked and
    /// excluded from automatic retries until [`Merge::unpark`].
    pub fn record_failure(&self, id: &str, err: &SyncError, max_errors: u32) -> Result<Option<Doc>> {
        if err.is_transient() || err.is_deferred() {
            debug!("Failure on {} not counted: {}", id, err);
            return Ok(None);
        }
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(mut doc) = self.store.get(id)? else {
            return Ok(None);
        };

        doc.error_count += 1;
        doc.last_error = Some(err.to_serializable().message);
        if doc.error_count >= max_errors && !doc.parked {
            doc.parked = true;
            error!(
                "Parking '{}' after {} consecutive failures: {}",
                doc.path, doc.error_count, err
            );
        } else {
            warn!(
                "Failed to apply '{}' ({}/{}): {}",
                doc.path, doc.error_count, max_errors, err
            );
        }
        doc.rev = self.store.put(&doc)?;
        Ok(Some(doc))
    }

    /// Re-enable automatic retries for a parked Doc.
    pub fn unpark(&self, id: &str) -> Result<bool> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(mut doc) = self.store.get(id)? else {
            return Ok(false);
        };
        if !doc.parked && doc.error_count == 0 {
            return Ok(false);
        }
        doc.parked = false;
        doc.error_count = 0;
        doc.last_error = None;
        self.store.put(&doc)?;
        Ok(true)
    }

    /// Remove a Doc once both sides confirmed its deletion.
    pub fn purge(&self, id: &str) -> Result<bool> {
        let events = {
            let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
            match self.store.get(id)? {
                Some(doc) if doc.deleted && doc.is_settled() => {
                    self.store.remove(id)?;
                    debug!("Purged {}", doc.path);
                    vec![DocEvent::deleted(doc)]
                }
                _ => return Ok(false),
            }
        };
        self.emit(&events);
        Ok(true)
    }

    fn pass(&self) -> Pass<'_> {
        Pass {
            store: self.store.as_ref(),
            profile: &self.profile,
            restrictions: &self.restrictions,
            resolver: &self.resolver,
            out: Vec::new(),
        }
    }

    fn emit(&self, events: &[DocEvent]) {
        self.registry.emit_all(events);
    }
}

impl std::fmt::Debug for Merge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Merge")
            .field("profile", &self.profile)
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// One merge pass (runs under the lock)
// ============================================================================

struct Pass<'a> {
    store: &'a dyn MetadataStore,
    profile: &'a PlatformProfile,
    restrictions: &'a PathRestrictions,
    resolver: &'a ConflictResolver,
    out: Vec<DocEvent>,
}

impl Pass<'_> {
    fn apply(&mut self, event: &ChangeEvent) -> Result<()> {
        if event.path.trim_matches('/').is_empty() {
            return Err(SyncError::InvalidEvent {
                path: event.path.clone(),
                reason: "the sync root itself cannot change".to_string(),
            });
        }
        if event.origin == Side::Remote && event.remote.is_none() {
            return Err(SyncError::InvalidEvent {
                path: event.path.clone(),
                reason: "remote event without remote document".to_string(),
            });
        }

        debug!("Merging {}", event);
        match event.kind {
            ChangeKind::Created | ChangeKind::Scan => self.created(event),
            ChangeKind::Modified => self.modified(event),
            ChangeKind::Renamed => self.renamed(event),
            ChangeKind::Deleted => self.deleted(event),
        }
    }

    // ------------------------------------------------------------------------
    // created / scan
    // ------------------------------------------------------------------------

    fn created(&mut self, event: &ChangeEvent) -> Result<()> {
        if event.origin == Side::Remote
            && let Some(doc) = self.by_remote_id(event)?
        {
            let known_path = doc.remote.as_ref().map(|r| r.path.as_str());
            if known_path != Some(event.path.as_str()) && doc.path != event.path {
                return self.rename_doc(doc, event);
            }
            return if doc.is_live() {
                self.modify_doc(doc, event)
            } else {
                self.revive(doc, event)
            };
        }

        if let Some(source) = self.moved_by_ino(event)? {
            if source.kind == event.entity {
                return self.rename_doc(source, event);
            }
            debug!(
                "Inode of {} reused by a {:?}, deleting the old record",
                source.path, event.entity
            );
            self.delete_tree(source, Side::Local)?;
        }

        let id = self.profile.id_for(&event.path);
        match self.store.get(&id)? {
            None => self.insert(event),
            Some(doc) if doc.kind != event.entity => self.replace_kind(doc, event),
            Some(doc) if !doc.is_live() => self.revive(doc, event),
            Some(doc) if doc.path != event.path => match event.origin {
                // The local filesystem cannot hold both spellings: same entry.
                Side::Local => self.rename_doc(doc, event),
                Side::Remote => self.insert(event),
            },
            Some(doc) => match (event.origin, &doc.remote) {
                (Side::Remote, Some(_)) => self.insert(event),
                (Side::Remote, None) => self.link_remote(doc, event),
                (Side::Local, _) => self.modify_doc(doc, event),
            },
        }
    }

    fn insert(&mut self, event: &ChangeEvent) -> Result<()> {
        let parent = self.ensure_parents(&event.path, event.origin)?;
        let path = path_utils::join(&parent, path_utils::leaf(&event.path));
        let doc = self.doc_from_event(event, path);
        debug!("Inserting {} ({:?}) from {}", doc.path, doc.kind, event.origin);

        let resolution = self.resolver.resolve(self.store, doc, None)?;
        let doc = self.commit(resolution)?;
        self.out.push(DocEvent::created(doc));
        Ok(())
    }

    /// A remote document appeared where a local-only Doc already lives.
    fn link_remote(&mut self, doc: Doc, event: &ChangeEvent) -> Result<()> {
        if !doc.is_folder() && !doc.same_content(event.content_hash(), event.executable(), true) {
            return self.fork(doc, event);
        }
        debug!("Linking {} to remote document", doc.path);
        let mut next = doc.clone();
        next.remote = event.remote.clone();
        next.sides = doc.sides.applied(Side::Remote, doc.sides.target);
        if next.sides.is_settled() {
            next.move_from = None;
        }
        let next = self.write(next)?;
        self.out.push(DocEvent::updated(next));
        Ok(())
    }

    /// The entity at this id changed between file and folder.
    fn replace_kind(&mut self, doc: Doc, event: &ChangeEvent) -> Result<()> {
        if doc.is_live() && event.origin == Side::Remote {
            return self.insert(event);
        }
        if doc.is_folder() && doc.is_live() {
            let mut children = self.store.query_by_parent_path(&doc.id)?;
            children.sort_by_key(|c| Reverse(c.depth()));
            for child in children.into_iter().filter(Doc::is_live) {
                self.delete_one(child, event.origin, false)?;
            }
        }

        let mut next = self.doc_from_event(event, event.path.clone());
        next.sides = doc.sides.bump(event.origin);
        next.overwrite = displaced_remote(&doc, next.remote.as_ref());
        debug!("{} changed kind to {:?}", next.path, next.kind);
        let next = self.write(next)?;
        self.out.push(DocEvent::created(next));
        Ok(())
    }

    /// A trashed or deleted Doc is observed again.
    fn revive(&mut self, doc: Doc, event: &ChangeEvent) -> Result<()> {
        if event.origin == Side::Local
            && doc.trashed
            && event.ino.is_some()
            && event.ino == doc.ino
            && !doc.sides.behind(Side::Local)
        {
            // The trashed entry keeps its inode, so this is a stale observation.
            debug!("Ignoring stale observation of trashed {}", doc.path);
            return Ok(());
        }

        let mut next = doc.updated(event.origin);
        next.path = event.path.clone();
        next.trashed = false;
        next.deleted = false;
        next.move_from = None;
        self.take_content(&mut next, event);
        match event.origin {
            Side::Local => {
                if doc.trashed {
                    next.remote = None;
                }
            }
            Side::Remote => {
                next.overwrite = displaced_remote(&doc, event.remote.as_ref());
            }
        }
        self.take_identity(&mut next, event);
        debug!("Reviving {} from {}", next.path, event.origin);

        let next = self.write(next)?;
        self.out.push(DocEvent::updated(next));
        Ok(())
    }

    // ------------------------------------------------------------------------
    // modified
    // ------------------------------------------------------------------------

    fn modified(&mut self, event: &ChangeEvent) -> Result<()> {
        let doc = match event.origin {
            Side::Local => self.store.get(&self.profile.id_for(&event.path))?,
            Side::Remote => self.by_remote_id(event)?,
        };
        match doc {
            Some(doc) if doc.is_live() && doc.kind == event.entity => self.modify_doc(doc, event),
            _ => {
                debug!("No live record for {}, treating as creation", event);
                self.created(&event.as_kind(ChangeKind::Created))
            }
        }
    }

    fn modify_doc(&mut self, doc: Doc, event: &ChangeEvent) -> Result<()> {
        let compare_exec = event.origin == Side::Remote || self.profile.native_executable;
        let executable = self.incoming_executable(event, &doc);

        if doc.is_folder() || doc.same_content(event.content_hash(), executable, compare_exec) {
            let mut next = doc.clone();
            self.take_identity(&mut next, event);
            if next != doc {
                debug!("Refreshed bookkeeping of {}", doc.path);
                self.write(next)?;
            }
            return Ok(());
        }

        if doc.sides.behind(event.origin) {
            return self.fork(doc, event);
        }

        let mut next = doc.updated(event.origin);
        self.take_content(&mut next, event);
        self.take_identity(&mut next, event);
        debug!("Updated {} from {}", next.path, event.origin);
        let next = self.write(next)?;
        self.out.push(DocEvent::updated(next));
        Ok(())
    }

    /// Both sides changed the content: keep both versions.
    fn fork(&mut self, doc: Doc, event: &ChangeEvent) -> Result<()> {
        let path = self.resolver.free_conflict_path(self.store, &doc.path, doc.kind)?;
        let mut copy = self.doc_from_event(event, path);
        let mut original = doc.clone();

        match event.origin {
            Side::Remote => {
                // The remote revision moves aside; the local version is uploaded
                // as a new remote document.
                copy.sides = Sides::observed_on(Side::Remote).bump_target();
                original = original.updated(Side::Local);
                original.remote = None;
                original.overwrite = None;
                original.move_from = None;
            }
            Side::Local => {
                // The local file moves aside; the original waits for its download.
                copy.sides = Sides::default().bump_target();
                copy.move_from = Some(MoveFrom {
                    id: doc.id.clone(),
                    path: event.path.clone(),
                    child_move: false,
                });
                original.ino = None;
                original.local_hash = None;
            }
        }

        debug!(
            "Concurrent edit of {}, {} version kept as {}",
            doc.path, event.origin, copy.path
        );
        let copy = self.write(copy)?;
        let original = self.write(original)?;
        self.out.push(DocEvent::created(copy));
        self.out.push(DocEvent::updated(original));
        Ok(())
    }

    // ------------------------------------------------------------------------
    // renamed
    // ------------------------------------------------------------------------

    fn renamed(&mut self, event: &ChangeEvent) -> Result<()> {
        let Some(old_path) = event.old_path.as_deref() else {
            return self.created(&event.as_kind(ChangeKind::Created));
        };

        let source = match event.origin {
            Side::Local => match self.moved_by_ino(event)? {
                Some(doc) => Some(doc),
                None => self
                    .store
                    .get(&self.profile.id_for(old_path))?
                    .filter(|doc| movable(doc) && doc.kind == event.entity),
            },
            Side::Remote => self.by_remote_id(event)?,
        };

        match source {
            Some(doc) => self.rename_doc(doc, event),
            None => {
                debug!("No record for {}, treating as creation", event);
                self.created(&event.as_kind(ChangeKind::Created))
            }
        }
    }

    fn rename_doc(&mut self, source: Doc, event: &ChangeEvent) -> Result<()> {
        let origin = event.origin;
        if source.path == event.path && source.is_live() {
            let mut next = source.clone();
            self.take_identity(&mut next, event);
            if next != source {
                self.write(next)?;
            }
            return Ok(());
        }

        let parent = self.ensure_parents(&event.path, origin)?;
        let path = path_utils::join(&parent, path_utils::leaf(&event.path));
        let id = self.profile.id_for(&path);

        let mut overwrite = source.overwrite.clone();
        let mut displaced = None;
        if let Some(dest) = self.store.get(&id)?
            && dest.id != source.id
        {
            let replaced = !dest.is_live()
                || match origin {
                    Side::Local => dest.sides.local > 0 && !dest.is_incompatible(),
                    Side::Remote => dest.path == path,
                };
            if replaced {
                debug!("{} replaces {}", source.path, dest.path);
                overwrite = displaced_remote(&dest, None).or(overwrite);
                self.drop_tree(dest)?;
            } else if origin == Side::Local {
                // The moved entry already sits at the path; the record that
                // never reached the disk steps aside.
                displaced = Some(dest);
            }
        }

        // An entry that never reached the disk has nothing to move locally.
        let move_from = if source.unknown_to(origin.other())
            || (origin == Side::Remote && source.is_incompatible())
        {
            None
        } else {
            match &source.move_from {
                Some(earlier) if source.sides.behind(origin.other()) => Some(MoveFrom {
                    child_move: false,
                    ..earlier.clone()
                }),
                _ => Some(MoveFrom {
                    id: source.id.clone(),
                    path: source.path.clone(),
                    child_move: false,
                }),
            }
        };

        let mut next = source.updated(origin);
        next.id = id;
        next.path = path;
        next.move_from = move_from;
        next.overwrite = overwrite;
        next.trashed = false;
        next.deleted = false;
        self.take_identity(&mut next, event);

        let resolution = match displaced {
            Some(dest) => self.resolver.displace(self.store, next, dest)?,
            None => self.resolver.resolve(self.store, next, Some(&source.id))?,
        };
        let moved = self.commit(resolution)?;
        if moved.id != source.id {
            self.store.remove(&source.id)?;
        }
        if source.is_folder() {
            self.repath_children(&source, &moved, Some(origin))?;
        }

        debug!("Moved {} -> {} ({})", source.path, moved.path, origin);
        self.out.push(DocEvent::moved(moved, source.path));
        Ok(())
    }

    /// Carry every descendant of `from` over to `to`.
    ///
    /// `origin` is the side that already moved them; `None` for a synthetic
    /// move neither side has applied yet.
    fn repath_children(&mut self, from: &Doc, to: &Doc, origin: Option<Side>) -> Result<()> {
        let children = self.store.query_by_parent_path(&from.id)?;
        let from_depth = path_utils::depth(&from.path);

        for child in children {
            let rest: Vec<&str> = child.path.split('/').skip(from_depth).collect();
            let path = path_utils::join(&to.path, &rest.join("/"));
            let id = self.profile.id_for(&path);

            let known_elsewhere = match origin {
                Some(side) => !child.unknown_to(side.other()),
                None => child.sides.local > 0 || child.sides.remote > 0,
            };
            let move_from = if known_elsewhere {
                child.move_from.clone().or_else(|| {
                    Some(MoveFrom {
                        id: child.id.clone(),
                        path: child.path.clone(),
                        child_move: true,
                    })
                })
            } else {
                None
            };

            let next = Doc {
                id,
                path,
                move_from,
                sides: match origin {
                    Some(side) => child.sides.bump(side),
                    None => child.sides.bump_target(),
                },
                ..child.clone()
            };
            let next = self.write(next)?;
            if next.id != child.id {
                self.store.remove(&child.id)?;
            }
            self.out.push(DocEvent::moved(next, child.path));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // deleted
    // ------------------------------------------------------------------------

    fn deleted(&mut self, event: &ChangeEvent) -> Result<()> {
        let doc = match event.origin {
            Side::Local => match self.store.get(&self.profile.id_for(&event.path))? {
                Some(doc) => Some(doc),
                None => match event.ino {
                    Some(ino) => self
                        .store
                        .query_by_ino(ino)?
                        .into_iter()
                        .find(Doc::is_live),
                    None => None,
                },
            },
            Side::Remote => self.by_remote_id(event)?,
        };

        let Some(doc) = doc else {
            warn!("Dropping {}: no matching record", event);
            return Ok(());
        };
        if !doc.is_live() {
            debug!("{} is already gone", doc.path);
            return Ok(());
        }
        self.delete_tree(doc, event.origin)?;
        Ok(())
    }

    /// Delete a Doc and its descendants, deepest first. Returns whether the
    /// Doc itself had to be kept.
    fn delete_tree(&mut self, doc: Doc, origin: Side) -> Result<bool> {
        let mut kept: Vec<String> = Vec::new();
        if doc.is_folder() {
            let mut children = self.store.query_by_parent_path(&doc.id)?;
            children.sort_by_key(|c| Reverse(c.depth()));
            for child in children.into_iter().filter(Doc::is_live) {
                let force = kept.iter().any(|k| path_utils::is_descendant(k, &child.path));
                let path = child.path.clone();
                if self.delete_one(child, origin, force)? {
                    kept.push(path);
                }
            }
        }
        let force = !kept.is_empty();
        self.delete_one(doc, origin, force)
    }

    fn delete_one(&mut self, doc: Doc, origin: Side, force_keep: bool) -> Result<bool> {
        let other = origin.other();

        if doc.unknown_to(other) && !force_keep {
            let mut next = doc.updated(origin);
            next.deleted = true;
            next.trashed = origin == Side::Remote;
            next.sides = next.sides.settle();
            next.move_from = None;
            debug!("{} never reached the {} side, settled as deleted", doc.path, other);
            let next = self.write(next)?;
            self.out.push(DocEvent::deleted(next));
            return Ok(false);
        }

        match origin {
            Side::Local if force_keep || (doc.sides.behind(Side::Local) && doc.remote.is_some()) => {
                let mut next = doc.clone();
                next.ino = None;
                if !next.sides.behind(Side::Local) {
                    next.sides = next.sides.bump(Side::Remote);
                }
                debug!("Keeping {}: the remote side has changes to download", doc.path);
                let next = self.write(next)?;
                self.out.push(DocEvent::updated(next));
                Ok(true)
            }
            Side::Remote
                if force_keep
                    || (doc.sides.behind(Side::Remote) && !doc.sides.behind(Side::Local)) =>
            {
                let mut next = doc.clone();
                next.remote = None;
                next.overwrite = None;
                if !next.sides.behind(Side::Remote) {
                    next.sides = next.sides.bump(Side::Local);
                }
                if !next.sides.behind(Side::Local) {
                    next.move_from = None;
                }
                debug!("Keeping {}: unpushed local changes, re-creating remotely", doc.path);
                let next = self.write(next)?;
                self.out.push(DocEvent::updated(next));
                Ok(true)
            }
            Side::Local => {
                let mut next = doc.updated(Side::Local);
                next.deleted = true;
                debug!("Deleted {} locally", doc.path);
                let next = self.write(next)?;
                self.out.push(DocEvent::deleted(next));
                Ok(false)
            }
            Side::Remote => {
                let mut next = doc.updated(Side::Remote);
                next.trashed = true;
                debug!("Trashed {} remotely", doc.path);
                let next = self.write(next)?;
                self.out.push(DocEvent::trashed(next));
                Ok(false)
            }
        }
    }

    /// Remove a Doc displaced by a move, with everything below it.
    fn drop_tree(&mut self, doc: Doc) -> Result<()> {
        if doc.is_folder() {
            for child in self.store.query_by_parent_path(&doc.id)? {
                self.store.remove(&child.id)?;
                self.out.push(DocEvent::deleted(child));
            }
        }
        self.store.remove(&doc.id)?;
        self.out.push(DocEvent::deleted(doc));
        Ok(())
    }

    // ------------------------------------------------------------------------
    // helpers
    // ------------------------------------------------------------------------

    /// Write a resolution; returns the Doc holding the candidate's entity.
    fn commit(&mut self, resolution: Resolution) -> Result<Doc> {
        match resolution {
            Resolution::Clear(doc) | Resolution::Tolerated(doc) => self.write(doc),
            Resolution::Renamed {
                loser,
                candidate_lost: true,
                ..
            } => self.write(loser),
            Resolution::Renamed { winner, loser, .. } => {
                // The stored Doc gives up its id to the candidate.
                let displaced = self.store.get(&winner.id)?;
                let winner = self.write(winner)?;
                let loser = self.write(loser)?;
                if let Some(previous) = displaced {
                    if previous.is_folder() {
                        self.repath_children(&previous, &loser, None)?;
                    }
                    self.out.push(DocEvent::moved(loser, previous.path));
                }
                Ok(winner)
            }
        }
    }

    /// Insert missing ancestors of `path` and revive dead ones. Returns the
    /// stored spelling of the parent folder.
    fn ensure_parents(&mut self, path: &str, origin: Side) -> Result<String> {
        let mut parent = String::new();
        for ancestor in path_utils::ancestors(path) {
            let wanted = path_utils::join(&parent, path_utils::leaf(ancestor));
            let id = self.profile.id_for(&wanted);
            parent = match self.store.get(&id)? {
                Some(doc) if doc.is_folder() && doc.is_live() => doc.path,
                Some(doc) if doc.is_folder() => {
                    let mut next = doc.updated(origin);
                    next.trashed = false;
                    next.deleted = false;
                    if doc.trashed && origin == Side::Local {
                        next.remote = None;
                    }
                    debug!("Reviving parent folder {}", next.path);
                    let next = self.write(next)?;
                    let path = next.path.clone();
                    self.out.push(DocEvent::updated(next));
                    path
                }
                Some(doc) => {
                    warn!("{} is a file but is used as a folder", doc.path);
                    wanted
                }
                None => {
                    debug!("Inserting missing parent {}", wanted);
                    let doc = self.write(Doc::new(id, wanted.clone(), crate::doc::DocKind::Folder, origin))?;
                    self.out.push(DocEvent::created(doc));
                    wanted
                }
            };
        }
        Ok(parent)
    }

    /// A live Doc elsewhere that carries the event's inode.
    fn moved_by_ino(&self, event: &ChangeEvent) -> Result<Option<Doc>> {
        if event.origin != Side::Local {
            return Ok(None);
        }
        let Some(ino) = event.ino else {
            return Ok(None);
        };
        let mut candidates: Vec<Doc> = self
            .store
            .query_by_ino(ino)?
            .into_iter()
            .filter(|doc| movable(doc) && doc.path != event.path)
            .collect();
        // Prefer the record the event names explicitly.
        if let Some(old) = event.old_path.as_deref()
            && let Some(pos) = candidates.iter().position(|d| d.path == old)
        {
            return Ok(Some(candidates.swap_remove(pos)));
        }
        Ok(candidates.into_iter().next())
    }

    fn by_remote_id(&self, event: &ChangeEvent) -> Result<Option<Doc>> {
        match &event.remote {
            Some(remote) => self.store.get_by_remote_id(&remote.id),
            None => Ok(None),
        }
    }

    fn doc_from_event(&self, event: &ChangeEvent, path: String) -> Doc {
        let mut doc = Doc::new(self.profile.id_for(&path), path, event.entity, event.origin)
            .with_updated_at(event.modified_at());
        self.take_content(&mut doc, event);
        self.take_identity(&mut doc, event);
        doc
    }

    fn take_content(&self, doc: &mut Doc, event: &ChangeEvent) {
        doc.updated_at = event.modified_at();
        if doc.is_folder() {
            return;
        }
        doc.executable = self.incoming_executable(event, doc);
        doc.content_hash = event.content_hash().map(str::to_string);
        doc.size = event.size();
    }

    fn take_identity(&self, doc: &mut Doc, event: &ChangeEvent) {
        match event.origin {
            Side::Local => {
                if event.ino.is_some() {
                    doc.ino = event.ino;
                }
                if let Some(hash) = event.content_hash() {
                    doc.local_hash = Some(hash.to_string());
                }
            }
            Side::Remote => {
                if event.remote.is_some() {
                    doc.remote = event.remote.clone();
                }
            }
        }
    }

    /// A platform without executable bits always reports them clear; keep
    /// what the Doc already knows instead.
    fn incoming_executable(&self, event: &ChangeEvent, doc: &Doc) -> bool {
        if event.origin == Side::Local && !self.profile.native_executable {
            doc.executable
        } else {
            event.executable()
        }
    }

    fn write(&mut self, mut doc: Doc) -> Result<Doc> {
        doc.incompatibilities = self.restrictions.check(&doc.path, doc.kind);
        if doc.is_incompatible() {
            debug!("{} cannot exist locally: {:?}", doc.path, doc.incompatibilities);
        }
        let rev = self.store.put(&doc)?;
        Ok(Doc { rev, ..doc })
    }
}

/// A Doc that a move may still pick up.
fn movable(doc: &Doc) -> bool {
    !doc.trashed && !(doc.deleted && doc.is_settled())
}

/// Remote document of `doc` that must be trashed before `incoming` takes
/// over its path.
fn displaced_remote(doc: &Doc, incoming: Option<&RemoteRef>) -> Option<RemoteRef> {
    if doc.trashed {
        return None;
    }
    doc.remote
        .clone()
        .filter(|r| incoming.is_none_or(|n| n.id != r.id))
}
