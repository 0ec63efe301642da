//! Identity conflict resolution.
//!
//! Two logically distinct entities may end up with paths that name the same
//! entry on the local filesystem (`alfred` and `Alfred` on macOS). The
//! [`ConflictResolver`] detects such collisions before a Doc is written and
//! deterministically renames the loser to a `-conflict-<token>` path. Losers
//! are renamed, never dropped.
//!
//! # Example
//!
//! ```ignore
//! let resolver = ConflictResolver::new(PlatformProfile::MACOS);
//! match resolver.resolve(store, candidate, None)? {
//!     Resolution::Clear(doc) | Resolution::Tolerated(doc) => { /* write doc */ }
//!     Resolution::Renamed { winner, loser, .. } => { /* write both */ }
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use log::debug;

use crate::doc::{Doc, DocKind, MoveFrom};
use crate::error::Result;
use crate::path_identity::{self, PathIdentity, PlatformProfile};
use crate::path_utils;
use crate::store::MetadataStore;

/// Marker inserted into conflict file names.
pub const CONFLICT_MARKER: &str = "-conflict-";

/// Longest stem kept in front of the conflict suffix, in characters.
const MAX_STEM_CHARS: usize = 180;

/// Attempts with fresh tokens before the attempt number is appended.
const FRESH_TOKEN_ATTEMPTS: usize = 3;

/// Produces disambiguating tokens for conflict names.
pub type TokenSource = Arc<dyn Fn() -> String + Send + Sync>;

/// Outcome of a collision check for a Doc about to be written.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// No other entity claims the id.
    Clear(Doc),
    /// A spelling variant exists, but the profile keeps the names apart.
    Tolerated(Doc),
    /// A collision was found; `loser` now carries a conflict path and id.
    Renamed {
        /// Doc that keeps the contested id.
        winner: Doc,
        /// Doc moved aside to a conflict path.
        loser: Doc,
        /// Whether the loser is the candidate (the stored Doc is untouched).
        candidate_lost: bool,
    },
}

impl Resolution {
    /// The Doc that ends up holding the candidate's entity.
    pub fn candidate(&self) -> &Doc {
        match self {
            Resolution::Clear(doc) | Resolution::Tolerated(doc) => doc,
            Resolution::Renamed {
                winner,
                loser,
                candidate_lost,
            } => {
                if *candidate_lost {
                    loser
                } else {
                    winner
                }
            }
        }
    }
}

/// Enforces that no two live Docs share an id.
#[derive(Clone)]
pub struct ConflictResolver {
    profile: PlatformProfile,
    tokens: TokenSource,
}

impl fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConflictResolver")
            .field("profile", &self.profile)
            .finish_non_exhaustive()
    }
}

impl ConflictResolver {
    /// Resolver with random short tokens.
    pub fn new(profile: PlatformProfile) -> Self {
        Self {
            profile,
            tokens: Arc::new(random_token),
        }
    }

    /// Replace the token generator, e.g. with a deterministic sequence in tests.
    pub fn with_token_source<F>(mut self, source: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.tokens = Arc::new(source);
        self
    }

    /// Platform profile the resolver enforces.
    pub fn profile(&self) -> &PlatformProfile {
        &self.profile
    }

    /// Check `candidate` against the stored Doc holding its id.
    ///
    /// `replaces` is the id of the stored record `candidate` is a new version
    /// of; a record with that id is the same entity and never conflicts. The
    /// Doc with the higher `sides.target` wins, ties go to the stored Doc.
    pub fn resolve(
        &self,
        store: &dyn MetadataStore,
        candidate: Doc,
        replaces: Option<&str>,
    ) -> Result<Resolution> {
        let existing = match store.get(&candidate.id)? {
            Some(doc) if doc.is_live() && Some(doc.id.as_str()) != replaces => doc,
            _ => {
                return if self.has_tolerated_variant(store, &candidate)? {
                    debug!("Tolerating spelling variant of {}", candidate.path);
                    Ok(Resolution::Tolerated(candidate))
                } else {
                    Ok(Resolution::Clear(candidate))
                };
            }
        };

        let candidate_lost = candidate.sides.target <= existing.sides.target;
        let (winner, loser) = if candidate_lost {
            (existing, candidate)
        } else {
            (candidate, existing)
        };

        let path = self.free_conflict_path(store, &loser.path, loser.kind)?;
        debug!(
            "Identity conflict on {}: {} kept, {} renamed to {}",
            winner.id, winner.path, loser.path, path
        );
        let loser = self.rename_loser(loser, path);

        Ok(Resolution::Renamed {
            winner,
            loser,
            candidate_lost,
        })
    }

    /// Move `existing` aside unconditionally so `candidate` keeps its id.
    ///
    /// For a candidate that already occupies the path on disk while the stored
    /// Doc never got there.
    pub fn displace(&self, store: &dyn MetadataStore, candidate: Doc, existing: Doc) -> Result<Resolution> {
        let path = self.free_conflict_path(store, &existing.path, existing.kind)?;
        debug!(
            "{} takes {} from a record not on disk, moved to {}",
            candidate.path, existing.id, path
        );
        Ok(Resolution::Renamed {
            winner: candidate,
            loser: self.rename_loser(existing, path),
            candidate_lost: false,
        })
    }

    /// A conflict path next to `path` whose id is not taken in the store.
    ///
    /// Fresh tokens are tried first; after a few collisions the attempt number
    /// is appended so the search always terminates.
    pub fn free_conflict_path(
        &self,
        store: &dyn MetadataStore,
        path: &str,
        kind: DocKind,
    ) -> Result<String> {
        let mut attempt = 0usize;
        loop {
            let mut token = (self.tokens)();
            if attempt >= FRESH_TOKEN_ATTEMPTS {
                token.push_str(&attempt.to_string());
            }
            let candidate = conflict_path(path, kind, &token);
            if store.get(&self.profile.id_for(&candidate))?.is_none() {
                return Ok(candidate);
            }
            debug!("Conflict path {} already taken, retrying", candidate);
            attempt += 1;
        }
    }

    fn rename_loser(&self, loser: Doc, path: String) -> Doc {
        // Only an entity present on disk has a location to move from.
        let move_from = if loser.sides.local > 0 && !loser.is_incompatible() {
            loser.move_from.clone().or_else(|| {
                Some(MoveFrom {
                    id: loser.id.clone(),
                    path: loser.path.clone(),
                    child_move: false,
                })
            })
        } else {
            None
        };

        Doc {
            id: self.profile.id_for(&path),
            path,
            move_from,
            sides: loser.sides.bump_target(),
            ..loser
        }
    }

    fn has_tolerated_variant(&self, store: &dyn MetadataStore, candidate: &Doc) -> Result<bool> {
        if !self.profile.case_sensitive && self.profile.normalizes_unicode {
            return Ok(false);
        }
        let parent_id = self.profile.id_for(candidate.parent_path());
        let leaf = path_utils::leaf(&candidate.path);
        let siblings = store.query_by_parent_path(&parent_id)?;
        Ok(siblings.iter().any(|doc| {
            doc.is_live()
                && doc.id != candidate.id
                && path_utils::parent(&doc.id) == parent_id
                && matches!(
                    path_identity::classify(path_utils::leaf(&doc.path), leaf),
                    PathIdentity::CaseVariant | PathIdentity::EncodingVariant
                )
        }))
    }
}

fn random_token() -> String {
    let mut token = uuid::Uuid::new_v4().simple().to_string();
    token.truncate(8);
    token
}

/// Conflict name for `path`: the marker and token go before the extension of
/// a file, or at the end of a folder name.
///
/// A previous conflict suffix is replaced rather than stacked, and long stems
/// are truncated.
///
/// # Example
/// ```
/// use trisync_core::conflict::conflict_path;
/// use trisync_core::doc::DocKind;
///
/// assert_eq!(conflict_path("a/notes.txt", DocKind::File, "x1"), "a/notes-conflict-x1.txt");
/// assert_eq!(conflict_path("Alfred", DocKind::Folder, "x1"), "Alfred-conflict-x1");
/// assert_eq!(conflict_path("a-conflict-old.md", DocKind::File, "x2"), "a-conflict-x2.md");
/// ```
pub fn conflict_path(path: &str, kind: DocKind, token: &str) -> String {
    let parent = path_utils::parent(path);
    let leaf = path_utils::leaf(path);

    let (stem, ext) = match kind {
        DocKind::File => match leaf.rfind('.') {
            Some(idx) if idx > 0 => (&leaf[..idx], &leaf[idx..]),
            _ => (leaf, ""),
        },
        DocKind::Folder => (leaf, ""),
    };

    let stem = match stem.rfind(CONFLICT_MARKER) {
        Some(idx) if idx > 0 => &stem[..idx],
        _ => stem,
    };
    let stem: String = stem.chars().take(MAX_STEM_CHARS).collect();

    path_utils::join(parent, &format!("{}{}{}{}", stem, CONFLICT_MARKER, token, ext))
}
