//! Helpers for root-relative sync paths.
//!
//! Paths stored in the metadata cache are relative to the sync root, use `/`
//! as the separator and carry no leading or trailing slash. The root itself is
//! the empty string.

use std::path::{Component, Path, PathBuf};

use crate::error::{Result, SyncError};

/// Parent of a relative path, or `""` for top-level entries.
///
/// # Example
/// ```
/// use trisync_core::path_utils::parent;
///
/// assert_eq!(parent("a/b/c.txt"), "a/b");
/// assert_eq!(parent("c.txt"), "");
/// ```
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Last component of a relative path.
///
/// # Example
/// ```
/// use trisync_core::path_utils::leaf;
///
/// assert_eq!(leaf("a/b/c.txt"), "c.txt");
/// assert_eq!(leaf("c.txt"), "c.txt");
/// ```
pub fn leaf(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Join a parent and a leaf, treating `""` as the root.
pub fn join(parent: &str, leaf: &str) -> String {
    if parent.is_empty() {
        leaf.to_string()
    } else {
        format!("{}/{}", parent, leaf)
    }
}

/// Number of components, so top-level entries have depth 1.
pub fn depth(path: &str) -> usize {
    if path.is_empty() {
        0
    } else {
        path.split('/').count()
    }
}

/// Whether `path` lies strictly below `ancestor`.
///
/// # Example
/// ```
/// use trisync_core::path_utils::is_descendant;
///
/// assert!(is_descendant("a/b/c", "a"));
/// assert!(!is_descendant("ab/c", "a"));
/// assert!(!is_descendant("a", "a"));
/// ```
pub fn is_descendant(path: &str, ancestor: &str) -> bool {
    if ancestor.is_empty() {
        return !path.is_empty();
    }
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'/'
}

/// Swap the `from` prefix of `path` for `to`. Returns `None` when `path` is
/// neither `from` nor below it.
///
/// # Example
/// ```
/// use trisync_core::path_utils::replace_prefix;
///
/// assert_eq!(replace_prefix("old/x/y", "old", "new").as_deref(), Some("new/x/y"));
/// assert_eq!(replace_prefix("old", "old", "new").as_deref(), Some("new"));
/// assert_eq!(replace_prefix("other/x", "old", "new"), None);
/// ```
pub fn replace_prefix(path: &str, from: &str, to: &str) -> Option<String> {
    if path == from {
        return Some(to.to_string());
    }
    if is_descendant(path, from) {
        let rest = &path[from.len() + 1..];
        return Some(join(to, rest));
    }
    None
}

/// All strict ancestors of `path`, shallowest first.
pub fn ancestors(path: &str) -> Vec<&str> {
    let mut out = Vec::new();
    for (idx, byte) in path.bytes().enumerate() {
        if byte == b'/' {
            out.push(&path[..idx]);
        }
    }
    out
}

/// Convert an absolute or root-relative filesystem path into a sync path.
pub fn to_relative(root: &Path, path: &Path) -> Result<String> {
    let rel = if path.is_absolute() {
        path.strip_prefix(root)
            .map_err(|_| SyncError::OutsideRoot(path.to_path_buf()))?
    } else {
        path
    };

    let mut parts: Vec<String> = Vec::new();
    for comp in rel.components() {
        match comp {
            Component::Normal(part) => parts.push(part.to_string_lossy().to_string()),
            Component::CurDir => {}
            _ => return Err(SyncError::OutsideRoot(path.to_path_buf())),
        }
    }
    Ok(parts.join("/"))
}

/// Absolute location of a sync path under `root`.
pub fn to_absolute(root: &Path, path: &str) -> PathBuf {
    let mut abs = root.to_path_buf();
    for part in path.split('/').filter(|p| !p.is_empty()) {
        abs.push(part);
    }
    abs
}
