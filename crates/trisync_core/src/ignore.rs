//! Paths excluded from sync.
//!
//! The internal temp directory is always excluded. User patterns use glob
//! syntax: a pattern without `/` matches any single component (so `*.tmp`
//! ignores temp files at every depth), a pattern with `/` matches the whole
//! root-relative path.

use glob::{MatchOptions, Pattern};

use crate::error::{Result, SyncError};
use crate::path_identity::PlatformProfile;

/// Name of the internal directory used for atomic downloads and local trash.
pub const TMP_DIR_NAME: &str = ".trisync-tmp";

/// Compiled ignore rules.
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    component_patterns: Vec<Pattern>,
    path_patterns: Vec<Pattern>,
    options: MatchOptions,
}

impl IgnoreRules {
    /// Only the built-in exclusions.
    pub fn builtin(profile: &PlatformProfile) -> Self {
        Self {
            component_patterns: Vec::new(),
            path_patterns: Vec::new(),
            options: MatchOptions {
                case_sensitive: profile.case_sensitive,
                require_literal_separator: true,
                require_literal_leading_dot: false,
            },
        }
    }

    /// Built-in exclusions plus user patterns.
    pub fn new<S: AsRef<str>>(patterns: &[S], profile: &PlatformProfile) -> Result<Self> {
        let mut rules = Self::builtin(profile);
        for raw in patterns {
            let raw = raw.as_ref().trim();
            if raw.is_empty() || raw.starts_with('#') {
                continue;
            }
            let trimmed = raw.trim_matches('/');
            let pattern = Pattern::new(trimmed).map_err(|e| SyncError::InvalidPattern {
                pattern: raw.to_string(),
                message: e.to_string(),
            })?;
            if trimmed.contains('/') {
                rules.path_patterns.push(pattern);
            } else {
                rules.component_patterns.push(pattern);
            }
        }
        Ok(rules)
    }

    /// Whether a root-relative path (or anything above it) is excluded.
    pub fn is_ignored(&self, path: &str) -> bool {
        let path = path.trim_matches('/');
        if path.is_empty() {
            return false;
        }
        if path == TMP_DIR_NAME || path.starts_with(&format!("{}/", TMP_DIR_NAME)) {
            return true;
        }

        let components: Vec<&str> = path.split('/').collect();
        if components.iter().any(|c| {
            self.component_patterns
                .iter()
                .any(|p| p.matches_with(c, self.options))
        }) {
            return true;
        }

        // A path pattern excludes the matched entry and its whole subtree.
        (1..=components.len()).any(|n| {
            let prefix = components[..n].join("/");
            self.path_patterns
                .iter()
                .any(|p| p.matches_with(&prefix, self.options))
        })
    }
}
