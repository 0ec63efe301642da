//! Names a platform cannot hold.
//!
//! The remote store accepts any name, the local filesystem does not. A remote
//! Doc whose path breaks the local [`PathRestrictions`] is recorded with its
//! [`Incompatibility`] list and left out of local application until a rename
//! makes it fit.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::doc::DocKind;
use crate::path_identity::PlatformProfile;

/// Why a path cannot be materialized locally.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Incompatibility {
    #[error("'{path}' contains reserved characters {chars:?}")]
    ReservedChars { path: String, chars: String },

    #[error("'{path}' uses the reserved name {name}")]
    ReservedName { path: String, name: String },

    #[error("'{path}' ends with the forbidden character {last:?}")]
    ForbiddenLastChar { path: String, last: char },

    #[error("File name of '{path}' is longer than {max} bytes")]
    NameMaxBytes { path: String, max: usize },

    #[error("Folder name of '{path}' is longer than {max} bytes")]
    DirNameMaxBytes { path: String, max: usize },

    #[error("'{path}' is {bytes} bytes long once rooted, the limit is {max}")]
    PathMaxBytes { path: String, bytes: usize, max: usize },
}

impl Incompatibility {
    /// Path of the offending component (the full path for length limits).
    pub fn path(&self) -> &str {
        match self {
            Incompatibility::ReservedChars { path, .. }
            | Incompatibility::ReservedName { path, .. }
            | Incompatibility::ForbiddenLastChar { path, .. }
            | Incompatibility::NameMaxBytes { path, .. }
            | Incompatibility::DirNameMaxBytes { path, .. }
            | Incompatibility::PathMaxBytes { path, .. } => path,
        }
    }
}

const WINDOWS_RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Naming limits of one platform. Lengths are UTF-8 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathRestrictions {
    /// Longest absolute path.
    pub path_max_bytes: usize,
    /// Longest file name.
    pub name_max_bytes: usize,
    /// Longest folder name.
    pub dir_name_max_bytes: usize,
    /// Characters no name may contain (besides `/`).
    pub reserved_chars: &'static [char],
    /// Characters no name may end with.
    pub forbidden_last_chars: &'static [char],
    /// Device names, matched case-insensitively on the part before the extension.
    pub reserved_names: &'static [&'static str],
    root_bytes: usize,
}

impl PathRestrictions {
    /// `PATH_MAX` and `NAME_MAX` from `linux/limits.h`.
    pub const LINUX: PathRestrictions = PathRestrictions {
        path_max_bytes: 4095,
        name_max_bytes: 255,
        dir_name_max_bytes: 255,
        reserved_chars: &[],
        forbidden_last_chars: &[],
        reserved_names: &[],
        root_bytes: 0,
    };

    /// `PATH_MAX` and `NAME_MAX` from `sys/syslimits.h`.
    pub const MACOS: PathRestrictions = PathRestrictions {
        path_max_bytes: 1023,
        name_max_bytes: 255,
        dir_name_max_bytes: 255,
        reserved_chars: &[],
        forbidden_last_chars: &[],
        reserved_names: &[],
        root_bytes: 0,
    };

    /// Long paths, device names, no trailing dot or space. Folder names leave
    /// room for an 8.3 child name.
    pub const WINDOWS: PathRestrictions = PathRestrictions {
        path_max_bytes: 32766,
        name_max_bytes: 256,
        dir_name_max_bytes: 243,
        reserved_chars: &['<', '>', ':', '"', '\\', '|', '?', '*'],
        forbidden_last_chars: &['.', ' '],
        reserved_names: WINDOWS_RESERVED_NAMES,
        root_bytes: 0,
    };

    /// Limits of the preset a profile stands for.
    pub fn for_profile(profile: &PlatformProfile) -> Self {
        if profile.case_sensitive {
            Self::LINUX
        } else if profile.native_executable {
            Self::MACOS
        } else {
            Self::WINDOWS
        }
    }

    /// Builder: count the sync root against the path length limit.
    pub fn with_root(mut self, root: &Path) -> Self {
        self.root_bytes = root.to_string_lossy().len();
        self
    }

    /// Every problem with a root-relative path. Ancestors are checked as
    /// folders, the leaf as `kind`. Empty when the path fits.
    pub fn check(&self, path: &str, kind: DocKind) -> Vec<Incompatibility> {
        let mut issues = Vec::new();
        let path = path.trim_matches('/');
        if path.is_empty() {
            return issues;
        }

        let bytes = self.root_bytes + 1 + path.len();
        if bytes > self.path_max_bytes {
            issues.push(Incompatibility::PathMaxBytes {
                path: path.to_string(),
                bytes,
                max: self.path_max_bytes,
            });
        }

        let names: Vec<&str> = path.split('/').collect();
        for (i, name) in names.iter().enumerate() {
            let kind = if i + 1 == names.len() { kind } else { DocKind::Folder };
            let prefix = names[..=i].join("/");
            self.check_name(name, kind, &prefix, &mut issues);
        }
        issues
    }

    fn check_name(&self, name: &str, kind: DocKind, path: &str, issues: &mut Vec<Incompatibility>) {
        let chars: String = name.chars().filter(|c| self.reserved_chars.contains(c)).collect();
        if !chars.is_empty() {
            issues.push(Incompatibility::ReservedChars {
                path: path.to_string(),
                chars,
            });
        }

        let upper = name.to_uppercase();
        let stem = match upper.rfind('.') {
            Some(dot) if dot > 0 => &upper[..dot],
            _ => upper.as_str(),
        };
        if self.reserved_names.contains(&stem) {
            issues.push(Incompatibility::ReservedName {
                path: path.to_string(),
                name: stem.to_string(),
            });
        }

        if let Some(last) = name.chars().last()
            && self.forbidden_last_chars.contains(&last)
        {
            issues.push(Incompatibility::ForbiddenLastChar {
                path: path.to_string(),
                last,
            });
        }

        match kind {
            DocKind::Folder if name.len() > self.dir_name_max_bytes => {
                issues.push(Incompatibility::DirNameMaxBytes {
                    path: path.to_string(),
                    max: self.dir_name_max_bytes,
                });
            }
            DocKind::File if name.len() > self.name_max_bytes => {
                issues.push(Incompatibility::NameMaxBytes {
                    path: path.to_string(),
                    max: self.name_max_bytes,
                });
            }
            _ => {}
        }
    }
}

impl Default for PathRestrictions {
    fn default() -> Self {
        Self::for_profile(&PlatformProfile::current())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_names_fit_everywhere() {
        for restrictions in [PathRestrictions::LINUX, PathRestrictions::MACOS, PathRestrictions::WINDOWS] {
            assert!(restrictions.check("docs/report 2024.txt", DocKind::File).is_empty());
            assert!(restrictions.check("日本語/ファイル.md", DocKind::File).is_empty());
        }
    }

    #[test]
    fn test_windows_reserved_chars() {
        let issues = PathRestrictions::WINDOWS.check("a:b?.txt", DocKind::File);
        assert_eq!(
            issues,
            vec![Incompatibility::ReservedChars {
                path: "a:b?.txt".into(),
                chars: ":?".into(),
            }]
        );
        assert!(PathRestrictions::LINUX.check("a:b?.txt", DocKind::File).is_empty());
    }

    #[test]
    fn test_reserved_name_ignores_case_and_extension() {
        let windows = PathRestrictions::WINDOWS;
        assert!(matches!(
            windows.check("con.txt", DocKind::File).as_slice(),
            [Incompatibility::ReservedName { name, .. }] if name == "CON"
        ));
        assert!(matches!(
            windows.check("Lpt1", DocKind::Folder).as_slice(),
            [Incompatibility::ReservedName { .. }]
        ));
        assert!(windows.check("console.txt", DocKind::File).is_empty());
        assert!(windows.check(".con", DocKind::File).is_empty());
    }

    #[test]
    fn test_forbidden_last_char() {
        let issues = PathRestrictions::WINDOWS.check("notes./a.txt", DocKind::File);
        assert_eq!(
            issues,
            vec![Incompatibility::ForbiddenLastChar {
                path: "notes.".into(),
                last: '.',
            }]
        );
    }

    #[test]
    fn test_ancestors_checked_as_folders() {
        let name = "d".repeat(250);
        let path = format!("{}/a.txt", name);
        let issues = PathRestrictions::WINDOWS.check(&path, DocKind::File);
        assert_eq!(
            issues,
            vec![Incompatibility::DirNameMaxBytes {
                path: name.clone(),
                max: 243,
            }]
        );
        // The same name is fine as a file.
        assert!(PathRestrictions::WINDOWS.check(&name, DocKind::File).is_empty());
    }

    #[test]
    fn test_name_length_counts_bytes() {
        let name = "é".repeat(128);
        assert!(matches!(
            PathRestrictions::LINUX.check(&name, DocKind::File).as_slice(),
            [Incompatibility::NameMaxBytes { max: 255, .. }]
        ));
    }

    #[test]
    fn test_root_counts_against_path_length() {
        let path = ["x"; 510].join("/");
        assert!(PathRestrictions::MACOS.check(&path, DocKind::File).is_empty());

        let rooted = PathRestrictions::MACOS.with_root(Path::new("/Users/someone/Sync"));
        assert!(matches!(
            rooted.check(&path, DocKind::File).as_slice(),
            [Incompatibility::PathMaxBytes { max: 1023, .. }]
        ));
    }

    #[test]
    fn test_profile_presets() {
        assert_eq!(PathRestrictions::for_profile(&PlatformProfile::LINUX), PathRestrictions::LINUX);
        assert_eq!(PathRestrictions::for_profile(&PlatformProfile::MACOS), PathRestrictions::MACOS);
        assert_eq!(
            PathRestrictions::for_profile(&PlatformProfile::WINDOWS),
            PathRestrictions::WINDOWS
        );
    }

    #[test]
    fn test_incompatibility_serializes_tagged() {
        let issue = Incompatibility::ReservedName {
            path: "CON".into(),
            name: "CON".into(),
        };
        let json = serde_json::to_string(&issue).unwrap();
        assert!(json.contains("\"type\":\"reservedName\""));
        assert_eq!(issue.to_string(), "'CON' uses the reserved name CON");
    }
}
