//! Platform-aware path identity.
//!
//! Filesystems disagree on what makes two names "the same file". Linux
//! compares raw bytes, macOS folds case and treats NFC/NFD spellings as one
//! name, Windows folds case but keeps the encoding. This module captures those
//! rules in a [`PlatformProfile`] and exposes:
//!
//! - [`compare`]: classify two paths as identical, case variants, encoding
//!   variants or distinct under a profile
//! - [`PlatformProfile::id_for`]: the folded id used as the metadata cache key,
//!   so two paths collide under a profile exactly when their ids are equal
//!
//! Every function here is pure and never mutates its inputs.
//!
//! # Example
//!
//! ```ignore
//! use trisync_core::path_identity::{PathIdentity, PlatformProfile, compare};
//!
//! let mac = PlatformProfile::MACOS;
//! assert_eq!(compare("alfred", "Alfred", &mac), PathIdentity::CaseVariant);
//! assert_eq!(mac.id_for("Alfred"), mac.id_for("alfred"));
//! ```

use serde::{Deserialize, Serialize};
use unicode_normalization::{IsNormalized, UnicodeNormalization, is_nfc_quick, is_nfd_quick};

/// Filesystem naming rules of one platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformProfile {
    /// Whether `a` and `A` name different entries.
    pub case_sensitive: bool,
    /// Whether NFC and NFD spellings name the same entry.
    pub normalizes_unicode: bool,
    /// Whether files carry a native executable permission bit.
    pub native_executable: bool,
}

/// Named platform presets, selectable from the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    /// [`PlatformProfile::LINUX`]
    Linux,
    /// [`PlatformProfile::MACOS`]
    Macos,
    /// [`PlatformProfile::WINDOWS`]
    Windows,
}

impl PlatformKind {
    /// The profile for this platform.
    pub fn profile(self) -> PlatformProfile {
        match self {
            PlatformKind::Linux => PlatformProfile::LINUX,
            PlatformKind::Macos => PlatformProfile::MACOS,
            PlatformKind::Windows => PlatformProfile::WINDOWS,
        }
    }
}

impl std::str::FromStr for PlatformKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "linux" => Ok(PlatformKind::Linux),
            "macos" | "darwin" => Ok(PlatformKind::Macos),
            "windows" | "win32" => Ok(PlatformKind::Windows),
            _ => Err(format!("Unknown platform: {}", s)),
        }
    }
}

impl PlatformProfile {
    /// Byte-exact names, executable bits.
    pub const LINUX: PlatformProfile = PlatformProfile {
        case_sensitive: true,
        normalizes_unicode: false,
        native_executable: true,
    };

    /// Case-insensitive, normalization-insensitive names, executable bits.
    pub const MACOS: PlatformProfile = PlatformProfile {
        case_sensitive: false,
        normalizes_unicode: true,
        native_executable: true,
    };

    /// Case-insensitive names, no executable bits.
    pub const WINDOWS: PlatformProfile = PlatformProfile {
        case_sensitive: false,
        normalizes_unicode: false,
        native_executable: false,
    };

    /// Profile of the platform this binary was built for.
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Self::MACOS
        } else if cfg!(windows) {
            Self::WINDOWS
        } else {
            Self::LINUX
        }
    }

    /// Whether a classification means "same entry on disk" for this profile.
    pub fn collides(&self, identity: PathIdentity) -> bool {
        match identity {
            PathIdentity::Identical => true,
            PathIdentity::CaseVariant => !self.case_sensitive,
            PathIdentity::EncodingVariant => self.normalizes_unicode,
            PathIdentity::Distinct => false,
        }
    }

    /// Derive the metadata cache id of a root-relative path.
    ///
    /// Two paths share an id exactly when they would name the same entry on
    /// this platform.
    pub fn id_for(&self, path: &str) -> String {
        let path = trim_separators(path);
        match (self.case_sensitive, self.normalizes_unicode) {
            (true, false) => path.to_string(),
            (true, true) => nfc(path),
            (false, false) => path.to_uppercase(),
            // Uppercasing can decompose some characters, so re-compose after.
            (false, true) => nfc(&nfc(path).to_uppercase()),
        }
    }
}

impl Default for PlatformProfile {
    fn default() -> Self {
        Self::current()
    }
}

/// How two spellings of a path relate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PathIdentity {
    /// Byte-identical.
    Identical,
    /// Equal once letter case is folded.
    CaseVariant,
    /// Canonically equivalent Unicode (NFC vs NFD), same case.
    EncodingVariant,
    /// Different names.
    Distinct,
}

/// Classify two spellings under the platform rules.
///
/// Canonical equivalence is checked independently of case. A variant the
/// profile does not fold comes back as [`PathIdentity::Distinct`], because
/// both spellings are genuinely different names there. The result agrees with
/// [`PlatformProfile::id_for`]: anything but `Distinct` means equal ids.
pub fn compare(a: &str, b: &str, profile: &PlatformProfile) -> PathIdentity {
    if trim_separators(a) == trim_separators(b) {
        return PathIdentity::Identical;
    }
    if profile.id_for(a) != profile.id_for(b) {
        return PathIdentity::Distinct;
    }
    if nfc(trim_separators(a)) == nfc(trim_separators(b)) {
        PathIdentity::EncodingVariant
    } else {
        PathIdentity::CaseVariant
    }
}

/// Profile-independent classification of two spellings.
///
/// An encoding difference takes precedence over a case difference: the
/// result is [`PathIdentity::CaseVariant`] only when the case-folded NFC
/// forms match but the NFC forms alone do not.
pub fn classify(a: &str, b: &str) -> PathIdentity {
    let a = trim_separators(a);
    let b = trim_separators(b);
    if a == b {
        return PathIdentity::Identical;
    }
    let (na, nb) = (nfc(a), nfc(b));
    if na == nb {
        return PathIdentity::EncodingVariant;
    }
    if na.to_uppercase() == nb.to_uppercase() {
        return PathIdentity::CaseVariant;
    }
    PathIdentity::Distinct
}

/// Whether `a` and `b` are the same string up to Unicode canonical equivalence.
pub fn canonically_equivalent(a: &str, b: &str) -> bool {
    a == b || nfc(a) == nfc(b)
}

/// NFC form of `s`.
pub fn nfc(s: &str) -> String {
    if is_nfc_quick(s.chars()) == IsNormalized::Yes {
        return s.to_string();
    }
    s.nfc().collect()
}

/// NFD form of `s`.
pub fn nfd(s: &str) -> String {
    if is_nfd_quick(s.chars()) == IsNormalized::Yes {
        return s.to_string();
    }
    s.nfd().collect()
}

/// Whether `s` is already in NFC.
pub fn is_nfc(s: &str) -> bool {
    unicode_normalization::is_nfc(s)
}

/// Whether `s` is already in NFD.
pub fn is_nfd(s: &str) -> bool {
    unicode_normalization::is_nfd(s)
}

/// Re-encode `name` in the normalization form `model` is written in.
///
/// Strings that are both NFC and NFD (pure ASCII) leave `name` in NFC.
pub fn same_form_as(name: &str, model: &str) -> String {
    if !is_nfc(model) && is_nfd(model) {
        nfd(name)
    } else {
        nfc(name)
    }
}

fn trim_separators(path: &str) -> &str {
    path.trim_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAFE_NFC: &str = "caf\u{e9}";
    const CAFE_NFD: &str = "cafe\u{301}";

    #[test]
    fn test_identical() {
        for profile in [PlatformProfile::LINUX, PlatformProfile::MACOS, PlatformProfile::WINDOWS] {
            assert_eq!(compare("a/b.txt", "a/b.txt", &profile), PathIdentity::Identical);
        }
    }

    #[test]
    fn test_case_variant_depends_on_profile() {
        assert_eq!(
            compare("alfred", "Alfred", &PlatformProfile::MACOS),
            PathIdentity::CaseVariant
        );
        assert_eq!(
            compare("alfred", "Alfred", &PlatformProfile::WINDOWS),
            PathIdentity::CaseVariant
        );
        assert_eq!(
            compare("alfred", "Alfred", &PlatformProfile::LINUX),
            PathIdentity::Distinct
        );
    }

    #[test]
    fn test_encoding_variant_depends_on_profile() {
        assert_eq!(
            compare(CAFE_NFC, CAFE_NFD, &PlatformProfile::MACOS),
            PathIdentity::EncodingVariant
        );
        assert_eq!(
            compare(CAFE_NFC, CAFE_NFD, &PlatformProfile::LINUX),
            PathIdentity::Distinct
        );
        assert_eq!(
            compare(CAFE_NFC, CAFE_NFD, &PlatformProfile::WINDOWS),
            PathIdentity::Distinct
        );
    }

    #[test]
    fn test_encoding_checked_independently_of_case() {
        // Same letters, different case and different normalization.
        assert_eq!(classify("CAF\u{c9}", CAFE_NFD), PathIdentity::CaseVariant);
        assert_eq!(
            compare("CAF\u{c9}", CAFE_NFD, &PlatformProfile::MACOS),
            PathIdentity::CaseVariant
        );
    }

    #[test]
    fn test_distinct() {
        assert_eq!(classify("a.txt", "b.txt"), PathIdentity::Distinct);
    }

    #[test]
    fn test_ids_collide_exactly_when_profile_folds() {
        let mac = PlatformProfile::MACOS;
        assert_eq!(mac.id_for("Alfred"), mac.id_for("alfred"));
        assert_eq!(mac.id_for(CAFE_NFC), mac.id_for(CAFE_NFD));

        let win = PlatformProfile::WINDOWS;
        assert_eq!(win.id_for("Alfred"), win.id_for("alfred"));
        assert_ne!(win.id_for(CAFE_NFC), win.id_for(CAFE_NFD));

        let linux = PlatformProfile::LINUX;
        assert_ne!(linux.id_for("Alfred"), linux.id_for("alfred"));
        assert_eq!(linux.id_for("dir/file"), "dir/file");
    }

    #[test]
    fn test_id_trims_separators() {
        assert_eq!(PlatformProfile::LINUX.id_for("/a/b/"), "a/b");
    }

    #[test]
    fn test_same_form_as() {
        assert_eq!(same_form_as("\u{e9}t\u{e9}", CAFE_NFD), nfd("\u{e9}t\u{e9}"));
        assert_eq!(same_form_as("e\u{301}te\u{301}", CAFE_NFC), "\u{e9}t\u{e9}");
        assert_eq!(same_form_as("e\u{301}", "plain"), "\u{e9}");
    }

    #[test]
    fn test_platform_kind_from_str() {
        assert_eq!("darwin".parse::<PlatformKind>().unwrap(), PlatformKind::Macos);
        assert_eq!("Windows".parse::<PlatformKind>().unwrap(), PlatformKind::Windows);
        assert!("beos".parse::<PlatformKind>().is_err());
    }
}
