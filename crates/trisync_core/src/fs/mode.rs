//! Executable-bit policy.
//!
//! Platforms with native permission bits map the owner-execute bit to
//! `executable` and force a fixed mode when a remote file is executable, so
//! both replicas converge on the same interpretation. Platforms without bits
//! always read back a fixed default mode and ignore mode writes.

use crate::path_identity::PlatformProfile;

/// Mode reported for every file on platforms without permission bits.
pub const DEFAULT_MODE: u32 = 0o666;

/// Mode forced onto files that the remote side marks executable.
pub const EXECUTABLE_MODE: u32 = 0o755;

/// Owner-execute bit.
pub const OWNER_EXECUTE: u32 = 0o100;

const ANY_EXECUTE: u32 = 0o111;

/// How the executable flag maps to file modes on one platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModePolicy {
    native: bool,
}

impl ModePolicy {
    /// Policy for a platform profile.
    pub fn for_profile(profile: &PlatformProfile) -> Self {
        Self {
            native: profile.native_executable,
        }
    }

    /// Whether modes are real on this platform.
    pub fn is_native(&self) -> bool {
        self.native
    }

    /// Mode as the sync engine sees it.
    pub fn read_mode(&self, raw: u32) -> u32 {
        if self.native { raw & 0o7777 } else { DEFAULT_MODE }
    }

    /// Executable flag for a raw mode.
    pub fn is_executable(&self, raw: u32) -> bool {
        self.read_mode(raw) & OWNER_EXECUTE != 0
    }

    /// Mode to write so that the file ends up with `executable`, or `None`
    /// when nothing needs to change (always `None` without native bits).
    pub fn mode_for(&self, current: u32, executable: bool) -> Option<u32> {
        if !self.native {
            return None;
        }
        let current = current & 0o7777;
        let wanted = if executable {
            EXECUTABLE_MODE
        } else {
            current & !ANY_EXECUTE
        };
        (wanted != current).then_some(wanted)
    }
}
