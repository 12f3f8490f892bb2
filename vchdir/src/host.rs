//! Host quirks that the removal and normalization code must respect.

/// Whether `//` names a root distinct from `/`.
pub const DOUBLE_SLASH_IS_DISTINCT_ROOT: bool = cfg!(target_os = "cygwin");

/// Capabilities of the host, resolved once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostCaps {
    /// `unlink` on a directory fails instead of removing it, so it can be
    /// tried first on any name.
    pub cannot_unlink_directories: bool,
    pub double_slash_is_distinct_root: bool,
}

impl HostCaps {
    pub fn probe() -> Self {
        Self {
            cannot_unlink_directories: cannot_unlink_dir(),
            double_slash_is_distinct_root: DOUBLE_SLASH_IS_DISTINCT_ROOT,
        }
    }
}

impl Default for HostCaps {
    fn default() -> Self {
        Self::probe()
    }
}

// Solaris lets a suitably privileged root unlink(2) directories.
#[cfg(any(target_os = "solaris", target_os = "illumos"))]
fn cannot_unlink_dir() -> bool {
    // SAFETY: geteuid cannot fail.
    let euid = unsafe { libc::geteuid() };
    euid != 0
}

#[cfg(not(any(target_os = "solaris", target_os = "illumos")))]
fn cannot_unlink_dir() -> bool {
    true
}
