//! Renaming existing files out of the way before they are overwritten, with a
//! single level of undo.

use std::ffi::{OsStr, OsString};
use std::os::fd::BorrowedFd;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::renameat;

use crate::error::Error;
use crate::savedir::savedir;
use crate::stat::{FileKind, deref_stat, is_remote_device};

pub const DEFAULT_BACKUP_SUFFIX: &str = "~";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupType {
    /// `NAME` + suffix.
    Simple,
    /// `NAME.~N~`.
    Numbered,
    /// Numbered if numbered backups already exist, simple otherwise.
    Existing,
}

impl BackupType {
    /// Parses a `VERSION_CONTROL` keyword. `Ok(None)` means backups are off.
    pub fn from_version_control(keyword: &str) -> Result<Option<Self>, Error> {
        match keyword {
            "none" | "off" => Ok(None),
            "simple" | "never" => Ok(Some(BackupType::Simple)),
            "existing" | "nil" => Ok(Some(BackupType::Existing)),
            "numbered" | "t" => Ok(Some(BackupType::Numbered)),
            _ => Err(Error::InvalidBackupType(keyword.to_string())),
        }
    }
}

pub trait BackupNamer {
    /// Picks the name `name` should be renamed to. Both are relative to `dir`.
    fn backup_name(&self, dir: BorrowedFd<'_>, name: &Path) -> Result<PathBuf, Error>;
}

#[derive(Debug, Clone)]
pub struct VersionControl {
    kind: BackupType,
    suffix: OsString,
}

impl VersionControl {
    pub fn new<S: Into<OsString>>(kind: BackupType, suffix: S) -> Self {
        Self {
            kind,
            suffix: suffix.into(),
        }
    }
}

impl BackupNamer for VersionControl {
    fn backup_name(&self, dir: BorrowedFd<'_>, name: &Path) -> Result<PathBuf, Error> {
        let bytes = name.as_os_str().as_bytes();
        let base_start = bytes.iter().rposition(|&c| c == b'/').map_or(0, |i| i + 1);
        let base = &bytes[base_start..];
        if base.is_empty() {
            return Err(Error::NoBackupName(name.to_path_buf()));
        }

        let with_suffix = |suffix: &[u8]| {
            let mut buf = bytes.to_vec();
            buf.extend_from_slice(suffix);
            PathBuf::from(OsString::from_vec(buf))
        };

        if self.kind == BackupType::Simple {
            return Ok(with_suffix(self.suffix.as_bytes()));
        }

        let parent = if base_start == 0 {
            OsStr::new(".")
        } else {
            OsStr::from_bytes(&bytes[..base_start])
        };
        let highest = savedir(dir, parent, true)?
            .unwrap_or_default()
            .iter()
            .filter_map(|entry| backup_version(base, entry.as_bytes()))
            .max();

        match (self.kind, highest) {
            (BackupType::Existing, None) => Ok(with_suffix(self.suffix.as_bytes())),
            (_, highest) => {
                let next = highest
                    .unwrap_or(0)
                    .checked_add(1)
                    .ok_or_else(|| Error::NoBackupName(name.to_path_buf()))?;
                Ok(with_suffix(format!(".~{next}~").as_bytes()))
            }
        }
    }
}

// N if `entry` is `base.~N~`.
fn backup_version(base: &[u8], entry: &[u8]) -> Option<u64> {
    let digits = entry
        .strip_prefix(base)?
        .strip_prefix(b".~")?
        .strip_suffix(b"~")?;
    if digits.first().is_none_or(|&c| c == b'0') || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}

/// A rename that can still be undone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingBackup {
    pub original: PathBuf,
    pub backup: PathBuf,
}

pub struct Backups {
    namer: Box<dyn BackupNamer>,
    dereference: bool,
    force_local: bool,
    pending: Option<PendingBackup>,
}

impl Backups {
    pub fn new<N: BackupNamer + 'static>(namer: N) -> Self {
        Self {
            namer: Box::new(namer),
            dereference: false,
            force_local: false,
            pending: None,
        }
    }

    pub fn dereference(mut self, dereference: bool) -> Self {
        self.dereference = dereference;
        self
    }

    pub fn force_local(mut self, force_local: bool) -> Self {
        self.force_local = force_local;
        self
    }

    pub fn pending(&self) -> Option<&PendingBackup> {
        self.pending.as_ref()
    }

    /// Moves an existing `name` aside, relative to `dir`.
    ///
    /// Succeeds without renaming anything if `name` does not exist or is a
    /// directory. For the archive itself, remote names and devices are left
    /// alone too.
    pub fn maybe_backup<P: AsRef<Path>>(
        &mut self,
        dir: BorrowedFd<'_>,
        name: P,
        is_archive: bool,
    ) -> Result<(), Error> {
        let name = name.as_ref();
        self.pending = None;

        if is_archive && is_remote_device(name, self.force_local) {
            return Ok(());
        }

        let kind = match deref_stat(dir, name, self.dereference) {
            Ok(stat) => FileKind::of(&stat),
            Err(Errno::ENOENT) => return Ok(()),
            Err(source) => {
                return Err(Error::Stat {
                    name: name.to_path_buf(),
                    source,
                });
            }
        };
        if kind == FileKind::Directory || (is_archive && kind.is_device()) {
            return Ok(());
        }

        let backup = self.namer.backup_name(dir, name)?;
        renameat(dir, name, dir, backup.as_path()).map_err(|source| Error::Rename {
            from: name.to_path_buf(),
            to: backup.clone(),
            source,
        })?;

        log::info!("Renaming {} to {}", name.display(), backup.display());
        self.pending = Some(PendingBackup {
            original: name.to_path_buf(),
            backup,
        });
        Ok(())
    }

    /// Puts the most recent backup back under its original name. Does
    /// nothing if there is none; the pending backup is forgotten either way.
    pub fn undo_last_backup(&mut self, dir: BorrowedFd<'_>) -> Result<(), Error> {
        let Some(PendingBackup { original, backup }) = self.pending.take() else {
            return Ok(());
        };

        log::info!("Renaming {} back to {}", backup.display(), original.display());
        renameat(dir, backup.as_path(), dir, original.as_path()).map_err(|source| {
            Error::Rename {
                from: backup.clone(),
                to: original.clone(),
                source,
            }
        })
    }
}
