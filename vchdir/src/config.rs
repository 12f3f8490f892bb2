use std::ffi::OsString;

use crate::backup::{BackupType, DEFAULT_BACKUP_SUFFIX};
use crate::chdir::CHDIR_CACHE_SIZE;
use crate::diag::Warnings;

#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) cache_size: usize,
    pub(crate) dereference: bool,
    pub(crate) force_local: bool,
    pub(crate) ignore_failed_read: bool,
    pub(crate) warnings: Warnings,
    pub(crate) backup: Option<BackupType>,
    pub(crate) backup_suffix: OsString,
}

impl Config {
    pub fn new() -> Self {
        Self {
            cache_size: CHDIR_CACHE_SIZE,
            dereference: false,
            force_local: false,
            ignore_failed_read: false,
            warnings: Warnings::all(),
            backup: None,
            backup_suffix: OsString::from(DEFAULT_BACKUP_SUFFIX),
        }
    }

    /// Maximum number of directory handles kept open at once.
    pub fn cache_size(mut self, size: usize) -> Self {
        self.cache_size = size;
        self
    }

    pub fn dereference(mut self, dereference: bool) -> Self {
        self.dereference = dereference;
        self
    }

    /// Treat `host:file` archive names as local files.
    pub fn force_local(mut self, force_local: bool) -> Self {
        self.force_local = force_local;
        self
    }

    pub fn ignore_failed_read(mut self, ignore: bool) -> Self {
        self.ignore_failed_read = ignore;
        self
    }

    pub fn warnings(mut self, warnings: Warnings) -> Self {
        self.warnings = warnings;
        self
    }

    /// `None` disables backups.
    pub fn backup(mut self, backup: Option<BackupType>) -> Self {
        self.backup = backup;
        self
    }

    pub fn backup_suffix<S: Into<OsString>>(mut self, suffix: S) -> Self {
        self.backup_suffix = suffix.into();
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
