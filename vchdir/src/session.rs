use std::ffi::OsString;
use std::os::fd::BorrowedFd;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::stat::FileStat;

use crate::backup::{Backups, VersionControl};
use crate::chdir::WorkingDirs;
use crate::config::Config;
use crate::delayed::DelayedSetStat;
use crate::diag::Diagnostics;
use crate::error::Error;
use crate::host::HostCaps;
use crate::remove::{Removal, RemoveOption, Remover};
use crate::savedir::savedir;
use crate::stat::deref_stat;

/// All filesystem state of one archiving run.
///
/// There is a single current directory at a time; every name passed to the
/// methods below is relative to the directory last selected with
/// [`Session::chdir_do`].
pub struct Session {
    dirs: WorkingDirs,
    caps: HostCaps,
    delayed: DelayedSetStat,
    backups: Option<Backups>,
    diag: Diagnostics,
    dereference: bool,
}

impl Session {
    pub fn new(config: &Config) -> Self {
        let dirs = WorkingDirs::with_options(config.cache_size, config.dereference);
        let backups = config.backup.map(|kind| {
            Backups::new(VersionControl::new(kind, config.backup_suffix.clone()))
                .dereference(config.dereference)
                .force_local(config.force_local)
        });

        Self {
            dirs,
            caps: HostCaps::probe(),
            delayed: DelayedSetStat::new(),
            backups,
            diag: Diagnostics::new(config.ignore_failed_read, config.warnings),
            dereference: config.dereference,
        }
    }

    /// Registers a `-C` operand; see [`WorkingDirs::register`].
    pub fn chdir_arg<P: AsRef<Path>>(&mut self, dir: P) -> Result<usize, Error> {
        self.dirs.register(dir)
    }

    pub fn chdir_count(&self) -> usize {
        self.dirs.count()
    }

    /// Makes directory `index` current. Handles closed to make room are
    /// reported through [`Diagnostics::close_diag`].
    pub fn chdir_do(&mut self, index: usize) -> Result<BorrowedFd<'_>, Error> {
        self.dirs.resolve(index)?;
        for (name, errno) in self.dirs.take_close_errors() {
            self.diag.close_diag(&name, errno);
        }
        Ok(self.dirs.current_fd())
    }

    pub fn chdir_fd(&self) -> BorrowedFd<'_> {
        self.dirs.current_fd()
    }

    /// Declared name of the current directory.
    pub fn dirname(&self) -> &Path {
        self.dirs.current_name()
    }

    pub fn dirs(&self) -> &WorkingDirs {
        &self.dirs
    }

    /// Absolute, normalized form of `name` as seen from directory `index`.
    /// Falls back to `name` itself if the directory's path is unknown.
    pub fn normalize_filename<P: AsRef<Path>>(&self, index: usize, name: P) -> PathBuf {
        let name = name.as_ref();
        self.dirs
            .normalize_filename(index, name)
            .unwrap_or_else(|| name.to_path_buf())
    }

    pub fn remove_any_file<P: AsRef<Path>>(
        &mut self,
        name: P,
        option: RemoveOption,
    ) -> Result<Removal, Errno> {
        Remover::new(self.dirs.current_fd(), self.caps, &mut self.delayed).remove(name, option)
    }

    /// Moves `name` aside before it gets overwritten, if backups are enabled.
    pub fn maybe_backup_file<P: AsRef<Path>>(
        &mut self,
        name: P,
        is_archive: bool,
    ) -> Result<(), Error> {
        match self.backups.as_mut() {
            Some(backups) => backups.maybe_backup(self.dirs.current_fd(), name, is_archive),
            None => Ok(()),
        }
    }

    /// Restores the last backup. Failure is reported, never fatal.
    pub fn undo_last_backup(&mut self) {
        let Some(backups) = self.backups.as_mut() else {
            return;
        };
        if let Err(err) = backups.undo_last_backup(self.dirs.current_fd()) {
            self.diag.error(&err);
        }
    }

    pub fn backups(&self) -> Option<&Backups> {
        self.backups.as_ref()
    }

    pub fn deref_stat<P: AsRef<Path>>(&self, name: P) -> Result<FileStat, Errno> {
        deref_stat(self.dirs.current_fd(), name, self.dereference)
    }

    pub fn savedir<P: AsRef<Path>>(
        &self,
        name: P,
        must_exist: bool,
    ) -> Result<Option<Vec<OsString>>, Errno> {
        savedir(self.dirs.current_fd(), name, must_exist)
    }

    pub fn diagnostics(&mut self) -> &mut Diagnostics {
        &mut self.diag
    }

    pub fn delayed_set_stat(&mut self) -> &mut DelayedSetStat {
        &mut self.delayed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::BackupType;
    use crate::diag::ExitStatus;
    use crate::path::normalize;
    use std::fs;
    use std::time::SystemTime;
    use tempfile::TempDir;

    fn session_in(tmp: &TempDir, config: Config) -> (Session, usize) {
        let mut session = Session::new(&config);
        let root = session.chdir_arg(tmp.path()).unwrap();
        (session, root)
    }

    #[test]
    fn names_resolve_against_the_selected_directory() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("sub/file"), b"abc").unwrap();

        let (mut session, root) = session_in(&tmp, Config::new());
        let sub = session.chdir_arg("sub").unwrap();
        assert_eq!(session.chdir_count(), 2);

        session.chdir_do(sub).unwrap();
        assert_eq!(session.dirname(), Path::new("sub"));
        assert_eq!(session.deref_stat("file").unwrap().st_size, 3);

        session.chdir_do(root).unwrap();
        assert_eq!(session.deref_stat("file"), Err(Errno::ENOENT));
        assert_eq!(
            session.savedir("sub", true).unwrap(),
            Some(vec![OsString::from("file")])
        );
        assert_eq!(
            session.normalize_filename(sub, "./file"),
            normalize(tmp.path()).join("sub/file")
        );
    }

    #[test]
    fn removing_a_directory_drops_its_pending_timestamps() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("d")).unwrap();

        let (mut session, root) = session_in(&tmp, Config::new());
        session.chdir_do(root).unwrap();
        session
            .delayed_set_stat()
            .defer("d", SystemTime::UNIX_EPOCH);

        assert_eq!(
            session.remove_any_file("d", RemoveOption::Ordinary),
            Ok(Removal::Removed)
        );
        assert!(session.delayed_set_stat().is_empty());
    }

    #[test]
    fn backups_are_off_by_default() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("f"), b"").unwrap();

        let (mut session, root) = session_in(&tmp, Config::new());
        session.chdir_do(root).unwrap();
        session.maybe_backup_file("f", false).unwrap();
        assert!(session.backups().is_none());
        assert!(tmp.path().join("f").exists());
    }

    #[test]
    fn failed_undo_is_reported_not_fatal() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("f"), b"").unwrap();

        let config = Config::new().backup(Some(BackupType::Simple));
        let (mut session, root) = session_in(&tmp, config);
        session.chdir_do(root).unwrap();
        session.maybe_backup_file("f", false).unwrap();
        assert!(tmp.path().join("f~").exists());

        fs::remove_file(tmp.path().join("f~")).unwrap();
        session.undo_last_backup();
        assert_eq!(session.diagnostics().status(), ExitStatus::Failure);
        assert!(session.backups().unwrap().pending().is_none());
    }
}
