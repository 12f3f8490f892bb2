//! Reporting of failures on archive members.
//!
//! Read-class failures (open, close, read, seek, stat, readlink, listing) are
//! errors by default. With `ignore_failed_read` they become warnings, shown
//! only if the `failed-read` warning is enabled, and do not affect the exit
//! status.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use nix::errno::Errno;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum ExitStatus {
    #[default]
    Success,
    /// Some files differ or vanished while being read.
    Differs,
    Failure,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Differs => 1,
            ExitStatus::Failure => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Warning {
    FailedRead,
    FileRemoved,
}

impl Warning {
    fn bit(self) -> u32 {
        match self {
            Warning::FailedRead => 1 << 0,
            Warning::FileRemoved => 1 << 1,
        }
    }
}

impl FromStr for Warning {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "failed-read" => Ok(Warning::FailedRead),
            "file-removed" => Ok(Warning::FileRemoved),
            _ => Err(format!("unknown warning {s:?}")),
        }
    }
}

/// Set of enabled warnings. Everything is enabled by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Warnings(u32);

impl Warnings {
    pub fn all() -> Self {
        Warnings(Warning::FailedRead.bit() | Warning::FileRemoved.bit())
    }

    pub fn none() -> Self {
        Warnings(0)
    }

    pub fn enable(mut self, warning: Warning) -> Self {
        self.0 |= warning.bit();
        self
    }

    pub fn disable(mut self, warning: Warning) -> Self {
        self.0 &= !warning.bit();
        self
    }

    pub fn is_enabled(self, warning: Warning) -> bool {
        self.0 & warning.bit() != 0
    }
}

impl Default for Warnings {
    fn default() -> Self {
        Self::all()
    }
}

#[derive(Debug, Default)]
pub struct Diagnostics {
    ignore_failed_read: bool,
    warnings: Warnings,
    status: ExitStatus,
    errors: usize,
    warned: usize,
}

impl Diagnostics {
    pub fn new(ignore_failed_read: bool, warnings: Warnings) -> Self {
        Self {
            ignore_failed_read,
            warnings,
            ..Self::default()
        }
    }

    pub fn status(&self) -> ExitStatus {
        self.status
    }

    pub fn error_count(&self) -> usize {
        self.errors
    }

    pub fn warning_count(&self) -> usize {
        self.warned
    }

    fn raise(&mut self, status: ExitStatus) {
        self.status = self.status.max(status);
    }

    /// Reports a failure that is always an error.
    pub fn error(&mut self, err: &Error) {
        match std::error::Error::source(err) {
            Some(source) => log::error!("{err}: {source}"),
            None => log::error!("{err}"),
        }
        self.errors += 1;
        self.raise(ExitStatus::Failure);
    }

    pub fn warn(&mut self, warning: Warning, message: fmt::Arguments<'_>) {
        if self.warnings.is_enabled(warning) {
            log::warn!("{message}");
            self.warned += 1;
        }
    }

    fn read_failure(&mut self, message: fmt::Arguments<'_>, errno: Errno) {
        if self.ignore_failed_read {
            self.warn(
                Warning::FailedRead,
                format_args!("{message}: {}", errno.desc()),
            );
        } else {
            log::error!("{message}: {}", errno.desc());
            self.errors += 1;
            self.raise(ExitStatus::Failure);
        }
    }

    pub fn open_diag(&mut self, name: &Path, errno: Errno) {
        self.read_failure(format_args!("{}: Cannot open", name.display()), errno);
    }

    pub fn close_diag(&mut self, name: &Path, errno: Errno) {
        self.read_failure(format_args!("{}: Cannot close", name.display()), errno);
    }

    pub fn read_diag(&mut self, name: &Path, offset: u64, size: usize, errno: Errno) {
        self.read_failure(
            format_args!(
                "{}: Read error at byte {offset}, while reading {size} bytes",
                name.display()
            ),
            errno,
        );
    }

    pub fn seek_diag(&mut self, name: &Path, offset: u64, errno: Errno) {
        self.read_failure(
            format_args!("{}: Cannot seek to {offset}", name.display()),
            errno,
        );
    }

    pub fn stat_diag(&mut self, name: &Path, errno: Errno) {
        self.read_failure(format_args!("{}: Cannot stat", name.display()), errno);
    }

    pub fn readlink_diag(&mut self, name: &Path, errno: Errno) {
        self.read_failure(format_args!("{}: Cannot readlink", name.display()), errno);
    }

    pub fn savedir_diag(&mut self, name: &Path, errno: Errno) {
        self.read_failure(format_args!("{}: Cannot savedir", name.display()), errno);
    }

    /// A file that vanished below the top level was most likely removed
    /// while we were working; anything else goes to `fallback`.
    pub fn file_removed_diag(
        &mut self,
        name: &Path,
        top_level: bool,
        errno: Errno,
        fallback: fn(&mut Self, &Path, Errno),
    ) {
        if !top_level && errno == Errno::ENOENT {
            self.warn(
                Warning::FileRemoved,
                format_args!("{}: File removed before we read it", name.display()),
            );
            self.raise(ExitStatus::Differs);
        } else {
            fallback(self, name, errno);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_failures_are_errors_by_default() {
        let mut diag = Diagnostics::new(false, Warnings::all());
        diag.open_diag(Path::new("a"), Errno::EACCES);
        assert_eq!(diag.status(), ExitStatus::Failure);
        assert_eq!(diag.error_count(), 1);
        assert_eq!(diag.warning_count(), 0);
    }

    #[test]
    fn ignore_failed_read_downgrades_to_warnings() {
        let mut diag = Diagnostics::new(true, Warnings::all());
        diag.read_diag(Path::new("a"), 512, 10240, Errno::EIO);
        diag.seek_diag(Path::new("a"), 1024, Errno::EINVAL);
        diag.stat_diag(Path::new("b"), Errno::EACCES);
        assert_eq!(diag.status(), ExitStatus::Success);
        assert_eq!(diag.warning_count(), 3);

        let mut quiet = Diagnostics::new(true, Warnings::all().disable(Warning::FailedRead));
        quiet.readlink_diag(Path::new("l"), Errno::EACCES);
        quiet.savedir_diag(Path::new("d"), Errno::EACCES);
        quiet.close_diag(Path::new("f"), Errno::EBADF);
        assert_eq!(quiet.warning_count(), 0);
        assert_eq!(quiet.status(), ExitStatus::Success);
    }

    #[test]
    fn vanished_files_below_top_level() {
        let mut diag = Diagnostics::new(false, Warnings::all());
        diag.file_removed_diag(Path::new("d/x"), false, Errno::ENOENT, Diagnostics::stat_diag);
        assert_eq!(diag.status(), ExitStatus::Differs);
        assert_eq!(diag.warning_count(), 1);

        // At top level a missing file is an ordinary failure.
        diag.file_removed_diag(Path::new("x"), true, Errno::ENOENT, Diagnostics::stat_diag);
        assert_eq!(diag.status(), ExitStatus::Failure);

        // Status never goes back down.
        diag.file_removed_diag(Path::new("d/y"), false, Errno::ENOENT, Diagnostics::open_diag);
        assert_eq!(diag.status(), ExitStatus::Failure);
    }

    #[test]
    fn disabled_file_removed_warning_still_marks_difference() {
        let mut diag = Diagnostics::new(false, Warnings::none());
        diag.file_removed_diag(Path::new("d/x"), false, Errno::ENOENT, Diagnostics::open_diag);
        assert_eq!(diag.warning_count(), 0);
        assert_eq!(diag.status(), ExitStatus::Differs);
    }

    #[test]
    fn warning_names() {
        assert_eq!("failed-read".parse::<Warning>(), Ok(Warning::FailedRead));
        assert_eq!("file-removed".parse::<Warning>(), Ok(Warning::FileRemoved));
        assert!("bogus".parse::<Warning>().is_err());
        assert!(Warnings::none().enable(Warning::FileRemoved).is_enabled(Warning::FileRemoved));
        assert_eq!(ExitStatus::Differs.code(), 1);
    }
}
