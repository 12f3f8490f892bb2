use std::os::fd::BorrowedFd;
use std::path::Path;

use nix::errno::Errno;
use nix::unistd::{UnlinkatFlags, unlinkat};

use crate::delayed::DelayedStat;
use crate::host::HostCaps;
use crate::path::{join_dir, must_be_dot_or_slash};
use crate::savedir::savedir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOption {
    /// Files and empty directories only.
    Ordinary,
    /// Like `Ordinary`, but report a non-empty directory as
    /// [`Removal::NeedsRecursion`] instead of failing.
    WantDirectory,
    Recursive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Removed,
    /// The name obviously refers to the working directory; nothing was tried.
    Kept,
    NeedsRecursion,
}

/// Removes names relative to a directory handle.
pub struct Remover<'fd, 'a> {
    dir: BorrowedFd<'fd>,
    caps: HostCaps,
    delayed: &'a mut dyn DelayedStat,
}

impl<'fd, 'a> Remover<'fd, 'a> {
    pub fn new(dir: BorrowedFd<'fd>, caps: HostCaps, delayed: &'a mut dyn DelayedStat) -> Self {
        Self { dir, caps, delayed }
    }

    /// Removes `name`, whatever kind of file it is.
    ///
    /// On failure the errno of the call that failed is returned unchanged,
    /// including from deep inside a recursive removal.
    pub fn remove<P: AsRef<Path>>(
        &mut self,
        name: P,
        option: RemoveOption,
    ) -> Result<Removal, Errno> {
        let name = name.as_ref();

        // Some rmdir implementations happily remove "." or "/".
        if must_be_dot_or_slash(name) {
            log::debug!("not removing {}", name.display());
            return Ok(Removal::Kept);
        }

        let unlink_first = self.caps.cannot_unlink_directories;
        let mut unlink_error = None;
        if unlink_first {
            match unlinkat(self.dir, name, UnlinkatFlags::NoRemoveDir) {
                Ok(()) => return Ok(Removal::Removed),
                // POSIX says EPERM for a directory; Linux says EISDIR.
                Err(errno @ (Errno::EPERM | Errno::EISDIR)) => unlink_error = Some(errno),
                Err(errno) => return Err(errno),
            }
        }

        match self.rmdir(name) {
            Ok(()) => Ok(Removal::Removed),
            Err(Errno::ENOTDIR) => match unlink_error {
                // Not a directory after all: EPERM from unlink was genuine.
                Some(errno) => Err(errno),
                None => {
                    unlinkat(self.dir, name, UnlinkatFlags::NoRemoveDir)?;
                    Ok(Removal::Removed)
                }
            },
            Err(errno @ (Errno::EEXIST | Errno::ENOTEMPTY)) => match option {
                RemoveOption::Ordinary => Err(errno),
                RemoveOption::WantDirectory => Ok(Removal::NeedsRecursion),
                RemoveOption::Recursive => {
                    self.remove_children(name)?;
                    self.rmdir(name)?;
                    Ok(Removal::Removed)
                }
            },
            Err(errno) => Err(errno),
        }
    }

    fn remove_children(&mut self, name: &Path) -> Result<(), Errno> {
        let entries = savedir(self.dir, name, false)?.ok_or(Errno::ENOENT)?;
        for entry in entries {
            self.remove(join_dir(name, &entry), RemoveOption::Recursive)?;
        }
        Ok(())
    }

    fn rmdir(&mut self, name: &Path) -> Result<(), Errno> {
        unlinkat(self.dir, name, UnlinkatFlags::RemoveDir)?;
        self.delayed.forget(name);
        Ok(())
    }
}
