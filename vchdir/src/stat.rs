use std::fmt;
use std::os::fd::BorrowedFd;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use nix::errno::Errno;
use nix::fcntl::AtFlags;
use nix::sys::stat::{FileStat, fstatat};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
    BlockDevice,
    CharDevice,
    Fifo,
    Socket,
    Unknown,
}

impl FileKind {
    pub fn from_mode(mode: libc::mode_t) -> Self {
        match mode & libc::S_IFMT {
            libc::S_IFREG => FileKind::Regular,
            libc::S_IFDIR => FileKind::Directory,
            libc::S_IFLNK => FileKind::Symlink,
            libc::S_IFBLK => FileKind::BlockDevice,
            libc::S_IFCHR => FileKind::CharDevice,
            libc::S_IFIFO => FileKind::Fifo,
            libc::S_IFSOCK => FileKind::Socket,
            _ => FileKind::Unknown,
        }
    }

    pub fn of(stat: &FileStat) -> Self {
        Self::from_mode(stat.st_mode as libc::mode_t)
    }

    pub fn is_device(self) -> bool {
        matches!(self, FileKind::BlockDevice | FileKind::CharDevice)
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FileKind::Regular => "regular file",
            FileKind::Directory => "directory",
            FileKind::Symlink => "symbolic link",
            FileKind::BlockDevice => "block device",
            FileKind::CharDevice => "character device",
            FileKind::Fifo => "fifo",
            FileKind::Socket => "socket",
            FileKind::Unknown => "unknown",
        })
    }
}

/// `stat` or `lstat` of `name` relative to `dir`, depending on whether
/// symbolic links are to be dereferenced.
pub fn deref_stat<P: AsRef<Path>>(
    dir: BorrowedFd<'_>,
    name: P,
    dereference: bool,
) -> Result<FileStat, Errno> {
    let flags = if dereference {
        AtFlags::empty()
    } else {
        AtFlags::AT_SYMLINK_NOFOLLOW
    };
    fstatat(dir, name.as_ref(), flags)
}

/// True for `host:file` names, which refer to a remote tape device.
/// A colon after the first slash does not count.
pub fn is_remote_device<P: AsRef<Path>>(name: P, force_local: bool) -> bool {
    if force_local {
        return false;
    }
    let bytes = name.as_ref().as_os_str().as_bytes();
    match bytes.iter().position(|&c| c == b':') {
        Some(colon) if colon > 0 => !bytes[..colon].contains(&b'/'),
        _ => false,
    }
}
