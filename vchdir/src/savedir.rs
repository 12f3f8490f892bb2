use std::ffi::{OsStr, OsString};
use std::os::fd::BorrowedFd;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use nix::dir::Dir;
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::stat::Mode;

/// Lists the entries of directory `name`, relative to `dir`, sorted by name
/// and without `.` and `..`.
///
/// A missing directory yields `Ok(None)` unless `must_exist` is set.
pub fn savedir<P: AsRef<Path>>(
    dir: BorrowedFd<'_>,
    name: P,
    must_exist: bool,
) -> Result<Option<Vec<OsString>>, Errno> {
    let flags = OFlag::O_RDONLY
        | OFlag::O_DIRECTORY
        | OFlag::O_NOCTTY
        | OFlag::O_NONBLOCK
        | OFlag::O_CLOEXEC;
    let mut stream = match Dir::openat(dir, name.as_ref(), flags, Mode::empty()) {
        Ok(stream) => stream,
        Err(Errno::ENOENT) if !must_exist => return Ok(None),
        Err(errno) => return Err(errno),
    };

    let mut names = Vec::new();
    for entry in stream.iter() {
        let entry = entry?;
        let bytes = entry.file_name().to_bytes();
        if bytes == b"." || bytes == b".." {
            continue;
        }
        names.push(OsStr::from_bytes(bytes).to_os_string());
    }
    names.sort();
    Ok(Some(names))
}
