//! Textual file name manipulation.
//!
//! Nothing in here touches the filesystem. Names are treated as byte strings,
//! the way the kernel sees them, so non-UTF-8 names survive untouched.

use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};

use crate::host::DOUBLE_SLASH_IS_DISTINCT_ROOT;

pub(crate) const SEPARATOR: u8 = b'/';

#[inline]
fn is_slash(c: u8) -> bool {
    c == SEPARATOR
}

// Byte at `i`, or NUL past the end.
#[inline]
fn at(bytes: &[u8], i: usize) -> u8 {
    bytes.get(i).copied().unwrap_or(0)
}

pub fn is_absolute<P: AsRef<Path>>(name: P) -> bool {
    name.as_ref()
        .as_os_str()
        .as_bytes()
        .first()
        .is_some_and(|&c| is_slash(c))
}

/// Removes redundant slashes and `.` components, including a redundant
/// trailing slash. `..` is left alone: it may be significant in the presence
/// of symlinks, and on hosts where `/..` is not `/`.
pub fn normalize_in_place(buf: &mut Vec<u8>) {
    squeeze(buf, DOUBLE_SLASH_IS_DISTINCT_ROOT);
}

/// Returns a normalized copy of `name`.
pub fn normalize<P: AsRef<Path>>(name: P) -> PathBuf {
    let mut buf = name.as_ref().as_os_str().as_bytes().to_vec();
    normalize_in_place(&mut buf);
    PathBuf::from(OsString::from_vec(buf))
}

fn squeeze(buf: &mut Vec<u8>, double_slash_root: bool) {
    let len = buf.len();

    // Don't squeeze a leading "//" to "/" where the two are distinct.
    let start = usize::from(
        double_slash_root && is_slash(at(buf, 0)) && is_slash(at(buf, 1)) && !is_slash(at(buf, 2)),
    );
    let mut p = start;
    let mut q = start;

    // Leading "./" components.
    while at(buf, q) == b'.' && is_slash(at(buf, q + 1)) {
        q += 2;
        while is_slash(at(buf, q)) {
            q += 1;
        }
        if q == len {
            // Nothing but "./" runs: keep a single "."
            buf[p] = b'.';
            p += 1;
            break;
        }
    }

    // Copy the rest, dropping slash runs and internal "." components.
    while q < len {
        let c = buf[q];
        buf[p] = c;
        p += 1;
        q += 1;
        if is_slash(c) {
            loop {
                let dot = usize::from(at(buf, q) == b'.');
                if !is_slash(at(buf, q + dot)) {
                    break;
                }
                q += dot + 1;
            }
        }
    }

    // Trailing "." component and trailing slash.
    let mut n = p;
    if n - start >= 2 {
        if buf[n - 1] == b'.' && is_slash(buf[n - 2]) {
            n -= 1;
        }
        if n - start >= 2 && is_slash(buf[n - 1]) {
            n -= 1;
        }
    }
    buf.truncate(n);
}

/// True if `name` is obviously `.` or `/`, so that removing it must never be
/// attempted.
pub fn must_be_dot_or_slash<P: AsRef<Path>>(name: P) -> bool {
    let b = name.as_ref().as_os_str().as_bytes();

    if is_slash(at(b, 0)) {
        let mut i = 0;
        loop {
            if is_slash(at(b, i + 1)) {
                i += 1;
            } else if at(b, i + 1) == b'.' {
                let dots = 1 + usize::from(at(b, i + 2) == b'.');
                if !is_slash(at(b, i + 1 + dots)) {
                    return false;
                }
                i += 1 + dots;
            } else {
                return i + 1 >= b.len();
            }
        }
    }

    let rest = strip_dot_prefix(b);
    rest.is_empty() || rest == b"."
}

/// Skips leading `./` components and the slashes that follow them.
pub(crate) fn strip_dot_prefix(mut b: &[u8]) -> &[u8] {
    while b.len() >= 2 && b[0] == b'.' && is_slash(b[1]) {
        b = &b[2..];
        while b.first().is_some_and(|&c| is_slash(c)) {
            b = &b[1..];
        }
    }
    b
}

/// True for names that denote the directory itself: empty, `.`, or a run of
/// `./` prefixes with nothing after them.
pub fn denotes_self<P: AsRef<Path>>(name: P) -> bool {
    let rest = strip_dot_prefix(name.as_ref().as_os_str().as_bytes());
    rest.is_empty() || rest == b"."
}

/// Appends `name` to `dir` with exactly one separator between them.
pub fn join_dir<P: AsRef<Path>, Q: AsRef<OsStr>>(dir: P, name: Q) -> PathBuf {
    let dir = dir.as_ref().as_os_str().as_bytes();
    let name = name.as_ref().as_bytes();

    let mut buf = Vec::with_capacity(dir.len() + 1 + name.len());
    buf.extend_from_slice(dir);
    if !buf.last().is_some_and(|&c| is_slash(c)) {
        buf.push(SEPARATOR);
    }
    buf.extend_from_slice(name);
    PathBuf::from(OsString::from_vec(buf))
}
