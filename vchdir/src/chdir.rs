//! Virtual working directories.
//!
//! Every `-C DIR` operand is registered in a [`ChdirTable`] and handed back as
//! a small index. Later filesystem calls are made relative to the directory
//! handle for that index instead of calling `chdir(2)`. [`WorkingDirs`] keeps
//! at most [`CHDIR_CACHE_SIZE`] handles open at once; the least recently used
//! one is closed to make room.
//!
//! Absolute paths are built by string concatenation and normalization, not by
//! canonicalization: two different chains reaching the same physical
//! directory are not recognized as the same, and symlinks in the chain are
//! preserved as written.

use std::collections::VecDeque;
use std::ffi::OsStr;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nix::errno::Errno;
use nix::fcntl::{OFlag, openat};
use nix::sys::stat::Mode;
use nix::unistd::close;

use crate::error::Error;
use crate::path::{denotes_self, is_absolute, join_dir, normalize, strip_dot_prefix};

/// Upper bound on simultaneously open directory handles. Some hosts allow
/// very few open descriptors per process.
pub const CHDIR_CACHE_SIZE: usize = 16;

// SAFETY: AT_FDCWD is never a real descriptor, so there is nothing to outlive.
const CWD: BorrowedFd<'static> = unsafe { BorrowedFd::borrow_raw(libc::AT_FDCWD) };

/// Handle meaning "relative to the process working directory".
pub fn cwd_fd() -> BorrowedFd<'static> {
    CWD
}

#[derive(Debug, Clone)]
struct Entry {
    // As given, minus any leading "./" components.
    name: PathBuf,
    // Normalized, or None if some earlier relative link had no known path.
    abspath: Option<PathBuf>,
}

/// The chdir targets, in registration order.
///
/// Index 0 is the initial working directory. A relative entry `i` is resolved
/// through entry `i - 1`; entries form a chain, never a tree. Once
/// registration is over the table is read-only and may be shared between
/// workers, each with its own [`WorkingDirs`].
#[derive(Debug, Clone, Default)]
pub struct ChdirTable {
    // Empty until the first registration, which also records index 0.
    entries: Vec<Entry>,
}

impl ChdirTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `dir` to the chain and returns its index.
    ///
    /// Names that denote the directory itself (`""`, `.`, `./`, ...) do not
    /// grow the table; the most recent index is returned instead. The first
    /// call looks up the process working directory, and failing to do so is
    /// fatal.
    pub fn register<P: AsRef<Path>>(&mut self, dir: P) -> Result<usize, Error> {
        if self.entries.is_empty() {
            let cwd =
                nix::unistd::getcwd().map_err(|errno| Error::fatal("getcwd", ".", errno))?;
            self.entries.push(Entry {
                name: PathBuf::from("."),
                abspath: Some(normalize(cwd)),
            });
        }

        let last = self.entries.len() - 1;
        let dir = dir.as_ref();
        if denotes_self(dir) {
            return Ok(last);
        }

        let name = PathBuf::from(OsStr::from_bytes(strip_dot_prefix(
            dir.as_os_str().as_bytes(),
        )));
        let abspath = if is_absolute(&name) {
            Some(normalize(&name))
        } else {
            self.entries[last]
                .abspath
                .as_ref()
                .map(|base| normalize(join_dir(base, &name)))
        };

        log::debug!("registered directory {} as #{}", name.display(), last + 1);
        self.entries.push(Entry { name, abspath });
        Ok(last + 1)
    }

    /// Number of directories registered beyond the initial one.
    pub fn count(&self) -> usize {
        self.entries.len().saturating_sub(1)
    }

    fn entry(&self, index: usize) -> Option<&Entry> {
        self.entries.get(index)
    }

    /// Declared name of directory `index`.
    pub fn name(&self, index: usize) -> Option<&Path> {
        match index {
            0 => Some(Path::new(".")),
            _ => self.entry(index).map(|entry| entry.name.as_path()),
        }
    }

    /// The absolute path standing for directory `index`. It may contain
    /// `..` components and is not canonical.
    pub fn abs_path(&self, index: usize) -> Option<&Path> {
        self.entry(index)?.abspath.as_deref()
    }

    /// Normalizes `name` as seen from directory `index`.
    ///
    /// `None` means the base directory has no known absolute path; callers
    /// should fall back to `name` unchanged.
    pub fn normalize_filename<P: AsRef<Path>>(&self, index: usize, name: P) -> Option<PathBuf> {
        let name = name.as_ref();
        if is_absolute(name) {
            return Some(normalize(name));
        }
        let base = self.abs_path(index)?;
        Some(normalize(join_dir(base, name)))
    }
}

/// Counters over the lifetime of a [`WorkingDirs`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub opened: usize,
    pub evicted: usize,
}

/// A chdir table plus the descriptor cache over it, and the current
/// directory.
///
/// Index 0 never occupies a cache slot. Not shareable across threads:
/// eviction closes handles unconditionally, so each worker needs its own
/// instance, built with [`WorkingDirs::with_table`] over a shared table.
#[derive(Debug)]
pub struct WorkingDirs {
    table: Arc<ChdirTable>,
    // Open handle per index, if any.
    handles: Vec<Option<OwnedFd>>,
    // Indices with an open handle, most recently used first.
    cache: VecDeque<usize>,
    capacity: usize,
    current: usize,
    open_flags: OFlag,
    stats: CacheStats,
    close_errors: Vec<(PathBuf, Errno)>,
}

impl WorkingDirs {
    pub fn new() -> Self {
        Self::with_options(CHDIR_CACHE_SIZE, false)
    }

    /// `dereference` allows the final component of a `-C` operand to be a
    /// symbolic link. Symlinks earlier in the name are always followed.
    pub fn with_options(capacity: usize, dereference: bool) -> Self {
        Self::with_table(Arc::new(ChdirTable::new()), capacity, dereference)
    }

    pub fn with_table(table: Arc<ChdirTable>, capacity: usize, dereference: bool) -> Self {
        let mut open_flags = OFlag::O_RDONLY
            | OFlag::O_DIRECTORY
            | OFlag::O_NOCTTY
            | OFlag::O_NONBLOCK
            | OFlag::O_CLOEXEC;
        if !dereference {
            open_flags |= OFlag::O_NOFOLLOW;
        }

        let capacity = capacity.max(1);
        Self {
            table,
            handles: Vec::new(),
            cache: VecDeque::with_capacity(capacity),
            capacity,
            current: 0,
            open_flags,
            stats: CacheStats::default(),
            close_errors: Vec::new(),
        }
    }

    /// The table of chdir targets; clone the `Arc` to hand it to a worker.
    pub fn table(&self) -> &Arc<ChdirTable> {
        &self.table
    }

    /// See [`ChdirTable::register`]. A table still shared with other workers
    /// is copied first.
    pub fn register<P: AsRef<Path>>(&mut self, dir: P) -> Result<usize, Error> {
        Arc::make_mut(&mut self.table).register(dir)
    }

    pub fn count(&self) -> usize {
        self.table.count()
    }

    /// Makes directory `index` current and returns its handle.
    ///
    /// Failing to open a directory is fatal: everything that follows would
    /// land in the wrong place.
    pub fn resolve(&mut self, index: usize) -> Result<BorrowedFd<'_>, Error> {
        self.switch_to(index)?;
        Ok(self.current_fd())
    }

    fn switch_to(&mut self, index: usize) -> Result<(), Error> {
        if index == self.current {
            return Ok(());
        }
        if index == 0 {
            self.current = 0;
            return Ok(());
        }

        let table = Arc::clone(&self.table);
        let entry = table.entry(index).ok_or(Error::UnknownDirectory(index))?;

        if self.handles.get(index).is_some_and(Option::is_some) {
            self.promote(index);
        } else {
            // Index 0 needs no opening, so this bottoms out.
            if !is_absolute(&entry.name) {
                self.switch_to(index - 1)?;
            }
            let fd = openat(
                self.current_fd(),
                entry.name.as_path(),
                self.open_flags,
                Mode::empty(),
            )
            .map_err(|errno| Error::fatal("open directory", entry.name.clone(), errno))?;
            self.stats.opened += 1;
            log::debug!("opened {} for #{}", entry.name.display(), index);
            self.admit(index, fd);
        }

        self.current = index;
        Ok(())
    }

    // Caches a freshly opened handle, evicting the least recently used one
    // if the cache is full.
    fn admit(&mut self, index: usize, fd: OwnedFd) {
        if self.cache.len() >= self.capacity {
            if let Some(stale) = self.cache.pop_back() {
                if let Some(stale_fd) = self.handles[stale].take() {
                    let name = self.table.name(stale).unwrap_or(Path::new("."));
                    log::debug!("closing {} (#{})", name.display(), stale);
                    if let Err(errno) = close(stale_fd) {
                        self.close_errors.push((name.to_path_buf(), errno));
                    }
                }
                self.stats.evicted += 1;
            }
        }
        if self.handles.len() <= index {
            self.handles.resize_with(index + 1, || None);
        }
        self.handles[index] = Some(fd);
        self.cache.push_front(index);
    }

    fn promote(&mut self, index: usize) {
        if let Some(pos) = self.cache.iter().position(|&i| i == index) {
            if pos != 0 {
                self.cache.remove(pos);
                self.cache.push_front(index);
            }
        }
    }

    /// Failed closes of evicted handles since the last call, with the
    /// declared name of each directory.
    pub fn take_close_errors(&mut self) -> Vec<(PathBuf, Errno)> {
        std::mem::take(&mut self.close_errors)
    }

    /// Handle of the current directory; valid until the next `resolve`.
    pub fn current_fd(&self) -> BorrowedFd<'_> {
        if self.current == 0 {
            return CWD;
        }
        match self.handles.get(self.current) {
            Some(Some(fd)) => fd.as_fd(),
            _ => {
                debug_assert!(false, "current directory #{} is not open", self.current);
                CWD
            }
        }
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Declared name of the current directory.
    pub fn current_name(&self) -> &Path {
        self.table.name(self.current).unwrap_or(Path::new("."))
    }

    pub fn abs_path(&self, index: usize) -> Option<&Path> {
        self.table.abs_path(index)
    }

    pub fn normalize_filename<P: AsRef<Path>>(&self, index: usize, name: P) -> Option<PathBuf> {
        self.table.normalize_filename(index, name)
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn open_count(&self) -> usize {
        self.cache.len()
    }

    /// Cached indices, most recently used first.
    pub fn cache_order(&self) -> impl Iterator<Item = usize> + '_ {
        self.cache.iter().copied()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for WorkingDirs {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::fcntl::AtFlags;
    use nix::sys::stat::fstatat;
    use std::fs;
    use std::os::fd::{AsRawFd, FromRawFd};
    use tempfile::TempDir;

    // Builds root/d1/d2/.../dN, each with a marker file naming its depth.
    fn nested(depth: usize) -> TempDir {
        let tmp = TempDir::new().unwrap();
        let mut dir = tmp.path().to_path_buf();
        for i in 1..=depth {
            dir.push(format!("d{i}"));
            fs::create_dir(&dir).unwrap();
            fs::write(dir.join(format!("marker{i}")), b"").unwrap();
        }
        tmp
    }

    fn register_chain(dirs: &mut WorkingDirs, root: &Path, depth: usize) -> Vec<usize> {
        let mut indices = vec![dirs.register(root).unwrap()];
        for i in 1..=depth {
            indices.push(dirs.register(format!("d{i}")).unwrap());
        }
        indices
    }

    fn exists_here(dirs: &WorkingDirs, name: &str) -> bool {
        fstatat(dirs.current_fd(), name, AtFlags::AT_SYMLINK_NOFOLLOW).is_ok()
    }

    #[test]
    fn relative_entries_chain_off_the_previous_one() {
        let mut dirs = WorkingDirs::new();
        let a = dirs.register("/tmp/a").unwrap();
        let b = dirs.register("b").unwrap();
        assert_eq!((a, b), (1, 2));
        assert_eq!(dirs.abs_path(b), Some(Path::new("/tmp/a/b")));

        let c = dirs.register("./c//d/./").unwrap();
        assert_eq!(dirs.abs_path(c), Some(Path::new("/tmp/a/b/c/d")));
        assert_eq!(dirs.count(), 3);
    }

    #[test]
    fn self_references_do_not_grow_the_table() {
        let mut dirs = WorkingDirs::new();
        assert_eq!(dirs.register(".").unwrap(), 0);
        assert_eq!(dirs.register("").unwrap(), 0);
        let x = dirs.register("/x").unwrap();
        assert_eq!(dirs.register("./").unwrap(), x);
        assert_eq!(dirs.register("./././/").unwrap(), x);
        assert_eq!(dirs.count(), 1);
    }

    #[test]
    fn leading_dot_slash_is_stripped_from_the_name() {
        let mut dirs = WorkingDirs::new();
        dirs.register("/base").unwrap();
        let i = dirs.register(".//./sub").unwrap();
        assert_eq!(dirs.table().name(i), Some(Path::new("sub")));
    }

    #[test]
    fn index_zero_is_the_process_directory() {
        let mut dirs = WorkingDirs::new();
        assert_eq!(dirs.count(), 0);
        assert_eq!(dirs.resolve(0).unwrap().as_raw_fd(), libc::AT_FDCWD);
        assert_eq!(dirs.current_name(), Path::new("."));
        assert_eq!(dirs.open_count(), 0);
    }

    #[test]
    fn working_directory_is_looked_up_on_first_registration() {
        let mut dirs = WorkingDirs::new();
        assert_eq!(dirs.abs_path(0), None);
        assert_eq!(dirs.normalize_filename(0, "x"), None);

        assert_eq!(dirs.register(".").unwrap(), 0);
        let cwd = normalize(std::env::current_dir().unwrap());
        assert_eq!(dirs.abs_path(0), Some(cwd.as_path()));
        assert_eq!(dirs.count(), 0);
    }

    #[test]
    fn failed_close_on_eviction_is_recorded() {
        let tmp = nested(2);
        let mut dirs = WorkingDirs::with_options(1, false);
        let first = dirs.register(tmp.path().join("d1")).unwrap();
        let second = dirs.register(tmp.path().join("d1/d2")).unwrap();

        dirs.resolve(first).unwrap();
        // Swap in a descriptor number no process can have open.
        // SAFETY: the bogus handle is only ever passed to close(2).
        dirs.handles[first] = Some(unsafe { OwnedFd::from_raw_fd(i32::MAX - 1) });

        dirs.resolve(second).unwrap();
        assert!(exists_here(&dirs, "marker2"));
        assert_eq!(
            dirs.take_close_errors(),
            vec![(tmp.path().join("d1"), Errno::EBADF)]
        );
        assert!(dirs.take_close_errors().is_empty());
    }

    #[test]
    fn workers_share_one_table() {
        let tmp = nested(3);
        let mut dirs = WorkingDirs::new();
        let indices = register_chain(&mut dirs, tmp.path(), 3);
        let last = *indices.last().unwrap();
        let table = Arc::clone(dirs.table());

        let workers: Vec<_> = (0..2)
            .map(|_| {
                let table = Arc::clone(&table);
                std::thread::spawn(move || {
                    let mut worker = WorkingDirs::with_table(table, CHDIR_CACHE_SIZE, false);
                    worker.resolve(last).unwrap();
                    exists_here(&worker, "marker3")
                })
            })
            .collect();
        for worker in workers {
            assert!(worker.join().unwrap());
        }
        assert_eq!(dirs.stats().opened, 0);

        // Registering through a worker leaves the shared table alone.
        let mut worker = WorkingDirs::with_table(Arc::clone(&table), CHDIR_CACHE_SIZE, false);
        worker.register("extra").unwrap();
        assert_eq!(worker.count(), 4);
        assert_eq!(table.count(), 3);
    }

    #[test]
    fn normalize_filename_uses_the_base_directory() {
        let mut dirs = WorkingDirs::new();
        let i = dirs.register("/srv/data/").unwrap();
        assert_eq!(
            dirs.normalize_filename(i, "./x//y/."),
            Some(PathBuf::from("/srv/data/x/y"))
        );
        assert_eq!(
            dirs.normalize_filename(i, "/etc//passwd"),
            Some(PathBuf::from("/etc/passwd"))
        );
        assert_eq!(dirs.normalize_filename(42, "x"), None);
    }

    #[test]
    fn resolving_a_chain_opens_each_directory_once() {
        let tmp = nested(5);
        let mut dirs = WorkingDirs::new();
        let indices = register_chain(&mut dirs, tmp.path(), 5);

        dirs.resolve(*indices.last().unwrap()).unwrap();
        assert!(exists_here(&dirs, "marker5"));
        assert_eq!(dirs.stats(), CacheStats { opened: 6, evicted: 0 });
        assert_eq!(dirs.current_name(), Path::new("d5"));

        // Everything up the chain is cached now.
        for &i in &indices {
            dirs.resolve(i).unwrap();
        }
        assert_eq!(dirs.stats().opened, 6);
        assert!(exists_here(&dirs, "marker5"));
    }

    #[test]
    fn long_chains_evict_least_recently_used() {
        let depth = 40;
        let tmp = nested(depth);
        let mut dirs = WorkingDirs::new();
        let indices = register_chain(&mut dirs, tmp.path(), depth);
        let n = indices.len();

        for &i in &indices {
            dirs.resolve(i).unwrap();
            assert!(dirs.open_count() <= CHDIR_CACHE_SIZE);
        }
        assert_eq!(dirs.stats().opened, n);
        assert_eq!(dirs.stats().evicted, n - CHDIR_CACHE_SIZE);

        // The survivors are the most recent K, newest first.
        let expected: Vec<usize> = indices.iter().rev().take(CHDIR_CACHE_SIZE).copied().collect();
        assert_eq!(dirs.cache_order().collect::<Vec<_>>(), expected);

        // An evicted entry reopens through whatever part of the chain is needed.
        dirs.resolve(indices[3]).unwrap();
        assert!(exists_here(&dirs, "marker3"));
        assert!(dirs.open_count() <= CHDIR_CACHE_SIZE);
    }

    #[test]
    fn re_resolving_moves_to_front_without_opening() {
        let tmp = nested(3);
        let mut dirs = WorkingDirs::new();
        let indices = register_chain(&mut dirs, tmp.path(), 3);
        for &i in &indices {
            dirs.resolve(i).unwrap();
        }
        let opened = dirs.stats().opened;

        dirs.resolve(indices[1]).unwrap();
        assert_eq!(dirs.stats().opened, opened);
        assert_eq!(dirs.cache_order().next(), Some(indices[1]));
        assert!(exists_here(&dirs, "marker1"));
    }

    #[test]
    fn tiny_cache_still_resolves_deep_chains() {
        let tmp = nested(4);
        let mut dirs = WorkingDirs::with_options(1, false);
        let indices = register_chain(&mut dirs, tmp.path(), 4);

        dirs.resolve(indices[4]).unwrap();
        assert!(exists_here(&dirs, "marker4"));
        assert_eq!(dirs.open_count(), 1);
        dirs.resolve(indices[2]).unwrap();
        assert!(exists_here(&dirs, "marker2"));
    }

    #[test]
    fn missing_directory_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let mut dirs = WorkingDirs::new();
        dirs.register(tmp.path()).unwrap();
        let missing = dirs.register("no-such-dir").unwrap();
        let err = dirs.resolve(missing).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(err.errno(), Some(nix::errno::Errno::ENOENT));
    }

    #[test]
    fn unregistered_index_is_rejected() {
        let mut dirs = WorkingDirs::new();
        assert!(matches!(dirs.resolve(7), Err(Error::UnknownDirectory(7))));
    }

    #[test]
    fn trailing_symlink_requires_dereference() {
        let tmp = nested(1);
        std::os::unix::fs::symlink("d1", tmp.path().join("link")).unwrap();

        let mut strict = WorkingDirs::new();
        strict.register(tmp.path()).unwrap();
        let link = strict.register("link").unwrap();
        assert!(strict.resolve(link).unwrap_err().is_fatal());

        let mut lenient = WorkingDirs::with_options(CHDIR_CACHE_SIZE, true);
        lenient.register(tmp.path()).unwrap();
        let link = lenient.register("link").unwrap();
        lenient.resolve(link).unwrap();
        assert!(exists_here(&lenient, "marker1"));
    }
}
