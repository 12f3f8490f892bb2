//! Directories whose metadata is restored after their contents are extracted.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Hook invoked whenever a directory is removed, so that nothing tries to
/// restore metadata on it later.
pub trait DelayedStat {
    fn forget(&mut self, name: &Path);
}

#[derive(Debug, Default)]
pub struct DelayedSetStat {
    pending: BTreeMap<PathBuf, SystemTime>,
}

impl DelayedSetStat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arranges for `name` to get `mtime` back once extraction is done.
    pub fn defer<P: Into<PathBuf>>(&mut self, name: P, mtime: SystemTime) {
        self.pending.insert(name.into(), mtime);
    }

    pub fn mtime(&self, name: &Path) -> Option<SystemTime> {
        self.pending.get(name).copied()
    }

    pub fn contains(&self, name: &Path) -> bool {
        self.pending.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl DelayedStat for DelayedSetStat {
    fn forget(&mut self, name: &Path) {
        if self.pending.remove(name).is_some() {
            log::debug!("dropped delayed metadata for {}", name.display());
        }
    }
}
