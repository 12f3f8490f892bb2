use std::io;
use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("system error")]
    Sys(#[from] Errno),
    /// No correct continuation exists; the caller must terminate.
    #[error("{}: cannot {op}", .name.display())]
    Fatal {
        op: &'static str,
        name: PathBuf,
        #[source]
        source: Errno,
    },
    #[error("{}: cannot rename to {}", .from.display(), .to.display())]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: Errno,
    },
    #[error("{}: cannot remove", .name.display())]
    Remove {
        name: PathBuf,
        #[source]
        source: Errno,
    },
    #[error("{}: cannot stat", .name.display())]
    Stat {
        name: PathBuf,
        #[source]
        source: Errno,
    },
    #[error("{}: no backup name could be chosen", .0.display())]
    NoBackupName(PathBuf),
    #[error("invalid version control type {0:?}")]
    InvalidBackupType(String),
    #[error("directory index {0} was never registered")]
    UnknownDirectory(usize),
}

impl Error {
    pub(crate) fn fatal(op: &'static str, name: impl Into<PathBuf>, source: Errno) -> Self {
        Error::Fatal {
            op,
            name: name.into(),
            source,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Fatal { .. })
    }

    /// The underlying system error number, when there is one.
    pub fn errno(&self) -> Option<Errno> {
        match self {
            Error::Sys(errno)
            | Error::Fatal { source: errno, .. }
            | Error::Rename { source: errno, .. }
            | Error::Remove { source: errno, .. }
            | Error::Stat { source: errno, .. } => Some(*errno),
            _ => None,
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::UnknownDirectory(_) | Error::InvalidBackupType(_) => {
                io::Error::new(io::ErrorKind::InvalidInput, err)
            }
            Error::NoBackupName(_) => io::Error::other(err),
            err => match err.errno() {
                Some(errno) => io::Error::new(io::Error::from(errno).kind(), err),
                None => io::Error::other(err),
            },
        }
    }
}
