pub mod backup;
pub mod chdir;
pub mod config;
pub mod delayed;
pub mod diag;
pub mod error;
pub mod host;
pub mod path;
pub mod remove;
pub mod savedir;
pub mod session;
pub mod stat;
pub mod suffix;

pub use backup::{BackupNamer, BackupType, Backups, VersionControl};
pub use chdir::{CHDIR_CACHE_SIZE, ChdirTable, WorkingDirs};
pub use config::Config;
pub use diag::{Diagnostics, ExitStatus, Warning, Warnings};
pub use error::Error;
pub use path::normalize;
pub use remove::{Removal, RemoveOption};
pub use session::Session;
pub use stat::FileKind;
pub use suffix::compression_program;
