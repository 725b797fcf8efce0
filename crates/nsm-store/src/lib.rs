//! Crash-safe file persistence for NSM.
//!
//! This crate provides the storage layer every other NSM crate writes through:
//! [`safe_write`] replaces a file atomically (temp file in the same directory,
//! fsync, chmod, rename) after taking a timestamped backup of the previous
//! content, [`safe_read`] reads whole files, and [`LockManager`] serializes
//! read-modify-write sequences per normalized path within the process.
//! [`FileStore`] bundles the two for callers that need both.

pub mod atomic;
pub mod backup;
pub mod locks;

pub use atomic::{safe_read, safe_read_to_string, safe_write, FileStore, OWNER_ONLY, TEMP_PREFIX};
pub use backup::{backup_path_for, create_backup, BACKUP_SUFFIX};
pub use locks::{normalize_path, LockManager};

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Fsync a directory to ensure that a preceding `rename()` is durable.
///
/// POSIX does not guarantee a rename survives power loss until the parent
/// directory itself has been synced. Directories cannot be opened as files
/// on Windows, so this is a no-op there.
#[cfg(unix)]
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[cfg(not(unix))]
pub(crate) fn fsync_dir(_dir: &Path) -> Result<(), std::io::Error> {
    Ok(())
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            return StoreError::NotFound(path.to_path_buf());
        }
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}
