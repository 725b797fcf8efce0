use crate::StoreError;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const BACKUP_SUFFIX: &str = "backup";

/// Sibling path `<original>.<timestamp>.backup` for a backup taken now.
///
/// The timestamp has microsecond resolution so that back-to-back writes of
/// the same file produce distinct backups.
pub fn backup_path_for(path: &Path) -> PathBuf {
    let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S%6f");
    let mut name = OsString::from(path.as_os_str());
    name.push(format!(".{timestamp}.{BACKUP_SUFFIX}"));
    PathBuf::from(name)
}

/// Copy `path` to a fresh timestamped backup next to it.
///
/// Backups are write-once and never read back by NSM.
pub fn create_backup(path: &Path) -> Result<PathBuf, StoreError> {
    if !path.is_file() {
        return Err(StoreError::NotFound(path.to_path_buf()));
    }
    let backup = backup_path_for(path);
    fs::copy(path, &backup).map_err(|e| StoreError::io(&backup, e))?;
    debug!("backed up {} to {}", path.display(), backup.display());
    Ok(backup)
}
