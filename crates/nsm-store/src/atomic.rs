//! All-or-nothing file replacement.
//!
//! Writes go to a temporary file created in the target's own directory so
//! the final `rename()` never crosses a filesystem boundary. Readers see
//! either the previous content or the new content, never a torn file.

use crate::backup::create_backup;
use crate::locks::LockManager;
use crate::{fsync_dir, StoreError};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Prefix of in-flight temporary files. A crash can leave one behind; they
/// are never picked up as real content.
pub const TEMP_PREFIX: &str = ".tmp-nsm-";

/// Owner read/write only.
pub const OWNER_ONLY: u32 = 0o600;

/// Atomically replace `path` with `data`, applying `mode` permission bits.
///
/// Any existing file is backed up to `<path>.<timestamp>.backup` first. A
/// failed backup is logged and ignored. On any failure before the rename
/// the temporary file is removed and `path` is left untouched.
///
/// Returns the backup path when one was taken.
pub fn safe_write(path: &Path, data: &[u8], mode: u32) -> Result<Option<PathBuf>, StoreError> {
    write_with_hook(path, data, mode, |_| Ok(()))
}

/// `safe_write` with a hook that runs after the temp file is complete and
/// before it is renamed into place. Tests use it to simulate a crash in
/// that window.
pub(crate) fn write_with_hook<F>(
    path: &Path,
    data: &[u8],
    mode: u32,
    before_persist: F,
) -> Result<Option<PathBuf>, StoreError>
where
    F: FnOnce(&Path) -> Result<(), std::io::Error>,
{
    let dir = parent_dir(path);
    fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(dir)
        .map_err(|e| StoreError::io(dir, e))?;
    tmp.write_all(data)
        .map_err(|e| StoreError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| StoreError::io(tmp.path(), e))?;
    set_mode(&tmp, mode)?;
    before_persist(tmp.path()).map_err(|e| StoreError::io(path, e))?;

    let backup = if path.is_file() {
        match create_backup(path) {
            Ok(b) => Some(b),
            Err(e) => {
                warn!("could not back up {} before overwrite: {e}", path.display());
                None
            }
        }
    } else {
        None
    };

    // On failure the returned NamedTempFile is dropped, which deletes it.
    tmp.persist(path).map_err(|e| StoreError::io(path, e.error))?;
    fsync_dir(dir).map_err(|e| StoreError::io(dir, e))?;

    debug!("wrote {} ({} bytes)", path.display(), data.len());
    Ok(backup)
}

#[cfg(unix)]
fn set_mode(tmp: &NamedTempFile, mode: u32) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(tmp.path(), fs::Permissions::from_mode(mode))
        .map_err(|e| StoreError::io(tmp.path(), e))
}

#[cfg(not(unix))]
fn set_mode(tmp: &NamedTempFile, mode: u32) -> Result<(), StoreError> {
    let mut perms = tmp
        .as_file()
        .metadata()
        .map_err(|e| StoreError::io(tmp.path(), e))?
        .permissions();
    perms.set_readonly(mode & 0o200 == 0);
    fs::set_permissions(tmp.path(), perms).map_err(|e| StoreError::io(tmp.path(), e))
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

/// Read the whole file. A missing path is [`StoreError::NotFound`].
pub fn safe_read(path: &Path) -> Result<Vec<u8>, StoreError> {
    if !path.exists() {
        return Err(StoreError::NotFound(path.to_path_buf()));
    }
    fs::read(path).map_err(|e| StoreError::io(path, e))
}

pub fn safe_read_to_string(path: &Path) -> Result<String, StoreError> {
    let bytes = safe_read(path)?;
    String::from_utf8(bytes).map_err(|e| {
        StoreError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        )
    })
}

/// Atomic writes plus the process-wide lock registry.
///
/// Writing and locking stay independent: `write` does not take the path's
/// lock, so callers doing read-then-write must wrap both in `with_lock` (or
/// use [`update`](Self::update), which does exactly that).
#[derive(Debug, Clone, Default)]
pub struct FileStore {
    locks: Arc<LockManager>,
}

impl FileStore {
    pub fn new(locks: Arc<LockManager>) -> Self {
        Self { locks }
    }

    #[inline]
    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    pub fn write(&self, path: &Path, data: &[u8], mode: u32) -> Result<Option<PathBuf>, StoreError> {
        safe_write(path, data, mode)
    }

    pub fn read(&self, path: &Path) -> Result<Vec<u8>, StoreError> {
        safe_read(path)
    }

    pub fn read_to_string(&self, path: &Path) -> Result<String, StoreError> {
        safe_read_to_string(path)
    }

    pub fn with_lock<T>(&self, path: &Path, f: impl FnOnce() -> T) -> T {
        self.locks.with_lock(path, f)
    }

    /// Locked read-modify-write of a text file.
    ///
    /// `f` receives the current content (`None` when the file does not
    /// exist) and returns the replacement, or `None` to leave the file
    /// alone. Returns whether a write happened. Unchanged content is not
    /// rewritten.
    pub fn update<E, F>(&self, path: &Path, mode: u32, f: F) -> Result<bool, E>
    where
        E: From<StoreError>,
        F: FnOnce(Option<String>) -> Result<Option<String>, E>,
    {
        self.with_lock(path, || {
            let current = match safe_read_to_string(path) {
                Ok(s) => Some(s),
                Err(StoreError::NotFound(_)) => None,
                Err(e) => return Err(e.into()),
            };
            let unchanged = current.clone();
            match f(current)? {
                Some(next) if unchanged.as_deref() != Some(next.as_str()) => {
                    safe_write(path, next.as_bytes(), mode)?;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backups_in(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".backup"))
            .collect()
    }

    fn temps_in(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with(TEMP_PREFIX))
            .collect()
    }

    #[test]
    fn write_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("shell.nix");
        safe_write(&path, b"{ }", OWNER_ONLY).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{ }");
    }

    #[test]
    fn first_write_takes_no_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shell.nix");
        safe_write(&path, b"one", OWNER_ONLY).unwrap();
        assert!(backups_in(dir.path()).is_empty());
    }

    #[test]
    fn overwrite_takes_backup_of_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shell.nix");
        assert_eq!(safe_write(&path, b"one", OWNER_ONLY).unwrap(), None);
        let taken = safe_write(&path, b"two", OWNER_ONLY).unwrap().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "two");
        let backups = backups_in(dir.path());
        assert_eq!(backups.len(), 1);
        assert_eq!(taken, dir.path().join(&backups[0]));
        let backed_up = fs::read_to_string(dir.path().join(&backups[0])).unwrap();
        assert_eq!(backed_up, "one");
    }

    #[test]
    fn no_temp_files_left_after_success() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        safe_write(&path, b"a = 1", OWNER_ONLY).unwrap();
        assert!(temps_in(dir.path()).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn write_applies_permission_bits() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        safe_write(&path, b"a = 1", OWNER_ONLY).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        safe_write(&path, b"a = 2", 0o644).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[test]
    fn failure_before_rename_preserves_original() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shell.nix");
        fs::write(&path, "original").unwrap();

        let result = write_with_hook(&path, b"replacement", OWNER_ONLY, |_| {
            Err(std::io::Error::other("simulated crash"))
        });

        assert!(result.is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), "original");
        assert!(temps_in(dir.path()).is_empty());
    }

    #[test]
    fn failure_before_rename_preserves_absence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shell.nix");

        let result = write_with_hook(&path, b"replacement", OWNER_ONLY, |_| {
            Err(std::io::Error::other("simulated crash"))
        });

        assert!(result.is_err());
        assert!(!path.exists());
        assert!(temps_in(dir.path()).is_empty());
    }

    #[test]
    fn hook_sees_complete_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shell.nix");
        write_with_hook(&path, b"complete", OWNER_ONLY, |tmp| {
            assert_eq!(fs::read(tmp)?, b"complete");
            assert!(!path.exists());
            Ok(())
        })
        .unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "complete");
    }

    #[test]
    fn rename_failure_cleans_up_temp() {
        let dir = tempfile::tempdir().unwrap();
        // A non-empty directory cannot be replaced by a file.
        let path = dir.path().join("occupied");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("inner"), "x").unwrap();

        let result = safe_write(&path, b"data", OWNER_ONLY);
        assert!(result.is_err());
        assert!(path.is_dir());
        assert!(temps_in(dir.path()).is_empty());
    }

    #[test]
    fn read_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = safe_read(&dir.path().join("absent")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn read_returns_full_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flake.nix");
        let body = "x".repeat(64 * 1024);
        safe_write(&path, body.as_bytes(), OWNER_ONLY).unwrap();
        assert_eq!(safe_read_to_string(&path).unwrap(), body);
    }

    #[test]
    fn update_skips_write_when_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shell.nix");
        let store = FileStore::default();
        store.write(&path, b"same", OWNER_ONLY).unwrap();

        let wrote = store
            .update::<StoreError, _>(&path, OWNER_ONLY, |cur| Ok(cur))
            .unwrap();
        assert!(!wrote);
        assert!(backups_in(dir.path()).is_empty());
    }

    #[test]
    fn update_sees_absent_file_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shell.nix");
        let store = FileStore::default();

        let wrote = store
            .update::<StoreError, _>(&path, OWNER_ONLY, |cur| {
                assert!(cur.is_none());
                Ok(Some("created".to_owned()))
            })
            .unwrap();
        assert!(wrote);
        assert_eq!(store.read_to_string(&path).unwrap(), "created");
    }
}
