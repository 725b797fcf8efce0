use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// In-process mutual exclusion keyed by normalized absolute path.
///
/// One mutex per path, created on first use and kept for the life of the
/// manager. Two unrelated paths never contend; every caller touching the
/// same path serializes. Nothing here coordinates with other processes.
#[derive(Debug, Default)]
pub struct LockManager {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, key: &Path) -> Arc<Mutex<()>> {
        let mut map = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(map.entry(key.to_path_buf()).or_default())
    }

    /// Run `f` while holding the lock for `path`.
    ///
    /// The lock is released on every exit path, including a panic inside
    /// `f`. A lock poisoned by such a panic is recovered rather than
    /// propagated: the data it guards is the file on disk, which the atomic
    /// writer never leaves half-written.
    pub fn with_lock<T>(&self, path: &Path, f: impl FnOnce() -> T) -> T {
        let key = normalize_path(path);
        let handle = self.handle(&key);
        let _guard = handle.lock().unwrap_or_else(PoisonError::into_inner);
        debug!("acquired lock for {}", key.display());
        let out = f();
        debug!("released lock for {}", key.display());
        out
    }

    /// Number of distinct paths that have been locked so far.
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Absolute, lexically cleaned form of `path`.
///
/// Relative paths are resolved against the current directory; `.` is
/// dropped and `..` pops a preceding component. Symlinks are not resolved,
/// so the target does not need to exist.
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };

    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn normalize_removes_dots() {
        assert_eq!(
            normalize_path(Path::new("/tmp/./project/../project/shell.nix")),
            PathBuf::from("/tmp/project/shell.nix")
        );
    }

    #[test]
    fn normalize_does_not_escape_root() {
        assert_eq!(
            normalize_path(Path::new("/../../etc")),
            PathBuf::from("/etc")
        );
    }

    #[test]
    fn normalize_makes_relative_absolute() {
        let n = normalize_path(Path::new("shell.nix"));
        assert!(n.is_absolute());
        assert!(n.ends_with("shell.nix"));
    }

    #[test]
    fn equivalent_paths_share_one_lock() {
        let locks = LockManager::new();
        locks.with_lock(Path::new("/tmp/a/shell.nix"), || {});
        locks.with_lock(Path::new("/tmp/a/./b/../shell.nix"), || {});
        assert_eq!(locks.len(), 1);

        locks.with_lock(Path::new("/tmp/a/flake.nix"), || {});
        assert_eq!(locks.len(), 2);
    }

    #[test]
    fn with_lock_returns_closure_value() {
        let locks = LockManager::new();
        let v = locks.with_lock(Path::new("/tmp/x"), || 42);
        assert_eq!(v, 42);
    }

    #[test]
    fn lock_is_released_after_panic() {
        let locks = Arc::new(LockManager::new());
        let path = PathBuf::from("/tmp/nsm-panic-test");

        let l = Arc::clone(&locks);
        let p = path.clone();
        let joined = std::thread::spawn(move || {
            l.with_lock(&p, || panic!("boom"));
        })
        .join();
        assert!(joined.is_err());

        let ran = AtomicBool::new(false);
        locks.with_lock(&path, || ran.store(true, Ordering::SeqCst));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn new_manager_is_empty() {
        assert!(LockManager::new().is_empty());
    }
}
