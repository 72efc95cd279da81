//! File operations used by snapshots and whole-file replacement.
//!
//! Behind a trait so lock contention can be simulated in tests.

use std::io;
use std::path::{Path, PathBuf};

/// Windows `ERROR_SHARING_VIOLATION`.
#[cfg(windows)]
const ERROR_SHARING_VIOLATION: i32 = 32;
/// Windows `ERROR_LOCK_VIOLATION`.
#[cfg(windows)]
const ERROR_LOCK_VIOLATION: i32 = 33;
/// `EBUSY` on Linux and macOS.
#[cfg(unix)]
const EBUSY: i32 = 16;

/// Copy and atomic-replace primitives.
pub trait FileOps: Send + Sync {
    /// Copy `from` to `to`, overwriting `to`.
    fn copy(&self, from: &Path, to: &Path) -> io::Result<u64>;

    /// Atomically move `from` over `to`. Both paths must be on the same filesystem.
    fn replace(&self, from: &Path, to: &Path) -> io::Result<()>;
}

/// `std::fs` backed implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdFileOps;

impl FileOps for StdFileOps {
    fn copy(&self, from: &Path, to: &Path) -> io::Result<u64> {
        std::fs::copy(from, to)
    }

    fn replace(&self, from: &Path, to: &Path) -> io::Result<()> {
        std::fs::rename(from, to)
    }
}

/// Whether an IO error means another handle is holding the file.
pub fn is_lock_contention(error: &io::Error) -> bool {
    if matches!(
        error.kind(),
        io::ErrorKind::PermissionDenied | io::ErrorKind::WouldBlock
    ) {
        return true;
    }

    #[cfg(windows)]
    let held_by_os = matches!(
        error.raw_os_error(),
        Some(ERROR_SHARING_VIOLATION | ERROR_LOCK_VIOLATION)
    );
    #[cfg(unix)]
    let held_by_os = error.raw_os_error() == Some(EBUSY);
    #[cfg(not(any(windows, unix)))]
    let held_by_os = false;

    held_by_os
}

/// `-wal` and `-shm` files that belong to a database path.
pub fn sidecar_paths(db_path: &Path) -> Vec<PathBuf> {
    let Some(file_name) = db_path.file_name() else {
        return Vec::new();
    };
    ["-wal", "-shm"]
        .iter()
        .map(|suffix| {
            let mut name = file_name.to_os_string();
            name.push(suffix);
            db_path.with_file_name(name)
        })
        .collect()
}

/// Remove WAL sidecars left behind by the file that was just replaced.
///
/// A stale WAL replayed onto a different main file corrupts it.
pub fn remove_sidecars(db_path: &Path) {
    for sidecar in sidecar_paths(db_path) {
        match std::fs::remove_file(&sidecar) {
            Ok(()) => tracing::debug!("Removed stale sidecar {}", sidecar.display()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => tracing::warn!(
                "Failed to remove stale sidecar {}: {}",
                sidecar.display(),
                error
            ),
        }
    }
}

/// Delete a scratch file, logging instead of failing.
pub fn discard_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => tracing::warn!("Failed to delete scratch file {}: {}", path.display(), error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_counts_as_contention() {
        let error = io::Error::from(io::ErrorKind::PermissionDenied);
        assert!(is_lock_contention(&error));
    }

    #[test]
    fn missing_file_is_not_contention() {
        let error = io::Error::from(io::ErrorKind::NotFound);
        assert!(!is_lock_contention(&error));
    }

    #[test]
    fn sidecars_follow_sqlite_naming() {
        let paths = sidecar_paths(Path::new("/data/shiftbook.db"));
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/data/shiftbook.db-wal"),
                PathBuf::from("/data/shiftbook.db-shm")
            ]
        );
    }

    #[test]
    fn remove_sidecars_ignores_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("shiftbook.db");
        std::fs::write(dir.path().join("shiftbook.db-wal"), b"wal").unwrap();

        remove_sidecars(&db_path);

        assert!(!dir.path().join("shiftbook.db-wal").exists());
    }

    #[test]
    fn std_replace_moves_file_over_target() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("incoming");
        let to = dir.path().join("live");
        std::fs::write(&from, b"new").unwrap();
        std::fs::write(&to, b"old").unwrap();

        StdFileOps.replace(&from, &to).unwrap();

        assert!(!from.exists());
        assert_eq!(std::fs::read(&to).unwrap(), b"new");
    }
}
