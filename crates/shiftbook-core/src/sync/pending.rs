//! Downloads that could not be swapped in because the live file was locked.
//!
//! The downloaded file is parked as `<dbname>.pending` beside the database and
//! applied on the next open, before any connection exists. The remote
//! timestamp of the download waits in `<dbname>.pending.ts`; once the file is
//! in place the conflict marker moves to it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::SyncSettings;
use crate::sync::fs_ops::{discard_file, is_lock_contention, remove_sidecars, FileOps};
use crate::sync::marker::ConflictMarker;
use crate::Result;

/// `<dbname>.pending` beside the database.
pub fn pending_path_for(db_path: &Path) -> PathBuf {
    let mut name = db_path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".pending");
    db_path.with_file_name(name)
}

fn stamp_path_for(pending_path: &Path) -> PathBuf {
    let mut name = pending_path.as_os_str().to_os_string();
    name.push(".ts");
    PathBuf::from(name)
}

/// Parks and later applies a pending artifact for one database path.
pub struct PendingApply {
    db_path: PathBuf,
    pending_path: PathBuf,
    stamp_path: PathBuf,
    ops: Arc<dyn FileOps>,
    attempts: u32,
    retry_delay: Duration,
}

impl PendingApply {
    pub fn new(db_path: &Path, settings: &SyncSettings, ops: Arc<dyn FileOps>) -> Self {
        let pending_path = pending_path_for(db_path);
        Self {
            db_path: db_path.to_path_buf(),
            stamp_path: stamp_path_for(&pending_path),
            pending_path,
            ops,
            attempts: settings.pending_attempts.max(1),
            retry_delay: settings.pending_retry_delay(),
        }
    }

    pub fn pending_path(&self) -> &Path {
        &self.pending_path
    }

    pub fn has_pending(&self) -> bool {
        self.pending_path.is_file()
    }

    /// Remote timestamp recorded with the parked file, if any.
    pub fn parked_modified_at(&self) -> Option<i64> {
        std::fs::read_to_string(&self.stamp_path)
            .ok()
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .filter(|value| *value > 0)
    }

    /// Move a downloaded file into the pending slot, replacing an older one.
    ///
    /// `modified_at` is the remote timestamp of the download.
    pub fn park(&self, downloaded: &Path, modified_at: i64) -> Result<PathBuf> {
        discard_file(&self.stamp_path);
        if let Err(error) = std::fs::rename(downloaded, &self.pending_path) {
            // Scratch and database directories can sit on different volumes.
            tracing::debug!("Rename into pending slot failed ({error}), copying instead");
            std::fs::copy(downloaded, &self.pending_path)?;
            std::fs::remove_file(downloaded).ok();
        }
        if let Err(error) = std::fs::write(&self.stamp_path, modified_at.to_string()) {
            tracing::warn!(
                "Could not record remote timestamp for {}: {error}",
                self.pending_path.display()
            );
        }
        tracing::warn!(
            "Local database is locked; parked download at {} for the next open",
            self.pending_path.display()
        );
        Ok(self.pending_path.clone())
    }

    /// Swap a parked download into place, if there is one.
    ///
    /// Returns `true` only when a pending file was applied; the conflict
    /// marker then holds the download's remote timestamp. Exhausted retries
    /// leave the artifact for the next open.
    pub async fn apply_pending_if_any(&self) -> bool {
        if !self.has_pending() {
            return false;
        }

        for attempt in 1..=self.attempts {
            match self.ops.replace(&self.pending_path, &self.db_path) {
                Ok(()) => {
                    remove_sidecars(&self.db_path);
                    // A rename consumes the artifact; a copy-based replace may not.
                    if self.pending_path.exists() {
                        std::fs::remove_file(&self.pending_path).ok();
                    }
                    match self.parked_modified_at() {
                        Some(modified_at) => {
                            ConflictMarker::beside(&self.db_path).save(modified_at);
                        }
                        None => tracing::warn!(
                            "Pending download had no remote timestamp; sync marker left as is"
                        ),
                    }
                    discard_file(&self.stamp_path);
                    tracing::info!(
                        "Applied pending download to {} on attempt {attempt}",
                        self.db_path.display()
                    );
                    return true;
                }
                Err(error) if attempt < self.attempts && is_lock_contention(&error) => {
                    tracing::debug!(
                        "Pending apply attempt {attempt}/{} blocked: {error}",
                        self.attempts
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(error) => {
                    tracing::warn!(
                        "Could not apply pending download {} after {attempt} attempt(s): {error}. Will retry on next open.",
                        self.pending_path.display()
                    );
                    return false;
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::sync::fs_ops::StdFileOps;

    struct LockedReplace {
        failures: u32,
        calls: AtomicU32,
    }

    impl FileOps for LockedReplace {
        fn copy(&self, from: &Path, to: &Path) -> io::Result<u64> {
            std::fs::copy(from, to)
        }

        fn replace(&self, from: &Path, to: &Path) -> io::Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(io::Error::from(io::ErrorKind::PermissionDenied));
            }
            std::fs::rename(from, to)
        }
    }

    fn fast_settings() -> SyncSettings {
        SyncSettings {
            pending_retry_delay_ms: 1,
            ..SyncSettings::default()
        }
    }

    #[test]
    fn pending_path_appends_suffix() {
        assert_eq!(
            pending_path_for(Path::new("/data/shiftbook.db")),
            PathBuf::from("/data/shiftbook.db.pending")
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn nothing_pending_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let pending = PendingApply::new(
            &dir.path().join("shiftbook.db"),
            &fast_settings(),
            Arc::new(StdFileOps),
        );
        assert!(!pending.apply_pending_if_any().await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn parked_file_is_applied_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("shiftbook.db");
        std::fs::write(&db_path, b"old").unwrap();
        std::fs::write(dir.path().join("shiftbook.db-wal"), b"stale wal").unwrap();
        let download = dir.path().join("download.db");
        std::fs::write(&download, b"new").unwrap();

        let pending = PendingApply::new(&db_path, &fast_settings(), Arc::new(StdFileOps));
        let parked = pending.park(&download, 800).unwrap();
        assert!(parked.exists());
        assert!(!download.exists());
        assert_eq!(pending.parked_modified_at(), Some(800));

        assert!(pending.apply_pending_if_any().await);
        assert_eq!(std::fs::read(&db_path).unwrap(), b"new");
        assert!(!pending.has_pending());
        assert!(!dir.path().join("shiftbook.db-wal").exists());
        assert_eq!(ConflictMarker::beside(&db_path).load(), 800);
        assert_eq!(pending.parked_modified_at(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn newer_park_replaces_older_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("shiftbook.db");
        std::fs::write(&db_path, b"old").unwrap();
        let pending = PendingApply::new(&db_path, &fast_settings(), Arc::new(StdFileOps));

        std::fs::write(dir.path().join("first.db"), b"first").unwrap();
        pending.park(&dir.path().join("first.db"), 800).unwrap();
        std::fs::write(dir.path().join("second.db"), b"second").unwrap();
        pending.park(&dir.path().join("second.db"), 950).unwrap();

        assert!(pending.apply_pending_if_any().await);
        assert_eq!(std::fs::read(&db_path).unwrap(), b"second");
        assert_eq!(ConflictMarker::beside(&db_path).load(), 950);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn retries_while_locked_then_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("shiftbook.db");
        std::fs::write(&db_path, b"old").unwrap();
        std::fs::write(pending_path_for(&db_path), b"new").unwrap();
        let ops = Arc::new(LockedReplace {
            failures: 5,
            calls: AtomicU32::new(0),
        });

        let pending = PendingApply::new(&db_path, &fast_settings(), ops.clone());
        assert!(pending.apply_pending_if_any().await);
        assert_eq!(ops.calls.load(Ordering::SeqCst), 6);
        assert_eq!(std::fs::read(&db_path).unwrap(), b"new");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn exhausted_retries_keep_the_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("shiftbook.db");
        std::fs::write(&db_path, b"old").unwrap();
        std::fs::write(pending_path_for(&db_path), b"new").unwrap();
        let ops = Arc::new(LockedReplace {
            failures: 100,
            calls: AtomicU32::new(0),
        });

        let pending = PendingApply::new(&db_path, &fast_settings(), ops.clone());
        assert!(!pending.apply_pending_if_any().await);
        assert_eq!(ops.calls.load(Ordering::SeqCst), 6);
        assert!(pending.has_pending());
        assert_eq!(ConflictMarker::beside(&db_path).load(), 0);
        assert_eq!(std::fs::read(&db_path).unwrap(), b"old");
    }
}
