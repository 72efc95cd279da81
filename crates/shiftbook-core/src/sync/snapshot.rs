//! Point-in-time copies of the live database, taken while it stays open.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::config::{SyncSettings, SCRATCH_DIR_NAME};
use crate::services::DatabaseService;
use crate::sync::fs_ops::{discard_file, is_lock_contention, FileOps};
use crate::{Error, Result};

/// What a scratch copy is for; decides its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    /// Local copy about to be uploaded
    Upload,
    /// Remote copy just downloaded
    CloudPull,
}

impl SnapshotKind {
    const fn infix(self) -> &'static str {
        match self {
            Self::Upload => ".snapshot_",
            Self::CloudPull => ".cloudsnap_",
        }
    }
}

/// Produces uniquely named copies of the database under `_sync_tmp/`.
pub struct SnapshotManager {
    scratch_dir: PathBuf,
    ops: Arc<dyn FileOps>,
    attempts: u32,
    retry_delay: Duration,
}

impl SnapshotManager {
    pub fn new(db_path: &Path, settings: &SyncSettings, ops: Arc<dyn FileOps>) -> Self {
        let scratch_dir = db_path
            .parent()
            .map_or_else(|| PathBuf::from(SCRATCH_DIR_NAME), |dir| dir.join(SCRATCH_DIR_NAME));
        Self {
            scratch_dir,
            ops,
            attempts: settings.snapshot_attempts.max(1),
            retry_delay: settings.snapshot_retry_delay(),
        }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Fresh, unused scratch path such as `shiftbook.snapshot_20240301_101500_123456.db`.
    pub fn scratch_path(&self, db_path: &Path, kind: SnapshotKind) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.scratch_dir)?;

        let stem = db_path
            .file_stem()
            .map_or_else(|| "database".into(), |stem| stem.to_string_lossy());
        let ext = db_path
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S_%6f");
        let base = format!("{stem}{}{stamp}", kind.infix());

        let mut candidate = self.scratch_dir.join(format!("{base}{ext}"));
        let mut bump = 1;
        while candidate.exists() {
            candidate = self.scratch_dir.join(format!("{base}_{bump}{ext}"));
            bump += 1;
        }
        Ok(candidate)
    }

    /// Checkpoint the live connection, then copy its file to a new scratch path.
    ///
    /// The connection is never closed. Copies that hit a sharing violation are
    /// retried; a failed attempt leaves no partial file behind.
    pub async fn snapshot(&self, db: &DatabaseService) -> Result<PathBuf> {
        let db_path = db.db_path().ok_or_else(|| {
            Error::InvalidInput("An in-memory database has no file to snapshot".to_string())
        })?;

        if let Err(error) = db.checkpoint().await {
            tracing::warn!("WAL checkpoint failed, snapshot may miss recent writes: {error}");
        }

        let dest = self.scratch_path(db_path, SnapshotKind::Upload)?;
        self.copy_with_retry(db_path, &dest).await?;
        tracing::debug!("Snapshot written to {}", dest.display());
        Ok(dest)
    }

    /// Copy `source` to `dest`, retrying while another handle holds the file.
    pub async fn copy_with_retry(&self, source: &Path, dest: &Path) -> Result<()> {
        let mut attempt = 1;
        loop {
            let ops = Arc::clone(&self.ops);
            let (from, to) = (source.to_path_buf(), dest.to_path_buf());
            let result = tokio::task::spawn_blocking(move || ops.copy(&from, &to))
                .await
                .map_err(|error| Error::Io(io::Error::other(error)))?;

            match result {
                Ok(_) => return Ok(()),
                Err(error) => {
                    discard_file(dest);
                    if attempt >= self.attempts || !is_lock_contention(&error) {
                        tracing::warn!(
                            "Snapshot copy of {} failed after {attempt} attempt(s): {error}",
                            source.display()
                        );
                        return Err(error.into());
                    }
                    tracing::debug!(
                        "Snapshot copy attempt {attempt}/{} hit a locked file, retrying: {error}",
                        self.attempts
                    );
                    tokio::time::sleep(self.retry_delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Remove scratch copies older than `max_age`, left behind by interrupted runs.
    pub fn purge_stale(&self, max_age: Duration) -> usize {
        let Ok(entries) = std::fs::read_dir(&self.scratch_dir) else {
            return 0;
        };
        let now = SystemTime::now();

        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let is_scratch = [SnapshotKind::Upload, SnapshotKind::CloudPull]
                .iter()
                .any(|kind| name.contains(kind.infix()));
            if !is_scratch {
                continue;
            }

            let age = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok());
            if age.is_some_and(|age| age >= max_age) {
                let path = entry.path();
                if std::fs::remove_file(&path).is_ok() {
                    tracing::info!("Removed stale sync scratch file {}", path.display());
                    removed += 1;
                }
            }
        }
        removed
    }
}
