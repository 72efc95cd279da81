//! Shared database service wrapper used across clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::Mutex;

use crate::config::SyncSettings;
use crate::db::{CheckpointReport, Database, DisputeRepository, SqliteDisputeRepository};
use crate::models::{Dispute, DisputeId, DisputeMessage, DisputeStatus, MessageRole};
use crate::sync::fs_ops::{discard_file, remove_sidecars, FileOps, StdFileOps};
use crate::sync::PendingApply;
use crate::{Error, Result};

/// Where the live file waits while a replacement is swapped in.
fn backup_path_for(db_path: &Path) -> PathBuf {
    let mut name = db_path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".replaced");
    db_path.with_file_name(name)
}

/// Thread-safe owner of the live connection.
///
/// The foreground holds this; the replication subsystem only borrows it for a
/// checkpoint, for the merge writes, or to swap the whole file.
#[derive(Clone)]
pub struct DatabaseService {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl DatabaseService {
    /// Open a database service at the given filesystem path.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        Self::open_path_with(db_path, &SyncSettings::default(), Arc::new(StdFileOps)).await
    }

    /// Open at `db_path`, first applying any parked download.
    pub async fn open_path_with(
        db_path: impl Into<PathBuf>,
        settings: &SyncSettings,
        ops: Arc<dyn FileOps>,
    ) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        PendingApply::new(&db_path, settings, ops)
            .apply_pending_if_any()
            .await;

        let db = Database::open(&db_path)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory database service (primarily for tests).
    pub fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
        })
    }

    /// Path of the live file, `None` when in memory.
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Flush the WAL into the main file.
    pub async fn checkpoint(&self) -> Result<CheckpointReport> {
        let db = self.db.lock().await;
        db.checkpoint()
    }

    /// Run `f` against the live connection while holding it exclusively.
    pub async fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let db = self.db.lock().await;
        f(db.connection())
    }

    /// Swap the live file for `replacement` and reopen.
    ///
    /// `replacement` must pass an integrity check first. The live file is
    /// moved aside rather than overwritten and comes back whenever the swap
    /// or the reopen fails, so on error the service still holds the original
    /// data. A replacement that could not be moved is left where it was.
    pub async fn replace_with(&self, replacement: &Path, ops: &dyn FileOps) -> Result<()> {
        let db_path = self.db_path.clone().ok_or_else(|| {
            Error::InvalidInput("An in-memory database cannot be replaced".to_string())
        })?;

        Database::verify_file(replacement)?;
        remove_sidecars(replacement);

        let mut db = self.db.lock().await;
        if let Err(error) = db.checkpoint_truncate() {
            tracing::warn!("WAL checkpoint before replace failed: {error}");
        }

        let old = std::mem::replace(&mut *db, Database::detached()?);
        if let Err(error) = old.close() {
            tracing::warn!("Closing live database before replace reported: {error}");
        }

        let backup = backup_path_for(&db_path);
        if let Err(error) = ops.replace(&db_path, &backup) {
            *db = Database::open(&db_path)?;
            return Err(error.into());
        }

        if let Err(error) = ops.replace(replacement, &db_path) {
            std::fs::rename(&backup, &db_path)?;
            *db = Database::open(&db_path)?;
            return Err(error.into());
        }
        remove_sidecars(&db_path);

        match Database::open(&db_path) {
            Ok(reopened) => {
                *db = reopened;
                discard_file(&backup);
                tracing::info!(
                    "Replaced local database {} with {}",
                    db_path.display(),
                    replacement.display()
                );
                Ok(())
            }
            Err(error) => {
                tracing::error!(
                    "Replacement for {} would not open ({error}); restoring the previous file",
                    db_path.display()
                );
                remove_sidecars(&db_path);
                std::fs::rename(&backup, &db_path)?;
                *db = Database::open(&db_path)?;
                Err(error)
            }
        }
    }

    /// Open a new dispute.
    pub async fn open_dispute(&self, shift_ref: &str, opened_by: &str) -> Result<Dispute> {
        let db = self.db.lock().await;
        let repo = SqliteDisputeRepository::new(db.connection());
        repo.create(shift_ref, opened_by)
    }

    /// Fetch a dispute by id.
    pub async fn get_dispute(&self, id: &DisputeId) -> Result<Option<Dispute>> {
        let db = self.db.lock().await;
        let repo = SqliteDisputeRepository::new(db.connection());
        repo.get(id)
    }

    /// List disputes newest-first.
    pub async fn list_disputes(&self, limit: usize) -> Result<Vec<Dispute>> {
        let db = self.db.lock().await;
        let repo = SqliteDisputeRepository::new(db.connection());
        repo.list(limit)
    }

    /// Append to a dispute thread.
    pub async fn post_message(
        &self,
        id: &DisputeId,
        author: &str,
        role: MessageRole,
        body: &str,
        status_code: Option<DisputeStatus>,
    ) -> Result<DisputeMessage> {
        let db = self.db.lock().await;
        let repo = SqliteDisputeRepository::new(db.connection());
        repo.post_message(id, author, role, body, status_code)
    }

    /// Record a decision.
    pub async fn decide(
        &self,
        id: &DisputeId,
        status: DisputeStatus,
        decided_by: &str,
    ) -> Result<Dispute> {
        let db = self.db.lock().await;
        let repo = SqliteDisputeRepository::new(db.connection());
        repo.decide(id, status, decided_by)
    }

    /// Thread of a dispute in key order.
    pub async fn messages(&self, id: &DisputeId) -> Result<Vec<DisputeMessage>> {
        let db = self.db.lock().await;
        let repo = SqliteDisputeRepository::new(db.connection());
        repo.messages(id)
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    struct AlwaysLocked;

    impl FileOps for AlwaysLocked {
        fn copy(&self, from: &Path, to: &Path) -> io::Result<u64> {
            std::fs::copy(from, to)
        }

        fn replace(&self, _from: &Path, _to: &Path) -> io::Result<()> {
            Err(io::Error::from(io::ErrorKind::PermissionDenied))
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn in_memory_create_and_list_roundtrip() {
        let service = DatabaseService::open_in_memory().unwrap();

        service.open_dispute("shift-0412", "ana").await.unwrap();
        let disputes = service.list_disputes(10).await.unwrap();
        assert_eq!(disputes.len(), 1);
        assert_eq!(disputes[0].shift_ref, "shift-0412");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn replace_with_swaps_content_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let live_path = dir.path().join("shiftbook.db");
        let other_path = dir.path().join("other.db");

        let live = DatabaseService::open_path(&live_path).await.unwrap();
        live.open_dispute("local-only", "ana").await.unwrap();

        let other = DatabaseService::open_path(&other_path).await.unwrap();
        let remote = other.open_dispute("from-remote", "lee").await.unwrap();
        other.checkpoint().await.unwrap();
        drop(other);

        live.replace_with(&other_path, &StdFileOps).await.unwrap();

        let disputes = live.list_disputes(10).await.unwrap();
        assert_eq!(disputes.len(), 1);
        assert_eq!(disputes[0].id, remote.id);
        assert!(!other_path.exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_replace_keeps_original_open() {
        let dir = tempfile::tempdir().unwrap();
        let live_path = dir.path().join("shiftbook.db");
        let incoming = dir.path().join("incoming.db");
        Database::open(&incoming).unwrap().close().unwrap();

        let live = DatabaseService::open_path(&live_path).await.unwrap();
        let dispute = live.open_dispute("local-only", "ana").await.unwrap();

        let result = live.replace_with(&incoming, &AlwaysLocked).await;

        assert!(matches!(result, Err(Error::Io(_))));
        assert!(incoming.exists());
        assert!(live.get_dispute(&dispute.id).await.unwrap().is_some());
        assert!(!backup_path_for(&live_path).exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn torn_replacement_is_rejected_before_the_swap() {
        let dir = tempfile::tempdir().unwrap();
        let live_path = dir.path().join("shiftbook.db");
        let good = dir.path().join("good.db");
        Database::open(&good).unwrap().close().unwrap();
        let mut bytes = std::fs::read(&good).unwrap()[..100].to_vec();
        bytes.extend(std::iter::repeat(0xAB).take(5_000));
        let torn = dir.path().join("torn.db");
        std::fs::write(&torn, bytes).unwrap();

        let live = DatabaseService::open_path(&live_path).await.unwrap();
        let before = live.open_dispute("before", "ana").await.unwrap();

        assert!(live.replace_with(&torn, &StdFileOps).await.is_err());

        let after = live.open_dispute("after", "ana").await.unwrap();
        drop(live);
        let reopened = DatabaseService::open_path(&live_path).await.unwrap();
        assert!(reopened.get_dispute(&before.id).await.unwrap().is_some());
        assert!(reopened.get_dispute(&after.id).await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn replacement_that_will_not_open_restores_the_original() {
        let dir = tempfile::tempdir().unwrap();
        let live_path = dir.path().join("shiftbook.db");
        // Sound file, but the schema blocks migrations: views cannot be indexed.
        let incompatible = dir.path().join("incompatible.db");
        let conn = Connection::open(&incompatible).unwrap();
        conn.execute_batch("CREATE VIEW disputes AS SELECT 'x' AS status;")
            .unwrap();
        conn.close().unwrap();

        let live = DatabaseService::open_path(&live_path).await.unwrap();
        let before = live.open_dispute("before", "ana").await.unwrap();

        assert!(live.replace_with(&incompatible, &StdFileOps).await.is_err());

        assert!(live.get_dispute(&before.id).await.unwrap().is_some());
        let after = live.open_dispute("after", "ana").await.unwrap();
        assert!(!backup_path_for(&live_path).exists());
        drop(live);
        let reopened = DatabaseService::open_path(&live_path).await.unwrap();
        assert!(reopened.get_dispute(&after.id).await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn in_memory_database_cannot_be_replaced() {
        let service = DatabaseService::open_in_memory().unwrap();
        let result = service
            .replace_with(Path::new("/nonexistent"), &StdFileOps)
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
