//! Sync coordinator: decides when it is safe to push or pull the database.
//!
//! One lock serializes every decision point (rate limit, conflict check,
//! marker read and write). Transfers run outside it. Every public operation is
//! total: failures come back as outcomes and are logged, never propagated,
//! except `merge_aggregate`, which returns `Result`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, MutexGuard};

use crate::config::SyncSettings;
use crate::db::Database;
use crate::models::DisputeId;
use crate::remote::{RemoteObject, RemoteStore};
use crate::services::DatabaseService;
use crate::sync::fs_ops::{
    discard_file, is_lock_contention, remove_sidecars, FileOps, StdFileOps,
};
use crate::sync::marker::ConflictMarker;
use crate::sync::merge::merge_dispute_from_snapshot;
use crate::sync::pending::PendingApply;
use crate::sync::snapshot::{SnapshotKind, SnapshotManager};
use crate::sync::tasks::BackgroundTasks;
use crate::{Error, Result};

const SQLITE_HEADER: &[u8] = b"SQLite format 3\0";
const STALE_SCRATCH_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// `true` when uploading would overwrite remote state this replica has not seen.
///
/// `remote` is `None` when the remote timestamp could not be determined.
pub const fn is_conflicted(remote: Option<i64>, marker: i64) -> bool {
    match remote {
        None => true,
        Some(remote) if remote <= 0 => false,
        Some(_) if marker <= 0 => true,
        Some(remote) => remote > marker,
    }
}

/// Result of an upload attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Stored remotely; the marker now holds `modified_at`
    Uploaded { modified_at: i64 },
    /// Called again inside the minimum interval; the store was not contacted
    Throttled,
    /// The remote holds changes this replica has not seen, or its state is unknown
    Conflicted { remote: Option<i64>, marker: i64 },
    /// Transport or filesystem failure
    Failed(String),
}

impl UploadOutcome {
    pub const fn is_uploaded(&self) -> bool {
        matches!(self, Self::Uploaded { .. })
    }
}

/// Result of a download attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Saved to a scratch path; the live file was not touched
    Downloaded { path: PathBuf, modified_at: i64 },
    /// Swapped in as the live database; the marker now holds `modified_at`
    Applied { modified_at: i64 },
    /// The live file was locked; the download waits at `pending_path`
    Parked { pending_path: PathBuf },
    /// Nothing has been uploaded yet
    NoRemote,
    /// Called again inside the minimum interval; the store was not contacted
    Throttled,
    /// Transport or filesystem failure
    Failed(String),
}

/// Snapshot of where this replica stands against the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    pub marker: i64,
    /// `None` when the remote could not be reached
    pub remote_modified_at: Option<i64>,
    pub conflicted: bool,
    pub pending: bool,
    pub remote_error: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum CallKind {
    Upload,
    Download,
}

#[derive(Debug, Default)]
struct CoordinatorState {
    last_upload: Option<Instant>,
    last_download: Option<Instant>,
    folder_id: Option<String>,
}

impl CoordinatorState {
    /// Record an attempt of `kind` unless the previous one was under `floor` ago.
    fn admit(&mut self, kind: CallKind, floor: Duration) -> bool {
        let slot = match kind {
            CallKind::Upload => &mut self.last_upload,
            CallKind::Download => &mut self.last_download,
        };
        let now = Instant::now();
        if slot.is_some_and(|previous| now.duration_since(previous) < floor) {
            return false;
        }
        *slot = Some(now);
        true
    }
}

/// Owns the replication protocol for one local database.
pub struct SyncCoordinator {
    store: Arc<dyn RemoteStore>,
    db: DatabaseService,
    db_path: PathBuf,
    settings: SyncSettings,
    ops: Arc<dyn FileOps>,
    marker: ConflictMarker,
    snapshots: SnapshotManager,
    pending: PendingApply,
    state: Mutex<CoordinatorState>,
    tasks: BackgroundTasks,
}

impl SyncCoordinator {
    pub fn new(store: Arc<dyn RemoteStore>, db: DatabaseService, settings: SyncSettings) -> Result<Self> {
        Self::with_file_ops(store, db, settings, Arc::new(StdFileOps))
    }

    /// Build with custom file operations, e.g. to simulate a locked file.
    pub fn with_file_ops(
        store: Arc<dyn RemoteStore>,
        db: DatabaseService,
        settings: SyncSettings,
        ops: Arc<dyn FileOps>,
    ) -> Result<Self> {
        let db_path = db.db_path().map(Path::to_path_buf).ok_or_else(|| {
            Error::InvalidInput("Replication needs a file-backed database".to_string())
        })?;

        Ok(Self {
            marker: ConflictMarker::beside(&db_path),
            snapshots: SnapshotManager::new(&db_path, &settings, Arc::clone(&ops)),
            pending: PendingApply::new(&db_path, &settings, Arc::clone(&ops)),
            tasks: BackgroundTasks::new(settings.max_background_tasks),
            state: Mutex::new(CoordinatorState::default()),
            store,
            db,
            db_path,
            settings,
            ops,
        })
    }

    pub const fn database(&self) -> &DatabaseService {
        &self.db
    }

    pub const fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub const fn marker(&self) -> &ConflictMarker {
        &self.marker
    }

    pub const fn snapshots(&self) -> &SnapshotManager {
        &self.snapshots
    }

    async fn folder_id(&self, state: &mut MutexGuard<'_, CoordinatorState>) -> Result<String> {
        if let Some(folder_id) = &state.folder_id {
            return Ok(folder_id.clone());
        }
        let folder_id = self.store.ensure_folder(&self.settings.folder_name).await?;
        state.folder_id = Some(folder_id.clone());
        Ok(folder_id)
    }

    async fn remote_object(
        &self,
        state: &mut MutexGuard<'_, CoordinatorState>,
    ) -> Result<(String, Option<RemoteObject>)> {
        let folder_id = self.folder_id(state).await?;
        let object = self
            .store
            .find_object(&folder_id, &self.settings.object_name)
            .await?;
        Ok((folder_id, object))
    }

    /// `true` when the remote must not be overwritten right now.
    pub async fn conflict_check(&self) -> bool {
        let mut state = self.state.lock().await;
        let marker = self.marker.load();
        match self.remote_object(&mut state).await {
            Ok((_, object)) => is_conflicted(Some(object.map_or(0, |o| o.modified_at)), marker),
            Err(error) => {
                tracing::warn!("Remote state unknown, treating as conflicted: {error}");
                true
            }
        }
    }

    /// Upload `override_path`, or a fresh snapshot of the live database.
    ///
    /// The live file itself is never read directly; writes still in its WAL
    /// would be missing from the copy.
    pub async fn upload(&self, tag: &str, override_path: Option<&Path>) -> UploadOutcome {
        let (folder_id, observed_marker) = {
            let mut state = self.state.lock().await;
            if !state.admit(CallKind::Upload, self.settings.min_call_interval()) {
                tracing::debug!("Upload [{tag}] throttled");
                return UploadOutcome::Throttled;
            }

            let marker = self.marker.load();
            let (folder_id, remote) = match self.remote_object(&mut state).await {
                Ok((folder_id, object)) => (folder_id, Some(object.map_or(0, |o| o.modified_at))),
                Err(error) => {
                    tracing::warn!("Upload [{tag}] skipped, remote state unknown: {error}");
                    return UploadOutcome::Conflicted { remote: None, marker };
                }
            };
            if is_conflicted(remote, marker) {
                tracing::warn!(
                    "Upload [{tag}] skipped: remote copy ({}) is newer than last sync ({marker}); keeping changes local",
                    remote.unwrap_or_default()
                );
                return UploadOutcome::Conflicted { remote, marker };
            }
            (folder_id, marker)
        };

        let snapshot = match override_path {
            Some(_) => None,
            None => match self.snapshots.snapshot(&self.db).await {
                Ok(path) => Some(path),
                Err(error) => {
                    tracing::warn!("Upload [{tag}] failed, could not snapshot the database: {error}");
                    return UploadOutcome::Failed(error.to_string());
                }
            },
        };
        let Some(source) = override_path.or(snapshot.as_deref()) else {
            return UploadOutcome::Failed("No file to upload".to_string());
        };

        let transferred = self
            .store
            .upload(&folder_id, &self.settings.object_name, source)
            .await;
        if let Some(snapshot) = &snapshot {
            discard_file(snapshot);
        }
        let modified_at = match transferred {
            Ok(modified_at) => modified_at,
            Err(error) => {
                tracing::warn!("Upload [{tag}] failed: {error}");
                return UploadOutcome::Failed(error.to_string());
            }
        };

        let _state = self.state.lock().await;
        let current = self.marker.load();
        if current == observed_marker {
            self.marker.save(modified_at);
            tracing::info!("Upload [{tag}] stored remote copy at {modified_at}");
        } else {
            // A download landed mid-transfer; leave the marker behind so the
            // next check pulls this upload back down.
            tracing::warn!(
                "Upload [{tag}] finished at {modified_at} but the marker moved from {observed_marker} to {current}; not advancing"
            );
        }
        UploadOutcome::Uploaded { modified_at }
    }

    pub async fn upload_current(&self, tag: &str, override_path: Option<&Path>) -> bool {
        self.upload(tag, override_path).await.is_uploaded()
    }

    /// Fetch the remote copy, optionally swapping it in as the live database.
    pub async fn download_latest(&self, apply: bool) -> DownloadOutcome {
        let object = {
            let mut state = self.state.lock().await;
            if !state.admit(CallKind::Download, self.settings.min_call_interval()) {
                tracing::debug!("Download throttled");
                return DownloadOutcome::Throttled;
            }
            match self.remote_object(&mut state).await {
                Ok((_, Some(object))) => object,
                Ok((_, None)) => {
                    tracing::info!("No remote copy to download");
                    return DownloadOutcome::NoRemote;
                }
                Err(error) => {
                    tracing::warn!("Download skipped, remote state unknown: {error}");
                    return DownloadOutcome::Failed(error.to_string());
                }
            }
        };

        let path = match self.fetch_to_scratch(&object).await {
            Ok(path) => path,
            Err(error) => {
                tracing::warn!("Download of {} failed: {error}", object.id);
                return DownloadOutcome::Failed(error.to_string());
            }
        };

        if !apply {
            return DownloadOutcome::Downloaded {
                path,
                modified_at: object.modified_at,
            };
        }

        let _state = self.state.lock().await;
        match self.db.replace_with(&path, self.ops.as_ref()).await {
            Ok(()) => {
                self.marker.save(object.modified_at);
                tracing::info!("Applied remote copy from {}", object.modified_at);
                DownloadOutcome::Applied {
                    modified_at: object.modified_at,
                }
            }
            Err(Error::Io(error)) if is_lock_contention(&error) => {
                tracing::warn!("Live database is locked, parking the download: {error}");
                match self.pending.park(&path, object.modified_at) {
                    Ok(pending_path) => DownloadOutcome::Parked { pending_path },
                    Err(park_error) => {
                        discard_file(&path);
                        tracing::error!("Could not park download for later: {park_error}");
                        DownloadOutcome::Failed(park_error.to_string())
                    }
                }
            }
            Err(error) => {
                tracing::warn!("Replacing the live database failed: {error}");
                discard_file(&path);
                DownloadOutcome::Failed(error.to_string())
            }
        }
    }

    async fn fetch_to_scratch(&self, object: &RemoteObject) -> Result<PathBuf> {
        let bytes = self.store.download(object).await?;
        if !bytes.starts_with(SQLITE_HEADER) {
            return Err(Error::Storage(format!(
                "Remote object {} is not a SQLite database ({} bytes)",
                object.id,
                bytes.len()
            )));
        }

        let path = self
            .snapshots
            .scratch_path(&self.db_path, SnapshotKind::CloudPull)?;
        if let Err(error) = tokio::fs::write(&path, bytes).await {
            discard_file(&path);
            return Err(error.into());
        }

        let verified = Database::verify_file(&path);
        remove_sidecars(&path);
        if let Err(error) = verified {
            discard_file(&path);
            return Err(Error::Storage(format!(
                "Remote object {} is damaged: {error}",
                object.id
            )));
        }
        Ok(path)
    }

    /// Pull the remote copy when it is newer than the last sync.
    ///
    /// Returns `true` when the live database was replaced.
    pub async fn run_startup_sync(&self) -> bool {
        let purged = self.snapshots.purge_stale(STALE_SCRATCH_AGE);
        if purged > 0 {
            tracing::debug!("Purged {purged} stale scratch file(s)");
        }

        let remote = {
            let mut state = self.state.lock().await;
            match self.remote_object(&mut state).await {
                Ok((_, object)) => object.map_or(0, |o| o.modified_at),
                Err(error) => {
                    tracing::warn!("Startup sync skipped, remote unreachable: {error}");
                    return false;
                }
            }
        };

        let marker = self.marker.load();
        if remote <= marker {
            tracing::debug!("Startup sync: local copy is current (remote {remote}, marker {marker})");
            return false;
        }

        tracing::info!("Startup sync: remote {remote} is newer than marker {marker}, downloading");
        match self.download_latest(true).await {
            DownloadOutcome::Applied { .. } => true,
            other => {
                tracing::warn!("Startup sync did not apply the remote copy: {other:?}");
                false
            }
        }
    }

    /// Run `upload` in the background after a local mutation.
    pub fn schedule_upload(self: &Arc<Self>, tag: impl Into<String>) {
        let coordinator = Arc::clone(self);
        let tag = tag.into();
        self.tasks.spawn("snapshot upload", async move {
            match coordinator.upload(&tag, None).await {
                UploadOutcome::Failed(message) => Err(Error::Storage(message)),
                _ => Ok(()),
            }
        });
    }

    /// Fold remote-only changes to one dispute into the live database.
    ///
    /// Returns `Ok(false)` when nothing changed or the remote could not be
    /// fetched.
    pub async fn merge_aggregate(&self, id: &DisputeId) -> Result<bool> {
        let (snapshot, modified_at) = match self.download_latest(false).await {
            DownloadOutcome::Downloaded { path, modified_at } => (path, modified_at),
            other => {
                tracing::warn!("Merge of dispute {id} skipped: {other:?}");
                return Ok(false);
            }
        };

        let merged = self
            .db
            .with_connection(|conn| merge_dispute_from_snapshot(conn, &snapshot, id))
            .await;
        discard_file(&snapshot);
        remove_sidecars(&snapshot);
        let report = merged?;

        if report.changed() {
            let _state = self.state.lock().await;
            self.marker.save(modified_at);
            tracing::info!(
                "Merged dispute {id}: {} new message(s), status columns {:?}, marker now {modified_at}",
                report.inserted_messages,
                report.status_changed
            );
        } else {
            tracing::debug!("Merge of dispute {id} found nothing new");
        }
        Ok(report.changed())
    }

    /// Marker, remote timestamp and pending state without changing anything.
    pub async fn status(&self) -> SyncStatus {
        let mut state = self.state.lock().await;
        let marker = self.marker.load();
        let (remote_modified_at, remote_error) = match self.remote_object(&mut state).await {
            Ok((_, object)) => (Some(object.map_or(0, |o| o.modified_at)), None),
            Err(error) => (None, Some(error.to_string())),
        };
        SyncStatus {
            marker,
            remote_modified_at,
            conflicted: is_conflicted(remote_modified_at, marker),
            pending: self.pending.has_pending(),
            remote_error,
        }
    }

    /// Wait up to `timeout` for scheduled uploads to finish.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.tasks.shutdown(timeout).await
    }
}
