//! Shared fixtures: an in-memory remote store and database builders.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection};
use tokio::sync::Notify;
use shiftbook_core::config::SyncSettings;
use shiftbook_core::db::Database;
use shiftbook_core::remote::{RemoteObject, RemoteStore};
use shiftbook_core::sync::{FileOps, StdFileOps};
use shiftbook_core::{DatabaseService, DisputeId, Error, Result, SyncCoordinator};

pub const FOLDER: &str = "ShiftbookSync";
pub const OBJECT: &str = "shiftbook.db";

#[derive(Default)]
struct FakeState {
    folders: HashMap<String, String>,
    objects: HashMap<String, (RemoteObject, Vec<u8>)>,
    next_timestamp: i64,
    next_id: u64,
    offline: bool,
}

/// Holds one remote write until released.
#[derive(Clone, Default)]
pub struct WriteGate {
    /// Notified once the held write has started
    pub reached: Arc<Notify>,
    /// Notify to let the held write finish
    pub release: Arc<Notify>,
}

/// Remote store held in memory. Every write stamps the object with the next
/// timestamp, which tests can set.
#[derive(Default)]
pub struct FakeStore {
    state: Mutex<FakeState>,
    calls: AtomicUsize,
    writes: AtomicUsize,
    trashed: AtomicUsize,
    gate: Mutex<Option<WriteGate>>,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        let store = Self::default();
        store.state.lock().unwrap().next_timestamp = 1_000;
        Arc::new(store)
    }

    pub fn set_next_timestamp(&self, timestamp: i64) {
        self.state.lock().unwrap().next_timestamp = timestamp;
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.lock().unwrap().offline = offline;
    }

    /// Place an object in the rendezvous folder as if another replica uploaded it.
    pub fn seed(&self, bytes: Vec<u8>, modified_at: i64) -> RemoteObject {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let folder_id = state
            .folders
            .entry(FOLDER.to_string())
            .or_insert_with(|| "folder-1".to_string())
            .clone();
        let object = RemoteObject {
            id: format!("{folder_id}/obj-{}", state.next_id),
            name: OBJECT.to_string(),
            modified_at,
        };
        state
            .objects
            .insert(object.id.clone(), (object.clone(), bytes));
        object
    }

    /// Replace the newest object's content in place, as another replica's upload would.
    pub fn overwrite(&self, bytes: Vec<u8>, modified_at: i64) {
        let mut state = self.state.lock().unwrap();
        let (object, content) = state
            .objects
            .values_mut()
            .max_by_key(|(object, _)| object.modified_at)
            .expect("no remote object to overwrite");
        object.modified_at = modified_at;
        *content = bytes;
    }

    /// Content of the newest object.
    pub fn newest_bytes(&self) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .objects
            .values()
            .max_by_key(|(object, _)| object.modified_at)
            .map(|(_, bytes)| bytes.clone())
    }

    /// Hold the next create or update until `release` is notified.
    pub fn hold_next_write(&self) -> WriteGate {
        let gate = WriteGate::default();
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    async fn pass_gate(&self) {
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.reached.notify_one();
            gate.release.notified().await;
        }
    }

    pub fn remote_modified_at(&self) -> Option<i64> {
        self.state
            .lock()
            .unwrap()
            .objects
            .values()
            .map(|(object, _)| object.modified_at)
            .max()
    }

    pub fn object_count(&self) -> usize {
        self.state.lock().unwrap().objects.len()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn trashed(&self) -> usize {
        self.trashed.load(Ordering::SeqCst)
    }

    fn enter(&self) -> Result<std::sync::MutexGuard<'_, FakeState>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        if state.offline {
            return Err(Error::Storage("fake store is offline".to_string()));
        }
        Ok(state)
    }
}

#[async_trait]
impl RemoteStore for FakeStore {
    fn label(&self) -> &'static str {
        "fake"
    }

    async fn find_folder(&self, name: &str) -> Result<Option<String>> {
        Ok(self.enter()?.folders.get(name).cloned())
    }

    async fn create_folder(&self, name: &str) -> Result<String> {
        let mut state = self.enter()?;
        let id = format!("folder-{}", state.folders.len() + 1);
        state.folders.insert(name.to_string(), id.clone());
        Ok(id)
    }

    async fn list_objects(&self, folder_id: &str, name: &str) -> Result<Vec<RemoteObject>> {
        let state = self.enter()?;
        Ok(state
            .objects
            .values()
            .filter(|(object, _)| object.name == name && object.id.starts_with(folder_id))
            .map(|(object, _)| object.clone())
            .collect())
    }

    async fn create_object(
        &self,
        folder_id: &str,
        name: &str,
        bytes: Vec<u8>,
    ) -> Result<RemoteObject> {
        self.pass_gate().await;
        let mut state = self.enter()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        state.next_id += 1;
        let object = RemoteObject {
            id: format!("{folder_id}/obj-{}", state.next_id),
            name: name.to_string(),
            modified_at: state.next_timestamp,
        };
        state.next_timestamp += 1;
        state
            .objects
            .insert(object.id.clone(), (object.clone(), bytes));
        Ok(object)
    }

    async fn update_object(&self, object: &RemoteObject, bytes: Vec<u8>) -> Result<RemoteObject> {
        self.pass_gate().await;
        let mut state = self.enter()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        let updated = RemoteObject {
            modified_at: state.next_timestamp,
            ..object.clone()
        };
        state.next_timestamp += 1;
        state
            .objects
            .insert(updated.id.clone(), (updated.clone(), bytes));
        Ok(updated)
    }

    async fn download(&self, object: &RemoteObject) -> Result<Vec<u8>> {
        let state = self.enter()?;
        state
            .objects
            .get(&object.id)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| Error::NotFound(object.id.clone()))
    }

    async fn trash(&self, object: &RemoteObject) -> Result<()> {
        let mut state = self.enter()?;
        self.trashed.fetch_add(1, Ordering::SeqCst);
        state.objects.remove(&object.id);
        Ok(())
    }
}

pub fn fast_settings() -> SyncSettings {
    SyncSettings {
        snapshot_retry_delay_ms: 1,
        pending_retry_delay_ms: 1,
        ..SyncSettings::default()
    }
    .without_rate_limit()
}

pub struct Replica {
    pub dir: tempfile::TempDir,
    pub db_path: PathBuf,
    pub db: DatabaseService,
    pub coordinator: Arc<SyncCoordinator>,
}

pub async fn replica(store: &Arc<FakeStore>, settings: SyncSettings) -> Replica {
    replica_with_ops(store, settings, Arc::new(StdFileOps)).await
}

pub async fn replica_with_ops(
    store: &Arc<FakeStore>,
    settings: SyncSettings,
    ops: Arc<dyn FileOps>,
) -> Replica {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("shiftbook.db");
    let db = DatabaseService::open_path_with(&db_path, &settings, Arc::clone(&ops))
        .await
        .unwrap();
    let remote: Arc<dyn RemoteStore> = store.clone();
    let coordinator =
        SyncCoordinator::with_file_ops(remote, db.clone(), settings, ops).unwrap();
    Replica {
        dir,
        db_path,
        db,
        coordinator: Arc::new(coordinator),
    }
}

/// Open `bytes` as a database in a throwaway file and count rows of `table`.
pub fn count_rows(bytes: &[u8], table: &str) -> rusqlite::Result<i64> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("inspect.db");
    std::fs::write(&path, bytes).unwrap();
    let conn = Connection::open(&path)?;
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
}

/// First 100 bytes of a real database followed by junk.
pub fn torn_database_bytes() -> Vec<u8> {
    let mut bytes = database_bytes(|_| {})[..100].to_vec();
    bytes.extend(std::iter::repeat(0xAB).take(5_000));
    bytes
}

/// Bytes of a fully checkpointed database built by `build`.
pub fn database_bytes(build: impl FnOnce(&Connection)) -> Vec<u8> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("built.db");
    let db = Database::open(&path).unwrap();
    build(db.connection());
    db.checkpoint_truncate().unwrap();
    db.close().unwrap();
    std::fs::read(path).unwrap()
}

pub fn insert_dispute(conn: &Connection, id: &DisputeId, status: &str) {
    conn.execute(
        "INSERT INTO disputes (id, shift_ref, opened_by, status, created_at) VALUES (?, 'shift-42', 'ana', ?, 100)",
        params![id.as_str(), status],
    )
    .unwrap();
}

pub fn insert_message(conn: &Connection, id: &DisputeId, message_id: i64, body: &str) {
    conn.execute(
        "INSERT INTO dispute_messages (id, dispute_id, author, role, body, created_at) VALUES (?, ?, 'ana', 'employee', ?, ?)",
        params![message_id, id.as_str(), body, 100 + message_id],
    )
    .unwrap();
}

pub fn scratch_files(db_path: &Path) -> Vec<PathBuf> {
    let scratch = db_path.parent().unwrap().join("_sync_tmp");
    std::fs::read_dir(scratch)
        .map(|entries| entries.flatten().map(|entry| entry.path()).collect())
        .unwrap_or_default()
}
