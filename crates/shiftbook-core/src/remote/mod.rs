//! Remote object store abstraction.
//!
//! One logical object, identified by a fixed name inside a fixed rendezvous
//! folder. Backends:
//! - `DriveStore` - Drive-style REST API over `reqwest`
//! - `R2Store` - S3-compatible bucket (Cloudflare R2), folder as key prefix
//! - `DirectoryStore` - a plain directory, e.g. a mounted network share

mod directory;
mod drive;
mod r2;

pub use directory::DirectoryStore;
pub use drive::DriveStore;
pub use r2::{R2Config, R2Store};

use std::path::Path;

use async_trait::async_trait;

use crate::Result;

/// A remote object as listed by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    /// Store-assigned identity
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Server-assigned modification time, Unix seconds
    pub modified_at: i64,
}

/// Raw operations a backend must provide.
///
/// The provided methods build the find-or-create/overwrite protocol on top,
/// including collapsing duplicate objects.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Short backend label for logs.
    fn label(&self) -> &'static str;

    /// Look up a folder by name.
    async fn find_folder(&self, name: &str) -> Result<Option<String>>;

    /// Create a folder and return its id.
    async fn create_folder(&self, name: &str) -> Result<String>;

    /// Every non-trashed object named `name` inside `folder_id`.
    async fn list_objects(&self, folder_id: &str, name: &str) -> Result<Vec<RemoteObject>>;

    /// Create a new object with `bytes` as content.
    async fn create_object(&self, folder_id: &str, name: &str, bytes: Vec<u8>)
        -> Result<RemoteObject>;

    /// Overwrite the content of an existing object.
    async fn update_object(&self, object: &RemoteObject, bytes: Vec<u8>) -> Result<RemoteObject>;

    /// Fetch an object's content, bypassing caches.
    async fn download(&self, object: &RemoteObject) -> Result<Vec<u8>>;

    /// Move an object to the trash.
    async fn trash(&self, object: &RemoteObject) -> Result<()>;

    /// Folder id for `name`, creating the folder when absent.
    async fn ensure_folder(&self, name: &str) -> Result<String> {
        if let Some(folder_id) = self.find_folder(name).await? {
            return Ok(folder_id);
        }
        let folder_id = self.create_folder(name).await?;
        tracing::info!("Created remote sync folder '{name}' on {}", self.label());
        Ok(folder_id)
    }

    /// The newest object named `name`; older duplicates are trashed first.
    async fn find_object(&self, folder_id: &str, name: &str) -> Result<Option<RemoteObject>> {
        let objects = self.list_objects(folder_id, name).await?;
        let (newest, duplicates) = select_newest(objects);
        for duplicate in duplicates {
            match self.trash(&duplicate).await {
                Ok(()) => tracing::info!(
                    "Trashed duplicate remote object {} ({}), modified at {}",
                    duplicate.id,
                    duplicate.name,
                    duplicate.modified_at
                ),
                Err(error) => tracing::warn!(
                    "Failed to trash duplicate remote object {}: {error}",
                    duplicate.id
                ),
            }
        }
        Ok(newest)
    }

    /// Upload `local_path` as `name`, overwriting the existing object when there is one.
    ///
    /// Returns the server-reported modification time of the stored object.
    async fn upload(&self, folder_id: &str, name: &str, local_path: &Path) -> Result<i64> {
        let bytes = tokio::fs::read(local_path).await?;
        let stored = match self.find_object(folder_id, name).await? {
            Some(existing) => self.update_object(&existing, bytes).await?,
            None => self.create_object(folder_id, name, bytes).await?,
        };
        tracing::debug!(
            "Uploaded {} to {} as {} (modified {})",
            local_path.display(),
            self.label(),
            stored.id,
            stored.modified_at
        );
        Ok(stored.modified_at)
    }
}

/// Split listed objects into the one to keep and the duplicates to trash.
///
/// Newest modification time wins; ties go to the greatest id so the choice is
/// the same on every replica.
pub fn select_newest(mut objects: Vec<RemoteObject>) -> (Option<RemoteObject>, Vec<RemoteObject>) {
    objects.sort_by(|a, b| {
        b.modified_at
            .cmp(&a.modified_at)
            .then_with(|| b.id.cmp(&a.id))
    });
    if objects.is_empty() {
        return (None, objects);
    }
    let newest = objects.remove(0);
    (Some(newest), objects)
}
