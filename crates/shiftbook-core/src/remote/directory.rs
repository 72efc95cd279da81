//! A directory used as the remote, e.g. a mounted network share.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;

use super::{RemoteObject, RemoteStore};
use crate::util::unix_timestamp_millis_now;
use crate::{Error, Result};

const TRASH_DIR_NAME: &str = ".trash";

#[derive(Clone, Debug)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn folder_path(&self, name: &str) -> Result<PathBuf> {
        let name = name.trim().trim_matches('/');
        if name.is_empty() || name.contains("..") {
            return Err(Error::InvalidInput(format!("Invalid folder name '{name}'")));
        }
        Ok(self.root.join(name))
    }

    fn object_path(&self, folder_id: &str, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(Error::InvalidInput(format!("Invalid object name '{name}'")));
        }
        Ok(self.folder_path(folder_id)?.join(name))
    }

    async fn describe(path: &Path, name: &str) -> Result<RemoteObject> {
        let metadata = tokio::fs::metadata(path).await?;
        let modified_at = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map_or(0, |duration| i64::try_from(duration.as_secs()).unwrap_or(i64::MAX));
        Ok(RemoteObject {
            id: path.to_string_lossy().into_owned(),
            name: name.to_string(),
            modified_at,
        })
    }

    async fn write_atomically(path: &Path, bytes: Vec<u8>) -> Result<()> {
        let mut staging = path.as_os_str().to_os_string();
        staging.push(".partial");
        let staging = PathBuf::from(staging);
        tokio::fs::write(&staging, bytes).await?;
        if let Err(error) = tokio::fs::rename(&staging, path).await {
            tokio::fs::remove_file(&staging).await.ok();
            return Err(error.into());
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for DirectoryStore {
    fn label(&self) -> &'static str {
        "directory"
    }

    async fn find_folder(&self, name: &str) -> Result<Option<String>> {
        let path = self.folder_path(name)?;
        if tokio::fs::metadata(&path).await.is_ok_and(|meta| meta.is_dir()) {
            Ok(Some(name.trim().trim_matches('/').to_string()))
        } else {
            Ok(None)
        }
    }

    async fn create_folder(&self, name: &str) -> Result<String> {
        tokio::fs::create_dir_all(self.folder_path(name)?).await?;
        Ok(name.trim().trim_matches('/').to_string())
    }

    async fn list_objects(&self, folder_id: &str, name: &str) -> Result<Vec<RemoteObject>> {
        let path = self.object_path(folder_id, name)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(vec![Self::describe(&path, name).await?]),
            Ok(_) => Ok(Vec::new()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(error) => Err(error.into()),
        }
    }

    async fn create_object(
        &self,
        folder_id: &str,
        name: &str,
        bytes: Vec<u8>,
    ) -> Result<RemoteObject> {
        let path = self.object_path(folder_id, name)?;
        Self::write_atomically(&path, bytes).await?;
        Self::describe(&path, name).await
    }

    async fn update_object(&self, object: &RemoteObject, bytes: Vec<u8>) -> Result<RemoteObject> {
        let path = PathBuf::from(&object.id);
        Self::write_atomically(&path, bytes).await?;
        Self::describe(&path, &object.name).await
    }

    async fn download(&self, object: &RemoteObject) -> Result<Vec<u8>> {
        match tokio::fs::read(&object.id).await {
            Ok(bytes) => Ok(bytes),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("Remote object {} is gone", object.id)))
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn trash(&self, object: &RemoteObject) -> Result<()> {
        let trash_dir = self.root.join(TRASH_DIR_NAME);
        tokio::fs::create_dir_all(&trash_dir).await?;
        let target = trash_dir.join(format!("{}.{}", object.name, unix_timestamp_millis_now()));
        tokio::fs::rename(&object.id, target).await?;
        Ok(())
    }
}
