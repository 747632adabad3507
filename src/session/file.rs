use std::fs::OpenOptions;
use std::path::PathBuf;
use std::str;
use std::sync::Arc;
use async_trait::async_trait;
use fd_lock::{RwLock, RwLockWriteGuard};
use log::debug;
use serde_json::{Map, Value};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::config::io::project_dirs;
use crate::error::StorageError;
use crate::session::storage::Storage;

pub fn default_storage_path() -> Result<PathBuf, StorageError> {
    project_dirs()
        .map(|dirs| dirs.data_dir().join("session.json"))
        .ok_or(StorageError::NoStoragePath)
}

pub struct StorageLocker {
    rw_lock: RwLock<std::fs::File>,
}

impl StorageLocker {
    pub fn lock(&mut self) -> Result<RwLockWriteGuard<std::fs::File>, StorageError> {
        self.rw_lock.try_write().map_err(|source| StorageError::CanNotLock { source })
    }
}

/// [`Storage`] kept as one JSON object in a file. Every `set` rewrites the whole file.
#[derive(Clone)]
pub struct FileStorage {
    path: PathBuf,
    // the std file stays open for the lifetime of the storage; reads and writes use clones of it
    file: Arc<Mutex<std::fs::File>>,
}

impl FileStorage {
    pub fn open(path: PathBuf) -> Result<Self, StorageError> {
        if let Some(directory) = path.parent() {
            std::fs::create_dir_all(directory)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .truncate(false)
            .append(false)
            .create(true)
            .open(&path)?;

        Ok(FileStorage { path, file: Arc::new(Mutex::new(file)) })
    }

    /// Returns a locker for an exclusive lock on the storage file, so that only one process
    /// manages the devices at a time.
    pub async fn locker(&self) -> Result<StorageLocker, StorageError> {
        let file = self.file.lock().await;
        Ok(StorageLocker { rw_lock: RwLock::new(file.try_clone()?) })
    }

    async fn read_map(file: &mut File) -> Result<Map<String, Value>, StorageError> {
        let mut content = vec![];
        file.rewind().await?;
        file.read_to_end(&mut content).await?;

        if content.is_empty() {
            return Ok(Map::new());
        }

        let content = str::from_utf8(&content)?;
        Ok(serde_json::from_str(content)?)
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let guard = self.file.lock().await;
        let mut file = File::from_std(guard.try_clone()?);
        let mut map = Self::read_map(&mut file).await?;
        Ok(map.remove(key))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let guard = self.file.lock().await;
        let mut file = File::from_std(guard.try_clone()?);
        debug!("Saving {} to {}", key, self.path.to_string_lossy());

        let mut map = Self::read_map(&mut file).await?;
        map.insert(key.to_string(), value);

        let content = serde_json::to_string_pretty(&map)?;
        file.rewind().await?;
        file.set_len(0).await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
