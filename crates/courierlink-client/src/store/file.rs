use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::Mutex;

use courierlink_core::error::{LinkError, Result};

use super::{DurableStore, ModifyFn};

/// One file per key under a root directory.
///
/// File names are the hex-encoded key. Writes go to a temporary file and are
/// renamed into place; same-key operations are serialized by a per-key lock.
pub struct FileStore {
    root: PathBuf,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| LinkError::Storage(format!("create {}: {e}", root.display())))?;
        Ok(Self {
            root,
            locks: DashMap::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.bin", hex::encode(key)))
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks.entry(key.to_string()).or_default().value().clone()
    }

    async fn write_unlocked(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| LinkError::Storage(format!("write {key}: {e}")))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| LinkError::Storage(format!("rename {key}: {e}")))
    }

    async fn read_unlocked(&self, key: &str) -> Result<Option<Bytes>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(v) => Ok(Some(Bytes::from(v))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LinkError::Storage(format!("read {key}: {e}"))),
        }
    }

    async fn remove_unlocked(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LinkError::Storage(format!("remove {key}: {e}"))),
        }
    }
}

#[async_trait]
impl DurableStore for FileStore {
    async fn save(&self, key: &str, bytes: Bytes) -> Result<()> {
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;
        self.write_unlocked(key, &bytes).await
    }

    async fn load(&self, key: &str) -> Result<Option<Bytes>> {
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;
        self.read_unlocked(key).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;
        self.remove_unlocked(key).await
    }

    async fn modify(&self, key: &str, f: ModifyFn) -> Result<()> {
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;
        let current = self.read_unlocked(key).await?;
        match f(current)? {
            Some(next) => self.write_unlocked(key, &next).await,
            None => self.remove_unlocked(key).await,
        }
    }
}
