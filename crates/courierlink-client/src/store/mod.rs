//! Durable key/value store capability.
//!
//! Keys are plain strings; values are opaque bytes. Implementations must
//! serialize concurrent writes to the same key so that `modify` is an atomic
//! read-modify-write. Different keys may be written concurrently.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use courierlink_core::error::{LinkError, Result};

pub use file::FileStore;
pub use memory::MemoryStore;

/// Read-modify-write step. Returning `None` removes the key.
pub type ModifyFn = Box<dyn FnOnce(Option<Bytes>) -> Result<Option<Bytes>> + Send>;

#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn save(&self, key: &str, bytes: Bytes) -> Result<()>;
    async fn load(&self, key: &str) -> Result<Option<Bytes>>;
    /// Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;
    async fn modify(&self, key: &str, f: ModifyFn) -> Result<()>;
}

pub async fn save_json<T: Serialize + ?Sized>(
    store: &dyn DurableStore,
    key: &str,
    value: &T,
) -> Result<()> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| LinkError::Storage(format!("encode {key}: {e}")))?;
    store.save(key, Bytes::from(bytes)).await
}

pub async fn load_json<T: DeserializeOwned>(store: &dyn DurableStore, key: &str) -> Result<Option<T>> {
    match store.load(key).await? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| LinkError::Storage(format!("decode {key}: {e}"))),
        None => Ok(None),
    }
}

/// Typed `modify`: the closure sees the decoded value and returns the new one.
pub async fn modify_json<T, F>(store: &dyn DurableStore, key: &str, f: F) -> Result<()>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce(Option<T>) -> Option<T> + Send + 'static,
{
    let owned_key = key.to_string();
    store
        .modify(
            key,
            Box::new(move |current| {
                let decoded = match current {
                    Some(bytes) => Some(
                        serde_json::from_slice::<T>(&bytes)
                            .map_err(|e| LinkError::Storage(format!("decode {owned_key}: {e}")))?,
                    ),
                    None => None,
                };
                match f(decoded) {
                    Some(next) => serde_json::to_vec(&next)
                        .map(|v| Some(Bytes::from(v)))
                        .map_err(|e| LinkError::Storage(format!("encode {owned_key}: {e}"))),
                    None => Ok(None),
                }
            }),
        )
        .await
}
