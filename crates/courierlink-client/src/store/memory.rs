use async_trait::async_trait;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use courierlink_core::error::Result;

use super::{DurableStore, ModifyFn};

/// In-process store. `modify` runs under the map's entry lock.
#[derive(Default)]
pub struct MemoryStore {
    map: DashMap<String, Bytes>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        self.map.iter().map(|e| e.key().clone()).collect()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn save(&self, key: &str, bytes: Bytes) -> Result<()> {
        self.map.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.map.get(key).map(|v| v.value().clone()))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.map.remove(key);
        Ok(())
    }

    async fn modify(&self, key: &str, f: ModifyFn) -> Result<()> {
        match self.map.entry(key.to_string()) {
            Entry::Occupied(mut o) => match f(Some(o.get().clone()))? {
                Some(next) => {
                    o.insert(next);
                }
                None => {
                    o.remove();
                }
            },
            Entry::Vacant(v) => {
                if let Some(next) = f(None)? {
                    v.insert(next);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::{load_json, modify_json};

    #[tokio::test]
    async fn modify_appends_and_removes() {
        let store = MemoryStore::new();
        for n in 0..3u32 {
            modify_json::<Vec<u32>, _>(&store, "k", move |cur| {
                let mut v = cur.unwrap_or_default();
                v.push(n);
                Some(v)
            })
            .await
            .unwrap();
        }
        assert_eq!(load_json::<Vec<u32>>(&store, "k").await.unwrap(), Some(vec![0, 1, 2]));

        modify_json::<Vec<u32>, _>(&store, "k", |_| None).await.unwrap();
        assert!(store.load("k").await.unwrap().is_none());
    }
}
