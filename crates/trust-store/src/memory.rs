use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StorageError;
use crate::kv::{full_key, KvStore};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(deadline) if deadline <= now)
    }
}

/// In-memory [`KvStore`] driver with lazy TTL expiry.
///
/// Backs the test suites and the `memory` storage type; the production
/// driver is [`RedisStore`](crate::RedisStore).
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        let entry = Entry {
            value: value.to_string(),
            expires_at: ttl.map(|d| Instant::now() + d),
        };
        self.entries
            .write()
            .await
            .insert(full_key(namespace, key), entry);
        Ok(())
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StorageError> {
        let full = full_key(namespace, key);
        let now = Instant::now();

        {
            let entries = self.entries.read().await;
            match entries.get(&full) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }

        // Expired: purge under the write lock.
        self.entries.write().await.remove(&full);
        Ok(None)
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<(), StorageError> {
        self.entries.write().await.remove(&full_key(namespace, key));
        Ok(())
    }

    async fn keys(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
        let prefix = format!("{namespace}/");
        let now = Instant::now();

        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| !entry.is_expired(now));

        Ok(entries
            .keys()
            .filter_map(|key| key.strip_prefix(&prefix))
            .map(str::to_string)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_roundtrip() {
        let store = MemoryStore::new();
        store.set("NS", "a", "1", None).await.unwrap();
        assert_eq!(store.get("NS", "a").await.unwrap(), Some("1".to_string()));
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let store = MemoryStore::new();
        assert_eq!(store.get("NS", "nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn overwrite_replaces_value() {
        let store = MemoryStore::new();
        store.set("NS", "a", "1", None).await.unwrap();
        store.set("NS", "a", "2", None).await.unwrap();
        assert_eq!(store.get("NS", "a").await.unwrap(), Some("2".to_string()));
    }

    #[tokio::test]
    async fn entries_expire() {
        let store = MemoryStore::new();
        store
            .set("NS", "a", "1", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(store.get("NS", "a").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("NS", "a").await.unwrap(), None);
        assert!(store.keys("NS").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn keys_are_scoped_to_namespace() {
        let store = MemoryStore::new();
        store.set("A", "x", "1", None).await.unwrap();
        store.set("A", "y", "2", None).await.unwrap();
        store.set("B", "z", "3", None).await.unwrap();

        let mut keys = store.keys("A").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["x", "y"]);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemoryStore::new();
        store.set("NS", "a", "1", None).await.unwrap();
        store.delete("NS", "a").await.unwrap();
        store.delete("NS", "a").await.unwrap();
        assert_eq!(store.get("NS", "a").await.unwrap(), None);
    }
}
