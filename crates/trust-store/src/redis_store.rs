use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::info;

use crate::error::StorageError;
use crate::kv::{full_key, KvStore};

/// Redis-backed [`KvStore`] driver.
///
/// Built from the `credentials` map of the storage configuration
/// (`host`, `db`, `password`). TTLs map onto Redis `PSETEX` semantics; the
/// shared [`ConnectionManager`] serializes and transparently reconnects.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect using the configured credentials map. Missing fields fall
    /// back to a local unauthenticated instance.
    pub async fn connect(credentials: &HashMap<String, String>) -> Result<Self, StorageError> {
        let host = credentials
            .get("host")
            .map(String::as_str)
            .unwrap_or("localhost:6379");
        let db = credentials.get("db").map(String::as_str).unwrap_or("0");
        let password = credentials
            .get("password")
            .map(String::as_str)
            .unwrap_or("");

        let url = if password.is_empty() {
            format!("redis://{host}/{db}")
        } else {
            format!("redis://:{password}@{host}/{db}")
        };

        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;

        info!(host, db, "connected to redis storage");
        Ok(Self { conn })
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        let mut conn = self.conn.clone();
        let full = full_key(namespace, key);

        match ttl {
            Some(ttl) => {
                let millis = ttl.as_millis().max(1) as u64;
                conn.pset_ex::<_, _, ()>(full, value, millis).await?;
            }
            None => {
                conn.set::<_, _, ()>(full, value).await?;
            }
        }
        Ok(())
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StorageError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(full_key(namespace, key)).await?;
        Ok(value)
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<(), StorageError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(full_key(namespace, key)).await?;
        Ok(())
    }

    async fn keys(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
        let mut conn = self.conn.clone();
        let prefix = format!("{namespace}/");
        let pattern = format!("{prefix}*");

        let mut keys = Vec::new();
        {
            let mut iter: redis::AsyncIter<'_, String> = conn.scan_match(pattern).await?;
            while let Some(key) = iter.next_item().await {
                if let Some(stripped) = key.strip_prefix(&prefix) {
                    keys.push(stripped.to_string());
                }
            }
        }
        Ok(keys)
    }
}
