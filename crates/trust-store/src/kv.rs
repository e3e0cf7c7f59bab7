use std::time::Duration;

use async_trait::async_trait;

use crate::error::StorageError;

/// Namespaced key-value driver with per-entry TTL.
///
/// Keys are stored as `<namespace>/<key>`. A `ttl` of `None` means the entry
/// is persistent; otherwise the driver expires it after the given duration.
/// Implementations must serialize concurrent operations; callers share a
/// single store across every component and task.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Write `value`, replacing any existing entry (and its TTL).
    async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError>;

    /// Read a value; `None` for a missing or expired entry.
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StorageError>;

    /// Remove an entry. Removing a missing entry is not an error.
    async fn delete(&self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// List the live keys under `namespace`, with the namespace prefix
    /// stripped. Ordering is unspecified.
    async fn keys(&self, namespace: &str) -> Result<Vec<String>, StorageError>;
}

/// Join a namespace and key into the stored form.
pub(crate) fn full_key(namespace: &str, key: &str) -> String {
    format!("{namespace}/{key}")
}
