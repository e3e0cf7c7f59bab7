use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::kv::KvStore;

const BANNED_IPS: &str = "BANNED_IPS";

/// A single intrusion-feedback record: who was denied, and when.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanEvent {
    pub ip: String,
    pub timestamp: DateTime<Utc>,
}

/// The fail2ban side-store.
///
/// Admission failures append here; the reaper daemon reads the list back
/// out. The list is advisory: the proxy itself never blocks on it, a
/// downstream firewall integration is expected to consume it. Entries are
/// keyed by IP, so repeated denials within the TTL refresh the record.
#[derive(Clone)]
pub struct BanStore {
    store: Arc<dyn KvStore>,
    ttl: Duration,
}

impl BanStore {
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Record a denial for `ip`, stamping the current time.
    pub async fn record(&self, ip: &str) -> Result<(), StorageError> {
        let event = BanEvent {
            ip: ip.to_string(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&event).map_err(|source| StorageError::Corrupt {
            key: ip.to_string(),
            source,
        })?;
        self.store.set(BANNED_IPS, ip, &json, Some(self.ttl)).await
    }

    /// Every ban still inside its TTL window.
    pub async fn active(&self) -> Result<Vec<BanEvent>, StorageError> {
        let mut events = Vec::new();
        for ip in self.store.keys(BANNED_IPS).await? {
            if let Some(json) = self.store.get(BANNED_IPS, &ip).await? {
                let event = serde_json::from_str(&json).map_err(|source| StorageError::Corrupt {
                    key: ip.clone(),
                    source,
                })?;
                events.push(event);
            }
        }
        Ok(events)
    }
}
