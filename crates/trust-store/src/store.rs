use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use envelope_codec::{CodecError, KeyDirectory};

use crate::error::StorageError;
use crate::identity::{Identificator, IdentificatorKind};
use crate::kv::KvStore;

const PUBLIC_KEYS: &str = "PUBLIC_KEYS";
const PRIVATE_KEYS: &str = "PRIVATE_KEYS";
const TEMP_PUBLIC_KEYS: &str = "TEMP_PUBLIC_KEYS";
const IDENTIFICATORS: &str = "IDENTIFICATORS";
const RELATIONS: &str = "RELATIONS";

/// Persistent container for identificators, pinned and temporary public
/// keys, the proxy's own key pair, and trust relations.
///
/// Every operation is idempotent. Entries here carry no TTL; trust material
/// lives until explicitly replaced (wallet records are refreshed on every
/// sync tick, which makes the overwrite semantics of
/// [`add_identificator`](Self::add_identificator) load-bearing).
#[derive(Clone)]
pub struct TrustStore {
    store: Arc<dyn KvStore>,
}

impl TrustStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    // -- key pair slots -----------------------------------------------------

    /// Persist a PEM key pair under `slot` (used for the proxy's own keys).
    pub async fn store_key_pair(
        &self,
        slot: &str,
        public_pem: &str,
        private_pem: &str,
    ) -> Result<(), StorageError> {
        self.store.set(PUBLIC_KEYS, slot, public_pem, None).await?;
        self.store
            .set(PRIVATE_KEYS, slot, private_pem, None)
            .await
    }

    pub async fn public_key(&self, id: &str) -> Result<Option<String>, StorageError> {
        self.store.get(PUBLIC_KEYS, id).await
    }

    pub async fn private_key(&self, id: &str) -> Result<Option<String>, StorageError> {
        self.store.get(PRIVATE_KEYS, id).await
    }

    /// Pin a remote peer's public key, making it authoritative for that id.
    pub async fn store_public_key(&self, id: &str, pem: &str) -> Result<(), StorageError> {
        self.store.set(PUBLIC_KEYS, id, pem, None).await
    }

    // -- temporary keys (in-flight enrollment) ------------------------------

    pub async fn store_temp_public_key(&self, id: &str, pem: &str) -> Result<(), StorageError> {
        self.store.set(TEMP_PUBLIC_KEYS, id, pem, None).await
    }

    pub async fn temp_public_key(&self, id: &str) -> Result<Option<String>, StorageError> {
        self.store.get(TEMP_PUBLIC_KEYS, id).await
    }

    pub async fn delete_temp_public_key(&self, id: &str) -> Result<(), StorageError> {
        self.store.delete(TEMP_PUBLIC_KEYS, id).await
    }

    // -- identificators -----------------------------------------------------

    /// Insert or update a principal. An existing id has its kind and url
    /// overwritten; this is how a wallet's url gets corrected later.
    pub async fn add_identificator(&self, idf: &Identificator) -> Result<(), StorageError> {
        let json = serde_json::to_string(idf).map_err(|source| StorageError::Corrupt {
            key: idf.id.clone(),
            source,
        })?;
        self.store.set(IDENTIFICATORS, &idf.id, &json, None).await
    }

    pub async fn identificator(&self, id: &str) -> Result<Option<Identificator>, StorageError> {
        match self.store.get(IDENTIFICATORS, id).await? {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|source| StorageError::Corrupt {
                    key: id.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    /// Every known principal, keyed by id.
    pub async fn identificators(&self) -> Result<HashMap<String, Identificator>, StorageError> {
        let mut result = HashMap::new();
        for id in self.store.keys(IDENTIFICATORS).await? {
            if let Some(idf) = self.identificator(&id).await? {
                result.insert(id, idf);
            }
        }
        Ok(result)
    }

    // -- relations ----------------------------------------------------------

    /// Record the directed edge `from -> to` ("from knows/trusts to").
    pub async fn add_relation(&self, from_id: &str, to_id: &str) -> Result<(), StorageError> {
        let key = format!("{from_id}/{to_id}");
        self.store.set(RELATIONS, &key, to_id, None).await
    }

    /// Principals of `kind` related to `from_id`, keyed by id. Ids whose
    /// Identificator record is missing are silently skipped.
    pub async fn related(
        &self,
        from_id: &str,
        kind: IdentificatorKind,
    ) -> Result<HashMap<String, Identificator>, StorageError> {
        let prefix = format!("{from_id}/");
        let mut result = HashMap::new();

        for relation in self.store.keys(RELATIONS).await? {
            let Some(to_id) = relation.strip_prefix(&prefix) else {
                continue;
            };
            if let Some(idf) = self.identificator(to_id).await? {
                if idf.kind == kind {
                    result.insert(to_id.to_string(), idf);
                }
            }
        }
        Ok(result)
    }
}

#[async_trait]
impl KeyDirectory for TrustStore {
    /// Pinned key first; the temporary slot covers senders whose enrollment
    /// has not been confirmed yet.
    async fn public_key_for(&self, id: &str) -> Result<Option<String>, CodecError> {
        if let Some(pem) = self
            .public_key(id)
            .await
            .map_err(|e| CodecError::Directory(e.to_string()))?
        {
            return Ok(Some(pem));
        }
        self.temp_public_key(id)
            .await
            .map_err(|e| CodecError::Directory(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn trust() -> TrustStore {
        TrustStore::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn key_pair_roundtrip() {
        let store = trust();
        store.store_key_pair("slot", "PUB", "PRIV").await.unwrap();
        assert_eq!(store.public_key("slot").await.unwrap().unwrap(), "PUB");
        assert_eq!(store.private_key("slot").await.unwrap().unwrap(), "PRIV");
    }

    #[tokio::test]
    async fn temp_key_lifecycle() {
        let store = trust();
        store.store_temp_public_key("ip-1", "TMP").await.unwrap();
        assert_eq!(
            store.temp_public_key("ip-1").await.unwrap().as_deref(),
            Some("TMP")
        );

        store.delete_temp_public_key("ip-1").await.unwrap();
        assert_eq!(store.temp_public_key("ip-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn add_identificator_overwrites_existing() {
        let store = trust();
        store
            .add_identificator(&Identificator::new("w1", IdentificatorKind::Wallet))
            .await
            .unwrap();
        store
            .add_identificator(&Identificator::with_url(
                "w1",
                IdentificatorKind::Wallet,
                "https://wallet.example",
            ))
            .await
            .unwrap();

        let idf = store.identificator("w1").await.unwrap().unwrap();
        assert_eq!(idf.url, "https://wallet.example");
        assert_eq!(store.identificators().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn related_filters_by_kind() {
        let store = trust();
        let proxy = Identificator::new("p1", IdentificatorKind::Proxy);
        let provider =
            Identificator::with_url("ip-1", IdentificatorKind::IdentityProvider, "https://ip");
        let wallet = Identificator::new("w1", IdentificatorKind::Wallet);

        for idf in [&proxy, &provider, &wallet] {
            store.add_identificator(idf).await.unwrap();
        }
        store.add_relation("p1", "ip-1").await.unwrap();
        store.add_relation("p1", "w1").await.unwrap();

        let providers = store
            .related("p1", IdentificatorKind::IdentityProvider)
            .await
            .unwrap();
        assert_eq!(providers.len(), 1);
        assert!(providers.contains_key("ip-1"));

        let wallets = store.related("p1", IdentificatorKind::Wallet).await.unwrap();
        assert_eq!(wallets.len(), 1);
        assert!(wallets.contains_key("w1"));
    }

    #[tokio::test]
    async fn related_skips_dangling_relations() {
        let store = trust();
        store.add_relation("p1", "ghost").await.unwrap();
        let related = store
            .related("p1", IdentificatorKind::Wallet)
            .await
            .unwrap();
        assert!(related.is_empty());
    }

    #[tokio::test]
    async fn key_directory_prefers_pinned_key() {
        let store = trust();
        store.store_temp_public_key("ip-1", "TMP").await.unwrap();
        assert_eq!(
            store.public_key_for("ip-1").await.unwrap().as_deref(),
            Some("TMP")
        );

        store.store_public_key("ip-1", "PINNED").await.unwrap();
        assert_eq!(
            store.public_key_for("ip-1").await.unwrap().as_deref(),
            Some("PINNED")
        );
    }
}
