use std::sync::Arc;

use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use envelope_codec::CodecError;

use crate::error::StorageError;
use crate::identity::{Identificator, IdentificatorKind};
use crate::kv::KvStore;
use crate::store::TrustStore;

/// Well-known slot holding the proxy's permanent key pair.
pub const COMPONENT_IDENTIFICATOR_ID: &str = "component_proxy";

/// Well-known slot holding the proxy's generated id.
pub const COMPONENT_REAL_ID: &str = "componentrealid_proxy";

/// Errors during component identity bootstrap. All are fatal at boot.
#[derive(Debug, Error)]
pub enum ComponentError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("key generation failed: {0}")]
    Keygen(#[from] CodecError),

    #[error("component id slot is empty after initialization")]
    MissingId,

    #[error("component key slot is empty after initialization")]
    MissingKeys,
}

/// The proxy's own identity, immutable for the lifetime of the process.
///
/// Constructed once by [`load_component`] and threaded through every
/// component that signs, decrypts, or introduces itself to a peer.
#[derive(Debug, Clone)]
pub struct ComponentIdentity {
    pub id: String,
    pub public_key_pem: String,
    pub private_key_pem: String,
}

impl ComponentIdentity {
    pub fn identificator(&self) -> Identificator {
        Identificator::new(self.id.clone(), IdentificatorKind::Proxy)
    }
}

/// Load (or, on first boot, create) the proxy's permanent identity.
///
/// On an empty store this generates the RSA key pair and a fresh UUID,
/// persists both, and registers the proxy Identificator. Subsequent boots
/// read everything back unchanged; the key pair is never regenerated.
pub async fn load_component(
    trust: &TrustStore,
    data: &Arc<dyn KvStore>,
) -> Result<ComponentIdentity, ComponentError> {
    let existing = trust.private_key(COMPONENT_IDENTIFICATOR_ID).await?;

    if existing.as_deref().unwrap_or("").is_empty() {
        let (public_pem, private_pem) = envelope_codec::generate_keypair()?;
        trust
            .store_key_pair(COMPONENT_IDENTIFICATOR_ID, &public_pem, &private_pem)
            .await?;

        let id = Uuid::new_v4().to_string();
        data.set(COMPONENT_REAL_ID, "", &id, None).await?;

        trust
            .add_identificator(&Identificator::new(id.clone(), IdentificatorKind::Proxy))
            .await?;

        info!(%id, "generated component identity");
    }

    let id = data
        .get(COMPONENT_REAL_ID, "")
        .await?
        .filter(|id| !id.is_empty())
        .ok_or(ComponentError::MissingId)?;
    let public_key_pem = trust
        .public_key(COMPONENT_IDENTIFICATOR_ID)
        .await?
        .ok_or(ComponentError::MissingKeys)?;
    let private_key_pem = trust
        .private_key(COMPONENT_IDENTIFICATOR_ID)
        .await?
        .ok_or(ComponentError::MissingKeys)?;

    Ok(ComponentIdentity {
        id,
        public_key_pem,
        private_key_pem,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    #[tokio::test]
    async fn first_boot_creates_identity() {
        let data: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let trust = TrustStore::new(Arc::clone(&data));

        let identity = load_component(&trust, &data).await.unwrap();
        assert!(!identity.id.is_empty());
        assert!(identity.public_key_pem.contains("PUBLIC KEY"));
        assert!(identity.private_key_pem.contains("PRIVATE KEY"));

        let idf = trust.identificator(&identity.id).await.unwrap().unwrap();
        assert_eq!(idf.kind, IdentificatorKind::Proxy);
    }

    #[tokio::test]
    async fn restart_reuses_identity() {
        let data: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let trust = TrustStore::new(Arc::clone(&data));

        let first = load_component(&trust, &data).await.unwrap();
        let second = load_component(&trust, &data).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.public_key_pem, second.public_key_pem);
        assert_eq!(first.private_key_pem, second.private_key_pem);
    }
}
