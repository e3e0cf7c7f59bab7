use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use trust_store::IdentificatorKind;

use crate::client::ProviderClient;
use crate::error::SyncError;
use crate::SyncContext;

/// Wallet public keys and the services each wallet may reach, as reported
/// by a provider. Field names follow the provider wire format.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct WalletsAndServices {
    #[serde(rename = "PublicKeys")]
    pub public_keys: HashMap<String, String>,
    #[serde(rename = "Services")]
    pub services: HashMap<String, Vec<String>>,
}

/// Currently-valid tokens per wallet id.
pub type ActiveTokens = HashMap<String, Vec<String>>;

/// Ask every enrolled provider for its wallets and services and merge the
/// answers: a later provider overwrites a wallet's public key but only ever
/// adds to its service list.
pub async fn fetch_wallets_and_services(
    ctx: &SyncContext,
    client: &ProviderClient,
) -> Result<WalletsAndServices, SyncError> {
    let mut merged = WalletsAndServices::default();

    for provider in providers(ctx).await? {
        let response = query_provider(ctx, client, &provider.url, "getWalletsAndServices").await?;
        let parsed: WalletsAndServices = serde_json::from_str(&response)?;

        debug!(provider = %provider.id, wallets = parsed.public_keys.len(), "wallet snapshot");

        for (wallet_id, pem) in &parsed.public_keys {
            merged.public_keys.insert(wallet_id.clone(), pem.clone());
            let services = merged.services.entry(wallet_id.clone()).or_default();
            if let Some(reported) = parsed.services.get(wallet_id) {
                services.extend(reported.iter().cloned());
            }
        }
    }

    Ok(merged)
}

/// Ask every enrolled provider for its active tokens; token lists append
/// across providers.
pub async fn fetch_active_tokens(
    ctx: &SyncContext,
    client: &ProviderClient,
) -> Result<ActiveTokens, SyncError> {
    let mut merged: ActiveTokens = HashMap::new();

    for provider in providers(ctx).await? {
        let response = query_provider(ctx, client, &provider.url, "getActiveTokens").await?;
        let parsed: ActiveTokens = serde_json::from_str(&response)?;

        for (wallet_id, tokens) in parsed {
            merged.entry(wallet_id).or_default().extend(tokens);
        }
    }

    Ok(merged)
}

async fn providers(
    ctx: &SyncContext,
) -> Result<Vec<trust_store::Identificator>, SyncError> {
    let related = ctx
        .trust
        .related(&ctx.identity.id, IdentificatorKind::IdentityProvider)
        .await?;
    Ok(related.into_values().collect())
}

/// Send a signed, empty-bodied envelope to one provider endpoint.
async fn query_provider(
    ctx: &SyncContext,
    client: &ProviderClient,
    provider_url: &str,
    endpoint: &str,
) -> Result<String, SyncError> {
    let payload = serde_json::to_vec("")?;
    let envelope = envelope_codec::seal(
        &payload,
        &ctx.identity.id,
        &ctx.identity.private_key_pem,
        None,
    )?;

    let (response, _) = client
        .post_envelope(
            &format!("{provider_url}/{endpoint}"),
            envelope,
            &ctx.identity,
            &ctx.trust,
        )
        .await?;
    Ok(response)
}

// ---------------------------------------------------------------------------
// Flattened snapshot strings for the admin surface
// ---------------------------------------------------------------------------

/// `"walletId,publicKeyPem,service1,service2,..."` per wallet.
pub fn flatten_wallets(snapshot: &WalletsAndServices) -> Vec<String> {
    snapshot
        .public_keys
        .iter()
        .map(|(wallet_id, pem)| {
            let mut entry = format!("{wallet_id},{pem}");
            if let Some(services) = snapshot.services.get(wallet_id) {
                for service in services {
                    entry.push(',');
                    entry.push_str(service);
                }
            }
            entry
        })
        .collect()
}

/// `"walletId,token1,token2,..."` per wallet.
pub fn flatten_tokens(tokens: &ActiveTokens) -> Vec<String> {
    tokens
        .iter()
        .map(|(wallet_id, list)| {
            let mut entry = wallet_id.clone();
            for token in list {
                entry.push(',');
                entry.push_str(token);
            }
            entry
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_field_names_are_capitalized() {
        let json = r#"{
            "PublicKeys": {"w1": "PEM-1"},
            "Services": {"w1": ["^api\\.example$"]}
        }"#;
        let parsed: WalletsAndServices = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.public_keys["w1"], "PEM-1");
        assert_eq!(parsed.services["w1"], vec!["^api\\.example$"]);
    }

    #[test]
    fn flatten_wallets_joins_key_and_services() {
        let mut snapshot = WalletsAndServices::default();
        snapshot.public_keys.insert("w1".into(), "PEM".into());
        snapshot
            .services
            .insert("w1".into(), vec!["svc-a".into(), "svc-b".into()]);

        assert_eq!(flatten_wallets(&snapshot), vec!["w1,PEM,svc-a,svc-b"]);
    }

    #[test]
    fn flatten_wallets_without_services() {
        let mut snapshot = WalletsAndServices::default();
        snapshot.public_keys.insert("w1".into(), "PEM".into());

        assert_eq!(flatten_wallets(&snapshot), vec!["w1,PEM"]);
    }

    #[test]
    fn flatten_tokens_joins_tokens() {
        let mut tokens = ActiveTokens::new();
        tokens.insert("w1".into(), vec!["t1".into(), "t2".into()]);

        assert_eq!(flatten_tokens(&tokens), vec!["w1,t1,t2"]);
    }
}
