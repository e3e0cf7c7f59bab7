use std::time::Duration;

use tracing::{info, warn};

use trust_store::{BanStore, Identificator, IdentificatorKind, SERVICES, TOKENS};

use crate::client::ProviderClient;
use crate::error::SyncError;
use crate::snapshot::{fetch_active_tokens, fetch_wallets_and_services};
use crate::{SyncContext, TOKEN_TTL};

/// Fixed cadence between daemon ticks, errors included.
const SYNC_INTERVAL: Duration = Duration::from_secs(2);

/// Continuously mirror wallets, their keys, and their service lists from
/// every enrolled provider into the trust store. Never returns; a failed
/// tick is logged and retried after the interval.
pub async fn run_wallets_daemon(ctx: SyncContext, client: ProviderClient) {
    info!("wallets-and-services daemon starting");
    loop {
        if let Err(err) = wallets_tick(&ctx, &client).await {
            warn!(%err, "wallet sync tick failed");
        }
        tokio::time::sleep(SYNC_INTERVAL).await;
    }
}

/// One synchronization pass.
///
/// Insertion order matters: the wallet Identificator and its pinned key are
/// in place before the service list is written, so the admission path never
/// observes a service entry for an unknown wallet.
async fn wallets_tick(ctx: &SyncContext, client: &ProviderClient) -> Result<(), SyncError> {
    let snapshot = fetch_wallets_and_services(ctx, client).await?;

    for (wallet_id, pem) in &snapshot.public_keys {
        ctx.trust
            .add_identificator(&Identificator::new(
                wallet_id.clone(),
                IdentificatorKind::Wallet,
            ))
            .await?;
        ctx.trust.store_public_key(wallet_id, pem).await?;
        ctx.trust
            .add_relation(&ctx.identity.id, wallet_id)
            .await?;
        ctx.trust
            .add_relation(wallet_id, &ctx.identity.id)
            .await?;

        if let Some(services) = snapshot.services.get(wallet_id) {
            let json = serde_json::to_string(services)?;
            ctx.data
                .set(SERVICES, wallet_id, &json, Some(TOKEN_TTL))
                .await?;
        }
    }

    Ok(())
}

/// Continuously mirror the active-token sets. Never returns.
pub async fn run_tokens_daemon(ctx: SyncContext, client: ProviderClient) {
    info!("active-tokens daemon starting");
    loop {
        if let Err(err) = tokens_tick(&ctx, &client).await {
            warn!(%err, "token sync tick failed");
        }
        tokio::time::sleep(SYNC_INTERVAL).await;
    }
}

/// First-write-wins: an already-present token keeps its TTL so a tick does
/// not stretch a token's lifetime past what the provider granted.
async fn tokens_tick(ctx: &SyncContext, client: &ProviderClient) -> Result<(), SyncError> {
    let tokens = fetch_active_tokens(ctx, client).await?;

    for (wallet_id, list) in &tokens {
        for token in list {
            let key = format!("{wallet_id}/{token}");
            let existing = ctx.data.get(TOKENS, &key).await?;
            if existing.as_deref().unwrap_or("").is_empty() {
                ctx.data.set(TOKENS, &key, token, Some(TOKEN_TTL)).await?;
            }
        }
    }

    Ok(())
}

/// Periodically report the current ban list. Purely observational; the
/// records exist for a downstream firewall to consume.
pub async fn run_fail2ban_daemon(bans: BanStore) {
    info!("fail2ban daemon starting");
    loop {
        match bans.active().await {
            Ok(events) => {
                for event in events {
                    info!(ip = %event.ip, since = %event.timestamp, "banned ip");
                }
            }
            Err(err) => warn!(%err, "failed to enumerate ban list"),
        }
        tokio::time::sleep(SYNC_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use trust_store::{KvStore, MemoryStore, TrustStore};

    async fn context() -> SyncContext {
        let data: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let trust = TrustStore::new(Arc::clone(&data));
        let identity = Arc::new(trust_store::load_component(&trust, &data).await.unwrap());
        SyncContext {
            identity,
            trust,
            data,
        }
    }

    #[tokio::test]
    async fn wallets_tick_with_no_providers_is_a_noop() {
        let ctx = context().await;
        let client = ProviderClient::new(None).unwrap();

        wallets_tick(&ctx, &client).await.unwrap();

        // Only the proxy itself is known.
        assert_eq!(ctx.trust.identificators().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn tokens_tick_preserves_existing_entries() {
        let ctx = context().await;

        // Pre-existing token written with a short TTL.
        ctx.data
            .set(TOKENS, "w1/t1", "t1", Some(Duration::from_millis(50)))
            .await
            .unwrap();

        // A tick with no providers reports nothing and must not touch it.
        let client = ProviderClient::new(None).unwrap();
        tokens_tick(&ctx, &client).await.unwrap();

        assert_eq!(
            ctx.data.get(TOKENS, "w1/t1").await.unwrap().as_deref(),
            Some("t1")
        );
    }
}
