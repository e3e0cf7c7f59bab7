use serde_json::json;
use tracing::info;

use trust_store::{Identificator, IdentificatorKind};

use crate::client::ProviderClient;
use crate::error::SyncError;
use crate::SyncContext;

/// The exact decrypted body a provider sends when a confirmation code was
/// accepted. JSON-encoded, so the quotes are part of the comparison.
pub const CONFIRMED_BODY: &str = "\"Identificator confirmed\"";

/// Start enrolling with an identity provider.
///
/// Fetches the provider's self-certified key, parks it in the temporary
/// slot, and registers `email_or_phone` with the provider. Returns the
/// provider's textual response and its id; trust is not established until
/// [`confirm_identity_provider`] succeeds.
pub async fn add_identity_provider(
    ctx: &SyncContext,
    client: &ProviderClient,
    provider_url: &str,
    email_or_phone: &str,
) -> Result<(String, String), SyncError> {
    let (provider_pem, provider_id) = client.fetch_public_key(provider_url).await?;
    ctx.trust
        .store_temp_public_key(&provider_id, &provider_pem)
        .await?;

    let payload = serde_json::to_vec(&json!({ "identificator": email_or_phone }))?;
    let envelope = envelope_codec::seal(
        &payload,
        &ctx.identity.id,
        &ctx.identity.private_key_pem,
        Some(&provider_pem),
    )?;

    let (response, responder_id) = client
        .post_envelope(
            &format!("{provider_url}/registerPublicKey"),
            envelope,
            &ctx.identity,
            &ctx.trust,
        )
        .await?;

    info!(provider = %responder_id, "registration submitted");
    Ok((response, responder_id))
}

/// Complete an enrollment with the confirmation code the user received.
///
/// On the provider's literal acceptance body the temporary key is promoted
/// to a pinned key, the provider Identificator is created, and relations
/// are added in both directions. Any other body is returned unchanged and
/// the trust state stays exactly as it was.
pub async fn confirm_identity_provider(
    ctx: &SyncContext,
    client: &ProviderClient,
    provider_url: &str,
    provider_id: &str,
    confirmation_code: &str,
    proxy_name: &str,
) -> Result<String, SyncError> {
    let temp_pem = ctx
        .trust
        .temp_public_key(provider_id)
        .await?
        .ok_or_else(|| SyncError::NotEnrolled(provider_id.to_string()))?;

    let payload = serde_json::to_vec(&json!({
        "confirmationCode": confirmation_code,
        "identificatorType": "proxy",
        "identificatorName": proxy_name,
    }))?;
    let envelope = envelope_codec::seal(
        &payload,
        &ctx.identity.id,
        &ctx.identity.private_key_pem,
        Some(&temp_pem),
    )?;

    let (response, _) = client
        .post_envelope(
            &format!("{provider_url}/confirmPublicKey"),
            envelope,
            &ctx.identity,
            &ctx.trust,
        )
        .await?;

    if response != CONFIRMED_BODY {
        info!(provider = %provider_id, "provider declined confirmation");
        return Ok(response);
    }

    promote_provider(ctx, provider_id, provider_url, &temp_pem).await?;
    info!(provider = %provider_id, url = provider_url, "identity provider enrolled");
    Ok(response)
}

/// Make a confirmed provider authoritative.
///
/// The temporary key is removed last so a failure partway through leaves
/// the enrollment resumable.
pub(crate) async fn promote_provider(
    ctx: &SyncContext,
    provider_id: &str,
    provider_url: &str,
    temp_pem: &str,
) -> Result<(), SyncError> {
    ctx.trust.store_public_key(provider_id, temp_pem).await?;
    ctx.trust
        .add_identificator(&Identificator::with_url(
            provider_id,
            IdentificatorKind::IdentityProvider,
            provider_url,
        ))
        .await?;
    ctx.trust.add_relation(provider_id, &ctx.identity.id).await?;
    ctx.trust.add_relation(&ctx.identity.id, provider_id).await?;
    ctx.trust.delete_temp_public_key(provider_id).await?;
    Ok(())
}

/// Identity providers currently related to this proxy.
pub async fn list_identity_providers(ctx: &SyncContext) -> Result<Vec<Identificator>, SyncError> {
    let related = ctx
        .trust
        .related(&ctx.identity.id, IdentificatorKind::IdentityProvider)
        .await?;
    Ok(related.into_values().collect())
}
