use http::HeaderMap;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

use trust_store::{KvStore, TrustStore, SERVICES, TOKENS};

use crate::cookie::parse_netclave_cookies;

/// Why a request was not admitted.
///
/// Only some denials feed the ban list: an unroutable request, a request
/// with no valid cookie, and a failed service lookup are treated as hostile
/// or suspicious; a failure to read the trust store itself is ours.
#[derive(Debug, Error)]
pub enum Denial {
    #[error("No rule found")]
    NoRule,

    #[error("No access")]
    NoAccess,

    #[error("{0}")]
    ServiceLookup(String),

    #[error("{0}")]
    Upstream(String),

    #[error("{0}")]
    Storage(String),
}

impl Denial {
    /// Whether this denial should append to the fail2ban list.
    pub fn should_ban(&self) -> bool {
        !matches!(self, Denial::Storage(_))
    }
}

/// Run every token cookie on the request through the four admission gates.
///
/// Per cookie: the issuing provider and the wallet must both be known, the
/// signature over the token must verify against the wallet's pinned key,
/// some authorized-service regex must match the inbound host, and the token
/// must still be in the active set. The gates are ANDed; any single cookie
/// passing all four admits the request. A cookie failing a gate falls
/// through to the next cookie; clients legitimately present cookies from
/// several providers, only one of which fits this host.
pub async fn authorize(
    trust: &TrustStore,
    data: &dyn KvStore,
    host: &str,
    headers: &HeaderMap,
) -> Result<(), Denial> {
    let identificators = trust
        .identificators()
        .await
        .map_err(|e| Denial::Storage(e.to_string()))?;

    for cookie in parse_netclave_cookies(headers) {
        if !identificators.contains_key(&cookie.provider_id) {
            debug!(provider = %cookie.provider_id, "no identity provider found");
            continue;
        }
        if !identificators.contains_key(&cookie.wallet_id) {
            debug!(wallet = %cookie.wallet_id, "no wallet found");
            continue;
        }

        let wallet_pem = match trust.public_key(&cookie.wallet_id).await {
            Ok(Some(pem)) => pem,
            Ok(None) => {
                debug!(wallet = %cookie.wallet_id, "wallet has no pinned key");
                continue;
            }
            Err(err) => {
                warn!(wallet = %cookie.wallet_id, %err, "pinned key lookup failed");
                continue;
            }
        };

        match envelope_codec::verify(cookie.token.as_bytes(), &cookie.signature, &wallet_pem) {
            Ok(true) => {}
            Ok(false) => {
                debug!(wallet = %cookie.wallet_id, "token signature does not verify");
                continue;
            }
            Err(err) => {
                debug!(wallet = %cookie.wallet_id, %err, "signature check errored");
                continue;
            }
        }

        // A service-list read failure is an infrastructure error and aborts
        // the whole request; a list that simply does not cover this host
        // only disqualifies the cookie.
        let services_json = match data
            .get(SERVICES, &cookie.wallet_id)
            .await
            .map_err(|e| Denial::ServiceLookup(e.to_string()))?
        {
            Some(json) => json,
            None => {
                debug!(wallet = %cookie.wallet_id, "no service list for wallet");
                continue;
            }
        };

        let services: Vec<String> = match serde_json::from_str(&services_json) {
            Ok(services) => services,
            Err(err) => {
                warn!(wallet = %cookie.wallet_id, %err, "unparseable service list");
                continue;
            }
        };

        if !services.iter().any(|pattern| host_matches(pattern, host)) {
            debug!(wallet = %cookie.wallet_id, host, "host not in wallet's services");
            continue;
        }

        let token_key = format!("{}/{}", cookie.wallet_id, cookie.token);
        match data.get(TOKENS, &token_key).await {
            Ok(Some(value)) if !value.is_empty() => {
                debug!(wallet = %cookie.wallet_id, provider = %cookie.provider_id, "request admitted");
                return Ok(());
            }
            Ok(_) => {
                debug!(wallet = %cookie.wallet_id, "token not in active set");
                continue;
            }
            Err(err) => {
                warn!(wallet = %cookie.wallet_id, %err, "active-token lookup failed");
                continue;
            }
        }
    }

    Err(Denial::NoAccess)
}

/// Unanchored, non-empty regex search; an invalid pattern counts as a
/// non-match rather than taking the request down.
fn host_matches(pattern: &str, host: &str) -> bool {
    match Regex::new(pattern) {
        Ok(re) => re.find(host).is_some_and(|m| !m.as_str().is_empty()),
        Err(err) => {
            warn!(pattern, %err, "invalid service pattern; treating as non-match");
            false
        }
    }
}
