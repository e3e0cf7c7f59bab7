use http::header::COOKIE;
use http::HeaderMap;
use tracing::debug;

/// Cookie names carrying a token embed this marker; the rest of the name is
/// the issuing identity provider's id.
const TOKEN_PREFIX: &str = "netclave-token-";

/// One parsed `netclave-token-<providerId>=<walletId>,<token>,<signature>`
/// cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenCookie {
    pub provider_id: String,
    pub wallet_id: String,
    pub token: String,
    pub signature: String,
}

/// Extract every well-formed token cookie from the request headers.
///
/// Each `Cookie` header is split on `;`; within a cookie the first `=`
/// separates name from value, so `=` characters inside the value survive.
/// Cookies whose name lacks the token marker, or whose value does not split
/// into exactly three comma-separated fields, are skipped; a client may
/// carry cookies for several identity providers and unrelated sites at once.
pub fn parse_netclave_cookies(headers: &HeaderMap) -> Vec<TokenCookie> {
    let mut cookies = Vec::new();

    for header in headers.get_all(COOKIE) {
        let Ok(raw) = header.to_str() else {
            continue;
        };

        for part in raw.split(';') {
            let Some((name, value)) = part.trim().split_once('=') else {
                continue;
            };
            if !name.contains(TOKEN_PREFIX) {
                continue;
            }

            let provider_id = name.replace(TOKEN_PREFIX, "");

            let fields: Vec<&str> = value.split(',').collect();
            if fields.len() != 3 {
                debug!(name, "token cookie in wrong format");
                continue;
            }

            cookies.push(TokenCookie {
                provider_id,
                wallet_id: fields[0].to_string(),
                token: fields[1].to_string(),
                signature: fields[2].to_string(),
            });
        }
    }

    cookies
}
