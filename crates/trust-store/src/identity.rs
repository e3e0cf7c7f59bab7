use serde::{Deserialize, Serialize};

/// A named principal known to the proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identificator {
    pub id: String,
    pub kind: IdentificatorKind,
    /// Reachable base URL; empty for proxies and wallets.
    #[serde(default)]
    pub url: String,
}

impl Identificator {
    pub fn new(id: impl Into<String>, kind: IdentificatorKind) -> Self {
        Self {
            id: id.into(),
            kind,
            url: String::new(),
        }
    }

    pub fn with_url(id: impl Into<String>, kind: IdentificatorKind, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            url: url.into(),
        }
    }
}

/// The role a principal plays in the trust graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentificatorKind {
    Proxy,
    IdentityProvider,
    Wallet,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_roundtrip() {
        let idf = Identificator::with_url("ip-1", IdentificatorKind::IdentityProvider, "https://ip");
        let json = serde_json::to_string(&idf).unwrap();
        let back: Identificator = serde_json::from_str(&json).unwrap();
        assert_eq!(back, idf);
    }

    #[test]
    fn url_defaults_to_empty() {
        let idf: Identificator =
            serde_json::from_str(r#"{"id":"w1","kind":"wallet"}"#).unwrap();
        assert_eq!(idf.kind, IdentificatorKind::Wallet);
        assert!(idf.url.is_empty());
    }
}
