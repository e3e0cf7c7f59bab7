use std::time::Duration;

use serde::{Deserialize, Serialize};

use envelope_codec::KeyDirectory;
use trust_store::ComponentIdentity;

use crate::error::SyncError;

/// Provider responses come wrapped; `data` carries the actual envelope.
#[derive(Debug, Serialize, Deserialize)]
struct ResponseWrapper {
    code: String,
    status: String,
    data: String,
}

/// HTTP client for identity-provider endpoints.
///
/// Control-plane calls construct this with a 10-second deadline; the sync
/// daemons run without one and lean on their retry cadence instead.
pub struct ProviderClient {
    http: reqwest::Client,
}

impl ProviderClient {
    pub fn new(timeout: Option<Duration>) -> Result<Self, SyncError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            http: builder.build()?,
        })
    }

    /// `GET <provider>/publicKey`, the enrollment bootstrap.
    ///
    /// The provider answers with a self-certified envelope; returns its
    /// `(public key PEM, id)`.
    pub async fn fetch_public_key(&self, provider_url: &str) -> Result<(String, String), SyncError> {
        let body = self
            .http
            .get(format!("{provider_url}/publicKey"))
            .send()
            .await?
            .text()
            .await?;

        let envelope = unwrap_response(&body)?;
        Ok(envelope_codec::open_self_certified(&envelope)?)
    }

    /// POST a sealed envelope and open the enveloped answer.
    ///
    /// Returns the decrypted payload (a JSON text) and the responding
    /// sender's id.
    pub async fn post_envelope(
        &self,
        url: &str,
        envelope: String,
        identity: &ComponentIdentity,
        directory: &dyn KeyDirectory,
    ) -> Result<(String, String), SyncError> {
        let body = self.http.post(url).body(envelope).send().await?.text().await?;

        let raw = unwrap_response(&body)?;
        let (payload, sender_id) =
            envelope_codec::open(&raw, &identity.private_key_pem, directory).await?;

        Ok((String::from_utf8(payload)?, sender_id))
    }
}

fn unwrap_response(body: &str) -> Result<String, SyncError> {
    let wrapper: ResponseWrapper = serde_json::from_str(body)?;
    if wrapper.code != "200" {
        return Err(SyncError::ProviderStatus {
            code: wrapper.code,
            status: wrapper.status,
        });
    }
    Ok(wrapper.data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwrap_passes_through_data() {
        let body = r#"{"code":"200","status":"OK","data":"{\"senderId\":\"x\"}"}"#;
        assert_eq!(unwrap_response(body).unwrap(), r#"{"senderId":"x"}"#);
    }

    #[test]
    fn unwrap_surfaces_provider_error() {
        let body = r#"{"code":"400","status":"Can not sign response","data":""}"#;
        let err = unwrap_response(body).unwrap_err();
        assert!(matches!(
            err,
            SyncError::ProviderStatus { code, status }
                if code == "400" && status == "Can not sign response"
        ));
    }

    #[test]
    fn unwrap_rejects_garbage() {
        assert!(matches!(
            unwrap_response("<html>nope</html>"),
            Err(SyncError::Decode(_))
        ));
    }
}
