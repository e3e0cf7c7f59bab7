use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::RngCore;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::keys::{sign, verify};

/// Resolver for a remote sender's public key.
///
/// During normal operation the key comes from the pinned-key set; while an
/// enrollment is still in flight it comes from the temporary slot. The trust
/// store implements both behind this trait so the codec stays storage-
/// agnostic.
#[async_trait]
pub trait KeyDirectory: Send + Sync {
    /// Return the PEM public key for `id`, or `None` if the peer is unknown.
    async fn public_key_for(&self, id: &str) -> Result<Option<String>, CodecError>;
}

/// The wire envelope exchanged with identity providers.
///
/// `signature` always covers the plaintext payload. When `encrypted` is set,
/// `payload` holds AES-256-GCM ciphertext under a fresh key wrapped with
/// RSA-OAEP to the recipient in `encrypted_key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "senderId")]
    pub sender_id: String,
    /// Base64 payload (plaintext or ciphertext, per `encrypted`).
    pub payload: String,
    pub encrypted: bool,
    #[serde(
        rename = "encryptedKey",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub encrypted_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// Base64 PKCS#1 v1.5 signature over the plaintext payload.
    pub signature: String,
}

/// Sign `payload` as `sender_id` and serialize the envelope to JSON.
///
/// When `recipient_public_pem` is given the payload is additionally
/// encrypted to that key; otherwise it travels base64-encoded in the clear.
pub fn seal(
    payload: &[u8],
    sender_id: &str,
    sender_private_pem: &str,
    recipient_public_pem: Option<&str>,
) -> Result<String, CodecError> {
    let signature = sign(payload, sender_private_pem)?;

    let envelope = match recipient_public_pem {
        Some(recipient_pem) => {
            let recipient = RsaPublicKey::from_public_key_pem(recipient_pem)?;
            let mut rng = rand::thread_rng();

            let mut key = [0u8; 32];
            rng.fill_bytes(&mut key);
            let mut nonce = [0u8; 12];
            rng.fill_bytes(&mut nonce);

            let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| CodecError::Encrypt)?;
            let ciphertext = cipher
                .encrypt(Nonce::from_slice(&nonce), payload)
                .map_err(|_| CodecError::Encrypt)?;

            let wrapped_key = recipient.encrypt(&mut rng, Oaep::new::<sha2::Sha256>(), &key)?;

            Envelope {
                sender_id: sender_id.to_string(),
                payload: BASE64.encode(ciphertext),
                encrypted: true,
                encrypted_key: Some(BASE64.encode(wrapped_key)),
                nonce: Some(BASE64.encode(nonce)),
                signature,
            }
        }
        None => Envelope {
            sender_id: sender_id.to_string(),
            payload: BASE64.encode(payload),
            encrypted: false,
            encrypted_key: None,
            nonce: None,
            signature,
        },
    };

    Ok(serde_json::to_string(&envelope)?)
}

/// Open an envelope: decrypt if needed, resolve the sender's pinned (or
/// temporary) key through `directory`, and verify the signature.
///
/// Returns the plaintext payload and the sender id. Fails on an unknown
/// sender, a signature mismatch, or any decryption error.
pub async fn open(
    raw: &str,
    self_private_pem: &str,
    directory: &dyn KeyDirectory,
) -> Result<(Vec<u8>, String), CodecError> {
    let envelope: Envelope = serde_json::from_str(raw)?;
    let plaintext = decrypt_payload(&envelope, self_private_pem)?;

    let sender_pem = directory
        .public_key_for(&envelope.sender_id)
        .await?
        .ok_or_else(|| CodecError::UnknownSender(envelope.sender_id.clone()))?;

    if !verify(&plaintext, &envelope.signature, &sender_pem)? {
        return Err(CodecError::BadSignature(envelope.sender_id));
    }

    Ok((plaintext, envelope.sender_id))
}

/// Open a self-certified envelope, used only for the enrollment bootstrap.
///
/// The payload must be unencrypted and contain the sender's own public-key
/// PEM as a JSON string; the signature is verified against that embedded
/// key (trust-on-first-use). Returns `(public key PEM, sender id)`.
pub fn open_self_certified(raw: &str) -> Result<(String, String), CodecError> {
    let envelope: Envelope = serde_json::from_str(raw)?;
    if envelope.encrypted {
        return Err(CodecError::UnexpectedEncryption);
    }

    let payload = BASE64.decode(&envelope.payload)?;
    let public_pem: String = serde_json::from_slice(&payload)?;

    if !verify(&payload, &envelope.signature, &public_pem)? {
        return Err(CodecError::BadSignature(envelope.sender_id));
    }

    Ok((public_pem, envelope.sender_id))
}

fn decrypt_payload(envelope: &Envelope, self_private_pem: &str) -> Result<Vec<u8>, CodecError> {
    let payload = BASE64.decode(&envelope.payload)?;

    if !envelope.encrypted {
        return Ok(payload);
    }

    let wrapped_key = envelope
        .encrypted_key
        .as_deref()
        .ok_or(CodecError::MissingKeyMaterial)?;
    let nonce = envelope
        .nonce
        .as_deref()
        .ok_or(CodecError::MissingKeyMaterial)?;

    let private = RsaPrivateKey::from_pkcs8_pem(self_private_pem)?;
    let key = private.decrypt(Oaep::new::<sha2::Sha256>(), &BASE64.decode(wrapped_key)?)?;

    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| CodecError::Decrypt)?;
    cipher
        .decrypt(Nonce::from_slice(&BASE64.decode(nonce)?), payload.as_slice())
        .map_err(|_| CodecError::Decrypt)
}
