use thiserror::Error;

/// Errors produced while sealing or opening envelopes.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid PKCS#8 key: {0}")]
    Pkcs8(#[from] rsa::pkcs8::Error),

    #[error("invalid public key: {0}")]
    Spki(#[from] rsa::pkcs8::spki::Error),

    #[error("RSA operation failed: {0}")]
    Rsa(#[from] rsa::Error),

    #[error("envelope encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid base64 field: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("payload encryption failed")]
    Encrypt,

    #[error("payload decryption failed")]
    Decrypt,

    #[error("envelope is encrypted but carries no key material")]
    MissingKeyMaterial,

    #[error("self-certified envelope must be sent in the clear")]
    UnexpectedEncryption,

    #[error("unknown sender '{0}'")]
    UnknownSender(String),

    #[error("signature verification failed for sender '{0}'")]
    BadSignature(String),

    #[error("key directory lookup failed: {0}")]
    Directory(String),
}
