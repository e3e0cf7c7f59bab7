use thiserror::Error;

use envelope_codec::CodecError;
use trust_store::StorageError;

/// Errors from provider traffic and the synchronization pipeline.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider answered {code}: {status}")]
    ProviderStatus { code: String, status: String },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("unexpected provider response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("provider payload is not utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("no pinned key for provider '{0}'")]
    MissingKey(String),

    #[error("no enrollment in flight for provider '{0}'")]
    NotEnrolled(String),
}
