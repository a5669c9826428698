//! Client error types.

use isolate_core::ContentId;
use thiserror::Error;

/// A request that never produced an HTTP response.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TransportError {
    message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors raised while synchronizing with the store.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: TransportError,
    },

    #[error("{url} returned HTTP {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("blobstore upload of {id} failed after {attempts} upload URLs")]
    BlobstoreUpload { id: ContentId, attempts: u32 },

    #[error("content of {expected} hashed to {actual}")]
    HashMismatch {
        expected: ContentId,
        actual: ContentId,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transfer worker panicked: {0}")]
    WorkerPanic(String),

    #[error(transparent)]
    Core(#[from] isolate_core::Error),
}

impl ClientError {
    /// Whether retrying the same request may succeed.
    ///
    /// 404 is only transient when the caller opted into 404 retries.
    pub fn is_retryable(&self, retry_404: bool) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => *status >= 500 || (*status == 404 && retry_404),
            _ => false,
        }
    }
}

/// Result type for client operations.
pub type ClientResult<T> = std::result::Result<T, ClientError>;
