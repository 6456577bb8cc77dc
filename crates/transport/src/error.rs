//! Error types for signing and transport operations.

use thiserror::Error;

/// Errors raised while producing or checking request signatures.
#[derive(Debug, Error)]
pub enum SigningError {
    /// No private key was configured.
    #[error("no signer configured")]
    NoSigner,

    /// The private key could not be parsed.
    #[error("invalid private key: {0}")]
    InvalidKey(String),

    /// The request body could not be encoded to canonical JSON.
    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    /// The ECDSA primitive failed.
    #[error("signature failed: {0}")]
    Signature(#[from] k256::ecdsa::Error),

    /// A signature had the wrong shape or recovery id.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// A metadata value was not a valid header value.
    #[error("invalid metadata value for {key}")]
    Metadata {
        /// Header name.
        key: &'static str,
    },
}

/// Errors raised by the matcher and validator clients.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Endpoint URI could not be parsed.
    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint {
        /// Endpoint as configured.
        endpoint: String,
        /// Parser message.
        reason: String,
    },

    /// Channel setup failed.
    #[error("connection failed: {0}")]
    Connect(#[from] tonic::transport::Error),

    /// TLS material could not be loaded.
    #[error("tls configuration failed: {0}")]
    Tls(String),

    /// Remote returned a gRPC status.
    #[error("rpc failed: {0}")]
    Status(#[from] tonic::Status),

    /// Request signing failed.
    #[error("signing failed: {0}")]
    Signing(#[from] SigningError),

    /// A stream ended with an error after it was opened.
    #[error("stream error: {0}")]
    Stream(String),

    /// The remote answered but declined the request.
    #[error("rejected: {0}")]
    Rejected(String),
}

impl TransportError {
    /// True when the remote answered and explicitly declined.
    pub fn is_rejection(&self) -> bool {
        matches!(self, TransportError::Rejected(_))
    }
}

/// Result alias for signing operations.
pub type SigningResult<T> = Result<T, SigningError>;

/// Result alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
