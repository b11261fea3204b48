//! Signer error types.

use thiserror::Error;

/// Signing operation errors.
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("key parsing error: {0}")]
    KeyParsing(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("cannot split bucket and object name from path: {0}")]
    InvalidPath(String),

    #[error("missing or malformed Expires parameter")]
    MissingExpiry,

    #[error("signed URL expired at {0}")]
    Expired(i64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for signing operations.
pub type SignerResult<T> = std::result::Result<T, SignerError>;
