//! Error types for trail-core operations

use thiserror::Error;

/// Errors that can occur during cryptographic operations
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid hex encoding: {0}")]
    InvalidHex(String),

    #[error("Invalid hash length: expected {expected} bytes, got {actual}")]
    InvalidHashLength { expected: usize, actual: usize },

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid private key")]
    InvalidPrivateKey,

    #[error("Invalid signature encoding")]
    InvalidSignature,

    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    #[error("Event hash does not match canonical bytes")]
    EventHashMismatch,

    #[error("Event signature verification failed")]
    EventSignatureInvalid,

    #[error("Canonicalization failed: {0}")]
    Canonicalize(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("Keystore error: {0}")]
    Keystore(String),

    #[error("Unsupported keystore version: {found}")]
    UnsupportedKeystoreVersion { found: String },

    #[error("Keystore MAC mismatch (wrong password or corrupted data)")]
    MacMismatch,
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e.to_string())
    }
}

/// Result type for trail-core operations
pub type Result<T> = std::result::Result<T, Error>;
