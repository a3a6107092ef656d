//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid store id: {0}")]
    InvalidStoreId(String),

    #[error("invalid version: {0}")]
    InvalidVersion(String),

    #[error("invalid changes manifest: {0}")]
    InvalidManifest(String),

    #[error("changes manifest is not signed")]
    Unsigned,

    #[error("changes manifest signature could not be verified")]
    Unverified,

    #[error("checksum mismatch for {name}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("upload session error: {0}")]
    Session(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
