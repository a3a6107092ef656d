//! Archive error types.

use thiserror::Error;

/// Errors raised by the release chain engine.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("conflicting version: {name} {version} ({architecture}) already published with different content")]
    ConflictingVersion {
        name: String,
        version: String,
        architecture: String,
    },

    #[error("index items out of order: {0}")]
    OutOfOrder(String),

    #[error("no such branch: {0}")]
    BranchNotFound(String),

    #[error("invalid prune rules: {0}")]
    InvalidRules(String),

    #[error("invalid pool pattern: {0}")]
    InvalidPattern(String),

    #[error("manifest rendering error: {0}")]
    Render(String),

    #[error("storage error: {0}")]
    Storage(#[from] aptforge_storage::StorageError),

    #[error("signer error: {0}")]
    Signer(#[from] aptforge_signer::SignerError),

    #[error("core error: {0}")]
    Core(#[from] aptforge_core::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for archive operations.
pub type ArchiveResult<T> = std::result::Result<T, ArchiveError>;
