//! API error types.

use aptforge_core::SessionId;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// The session the rejected request belongs to, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Where to resume that session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_url: Option<String>,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("unexpected file: {0} is not declared by the manifest")]
    UnexpectedFile(String),

    #[error("already uploaded: {0}")]
    AlreadyUploaded(String),

    #[error("checksum mismatch for {name}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("manifest is not signed")]
    Unsigned,

    #[error("manifest signature could not be verified")]
    Unverified,

    #[error("session expired")]
    SessionExpired,

    #[error("session is not complete")]
    Incomplete,

    #[error("pre-generation hook failed: {0}")]
    HookFailed(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("storage error: {0}")]
    Storage(#[from] aptforge_storage::StorageError),

    #[error("archive error: {0}")]
    Archive(#[from] aptforge_archive::ArchiveError),

    #[error("core error: {0}")]
    Core(#[from] aptforge_core::Error),

    #[error("signer error: {0}")]
    Signer(#[from] aptforge_signer::SignerError),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::UnknownSession(_) => "unknown_session",
            Self::UnexpectedFile(_) => "unexpected_file",
            Self::AlreadyUploaded(_) => "already_uploaded",
            Self::ChecksumMismatch { .. } => "checksum_mismatch",
            Self::Unsigned => "unsigned",
            Self::Unverified => "unverified",
            Self::SessionExpired => "session_expired",
            Self::Incomplete => "incomplete",
            Self::HookFailed(_) => "hook_failed",
            Self::Internal(_) => "internal_error",
            Self::Storage(_) => "storage_error",
            Self::Archive(e) => match e {
                aptforge_archive::ArchiveError::ConflictingVersion { .. } => {
                    "conflicting_version"
                }
                aptforge_archive::ArchiveError::BranchNotFound(_) => "not_found",
                _ => "archive_error",
            },
            Self::Core(_) => "core_error",
            Self::Signer(_) => "signer_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::UnknownSession(_) => StatusCode::NOT_FOUND,
            Self::UnexpectedFile(_) => StatusCode::BAD_REQUEST,
            Self::AlreadyUploaded(_) => StatusCode::CONFLICT,
            Self::ChecksumMismatch { .. } => StatusCode::BAD_REQUEST,
            Self::Unsigned => StatusCode::UNAUTHORIZED,
            Self::Unverified => StatusCode::UNAUTHORIZED,
            Self::SessionExpired => StatusCode::GONE,
            Self::Incomplete => StatusCode::BAD_REQUEST,
            Self::HookFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Storage(e) => match e {
                aptforge_storage::StorageError::NotFound(_) => StatusCode::NOT_FOUND,
                aptforge_storage::StorageError::RefNotFound(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Archive(e) => match e {
                aptforge_archive::ArchiveError::ConflictingVersion { .. } => StatusCode::CONFLICT,
                aptforge_archive::ArchiveError::BranchNotFound(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Core(_) => StatusCode::BAD_REQUEST,
            Self::Signer(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl ApiError {
    /// Render as a response carrying the session the request targeted,
    /// so a client that lost track of its session can resume it.
    /// Errors that say the session itself is unusable stay plain.
    pub fn into_session_response(self, branch: &str, id: SessionId) -> Response {
        match self {
            Self::UnknownSession(_) | Self::SessionExpired => self.into_response(),
            other => {
                let status = other.status_code();
                let body = ErrorResponse {
                    code: other.code().to_string(),
                    message: other.to_string(),
                    session_id: Some(id.to_string()),
                    session_url: Some(format!("/dists/{branch}/upload/{id}")),
                };
                (status, Json(body)).into_response()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
            session_id: None,
            session_url: None,
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
