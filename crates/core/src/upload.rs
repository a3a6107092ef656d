//! Upload session identifiers and wire types.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an upload session.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a new random session id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::Session(format!("invalid session id: {e}")))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of accepting one file into a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// File accepted; more declared files are outstanding.
    Accepted,
    /// All declared files have been received and verified.
    Complete,
}

/// Session state as reported to the uploading client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionSummary {
    /// The session id.
    pub session_id: SessionId,
    /// Resource locator for continuing the session.
    pub session_url: String,
    /// Target distribution branch.
    pub branch: String,
    /// Source package named by the manifest.
    pub source: String,
    /// Declared version.
    pub version: String,
    /// Files received so far.
    pub received: Vec<String>,
    /// Declared files still outstanding.
    pub outstanding: Vec<String>,
    /// Whether the session is complete.
    pub complete: bool,
    /// When the session expires.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: time::OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_roundtrip() {
        let id = SessionId::new();
        let parsed = SessionId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
        assert!(SessionId::parse("not-a-uuid").is_err());
    }
}
