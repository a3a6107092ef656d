//! Content-derived blob identifiers.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A SHA-256 content identifier for a stored blob.
///
/// Two blobs with identical bytes always yield the same id, which is
/// what makes the blob store deduplicating. Rendered as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreId(#[serde(with = "hex_bytes")] [u8; 32]);

impl StoreId {
    /// Create from raw digest bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Compute the id of a byte slice.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Create an incremental hasher.
    pub fn hasher() -> StoreHasher {
        StoreHasher(Sha256::new())
    }

    /// Parse from a lowercase hex string.
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        if s.len() != 64 {
            return Err(crate::Error::InvalidStoreId(format!(
                "expected 64 hex chars, got {}",
                s.len()
            )));
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hex_str = std::str::from_utf8(chunk)
                .map_err(|e| crate::Error::InvalidStoreId(e.to_string()))?;
            bytes[i] = u8::from_str_radix(hex_str, 16)
                .map_err(|e| crate::Error::InvalidStoreId(e.to_string()))?;
        }
        Ok(Self(bytes))
    }

    /// Encode as a lowercase hex string.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoreId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Incremental SHA-256 hasher producing a [`StoreId`].
pub struct StoreHasher(Sha256);

impl StoreHasher {
    /// Update the hasher with data.
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Finalize and return the id.
    pub fn finalize(self) -> StoreId {
        StoreId(self.0.finalize().into())
    }

    /// The id of the data hashed so far, without consuming the hasher.
    pub fn peek(&self) -> StoreId {
        StoreId(self.0.clone().finalize().into())
    }
}

impl Default for StoreHasher {
    fn default() -> Self {
        StoreId::hasher()
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], ser: S) -> Result<S::Ok, S::Error> {
        let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        ser.serialize_str(&hex)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(de)?;
        let id = super::StoreId::from_hex(&s).map_err(serde::de::Error::custom)?;
        Ok(*id.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_id_roundtrip() {
        let id = StoreId::compute(b"hello world");
        let hex = id.to_hex();
        assert_eq!(hex.len(), 64);
        let parsed = StoreId::from_hex(&hex).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_identical_content_identical_id() {
        assert_eq!(StoreId::compute(b"abc"), StoreId::compute(b"abc"));
        assert_ne!(StoreId::compute(b"abc"), StoreId::compute(b"abd"));
    }

    #[test]
    fn test_incremental_matches_oneshot() {
        let mut hasher = StoreId::hasher();
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(hasher.peek(), StoreId::compute(b"hello world"));
        assert_eq!(hasher.finalize(), StoreId::compute(b"hello world"));
    }

    #[test]
    fn test_serde_hex_form() {
        let id = StoreId::compute(b"x");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.to_hex()));
        let back: StoreId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_from_hex_rejects_bad_input() {
        assert!(StoreId::from_hex("abc").is_err());
        assert!(StoreId::from_hex(&"zz".repeat(32)).is_err());
    }
}
