//! Release signing and upload manifest verification.

use crate::error::{SignerError, SignerResult};
use crate::key::{KeyPair, PublicKey};
use aptforge_core::changes::ClearSigned;
use aptforge_core::config::{PrivateKeyConfig, SigningConfig, TrustedKey};
use base64::Engine;
use ed25519_dalek::Signer as _;
use ed25519_dalek::Verifier;

/// Signs release manifests published under `dists/`.
pub struct ReleaseSigner {
    keypair: KeyPair,
}

impl ReleaseSigner {
    /// Create a new signer from a key pair.
    pub fn new(keypair: KeyPair) -> Self {
        Self { keypair }
    }

    /// Create from a secret key string.
    pub fn from_secret_key(s: &str) -> SignerResult<Self> {
        let keypair = KeyPair::from_secret_key(s)?;
        Ok(Self::new(keypair))
    }

    /// Generate a new signer with a random key.
    pub fn generate(key_name: impl Into<String>) -> Self {
        Self::new(KeyPair::generate(key_name))
    }

    /// Load the signer described by the signing configuration.
    pub fn from_config(config: &SigningConfig) -> SignerResult<Self> {
        let signer = match &config.private_key {
            PrivateKeyConfig::File { path } => {
                let raw = std::fs::read_to_string(path)?;
                Self::from_secret_key(&raw)?
            }
            PrivateKeyConfig::Env { var } => {
                let raw = std::env::var(var)
                    .map_err(|_| SignerError::KeySource(format!("variable {var} not set")))?;
                Self::from_secret_key(&raw)?
            }
            PrivateKeyConfig::Value { key } => Self::from_secret_key(key)?,
            PrivateKeyConfig::Generate => Self::generate(config.key_name.clone()),
        };
        if signer.key_name() != config.key_name {
            return Err(SignerError::KeySource(format!(
                "configured key_name {:?} does not match key {:?}",
                config.key_name,
                signer.key_name()
            )));
        }
        Ok(signer)
    }

    /// Get the key name.
    pub fn key_name(&self) -> &str {
        &self.keypair.name
    }

    /// Get the public key.
    pub fn public_key(&self) -> &PublicKey {
        &self.keypair.public
    }

    /// Get the public key string.
    pub fn public_key_str(&self) -> String {
        self.keypair.to_public_key()
    }

    /// Sign arbitrary bytes, returning a detached base64 signature.
    pub fn sign_detached(&self, data: &[u8]) -> String {
        let sig = self.keypair.secret.signing_key().sign(data);
        base64::engine::general_purpose::STANDARD.encode(sig.to_bytes())
    }

    /// Wrap a document body in clear-sign armor.
    pub fn clear_sign(&self, body: &str) -> String {
        let signature = self.sign_detached(body.as_bytes());
        ClearSigned::render(body, &self.keypair.name, &signature)
    }
}

/// Verify a detached base64 signature over `data`.
pub fn verify_detached(data: &[u8], signature: &str, public_key: &PublicKey) -> SignerResult<()> {
    let sig_bytes = base64::engine::general_purpose::STANDARD
        .decode(signature)
        .map_err(|e| SignerError::InvalidSignature(format!("invalid base64: {e}")))?;

    if sig_bytes.len() != 64 {
        return Err(SignerError::InvalidSignature(format!(
            "expected 64 bytes, got {}",
            sig_bytes.len()
        )));
    }

    let sig_array: [u8; 64] = sig_bytes
        .try_into()
        .map_err(|_| SignerError::InvalidSignature("invalid signature length".to_string()))?;

    let signature = ed25519_dalek::Signature::from_bytes(&sig_array);

    public_key
        .verifying_key()
        .verify(data, &signature)
        .map_err(|_| SignerError::VerificationFailed)?;

    Ok(())
}

/// Verify a clear-signed document against a list of trusted keys.
///
/// Returns `Ok(true)` when the named key is trusted and its signature
/// checks out over the body, `Ok(false)` when the key is unknown, and
/// an error when the named key is trusted but the signature is bad.
pub fn verify_clearsigned(doc: &ClearSigned, trusted_keys: &[TrustedKey]) -> SignerResult<bool> {
    let Some(entry) = trusted_keys.iter().find(|k| k.name == doc.key_name) else {
        return Ok(false);
    };
    let public = PublicKey::from_base64(&entry.public_key)?;
    verify_detached(doc.body.as_bytes(), &doc.signature, &public)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify_detached() {
        let signer = ReleaseSigner::generate("repo-key-1");
        let sig = signer.sign_detached(b"hello");
        assert!(verify_detached(b"hello", &sig, signer.public_key()).is_ok());
        assert!(verify_detached(b"tampered", &sig, signer.public_key()).is_err());
    }

    #[test]
    fn test_verify_with_wrong_key() {
        let signer1 = ReleaseSigner::generate("key-1");
        let signer2 = ReleaseSigner::generate("key-2");
        let sig = signer1.sign_detached(b"payload");
        assert!(verify_detached(b"payload", &sig, signer2.public_key()).is_err());
    }

    #[test]
    fn test_clear_sign_roundtrip() {
        let signer = ReleaseSigner::generate("repo-key-1");
        let armored = signer.clear_sign("Source: hello\nVersion: 1.0\n");

        let doc = ClearSigned::split(&armored).unwrap();
        assert_eq!(doc.key_name, "repo-key-1");
        assert_eq!(doc.body, "Source: hello\nVersion: 1.0\n");

        let trusted = vec![TrustedKey {
            name: "repo-key-1".to_string(),
            public_key: signer.public_key().to_base64(),
        }];
        assert!(verify_clearsigned(&doc, &trusted).unwrap());
    }

    #[test]
    fn test_clearsigned_unknown_key_is_not_an_error() {
        let signer = ReleaseSigner::generate("rogue-key");
        let armored = signer.clear_sign("body\n");
        let doc = ClearSigned::split(&armored).unwrap();

        assert!(!verify_clearsigned(&doc, &[]).unwrap());
    }

    #[test]
    fn test_clearsigned_bad_signature_is_an_error() {
        let signer = ReleaseSigner::generate("repo-key-1");
        let armored = signer.clear_sign("body\n");
        let mut doc = ClearSigned::split(&armored).unwrap();
        doc.body = "altered\n".to_string();

        let trusted = vec![TrustedKey {
            name: "repo-key-1".to_string(),
            public_key: signer.public_key().to_base64(),
        }];
        assert!(verify_clearsigned(&doc, &trusted).is_err());
    }

    #[test]
    fn test_from_config_value_and_generate() {
        let generated = ReleaseSigner::generate("cfg-key-1");
        let config = SigningConfig {
            key_name: "cfg-key-1".to_string(),
            private_key: PrivateKeyConfig::Value {
                key: generated.keypair.to_secret_key(),
            },
        };
        let loaded = ReleaseSigner::from_config(&config).unwrap();
        assert_eq!(loaded.key_name(), "cfg-key-1");
        assert_eq!(loaded.public_key_str(), generated.public_key_str());

        let config = SigningConfig {
            key_name: "ephemeral-1".to_string(),
            private_key: PrivateKeyConfig::Generate,
        };
        let fresh = ReleaseSigner::from_config(&config).unwrap();
        assert_eq!(fresh.key_name(), "ephemeral-1");
    }

    #[test]
    fn test_from_config_rejects_name_mismatch() {
        let generated = ReleaseSigner::generate("actual-name");
        let config = SigningConfig {
            key_name: "expected-name".to_string(),
            private_key: PrivateKeyConfig::Value {
                key: generated.keypair.to_secret_key(),
            },
        };
        assert!(ReleaseSigner::from_config(&config).is_err());
    }
}
