//! Release signing for the aptforge repository server.
//!
//! This crate provides:
//! - Ed25519 key generation and management
//! - Detached and clear-sign signatures over release manifests
//! - Upload manifest verification against trusted keys

pub mod error;
pub mod key;
pub mod signer;

pub use error::{SignerError, SignerResult};
pub use key::{KeyPair, PublicKey, SecretKey};
pub use signer::{verify_clearsigned, verify_detached, ReleaseSigner};
