//! Core domain types and shared logic for the aptforge repository server.
//!
//! This crate defines the canonical data model used across all other
//! crates:
//! - Content-derived store identifiers and hashing
//! - Debian version parsing and ordering
//! - Parsed upload manifests ("changes" files)
//! - Release items and index ordering
//! - Upload session identifiers and wire types
//! - Configuration

pub mod changes;
pub mod config;
pub mod error;
pub mod hash;
pub mod release;
pub mod upload;
pub mod version;

pub use changes::{Changes, ChangesFile, ClearSigned};
pub use error::{Error, Result};
pub use hash::{StoreHasher, StoreId};
pub use release::{release_index_cmp, ItemKind, ReleaseItem, ReleaseItemFile};
pub use upload::{SessionId, SessionStatus, SessionSummary};
pub use version::DebVersion;

/// How many leading hex characters of a store id shard the blob
/// directory layout.
pub const STORE_PREFIX_DEPTH: usize = 2;
