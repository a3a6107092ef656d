//! Content-addressable blob storage for the aptforge repository server.
//!
//! Files are named by the SHA-256 of their content, written through a
//! staging area and atomically renamed into place, so the store is
//! deduplicating and never exposes partially written blobs. Mutable
//! named refs mark branch heads on top of the immutable blob layer.

pub mod blob;
pub mod error;

pub use blob::{BlobStore, ByteStream, StagingWriter};
pub use error::{StorageError, StorageResult};
