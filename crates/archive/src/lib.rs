//! Release chain engine for the aptforge repository server.
//!
//! This crate turns completed upload sessions into published releases:
//! - Sealed, ordered release indexes
//! - Parent-linked immutable release nodes
//! - Merge with conflict detection, prune rules, history trimming
//! - Public pool and `dists/` tree materialization with signing

pub mod archive;
pub mod error;
pub mod index;
pub mod prune;
pub mod release;

pub use archive::{Archive, CompletedUpload, LogEntry, ReleaseSummary};
pub use error::{ArchiveError, ArchiveResult};
pub use index::{IndexReader, IndexWriter};
pub use prune::PruneRules;
pub use release::Release;
