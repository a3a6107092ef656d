//! Parent-linked release nodes.
//!
//! Every publish seals a new release node pointing at its index and
//! its predecessor, so a branch ref plus the parent chain is the full
//! publication history. Nodes are immutable once sealed; only the
//! branch ref ever moves.

use crate::error::ArchiveResult;
use aptforge_core::StoreId;
use aptforge_storage::BlobStore;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// One sealed release snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Release {
    /// The preceding release, absent for the first publish on a branch.
    pub parent: Option<StoreId>,
    /// The sealed item index for this snapshot.
    pub index: StoreId,
    /// When the release was sealed.
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
    /// How many ancestors beyond this node remain addressable when
    /// walking history; zero disables trimming.
    pub trim_after: u32,
    /// Human-readable summary of what produced this release.
    pub description: String,
}

impl Release {
    /// Seal the node into the blob store.
    pub async fn seal(&self, store: &BlobStore) -> ArchiveResult<StoreId> {
        let bytes = serde_json::to_vec(self)?;
        Ok(store.store_bytes(&bytes).await?)
    }

    /// Load a sealed node.
    pub async fn load(store: &BlobStore, id: &StoreId) -> ArchiveResult<Self> {
        let bytes = store.read_bytes(id).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
