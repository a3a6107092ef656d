//! Sealed release indexes.
//!
//! A release index is the complete, ordered list of items published by
//! one release snapshot, serialized one JSON object per line and
//! sealed into the blob store. Index order is the canonical release
//! order (name, architecture, version descending), which the writer
//! enforces at append time so prune scans can rely on it.

use crate::error::{ArchiveError, ArchiveResult};
use aptforge_core::release::{release_index_cmp, ReleaseItem};
use aptforge_core::StoreId;
use aptforge_storage::BlobStore;
use std::cmp::Ordering;

/// Accumulates release items in index order and seals them.
#[derive(Default)]
pub struct IndexWriter {
    items: Vec<ReleaseItem>,
}

impl IndexWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an item. Items must arrive in release order.
    pub fn add(&mut self, item: ReleaseItem) -> ArchiveResult<()> {
        if let Some(last) = self.items.last() {
            if release_index_cmp(last, &item) == Ordering::Greater {
                return Err(ArchiveError::OutOfOrder(format!(
                    "{} {} ({}) after {} {} ({})",
                    item.name,
                    item.version,
                    item.architecture,
                    last.name,
                    last.version,
                    last.architecture,
                )));
            }
        }
        self.items.push(item);
        Ok(())
    }

    /// Number of items appended so far.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Serialize the index and seal it into the blob store.
    pub async fn seal(self, store: &BlobStore) -> ArchiveResult<StoreId> {
        let mut out = Vec::new();
        for item in &self.items {
            serde_json::to_writer(&mut out, item)?;
            out.push(b'\n');
        }
        Ok(store.store_bytes(&out).await?)
    }
}

/// Sequential reader over a sealed index.
pub struct IndexReader {
    items: std::vec::IntoIter<ReleaseItem>,
}

impl IndexReader {
    /// Load a sealed index from the blob store.
    pub async fn load(store: &BlobStore, id: &StoreId) -> ArchiveResult<Self> {
        let bytes = store.read_bytes(id).await?;
        let mut items = Vec::new();
        for line in bytes.split(|b| *b == b'\n') {
            if line.is_empty() {
                continue;
            }
            items.push(serde_json::from_slice(line)?);
        }
        Ok(Self {
            items: items.into_iter(),
        })
    }

    /// The next item, in release order.
    pub fn next_item(&mut self) -> Option<ReleaseItem> {
        self.items.next()
    }

    /// Drain the remaining items into a vector.
    pub fn collect_items(self) -> Vec<ReleaseItem> {
        self.items.collect()
    }
}
