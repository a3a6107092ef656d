//! Published release items and index ordering.

use crate::hash::StoreId;
use crate::version::DebVersion;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Differentiates binary and source repository items.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    /// A binary package (one .deb file).
    Binary,
    /// A source package (a .dsc and its companion files).
    Source,
}

/// One file making up part of a release item. A binary item has
/// exactly one file; a source item may have several.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseItemFile {
    /// File name as it appears in the pool.
    pub name: String,
    /// Blob store id of the file content.
    pub id: StoreId,
}

/// One published package entity within a release snapshot.
///
/// The (kind, name, version, architecture) tuple uniquely identifies
/// an item within a snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseItem {
    pub kind: ItemKind,
    pub name: String,
    pub version: DebVersion,
    pub component: String,
    pub architecture: String,
    /// Blob store id of the item's control/metadata stanza.
    pub control_id: StoreId,
    pub files: Vec<ReleaseItemFile>,
}

impl ReleaseItem {
    /// Whether two items name the same (kind, name, version, arch)
    /// identity, regardless of content.
    pub fn same_identity(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.name == other.name
            && self.architecture == other.architecture
            && self.version == other.version
    }

    /// Whether two items carry identical content.
    pub fn same_content(&self, other: &Self) -> bool {
        self.control_id == other.control_id && self.files == other.files
    }
}

/// The order items appear in a release index: name, then
/// architecture, then *descending* version, so the newest version of
/// a package comes first and prune scans can drop low-ranked tails.
pub fn release_index_cmp(a: &ReleaseItem, b: &ReleaseItem) -> Ordering {
    a.name
        .cmp(&b.name)
        .then_with(|| a.architecture.cmp(&b.architecture))
        .then_with(|| b.version.cmp(&a.version))
        .then_with(|| a.kind_rank().cmp(&b.kind_rank()))
}

impl ReleaseItem {
    fn kind_rank(&self) -> u8 {
        match self.kind {
            ItemKind::Binary => 0,
            ItemKind::Source => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, version: &str, arch: &str) -> ReleaseItem {
        ReleaseItem {
            kind: ItemKind::Binary,
            name: name.to_string(),
            version: DebVersion::parse(version).unwrap(),
            component: "main".to_string(),
            architecture: arch.to_string(),
            control_id: StoreId::compute(format!("{name} {version} {arch}").as_bytes()),
            files: vec![],
        }
    }

    #[test]
    fn test_index_order_name_then_arch_then_version_desc() {
        let mut items = vec![
            item("zsh", "1.0", "amd64"),
            item("bash", "5.0", "amd64"),
            item("bash", "5.2", "amd64"),
            item("bash", "5.2", "arm64"),
        ];
        items.sort_by(release_index_cmp);
        let got: Vec<_> = items
            .iter()
            .map(|i| format!("{}/{}/{}", i.name, i.architecture, i.version))
            .collect();
        assert_eq!(
            got,
            vec![
                "bash/amd64/5.2",
                "bash/amd64/5.0",
                "bash/arm64/5.2",
                "zsh/amd64/1.0",
            ]
        );
    }

    #[test]
    fn test_identity_ignores_content() {
        let a = item("pkg", "1.0", "amd64");
        let mut b = a.clone();
        b.control_id = StoreId::compute(b"different control");
        assert!(a.same_identity(&b));
        assert!(!a.same_content(&b));
    }
}
