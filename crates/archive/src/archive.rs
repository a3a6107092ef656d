//! The release chain engine.
//!
//! `Archive` owns everything between a completed upload session and a
//! published branch head: building release items from the uploaded
//! files, merging them into the branch's current index, pruning,
//! sealing the new index and release node, materializing the public
//! pool and `dists/` tree, and finally moving the branch ref. All of
//! that happens off to the side of the published tree; the ref update
//! at the end is the only step readers can observe.
//!
//! Callers serialize publishes per process; `Archive` itself performs
//! no locking.

use crate::error::{ArchiveError, ArchiveResult};
use crate::index::{IndexReader, IndexWriter};
use crate::prune::PruneRules;
use crate::release::Release;
use aptforge_core::changes::Changes;
use aptforge_core::config::RepoConfig;
use aptforge_core::release::{release_index_cmp, ItemKind, ReleaseItem, ReleaseItemFile};
use aptforge_core::StoreId;
use aptforge_signer::ReleaseSigner;
use aptforge_storage::{BlobStore, StorageError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::PathBuf;
use std::sync::Arc;
use time::format_description::well_known::Rfc2822;
use time::OffsetDateTime;
use tokio::fs;
use tracing::{info, instrument, warn};

/// A finished upload session, ready to merge into a branch.
#[derive(Clone, Debug)]
pub struct CompletedUpload {
    /// Target branch.
    pub branch: String,
    /// The parsed manifest the session was created with.
    pub changes: Changes,
    /// Uploaded file names and their sealed blob ids.
    pub files: Vec<(String, StoreId)>,
}

/// What a publish did, returned to the uploader.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReleaseSummary {
    /// Branch the release landed on.
    pub branch: String,
    /// Id of the release node the branch ref now names.
    pub release: StoreId,
    /// Id of the sealed item index.
    pub index: StoreId,
    /// Items in the published index.
    pub total_items: usize,
    /// Items this upload added.
    pub added: usize,
    /// Whether the publish changed the branch at all.
    pub changed: bool,
    /// When the release was sealed.
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
}

/// One entry of a branch's publication history.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogEntry {
    /// Release node id.
    pub id: StoreId,
    /// Sealed index id.
    pub index: StoreId,
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
    pub trim_after: u32,
    pub description: String,
}

/// The release chain engine for one repository root.
pub struct Archive {
    store: Arc<BlobStore>,
    public_dir: PathBuf,
    pool_pattern: Regex,
    prune: PruneRules,
    auto_trim: bool,
    auto_trim_length: u32,
    component: String,
    signer: Option<ReleaseSigner>,
}

impl Archive {
    /// Build an engine from repository configuration. Fails on
    /// unparseable pool or prune patterns.
    pub fn new(
        store: Arc<BlobStore>,
        repo: &RepoConfig,
        signer: Option<ReleaseSigner>,
    ) -> ArchiveResult<Self> {
        let pool_pattern = Regex::new(&format!("^(?:{})", repo.pool_pattern))
            .map_err(|e| ArchiveError::InvalidPattern(format!("{}: {e}", repo.pool_pattern)))?;
        let prune = PruneRules::parse(&repo.prune)?;
        Ok(Self {
            store,
            public_dir: repo.root.join("public"),
            pool_pattern,
            prune,
            auto_trim: repo.auto_trim,
            auto_trim_length: repo.auto_trim_length,
            component: repo.component.clone(),
            signer,
        })
    }

    /// The directory the HTTP layer serves downloads from.
    pub fn public_dir(&self) -> &PathBuf {
        &self.public_dir
    }

    /// Merge a completed upload into its branch and publish the
    /// resulting release.
    #[instrument(skip(self, upload), fields(branch = %upload.branch, source = %upload.changes.source))]
    pub async fn add_upload(&self, upload: &CompletedUpload) -> ArchiveResult<ReleaseSummary> {
        let branch = &upload.branch;
        let mut new_items = self.build_items(upload).await?;
        new_items.sort_by(release_index_cmp);

        let head = match self.store.get_ref(branch).await {
            Ok(id) => Some((id, Release::load(&self.store, &id).await?)),
            Err(StorageError::RefNotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };
        let existing = match &head {
            Some((_, release)) => {
                IndexReader::load(&self.store, &release.index)
                    .await?
                    .collect_items()
            }
            None => Vec::new(),
        };

        let (merged, added) = merge_items(existing, new_items)?;
        let merged = self.prune.apply(merged);

        let total_items = merged.len();
        let mut writer = IndexWriter::new();
        for item in &merged {
            writer.add(item.clone())?;
        }
        let index = writer.seal(&self.store).await?;

        if let Some((head_id, head_release)) = &head {
            if index == head_release.index {
                info!(branch, "publish is a no-op, branch unchanged");
                return Ok(ReleaseSummary {
                    branch: branch.clone(),
                    release: *head_id,
                    index,
                    total_items,
                    added: 0,
                    changed: false,
                    date: head_release.date,
                });
            }
        }

        self.materialize_pool(&merged).await?;

        let release = Release {
            parent: head.as_ref().map(|(id, _)| *id),
            index,
            date: OffsetDateTime::now_utc(),
            trim_after: if self.auto_trim {
                self.auto_trim_length
            } else {
                0
            },
            description: format!(
                "upload of {} {} to {branch}",
                upload.changes.source, upload.changes.version
            ),
        };
        let release_id = release.seal(&self.store).await?;

        self.write_dists(branch, &release_id, &release).await?;

        // The one externally visible step; everything above was staged.
        self.store.set_ref(branch, &release_id).await?;
        info!(branch, release = %release_id, added, total_items, "published release");

        Ok(ReleaseSummary {
            branch: branch.clone(),
            release: release_id,
            index,
            total_items,
            added,
            changed: true,
            date: release.date,
        })
    }

    /// The current head of a branch.
    pub async fn head(&self, branch: &str) -> ArchiveResult<(StoreId, Release)> {
        let id = self.store.get_ref(branch).await.map_err(|e| match e {
            StorageError::RefNotFound(_) => ArchiveError::BranchNotFound(branch.to_string()),
            e => e.into(),
        })?;
        let release = Release::load(&self.store, &id).await?;
        Ok((id, release))
    }

    /// All published items on a branch, in release order. Empty for a
    /// branch that has never been published.
    pub async fn items(&self, branch: &str) -> ArchiveResult<Vec<ReleaseItem>> {
        match self.head(branch).await {
            Ok((_, release)) => Ok(IndexReader::load(&self.store, &release.index)
                .await?
                .collect_items()),
            Err(ArchiveError::BranchNotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Walk a branch's history newest-first.
    ///
    /// The first nonzero `trim_after` encountered caps how many
    /// *further* ancestors the walk visits; the node carrying the cap
    /// does not count against it. A trimmed branch therefore exposes
    /// its head plus `trim_after` ancestors even though older nodes
    /// still exist as blobs.
    pub async fn history(&self, branch: &str) -> ArchiveResult<Vec<LogEntry>> {
        let (mut id, mut release) = self.head(branch).await?;
        let mut out = Vec::new();
        let mut remaining: Option<u32> = None;
        loop {
            out.push(LogEntry {
                id,
                index: release.index,
                date: release.date,
                trim_after: release.trim_after,
                description: release.description.clone(),
            });
            match remaining.as_mut() {
                None => {
                    if release.trim_after > 0 {
                        remaining = Some(release.trim_after);
                    }
                }
                Some(r) => {
                    *r -= 1;
                    if *r == 0 {
                        break;
                    }
                }
            }
            match release.parent {
                Some(parent) => {
                    id = parent;
                    release = Release::load(&self.store, &parent).await?;
                }
                None => break,
            }
        }
        Ok(out)
    }

    /// Names of all published branches.
    pub async fn dists(&self) -> ArchiveResult<Vec<String>> {
        let refs = self.store.list_refs().await?;
        Ok(refs.into_iter().map(|(name, _)| name).collect())
    }

    /// Build release items from the uploaded file set.
    ///
    /// Each `.deb` becomes a binary item keyed by its file name parts.
    /// A `.dsc`, when present, becomes one source item carrying every
    /// non-`.deb` file. Companion files without a `.dsc` are not
    /// indexed.
    async fn build_items(&self, upload: &CompletedUpload) -> ArchiveResult<Vec<ReleaseItem>> {
        let mut items = Vec::new();
        let mut source_files = Vec::new();
        let mut has_dsc = false;

        for (name, id) in &upload.files {
            if name.ends_with(".deb") {
                let (pkg, version, arch) = aptforge_core::changes::parse_package_filename(name)?;
                let files = vec![ReleaseItemFile {
                    name: name.clone(),
                    id: *id,
                }];
                let control_id = self.seal_control(&pkg, &version.to_string(), &arch, &files).await?;
                items.push(ReleaseItem {
                    kind: ItemKind::Binary,
                    name: pkg,
                    version,
                    component: self.component.clone(),
                    architecture: arch,
                    control_id,
                    files,
                });
            } else {
                if name.ends_with(".dsc") {
                    has_dsc = true;
                }
                source_files.push(ReleaseItemFile {
                    name: name.clone(),
                    id: *id,
                });
            }
        }

        if has_dsc {
            source_files.sort_by(|a, b| a.name.cmp(&b.name));
            let control_id = self
                .seal_control(
                    &upload.changes.source,
                    &upload.changes.version.to_string(),
                    "source",
                    &source_files,
                )
                .await?;
            items.push(ReleaseItem {
                kind: ItemKind::Source,
                name: upload.changes.source.clone(),
                version: upload.changes.version.clone(),
                component: self.component.clone(),
                architecture: "source".to_string(),
                control_id,
                files: source_files,
            });
        } else if !source_files.is_empty() {
            warn!(
                count = source_files.len(),
                "upload carries companion files without a .dsc, not indexing them"
            );
        }

        Ok(items)
    }

    /// Seal an item's control stanza. Content-addressing the stanza
    /// makes `same_content` comparisons a pair of id equality checks.
    async fn seal_control(
        &self,
        name: &str,
        version: &str,
        arch: &str,
        files: &[ReleaseItemFile],
    ) -> ArchiveResult<StoreId> {
        let mut stanza = format!(
            "Package: {name}\nVersion: {version}\nArchitecture: {arch}\nSHA256:\n"
        );
        for f in files {
            stanza.push_str(&format!(" {} {}\n", f.id, f.name));
        }
        Ok(self.store.store_bytes(stanza.as_bytes()).await?)
    }

    /// Hard-link every indexed file into the public pool.
    async fn materialize_pool(&self, items: &[ReleaseItem]) -> ArchiveResult<()> {
        for item in items {
            for file in &item.files {
                let bucket = self
                    .pool_pattern
                    .find(&file.name)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_else(|| "other".to_string());
                let target = self
                    .public_dir
                    .join("pool")
                    .join(&item.component)
                    .join(bucket)
                    .join(&file.name);
                self.store.link(&file.id, &[target]).await?;
            }
        }
        Ok(())
    }

    /// Write `dists/<branch>/Release` and its signatures.
    async fn write_dists(
        &self,
        branch: &str,
        release_id: &StoreId,
        release: &Release,
    ) -> ArchiveResult<()> {
        let index_size = self.store.size(&release.index).await?;
        let date = release
            .date
            .format(&Rfc2822)
            .map_err(|e| ArchiveError::Render(e.to_string()))?;
        let manifest = format!(
            "Origin: aptforge\n\
             Suite: {branch}\n\
             Date: {date}\n\
             Release: {release_id}\n\
             Description: {}\n\
             SHA256:\n {} {index_size} Index\n",
            release.description, release.index,
        );

        let dist_dir = self.public_dir.join("dists").join(branch);
        fs::create_dir_all(&dist_dir).await?;
        fs::write(dist_dir.join("Release"), manifest.as_bytes()).await?;

        if let Some(signer) = &self.signer {
            let sig = signer.sign_detached(manifest.as_bytes());
            fs::write(dist_dir.join("Release.sig"), sig.as_bytes()).await?;
            let inline = signer.clear_sign(&manifest);
            fs::write(dist_dir.join("InRelease"), inline.as_bytes()).await?;
        }
        Ok(())
    }
}

/// Two-way merge of a sorted existing index with sorted new items.
///
/// An incoming item whose identity already exists must carry identical
/// content; anything else is a conflict. Returns the merged list and
/// how many items were genuinely added.
fn merge_items(
    existing: Vec<ReleaseItem>,
    new: Vec<ReleaseItem>,
) -> ArchiveResult<(Vec<ReleaseItem>, usize)> {
    let mut out = Vec::with_capacity(existing.len() + new.len());
    let mut added = 0;
    let mut old = existing.into_iter().peekable();
    let mut new = new.into_iter().peekable();

    loop {
        match (old.peek(), new.peek()) {
            (Some(a), Some(b)) => {
                if a.same_identity(b) {
                    if !a.same_content(b) {
                        return Err(ArchiveError::ConflictingVersion {
                            name: b.name.clone(),
                            version: b.version.to_string(),
                            architecture: b.architecture.clone(),
                        });
                    }
                    new.next();
                    continue;
                }
                match release_index_cmp(a, b) {
                    Ordering::Less | Ordering::Equal => out.push(old.next().unwrap()),
                    Ordering::Greater => {
                        added += 1;
                        out.push(new.next().unwrap());
                    }
                }
            }
            (Some(_), None) => out.push(old.next().unwrap()),
            (None, Some(_)) => {
                added += 1;
                out.push(new.next().unwrap());
            }
            (None, None) => break,
        }
    }
    Ok((out, added))
}

#[cfg(test)]
mod tests {
    use super::*;
    use aptforge_core::config::AppConfig;

    async fn archive(auto_trim: bool, prune: &str) -> (tempfile::TempDir, Archive, Arc<BlobStore>) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::for_testing(dir.path());
        config.repo.auto_trim = auto_trim;
        config.repo.auto_trim_length = 2;
        config.repo.prune = prune.to_string();
        let store = Arc::new(
            BlobStore::open(dir.path().join("store"), dir.path().join("tmp"))
                .await
                .unwrap(),
        );
        let archive = Archive::new(store.clone(), &config.repo, None).unwrap();
        (dir, archive, store)
    }

    async fn upload(store: &BlobStore, branch: &str, pkg: &str, version: &str) -> CompletedUpload {
        upload_with_content(store, branch, pkg, version, &format!("{pkg} {version}")).await
    }

    async fn upload_with_content(
        store: &BlobStore,
        branch: &str,
        pkg: &str,
        version: &str,
        content: &str,
    ) -> CompletedUpload {
        let file = format!("{pkg}_{version}_amd64.deb");
        let id = store.store_bytes(content.as_bytes()).await.unwrap();
        CompletedUpload {
            branch: branch.to_string(),
            changes: Changes::from_lone_package(&file).unwrap(),
            files: vec![(file, id)],
        }
    }

    #[tokio::test]
    async fn test_first_publish_creates_branch() {
        let (dir, archive, store) = archive(false, "").await;
        let up = upload(&store, "master", "hello", "1.0-1").await;

        let summary = archive.add_upload(&up).await.unwrap();
        assert!(summary.changed);
        assert_eq!(summary.added, 1);
        assert_eq!(summary.total_items, 1);

        let (head_id, head) = archive.head("master").await.unwrap();
        assert_eq!(head_id, summary.release);
        assert!(head.parent.is_none());

        // Pool and dists trees exist on disk.
        let pool_file = dir
            .path()
            .join("public/pool/main/h/hello_1.0-1_amd64.deb");
        assert_eq!(std::fs::read(&pool_file).unwrap(), b"hello 1.0-1");
        assert!(dir.path().join("public/dists/master/Release").exists());
    }

    #[tokio::test]
    async fn test_republish_identical_is_a_noop() {
        let (_dir, archive, store) = archive(false, "").await;
        let up = upload(&store, "master", "hello", "1.0-1").await;

        let first = archive.add_upload(&up).await.unwrap();
        let second = archive.add_upload(&up).await.unwrap();
        assert!(!second.changed);
        assert_eq!(second.release, first.release);
        assert_eq!(second.added, 0);
        assert_eq!(archive.history("master").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_same_version_different_content_conflicts() {
        let (_dir, archive, store) = archive(false, "").await;
        let a = upload_with_content(&store, "master", "hello", "1.0-1", "content a").await;
        let b = upload_with_content(&store, "master", "hello", "1.0-1", "content b").await;

        archive.add_upload(&a).await.unwrap();
        assert!(matches!(
            archive.add_upload(&b).await,
            Err(ArchiveError::ConflictingVersion { .. })
        ));

        // The failed publish left the branch untouched.
        let items = archive.items("master").await.unwrap();
        assert_eq!(items.len(), 1);
    }

    #[tokio::test]
    async fn test_versions_accumulate_newest_first() {
        let (_dir, archive, store) = archive(false, "").await;
        for v in ["1.0-1", "2.0-1", "1.5-1"] {
            let up = upload(&store, "master", "hello", v).await;
            archive.add_upload(&up).await.unwrap();
        }
        let versions: Vec<_> = archive
            .items("master")
            .await
            .unwrap()
            .iter()
            .map(|i| i.version.to_string())
            .collect();
        assert_eq!(versions, vec!["2.0-1", "1.5-1", "1.0-1"]);
    }

    #[tokio::test]
    async fn test_prune_drops_old_versions() {
        let (_dir, archive, store) = archive(false, "*:2").await;
        for v in ["1.0-1", "1.1-1", "1.2-1"] {
            let up = upload(&store, "master", "hello", v).await;
            archive.add_upload(&up).await.unwrap();
        }
        let versions: Vec<_> = archive
            .items("master")
            .await
            .unwrap()
            .iter()
            .map(|i| i.version.to_string())
            .collect();
        assert_eq!(versions, vec!["1.2-1", "1.1-1"]);
    }

    #[tokio::test]
    async fn test_history_walks_parents_newest_first() {
        let (_dir, archive, store) = archive(false, "").await;
        for v in ["1.0-1", "1.1-1", "1.2-1"] {
            let up = upload(&store, "master", "hello", v).await;
            archive.add_upload(&up).await.unwrap();
        }
        let log = archive.history("master").await.unwrap();
        assert_eq!(log.len(), 3);
        assert!(log[0].description.contains("1.2-1"));
        assert!(log[2].description.contains("1.0-1"));
    }

    #[tokio::test]
    async fn test_history_honors_trim_counter() {
        let (_dir, archive, store) = archive(true, "").await;
        for v in ["1.0-1", "1.1-1", "1.2-1", "1.3-1"] {
            let up = upload(&store, "master", "hello", v).await;
            archive.add_upload(&up).await.unwrap();
        }
        // auto_trim_length = 2: the head plus two ancestors remain
        // addressable even though four nodes exist.
        let log = archive.history("master").await.unwrap();
        assert_eq!(log.len(), 3);
        assert!(log[0].description.contains("1.3-1"));
        assert!(log[1].description.contains("1.2-1"));
        assert!(log[2].description.contains("1.1-1"));
    }

    #[tokio::test]
    async fn test_unknown_branch() {
        let (_dir, archive, _store) = archive(false, "").await;
        assert!(matches!(
            archive.history("nope").await,
            Err(ArchiveError::BranchNotFound(_))
        ));
        assert!(archive.items("nope").await.unwrap().is_empty());
        assert!(archive.dists().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dists_lists_published_branches() {
        let (_dir, archive, store) = archive(false, "").await;
        let up = upload(&store, "stable", "hello", "1.0-1").await;
        archive.add_upload(&up).await.unwrap();
        let up = upload(&store, "testing", "hello", "1.1-1").await;
        archive.add_upload(&up).await.unwrap();
        assert_eq!(archive.dists().await.unwrap(), vec!["stable", "testing"]);
    }

    #[tokio::test]
    async fn test_source_items_group_dsc_companions() {
        let (_dir, archive, store) = archive(false, "").await;
        let dsc = store.store_bytes(b"dsc").await.unwrap();
        let tar = store.store_bytes(b"tar").await.unwrap();
        let manifest = "Source: hello\nVersion: 1.0-1\nChecksums-Sha256:\n \
                        0000000000000000000000000000000000000000000000000000000000000001 3 hello_1.0-1.dsc\n \
                        0000000000000000000000000000000000000000000000000000000000000002 3 hello_1.0-1.tar.gz\n";
        let up = CompletedUpload {
            branch: "master".to_string(),
            changes: Changes::parse(manifest).unwrap(),
            files: vec![
                ("hello_1.0-1.dsc".to_string(), dsc),
                ("hello_1.0-1.tar.gz".to_string(), tar),
            ],
        };
        archive.add_upload(&up).await.unwrap();

        let items = archive.items("master").await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].kind, ItemKind::Source);
        assert_eq!(items[0].architecture, "source");
        assert_eq!(items[0].files.len(), 2);
    }
}
