//! The upload session manager.
//!
//! A session is created from a manifest (or synthesized for a lone
//! package file) and accumulates the declared files one by one. File
//! content streams through a staged write while its digest is
//! computed; the blob only reaches the shared store once the digest
//! agrees with the manifest, so a mismatch rejects that file without
//! touching deduplicated content other sessions or published releases
//! share. A session whose last declared file arrives flips to complete
//! and is handed to the serializer; one that never completes is
//! removed by the TTL sweep. Swept sessions leave their committed
//! blobs in place: ids are content-addressed and may be referenced
//! elsewhere.
//!
//! The table maps session ids to individually locked sessions, so
//! uploads into different sessions never contend. Per-session locks
//! make concurrent uploads of different files of one manifest
//! linearizable: each slot fills at most once.

use crate::error::{ApiError, ApiResult};
use crate::hooks::HookRunner;
use aptforge_archive::CompletedUpload;
use aptforge_core::changes::{Changes, ClearSigned};
use aptforge_core::config::{TrustedKey, UploadPolicy};
use aptforge_core::{SessionId, SessionStatus, SessionSummary, StoreId};
use aptforge_storage::BlobStore;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

struct Session {
    branch: String,
    changes: Changes,
    received: Vec<(String, StoreId)>,
    expires_at: OffsetDateTime,
    complete: bool,
}

impl Session {
    fn outstanding(&self) -> Vec<String> {
        self.changes
            .files
            .iter()
            .map(|f| f.name.clone())
            .filter(|name| !self.received.iter().any(|(n, _)| n == name))
            .collect()
    }

    fn expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }
}

/// Tracks in-flight upload sessions for the whole process.
pub struct SessionManager {
    store: Arc<BlobStore>,
    policy: UploadPolicy,
    trusted_keys: Vec<TrustedKey>,
    ttl: Duration,
    upload_hook: Arc<dyn HookRunner>,
    sessions: Mutex<HashMap<SessionId, Arc<Mutex<Session>>>>,
}

impl SessionManager {
    pub fn new(
        store: Arc<BlobStore>,
        policy: UploadPolicy,
        trusted_keys: Vec<TrustedKey>,
        ttl: Duration,
        upload_hook: Arc<dyn HookRunner>,
    ) -> Self {
        Self {
            store,
            policy,
            trusted_keys,
            ttl,
            upload_hook,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Create a session from a manifest body, verifying its signature
    /// per the upload policy.
    #[instrument(skip(self, manifest), fields(branch))]
    pub async fn new_session(&self, branch: &str, manifest: &[u8]) -> ApiResult<SessionSummary> {
        let text = std::str::from_utf8(manifest)
            .map_err(|_| ApiError::BadRequest("manifest is not valid UTF-8".to_string()))?;

        let changes = if ClearSigned::is_armored(text) {
            let doc = ClearSigned::split(text)?;
            let validated = aptforge_signer::verify_clearsigned(&doc, &self.trusted_keys)
                .map_err(|_| ApiError::Unverified)?;
            if self.policy.require_signed && !validated {
                return Err(ApiError::Unverified);
            }
            let mut changes = Changes::parse(&doc.body)?;
            changes.signed = true;
            changes.validated = validated;
            changes
        } else {
            if self.policy.require_signed {
                return Err(ApiError::Unsigned);
            }
            Changes::parse(text)?
        };

        self.insert(branch, changes).await
    }

    /// Create a session for a lone package file. Only permitted when
    /// the policy allows it and the name is a well-formed `.deb`.
    #[instrument(skip(self), fields(branch, filename))]
    pub async fn new_lone_session(&self, branch: &str, filename: &str) -> ApiResult<SessionSummary> {
        if !self.policy.accept_lone_debs {
            return Err(ApiError::BadRequest(
                "lone package uploads are not enabled".to_string(),
            ));
        }
        let changes = Changes::from_lone_package(filename)?;
        self.insert(branch, changes).await
    }

    async fn insert(&self, branch: &str, changes: Changes) -> ApiResult<SessionSummary> {
        let id = SessionId::new();
        let session = Session {
            branch: branch.to_string(),
            changes,
            received: Vec::new(),
            expires_at: OffsetDateTime::now_utc() + self.ttl,
            complete: false,
        };
        let summary = summarize(id, &session);
        info!(session_id = %id, branch, source = %session.changes.source, "created upload session");
        self.sessions
            .lock()
            .await
            .insert(id, Arc::new(Mutex::new(session)));
        Ok(summary)
    }

    async fn lookup(&self, id: SessionId) -> ApiResult<Arc<Mutex<Session>>> {
        self.sessions
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| ApiError::UnknownSession(id.to_string()))
    }

    /// Stream one declared file into the blob store.
    ///
    /// The content is hashed while it is staged; a digest that
    /// disagrees with the manifest aborts the staged write before it
    /// reaches the store and leaves the slot empty for a retry. The
    /// upload hook, when configured, can likewise veto the file.
    #[instrument(skip(self, stream), fields(session_id = %id, name))]
    pub async fn add_file<S, E>(
        &self,
        id: SessionId,
        name: &str,
        mut stream: S,
    ) -> ApiResult<SessionStatus>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        let session = self.lookup(id).await?;
        let mut session = session.lock().await;

        if session.expired(OffsetDateTime::now_utc()) {
            return Err(ApiError::SessionExpired);
        }
        let Some(declared) = session.changes.file(name).cloned() else {
            return Err(ApiError::UnexpectedFile(name.to_string()));
        };
        if session.received.iter().any(|(n, _)| n == name) {
            return Err(ApiError::AlreadyUploaded(name.to_string()));
        }

        let mut writer = self.store.open_for_write().await?;
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    writer.abort().await?;
                    return Err(ApiError::BadRequest(format!("upload stream failed: {e}")));
                }
            };
            writer.write(&chunk).await?;
        }

        let verify = self.policy.verify_checksums
            && !(self.policy.signed_sufficient && session.changes.validated);
        if verify {
            if let Some(expected) = &declared.sha256 {
                let actual = writer.current_id().to_hex();
                if *expected != actual {
                    writer.abort().await?;
                    return Err(ApiError::ChecksumMismatch {
                        name: name.to_string(),
                        expected: expected.clone(),
                        actual,
                    });
                }
            }
        }

        let hook_args = vec![session.branch.clone(), name.to_string()];
        let hook = self.upload_hook.run(&hook_args).await;
        if !hook.success {
            writer.abort().await?;
            return Err(ApiError::HookFailed(hook.output));
        }

        let blob = writer.commit().await?;
        session.received.push((name.to_string(), blob));
        debug!(session_id = %id, name, blob = %blob, "file accepted");

        if session.outstanding().is_empty() {
            session.complete = true;
            Ok(SessionStatus::Complete)
        } else {
            Ok(SessionStatus::Accepted)
        }
    }

    /// Current session state for the client.
    pub async fn get(&self, id: SessionId) -> ApiResult<SessionSummary> {
        let session = self.lookup(id).await?;
        let session = session.lock().await;
        Ok(summarize(id, &session))
    }

    /// Whether every declared file has been received and verified.
    pub async fn is_complete(&self, id: SessionId) -> ApiResult<bool> {
        let session = self.lookup(id).await?;
        let complete = session.lock().await.complete;
        Ok(complete)
    }

    /// The branch a session targets, and its package identity, for
    /// hook arguments.
    pub async fn describe(&self, id: SessionId) -> ApiResult<(String, String, String)> {
        let session = self.lookup(id).await?;
        let session = session.lock().await;
        Ok((
            session.branch.clone(),
            session.changes.source.clone(),
            session.changes.version.to_string(),
        ))
    }

    /// Remove a completed session from the table and hand it over for
    /// publication. Fails if the session is not complete.
    pub async fn take_complete(&self, id: SessionId) -> ApiResult<CompletedUpload> {
        let mut table = self.sessions.lock().await;
        let entry = table
            .get(&id)
            .cloned()
            .ok_or_else(|| ApiError::UnknownSession(id.to_string()))?;
        {
            let session = entry.lock().await;
            if !session.complete {
                return Err(ApiError::Incomplete);
            }
        }
        table.remove(&id);
        drop(table);

        let session = entry.lock().await;
        Ok(CompletedUpload {
            branch: session.branch.clone(),
            changes: session.changes.clone(),
            files: session.received.clone(),
        })
    }

    /// Drop expired incomplete sessions. Returns how many sessions
    /// were removed.
    ///
    /// The table lock is only held to snapshot and to remove, never
    /// across a session lock: a session busy with an upload is skipped
    /// and reconsidered on the next sweep. Committed blobs stay in the
    /// store; their ids are content-addressed and may be shared with
    /// published releases.
    pub async fn sweep(&self) -> usize {
        let now = OffsetDateTime::now_utc();
        let entries: Vec<(SessionId, Arc<Mutex<Session>>)> = {
            let table = self.sessions.lock().await;
            table.iter().map(|(id, e)| (*id, e.clone())).collect()
        };

        let mut dead = Vec::new();
        for (id, entry) in entries {
            // add_file rejects expired sessions, so an expired session
            // cannot become complete after this check.
            let Ok(session) = entry.try_lock() else {
                continue;
            };
            if session.expired(now) && !session.complete {
                info!(session_id = %id, branch = %session.branch, "expiring upload session");
                dead.push(id);
            }
        }

        let mut table = self.sessions.lock().await;
        dead.into_iter()
            .filter(|id| table.remove(id).is_some())
            .count()
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}

fn summarize(id: SessionId, session: &Session) -> SessionSummary {
    SessionSummary {
        session_id: id,
        session_url: format!("/dists/{}/upload/{}", session.branch, id),
        branch: session.branch.clone(),
        source: session.changes.source.clone(),
        version: session.changes.version.to_string(),
        received: session.received.iter().map(|(n, _)| n.clone()).collect(),
        outstanding: session.outstanding(),
        complete: session.complete,
        expires_at: session.expires_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{FnHook, HookOutcome, NoopHook};
    use aptforge_core::StoreId;

    fn body(data: &[u8]) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Unpin {
        futures::stream::iter(vec![Ok(Bytes::copy_from_slice(data))])
    }

    fn manifest_for(content: &[u8], name: &str) -> String {
        format!(
            "Source: hello\nVersion: 1.0-1\nArchitecture: amd64\nChecksums-Sha256:\n {} {} {}\n",
            StoreId::compute(content).to_hex(),
            content.len(),
            name,
        )
    }

    async fn manager(policy: UploadPolicy, ttl_secs: i64) -> (tempfile::TempDir, SessionManager) {
        manager_with_hook(policy, ttl_secs, Arc::new(NoopHook)).await
    }

    async fn manager_with_hook(
        policy: UploadPolicy,
        ttl_secs: i64,
        hook: Arc<dyn HookRunner>,
    ) -> (tempfile::TempDir, SessionManager) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            BlobStore::open(dir.path().join("store"), dir.path().join("tmp"))
                .await
                .unwrap(),
        );
        let manager =
            SessionManager::new(store, policy, Vec::new(), Duration::seconds(ttl_secs), hook);
        (dir, manager)
    }

    #[tokio::test]
    async fn test_session_accumulates_to_complete() {
        let (_dir, manager) = manager(UploadPolicy::default(), 3600).await;
        let content = b"deb content";
        let manifest = manifest_for(content, "hello_1.0-1_amd64.deb");

        let summary = manager
            .new_session("master", manifest.as_bytes())
            .await
            .unwrap();
        assert!(!summary.complete);
        assert_eq!(summary.outstanding, vec!["hello_1.0-1_amd64.deb"]);

        let status = manager
            .add_file(summary.session_id, "hello_1.0-1_amd64.deb", body(content))
            .await
            .unwrap();
        assert_eq!(status, SessionStatus::Complete);

        let up = manager.take_complete(summary.session_id).await.unwrap();
        assert_eq!(up.branch, "master");
        assert_eq!(up.files.len(), 1);
        assert_eq!(up.files[0].1, StoreId::compute(content));

        // Taking removed the session.
        assert!(matches!(
            manager.get(summary.session_id).await,
            Err(ApiError::UnknownSession(_))
        ));
    }

    #[tokio::test]
    async fn test_checksum_mismatch_leaves_slot_open() {
        let (_dir, manager) = manager(UploadPolicy::default(), 3600).await;
        let content = b"real content";
        let manifest = manifest_for(content, "hello_1.0-1_amd64.deb");
        let summary = manager
            .new_session("master", manifest.as_bytes())
            .await
            .unwrap();

        let err = manager
            .add_file(summary.session_id, "hello_1.0-1_amd64.deb", body(b"wrong"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::ChecksumMismatch { .. }));

        // The slot is still open; the correct bytes succeed.
        let status = manager
            .add_file(summary.session_id, "hello_1.0-1_amd64.deb", body(content))
            .await
            .unwrap();
        assert_eq!(status, SessionStatus::Complete);
    }

    #[tokio::test]
    async fn test_unexpected_and_duplicate_files_rejected() {
        let (_dir, manager) = manager(UploadPolicy::default(), 3600).await;
        let content = b"deb";
        let manifest = manifest_for(content, "hello_1.0-1_amd64.deb");
        let summary = manager
            .new_session("master", manifest.as_bytes())
            .await
            .unwrap();

        assert!(matches!(
            manager
                .add_file(summary.session_id, "undeclared.deb", body(b"x"))
                .await,
            Err(ApiError::UnexpectedFile(_))
        ));

        manager
            .add_file(summary.session_id, "hello_1.0-1_amd64.deb", body(content))
            .await
            .unwrap();
        assert!(matches!(
            manager
                .add_file(summary.session_id, "hello_1.0-1_amd64.deb", body(content))
                .await,
            Err(ApiError::AlreadyUploaded(_))
        ));
    }

    #[tokio::test]
    async fn test_lone_sessions_respect_policy() {
        let (_dir, manager) = manager(UploadPolicy::default(), 3600).await;
        assert!(matches!(
            manager.new_lone_session("master", "tool_1.0_amd64.deb").await,
            Err(ApiError::BadRequest(_))
        ));

        let policy = UploadPolicy {
            accept_lone_debs: true,
            ..UploadPolicy::default()
        };
        let (_dir, manager) = manager_with(policy, 3600).await;
        let summary = manager
            .new_lone_session("master", "tool_1.0_amd64.deb")
            .await
            .unwrap();
        assert_eq!(summary.source, "tool");
        // Lone packages declare no digest, any content completes.
        let status = manager
            .add_file(summary.session_id, "tool_1.0_amd64.deb", body(b"anything"))
            .await
            .unwrap();
        assert_eq!(status, SessionStatus::Complete);
    }

    async fn manager_with(
        policy: UploadPolicy,
        ttl_secs: i64,
    ) -> (tempfile::TempDir, SessionManager) {
        manager(policy, ttl_secs).await
    }

    #[tokio::test]
    async fn test_require_signed_rejects_plain_manifests() {
        let policy = UploadPolicy {
            require_signed: true,
            ..UploadPolicy::default()
        };
        let (_dir, manager) = manager(policy, 3600).await;
        let manifest = manifest_for(b"x", "hello_1.0-1_amd64.deb");
        assert!(matches!(
            manager.new_session("master", manifest.as_bytes()).await,
            Err(ApiError::Unsigned)
        ));
    }

    #[tokio::test]
    async fn test_checksum_mismatch_preserves_shared_blob() {
        let (_dir, manager) = manager(UploadPolicy::default(), 3600).await;
        let content = b"published bytes";
        let blob = manager.store.store_bytes(content).await.unwrap();

        // A manifest that declares the wrong digest for those bytes.
        let wrong = format!("{}{}", "0".repeat(63), "1");
        let manifest = format!(
            "Source: hello\nVersion: 1.0-1\nArchitecture: amd64\nChecksums-Sha256:\n {} {} {}\n",
            wrong,
            content.len(),
            "hello_1.0-1_amd64.deb",
        );
        let summary = manager
            .new_session("master", manifest.as_bytes())
            .await
            .unwrap();

        let err = manager
            .add_file(summary.session_id, "hello_1.0-1_amd64.deb", body(content))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::ChecksumMismatch { .. }));

        // The rejected upload never reached the store, so the blob
        // another release may point at is untouched.
        assert!(manager.store.contains(&blob).await.unwrap());
        assert_eq!(manager.store.read_bytes(&blob).await.unwrap(), &content[..]);
    }

    #[tokio::test]
    async fn test_upload_hook_failure_keeps_slot_open() {
        let reject = FnHook(|_: &[String]| HookOutcome {
            ran: true,
            success: false,
            exit_code: Some(1),
            output: "rejected".to_string(),
        });
        let (_dir, manager) =
            manager_with_hook(UploadPolicy::default(), 3600, Arc::new(reject)).await;
        let content = b"deb content";
        let manifest = manifest_for(content, "hello_1.0-1_amd64.deb");
        let summary = manager
            .new_session("master", manifest.as_bytes())
            .await
            .unwrap();

        let err = manager
            .add_file(summary.session_id, "hello_1.0-1_amd64.deb", body(content))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::HookFailed(_)));
        assert!(!manager
            .store
            .contains(&StoreId::compute(content))
            .await
            .unwrap());

        // The slot stays open for a retry.
        let outstanding = manager.get(summary.session_id).await.unwrap().outstanding;
        assert_eq!(outstanding, vec!["hello_1.0-1_amd64.deb"]);
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_sessions() {
        let (_dir, manager) = manager(UploadPolicy::default(), -1).await;
        let manifest = manifest_for(b"x", "hello_1.0-1_amd64.deb");
        let summary = manager
            .new_session("master", manifest.as_bytes())
            .await
            .unwrap();

        assert_eq!(manager.sweep().await, 1);
        assert!(matches!(
            manager.get(summary.session_id).await,
            Err(ApiError::UnknownSession(_))
        ));
    }

    #[tokio::test]
    async fn test_sweep_leaves_committed_blobs_in_store() {
        let (_dir, manager) = manager(UploadPolicy::default(), 3600).await;
        let content = b"first file";
        let manifest = format!(
            "Source: hello\nVersion: 1.0-1\nArchitecture: amd64\nChecksums-Sha256:\n {} {} {}\n {} {} {}\n",
            StoreId::compute(content).to_hex(),
            content.len(),
            "hello_1.0-1_amd64.deb",
            StoreId::compute(b"never sent").to_hex(),
            10,
            "hello_1.0-1.dsc",
        );
        let summary = manager
            .new_session("master", manifest.as_bytes())
            .await
            .unwrap();
        manager
            .add_file(summary.session_id, "hello_1.0-1_amd64.deb", body(content))
            .await
            .unwrap();

        // Force expiry without waiting out the ttl.
        {
            let entry = manager.lookup(summary.session_id).await.unwrap();
            entry.lock().await.expires_at = OffsetDateTime::now_utc() - Duration::seconds(1);
        }

        assert_eq!(manager.sweep().await, 1);
        // The committed blob is content-addressed and may back a
        // published release, so the sweep must not remove it.
        assert!(manager
            .store
            .contains(&StoreId::compute(content))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_sweep_skips_sessions_mid_upload() {
        let (_dir, manager) = manager(UploadPolicy::default(), -1).await;
        let manifest = manifest_for(b"x", "hello_1.0-1_amd64.deb");
        let busy = manager
            .new_session("master", manifest.as_bytes())
            .await
            .unwrap();
        let idle = manager
            .new_session("master", manifest.as_bytes())
            .await
            .unwrap();

        let entry = manager.lookup(busy.session_id).await.unwrap();
        let guard = entry.lock().await;

        // A held session lock must not stall the sweep.
        let removed = tokio::time::timeout(std::time::Duration::from_secs(5), manager.sweep())
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(manager.lookup(busy.session_id).await.is_ok());
        assert!(matches!(
            manager.lookup(idle.session_id).await,
            Err(ApiError::UnknownSession(_))
        ));

        drop(guard);
        assert_eq!(manager.sweep().await, 1);
    }

    #[tokio::test]
    async fn test_sweep_keeps_live_sessions() {
        let (_dir, manager) = manager(UploadPolicy::default(), 3600).await;
        let manifest = manifest_for(b"x", "hello_1.0-1_amd64.deb");
        manager
            .new_session("master", manifest.as_bytes())
            .await
            .unwrap();
        assert_eq!(manager.sweep().await, 0);
        assert_eq!(manager.len().await, 1);
    }
}
