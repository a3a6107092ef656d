//! The serializer task.
//!
//! All publishes funnel through one task draining an mpsc channel in
//! FIFO order, so two completed uploads on the same branch are applied
//! one after the other, each seeing the previous one's release as its
//! parent. The task holds the governor's write permit for the whole
//! merge-publish-materialize sequence. A pre-generation hook failure
//! aborts before any published state changes and leaves the session in
//! the table for a retry; a post-generation hook failure is reported
//! in the outcome but the publish stands.

use crate::error::{ApiError, ApiResult};
use crate::governor::Governor;
use crate::hooks::{HookOutcome, HookRunner};
use crate::sessions::SessionManager;
use aptforge_archive::{Archive, ReleaseSummary};
use aptforge_core::SessionId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

/// What a completed publish looked like, hooks included.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdateOutcome {
    pub summary: ReleaseSummary,
    pub pre_gen: HookOutcome,
    pub post_gen: HookOutcome,
}

/// One enqueued publish request.
pub struct UpdateRequest {
    pub session: SessionId,
    pub resp: oneshot::Sender<ApiResult<UpdateOutcome>>,
}

/// Handle for enqueuing publish requests.
pub type UpdateSender = mpsc::Sender<UpdateRequest>;

/// Spawn the serializer task. The returned sender is the only way to
/// trigger a publish.
pub fn spawn_updater(
    governor: Governor,
    sessions: Arc<SessionManager>,
    archive: Arc<Archive>,
    pre_gen: Arc<dyn HookRunner>,
    post_gen: Arc<dyn HookRunner>,
) -> UpdateSender {
    let (tx, mut rx) = mpsc::channel::<UpdateRequest>(32);
    tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            let outcome = process(
                &governor, &sessions, &archive, &pre_gen, &post_gen, request.session,
            )
            .await;
            // The requester may have disconnected; the publish stands
            // either way.
            if request.resp.send(outcome).is_err() {
                warn!(session_id = %request.session, "publish outcome undeliverable");
            }
        }
        info!("serializer task shutting down");
    });
    tx
}

async fn process(
    governor: &Governor,
    sessions: &SessionManager,
    archive: &Archive,
    pre_gen: &Arc<dyn HookRunner>,
    post_gen: &Arc<dyn HookRunner>,
    session: SessionId,
) -> ApiResult<UpdateOutcome> {
    let (branch, source, version) = sessions.describe(session).await?;
    let hook_args = vec![branch, source, version];

    let _write = governor.write().await;

    let pre = pre_gen.run(&hook_args).await;
    if !pre.success {
        // Nothing published; the session stays live for a retry.
        return Err(ApiError::HookFailed(pre.output));
    }

    let upload = sessions.take_complete(session).await?;
    let summary = archive.add_upload(&upload).await?;

    let post = post_gen.run(&hook_args).await;
    if !post.success {
        error!(
            session_id = %session,
            output = %post.output,
            "post-generation hook failed after publish"
        );
    }

    Ok(UpdateOutcome {
        summary,
        pre_gen: pre,
        post_gen: post,
    })
}
