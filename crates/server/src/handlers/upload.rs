//! Upload session handlers.
//!
//! Session creation accepts a multipart body carrying a `.changes`
//! manifest followed by any number of package files, or a lone `.deb`
//! when the policy allows it. Only the manifest is buffered; package
//! file content streams straight into the staged blob write as the
//! parts arrive. The response carries the session resource locator
//! and a session cookie; a client may continue either by the session
//! URL or by posting more files to the upload endpoint with the
//! cookie set. The moment the last declared file lands, the session
//! is queued on the serializer and the response blocks until the
//! publish outcome is known.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::updater::{UpdateOutcome, UpdateRequest};
use aptforge_core::{SessionId, SessionStatus};
use axum::extract::multipart::Field;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tokio::sync::oneshot;

/// Branch used when the upload path names none.
const DEFAULT_BRANCH: &str = "master";

/// `POST|PUT /dists/{branch}/upload`
pub async fn create_upload(
    State(state): State<AppState>,
    Path(branch): Path<String>,
    headers: HeaderMap,
    multipart: Multipart,
) -> ApiResult<Response> {
    create_upload_inner(state, branch, headers, multipart).await
}

/// `POST|PUT /upload`
pub async fn create_upload_default(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> ApiResult<Response> {
    create_upload_inner(state, DEFAULT_BRANCH.to_string(), headers, multipart).await
}

async fn create_upload_inner(
    state: AppState,
    branch: String,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<Response> {
    let mut session: Option<SessionId> = None;
    let mut created = false;
    let mut had_files = false;
    let mut status = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("malformed multipart body: {e}")))?
    {
        let name = field
            .file_name()
            .or(field.name())
            .map(str::to_string)
            .ok_or_else(|| ApiError::BadRequest("unnamed multipart part".to_string()))?;

        if name.ends_with(".changes") {
            if session.is_some() {
                return Err(ApiError::BadRequest(
                    "manifest must arrive before any package files".to_string(),
                ));
            }
            // Manifests are small; everything else streams.
            let manifest = field.bytes().await.map_err(|e| {
                ApiError::BadRequest(format!("failed to read part {name:?}: {e}"))
            })?;
            let summary = state.sessions.new_session(&branch, &manifest).await?;
            session = Some(summary.session_id);
            created = true;
            continue;
        }

        let id = match session {
            Some(id) => id,
            None => {
                if let Some(id) = cookie_session(&state, &headers) {
                    session = Some(id);
                    id
                } else if name.ends_with(".deb") {
                    let summary = state.sessions.new_lone_session(&branch, &name).await?;
                    session = Some(summary.session_id);
                    created = true;
                    summary.session_id
                } else {
                    return Err(ApiError::BadRequest(
                        "upload carries no manifest and is not a lone package".to_string(),
                    ));
                }
            }
        };

        had_files = true;
        match stream_field(&state, id, &name, field).await {
            Ok(s) => status = Some(s),
            Err(err) => return Ok(err.into_session_response(&branch, id)),
        }
    }

    let Some(id) = session else {
        return Err(ApiError::BadRequest("upload carries no files".to_string()));
    };
    if created {
        respond_created(&state, &branch, id, had_files, status).await
    } else {
        respond_continue(&state, id, status).await
    }
}

/// `GET /dists/{branch}/upload/{session}`
pub async fn get_session(
    State(state): State<AppState>,
    Path((_branch, session)): Path<(String, String)>,
) -> ApiResult<Response> {
    let id = SessionId::parse(&session)?;
    let summary = state.sessions.get(id).await?;
    Ok(Json(summary).into_response())
}

/// `POST|PUT /dists/{branch}/upload/{session}`
pub async fn continue_session(
    State(state): State<AppState>,
    Path((branch, session)): Path<(String, String)>,
    mut multipart: Multipart,
) -> ApiResult<Response> {
    let id = SessionId::parse(&session)?;

    let mut status = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("malformed multipart body: {e}")))?
    {
        let name = field
            .file_name()
            .or(field.name())
            .map(str::to_string)
            .ok_or_else(|| ApiError::BadRequest("unnamed multipart part".to_string()))?;
        match stream_field(&state, id, &name, field).await {
            Ok(s) => status = Some(s),
            Err(err) => return Ok(err.into_session_response(&branch, id)),
        }
    }

    respond_continue(&state, id, status).await
}

/// Pipe one multipart part into the session as it arrives off the
/// wire, without buffering the whole part.
async fn stream_field(
    state: &AppState,
    id: SessionId,
    name: &str,
    mut field: Field<'_>,
) -> ApiResult<SessionStatus> {
    let stream = async_stream::try_stream! {
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))?
        {
            yield chunk;
        }
    };
    futures::pin_mut!(stream);
    state
        .sessions
        .add_file::<_, std::io::Error>(id, name, stream)
        .await
}

async fn respond_created(
    state: &AppState,
    branch: &str,
    id: SessionId,
    had_files: bool,
    status: Option<SessionStatus>,
) -> ApiResult<Response> {
    if status == Some(SessionStatus::Complete) {
        let outcome = publish(state, id).await?;
        return Ok((StatusCode::OK, Json(outcome)).into_response());
    }

    let summary = state.sessions.get(id).await?;
    let cookie = format!(
        "{}={}; Path=/dists/{}/upload",
        state.config.server.cookie_name, id, branch
    );
    let status = if had_files {
        StatusCode::ACCEPTED
    } else {
        StatusCode::CREATED
    };
    Ok((
        status,
        [
            (header::SET_COOKIE, cookie),
            (header::LOCATION, summary.session_url.clone()),
        ],
        Json(summary),
    )
        .into_response())
}

async fn respond_continue(
    state: &AppState,
    id: SessionId,
    status: Option<SessionStatus>,
) -> ApiResult<Response> {
    if status == Some(SessionStatus::Complete) {
        let outcome = publish(state, id).await?;
        return Ok((StatusCode::OK, Json(outcome)).into_response());
    }
    let summary = state.sessions.get(id).await?;
    Ok((StatusCode::ACCEPTED, Json(summary)).into_response())
}

/// Enqueue a completed session on the serializer and wait for the
/// publish outcome.
async fn publish(state: &AppState, id: SessionId) -> ApiResult<UpdateOutcome> {
    let (tx, rx) = oneshot::channel();
    state
        .updater
        .send(UpdateRequest {
            session: id,
            resp: tx,
        })
        .await
        .map_err(|_| ApiError::Internal("serializer unavailable".to_string()))?;
    rx.await
        .map_err(|_| ApiError::Internal("serializer dropped the request".to_string()))?
}

fn cookie_session(state: &AppState, headers: &HeaderMap) -> Option<SessionId> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    for pair in raw.split(';') {
        let Some((name, value)) = pair.trim().split_once('=') else {
            continue;
        };
        if name == state.config.server.cookie_name {
            return SessionId::parse(value).ok();
        }
    }
    None
}
