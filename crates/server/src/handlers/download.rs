//! Download handler for the published tree.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::Response;
use bytes::Bytes;
use std::path::{Component, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::debug;

const STREAM_CHUNK_SIZE: usize = 64 * 1024;

static GET_REQUESTS: AtomicU64 = AtomicU64::new(0);

/// Serve a file out of the published pool/dists tree.
///
/// The read permit is acquired before the file is opened and travels
/// inside the response body stream, so a publish cannot run while any
/// byte of this response is still being produced.
pub async fn get_repo_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> ApiResult<Response> {
    let requests = GET_REQUESTS.fetch_add(1, Ordering::Relaxed) + 1;
    let rel = sanitize(&path)?;

    let guard = state.governor.read().await;

    let full = state.archive.public_dir().join(rel);
    let mut file = fs::File::open(&full).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ApiError::NotFound(path.clone())
        } else {
            ApiError::Internal(e.to_string())
        }
    })?;
    let meta = file
        .metadata()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if meta.is_dir() {
        return Err(ApiError::NotFound(path.clone()));
    }

    debug!(path = %path, requests, "serving download");

    let stream = async_stream::try_stream! {
        let _guard = guard;
        let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            yield Bytes::copy_from_slice(&buf[..n]);
        }
    };
    let stream: std::pin::Pin<
        Box<dyn futures::Stream<Item = Result<Bytes, std::io::Error>> + Send>,
    > = Box::pin(stream);

    Response::builder()
        .header(header::CONTENT_LENGTH, meta.len())
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// Reject anything that could escape the published tree.
fn sanitize(path: &str) -> ApiResult<PathBuf> {
    let candidate = std::path::Path::new(path);
    let mut out = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => out.push(part),
            _ => return Err(ApiError::BadRequest(format!("invalid path: {path:?}"))),
        }
    }
    if out.as_os_str().is_empty() {
        return Err(ApiError::NotFound(path.to_string()));
    }
    Ok(out)
}
