//! Branch listing and history handlers.

use crate::error::ApiResult;
use crate::state::AppState;
use aptforge_archive::LogEntry;
use axum::extract::{Path, State};
use axum::Json;

/// `GET /dists` returns the names of all published branches.
pub async fn list_dists(State(state): State<AppState>) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(state.archive.dists().await?))
}

/// `GET /dists/{branch}/log` returns the release chain, newest first,
/// truncated by the trim counter.
pub async fn get_branch_log(
    State(state): State<AppState>,
    Path(branch): Path<String>,
) -> ApiResult<Json<Vec<LogEntry>>> {
    Ok(Json(state.archive.history(&branch).await?))
}
