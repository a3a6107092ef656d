//! Route configuration.

use crate::handlers;
use crate::state::AppState;
use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Published tree, served under a shared read permit.
        .route("/repo/{*path}", get(handlers::get_repo_file))
        // Branch discovery and history
        .route("/dists", get(handlers::list_dists))
        .route("/dists/{branch}/log", get(handlers::get_branch_log))
        // Upload control plane
        .route(
            "/upload",
            axum::routing::post(handlers::create_upload_default)
                .put(handlers::create_upload_default),
        )
        .route(
            "/dists/{branch}/upload",
            axum::routing::post(handlers::create_upload).put(handlers::create_upload),
        )
        .route(
            "/dists/{branch}/upload/{session}",
            get(handlers::get_session)
                .post(handlers::continue_session)
                .put(handlers::continue_session),
        )
        // Package uploads are arbitrarily large; sessions already
        // bound what a client may send via the manifest.
        .layer(DefaultBodyLimit::max(1 << 30))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
