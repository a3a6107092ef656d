//! HTTP server for the aptforge package repository.
//!
//! This crate wires the blob store, session manager, governor, and
//! release chain engine into an axum application:
//! - Downloads of the published tree under shared read permits
//! - Multipart upload sessions with manifest verification
//! - A single serializer task performing every publish
//! - Pre/post generation hooks

pub mod error;
pub mod governor;
pub mod handlers;
pub mod hooks;
pub mod routes;
pub mod sessions;
pub mod state;
pub mod updater;

pub use error::{ApiError, ApiResult};
pub use governor::Governor;
pub use routes::create_router;
pub use sessions::SessionManager;
pub use state::AppState;
