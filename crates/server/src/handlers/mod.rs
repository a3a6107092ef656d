//! HTTP request handlers.

pub mod dists;
pub mod download;
pub mod upload;

pub use dists::{get_branch_log, list_dists};
pub use download::get_repo_file;
pub use upload::{continue_session, create_upload, create_upload_default, get_session};
