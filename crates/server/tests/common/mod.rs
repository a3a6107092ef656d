//! Common test utilities.

use aptforge_archive::Archive;
use aptforge_core::config::AppConfig;
use aptforge_core::StoreId;
use aptforge_server::{create_router, AppState};
use aptforge_storage::BlobStore;
use std::sync::Arc;

/// An in-process server instance over a temporary repository root.
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp: tempfile::TempDir,
}

impl TestServer {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(customize: impl FnOnce(&mut AppConfig)) -> Self {
        let temp = tempfile::tempdir().unwrap();
        let mut config = AppConfig::for_testing(temp.path());
        customize(&mut config);

        let store = Arc::new(
            BlobStore::open(
                config.repo.root.join("store"),
                config.repo.root.join("tmp"),
            )
            .await
            .unwrap(),
        );
        let archive = Arc::new(Archive::new(store.clone(), &config.repo, None).unwrap());
        let state = AppState::new(config, store, archive);
        let router = create_router(state.clone());
        Self {
            router,
            state,
            _temp: temp,
        }
    }
}

pub const BOUNDARY: &str = "aptforge-test-boundary";

/// Hand-build a multipart/form-data body from (filename, content) pairs.
pub fn multipart_body(parts: &[(&str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (filename, data) in parts {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; \
                 name=\"file\"; filename=\"{filename}\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={BOUNDARY}")
}

/// A manifest declaring a single binary package file with its digest.
pub fn manifest_for(source: &str, version: &str, file: &str, content: &[u8]) -> String {
    format!(
        "Source: {source}\nVersion: {version}\nDistribution: unstable\n\
         Architecture: amd64\nChecksums-Sha256:\n {} {} {file}\n",
        StoreId::compute(content).to_hex(),
        content.len(),
    )
}
