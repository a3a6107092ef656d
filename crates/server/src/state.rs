//! Application state shared across handlers.

use crate::governor::Governor;
use crate::hooks::{HookRunner, NoopHook, ScriptHook};
use crate::sessions::SessionManager;
use crate::updater::{spawn_updater, UpdateSender};
use aptforge_archive::Archive;
use aptforge_core::config::AppConfig;
use aptforge_storage::BlobStore;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// The blob store.
    pub store: Arc<BlobStore>,
    /// The release chain engine.
    pub archive: Arc<Archive>,
    /// Read/write admission gate over the published tree.
    pub governor: Governor,
    /// In-flight upload sessions.
    pub sessions: Arc<SessionManager>,
    /// Handle into the serializer task.
    pub updater: UpdateSender,
}

impl AppState {
    /// Assemble the state and spawn the serializer task.
    pub fn new(config: AppConfig, store: Arc<BlobStore>, archive: Arc<Archive>) -> Self {
        let governor = Governor::new(config.server.max_readers);
        let upload_hook = hook_from_config(&config.hooks.upload, config.hooks.timeout());
        let sessions = Arc::new(SessionManager::new(
            store.clone(),
            config.uploads.clone(),
            config.trusted_keys.clone(),
            config.server.session_ttl(),
            upload_hook,
        ));
        let pre_gen = hook_from_config(&config.hooks.pre_gen, config.hooks.timeout());
        let post_gen = hook_from_config(&config.hooks.post_gen, config.hooks.timeout());
        let updater = spawn_updater(
            governor.clone(),
            sessions.clone(),
            archive.clone(),
            pre_gen,
            post_gen,
        );
        Self {
            config: Arc::new(config),
            store,
            archive,
            governor,
            sessions,
            updater,
        }
    }

    /// Spawn the periodic session expiry sweep.
    pub fn spawn_session_sweeper(&self) -> JoinHandle<()> {
        let sessions = self.sessions.clone();
        let interval = self.config.server.sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = sessions.sweep().await;
                if removed > 0 {
                    debug!(removed, "session sweep");
                }
            }
        })
    }
}

fn hook_from_config(
    path: &Option<PathBuf>,
    timeout: std::time::Duration,
) -> Arc<dyn HookRunner> {
    match path {
        Some(path) => Arc::new(ScriptHook::new(path.clone(), timeout)),
        None => Arc::new(NoopHook),
    }
}
