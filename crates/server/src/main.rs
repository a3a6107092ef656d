//! Aptforge server binary.

use anyhow::{Context, Result};
use aptforge_archive::Archive;
use aptforge_core::config::AppConfig;
use aptforge_server::{create_router, AppState};
use aptforge_signer::ReleaseSigner;
use aptforge_storage::BlobStore;
use clap::Parser;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Aptforge - a Debian-style package repository server
#[derive(Parser, Debug)]
#[command(name = "aptforged")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "APTFORGE_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Aptforge v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration (file is optional, env vars can provide/override everything)
    let config_path = std::path::Path::new(&args.config);
    let mut figment = Figment::new();
    if config_path.exists() {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::debug!("No config file found at {}", args.config);
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("APTFORGE_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!(e))
        .context("invalid configuration")?;

    let store = Arc::new(
        BlobStore::open(config.repo.root.join("store"), config.repo.root.join("tmp"))
            .await
            .context("failed to open blob store")?,
    );
    tracing::info!(root = %config.repo.root.display(), "Blob store opened");

    let signer = match &config.signing {
        Some(signing) => {
            let signer = ReleaseSigner::from_config(signing)
                .context("failed to load signing key")?;
            tracing::info!(key_name = signer.key_name(), "Loaded signing key");
            tracing::info!("Public key: {}", signer.public_key_str());
            Some(signer)
        }
        None => {
            tracing::warn!("No signing key configured, releases will be unsigned");
            None
        }
    };

    let archive = Arc::new(
        Archive::new(store.clone(), &config.repo, signer)
            .context("failed to initialize archive")?,
    );

    let bind = config.server.bind.clone();
    let state = AppState::new(config, store, archive);

    let _sweeper = state.spawn_session_sweeper();
    tracing::info!("Session sweeper spawned");

    let app = create_router(state);

    let addr: SocketAddr = bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    axum::serve(listener, app).await?;

    Ok(())
}
