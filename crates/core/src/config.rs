//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

/// HTTP server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:3000").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum number of concurrently admitted download readers.
    #[serde(default = "default_max_readers")]
    pub max_readers: usize,
    /// Upload session time-to-live in seconds.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    /// Interval between expiry sweeps of the session table, seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Name of the session cookie set on upload creation.
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_max_readers() -> usize {
    64
}

fn default_session_ttl_secs() -> u64 {
    3600
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_cookie_name() -> String {
    "aptforge-session".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_readers: default_max_readers(),
            session_ttl_secs: default_session_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            cookie_name: default_cookie_name(),
        }
    }
}

impl ServerConfig {
    /// Get the session TTL as a Duration.
    pub fn session_ttl(&self) -> Duration {
        let secs = i64::try_from(self.session_ttl_secs).unwrap_or(i64::MAX);
        Duration::seconds(secs)
    }

    /// Get the sweep interval as a std Duration.
    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Repository layout and retention configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Repository root; the blob store, staging area and public tree
    /// all live beneath it.
    pub root: PathBuf,
    /// Regex whose leading match on a file name chooses its pool
    /// bucket directory (e.g. `[a-z]` buckets by first letter).
    #[serde(default = "default_pool_pattern")]
    pub pool_pattern: String,
    /// Prune rules, comma-separated `glob:keep` entries; empty keeps
    /// everything.
    #[serde(default)]
    pub prune: String,
    /// Whether new releases carry an automatic trim counter.
    #[serde(default)]
    pub auto_trim: bool,
    /// History length kept addressable when auto-trim is on.
    #[serde(default = "default_auto_trim_length")]
    pub auto_trim_length: u32,
    /// Component new items are filed under.
    #[serde(default = "default_component")]
    pub component: String,
}

fn default_pool_pattern() -> String {
    "[a-z0-9]".to_string()
}

fn default_auto_trim_length() -> u32 {
    10
}

fn default_component() -> String {
    "main".to_string()
}

/// Per-branch upload verification policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadPolicy {
    /// Require manifests to arrive signed by a trusted key.
    #[serde(default)]
    pub require_signed: bool,
    /// Treat a validated manifest signature as sufficient and skip
    /// per-file digest verification.
    #[serde(default)]
    pub signed_sufficient: bool,
    /// Accept a single package file with no manifest.
    #[serde(default)]
    pub accept_lone_debs: bool,
    /// Verify per-file digests against the manifest.
    #[serde(default = "default_true")]
    pub verify_checksums: bool,
}

fn default_true() -> bool {
    true
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            require_signed: false,
            signed_sufficient: false,
            accept_lone_debs: false,
            verify_checksums: true,
        }
    }
}

/// Signing configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SigningConfig {
    /// Key name embedded in signatures (e.g., "repo.example.org-1").
    pub key_name: String,
    /// Private key source.
    pub private_key: PrivateKeyConfig,
}

/// Private key source configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PrivateKeyConfig {
    /// Key stored in a file.
    File { path: PathBuf },
    /// Key stored in an environment variable.
    Env { var: String },
    /// Key provided inline (not recommended for production).
    Value { key: String },
    /// Generate an ephemeral key (development only).
    Generate,
}

/// A trusted public key for manifest verification.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrustedKey {
    /// Key name as it appears in signature armor.
    pub name: String,
    /// Base64 ed25519 public key.
    pub public_key: String,
}

/// External hook configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HookConfig {
    /// Executable run before regeneration; a failure aborts the
    /// update before any published state changes.
    #[serde(default)]
    pub pre_gen: Option<PathBuf>,
    /// Executable run after a successful publish; failures are
    /// reported but do not unwind the publish.
    #[serde(default)]
    pub post_gen: Option<PathBuf>,
    /// Executable run for each verified file before it is committed
    /// to the store; a failure rejects that file.
    #[serde(default)]
    pub upload: Option<PathBuf>,
    /// Cap on hook execution time, seconds.
    #[serde(default = "default_hook_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_hook_timeout_secs() -> u64 {
    300
}

impl HookConfig {
    /// Get the hook timeout as a std Duration.
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Repository configuration (required).
    pub repo: RepoConfig,
    /// Upload verification policy.
    #[serde(default)]
    pub uploads: UploadPolicy,
    /// Signing configuration (optional; releases are unsigned without it).
    pub signing: Option<SigningConfig>,
    /// Trusted keys for manifest verification.
    #[serde(default)]
    pub trusted_keys: Vec<TrustedKey>,
    /// Upload and generation hooks.
    #[serde(default)]
    pub hooks: HookConfig,
}

impl AppConfig {
    /// Validate configuration invariants that do not need I/O.
    ///
    /// Filesystem writability and prune/pool pattern syntax are
    /// checked where the corresponding component is constructed.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.max_readers == 0 {
            return Err("server.max_readers must be at least 1".to_string());
        }
        if self.server.session_ttl_secs == 0 {
            return Err("server.session_ttl_secs must be nonzero".to_string());
        }
        if self.uploads.require_signed && self.trusted_keys.is_empty() {
            return Err(
                "uploads.require_signed is set but no trusted_keys are configured".to_string(),
            );
        }
        Ok(())
    }

    /// Create a test configuration rooted at the given directory.
    ///
    /// **For testing only.**
    pub fn for_testing(root: impl Into<PathBuf>) -> Self {
        Self {
            server: ServerConfig::default(),
            repo: RepoConfig {
                root: root.into(),
                pool_pattern: default_pool_pattern(),
                prune: String::new(),
                auto_trim: false,
                auto_trim_length: default_auto_trim_length(),
                component: default_component(),
            },
            uploads: UploadPolicy {
                accept_lone_debs: true,
                ..UploadPolicy::default()
            },
            signing: None,
            trusted_keys: Vec::new(),
            hooks: HookConfig::default(),
        }
    }
}
