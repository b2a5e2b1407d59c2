//! Client configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use convsync_shared::OwnerId;

/// Settings the [`SyncEngine`](crate::SyncEngine) itself needs.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Owner whose conversations are synchronized.
    pub owner: OwnerId,

    /// Upper bound on any single remote call.  A call that exceeds it is a
    /// transient failure retried next cycle.
    pub remote_timeout: Duration,

    /// Period of background cycles started by
    /// [`SyncEngine::start_auto_sync`](crate::SyncEngine::start_auto_sync).
    /// `None` syncs only on demand.
    pub auto_sync_interval: Option<Duration>,
}

impl SyncConfig {
    pub fn new(owner: OwnerId) -> Self {
        Self {
            owner,
            remote_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            auto_sync_interval: None,
        }
    }
}

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

/// Everything needed to wire a device up to a convsync server.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the convsync server.
    /// Env: `CONVSYNC_SERVER_URL`
    /// Default: `http://127.0.0.1:8080`
    pub server_url: String,

    /// Bearer token presented on every request.
    /// Env: `CONVSYNC_AUTH_TOKEN`
    pub auth_token: String,

    /// Owner id of the signed-in user.
    /// Env: `CONVSYNC_OWNER_ID`
    pub owner_id: OwnerId,

    /// Path of the device database.
    /// Env: `CONVSYNC_DB_PATH`
    /// Default: `None` (platform data directory).
    pub db_path: Option<PathBuf>,

    /// Per-request timeout.
    /// Env: `CONVSYNC_REQUEST_TIMEOUT_SECS`
    /// Default: `15`
    pub request_timeout: Duration,

    /// Interval of background sync cycles.
    /// Env: `CONVSYNC_AUTO_SYNC_SECS`
    /// Default: `None` (sync only when asked).
    pub auto_sync_interval: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8080".to_string(),
            auth_token: String::new(),
            owner_id: OwnerId::from("local"),
            db_path: None,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            auto_sync_interval: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("CONVSYNC_SERVER_URL") {
            config.server_url = url;
        }

        if let Some(token) = lookup("CONVSYNC_AUTH_TOKEN") {
            config.auth_token = token;
        }

        if let Some(owner) = lookup("CONVSYNC_OWNER_ID") {
            if !owner.trim().is_empty() {
                config.owner_id = OwnerId(owner.trim().to_string());
            }
        }

        if let Some(path) = lookup("CONVSYNC_DB_PATH") {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Some(val) = lookup("CONVSYNC_REQUEST_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => config.request_timeout = Duration::from_secs(secs),
                _ => tracing::warn!(
                    value = %val,
                    "Invalid CONVSYNC_REQUEST_TIMEOUT_SECS, using default"
                ),
            }
        }

        if let Some(val) = lookup("CONVSYNC_AUTO_SYNC_SECS") {
            match val.parse::<u64>() {
                Ok(0) => config.auto_sync_interval = None,
                Ok(secs) => config.auto_sync_interval = Some(Duration::from_secs(secs)),
                Err(_) => tracing::warn!(
                    value = %val,
                    "Invalid CONVSYNC_AUTO_SYNC_SECS, auto sync disabled"
                ),
            }
        }

        config
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            owner: self.owner_id.clone(),
            remote_timeout: self.request_timeout,
            auto_sync_interval: self.auto_sync_interval,
        }
    }
}
