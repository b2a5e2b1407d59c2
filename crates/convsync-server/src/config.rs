//! Server configuration loaded from environment variables.
//!
//! Every setting has a default so the server starts with zero configuration
//! for local development.  Malformed values are logged and ignored.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;

use convsync_shared::constants::{DEFAULT_HTTP_PORT, DEFAULT_MAX_BLOB_SIZE};
use convsync_shared::OwnerId;

#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP API.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Directory holding conversation blobs, one sub-directory per owner.
    /// Env: `BLOB_STORAGE_PATH`
    /// Default: `./blobs`
    pub blob_storage_path: PathBuf,

    /// SQLite file of the metadata registry.
    /// Env: `REGISTRY_DB_PATH`
    /// Default: `./registry.db`
    pub registry_db_path: PathBuf,

    /// Largest accepted conversation body in bytes.
    /// Env: `MAX_BLOB_SIZE`
    /// Default: 8 MiB
    pub max_blob_size: usize,

    /// Bearer token to owner table.
    /// Env: `AUTH_TOKENS` as `token=owner,token=owner`
    /// Default: empty (every protected route answers 401).
    pub auth_tokens: HashMap<String, OwnerId>,

    /// Sustained requests per second per owner.
    /// Env: `RATE_LIMIT_PER_SEC`
    /// Default: `10`
    pub rate_limit_per_sec: f64,

    /// Burst capacity per owner.
    /// Env: `RATE_LIMIT_BURST`
    /// Default: `30`
    pub rate_limit_burst: f64,

    /// Human-readable name reported by `/health`.
    /// Env: `INSTANCE_NAME`
    /// Default: `"convsync"`
    pub instance_name: String,
}

// Tokens are secrets; keep them out of logs.
impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("blob_storage_path", &self.blob_storage_path)
            .field("registry_db_path", &self.registry_db_path)
            .field("max_blob_size", &self.max_blob_size)
            .field("auth_tokens", &self.auth_tokens.len())
            .field("rate_limit_per_sec", &self.rate_limit_per_sec)
            .field("rate_limit_burst", &self.rate_limit_burst)
            .field("instance_name", &self.instance_name)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            blob_storage_path: PathBuf::from("./blobs"),
            registry_db_path: PathBuf::from("./registry.db"),
            max_blob_size: DEFAULT_MAX_BLOB_SIZE,
            auth_tokens: HashMap::new(),
            rate_limit_per_sec: 10.0,
            rate_limit_burst: 30.0,
            instance_name: "convsync".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(path) = lookup("BLOB_STORAGE_PATH") {
            config.blob_storage_path = PathBuf::from(path);
        }

        if let Some(path) = lookup("REGISTRY_DB_PATH") {
            config.registry_db_path = PathBuf::from(path);
        }

        if let Some(val) = lookup("MAX_BLOB_SIZE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_blob_size = n,
                _ => tracing::warn!(value = %val, "Invalid MAX_BLOB_SIZE, using default"),
            }
        }

        if let Some(val) = lookup("AUTH_TOKENS") {
            config.auth_tokens = parse_auth_tokens(&val);
        }

        if let Some(val) = lookup("RATE_LIMIT_PER_SEC") {
            match val.parse::<f64>() {
                Ok(n) if n > 0.0 => config.rate_limit_per_sec = n,
                _ => tracing::warn!(value = %val, "Invalid RATE_LIMIT_PER_SEC, using default"),
            }
        }

        if let Some(val) = lookup("RATE_LIMIT_BURST") {
            match val.parse::<f64>() {
                Ok(n) if n >= 1.0 => config.rate_limit_burst = n,
                _ => tracing::warn!(value = %val, "Invalid RATE_LIMIT_BURST, using default"),
            }
        }

        if let Some(name) = lookup("INSTANCE_NAME") {
            config.instance_name = name;
        }

        // RUST_LOG is read by tracing-subscriber's EnvFilter directly.

        config
    }
}

/// Parse `token=owner,token=owner`.  Malformed pairs are skipped.
fn parse_auth_tokens(raw: &str) -> HashMap<String, OwnerId> {
    let mut tokens = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match pair.split_once('=') {
            Some((token, owner)) if !token.trim().is_empty() && !owner.trim().is_empty() => {
                tokens.insert(token.trim().to_string(), OwnerId::from(owner.trim()));
            }
            _ => tracing::warn!("Ignoring malformed AUTH_TOKENS entry"),
        }
    }
    tokens
}
