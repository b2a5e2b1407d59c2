//! # convsync-engine
//!
//! Client-side synchronization between the device's [`LocalStore`] and the
//! remote conversation store.
//!
//! - [`SyncEngine`] runs push/pull cycles and publishes a [`SyncStatus`]
//! - [`RemoteBlobStore`] / [`RegistryClient`] are the remote contracts it
//!   consumes; [`HttpSyncClient`] implements both over the HTTP API
//! - [`ClientConfig`] loads client settings from the environment
//!
//! [`LocalStore`]: convsync_store::LocalStore

pub mod config;
pub mod conversations;
pub mod engine;
pub mod error;
pub mod http;
pub mod remote;
pub mod status;

#[cfg(test)]
mod testing;

pub use config::{ClientConfig, SyncConfig};
pub use engine::SyncEngine;
pub use error::{EngineError, RemoteError, SyncError};
pub use http::HttpSyncClient;
pub use remote::{RegistryClient, RemoteBlobStore};
pub use status::{SyncPhase, SyncReport, SyncStatus};
