//! # convsync-store
//!
//! Device-local persistent storage for conversations, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` with typed CRUD helpers, and the asynchronous
//! [`LocalStore`] trait the sync engine is written against.
//! [`SqliteLocalStore`] bridges the two by running every query on tokio's
//! blocking pool.

pub mod conversations;
pub mod database;
pub mod local_store;
pub mod migrations;
pub mod models;
pub mod tombstones;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use local_store::{LocalStore, SqliteLocalStore};
pub use models::*;
