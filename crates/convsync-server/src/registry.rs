//! Metadata registry: which conversations an owner has, where their blob
//! lives and which version the server last accepted.
//!
//! Rows are keyed by `(owner_id, conversation_id)`, so one owner can never
//! address another owner's row.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::info;

use convsync_shared::protocol::ConversationMetadata;
use convsync_shared::{ConversationId, FileId, OwnerId};

use crate::error::ServerError;

#[async_trait]
pub trait MetadataRegistry: Send + Sync {
    /// Insert a new row.  Returns `false`, leaving the table untouched, when
    /// the owner already has a row for that conversation.
    async fn insert(&self, owner: &OwnerId, record: &ConversationMetadata)
        -> Result<bool, ServerError>;

    /// Overwrite the mutable fields of an existing row.  Returns `false`
    /// when no row matches.
    async fn update(&self, owner: &OwnerId, record: &ConversationMetadata)
        -> Result<bool, ServerError>;

    async fn get(
        &self,
        owner: &OwnerId,
        id: &ConversationId,
    ) -> Result<Option<ConversationMetadata>, ServerError>;

    /// Every row of `owner`, most recently updated first.
    async fn list(&self, owner: &OwnerId) -> Result<Vec<ConversationMetadata>, ServerError>;

    /// Returns `false` when nothing was deleted.
    async fn delete(&self, owner: &OwnerId, id: &ConversationId) -> Result<bool, ServerError>;
}

const SCHEMA_VERSION: u32 = 1;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS conversation_metadata (
    owner_id        TEXT    NOT NULL,
    conversation_id TEXT    NOT NULL,
    title           TEXT    NOT NULL,
    drive_file_id   TEXT,
    local_version   INTEGER NOT NULL,
    synced_version  INTEGER NOT NULL,
    created_at_ms   INTEGER NOT NULL,
    updated_at_ms   INTEGER NOT NULL,
    PRIMARY KEY (owner_id, conversation_id)
);

CREATE INDEX IF NOT EXISTS idx_metadata_owner_updated
    ON conversation_metadata(owner_id, updated_at_ms DESC);
";

const COLUMNS: &str = "conversation_id, title, drive_file_id, local_version, synced_version, \
                       created_at_ms, updated_at_ms";

/// [`MetadataRegistry`] backed by a single SQLite connection.
#[derive(Clone)]
pub struct SqliteRegistry {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRegistry {
    pub fn open(path: &Path) -> Result<Self, ServerError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| ServerError::Registry(format!("Failed to create directory: {e}")))?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if current < SCHEMA_VERSION {
            info!(path = %path.display(), "Creating registry schema");
            conn.execute_batch(SCHEMA)?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, op: F) -> Result<T, ServerError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|e| ServerError::Registry(format!("Lock poisoned: {e}")))?;
            op(&guard).map_err(ServerError::from)
        })
        .await
        .map_err(|e| ServerError::Internal(format!("Blocking task failed: {e}")))?
    }
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

fn row_to_metadata(row: &Row<'_>) -> rusqlite::Result<ConversationMetadata> {
    Ok(ConversationMetadata {
        conversation_id: ConversationId(row.get(0)?),
        title: row.get(1)?,
        drive_file_id: row.get::<_, Option<String>>(2)?.map(FileId),
        local_version: row.get(3)?,
        synced_version: row.get(4)?,
        created_at: timestamp(row, 5)?,
        updated_at: timestamp(row, 6)?,
    })
}

#[async_trait]
impl MetadataRegistry for SqliteRegistry {
    async fn insert(
        &self,
        owner: &OwnerId,
        record: &ConversationMetadata,
    ) -> Result<bool, ServerError> {
        let owner = owner.clone();
        let record = record.clone();
        self.with_conn(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO conversation_metadata
                     (owner_id, conversation_id, title, drive_file_id, local_version,
                      synced_version, created_at_ms, updated_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(owner_id, conversation_id) DO NOTHING",
                params![
                    owner.as_str(),
                    record.conversation_id.as_str(),
                    record.title,
                    record.drive_file_id.as_ref().map(FileId::as_str),
                    record.local_version,
                    record.synced_version,
                    record.created_at.timestamp_millis(),
                    record.updated_at.timestamp_millis(),
                ],
            )?;
            Ok(inserted == 1)
        })
        .await
    }

    async fn update(
        &self,
        owner: &OwnerId,
        record: &ConversationMetadata,
    ) -> Result<bool, ServerError> {
        let owner = owner.clone();
        let record = record.clone();
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE conversation_metadata
                 SET title = ?3, drive_file_id = ?4, local_version = ?5,
                     synced_version = ?6, updated_at_ms = ?7
                 WHERE owner_id = ?1 AND conversation_id = ?2",
                params![
                    owner.as_str(),
                    record.conversation_id.as_str(),
                    record.title,
                    record.drive_file_id.as_ref().map(FileId::as_str),
                    record.local_version,
                    record.synced_version,
                    record.updated_at.timestamp_millis(),
                ],
            )?;
            Ok(updated == 1)
        })
        .await
    }

    async fn get(
        &self,
        owner: &OwnerId,
        id: &ConversationId,
    ) -> Result<Option<ConversationMetadata>, ServerError> {
        let owner = owner.clone();
        let id = id.clone();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {COLUMNS} FROM conversation_metadata
                     WHERE owner_id = ?1 AND conversation_id = ?2"
                ),
                params![owner.as_str(), id.as_str()],
                row_to_metadata,
            )
            .optional()
        })
        .await
    }

    async fn list(&self, owner: &OwnerId) -> Result<Vec<ConversationMetadata>, ServerError> {
        let owner = owner.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM conversation_metadata
                 WHERE owner_id = ?1
                 ORDER BY updated_at_ms DESC, conversation_id ASC"
            ))?;
            let rows = stmt.query_map(params![owner.as_str()], row_to_metadata)?;
            rows.collect()
        })
        .await
    }

    async fn delete(&self, owner: &OwnerId, id: &ConversationId) -> Result<bool, ServerError> {
        let owner = owner.clone();
        let id = id.clone();
        self.with_conn(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM conversation_metadata WHERE owner_id = ?1 AND conversation_id = ?2",
                params![owner.as_str(), id.as_str()],
            )?;
            Ok(deleted == 1)
        })
        .await
    }
}
