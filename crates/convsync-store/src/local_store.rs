//! Asynchronous device store used by the sync engine.
//!
//! [`LocalStore`] is the contract; [`SqliteLocalStore`] implements it over a
//! [`Database`] guarded by a mutex, running each query on tokio's blocking
//! pool so SQLite I/O never stalls the async executor.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use convsync_shared::{Conversation, ConversationId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{DeleteOutcome, Tombstone};

/// Persistent, per-device conversation store.
///
/// Every operation may fail with a transient error (see
/// [`StoreError::is_transient`]); callers retry instead of dropping data.
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn put(&self, conversation: &Conversation) -> Result<()>;

    /// Write only if the stored `local_version` still equals `expected`
    /// (`None`: no record).  Returns whether the write happened.
    async fn put_if_version(
        &self,
        conversation: &Conversation,
        expected: Option<i64>,
    ) -> Result<bool>;

    async fn get(&self, id: &ConversationId) -> Result<Option<Conversation>>;

    /// Every conversation, ordered by `updated_at` descending.
    async fn list_all(&self) -> Result<Vec<Conversation>>;

    async fn delete(&self, id: &ConversationId) -> Result<DeleteOutcome>;

    async fn clear(&self) -> Result<()>;

    /// Record that a save is about to be sent for `id`.
    async fn mark_push_attempted(&self, id: &ConversationId) -> Result<()>;

    /// Conversations with `synced_to_drive == false` or
    /// `synced_version < local_version`.
    async fn list_unsynced(&self) -> Result<Vec<Conversation>>;

    async fn count_unsynced(&self) -> Result<u64>;

    async fn list_tombstones(&self) -> Result<Vec<Tombstone>>;

    async fn is_tombstoned(&self, id: &ConversationId) -> Result<bool>;

    async fn remove_tombstone(&self, id: &ConversationId) -> Result<bool>;
}

/// [`LocalStore`] backed by the SQLite [`Database`].
#[derive(Clone)]
pub struct SqliteLocalStore {
    db: Arc<Mutex<Database>>,
}

impl SqliteLocalStore {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Open the database at `path` (creating it if needed).
    pub fn open_at(path: &Path) -> Result<Self> {
        Ok(Self::new(Database::open_at(path)?))
    }

    /// Open the platform default database.
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(Database::new()?))
    }

    async fn with_db<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| StoreError::Unavailable(format!("Lock poisoned: {e}")))?;
            op(&guard)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("Blocking task failed: {e}")))?
    }
}

#[async_trait]
impl LocalStore for SqliteLocalStore {
    async fn put(&self, conversation: &Conversation) -> Result<()> {
        let conversation = conversation.clone();
        self.with_db(move |db| db.put_conversation(&conversation))
            .await
    }

    async fn put_if_version(
        &self,
        conversation: &Conversation,
        expected: Option<i64>,
    ) -> Result<bool> {
        let conversation = conversation.clone();
        self.with_db(move |db| db.put_conversation_if_version(&conversation, expected))
            .await
    }

    async fn get(&self, id: &ConversationId) -> Result<Option<Conversation>> {
        let id = id.clone();
        self.with_db(move |db| db.get_conversation(&id)).await
    }

    async fn list_all(&self) -> Result<Vec<Conversation>> {
        self.with_db(|db| db.list_conversations()).await
    }

    async fn delete(&self, id: &ConversationId) -> Result<DeleteOutcome> {
        let id = id.clone();
        self.with_db(move |db| db.delete_conversation(&id)).await
    }

    async fn clear(&self) -> Result<()> {
        self.with_db(|db| db.clear_conversations()).await
    }

    async fn mark_push_attempted(&self, id: &ConversationId) -> Result<()> {
        let id = id.clone();
        self.with_db(move |db| db.mark_push_attempted(&id).map(|_| ()))
            .await
    }

    async fn list_unsynced(&self) -> Result<Vec<Conversation>> {
        self.with_db(|db| db.list_unsynced_conversations()).await
    }

    async fn count_unsynced(&self) -> Result<u64> {
        self.with_db(|db| db.count_unsynced_conversations()).await
    }

    async fn list_tombstones(&self) -> Result<Vec<Tombstone>> {
        self.with_db(|db| db.list_tombstones()).await
    }

    async fn is_tombstoned(&self, id: &ConversationId) -> Result<bool> {
        let id = id.clone();
        self.with_db(move |db| db.is_tombstoned(&id)).await
    }

    async fn remove_tombstone(&self, id: &ConversationId) -> Result<bool> {
        let id = id.clone();
        self.with_db(move |db| db.remove_tombstone(&id)).await
    }
}
