use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use convsync_shared::{Conversation, ConversationId, FileId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{DeleteOutcome, Tombstone};

const SELECT_BODY: &str = "SELECT body FROM conversations";

impl Database {
    /// Insert or replace the record for `conversation.id`.
    pub fn put_conversation(&self, conversation: &Conversation) -> Result<()> {
        if !conversation.versions_consistent() {
            return Err(StoreError::Corrupt {
                id: conversation.id.to_string(),
                reason: format!(
                    "synced_version {} exceeds local_version {}",
                    conversation.synced_version, conversation.local_version
                ),
            });
        }

        let body = serde_json::to_string(conversation)?;

        self.conn().execute(
            "INSERT INTO conversations
                 (id, title, body, updated_at_ms, local_version, synced_version,
                  synced_to_drive, drive_file_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                 title = excluded.title,
                 body = excluded.body,
                 updated_at_ms = excluded.updated_at_ms,
                 local_version = excluded.local_version,
                 synced_version = excluded.synced_version,
                 synced_to_drive = excluded.synced_to_drive,
                 drive_file_id = excluded.drive_file_id",
            params![
                conversation.id.as_str(),
                conversation.title,
                body,
                conversation.updated_at.timestamp_millis(),
                conversation.local_version,
                conversation.synced_version,
                conversation.synced_to_drive as i32,
                conversation.drive_file_id.as_ref().map(|f| f.as_str()),
            ],
        )?;
        Ok(())
    }

    pub fn get_conversation(&self, id: &ConversationId) -> Result<Option<Conversation>> {
        let body: Option<String> = self
            .conn()
            .query_row(
                "SELECT body FROM conversations WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        body.map(|b| serde_json::from_str(&b).map_err(StoreError::from))
            .transpose()
    }

    /// All conversations, most recently updated first.
    pub fn list_conversations(&self) -> Result<Vec<Conversation>> {
        self.query_conversations(&format!(
            "{SELECT_BODY} ORDER BY updated_at_ms DESC, id ASC"
        ))
    }

    /// Conversations with changes the remote store has not accepted yet.
    pub fn list_unsynced_conversations(&self) -> Result<Vec<Conversation>> {
        self.query_conversations(&format!(
            "{SELECT_BODY}
             WHERE synced_to_drive = 0 OR synced_version < local_version
             ORDER BY id"
        ))
    }

    pub fn count_unsynced_conversations(&self) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM conversations
             WHERE synced_to_drive = 0 OR synced_version < local_version",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Write `conversation` only if the stored `local_version` still equals
    /// `expected` (`None`: no record exists).  Returns whether it was written.
    pub fn put_conversation_if_version(
        &self,
        conversation: &Conversation,
        expected: Option<i64>,
    ) -> Result<bool> {
        let tx = self.conn().unchecked_transaction()?;

        let current: Option<i64> = tx
            .query_row(
                "SELECT local_version FROM conversations WHERE id = ?1",
                params![conversation.id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        if current != expected {
            return Ok(false);
        }

        self.put_conversation(conversation)?;
        tx.commit()?;
        Ok(true)
    }

    /// Note that a save of this conversation is about to be sent.  From now
    /// on a local delete leaves a tombstone even without a `drive_file_id`.
    pub fn mark_push_attempted(&self, id: &ConversationId) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE conversations SET push_attempted = 1 WHERE id = ?1",
            params![id.as_str()],
        )?;
        Ok(affected > 0)
    }

    /// Delete a conversation.  If it was ever sent to the blob store, a
    /// tombstone for the remote copy is written in the same transaction.
    pub fn delete_conversation(&self, id: &ConversationId) -> Result<DeleteOutcome> {
        let tx = self.conn().unchecked_transaction()?;

        let row: Option<(Option<String>, bool)> = tx
            .query_row(
                "SELECT drive_file_id, push_attempted FROM conversations WHERE id = ?1",
                params![id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((drive_file_id, push_attempted)) = row else {
            return Ok(DeleteOutcome::Missing);
        };

        tx.execute(
            "DELETE FROM conversations WHERE id = ?1",
            params![id.as_str()],
        )?;

        let outcome = if drive_file_id.is_some() || push_attempted {
            let tombstone = Tombstone {
                conversation_id: id.clone(),
                drive_file_id: drive_file_id.map(FileId),
                deleted_at: Utc::now(),
            };
            tx.execute(
                "INSERT OR REPLACE INTO tombstones (conversation_id, drive_file_id, deleted_at)
                 VALUES (?1, ?2, ?3)",
                params![
                    tombstone.conversation_id.as_str(),
                    tombstone.drive_file_id.as_ref().map(|f| f.as_str()),
                    tombstone.deleted_at.to_rfc3339(),
                ],
            )?;
            DeleteOutcome::PendingRemote(tombstone)
        } else {
            DeleteOutcome::LocalOnly
        };

        tx.commit()?;
        Ok(outcome)
    }

    /// Remove every conversation and tombstone (e.g. on sign-out).
    pub fn clear_conversations(&self) -> Result<()> {
        self.conn()
            .execute_batch("DELETE FROM conversations; DELETE FROM tombstones;")?;
        Ok(())
    }

    fn query_conversations(&self, sql: &str) -> Result<Vec<Conversation>> {
        let mut stmt = self.conn().prepare(sql)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut conversations = Vec::new();
        for row in rows {
            conversations.push(serde_json::from_str(&row?)?);
        }
        Ok(conversations)
    }
}
