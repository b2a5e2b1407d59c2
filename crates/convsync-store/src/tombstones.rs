use chrono::{DateTime, Utc};
use rusqlite::params;

use convsync_shared::{ConversationId, FileId};

use crate::database::Database;
use crate::error::Result;
use crate::models::Tombstone;

impl Database {
    /// Pending remote deletes, oldest first.
    pub fn list_tombstones(&self) -> Result<Vec<Tombstone>> {
        let mut stmt = self.conn().prepare(
            "SELECT conversation_id, drive_file_id, deleted_at
             FROM tombstones
             ORDER BY deleted_at ASC",
        )?;

        let rows = stmt.query_map([], row_to_tombstone)?;

        let mut tombstones = Vec::new();
        for row in rows {
            tombstones.push(row?);
        }
        Ok(tombstones)
    }

    pub fn is_tombstoned(&self, id: &ConversationId) -> Result<bool> {
        let exists: bool = self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM tombstones WHERE conversation_id = ?1)",
            params![id.as_str()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    pub fn remove_tombstone(&self, id: &ConversationId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM tombstones WHERE conversation_id = ?1",
            params![id.as_str()],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_tombstone(row: &rusqlite::Row<'_>) -> rusqlite::Result<Tombstone> {
    let conversation_id: String = row.get(0)?;
    let drive_file_id: Option<String> = row.get(1)?;
    let deleted_str: String = row.get(2)?;

    let deleted_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&deleted_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Tombstone {
        conversation_id: ConversationId(conversation_id),
        drive_file_id: drive_file_id.map(FileId),
        deleted_at,
    })
}
