//! v001 -- Initial schema creation.
//!
//! One row per conversation.  The full conversation document lives in
//! `body`; the remaining columns are copies of the fields the sync engine
//! and the UI query on.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS conversations (
    id              TEXT PRIMARY KEY NOT NULL,
    title           TEXT NOT NULL,
    body            TEXT NOT NULL,               -- full conversation JSON
    updated_at_ms   INTEGER NOT NULL,            -- unix millis of updatedAt
    local_version   INTEGER NOT NULL,
    synced_version  INTEGER NOT NULL DEFAULT 0,
    synced_to_drive INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    drive_file_id   TEXT,

    CHECK (synced_version >= 0 AND synced_version <= local_version)
);

-- Backs the conversation list (most recently updated first).
CREATE INDEX IF NOT EXISTS idx_conversations_updated
    ON conversations(updated_at_ms DESC, id);

-- Backs the push phase; only rows with pending changes are indexed.
CREATE INDEX IF NOT EXISTS idx_conversations_unsynced
    ON conversations(id)
    WHERE synced_to_drive = 0 OR synced_version < local_version;
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
