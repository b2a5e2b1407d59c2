//! v003 -- Remember which conversations were ever sent to the blob store.
//!
//! A save whose response was lost leaves a remote blob behind without a
//! `drive_file_id` on the device.  `push_attempted` lets a later delete
//! still write a tombstone for it, and the tombstone's file id becomes
//! optional (resolved by blob name during the next push phase).

use rusqlite::Connection;

const UP_SQL: &str = r#"
ALTER TABLE conversations
    ADD COLUMN push_attempted INTEGER NOT NULL DEFAULT 0;  -- boolean 0/1

UPDATE conversations SET push_attempted = 1 WHERE drive_file_id IS NOT NULL;

CREATE TABLE tombstones_v3 (
    conversation_id TEXT PRIMARY KEY NOT NULL,
    drive_file_id   TEXT,                      -- NULL: look up by blob name
    deleted_at      TEXT NOT NULL              -- RFC-3339
);

INSERT INTO tombstones_v3 (conversation_id, drive_file_id, deleted_at)
    SELECT conversation_id, drive_file_id, deleted_at FROM tombstones;

DROP TABLE tombstones;
ALTER TABLE tombstones_v3 RENAME TO tombstones;
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
