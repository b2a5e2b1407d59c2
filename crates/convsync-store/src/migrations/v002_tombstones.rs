use rusqlite::Connection;

const UP_SQL: &str = r#"
-- Deleted conversations whose remote blob still has to be removed.
CREATE TABLE IF NOT EXISTS tombstones (
    conversation_id TEXT PRIMARY KEY NOT NULL,
    drive_file_id   TEXT NOT NULL,
    deleted_at      TEXT NOT NULL              -- RFC-3339
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
