//! v001 -- Initial schema creation.
//!
//! Creates the two call-metadata tables: `calls` and `participants`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Calls
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS calls (
    id         TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    room_id    TEXT NOT NULL,
    created_at TEXT NOT NULL,               -- ISO-8601 / RFC-3339
    started_at TEXT,
    ended_at   TEXT,
    status     TEXT NOT NULL,               -- active | ended
    recording  INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    metadata   TEXT NOT NULL DEFAULT '{}'   -- JSON
);

CREATE INDEX IF NOT EXISTS idx_calls_status ON calls(status);

-- ----------------------------------------------------------------
-- Participants
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS participants (
    id        TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    call_id   TEXT NOT NULL,                -- FK -> calls(id)
    user_id   TEXT NOT NULL,
    role      TEXT NOT NULL,
    joined_at TEXT NOT NULL,
    left_at   TEXT,
    client_ip TEXT NOT NULL DEFAULT '',
    metadata  TEXT NOT NULL DEFAULT '{}',   -- JSON

    FOREIGN KEY (call_id) REFERENCES calls(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_participants_call_id ON participants(call_id);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
