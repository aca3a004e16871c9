//! SQLite DDL for the Roost firmware database.
//!
//! All `CREATE TABLE` / `CREATE INDEX` statements live here so they are
//! reviewable and testable in isolation.

use rusqlite::Connection;

/// Complete DDL for the firmware database.
///
/// Uses `IF NOT EXISTS` throughout so `apply_schema` is idempotent.
pub(crate) const SCHEMA_SQL: &str = r#"
-- WAL mode so reads can proceed while a write is in flight.
PRAGMA journal_mode = WAL;

-- One belief record per (device, component) pair.
CREATE TABLE IF NOT EXISTS firmware_versions (
    device        TEXT NOT NULL,
    component     TEXT NOT NULL,
    version       TEXT NOT NULL,
    release_date  TEXT NOT NULL,               -- YYYY-MM-DD
    checksum      TEXT NOT NULL,               -- sha256 hex, '' for seeds
    status        TEXT NOT NULL DEFAULT 'current',
    download_url  TEXT NOT NULL DEFAULT '',
    notes         TEXT NOT NULL DEFAULT '',
    created_at    TEXT NOT NULL,               -- RFC 3339
    PRIMARY KEY (device, component)
);

-- Append-only update history. Rows are never mutated or deleted.
CREATE TABLE IF NOT EXISTS update_log (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    device        TEXT NOT NULL,
    component     TEXT NOT NULL,
    from_version  TEXT NOT NULL,
    to_version    TEXT NOT NULL,
    status        TEXT NOT NULL,               -- success | failed
    applied_at    TEXT NOT NULL                -- RFC 3339
);

CREATE INDEX IF NOT EXISTS idx_firmware_status ON firmware_versions(status);
CREATE INDEX IF NOT EXISTS idx_log_device      ON update_log(device, component);
"#;

/// Apply the full schema to an open connection.
///
/// Safe to call multiple times - all statements use `IF NOT EXISTS`.
pub(crate) fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_schema_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        apply_schema(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert!(tables.contains(&"firmware_versions".to_string()));
        assert!(tables.contains(&"update_log".to_string()));
    }
}
