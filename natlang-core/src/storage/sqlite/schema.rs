//! SQLite schema. Every statement is idempotent.

use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::info;

use crate::error::StorageError;

/// Current schema version.
pub const SCHEMA_VERSION: i64 = 2;

/// Create tables if missing and record the schema version.
pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );

        -- One row per stored entry instance (sealed or pending)
        CREATE TABLE IF NOT EXISTS entries (
            entry_id INTEGER PRIMARY KEY AUTOINCREMENT,
            fingerprint TEXT NOT NULL,
            content TEXT NOT NULL,
            author TEXT NOT NULL,
            intent TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            timestamp TEXT NOT NULL,
            validation_status TEXT NOT NULL,
            validation_record TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_entries_fingerprint ON entries(fingerprint);
        CREATE INDEX IF NOT EXISTS idx_entries_author ON entries(author);

        CREATE TABLE IF NOT EXISTS blocks (
            block_index INTEGER PRIMARY KEY,
            timestamp TEXT NOT NULL,
            previous_hash TEXT NOT NULL,
            nonce INTEGER NOT NULL,
            hash TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS block_entries (
            block_index INTEGER NOT NULL,
            position INTEGER NOT NULL,
            entry_id INTEGER NOT NULL,
            PRIMARY KEY (block_index, position)
        );

        CREATE TABLE IF NOT EXISTS pending_entries (
            position INTEGER PRIMARY KEY,
            entry_id INTEGER NOT NULL
        );

        -- Singleton row tracking the committed tail
        CREATE TABLE IF NOT EXISTS chain_state (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            tail_hash TEXT NOT NULL,
            height INTEGER NOT NULL,
            updated_at TEXT NOT NULL
        );

        -- Append-only validation log (v2); rows are never deleted
        CREATE TABLE IF NOT EXISTS validation_records (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            audit_id TEXT NOT NULL UNIQUE,
            kind TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            author TEXT NOT NULL,
            decision TEXT NOT NULL,
            record TEXT NOT NULL,
            recorded_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_validation_records_fingerprint
            ON validation_records(fingerprint);
        "#,
    )?;

    let inserted = conn.execute(
        "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?1, ?2)",
        params![SCHEMA_VERSION, Utc::now().to_rfc3339()],
    )?;
    if inserted > 0 {
        info!(version = SCHEMA_VERSION, "Initialized ledger schema");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);

        for table in ["entries", "blocks", "block_entries", "chain_state", "validation_records"] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {}", table);
        }
    }
}
