//! Schema for the Tab Snoozer SQLite database.
//!
//! A single key-value table. Values are JSON documents; there is no schema
//! version table and no migration step.

use rusqlite::Connection;

/// Name of the key-value table.
pub const KV_TABLE: &str = "kv_store";

/// Creates the key-value table if it does not exist yet.
///
/// Safe to call on every startup.
///
/// # Errors
/// Returns `rusqlite::Error` if any SQL statement fails.
pub fn create_all(conn: &Connection) -> Result<(), rusqlite::Error> {
    // journal_mode returns a row, which execute_batch discards.
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = FULL;
         CREATE TABLE IF NOT EXISTS kv_store (
             key TEXT PRIMARY KEY,
             value TEXT NOT NULL,
             updated_at INTEGER NOT NULL
         );",
    )
}
