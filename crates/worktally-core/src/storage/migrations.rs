//! Database schema migrations for worktally.
//!
//! Migrations are versioned and applied automatically when opening the database.
//! The `schema_version` table tracks the current migration version.

use rusqlite::{Connection, Result as SqliteResult};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 2;

/// Apply all pending migrations to bring the database to the current schema version.
///
/// # Errors
/// Returns an error if migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn)?;

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Returns 0 for a fresh database.
pub fn get_schema_version(conn: &Connection) -> SqliteResult<i32> {
    match conn.query_row("SELECT version FROM schema_version", [], |row| {
        row.get::<_, i32>(0)
    }) {
        Ok(v) => Ok(v),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
        Err(e) => Err(e),
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Migration v1: tracking records, one row per work item.
///
/// `last_updated` is a fixed-width RFC 3339 UTC string so that SQLite's
/// text ordering matches chronological ordering.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS tracking (
            id                  TEXT PRIMARY KEY,
            running             INTEGER NOT NULL DEFAULT 0,
            accumulated_minutes INTEGER NOT NULL DEFAULT 0,
            last_updated        TEXT NOT NULL,
            branch_name         TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_tracking_running ON tracking(running);",
    )?;
    set_schema_version(&tx, 1)?;
    tx.commit()
}

/// Migration v2: ledger of effort applied to remote work items.
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS effort_log (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id      TEXT NOT NULL,
            source         TEXT NOT NULL,
            units          INTEGER NOT NULL DEFAULT 0,
            hours          REAL NOT NULL,
            completed_work REAL NOT NULL,
            remaining_work REAL NOT NULL,
            applied_at     TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_effort_log_entity ON effort_log(entity_id, applied_at);",
    )?;
    set_schema_version(&tx, 2)?;
    tx.commit()
}
