//! SQLite layout of a single versioned table.

use rusqlite::{Connection, Result as SqliteResult};

/// Current layout version.
pub const LAYOUT_VERSION: i32 = 1;

/// Database file inside a table directory.
pub const TABLE_FILE: &str = "_table.sqlite3";

/// Initialize the database layout.
pub fn initialize_layout(conn: &Connection, wal: bool) -> SqliteResult<()> {
    if wal {
        // Readers keep their snapshot while a writer commits
        conn.pragma_update(None, "journal_mode", "WAL")?;
    }

    conn.execute(
        "CREATE TABLE IF NOT EXISTS layout_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM layout_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version < 1 {
        apply_v1_layout(conn)?;
    }

    Ok(())
}

/// Apply version 1 layout.
fn apply_v1_layout(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "BEGIN;
        CREATE TABLE IF NOT EXISTS table_fields (
            position INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            data_type TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS commits (
            version INTEGER PRIMARY KEY,
            operation TEXT NOT NULL,
            committed_at TEXT NOT NULL,
            rows_added INTEGER NOT NULL DEFAULT 0,
            rows_removed INTEGER NOT NULL DEFAULT 0
        );

        -- One row per row version; a row is live while removed_in is NULL
        CREATE TABLE IF NOT EXISTS rows (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            position INTEGER NOT NULL,
            data TEXT NOT NULL,
            added_in INTEGER NOT NULL,
            removed_in INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_rows_live ON rows(removed_in, position);

        INSERT OR IGNORE INTO layout_version (version) VALUES (1);
        COMMIT;",
    )
}

/// Get the current layout version.
#[cfg(test)]
fn get_layout_version(conn: &Connection) -> SqliteResult<i32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM layout_version",
        [],
        |row| row.get(0),
    )
}

/// Whether the table has been created (has at least one commit).
pub fn has_commits(conn: &Connection) -> bool {
    conn.query_row("SELECT COUNT(*) FROM commits", [], |row| row.get::<_, i64>(0))
        .map(|count| count > 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_layout() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_layout(&conn, false).unwrap();

        assert_eq!(get_layout_version(&conn).unwrap(), LAYOUT_VERSION);
        assert!(!has_commits(&conn));
    }

    #[test]
    fn test_idempotent_initialization() {
        let conn = Connection::open_in_memory().unwrap();

        initialize_layout(&conn, false).unwrap();
        initialize_layout(&conn, false).unwrap();

        assert_eq!(get_layout_version(&conn).unwrap(), 1);
    }

    #[test]
    fn test_wal_mode() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_layout(&conn, true).unwrap();

        let mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .unwrap();
        // In-memory databases report "memory"; file databases report "wal"
        assert!(mode == "memory" || mode == "wal");
    }
}
