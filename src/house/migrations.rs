//! Schema migrations, tracked with `PRAGMA user_version`.
//!
//! Migrations run when the database is opened. Each step is idempotent so a
//! database created by the older one-off scripts (tables present, version 0)
//! upgrades cleanly.

use rusqlite::Connection;
use tracing::info;

/// Current schema version.
const CURRENT_VERSION: i32 = 2;

pub fn get_version(conn: &Connection) -> rusqlite::Result<i32> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
}

fn set_version(conn: &Connection, version: i32) -> rusqlite::Result<()> {
    conn.execute_batch(&format!("PRAGMA user_version = {version};"))
}

/// Run all pending migrations.
pub fn run(conn: &Connection) -> rusqlite::Result<()> {
    let current = get_version(conn)?;
    if current >= CURRENT_VERSION {
        return Ok(());
    }

    for version in (current + 1)..=CURRENT_VERSION {
        match version {
            1 => migrate_v1(conn)?,
            2 => migrate_v2(conn)?,
            _ => unreachable!("no migration for version {version}"),
        }
        set_version(conn, version)?;
        info!("Database schema migrated to v{version}");
    }

    Ok(())
}

/// v1: base tables.
fn migrate_v1(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            user_id INTEGER PRIMARY KEY,
            username TEXT,
            display_name TEXT NOT NULL,
            room_no TEXT,
            role TEXT NOT NULL DEFAULT 'member' CHECK (role IN ('member', 'admin')),
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS presence_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
            date TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('home', 'away')),
            note TEXT,
            updated_at TEXT NOT NULL,
            UNIQUE (user_id, date)
        );

        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            start_at TEXT NOT NULL,
            end_at TEXT NOT NULL,
            created_by INTEGER REFERENCES users(user_id) ON DELETE SET NULL,
            location TEXT,
            memo TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS cleaning_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
            location TEXT NOT NULL,
            timestamp TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS manuals (
            id INTEGER PRIMARY KEY,
            title TEXT NOT NULL UNIQUE,
            body TEXT NOT NULL,
            keywords TEXT NOT NULL DEFAULT ''
        );

        CREATE INDEX IF NOT EXISTS idx_presence_date ON presence_logs(date);
        CREATE INDEX IF NOT EXISTS idx_events_start_at ON events(start_at);
        CREATE INDEX IF NOT EXISTS idx_cleaning_timestamp ON cleaning_logs(timestamp);
        CREATE INDEX IF NOT EXISTS idx_cleaning_location ON cleaning_logs(location);
        "#,
    )
}

/// v2: optional columns that early databases lack.
fn migrate_v2(conn: &Connection) -> rusqlite::Result<()> {
    add_column_if_missing(conn, "cleaning_logs", "note", "TEXT")?;
    add_column_if_missing(conn, "users", "timezone", "TEXT")?;
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

fn add_column_if_missing(
    conn: &Connection,
    table: &str,
    column: &str,
    decl: &str,
) -> rusqlite::Result<()> {
    if has_column(conn, table, column)? {
        return Ok(());
    }
    conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl};"))?;
    info!("Added column {table}.{column}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_database_reaches_current_version() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        assert_eq!(get_version(&conn).unwrap(), CURRENT_VERSION);
        assert!(has_column(&conn, "cleaning_logs", "note").unwrap());
        assert!(has_column(&conn, "users", "timezone").unwrap());
    }

    #[test]
    fn test_run_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();
        assert_eq!(get_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_legacy_cleaning_table_gets_note_column() {
        let conn = Connection::open_in_memory().unwrap();
        // Layout written by the first version of the cleaning feature.
        conn.execute_batch(
            "CREATE TABLE cleaning_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                location TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );
            INSERT INTO cleaning_logs (user_id, location, timestamp)
            VALUES (1, 'キッチン', '2025-09-01T10:00:00+09:00');",
        )
        .unwrap();

        run(&conn).unwrap();

        assert!(has_column(&conn, "cleaning_logs", "note").unwrap());
        let kept: i64 = conn
            .query_row("SELECT COUNT(*) FROM cleaning_logs", [], |row| row.get(0))
            .unwrap();
        assert_eq!(kept, 1);
    }
}
