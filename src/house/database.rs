//! Persistent SQLite store for residents, presence, events, cleaning logs and manuals.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::house::manual::{ManualRecord, ManualSeed, join_keywords, split_keywords};
use crate::house::message::Sender;
use crate::house::migrations;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("database lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Resident role. Admins may delete anyone's events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Member,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Member => "member",
            Role::Admin => "admin",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "admin" => Role::Admin,
            _ => Role::Member,
        }
    }
}

/// A resident, keyed by the platform user id.
#[derive(Debug, Clone)]
pub struct Resident {
    pub user_id: i64,
    pub username: Option<String>,
    pub display_name: String,
    pub room_no: Option<String>,
    pub role: Role,
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceStatus {
    Home,
    Away,
}

impl PresenceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PresenceStatus::Home => "home",
            PresenceStatus::Away => "away",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "home" | "在宅" | "いる" => Some(PresenceStatus::Home),
            "away" | "外出" | "不在" => Some(PresenceStatus::Away),
            _ => None,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            PresenceStatus::Home => PresenceStatus::Away,
            PresenceStatus::Away => PresenceStatus::Home,
        }
    }

    /// Label shown to residents.
    pub fn label(self) -> &'static str {
        match self {
            PresenceStatus::Home => "在宅🏠",
            PresenceStatus::Away => "外出🚶",
        }
    }
}

/// One resident's status for one day.
#[derive(Debug, Clone)]
pub struct PresenceEntry {
    pub user_id: i64,
    pub display_name: String,
    pub room_no: Option<String>,
    pub date: NaiveDate,
    pub status: PresenceStatus,
    pub note: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// A validated event ready to store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub title: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub location: Option<String>,
    pub memo: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EventRecord {
    pub id: i64,
    pub title: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub created_by: Option<i64>,
    pub creator_name: Option<String>,
    pub location: Option<String>,
    pub memo: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CleaningLog {
    pub id: i64,
    pub user_id: i64,
    pub display_name: Option<String>,
    pub location: String,
    pub note: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Format a timestamp for storage. Fixed width, so string order is time order.
pub fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn decode_ts(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    match DateTime::parse_from_rfc3339(s) {
        Ok(dt) => Ok(dt.with_timezone(&Utc)),
        // Rows written by the older scripts carry naive UTC timestamps.
        Err(_) => NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|dt| dt.and_utc()),
    }
}

fn ts_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    decode_ts(&raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn date_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn status_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<PresenceStatus> {
    let raw: String = row.get(idx)?;
    PresenceStatus::parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unknown presence status {raw:?}").into(),
        )
    })
}

/// Persistent SQLite store for the house.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database file and bring the schema up to date.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self::init(conn)?;
        let (residents, events, manuals) = db.counts()?;
        info!(
            "Loaded database from {:?} ({} residents, {} events, {} manuals)",
            path, residents, events, manuals
        );
        Ok(db)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrations::run(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn counts(&self) -> StoreResult<(i64, i64, i64)> {
        let conn = self.conn()?;
        let count = |table: &str| -> rusqlite::Result<i64> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        };
        Ok((count("users")?, count("events")?, count("manuals")?))
    }

    // ==================== RESIDENTS ====================

    /// Insert or refresh a resident from an inbound event.
    pub fn upsert_resident(&self, sender: &Sender, role: Role, now: DateTime<Utc>) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users (user_id, username, display_name, role, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id) DO UPDATE SET
                username = excluded.username,
                display_name = excluded.display_name,
                role = excluded.role",
            params![sender.user_id, sender.username, sender.display_name, role.as_str(), encode_ts(now)],
        )?;
        Ok(())
    }

    pub fn resident(&self, user_id: i64) -> StoreResult<Option<Resident>> {
        let conn = self.conn()?;
        let resident = conn
            .query_row(
                "SELECT user_id, username, display_name, room_no, role, timezone
                 FROM users WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(Resident {
                        user_id: row.get(0)?,
                        username: row.get(1)?,
                        display_name: row.get(2)?,
                        room_no: row.get(3)?,
                        role: Role::from_str(&row.get::<_, String>(4)?),
                        timezone: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(resident)
    }

    pub fn set_timezone(&self, user_id: i64, timezone: Option<&str>) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute("UPDATE users SET timezone = ?2 WHERE user_id = ?1", params![user_id, timezone])?;
        Ok(())
    }

    pub fn set_room(&self, user_id: i64, room_no: Option<&str>) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute("UPDATE users SET room_no = ?2 WHERE user_id = ?1", params![user_id, room_no])?;
        Ok(())
    }

    // ==================== PRESENCE ====================

    /// Record a resident's status for a day. A second call for the same day
    /// replaces status and note.
    pub fn upsert_presence(
        &self,
        user_id: i64,
        date: NaiveDate,
        status: PresenceStatus,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO presence_logs (user_id, date, status, note, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id, date) DO UPDATE SET
                status = excluded.status,
                note = excluded.note,
                updated_at = excluded.updated_at",
            params![user_id, date.format("%Y-%m-%d").to_string(), status.as_str(), note, encode_ts(now)],
        )?;
        debug!("Presence {} on {} -> {}", user_id, date, status.as_str());
        Ok(())
    }

    const PRESENCE_SELECT: &'static str =
        "SELECT p.user_id, COALESCE(u.display_name, CAST(p.user_id AS TEXT)), u.room_no,
                p.date, p.status, p.note, p.updated_at
         FROM presence_logs p LEFT JOIN users u ON u.user_id = p.user_id";

    fn presence_row(row: &Row<'_>) -> rusqlite::Result<PresenceEntry> {
        Ok(PresenceEntry {
            user_id: row.get(0)?,
            display_name: row.get(1)?,
            room_no: row.get(2)?,
            date: date_column(row, 3)?,
            status: status_column(row, 4)?,
            note: row.get(5)?,
            updated_at: ts_column(row, 6)?,
        })
    }

    pub fn presence_for(&self, user_id: i64, date: NaiveDate) -> StoreResult<Option<PresenceEntry>> {
        let conn = self.conn()?;
        let sql = format!("{} WHERE p.user_id = ?1 AND p.date = ?2", Self::PRESENCE_SELECT);
        let entry = conn
            .query_row(&sql, params![user_id, date.format("%Y-%m-%d").to_string()], Self::presence_row)
            .optional()?;
        Ok(entry)
    }

    /// Everyone's status for a day, most recently updated first.
    pub fn presence_on(&self, date: NaiveDate) -> StoreResult<Vec<PresenceEntry>> {
        let conn = self.conn()?;
        let sql = format!(
            "{} WHERE p.date = ?1 ORDER BY p.updated_at DESC, p.id DESC",
            Self::PRESENCE_SELECT
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![date.format("%Y-%m-%d").to_string()], Self::presence_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ==================== EVENTS ====================

    pub fn insert_event(&self, event: &NewEvent, created_by: i64, now: DateTime<Utc>) -> StoreResult<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO events (title, start_at, end_at, created_by, location, memo, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.title,
                encode_ts(event.start_at),
                encode_ts(event.end_at),
                created_by,
                event.location,
                event.memo,
                encode_ts(now),
            ],
        )?;
        let id = conn.last_insert_rowid();
        info!("📅 Event {} created by {}: {}", id, created_by, event.title);
        Ok(id)
    }

    const EVENT_SELECT: &'static str =
        "SELECT e.id, e.title, e.start_at, e.end_at, e.created_by, u.display_name, e.location, e.memo
         FROM events e LEFT JOIN users u ON u.user_id = e.created_by";

    fn event_row(row: &Row<'_>) -> rusqlite::Result<EventRecord> {
        Ok(EventRecord {
            id: row.get(0)?,
            title: row.get(1)?,
            start_at: ts_column(row, 2)?,
            end_at: ts_column(row, 3)?,
            created_by: row.get(4)?,
            creator_name: row.get(5)?,
            location: row.get(6)?,
            memo: row.get(7)?,
        })
    }

    pub fn event(&self, id: i64) -> StoreResult<Option<EventRecord>> {
        let conn = self.conn()?;
        let sql = format!("{} WHERE e.id = ?1", Self::EVENT_SELECT);
        Ok(conn.query_row(&sql, params![id], Self::event_row).optional()?)
    }

    /// Events whose `[start_at, end_at)` window overlaps `[lower, upper)`,
    /// ordered by start time.
    pub fn events_overlapping(&self, lower: DateTime<Utc>, upper: DateTime<Utc>) -> StoreResult<Vec<EventRecord>> {
        let conn = self.conn()?;
        let sql = format!(
            "{} WHERE e.start_at < ?2 AND e.end_at > ?1 ORDER BY e.start_at ASC, e.id ASC",
            Self::EVENT_SELECT
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![encode_ts(lower), encode_ts(upper)], Self::event_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Returns false when no such event exists.
    pub fn delete_event(&self, id: i64) -> StoreResult<bool> {
        let conn = self.conn()?;
        let n = conn.execute("DELETE FROM events WHERE id = ?1", params![id])?;
        if n > 0 {
            info!("🗑️ Event {} deleted", id);
        }
        Ok(n > 0)
    }

    // ==================== CLEANING ====================

    pub fn insert_cleaning_log(
        &self,
        user_id: i64,
        location: &str,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO cleaning_logs (user_id, location, note, timestamp) VALUES (?1, ?2, ?3, ?4)",
            params![user_id, location, note, encode_ts(now)],
        )?;
        let id = conn.last_insert_rowid();
        info!("🧹 Cleaning log {}: {} by {}", id, location, user_id);
        Ok(id)
    }

    /// Newest first.
    pub fn recent_cleaning_logs(&self, limit: usize) -> StoreResult<Vec<CleaningLog>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT c.id, c.user_id, u.display_name, c.location, c.note, c.timestamp
             FROM cleaning_logs c LEFT JOIN users u ON u.user_id = c.user_id
             ORDER BY c.timestamp DESC, c.id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(CleaningLog {
                id: row.get(0)?,
                user_id: row.get(1)?,
                display_name: row.get(2)?,
                location: row.get(3)?,
                note: row.get::<_, Option<String>>(4)?.filter(|n| !n.is_empty()),
                timestamp: ts_column(row, 5)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ==================== MANUALS ====================

    /// Insert a manual unless one with the same title exists. Returns whether it was inserted.
    pub fn insert_manual_if_missing(&self, seed: &ManualSeed) -> StoreResult<bool> {
        let conn = self.conn()?;
        let n = conn.execute(
            "INSERT OR IGNORE INTO manuals (title, body, keywords) VALUES (?1, ?2, ?3)",
            params![seed.title.trim(), seed.body, join_keywords(&seed.keywords)],
        )?;
        Ok(n > 0)
    }

    /// Insert a manual, or replace body and keywords of the one with the same title.
    pub fn upsert_manual(&self, seed: &ManualSeed) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO manuals (title, body, keywords) VALUES (?1, ?2, ?3)
             ON CONFLICT(title) DO UPDATE SET body = excluded.body, keywords = excluded.keywords",
            params![seed.title.trim(), seed.body, join_keywords(&seed.keywords)],
        )?;
        Ok(())
    }

    fn manual_row(row: &Row<'_>) -> rusqlite::Result<ManualRecord> {
        Ok(ManualRecord {
            id: row.get(0)?,
            title: row.get(1)?,
            body: row.get(2)?,
            keywords: split_keywords(&row.get::<_, String>(3)?),
        })
    }

    /// All manuals, title order.
    pub fn manuals(&self) -> StoreResult<Vec<ManualRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, title, body, keywords FROM manuals ORDER BY title ASC, id ASC")?;
        let rows = stmt.query_map([], Self::manual_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn manual(&self, id: i64) -> StoreResult<Option<ManualRecord>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row("SELECT id, title, body, keywords FROM manuals WHERE id = ?1", params![id], Self::manual_row)
            .optional()?)
    }
}
