//! Integration tests for the on-disk house database.
//!
//! Run with: cargo test --test store

use chrono::{NaiveDate, TimeZone, Utc};
use tempfile::TempDir;

use sharehouse_bot::house::Database;
use sharehouse_bot::house::database::{NewEvent, PresenceStatus, Role};
use sharehouse_bot::house::Sender;

fn aki() -> Sender {
    Sender {
        user_id: 1,
        username: Some("aki".to_string()),
        display_name: "Aki".to_string(),
    }
}

#[test]
fn test_records_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("house.db");
    let now = Utc.with_ymd_and_hms(2026, 10, 18, 3, 0, 0).unwrap();
    let day = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();

    let event_id = {
        let db = Database::open(&path).unwrap();
        db.upsert_resident(&aki(), Role::Member, now).unwrap();
        db.upsert_presence(1, day, PresenceStatus::Away, Some("出張"), now).unwrap();
        db.insert_cleaning_log(1, "玄関", None, now).unwrap();
        let event = NewEvent {
            title: "鍋パーティー".to_string(),
            start_at: Utc.with_ymd_and_hms(2026, 10, 20, 10, 0, 0).unwrap(),
            end_at: Utc.with_ymd_and_hms(2026, 10, 20, 12, 0, 0).unwrap(),
            location: None,
            memo: None,
        };
        db.insert_event(&event, 1, now).unwrap()
    };

    let db = Database::open(&path).unwrap();
    let presence = db.presence_for(1, day).unwrap().unwrap();
    assert_eq!(presence.status, PresenceStatus::Away);
    assert_eq!(presence.note.as_deref(), Some("出張"));

    let event = db.event(event_id).unwrap().unwrap();
    assert_eq!(event.title, "鍋パーティー");
    assert_eq!(event.creator_name.as_deref(), Some("Aki"));
    assert_eq!(event.start_at, Utc.with_ymd_and_hms(2026, 10, 20, 10, 0, 0).unwrap());

    let logs = db.recent_cleaning_logs(5).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].timestamp, now);
}

#[test]
fn test_presence_is_one_row_per_resident_and_day() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(&dir.path().join("house.db")).unwrap();
    let now = Utc.with_ymd_and_hms(2026, 10, 18, 3, 0, 0).unwrap();
    let day = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
    db.upsert_resident(&aki(), Role::Member, now).unwrap();

    db.upsert_presence(1, day, PresenceStatus::Home, None, now).unwrap();
    db.upsert_presence(1, day, PresenceStatus::Away, Some("22時に帰宅"), now).unwrap();
    db.upsert_presence(1, day.succ_opt().unwrap(), PresenceStatus::Home, None, now).unwrap();

    let today = db.presence_on(day).unwrap();
    assert_eq!(today.len(), 1);
    assert_eq!(today[0].status, PresenceStatus::Away);
    assert_eq!(today[0].note.as_deref(), Some("22時に帰宅"));
    assert_eq!(db.presence_on(day.succ_opt().unwrap()).unwrap().len(), 1);
}

#[test]
fn test_database_from_older_scripts_is_upgraded() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("legacy.db");
    {
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE users (
                user_id INTEGER PRIMARY KEY,
                username TEXT,
                display_name TEXT NOT NULL,
                room_no TEXT,
                role TEXT NOT NULL DEFAULT 'member',
                created_at TEXT NOT NULL
            );
            CREATE TABLE cleaning_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                location TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );
            INSERT INTO users (user_id, display_name, room_no, created_at)
            VALUES (1, 'Aki', '201', '2025-09-01 09:00:00');
            INSERT INTO cleaning_logs (user_id, location, timestamp)
            VALUES (1, 'キッチン', '2025-09-01 10:00:00');",
        )
        .unwrap();
    }

    let db = Database::open(&path).unwrap();

    let logs = db.recent_cleaning_logs(5).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].location, "キッチン");
    assert_eq!(logs[0].note, None);
    assert_eq!(logs[0].timestamp, Utc.with_ymd_and_hms(2025, 9, 1, 10, 0, 0).unwrap());

    db.set_timezone(1, Some("Europe/Berlin")).unwrap();
    let resident = db.resident(1).unwrap().unwrap();
    assert_eq!(resident.room_no.as_deref(), Some("201"));
    assert_eq!(resident.timezone.as_deref(), Some("Europe/Berlin"));

    // Tables the old scripts never created exist now.
    assert!(db.manuals().unwrap().is_empty());
    assert!(db.event(1).unwrap().is_none());
}
