use std::collections::HashSet;

use rusqlite::{Connection, OptionalExtension, Row};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::{
    entry::{format_date, parse_date, EntryInput, Quality, SleepEntry},
    settings::UserSettings,
};

pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS sleep_entries (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  user_id TEXT NOT NULL,
  date TEXT NOT NULL,
  hours REAL NOT NULL,
  quality TEXT NOT NULL,
  cycles INTEGER NOT NULL,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  UNIQUE(user_id, date)
);
CREATE INDEX IF NOT EXISTS idx_sleep_entries_user_date ON sleep_entries(user_id, date);

CREATE TABLE IF NOT EXISTS user_settings (
  user_id TEXT PRIMARY KEY,
  sleep_goal_hours REAL NOT NULL,
  default_wake_time TEXT NOT NULL,
  updated_at TEXT NOT NULL
);
"#,
    )?;
    ensure_sleep_entries_columns(conn)?;
    Ok(())
}

fn ensure_sleep_entries_columns(conn: &Connection) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare("PRAGMA table_info(sleep_entries)")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    let mut cols: HashSet<String> = HashSet::new();
    for r in rows {
        cols.insert(r?);
    }

    if !cols.contains("updated_at") {
        conn.execute(
            "ALTER TABLE sleep_entries ADD COLUMN updated_at TEXT NOT NULL DEFAULT '1970-01-01T00:00:00Z'",
            [],
        )?;
    }

    Ok(())
}

pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}

const ENTRY_COLUMNS: &str = "id, date, hours, quality, cycles, created_at, updated_at";

fn conversion_error(col: usize) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        col,
        rusqlite::types::Type::Text,
        Box::new(std::fmt::Error),
    )
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<SleepEntry> {
    let date_s: String = row.get(1)?;
    let date = parse_date(&date_s).map_err(|_| conversion_error(1))?;
    let quality_s: String = row.get(3)?;
    // Rows are only written through `EntryInput`, so anything else is corruption.
    let quality: Quality = quality_s.parse().map_err(|_| conversion_error(3))?;
    let cycles: i64 = row.get(4)?;
    Ok(SleepEntry {
        id: row.get(0)?,
        date,
        hours: row.get(2)?,
        quality,
        cycles: cycles.clamp(0, u8::MAX as i64) as u8,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

/// Newest first.
pub fn list_entries(
    conn: &mut Connection,
    user_id: &str,
    limit: Option<usize>,
) -> rusqlite::Result<Vec<SleepEntry>> {
    let limit = limit.map(|l| l as i64).unwrap_or(-1);
    let mut stmt = conn.prepare(&format!(
        "SELECT {ENTRY_COLUMNS} FROM sleep_entries WHERE user_id = ?1 ORDER BY date DESC LIMIT ?2"
    ))?;
    let rows = stmt.query_map((user_id, limit), entry_from_row)?;

    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

pub fn get_entry(conn: &mut Connection, user_id: &str, id: i64) -> rusqlite::Result<Option<SleepEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ENTRY_COLUMNS} FROM sleep_entries WHERE user_id = ?1 AND id = ?2"
    ))?;
    stmt.query_row((user_id, id), entry_from_row).optional()
}

fn get_entry_by_date(conn: &Connection, user_id: &str, date: &str) -> rusqlite::Result<SleepEntry> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ENTRY_COLUMNS} FROM sleep_entries WHERE user_id = ?1 AND date = ?2"
    ))?;
    stmt.query_row((user_id, date), entry_from_row)
}

/// Creates the entry for `input.date` or overwrites the one already stored for it.
/// Returns the stored row and whether it was newly created.
pub fn upsert_entry(
    conn: &Connection,
    user_id: &str,
    input: &EntryInput,
    now: &str,
) -> rusqlite::Result<(SleepEntry, bool)> {
    let date = format_date(input.date);
    let existed = conn
        .query_row(
            "SELECT 1 FROM sleep_entries WHERE user_id = ?1 AND date = ?2",
            (user_id, &date),
            |_| Ok(()),
        )
        .optional()?
        .is_some();

    conn.execute(
        r#"
INSERT INTO sleep_entries (user_id, date, hours, quality, cycles, created_at, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
ON CONFLICT(user_id, date) DO UPDATE SET
  hours=excluded.hours,
  quality=excluded.quality,
  cycles=excluded.cycles,
  updated_at=excluded.updated_at
"#,
        (
            user_id,
            &date,
            input.hours,
            input.quality.as_str(),
            input.cycles as i64,
            now,
        ),
    )?;

    Ok((get_entry_by_date(conn, user_id, &date)?, !existed))
}

/// Replaces every field of entry `id`. A date already used by another of the
/// user's entries fails with a constraint violation.
pub fn update_entry(
    conn: &mut Connection,
    user_id: &str,
    id: i64,
    input: &EntryInput,
    now: &str,
) -> rusqlite::Result<Option<SleepEntry>> {
    let n = conn.execute(
        "UPDATE sleep_entries SET date = ?1, hours = ?2, quality = ?3, cycles = ?4, updated_at = ?5 WHERE user_id = ?6 AND id = ?7",
        (
            format_date(input.date),
            input.hours,
            input.quality.as_str(),
            input.cycles as i64,
            now,
            user_id,
            id,
        ),
    )?;
    if n == 0 {
        return Ok(None);
    }
    get_entry(conn, user_id, id)
}

pub fn delete_entry(conn: &mut Connection, user_id: &str, id: i64) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM sleep_entries WHERE user_id = ?1 AND id = ?2",
        (user_id, id),
    )
}

pub fn wipe_entries(conn: &mut Connection, user_id: &str) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM sleep_entries WHERE user_id = ?1", [user_id])
}

pub fn load_settings(
    conn: &mut Connection,
    user_id: &str,
    defaults: &UserSettings,
) -> rusqlite::Result<UserSettings> {
    let mut stmt = conn.prepare(
        "SELECT sleep_goal_hours, default_wake_time FROM user_settings WHERE user_id = ?1",
    )?;
    let stored = stmt
        .query_row([user_id], |row| {
            Ok(UserSettings {
                sleep_goal_hours: row.get(0)?,
                default_wake_time: row.get(1)?,
            })
        })
        .optional()?;
    Ok(stored.unwrap_or_else(|| defaults.clone()))
}

pub fn upsert_settings(
    conn: &mut Connection,
    user_id: &str,
    settings: &UserSettings,
    updated_at: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        r#"
INSERT INTO user_settings (user_id, sleep_goal_hours, default_wake_time, updated_at)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(user_id) DO UPDATE SET
  sleep_goal_hours=excluded.sleep_goal_hours,
  default_wake_time=excluded.default_wake_time,
  updated_at=excluded.updated_at
"#,
        (
            user_id,
            settings.sleep_goal_hours,
            &settings.default_wake_time,
            updated_at,
        ),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        conn
    }

    fn input(date: &str, hours: f64) -> EntryInput {
        EntryInput::new(parse_date(date).unwrap(), hours, Quality::Good, 5).unwrap()
    }

    #[test]
    fn upsert_keeps_one_row_per_user_and_date() {
        let mut conn = db();
        let (a, created) = upsert_entry(&mut conn, "alice", &input("2024-01-02", 7.0), "t1").unwrap();
        assert!(created);
        let (b, created) = upsert_entry(&mut conn, "alice", &input("2024-01-02", 8.5), "t2").unwrap();
        assert!(!created);
        assert_eq!(a.id, b.id);
        assert_eq!(b.hours, 8.5);
        assert_eq!(b.created_at, "t1");
        assert_eq!(b.updated_at, "t2");

        upsert_entry(&mut conn, "bob", &input("2024-01-02", 6.0), "t3").unwrap();
        assert_eq!(list_entries(&mut conn, "alice", None).unwrap().len(), 1);
        assert_eq!(list_entries(&mut conn, "bob", None).unwrap().len(), 1);
    }

    #[test]
    fn list_is_newest_first_and_limited() {
        let mut conn = db();
        for d in ["2024-01-01", "2024-01-03", "2024-01-02"] {
            upsert_entry(&mut conn, "alice", &input(d, 7.0), "t").unwrap();
        }
        let all = list_entries(&mut conn, "alice", None).unwrap();
        let dates: Vec<String> = all.iter().map(|e| format_date(e.date)).collect();
        assert_eq!(dates, vec!["2024-01-03", "2024-01-02", "2024-01-01"]);
        assert_eq!(list_entries(&mut conn, "alice", Some(2)).unwrap().len(), 2);
    }

    #[test]
    fn update_to_taken_date_is_a_constraint_violation() {
        let mut conn = db();
        let (first, _) = upsert_entry(&mut conn, "alice", &input("2024-01-01", 7.0), "t").unwrap();
        upsert_entry(&mut conn, "alice", &input("2024-01-02", 7.0), "t").unwrap();

        let err = update_entry(&mut conn, "alice", first.id, &input("2024-01-02", 9.0), "t2")
            .unwrap_err();
        match err {
            rusqlite::Error::SqliteFailure(e, _) => {
                assert_eq!(e.code, rusqlite::ErrorCode::ConstraintViolation)
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn update_and_delete_are_scoped_to_owner() {
        let mut conn = db();
        let (e, _) = upsert_entry(&mut conn, "alice", &input("2024-01-01", 7.0), "t").unwrap();
        assert!(update_entry(&mut conn, "bob", e.id, &input("2024-01-01", 9.0), "t")
            .unwrap()
            .is_none());
        assert_eq!(delete_entry(&mut conn, "bob", e.id).unwrap(), 0);

        let updated = update_entry(&mut conn, "alice", e.id, &input("2024-01-05", 9.0), "t2")
            .unwrap()
            .unwrap();
        assert_eq!(format_date(updated.date), "2024-01-05");
        assert_eq!(delete_entry(&mut conn, "alice", e.id).unwrap(), 1);
        assert!(get_entry(&mut conn, "alice", e.id).unwrap().is_none());
    }

    #[test]
    fn settings_fall_back_to_defaults() {
        let mut conn = db();
        let defaults = UserSettings::with_goal(7.0);
        assert_eq!(load_settings(&mut conn, "alice", &defaults).unwrap(), defaults);

        let custom = UserSettings {
            sleep_goal_hours: 9.0,
            default_wake_time: "06:15".to_string(),
        };
        upsert_settings(&mut conn, "alice", &custom, "t").unwrap();
        assert_eq!(load_settings(&mut conn, "alice", &defaults).unwrap(), custom);
        assert_eq!(load_settings(&mut conn, "bob", &defaults).unwrap(), defaults);
    }

    #[test]
    fn init_db_is_idempotent() {
        let conn = db();
        init_db(&conn).unwrap();
    }
}
