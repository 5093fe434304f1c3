use chrono::{DateTime, Utc};
use color_eyre::Result;
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::schema::META_LAST_UPDATED;
use crate::db::{from_millis, to_millis};

pub fn get(conn: &Connection, key: &str) -> Result<Option<String>> {
  let value = conn
    .query_row(
      "SELECT value FROM metadata WHERE key = ?1",
      params![key],
      |row| row.get(0),
    )
    .optional()?;
  Ok(value)
}

pub fn set(conn: &Connection, key: &str, value: &str) -> Result<()> {
  conn.execute(
    "INSERT INTO metadata (key, value) VALUES (?1, ?2)
     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    params![key, value],
  )?;
  Ok(())
}

/// When the last successful sync committed, or `None` if never.
pub fn last_updated(conn: &Connection) -> Result<Option<DateTime<Utc>>> {
  let millis = get(conn, META_LAST_UPDATED)?
    .and_then(|v| v.parse::<i64>().ok())
    .filter(|m| *m > 0);
  Ok(millis.map(from_millis))
}

pub fn set_last_updated(conn: &Connection, time: DateTime<Utc>) -> Result<()> {
  set(conn, META_LAST_UPDATED, &to_millis(time).to_string())
}
