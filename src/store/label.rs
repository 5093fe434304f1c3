use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{from_millis, to_millis};
use crate::github::RemoteLabel;

use super::UpsertPolicy;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Label {
  pub id: i64,
  pub internal_id: i64,
  pub name: String,
  pub description: String,
  pub color: String,
  pub is_default: bool,
  pub time_updated: DateTime<Utc>,
}

const SELECT: &str =
  "SELECT l.id, l.internal_id, l.name, l.description, l.color, l.is_default, l.time_updated
   FROM labels l";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Label> {
  Ok(Label {
    id: row.get(0)?,
    internal_id: row.get(1)?,
    name: row.get(2)?,
    description: row.get(3)?,
    color: row.get(4)?,
    is_default: row.get(5)?,
    time_updated: from_millis(row.get(6)?),
  })
}

fn query_many(conn: &Connection, sql: &str, id: i64) -> Result<Vec<Label>> {
  let mut stmt = conn.prepare(sql)?;
  let labels = stmt
    .query_map(params![id], from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(labels)
}

pub fn get_by_id(conn: &Connection, id: i64) -> Result<Option<Label>> {
  let label = conn
    .query_row(&format!("{SELECT} WHERE l.id = ?1"), params![id], from_row)
    .optional()?;
  Ok(label)
}

pub fn get_by_internal_id(conn: &Connection, internal_id: i64) -> Result<Option<Label>> {
  let label = conn
    .query_row(
      &format!("{SELECT} WHERE l.internal_id = ?1"),
      params![internal_id],
      from_row,
    )
    .optional()?;
  Ok(label)
}

/// Insert the label, or refresh it once the stored copy is older than the
/// update threshold.
pub fn get_or_create(
  conn: &Connection,
  remote: &RemoteLabel,
  policy: &UpsertPolicy,
) -> Result<Label> {
  let id = match get_by_internal_id(conn, remote.id)? {
    Some(existing) if !policy.is_due(existing.time_updated) => return Ok(existing),
    Some(existing) => {
      conn.execute(
        "UPDATE labels SET name = ?1, description = ?2, color = ?3, is_default = ?4,
           time_updated = ?5
         WHERE id = ?6",
        params![
          remote.name,
          remote.description,
          remote.color,
          remote.is_default,
          to_millis(policy.now),
          existing.id
        ],
      )?;
      existing.id
    }
    None => {
      conn.execute(
        "INSERT INTO labels (internal_id, name, description, color, is_default, time_updated)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
          remote.id,
          remote.name,
          remote.description,
          remote.color,
          remote.is_default,
          to_millis(policy.now)
        ],
      )?;
      conn.last_insert_rowid()
    }
  };
  get_by_id(conn, id)?.ok_or_else(|| eyre!("Label {} vanished after write", id))
}

pub fn for_issue(conn: &Connection, issue_id: i64) -> Result<Vec<Label>> {
  query_many(
    conn,
    &format!(
      "{SELECT} JOIN issue_labels il ON il.label_id = l.id
       WHERE il.issue_id = ?1 ORDER BY l.name"
    ),
    issue_id,
  )
}

pub fn for_pull_request(conn: &Connection, pull_request_id: i64) -> Result<Vec<Label>> {
  query_many(
    conn,
    &format!(
      "{SELECT} JOIN pull_request_labels pl ON pl.label_id = l.id
       WHERE pl.pull_request_id = ?1 ORDER BY l.name"
    ),
    pull_request_id,
  )
}
