use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{from_millis, to_millis};
use crate::github::RemoteUser;

use super::UpsertPolicy;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct User {
  pub id: i64,
  /// GitHub's numeric user id.
  pub internal_id: i64,
  pub login: String,
  pub avatar_url: String,
  pub user_type: String,
  pub time_updated: DateTime<Utc>,
}

const COLUMNS: &str = "id, internal_id, login, avatar_url, user_type, time_updated";

fn from_row(row: &Row<'_>) -> rusqlite::Result<User> {
  Ok(User {
    id: row.get(0)?,
    internal_id: row.get(1)?,
    login: row.get(2)?,
    avatar_url: row.get(3)?,
    user_type: row.get(4)?,
    time_updated: from_millis(row.get(5)?),
  })
}

fn query_one(conn: &Connection, filter: &str, value: &dyn rusqlite::ToSql) -> Result<Option<User>> {
  let sql = format!("SELECT {COLUMNS} FROM users WHERE {filter}");
  let user = conn.query_row(&sql, [value], from_row).optional()?;
  Ok(user)
}

fn query_many(conn: &Connection, sql: &str, id: i64) -> Result<Vec<User>> {
  let mut stmt = conn.prepare(sql)?;
  let users = stmt
    .query_map(params![id], from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(users)
}

pub fn get_by_id(conn: &Connection, id: i64) -> Result<Option<User>> {
  query_one(conn, "id = ?1", &id)
}

pub fn get_by_internal_id(conn: &Connection, internal_id: i64) -> Result<Option<User>> {
  query_one(conn, "internal_id = ?1", &internal_id)
}

pub fn get_by_login(conn: &Connection, login: &str) -> Result<Option<User>> {
  query_one(conn, "login = ?1 COLLATE NOCASE", &login)
}

/// Insert the user, or refresh it if the stored copy is older than the
/// update threshold.
pub fn get_or_create(conn: &Connection, remote: &RemoteUser, policy: &UpsertPolicy) -> Result<User> {
  match get_by_internal_id(conn, remote.id)? {
    Some(existing) if !policy.is_due(existing.time_updated) => Ok(existing),
    Some(existing) => {
      conn.execute(
        "UPDATE users SET login = ?1, avatar_url = ?2, user_type = ?3, time_updated = ?4
         WHERE id = ?5",
        params![
          remote.login,
          remote.avatar_url,
          remote.user_type,
          to_millis(policy.now),
          existing.id
        ],
      )?;
      fetch(conn, existing.id)
    }
    None => {
      conn.execute(
        "INSERT INTO users (internal_id, login, avatar_url, user_type, time_updated)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
          remote.id,
          remote.login,
          remote.avatar_url,
          remote.user_type,
          to_millis(policy.now)
        ],
      )?;
      fetch(conn, conn.last_insert_rowid())
    }
  }
}

fn fetch(conn: &Connection, id: i64) -> Result<User> {
  get_by_id(conn, id)?.ok_or_else(|| eyre!("User {} vanished after write", id))
}

pub fn assignees_of_issue(conn: &Connection, issue_id: i64) -> Result<Vec<User>> {
  query_many(
    conn,
    "SELECT u.id, u.internal_id, u.login, u.avatar_url, u.user_type, u.time_updated
     FROM users u JOIN issue_assignees a ON a.user_id = u.id
     WHERE a.issue_id = ?1 ORDER BY u.login",
    issue_id,
  )
}

pub fn assignees_of_pull_request(conn: &Connection, pull_request_id: i64) -> Result<Vec<User>> {
  query_many(
    conn,
    "SELECT u.id, u.internal_id, u.login, u.avatar_url, u.user_type, u.time_updated
     FROM users u JOIN pull_request_assignees a ON a.user_id = u.id
     WHERE a.pull_request_id = ?1 ORDER BY u.login",
    pull_request_id,
  )
}

pub fn for_search(conn: &Connection, search_id: i64) -> Result<Vec<User>> {
  query_many(
    conn,
    "SELECT u.id, u.internal_id, u.login, u.avatar_url, u.user_type, u.time_updated
     FROM users u JOIN search_users s ON s.user_id = u.id
     WHERE s.search_id = ?1 ORDER BY u.login",
    search_id,
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::Database;
  use crate::testing::fixtures;
  use chrono::Duration;

  fn policy_at(seconds: i64) -> UpsertPolicy {
    UpsertPolicy::at(fixtures::at(seconds), Duration::hours(4))
  }

  #[test]
  fn create_then_get() {
    let db = Database::open_in_memory().unwrap();
    let remote = fixtures::user("octocat");

    let created = db
      .write(|tx| get_or_create(tx, &remote, &policy_at(0)))
      .unwrap();
    assert_eq!(created.internal_id, remote.id);
    assert_eq!(created.login, "octocat");

    let by_login = db.read(|c| get_by_login(c, "OctoCat")).unwrap().unwrap();
    assert_eq!(by_login.id, created.id);
  }

  #[test]
  fn upsert_is_idempotent() {
    let db = Database::open_in_memory().unwrap();
    let remote = fixtures::user("octocat");

    let first = db
      .write(|tx| get_or_create(tx, &remote, &policy_at(0)))
      .unwrap();
    let second = db
      .write(|tx| get_or_create(tx, &remote, &policy_at(60)))
      .unwrap();
    assert_eq!(first.id, second.id);

    let count: i64 = db
      .read(|c| Ok(c.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?))
      .unwrap();
    assert_eq!(count, 1);
  }

  #[test]
  fn changes_apply_only_past_threshold() {
    let db = Database::open_in_memory().unwrap();
    let mut remote = fixtures::user("octocat");
    db.write(|tx| get_or_create(tx, &remote, &policy_at(0)))
      .unwrap();

    remote.avatar_url = "https://avatars.example.com/new".to_string();
    let early = db
      .write(|tx| get_or_create(tx, &remote, &policy_at(3_600)))
      .unwrap();
    assert_ne!(early.avatar_url, remote.avatar_url);

    let late = db
      .write(|tx| get_or_create(tx, &remote, &policy_at(5 * 3_600)))
      .unwrap();
    assert_eq!(late.avatar_url, remote.avatar_url);
    assert_eq!(late.time_updated, fixtures::at(5 * 3_600));
  }
}
