use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{from_millis, to_millis};
use crate::github::RemoteRepository;

use super::{user, UpsertPolicy};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Repository {
  pub id: i64,
  pub internal_id: i64,
  pub owner_id: i64,
  pub name: String,
  pub description: String,
  pub html_url: String,
  pub clone_url: String,
  pub default_branch: String,
  pub private: bool,
  pub visibility: String,
  pub has_issues: bool,
  pub fork: bool,
  pub time_updated: DateTime<Utc>,
}

const SELECT: &str = "SELECT r.id, r.internal_id, r.owner_id, r.name, r.description, r.html_url,
    r.clone_url, r.default_branch, r.private, r.visibility, r.has_issues, r.fork, r.time_updated
  FROM repositories r";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Repository> {
  Ok(Repository {
    id: row.get(0)?,
    internal_id: row.get(1)?,
    owner_id: row.get(2)?,
    name: row.get(3)?,
    description: row.get(4)?,
    html_url: row.get(5)?,
    clone_url: row.get(6)?,
    default_branch: row.get(7)?,
    private: row.get(8)?,
    visibility: row.get(9)?,
    has_issues: row.get(10)?,
    fork: row.get(11)?,
    time_updated: from_millis(row.get(12)?),
  })
}

pub fn get_by_id(conn: &Connection, id: i64) -> Result<Option<Repository>> {
  let repo = conn
    .query_row(&format!("{SELECT} WHERE r.id = ?1"), params![id], from_row)
    .optional()?;
  Ok(repo)
}

pub fn get_by_internal_id(conn: &Connection, internal_id: i64) -> Result<Option<Repository>> {
  let repo = conn
    .query_row(
      &format!("{SELECT} WHERE r.internal_id = ?1"),
      params![internal_id],
      from_row,
    )
    .optional()?;
  Ok(repo)
}

/// Look up `owner/name`, case-insensitively as GitHub does.
pub fn get_by_full_name(conn: &Connection, owner: &str, name: &str) -> Result<Option<Repository>> {
  let repo = conn
    .query_row(
      &format!(
        "{SELECT} JOIN users u ON u.id = r.owner_id
         WHERE u.login = ?1 COLLATE NOCASE AND r.name = ?2 COLLATE NOCASE"
      ),
      params![owner, name],
      from_row,
    )
    .optional()?;
  Ok(repo)
}

/// `owner/name`, resolving the owner through the users table.
pub fn full_name(conn: &Connection, repo: &Repository) -> Result<String> {
  let owner = user::get_by_id(conn, repo.owner_id)?
    .ok_or_else(|| eyre!("Owner {} of repository {} is missing", repo.owner_id, repo.name))?;
  Ok(format!("{}/{}", owner.login, repo.name))
}

/// Insert or update the repository and its owner.
pub fn get_or_create(
  conn: &Connection,
  remote: &RemoteRepository,
  policy: &UpsertPolicy,
) -> Result<Repository> {
  let owner = user::get_or_create(conn, &remote.owner, policy)?;
  let now = to_millis(policy.now);

  let id = match get_by_internal_id(conn, remote.id)? {
    Some(existing) => {
      conn.execute(
        "UPDATE repositories SET owner_id = ?1, name = ?2, description = ?3, html_url = ?4,
           clone_url = ?5, default_branch = ?6, private = ?7, visibility = ?8,
           has_issues = ?9, fork = ?10, time_updated = ?11
         WHERE id = ?12",
        params![
          owner.id,
          remote.name,
          remote.description,
          remote.html_url,
          remote.clone_url,
          remote.default_branch,
          remote.private,
          remote.visibility,
          remote.has_issues,
          remote.fork,
          now,
          existing.id
        ],
      )?;
      existing.id
    }
    None => {
      conn.execute(
        "INSERT INTO repositories (internal_id, owner_id, name, description, html_url,
           clone_url, default_branch, private, visibility, has_issues, fork, time_updated)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
          remote.id,
          owner.id,
          remote.name,
          remote.description,
          remote.html_url,
          remote.clone_url,
          remote.default_branch,
          remote.private,
          remote.visibility,
          remote.has_issues,
          remote.fork,
          now
        ],
      )?;
      conn.last_insert_rowid()
    }
  };

  get_by_id(conn, id)?.ok_or_else(|| eyre!("Repository {} vanished after write", id))
}

pub fn all(conn: &Connection) -> Result<Vec<Repository>> {
  let mut stmt = conn.prepare(&format!("{SELECT} ORDER BY r.name"))?;
  let repos = stmt
    .query_map([], from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(repos)
}

pub fn for_search(conn: &Connection, search_id: i64) -> Result<Vec<Repository>> {
  let mut stmt = conn.prepare(&format!(
    "{SELECT} JOIN search_repositories s ON s.repository_id = r.id
     WHERE s.search_id = ?1 ORDER BY r.name"
  ))?;
  let repos = stmt
    .query_map(params![search_id], from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(repos)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::Database;
  use crate::testing::fixtures;
  use chrono::Duration;

  #[test]
  fn create_and_resolve_full_name() {
    let db = Database::open_in_memory().unwrap();
    let policy = UpsertPolicy::at(fixtures::at(0), Duration::hours(4));
    let remote = fixtures::repository(10, "octokit", "octokit.net");

    let repo = db
      .write(|tx| get_or_create(tx, &remote, &policy))
      .unwrap();
    assert_eq!(db.read(|c| full_name(c, &repo)).unwrap(), "octokit/octokit.net");

    let found = db
      .read(|c| get_by_full_name(c, "Octokit", "Octokit.NET"))
      .unwrap()
      .unwrap();
    assert_eq!(found.id, repo.id);
  }

  #[test]
  fn update_keeps_row_and_refreshes_fields() {
    let db = Database::open_in_memory().unwrap();
    let policy = UpsertPolicy::at(fixtures::at(0), Duration::hours(4));
    let mut remote = fixtures::repository(10, "octokit", "octokit.net");

    let first = db
      .write(|tx| get_or_create(tx, &remote, &policy))
      .unwrap();
    remote.default_branch = "develop".to_string();
    let second = db
      .write(|tx| get_or_create(tx, &remote, &policy))
      .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.default_branch, "develop");
    assert_eq!(db.read(all).unwrap().len(), 1);
  }
}
