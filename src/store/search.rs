use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::db::{from_millis, to_millis};

use super::association::{self, Association};

/// What a saved search returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchKind {
  Issues,
  PullRequests,
  IssuesAndPullRequests,
  Repositories,
  #[default]
  Unknown,
}

impl SearchKind {
  fn to_db(self) -> i64 {
    match self {
      SearchKind::Unknown => 0,
      SearchKind::Issues => 1,
      SearchKind::PullRequests => 2,
      SearchKind::IssuesAndPullRequests => 3,
      SearchKind::Repositories => 4,
    }
  }

  fn from_db(value: i64) -> Self {
    match value {
      1 => SearchKind::Issues,
      2 => SearchKind::PullRequests,
      3 => SearchKind::IssuesAndPullRequests,
      4 => SearchKind::Repositories,
      _ => SearchKind::Unknown,
    }
  }

  /// Derive the kind from `is:`/`type:` qualifiers in a query string.
  /// Queries with neither or both qualifiers return both kinds.
  pub fn infer(query: &str) -> Self {
    let mut pr = false;
    let mut issue = false;
    for term in query.split_whitespace() {
      match term.to_ascii_lowercase().as_str() {
        "is:pr" | "type:pr" => pr = true,
        "is:issue" | "type:issue" => issue = true,
        _ => {}
      }
    }
    match (issue, pr) {
      (true, false) => SearchKind::Issues,
      (false, true) => SearchKind::PullRequests,
      _ => SearchKind::IssuesAndPullRequests,
    }
  }

  pub fn includes_issues(self) -> bool {
    matches!(
      self,
      SearchKind::Issues | SearchKind::IssuesAndPullRequests | SearchKind::Unknown
    )
  }

  pub fn includes_pull_requests(self) -> bool {
    matches!(
      self,
      SearchKind::PullRequests | SearchKind::IssuesAndPullRequests | SearchKind::Unknown
    )
  }
}

/// A saved search as the host defines it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchQuery {
  pub name: String,
  pub query: String,
  #[serde(default)]
  pub kind: SearchKind,
}

impl SearchQuery {
  pub fn new(name: impl Into<String>, query: impl Into<String>, kind: SearchKind) -> Self {
    Self {
      name: name.into(),
      query: query.into(),
      kind,
    }
  }

  /// The declared kind, or the inferred one when the host left it `Unknown`.
  pub fn effective_kind(&self) -> SearchKind {
    match self.kind {
      SearchKind::Unknown => SearchKind::infer(&self.query),
      kind => kind,
    }
  }
}

impl fmt::Display for SearchQuery {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} ({})", self.name, self.query)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Search {
  pub id: i64,
  pub name: String,
  pub query: String,
  pub kind: SearchKind,
  pub time_updated: DateTime<Utc>,
}

const SELECT: &str = "SELECT id, name, query, kind, time_updated FROM searches";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Search> {
  Ok(Search {
    id: row.get(0)?,
    name: row.get(1)?,
    query: row.get(2)?,
    kind: SearchKind::from_db(row.get(3)?),
    time_updated: from_millis(row.get(4)?),
  })
}

pub fn get_by_id(conn: &Connection, id: i64) -> Result<Option<Search>> {
  let search = conn
    .query_row(&format!("{SELECT} WHERE id = ?1"), params![id], from_row)
    .optional()?;
  Ok(search)
}

/// Look up a search by its identity key.
pub fn get(conn: &Connection, query: &SearchQuery) -> Result<Option<Search>> {
  let search = conn
    .query_row(
      &format!("{SELECT} WHERE name = ?1 AND query = ?2 AND kind = ?3"),
      params![query.name, query.query, query.kind.to_db()],
      from_row,
    )
    .optional()?;
  Ok(search)
}

/// Resolve the search row, creating it if needed, and stamp it as refreshed
/// at `now`.
pub fn get_or_create(conn: &Connection, query: &SearchQuery, now: DateTime<Utc>) -> Result<Search> {
  conn.execute(
    "INSERT INTO searches (name, query, kind, time_updated) VALUES (?1, ?2, ?3, ?4)
     ON CONFLICT(name, query, kind) DO UPDATE SET time_updated = excluded.time_updated",
    params![query.name, query.query, query.kind.to_db(), to_millis(now)],
  )?;
  get(conn, query)?.ok_or_else(|| eyre!("Search {} vanished after write", query))
}

pub fn all(conn: &Connection) -> Result<Vec<Search>> {
  let mut stmt = conn.prepare(&format!("{SELECT} ORDER BY name"))?;
  let searches = stmt
    .query_map([], from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(searches)
}

/// Drop every association of `search_id` written before `cutoff`.
pub fn delete_rows_before(
  conn: &Connection,
  search_id: i64,
  cutoff: DateTime<Utc>,
) -> Result<usize> {
  let mut deleted = 0;
  for kind in [
    Association::SearchIssue,
    Association::SearchPullRequest,
    Association::SearchRepository,
    Association::SearchUser,
  ] {
    deleted += association::delete_before(conn, kind, search_id, cutoff)?;
  }
  Ok(deleted)
}

/// Drop searches not refreshed since `cutoff`, with their associations.
pub fn delete_before(conn: &Connection, cutoff: DateTime<Utc>) -> Result<usize> {
  let deleted = conn.execute(
    "DELETE FROM searches WHERE time_updated < ?1",
    params![to_millis(cutoff)],
  )?;
  if deleted > 0 {
    association::delete_orphans(conn)?;
  }
  Ok(deleted)
}
