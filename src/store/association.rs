//! Many-to-many join tables.
//!
//! Every association row is keyed by `(owner, target)` and carries the time
//! it was last written. Upserting an existing pair only bumps that time.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::{from_millis, to_millis};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Association {
  IssueLabel,
  IssueAssignee,
  PullRequestLabel,
  PullRequestAssignee,
  SearchIssue,
  SearchPullRequest,
  SearchRepository,
  SearchUser,
}

impl Association {
  pub const ALL: [Association; 8] = [
    Association::IssueLabel,
    Association::IssueAssignee,
    Association::PullRequestLabel,
    Association::PullRequestAssignee,
    Association::SearchIssue,
    Association::SearchPullRequest,
    Association::SearchRepository,
    Association::SearchUser,
  ];

  /// `(table, owner column, target column)`.
  fn layout(self) -> (&'static str, &'static str, &'static str) {
    match self {
      Association::IssueLabel => ("issue_labels", "issue_id", "label_id"),
      Association::IssueAssignee => ("issue_assignees", "issue_id", "user_id"),
      Association::PullRequestLabel => ("pull_request_labels", "pull_request_id", "label_id"),
      Association::PullRequestAssignee => ("pull_request_assignees", "pull_request_id", "user_id"),
      Association::SearchIssue => ("search_issues", "search_id", "issue_id"),
      Association::SearchPullRequest => ("search_pull_requests", "search_id", "pull_request_id"),
      Association::SearchRepository => ("search_repositories", "search_id", "repository_id"),
      Association::SearchUser => ("search_users", "search_id", "user_id"),
    }
  }

  /// Tables the owner and target columns point into.
  fn parents(self) -> (&'static str, &'static str) {
    match self {
      Association::IssueLabel => ("issues", "labels"),
      Association::IssueAssignee => ("issues", "users"),
      Association::PullRequestLabel => ("pull_requests", "labels"),
      Association::PullRequestAssignee => ("pull_requests", "users"),
      Association::SearchIssue => ("searches", "issues"),
      Association::SearchPullRequest => ("searches", "pull_requests"),
      Association::SearchRepository => ("searches", "repositories"),
      Association::SearchUser => ("searches", "users"),
    }
  }

  pub fn table(self) -> &'static str {
    self.layout().0
  }
}

/// Insert `(owner, target)` or bump its timestamp.
pub fn upsert(
  conn: &Connection,
  kind: Association,
  owner: i64,
  target: i64,
  now: DateTime<Utc>,
) -> Result<()> {
  let (table, left, right) = kind.layout();
  conn.execute(
    &format!(
      "INSERT INTO {table} ({left}, {right}, time_updated) VALUES (?1, ?2, ?3)
       ON CONFLICT({left}, {right}) DO UPDATE SET time_updated = excluded.time_updated"
    ),
    params![owner, target, to_millis(now)],
  )?;
  Ok(())
}

/// Make `targets` the complete set of associations for `owner`.
pub fn replace_all(
  conn: &Connection,
  kind: Association,
  owner: i64,
  targets: &[i64],
  now: DateTime<Utc>,
) -> Result<()> {
  let (table, left, _) = kind.layout();
  conn.execute(
    &format!("DELETE FROM {table} WHERE {left} = ?1"),
    params![owner],
  )?;
  for target in targets {
    upsert(conn, kind, owner, *target, now)?;
  }
  Ok(())
}

/// When the pair was last written, if it exists.
pub fn get(
  conn: &Connection,
  kind: Association,
  owner: i64,
  target: i64,
) -> Result<Option<DateTime<Utc>>> {
  let (table, left, right) = kind.layout();
  let millis: Option<i64> = conn
    .query_row(
      &format!("SELECT time_updated FROM {table} WHERE {left} = ?1 AND {right} = ?2"),
      params![owner, target],
      |row| row.get(0),
    )
    .optional()?;
  Ok(millis.map(from_millis))
}

/// Target ids associated with `owner`.
pub fn targets(conn: &Connection, kind: Association, owner: i64) -> Result<Vec<i64>> {
  let (table, left, right) = kind.layout();
  let mut stmt = conn.prepare(&format!(
    "SELECT {right} FROM {table} WHERE {left} = ?1 ORDER BY {right}"
  ))?;
  let ids = stmt
    .query_map(params![owner], |row| row.get(0))?
    .collect::<rusqlite::Result<Vec<i64>>>()?;
  Ok(ids)
}

/// Target ids whose row for `owner` was written strictly before `cutoff`.
pub fn targets_before(
  conn: &Connection,
  kind: Association,
  owner: i64,
  cutoff: DateTime<Utc>,
) -> Result<Vec<i64>> {
  let (table, left, right) = kind.layout();
  let mut stmt = conn.prepare(&format!(
    "SELECT {right} FROM {table} WHERE {left} = ?1 AND time_updated < ?2 ORDER BY {right}"
  ))?;
  let ids = stmt
    .query_map(params![owner, to_millis(cutoff)], |row| row.get(0))?
    .collect::<rusqlite::Result<Vec<i64>>>()?;
  Ok(ids)
}

/// Drop rows for `owner` written strictly before `cutoff`.
pub fn delete_before(
  conn: &Connection,
  kind: Association,
  owner: i64,
  cutoff: DateTime<Utc>,
) -> Result<usize> {
  let (table, left, _) = kind.layout();
  let deleted = conn.execute(
    &format!("DELETE FROM {table} WHERE {left} = ?1 AND time_updated < ?2"),
    params![owner, to_millis(cutoff)],
  )?;
  Ok(deleted)
}

/// Drop association rows whose owner or target row no longer exists.
pub fn delete_orphans(conn: &Connection) -> Result<usize> {
  let mut deleted = 0;
  for kind in Association::ALL {
    let (table, left, right) = kind.layout();
    let (owners, targets) = kind.parents();
    deleted += conn.execute(
      &format!(
        "DELETE FROM {table}
         WHERE {left} NOT IN (SELECT id FROM {owners})
            OR {right} NOT IN (SELECT id FROM {targets})"
      ),
      [],
    )?;
  }
  Ok(deleted)
}
