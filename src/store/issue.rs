use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{from_millis, join_ids, to_millis};
use crate::github::RemoteIssue;

use super::association::{self, Association};
use super::{label, user, UpsertPolicy};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Issue {
  pub id: i64,
  pub internal_id: i64,
  pub number: i64,
  /// `NO_ROW_ID` until the owning sync resolves the repository.
  pub repository_id: i64,
  pub author_id: i64,
  pub title: String,
  pub body: String,
  pub state: String,
  pub html_url: String,
  pub time_created: DateTime<Utc>,
  pub time_updated: DateTime<Utc>,
  pub time_closed: Option<DateTime<Utc>>,
  pub time_last_observed: DateTime<Utc>,
  /// Comma-joined label row ids, compared to detect label changes.
  pub label_ids: String,
  pub assignee_ids: String,
}

const SELECT: &str = "SELECT i.id, i.internal_id, i.number, i.repository_id, i.author_id,
    i.title, i.body, i.state, i.html_url, i.time_created, i.time_updated, i.time_closed,
    i.time_last_observed, i.label_ids, i.assignee_ids
  FROM issues i";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Issue> {
  Ok(Issue {
    id: row.get(0)?,
    internal_id: row.get(1)?,
    number: row.get(2)?,
    repository_id: row.get(3)?,
    author_id: row.get(4)?,
    title: row.get(5)?,
    body: row.get(6)?,
    state: row.get(7)?,
    html_url: row.get(8)?,
    time_created: from_millis(row.get(9)?),
    time_updated: from_millis(row.get(10)?),
    time_closed: row.get::<_, Option<i64>>(11)?.map(from_millis),
    time_last_observed: from_millis(row.get(12)?),
    label_ids: row.get(13)?,
    assignee_ids: row.get(14)?,
  })
}

fn query_many(conn: &Connection, sql: &str, id: i64) -> Result<Vec<Issue>> {
  let mut stmt = conn.prepare(sql)?;
  let issues = stmt
    .query_map(params![id], from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(issues)
}

pub fn get_by_id(conn: &Connection, id: i64) -> Result<Option<Issue>> {
  let issue = conn
    .query_row(&format!("{SELECT} WHERE i.id = ?1"), params![id], from_row)
    .optional()?;
  Ok(issue)
}

pub fn get_by_internal_id(conn: &Connection, internal_id: i64) -> Result<Option<Issue>> {
  let issue = conn
    .query_row(
      &format!("{SELECT} WHERE i.internal_id = ?1"),
      params![internal_id],
      from_row,
    )
    .optional()?;
  Ok(issue)
}

/// Insert or update the issue, its author, labels and assignees, and mark it
/// observed at `policy.now`.
///
/// Label and assignee associations are only rewritten when the set differs
/// from what is stored. Passing `NO_ROW_ID` as `repository_id` keeps the
/// stored repository.
pub fn get_or_create(
  conn: &Connection,
  remote: &RemoteIssue,
  repository_id: i64,
  policy: &UpsertPolicy,
) -> Result<Issue> {
  let author = user::get_or_create(conn, &remote.author, policy)?;
  let label_ids = remote
    .labels
    .iter()
    .map(|l| label::get_or_create(conn, l, policy).map(|l| l.id))
    .collect::<Result<Vec<_>>>()?;
  let assignee_ids = remote
    .assignees
    .iter()
    .map(|u| user::get_or_create(conn, u, policy).map(|u| u.id))
    .collect::<Result<Vec<_>>>()?;
  let labels_joined = join_ids(&label_ids);
  let assignees_joined = join_ids(&assignee_ids);
  let now = to_millis(policy.now);
  let closed = remote.closed_at.map(to_millis);

  let (id, labels_changed, assignees_changed) = match get_by_internal_id(conn, remote.id)? {
    Some(existing) => {
      conn.execute(
        "UPDATE issues SET number = ?1,
           repository_id = CASE WHEN ?2 = 0 THEN repository_id ELSE ?2 END,
           author_id = ?3, title = ?4, body = ?5, state = ?6, html_url = ?7,
           time_created = ?8, time_updated = ?9, time_closed = ?10,
           time_last_observed = ?11, label_ids = ?12, assignee_ids = ?13
         WHERE id = ?14",
        params![
          remote.number,
          repository_id,
          author.id,
          remote.title,
          remote.body,
          remote.state,
          remote.html_url,
          to_millis(remote.created_at),
          to_millis(remote.updated_at),
          closed,
          now,
          labels_joined,
          assignees_joined,
          existing.id
        ],
      )?;
      (
        existing.id,
        existing.label_ids != labels_joined,
        existing.assignee_ids != assignees_joined,
      )
    }
    None => {
      conn.execute(
        "INSERT INTO issues (internal_id, number, repository_id, author_id, title, body,
           state, html_url, time_created, time_updated, time_closed, time_last_observed,
           label_ids, assignee_ids)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
          remote.id,
          remote.number,
          repository_id,
          author.id,
          remote.title,
          remote.body,
          remote.state,
          remote.html_url,
          to_millis(remote.created_at),
          to_millis(remote.updated_at),
          closed,
          now,
          labels_joined,
          assignees_joined
        ],
      )?;
      (conn.last_insert_rowid(), true, true)
    }
  };

  if labels_changed {
    association::replace_all(conn, Association::IssueLabel, id, &label_ids, policy.now)?;
  }
  if assignees_changed {
    association::replace_all(conn, Association::IssueAssignee, id, &assignee_ids, policy.now)?;
  }

  get_by_id(conn, id)?.ok_or_else(|| eyre!("Issue {} vanished after write", id))
}

/// Issues of one repository, oldest update first.
pub fn for_repository(conn: &Connection, repository_id: i64) -> Result<Vec<Issue>> {
  query_many(
    conn,
    &format!("{SELECT} WHERE i.repository_id = ?1 ORDER BY i.time_updated ASC, i.id ASC"),
    repository_id,
  )
}

/// Issues matched by a saved search, oldest update first.
pub fn for_search(conn: &Connection, search_id: i64) -> Result<Vec<Issue>> {
  query_many(
    conn,
    &format!(
      "{SELECT} JOIN search_issues s ON s.issue_id = i.id
       WHERE s.search_id = ?1 ORDER BY i.time_updated ASC, i.id ASC"
    ),
    search_id,
  )
}

/// Remove issues of `repository_id` not observed since `cutoff`.
pub fn delete_last_observed_before(
  conn: &Connection,
  repository_id: i64,
  cutoff: DateTime<Utc>,
) -> Result<usize> {
  let deleted = conn.execute(
    "DELETE FROM issues WHERE repository_id = ?1 AND time_last_observed < ?2",
    params![repository_id, to_millis(cutoff)],
  )?;
  Ok(deleted)
}

/// Of `candidates`, remove those no search references that were not observed
/// since `cutoff`.
pub fn delete_not_referenced_by_search(
  conn: &Connection,
  candidates: &[i64],
  cutoff: DateTime<Utc>,
) -> Result<usize> {
  let mut stmt = conn.prepare(
    "DELETE FROM issues
     WHERE id = ?1 AND time_last_observed < ?2
       AND id NOT IN (SELECT issue_id FROM search_issues)",
  )?;
  let mut deleted = 0;
  for id in candidates {
    deleted += stmt.execute(params![id, to_millis(cutoff)])?;
  }
  Ok(deleted)
}

/// Remove issues no search references that were not observed since
/// `cutoff`.
pub fn delete_unreferenced(conn: &Connection, cutoff: DateTime<Utc>) -> Result<usize> {
  let deleted = conn.execute(
    "DELETE FROM issues
     WHERE time_last_observed < ?1
       AND id NOT IN (SELECT issue_id FROM search_issues)",
    params![to_millis(cutoff)],
  )?;
  Ok(deleted)
}
