use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{from_millis, join_ids, to_millis};
use crate::github::RemotePullRequest;

use super::association::{self, Association};
use super::{label, user, UpsertPolicy};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PullRequest {
  pub id: i64,
  pub internal_id: i64,
  pub number: i64,
  pub repository_id: i64,
  pub author_id: i64,
  pub title: String,
  pub body: String,
  pub state: String,
  pub html_url: String,
  pub time_created: DateTime<Utc>,
  pub time_updated: DateTime<Utc>,
  pub time_closed: Option<DateTime<Utc>>,
  pub time_merged: Option<DateTime<Utc>>,
  pub time_last_observed: DateTime<Utc>,
  pub merged: bool,
  pub mergeable: bool,
  pub merge_state: String,
  pub head_sha: String,
  /// Raw head label as GitHub reports it, e.g. `owner:feature/x`.
  pub source_branch: String,
  pub target_branch: String,
  pub draft: bool,
  pub commit_count: i64,
  pub label_ids: String,
  pub assignee_ids: String,
}

const SELECT: &str = "SELECT p.id, p.internal_id, p.number, p.repository_id, p.author_id,
    p.title, p.body, p.state, p.html_url, p.time_created, p.time_updated, p.time_closed,
    p.time_merged, p.time_last_observed, p.merged, p.mergeable, p.merge_state, p.head_sha,
    p.source_branch, p.target_branch, p.draft, p.commit_count, p.label_ids, p.assignee_ids
  FROM pull_requests p";

fn from_row(row: &Row<'_>) -> rusqlite::Result<PullRequest> {
  Ok(PullRequest {
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
    time_merged: row.get::<_, Option<i64>>(12)?.map(from_millis),
    time_last_observed: from_millis(row.get(13)?),
    merged: row.get(14)?,
    mergeable: row.get(15)?,
    merge_state: row.get(16)?,
    head_sha: row.get(17)?,
    source_branch: row.get(18)?,
    target_branch: row.get(19)?,
    draft: row.get(20)?,
    commit_count: row.get(21)?,
    label_ids: row.get(22)?,
    assignee_ids: row.get(23)?,
  })
}

fn query_many(conn: &Connection, sql: &str, id: i64) -> Result<Vec<PullRequest>> {
  let mut stmt = conn.prepare(sql)?;
  let prs = stmt
    .query_map(params![id], from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(prs)
}

pub fn get_by_id(conn: &Connection, id: i64) -> Result<Option<PullRequest>> {
  let pr = conn
    .query_row(&format!("{SELECT} WHERE p.id = ?1"), params![id], from_row)
    .optional()?;
  Ok(pr)
}

pub fn get_by_internal_id(conn: &Connection, internal_id: i64) -> Result<Option<PullRequest>> {
  let pr = conn
    .query_row(
      &format!("{SELECT} WHERE p.internal_id = ?1"),
      params![internal_id],
      from_row,
    )
    .optional()?;
  Ok(pr)
}

/// Insert or update the pull request and mark it observed at `policy.now`.
///
/// Search hits carry no branch, head or commit details; empty values there
/// leave the stored ones alone.
pub fn get_or_create(
  conn: &Connection,
  remote: &RemotePullRequest,
  repository_id: i64,
  policy: &UpsertPolicy,
) -> Result<PullRequest> {
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
  let source_branch = remote.source_branch.clone().unwrap_or_default();
  let now = to_millis(policy.now);

  let (id, labels_changed, assignees_changed) = match get_by_internal_id(conn, remote.id)? {
    Some(existing) => {
      conn.execute(
        "UPDATE pull_requests SET number = ?1,
           repository_id = CASE WHEN ?2 = 0 THEN repository_id ELSE ?2 END,
           author_id = ?3, title = ?4, body = ?5, state = ?6, html_url = ?7,
           time_created = ?8, time_updated = ?9, time_closed = ?10, time_merged = ?11,
           time_last_observed = ?12, merged = ?13, mergeable = ?14,
           merge_state = CASE WHEN ?15 = '' THEN merge_state ELSE ?15 END,
           head_sha = CASE WHEN ?16 = '' THEN head_sha ELSE ?16 END,
           source_branch = CASE WHEN ?17 = '' THEN source_branch ELSE ?17 END,
           target_branch = CASE WHEN ?18 = '' THEN target_branch ELSE ?18 END,
           draft = ?19,
           commit_count = CASE WHEN ?20 = 0 THEN commit_count ELSE ?20 END,
           label_ids = ?21, assignee_ids = ?22
         WHERE id = ?23",
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
          remote.closed_at.map(to_millis),
          remote.merged_at.map(to_millis),
          now,
          remote.merged,
          remote.mergeable,
          remote.merge_state,
          remote.head_sha,
          source_branch,
          remote.target_branch,
          remote.draft,
          remote.commit_count,
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
        "INSERT INTO pull_requests (internal_id, number, repository_id, author_id, title,
           body, state, html_url, time_created, time_updated, time_closed, time_merged,
           time_last_observed, merged, mergeable, merge_state, head_sha, source_branch,
           target_branch, draft, commit_count, label_ids, assignee_ids)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
           ?17, ?18, ?19, ?20, ?21, ?22, ?23)",
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
          remote.closed_at.map(to_millis),
          remote.merged_at.map(to_millis),
          now,
          remote.merged,
          remote.mergeable,
          remote.merge_state,
          remote.head_sha,
          source_branch,
          remote.target_branch,
          remote.draft,
          remote.commit_count,
          labels_joined,
          assignees_joined
        ],
      )?;
      (conn.last_insert_rowid(), true, true)
    }
  };

  if labels_changed {
    association::replace_all(conn, Association::PullRequestLabel, id, &label_ids, policy.now)?;
  }
  if assignees_changed {
    association::replace_all(
      conn,
      Association::PullRequestAssignee,
      id,
      &assignee_ids,
      policy.now,
    )?;
  }

  get_by_id(conn, id)?.ok_or_else(|| eyre!("Pull request {} vanished after write", id))
}

/// Pull requests of one repository, oldest update first.
pub fn for_repository(conn: &Connection, repository_id: i64) -> Result<Vec<PullRequest>> {
  query_many(
    conn,
    &format!("{SELECT} WHERE p.repository_id = ?1 ORDER BY p.time_updated ASC, p.id ASC"),
    repository_id,
  )
}

/// Pull requests matched by a saved search, oldest update first.
pub fn for_search(conn: &Connection, search_id: i64) -> Result<Vec<PullRequest>> {
  query_many(
    conn,
    &format!(
      "{SELECT} JOIN search_pull_requests s ON s.pull_request_id = p.id
       WHERE s.search_id = ?1 ORDER BY p.time_updated ASC, p.id ASC"
    ),
    search_id,
  )
}

/// Remove pull requests of `repository_id` not observed since `cutoff`.
pub fn delete_last_observed_before(
  conn: &Connection,
  repository_id: i64,
  cutoff: DateTime<Utc>,
) -> Result<usize> {
  let deleted = conn.execute(
    "DELETE FROM pull_requests WHERE repository_id = ?1 AND time_last_observed < ?2",
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
    "DELETE FROM pull_requests
     WHERE id = ?1 AND time_last_observed < ?2
       AND id NOT IN (SELECT pull_request_id FROM search_pull_requests)",
  )?;
  let mut deleted = 0;
  for id in candidates {
    deleted += stmt.execute(params![id, to_millis(cutoff)])?;
  }
  Ok(deleted)
}

/// Remove pull requests no search references that were not observed since
/// `cutoff`.
pub fn delete_unreferenced(conn: &Connection, cutoff: DateTime<Utc>) -> Result<usize> {
  let deleted = conn.execute(
    "DELETE FROM pull_requests
     WHERE time_last_observed < ?1
       AND id NOT IN (SELECT pull_request_id FROM search_pull_requests)",
    params![to_millis(cutoff)],
  )?;
  Ok(deleted)
}
