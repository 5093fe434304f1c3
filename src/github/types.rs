//! Remote representations handed from the remote source to the store.
//!
//! These mirror what GitHub returns after null-coalescing optional fields, and
//! are what the entity layer upserts from.

use chrono::{DateTime, Utc};
use std::fmt;

/// `owner/name` pair identifying a repository on the remote.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepositoryRef {
  pub owner: String,
  pub name: String,
}

impl RepositoryRef {
  pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      owner: owner.into(),
      name: name.into(),
    }
  }

  /// Parse `owner/name`. Surrounding whitespace and a trailing `.git` are ignored.
  pub fn parse(full_name: &str) -> Option<Self> {
    let trimmed = full_name.trim().trim_end_matches(".git");
    let (owner, name) = trimmed.split_once('/')?;
    if owner.is_empty() || name.is_empty() || name.contains('/') {
      return None;
    }
    Some(Self::new(owner, name))
  }

  /// Parse the `.../repos/{owner}/{name}` API URL attached to search results.
  pub fn from_api_url(api_url: &str) -> Option<Self> {
    let (_, tail) = api_url.split_once("/repos/")?;
    Self::parse(tail.trim_end_matches('/'))
  }

  pub fn full_name(&self) -> String {
    format!("{}/{}", self.owner, self.name)
  }
}

impl fmt::Display for RepositoryRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.owner, self.name)
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteUser {
  pub id: i64,
  pub login: String,
  pub avatar_url: String,
  pub user_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteLabel {
  pub id: i64,
  pub name: String,
  pub description: String,
  pub color: String,
  pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRepository {
  pub id: i64,
  pub owner: RemoteUser,
  pub name: String,
  pub description: String,
  pub html_url: String,
  pub clone_url: String,
  pub default_branch: String,
  pub private: bool,
  pub visibility: String,
  pub has_issues: bool,
  pub fork: bool,
}

impl RemoteRepository {
  pub fn reference(&self) -> RepositoryRef {
    RepositoryRef::new(&self.owner.login, &self.name)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteIssue {
  pub id: i64,
  pub number: i64,
  pub repository: RepositoryRef,
  pub author: RemoteUser,
  pub title: String,
  pub body: String,
  pub state: String,
  pub html_url: String,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  pub closed_at: Option<DateTime<Utc>>,
  pub labels: Vec<RemoteLabel>,
  pub assignees: Vec<RemoteUser>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePullRequest {
  pub id: i64,
  pub number: i64,
  pub repository: RepositoryRef,
  pub author: RemoteUser,
  pub title: String,
  pub body: String,
  pub state: String,
  pub html_url: String,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  pub closed_at: Option<DateTime<Utc>>,
  pub merged_at: Option<DateTime<Utc>>,
  pub labels: Vec<RemoteLabel>,
  pub assignees: Vec<RemoteUser>,
  pub merged: bool,
  pub mergeable: bool,
  pub merge_state: String,
  pub head_sha: String,
  /// Head label as GitHub reports it (`owner:branch`); `None` when the
  /// listing that produced this value does not carry branch details.
  pub source_branch: Option<String>,
  pub target_branch: String,
  pub draft: bool,
  pub commit_count: i64,
}

/// One hit of an issue search; GitHub mixes issues and pull requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteSearchItem {
  Issue(RemoteIssue),
  PullRequest(RemotePullRequest),
}

impl RemoteSearchItem {
  pub fn repository(&self) -> &RepositoryRef {
    match self {
      Self::Issue(issue) => &issue.repository,
      Self::PullRequest(pr) => &pr.repository,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_full_name() {
    let r = RepositoryRef::parse("octokit/octokit.net").unwrap();
    assert_eq!(r.owner, "octokit");
    assert_eq!(r.name, "octokit.net");
    assert_eq!(r.full_name(), "octokit/octokit.net");
  }

  #[test]
  fn parse_rejects_malformed_names() {
    assert!(RepositoryRef::parse("octokit").is_none());
    assert!(RepositoryRef::parse("/repo").is_none());
    assert!(RepositoryRef::parse("a/b/c").is_none());
  }

  #[test]
  fn parse_strips_git_suffix() {
    let r = RepositoryRef::parse(" microsoft/PowerToys.git ").unwrap();
    assert_eq!(r.full_name(), "microsoft/PowerToys");
  }

  #[test]
  fn from_api_url() {
    let r = RepositoryRef::from_api_url("https://api.github.com/repos/microsoft/devhome").unwrap();
    assert_eq!(r, RepositoryRef::new("microsoft", "devhome"));
    assert!(RepositoryRef::from_api_url("https://api.github.com/users/x").is_none());
  }
}
