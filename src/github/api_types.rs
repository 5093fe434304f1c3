//! Serde-deserializable types matching GitHub REST responses.
//!
//! These types are separate from the remote representations so optional and
//! missing fields can be coalesced in one place.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::types::{
  RemoteIssue, RemoteLabel, RemotePullRequest, RemoteRepository, RemoteSearchItem, RemoteUser,
  RepositoryRef,
};

// ============================================================================
// Common nested types
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct ApiUser {
  pub id: i64,
  #[serde(default)]
  pub login: String,
  #[serde(default)]
  pub avatar_url: Option<String>,
  #[serde(rename = "type", default)]
  pub user_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiLabel {
  pub id: i64,
  #[serde(default)]
  pub name: String,
  pub description: Option<String>,
  pub color: Option<String>,
  #[serde(default)]
  pub default: bool,
}

#[derive(Debug, Deserialize)]
pub struct ApiBranch {
  #[serde(default)]
  pub label: Option<String>,
  #[serde(rename = "ref", default)]
  pub git_ref: String,
  #[serde(default)]
  pub sha: String,
}

/// Present on issue search hits that are really pull requests.
#[derive(Debug, Deserialize)]
pub struct ApiPullRequestLink {
  pub merged_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Top-level resources
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiRepository {
  pub id: i64,
  pub owner: ApiUser,
  pub name: String,
  pub description: Option<String>,
  #[serde(default)]
  pub html_url: String,
  #[serde(default)]
  pub clone_url: String,
  pub default_branch: Option<String>,
  #[serde(default)]
  pub private: bool,
  pub visibility: Option<String>,
  #[serde(default = "default_true")]
  pub has_issues: bool,
  #[serde(default)]
  pub fork: bool,
}

#[derive(Debug, Deserialize)]
pub struct ApiIssue {
  pub id: i64,
  pub number: i64,
  #[serde(default)]
  pub title: String,
  pub body: Option<String>,
  #[serde(default)]
  pub state: String,
  #[serde(default)]
  pub html_url: String,
  pub user: Option<ApiUser>,
  #[serde(default)]
  pub labels: Vec<ApiLabel>,
  #[serde(default)]
  pub assignees: Vec<ApiUser>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  pub closed_at: Option<DateTime<Utc>>,
  pub repository_url: Option<String>,
  pub pull_request: Option<ApiPullRequestLink>,
  #[serde(default)]
  pub draft: bool,
}

#[derive(Debug, Deserialize)]
pub struct ApiPullRequest {
  pub id: i64,
  pub number: i64,
  #[serde(default)]
  pub title: String,
  pub body: Option<String>,
  #[serde(default)]
  pub state: String,
  #[serde(default)]
  pub html_url: String,
  pub user: Option<ApiUser>,
  #[serde(default)]
  pub labels: Vec<ApiLabel>,
  #[serde(default)]
  pub assignees: Vec<ApiUser>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  pub closed_at: Option<DateTime<Utc>>,
  pub merged_at: Option<DateTime<Utc>>,
  pub merged: Option<bool>,
  pub mergeable: Option<bool>,
  pub mergeable_state: Option<String>,
  #[serde(default)]
  pub draft: bool,
  pub commits: Option<i64>,
  pub head: Option<ApiBranch>,
  pub base: Option<ApiBranch>,
}

#[derive(Debug, Deserialize)]
pub struct ApiSearchResponse<T> {
  #[serde(default)]
  pub total_count: u64,
  #[serde(default)]
  pub incomplete_results: bool,
  #[serde(default = "Vec::new")]
  pub items: Vec<T>,
}

/// Error body GitHub returns alongside non-2xx statuses.
#[derive(Debug, Deserialize, Default)]
pub struct ApiErrorBody {
  #[serde(default)]
  pub message: String,
}

fn default_true() -> bool {
  true
}

// ============================================================================
// Conversions to remote representations
// ============================================================================

impl From<ApiUser> for RemoteUser {
  fn from(user: ApiUser) -> Self {
    RemoteUser {
      id: user.id,
      login: user.login,
      avatar_url: user.avatar_url.unwrap_or_default(),
      user_type: user.user_type.unwrap_or_default(),
    }
  }
}

impl From<ApiLabel> for RemoteLabel {
  fn from(label: ApiLabel) -> Self {
    RemoteLabel {
      id: label.id,
      name: label.name,
      description: label.description.unwrap_or_default(),
      color: label.color.unwrap_or_default(),
      is_default: label.default,
    }
  }
}

impl From<ApiRepository> for RemoteRepository {
  fn from(repo: ApiRepository) -> Self {
    let visibility = repo.visibility.unwrap_or_else(|| {
      if repo.private {
        "private".to_string()
      } else {
        "public".to_string()
      }
    });
    RemoteRepository {
      id: repo.id,
      owner: repo.owner.into(),
      name: repo.name,
      description: repo.description.unwrap_or_default(),
      html_url: repo.html_url,
      clone_url: repo.clone_url,
      default_branch: repo.default_branch.unwrap_or_default(),
      private: repo.private,
      visibility,
      has_issues: repo.has_issues,
      fork: repo.fork,
    }
  }
}

impl ApiIssue {
  /// Convert an issue listed under a known repository.
  pub fn into_remote(self, repository: RepositoryRef) -> RemoteIssue {
    RemoteIssue {
      id: self.id,
      number: self.number,
      repository,
      author: self.user.map(RemoteUser::from).unwrap_or_default(),
      title: self.title,
      body: self.body.unwrap_or_default(),
      state: self.state,
      html_url: self.html_url,
      created_at: self.created_at,
      updated_at: self.updated_at,
      closed_at: self.closed_at,
      labels: self.labels.into_iter().map(RemoteLabel::from).collect(),
      assignees: self.assignees.into_iter().map(RemoteUser::from).collect(),
    }
  }

  /// Convert a search hit. The repository comes from `repository_url`; hits
  /// without one are dropped.
  pub fn into_search_item(mut self) -> Option<RemoteSearchItem> {
    let repository = RepositoryRef::from_api_url(self.repository_url.as_deref()?)?;
    let Some(link) = self.pull_request.take() else {
      return Some(RemoteSearchItem::Issue(self.into_remote(repository)));
    };

    let draft = self.draft;
    let issue = self.into_remote(repository);
    Some(RemoteSearchItem::PullRequest(RemotePullRequest {
      id: issue.id,
      number: issue.number,
      repository: issue.repository,
      author: issue.author,
      title: issue.title,
      body: issue.body,
      state: issue.state,
      html_url: issue.html_url,
      created_at: issue.created_at,
      updated_at: issue.updated_at,
      closed_at: issue.closed_at,
      merged_at: link.merged_at,
      labels: issue.labels,
      assignees: issue.assignees,
      merged: link.merged_at.is_some(),
      mergeable: false,
      merge_state: String::new(),
      head_sha: String::new(),
      source_branch: None,
      target_branch: String::new(),
      draft,
      commit_count: 0,
    }))
  }
}

impl ApiPullRequest {
  pub fn into_remote(self, repository: RepositoryRef) -> RemotePullRequest {
    let (source_branch, head_sha) = match self.head {
      Some(head) => {
        let branch = head.label.filter(|l| !l.is_empty()).unwrap_or(head.git_ref);
        (Some(branch), head.sha)
      }
      None => (None, String::new()),
    };
    RemotePullRequest {
      id: self.id,
      number: self.number,
      repository,
      author: self.user.map(RemoteUser::from).unwrap_or_default(),
      title: self.title,
      body: self.body.unwrap_or_default(),
      state: self.state,
      html_url: self.html_url,
      created_at: self.created_at,
      updated_at: self.updated_at,
      closed_at: self.closed_at,
      merged: self.merged.unwrap_or(self.merged_at.is_some()),
      merged_at: self.merged_at,
      labels: self.labels.into_iter().map(RemoteLabel::from).collect(),
      assignees: self.assignees.into_iter().map(RemoteUser::from).collect(),
      mergeable: self.mergeable.unwrap_or(false),
      merge_state: self.mergeable_state.unwrap_or_default(),
      head_sha,
      source_branch,
      target_branch: self.base.map(|b| b.git_ref).unwrap_or_default(),
      draft: self.draft,
      commit_count: self.commits.unwrap_or(0),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const SEARCH_PAGE: &str = r#"{
    "total_count": 2,
    "incomplete_results": false,
    "items": [
      {
        "id": 11, "number": 1, "title": "Crash on start", "body": null,
        "state": "open", "html_url": "https://github.com/octo/app/issues/1",
        "user": {"id": 5, "login": "octocat", "type": "User"},
        "labels": [{"id": 9, "name": "bug", "description": null, "color": "d73a4a", "default": true}],
        "assignees": [],
        "created_at": "2024-01-01T00:00:00Z", "updated_at": "2024-01-02T00:00:00Z",
        "closed_at": null,
        "repository_url": "https://api.github.com/repos/octo/app"
      },
      {
        "id": 12, "number": 2, "title": "Fix crash", "state": "open",
        "html_url": "https://github.com/octo/app/pull/2",
        "user": {"id": 5, "login": "octocat"},
        "created_at": "2024-01-01T00:00:00Z", "updated_at": "2024-01-03T00:00:00Z",
        "repository_url": "https://api.github.com/repos/octo/app",
        "pull_request": {"merged_at": null},
        "draft": true
      }
    ]
  }"#;

  #[test]
  fn search_hits_split_into_issues_and_pull_requests() {
    let response: ApiSearchResponse<ApiIssue> = serde_json::from_str(SEARCH_PAGE).unwrap();
    let items: Vec<_> = response
      .items
      .into_iter()
      .filter_map(ApiIssue::into_search_item)
      .collect();

    assert_eq!(items.len(), 2);
    match &items[0] {
      RemoteSearchItem::Issue(issue) => {
        assert_eq!(issue.body, "");
        assert_eq!(issue.labels[0].description, "");
        assert!(issue.labels[0].is_default);
        assert_eq!(issue.repository.full_name(), "octo/app");
      }
      other => panic!("expected issue, got {other:?}"),
    }
    match &items[1] {
      RemoteSearchItem::PullRequest(pr) => {
        assert!(pr.draft);
        assert_eq!(pr.source_branch, None);
        assert_eq!(pr.author.user_type, "");
      }
      other => panic!("expected pull request, got {other:?}"),
    }
  }

  #[test]
  fn pull_request_uses_head_label_as_source_branch() {
    let json = r#"{
      "id": 1, "number": 7, "title": "t", "state": "open",
      "html_url": "https://github.com/octo/app/pull/7",
      "created_at": "2024-01-01T00:00:00Z", "updated_at": "2024-01-01T00:00:00Z",
      "head": {"label": "octo:feature/x", "ref": "feature/x", "sha": "abc"},
      "base": {"label": "octo:main", "ref": "main", "sha": "def"},
      "commits": 3
    }"#;
    let pr: ApiPullRequest = serde_json::from_str(json).unwrap();
    let remote = pr.into_remote(RepositoryRef::new("octo", "app"));

    assert_eq!(remote.source_branch.as_deref(), Some("octo:feature/x"));
    assert_eq!(remote.target_branch, "main");
    assert_eq!(remote.head_sha, "abc");
    assert_eq!(remote.commit_count, 3);
    assert!(!remote.merged);
  }

  #[test]
  fn repository_visibility_falls_back_to_private_flag() {
    let json = r#"{
      "id": 3, "name": "secret", "private": true,
      "owner": {"id": 1, "login": "octo"}
    }"#;
    let repo: RemoteRepository = serde_json::from_str::<ApiRepository>(json).unwrap().into();
    assert_eq!(repo.visibility, "private");
    assert!(repo.has_issues);
    assert_eq!(repo.default_branch, "");
  }
}
