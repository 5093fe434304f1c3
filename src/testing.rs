//! Test doubles shared by the unit tests: a scripted remote source and
//! fixture builders.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::github::{
  Page, PageRequest, RemoteError, RemoteIssue, RemotePullRequest, RemoteRepository,
  RemoteSearchItem, RemoteSource, RemoteUser, RepositoryRef,
};
use crate::store::SearchQuery;
use crate::sync::SavedSearchProvider;

/// Fixed saved searches and repositories.
#[derive(Default)]
pub struct StaticSearches {
  pub searches: Vec<SearchQuery>,
  pub repositories: Vec<String>,
}

impl SavedSearchProvider for StaticSearches {
  fn searches(&self) -> Vec<SearchQuery> {
    self.searches.clone()
  }

  fn repositories(&self) -> Vec<String> {
    self.repositories.clone()
  }
}

#[derive(Default)]
struct MockState {
  user: Option<RemoteUser>,
  repositories: Vec<RemoteRepository>,
  issues: Vec<RemoteIssue>,
  pull_requests: Vec<RemotePullRequest>,
  issue_searches: HashMap<String, Vec<RemoteSearchItem>>,
  repository_searches: HashMap<String, Vec<RemoteRepository>>,
  failures: HashMap<String, RemoteError>,
  calls: HashMap<String, usize>,
}

/// In-memory remote source with call counting and injectable failures.
pub struct MockSource {
  label: String,
  state: Mutex<MockState>,
}

impl MockSource {
  pub fn new(label: &str) -> Self {
    Self {
      label: label.to_string(),
      state: Mutex::new(MockState::default()),
    }
  }

  pub fn set_user(&self, user: RemoteUser) {
    self.state.lock().unwrap().user = Some(user);
  }

  pub fn add_repository(&self, repo: RemoteRepository) {
    self.state.lock().unwrap().repositories.push(repo);
  }

  pub fn add_issue(&self, issue: RemoteIssue) {
    self.state.lock().unwrap().issues.push(issue);
  }

  pub fn add_pull_request(&self, pr: RemotePullRequest) {
    self.state.lock().unwrap().pull_requests.push(pr);
  }

  pub fn set_issue_search(&self, query: &str, items: Vec<RemoteSearchItem>) {
    self
      .state
      .lock()
      .unwrap()
      .issue_searches
      .insert(query.to_string(), items);
  }

  pub fn set_repository_search(&self, query: &str, items: Vec<RemoteRepository>) {
    self
      .state
      .lock()
      .unwrap()
      .repository_searches
      .insert(query.to_string(), items);
  }

  /// Make every call to `method` fail with `error`.
  pub fn fail(&self, method: &str, error: RemoteError) {
    self
      .state
      .lock()
      .unwrap()
      .failures
      .insert(method.to_string(), error);
  }

  pub fn calls(&self, method: &str) -> usize {
    self
      .state
      .lock()
      .unwrap()
      .calls
      .get(method)
      .copied()
      .unwrap_or(0)
  }

  fn enter(&self, method: &str) -> Result<(), RemoteError> {
    let mut state = self.state.lock().unwrap();
    *state.calls.entry(method.to_string()).or_default() += 1;
    match state.failures.get(method) {
      Some(error) => Err(error.clone()),
      None => Ok(()),
    }
  }
}

fn paginate<T: Clone>(items: &[T], page: PageRequest) -> Page<T> {
  let per_page = page.per_page.max(1) as usize;
  let start = (page.page.max(1) as usize - 1) * per_page;
  let end = (start + per_page).min(items.len());
  let slice = if start < items.len() {
    items[start..end].to_vec()
  } else {
    Vec::new()
  };
  Page {
    items: slice,
    has_next: end < items.len(),
  }
}

#[async_trait]
impl RemoteSource for MockSource {
  fn label(&self) -> &str {
    &self.label
  }

  async fn current_user(&self) -> Result<RemoteUser, RemoteError> {
    self.enter("current_user")?;
    self
      .state
      .lock()
      .unwrap()
      .user
      .clone()
      .ok_or_else(|| RemoteError::Forbidden("not signed in".to_string()))
  }

  async fn get_repository(&self, repo: &RepositoryRef) -> Result<RemoteRepository, RemoteError> {
    self.enter("get_repository")?;
    self
      .state
      .lock()
      .unwrap()
      .repositories
      .iter()
      .find(|r| &r.reference() == repo)
      .cloned()
      .ok_or_else(|| RemoteError::NotFound(repo.full_name()))
  }

  async fn list_issues(
    &self,
    repo: &RepositoryRef,
    page: PageRequest,
  ) -> Result<Page<RemoteIssue>, RemoteError> {
    self.enter("list_issues")?;
    let state = self.state.lock().unwrap();
    let matching: Vec<_> = state
      .issues
      .iter()
      .filter(|i| &i.repository == repo)
      .cloned()
      .collect();
    Ok(paginate(&matching, page))
  }

  async fn list_pull_requests(
    &self,
    repo: &RepositoryRef,
    page: PageRequest,
  ) -> Result<Page<RemotePullRequest>, RemoteError> {
    self.enter("list_pull_requests")?;
    let state = self.state.lock().unwrap();
    let matching: Vec<_> = state
      .pull_requests
      .iter()
      .filter(|p| &p.repository == repo)
      .cloned()
      .collect();
    Ok(paginate(&matching, page))
  }

  async fn get_pull_request(
    &self,
    repo: &RepositoryRef,
    number: i64,
  ) -> Result<RemotePullRequest, RemoteError> {
    self.enter("get_pull_request")?;
    self
      .state
      .lock()
      .unwrap()
      .pull_requests
      .iter()
      .find(|p| &p.repository == repo && p.number == number)
      .cloned()
      .ok_or_else(|| RemoteError::NotFound(format!("{}#{}", repo, number)))
  }

  async fn search_issues(
    &self,
    query: &str,
    page: PageRequest,
  ) -> Result<Page<RemoteSearchItem>, RemoteError> {
    self.enter("search_issues")?;
    let state = self.state.lock().unwrap();
    let items = state.issue_searches.get(query).cloned().unwrap_or_default();
    Ok(paginate(&items, page))
  }

  async fn search_repositories(
    &self,
    query: &str,
    page: PageRequest,
  ) -> Result<Page<RemoteRepository>, RemoteError> {
    self.enter("search_repositories")?;
    let state = self.state.lock().unwrap();
    let items = state
      .repository_searches
      .get(query)
      .cloned()
      .unwrap_or_default();
    Ok(paginate(&items, page))
  }
}

pub mod fixtures {
  use chrono::{DateTime, Duration, TimeZone, Utc};

  use crate::github::{
    RemoteIssue, RemoteLabel, RemotePullRequest, RemoteRepository, RemoteUser, RepositoryRef,
  };

  /// Fixed base time; `updated` offsets in fixtures are seconds after it.
  pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
  }

  pub fn at(seconds: i64) -> DateTime<Utc> {
    base_time() + Duration::seconds(seconds)
  }

  /// Stable remote id for a login, so the same login always maps to one user.
  fn user_id(login: &str) -> i64 {
    1_000 + login.bytes().map(i64::from).sum::<i64>()
  }

  pub fn user(login: &str) -> RemoteUser {
    RemoteUser {
      id: user_id(login),
      login: login.to_string(),
      avatar_url: format!("https://avatars.example.com/{login}"),
      user_type: "User".to_string(),
    }
  }

  pub fn label(id: i64, name: &str) -> RemoteLabel {
    RemoteLabel {
      id,
      name: name.to_string(),
      description: String::new(),
      color: "ededed".to_string(),
      is_default: false,
    }
  }

  pub fn repository(id: i64, owner: &str, name: &str) -> RemoteRepository {
    RemoteRepository {
      id,
      owner: user(owner),
      name: name.to_string(),
      description: format!("{name} repository"),
      html_url: format!("https://github.com/{owner}/{name}"),
      clone_url: format!("https://github.com/{owner}/{name}.git"),
      default_branch: "main".to_string(),
      private: false,
      visibility: "public".to_string(),
      has_issues: true,
      fork: false,
    }
  }

  pub fn issue(id: i64, number: i64, owner: &str, name: &str, updated: i64) -> RemoteIssue {
    RemoteIssue {
      id,
      number,
      repository: RepositoryRef::new(owner, name),
      author: user("author"),
      title: format!("Issue {number}"),
      body: String::new(),
      state: "open".to_string(),
      html_url: format!("https://github.com/{owner}/{name}/issues/{number}"),
      created_at: base_time(),
      updated_at: at(updated),
      closed_at: None,
      labels: Vec::new(),
      assignees: Vec::new(),
    }
  }

  pub fn pull_request(
    id: i64,
    number: i64,
    owner: &str,
    name: &str,
    updated: i64,
  ) -> RemotePullRequest {
    RemotePullRequest {
      id,
      number,
      repository: RepositoryRef::new(owner, name),
      author: user("author"),
      title: format!("Pull request {number}"),
      body: String::new(),
      state: "open".to_string(),
      html_url: format!("https://github.com/{owner}/{name}/pull/{number}"),
      created_at: base_time(),
      updated_at: at(updated),
      closed_at: None,
      merged_at: None,
      labels: Vec::new(),
      assignees: Vec::new(),
      merged: false,
      mergeable: true,
      merge_state: "clean".to_string(),
      head_sha: format!("{id:040x}"),
      source_branch: Some(format!("{owner}:feature/{number}")),
      target_branch: "main".to_string(),
      draft: false,
      commit_count: 1,
    }
  }
}
