use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, LINK, USER_AGENT};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::api_types::{
  ApiErrorBody, ApiIssue, ApiPullRequest, ApiRepository, ApiSearchResponse, ApiUser,
};
use super::source::{Page, PageRequest, RemoteError, RemoteSource};
use super::types::{
  RemoteIssue, RemotePullRequest, RemoteRepository, RemoteSearchItem, RemoteUser, RepositoryRef,
};

/// Identity lookups fail fast instead of hanging a sign-in.
pub const IDENTITY_TIMEOUT: Duration = Duration::from_secs(10);

const DEFAULT_API_URL: &str = "https://api.github.com/";

/// GitHub REST client bound to one account (or anonymous access).
#[derive(Clone)]
pub struct GitHubClient {
  http: reqwest::Client,
  base: Url,
  label: String,
}

impl GitHubClient {
  /// Create a client. `token` of `None` means anonymous access.
  pub fn new(api_url: Option<&str>, token: Option<&str>, label: impl Into<String>) -> Result<Self> {
    let mut base = Url::parse(api_url.unwrap_or(DEFAULT_API_URL))
      .map_err(|e| eyre!("Invalid GitHub API URL: {}", e))?;
    if !base.path().ends_with('/') {
      let path = format!("{}/", base.path());
      base.set_path(&path);
    }

    let mut headers = HeaderMap::new();
    headers.insert(
      ACCEPT,
      HeaderValue::from_static("application/vnd.github+json"),
    );
    headers.insert(
      USER_AGENT,
      HeaderValue::from_static(concat!("octocache/", env!("CARGO_PKG_VERSION"))),
    );
    if let Some(token) = token {
      let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|e| eyre!("Invalid GitHub token: {}", e))?;
      value.set_sensitive(true);
      headers.insert(AUTHORIZATION, value);
    }

    let http = reqwest::Client::builder()
      .default_headers(headers)
      .build()
      .map_err(|e| eyre!("Failed to create GitHub client: {}", e))?;

    Ok(Self {
      http,
      base,
      label: label.into(),
    })
  }

  fn url(&self, path: &str) -> Result<Url, RemoteError> {
    self
      .base
      .join(path.trim_start_matches('/'))
      .map_err(|e| RemoteError::Unexpected(format!("bad request path {}: {}", path, e)))
  }

  async fn send(
    &self,
    path: &str,
    query: &[(&str, String)],
    timeout: Option<Duration>,
  ) -> Result<Response, RemoteError> {
    let url = self.url(path)?;
    debug!(account = %self.label, %url, "GET");

    let mut request = self.http.get(url).query(query);
    if let Some(timeout) = timeout {
      request = request.timeout(timeout);
    }

    let response = request
      .send()
      .await
      .map_err(|e| RemoteError::Transport(e.to_string()))?;

    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }

    let rate_limit_exhausted = response
      .headers()
      .get("x-ratelimit-remaining")
      .and_then(|v| v.to_str().ok())
      .is_some_and(|v| v == "0");
    let body: ApiErrorBody = response.json().await.unwrap_or_default();
    Err(classify_status(status, rate_limit_exhausted, body.message, path))
  }

  async fn get_json<T: DeserializeOwned>(
    &self,
    path: &str,
    query: &[(&str, String)],
  ) -> Result<T, RemoteError> {
    let response = self.send(path, query, None).await?;
    response
      .json()
      .await
      .map_err(|e| RemoteError::Unexpected(format!("failed to parse {}: {}", path, e)))
  }

  async fn get_page<T: DeserializeOwned>(
    &self,
    path: &str,
    mut query: Vec<(&str, String)>,
    page: PageRequest,
  ) -> Result<(T, bool), RemoteError> {
    query.push(("page", page.page.to_string()));
    query.push(("per_page", page.per_page.to_string()));

    let response = self.send(path, &query, None).await?;
    let has_next = response
      .headers()
      .get(LINK)
      .and_then(|v| v.to_str().ok())
      .is_some_and(|link| link.contains("rel=\"next\""));
    let body = response
      .json()
      .await
      .map_err(|e| RemoteError::Unexpected(format!("failed to parse {}: {}", path, e)))?;
    Ok((body, has_next))
  }
}

/// Map a non-success status onto the error kinds the sync engine branches on.
fn classify_status(
  status: StatusCode,
  rate_limit_exhausted: bool,
  message: String,
  path: &str,
) -> RemoteError {
  let is_rate_limit_message = message.to_lowercase().contains("rate limit");
  match status {
    StatusCode::TOO_MANY_REQUESTS => RemoteError::RateLimited { message },
    StatusCode::FORBIDDEN if rate_limit_exhausted || is_rate_limit_message => {
      RemoteError::RateLimited { message }
    }
    StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
      RemoteError::Forbidden(format!("{}: {}", path, message))
    }
    StatusCode::NOT_FOUND => RemoteError::NotFound(path.to_string()),
    _ => RemoteError::Unexpected(format!("{} returned {}: {}", path, status, message)),
  }
}

#[async_trait]
impl RemoteSource for GitHubClient {
  fn label(&self) -> &str {
    &self.label
  }

  async fn current_user(&self) -> Result<RemoteUser, RemoteError> {
    let response = self.send("user", &[], Some(IDENTITY_TIMEOUT)).await?;
    let user: ApiUser = response
      .json()
      .await
      .map_err(|e| RemoteError::Unexpected(format!("failed to parse user: {}", e)))?;
    Ok(user.into())
  }

  async fn get_repository(&self, repo: &RepositoryRef) -> Result<RemoteRepository, RemoteError> {
    let path = format!("repos/{}/{}", repo.owner, repo.name);
    let api: ApiRepository = self.get_json(&path, &[]).await?;
    Ok(api.into())
  }

  async fn list_issues(
    &self,
    repo: &RepositoryRef,
    page: PageRequest,
  ) -> Result<Page<RemoteIssue>, RemoteError> {
    let path = format!("repos/{}/{}/issues", repo.owner, repo.name);
    let query = vec![
      ("state", "open".to_string()),
      ("sort", "updated".to_string()),
    ];
    let (items, has_next): (Vec<ApiIssue>, bool) = self.get_page(&path, query, page).await?;

    // The issues endpoint also lists pull requests; those are synced separately.
    let items = items
      .into_iter()
      .filter(|issue| issue.pull_request.is_none())
      .map(|issue| issue.into_remote(repo.clone()))
      .collect();
    Ok(Page { items, has_next })
  }

  async fn list_pull_requests(
    &self,
    repo: &RepositoryRef,
    page: PageRequest,
  ) -> Result<Page<RemotePullRequest>, RemoteError> {
    let path = format!("repos/{}/{}/pulls", repo.owner, repo.name);
    let query = vec![
      ("state", "open".to_string()),
      ("sort", "updated".to_string()),
    ];
    let (items, has_next): (Vec<ApiPullRequest>, bool) = self.get_page(&path, query, page).await?;
    let items = items
      .into_iter()
      .map(|pr| pr.into_remote(repo.clone()))
      .collect();
    Ok(Page { items, has_next })
  }

  async fn get_pull_request(
    &self,
    repo: &RepositoryRef,
    number: i64,
  ) -> Result<RemotePullRequest, RemoteError> {
    let path = format!("repos/{}/{}/pulls/{}", repo.owner, repo.name, number);
    let api: ApiPullRequest = self.get_json(&path, &[]).await?;
    Ok(api.into_remote(repo.clone()))
  }

  async fn search_issues(
    &self,
    query: &str,
    page: PageRequest,
  ) -> Result<Page<RemoteSearchItem>, RemoteError> {
    let params = vec![
      ("q", query.to_string()),
      ("sort", "updated".to_string()),
    ];
    let (response, has_next): (ApiSearchResponse<ApiIssue>, bool) =
      self.get_page("search/issues", params, page).await?;
    let items = response
      .items
      .into_iter()
      .filter_map(ApiIssue::into_search_item)
      .collect();
    Ok(Page { items, has_next })
  }

  async fn search_repositories(
    &self,
    query: &str,
    page: PageRequest,
  ) -> Result<Page<RemoteRepository>, RemoteError> {
    let params = vec![("q", query.to_string())];
    let (response, has_next): (ApiSearchResponse<ApiRepository>, bool) =
      self.get_page("search/repositories", params, page).await?;
    let items = response
      .items
      .into_iter()
      .map(RemoteRepository::from)
      .collect();
    Ok(Page { items, has_next })
  }
}
