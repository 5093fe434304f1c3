//! The remote data source seam.

use async_trait::async_trait;
use thiserror::Error;

use super::types::{
  RemoteIssue, RemotePullRequest, RemoteRepository, RemoteSearchItem, RemoteUser, RepositoryRef,
};

/// Failures the sync engine distinguishes when talking to the remote.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("forbidden: {0}")]
  Forbidden(String),

  /// The API quota behind the client is exhausted. The message is shown to
  /// the user verbatim.
  #[error("{message}")]
  RateLimited { message: String },

  /// Network-level failure; the whole sync attempt is void.
  #[error("transport error: {0}")]
  Transport(String),

  #[error("unexpected response: {0}")]
  Unexpected(String),
}

impl RemoteError {
  /// Not-found and forbidden usually mean "this account can't see it".
  pub fn is_access_error(&self) -> bool {
    matches!(self, Self::NotFound(_) | Self::Forbidden(_))
  }
}

/// One page request; pages are 1-based like the GitHub REST API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
  pub page: u32,
  pub per_page: u32,
}

/// A page of results and whether the remote has more.
#[derive(Debug, Clone)]
pub struct Page<T> {
  pub items: Vec<T>,
  pub has_next: bool,
}

impl<T> Page<T> {
  pub fn last(items: Vec<T>) -> Self {
    Self {
      items,
      has_next: false,
    }
  }
}

/// A client able to answer the queries the cache needs, bound to one account
/// (or to anonymous access).
#[async_trait]
pub trait RemoteSource: Send + Sync {
  /// Label for logs: the account login, or `anonymous`.
  fn label(&self) -> &str;

  async fn current_user(&self) -> Result<RemoteUser, RemoteError>;

  async fn get_repository(&self, repo: &RepositoryRef) -> Result<RemoteRepository, RemoteError>;

  async fn list_issues(
    &self,
    repo: &RepositoryRef,
    page: PageRequest,
  ) -> Result<Page<RemoteIssue>, RemoteError>;

  async fn list_pull_requests(
    &self,
    repo: &RepositoryRef,
    page: PageRequest,
  ) -> Result<Page<RemotePullRequest>, RemoteError>;

  async fn get_pull_request(
    &self,
    repo: &RepositoryRef,
    number: i64,
  ) -> Result<RemotePullRequest, RemoteError>;

  async fn search_issues(
    &self,
    query: &str,
    page: PageRequest,
  ) -> Result<Page<RemoteSearchItem>, RemoteError>;

  async fn search_repositories(
    &self,
    query: &str,
    page: PageRequest,
  ) -> Result<Page<RemoteRepository>, RemoteError>;
}
