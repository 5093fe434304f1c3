//! Pull request capability trait and the source-branch decorator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use url::Url;

use crate::store::pull_request::PullRequest;

use super::source::RemoteSource;
use super::types::RepositoryRef;

/// What the host can ask of a pull request, whether stored or decorated.
#[async_trait]
pub trait PullRequestInfo: Send + Sync {
  fn number(&self) -> i64;
  fn title(&self) -> &str;
  fn state(&self) -> &str;
  fn html_url(&self) -> &str;
  fn updated_at(&self) -> DateTime<Utc>;
  fn is_draft(&self) -> bool;

  /// The branch the pull request merges from.
  async fn source_branch(&self) -> String;
}

#[async_trait]
impl PullRequestInfo for PullRequest {
  fn number(&self) -> i64 {
    self.number
  }

  fn title(&self) -> &str {
    &self.title
  }

  fn state(&self) -> &str {
    &self.state
  }

  fn html_url(&self) -> &str {
    &self.html_url
  }

  fn updated_at(&self) -> DateTime<Utc> {
    self.time_updated
  }

  fn is_draft(&self) -> bool {
    self.draft
  }

  async fn source_branch(&self) -> String {
    self.source_branch.clone()
  }
}

/// Wraps a stored pull request so its source branch reads as a plain branch
/// name, fetching it from the remote on first use when the store has none.
pub struct SourceBranchDecorator {
  inner: PullRequest,
  resolvers: Vec<Arc<dyn RemoteSource>>,
  resolved: OnceCell<String>,
}

impl SourceBranchDecorator {
  pub fn new(inner: PullRequest, resolvers: Vec<Arc<dyn RemoteSource>>) -> Self {
    Self {
      inner,
      resolvers,
      resolved: OnceCell::new(),
    }
  }

  pub fn inner(&self) -> &PullRequest {
    &self.inner
  }

  async fn resolve(&self) -> String {
    if !self.inner.source_branch.is_empty() {
      return strip_owner_prefix(Some(&self.inner.source_branch), &self.inner.html_url);
    }

    let Some(repo) = repository_from_html_url(&self.inner.html_url) else {
      return String::new();
    };

    for source in &self.resolvers {
      match source.get_pull_request(&repo, self.inner.number).await {
        Ok(remote) => {
          debug!(pr = %self.inner.html_url, account = %source.label(), "resolved source branch");
          return strip_owner_prefix(remote.source_branch.as_deref(), &self.inner.html_url);
        }
        Err(e) if e.is_access_error() => continue,
        Err(e) => {
          warn!(pr = %self.inner.html_url, "failed to resolve source branch: {}", e);
          return String::new();
        }
      }
    }
    String::new()
  }
}

#[async_trait]
impl PullRequestInfo for SourceBranchDecorator {
  fn number(&self) -> i64 {
    self.inner.number
  }

  fn title(&self) -> &str {
    &self.inner.title
  }

  fn state(&self) -> &str {
    &self.inner.state
  }

  fn html_url(&self) -> &str {
    &self.inner.html_url
  }

  fn updated_at(&self) -> DateTime<Utc> {
    self.inner.time_updated
  }

  fn is_draft(&self) -> bool {
    self.inner.draft
  }

  async fn source_branch(&self) -> String {
    self.resolved.get_or_init(|| self.resolve()).await.clone()
  }
}

/// Strip the `owner:` prefix GitHub puts on head labels when `owner` matches
/// the repository owner in `html_url` (case-insensitive).
pub fn strip_owner_prefix(branch: Option<&str>, html_url: &str) -> String {
  let branch = match branch {
    Some(b) if !b.is_empty() => b,
    _ => return String::new(),
  };

  let Some(repo) = repository_from_html_url(html_url) else {
    return branch.to_string();
  };

  match branch.split_once(':') {
    Some((owner, rest)) if owner.eq_ignore_ascii_case(&repo.owner) => rest.to_string(),
    _ => branch.to_string(),
  }
}

/// `https://github.com/{owner}/{repo}/pull/{n}` → `owner/repo`.
fn repository_from_html_url(html_url: &str) -> Option<RepositoryRef> {
  let url = Url::parse(html_url).ok()?;
  let mut segments = url.path_segments()?;
  let owner = segments.next().filter(|s| !s.is_empty())?;
  let name = segments.next().filter(|s| !s.is_empty())?;
  Some(RepositoryRef::new(owner, name))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::{fixtures, MockSource};

  const URL: &str = "https://github.com/owner/repo/pull/1";

  #[test]
  fn strips_matching_owner_prefix() {
    assert_eq!(strip_owner_prefix(Some("owner:feature/x"), URL), "feature/x");
    assert_eq!(strip_owner_prefix(Some("OWNER:feature/x"), URL), "feature/x");
  }

  #[test]
  fn empty_or_missing_branch_is_empty() {
    assert_eq!(strip_owner_prefix(None, URL), "");
    assert_eq!(strip_owner_prefix(Some(""), URL), "");
  }

  #[test]
  fn unprefixed_or_foreign_branch_is_unchanged() {
    assert_eq!(
      strip_owner_prefix(Some("feature/branch/update"), URL),
      "feature/branch/update"
    );
    assert_eq!(strip_owner_prefix(Some("fork:topic"), URL), "fork:topic");
    assert_eq!(strip_owner_prefix(Some("owner:x"), "not a url"), "owner:x");
  }

  fn stored_pr(source_branch: &str) -> PullRequest {
    PullRequest {
      source_branch: source_branch.to_string(),
      html_url: URL.to_string(),
      number: 1,
      ..PullRequest::default()
    }
  }

  #[tokio::test]
  async fn stored_branch_is_stripped_without_remote_call() {
    let source = Arc::new(MockSource::new("alice"));
    let resolvers: Vec<Arc<dyn RemoteSource>> = vec![source.clone()];
    let decorated = SourceBranchDecorator::new(stored_pr("owner:feature/x"), resolvers);

    assert_eq!(decorated.source_branch().await, "feature/x");
    assert_eq!(source.calls("get_pull_request"), 0);
  }

  #[tokio::test]
  async fn missing_branch_is_resolved_once() {
    let source = Arc::new(MockSource::new("alice"));
    let mut remote = fixtures::pull_request(1, 1, "owner", "repo", 1);
    remote.source_branch = Some("owner:fix/lazy".to_string());
    source.add_pull_request(remote);

    let resolvers: Vec<Arc<dyn RemoteSource>> = vec![source.clone()];
    let decorated = SourceBranchDecorator::new(stored_pr(""), resolvers);
    assert_eq!(decorated.source_branch().await, "fix/lazy");
    assert_eq!(decorated.source_branch().await, "fix/lazy");
    assert_eq!(source.calls("get_pull_request"), 1);
  }

  #[tokio::test]
  async fn unresolvable_branch_is_empty() {
    let source = Arc::new(MockSource::new("alice"));
    let resolvers: Vec<Arc<dyn RemoteSource>> = vec![source];
    let decorated = SourceBranchDecorator::new(stored_pr(""), resolvers);
    assert_eq!(decorated.source_branch().await, "");
  }
}
