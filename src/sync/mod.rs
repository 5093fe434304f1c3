//! Remote data sync engine.
//!
//! Pulls a repository or a saved search from GitHub, trying every connected
//! account in turn, and writes the result in one transaction that also
//! prunes what the pass no longer saw.
//!
//! Remote data is always fetched in full before the store is touched, so the
//! connection lock is never held across a network call.

mod paging;

use async_trait::async_trait;
use chrono::Duration;
use color_eyre::{
  eyre::{eyre, Report},
  Result,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{Synchronizer, UpdateTarget};
use crate::db::{Database, NO_ROW_ID};
use crate::error::CacheError;
use crate::github::{
  AccountProvider, RemoteError, RemoteIssue, RemotePullRequest, RemoteRepository,
  RemoteSearchItem, RemoteSource, RepositoryRef, IDENTITY_TIMEOUT,
};
use crate::store::association::{self, Association};
use crate::store::{
  issue, metadata, pull_request, repository, search, SearchKind, SearchQuery, UpsertPolicy,
};

pub use paging::{checkpoint, collect_pages, RequestOptions};

/// Saved searches and repositories the host wants kept fresh.
pub trait SavedSearchProvider: Send + Sync {
  fn searches(&self) -> Vec<SearchQuery>;

  /// Repositories as `owner/name`.
  fn repositories(&self) -> Vec<String>;
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
  pub request: RequestOptions,
  /// Minimum age before stored users and labels are rewritten.
  pub update_threshold: Duration,
  /// Rows observed within this window survive pruning.
  pub prune_grace: Duration,
  /// Searches not refreshed for this long are dropped on a full pass.
  pub search_retention: Duration,
}

impl Default for SyncOptions {
  fn default() -> Self {
    Self {
      request: RequestOptions::default(),
      update_threshold: Duration::hours(4),
      prune_grace: Duration::minutes(5),
      search_retention: Duration::days(7),
    }
  }
}

/// Everything one account returned for a repository.
struct RepositorySnapshot {
  repository: RemoteRepository,
  issues: Vec<RemoteIssue>,
  pull_requests: Vec<RemotePullRequest>,
}

/// Everything one account returned for a search.
#[derive(Default)]
struct SearchSnapshot {
  items: Vec<RemoteSearchItem>,
  /// Repositories the items live in, plus repository-search hits.
  repositories: Vec<RemoteRepository>,
}

pub struct SyncEngine {
  db: Arc<Database>,
  accounts: Arc<dyn AccountProvider>,
  saved: Arc<dyn SavedSearchProvider>,
  options: SyncOptions,
}

/// Not-found and forbidden mean "try the next account".
fn skip_account(error: &Report) -> bool {
  error
    .downcast_ref::<RemoteError>()
    .is_some_and(RemoteError::is_access_error)
}

impl SyncEngine {
  pub fn new(
    db: Arc<Database>,
    accounts: Arc<dyn AccountProvider>,
    saved: Arc<dyn SavedSearchProvider>,
    options: SyncOptions,
  ) -> Self {
    Self {
      db,
      accounts,
      saved,
      options,
    }
  }

  pub fn options(&self) -> &SyncOptions {
    &self.options
  }

  fn ensure_connected(&self) -> Result<()> {
    if self.db.is_connected() {
      Ok(())
    } else {
      Err(CacheError::StoreInaccessible.into())
    }
  }

  /// Sync issues and pull requests of `full_name` (`owner/name`).
  ///
  /// Accounts are tried in order; one that cannot see the repository is
  /// skipped. A rate limit aborts at once. If no account succeeds the miss is
  /// logged and the call still succeeds.
  pub async fn update_repository(
    &self,
    full_name: &str,
    options: &RequestOptions,
    cancel: &CancellationToken,
  ) -> Result<()> {
    self.ensure_connected()?;
    let repo = RepositoryRef::parse(full_name)
      .ok_or_else(|| eyre!("Invalid repository name: {}", full_name))?;

    for source in self.accounts.sources() {
      match self.fetch_repository(source.as_ref(), &repo, options, cancel).await {
        Ok(snapshot) => return self.store_repository(snapshot, cancel),
        Err(e) if skip_account(&e) => {
          debug!(account = %source.label(), repository = %repo, "{}", e);
        }
        Err(e) => return Err(e),
      }
    }

    warn!(repository = %repo, "no connected account could read repository");
    Ok(())
  }

  /// Sync several repositories; malformed names are skipped.
  pub async fn update_repositories(
    &self,
    names: &[String],
    options: &RequestOptions,
    cancel: &CancellationToken,
  ) -> Result<()> {
    for name in names {
      if RepositoryRef::parse(name).is_none() {
        warn!(repository = %name, "skipping malformed repository name");
        continue;
      }
      checkpoint(cancel)?;
      self.update_repository(name, options, cancel).await?;
    }
    Ok(())
  }

  /// Sync a saved search with the usual account fallback.
  pub async fn update_search(
    &self,
    query: &SearchQuery,
    options: &RequestOptions,
    cancel: &CancellationToken,
  ) -> Result<()> {
    self.ensure_connected()?;
    let sources = self.accounts.sources();
    self.update_search_with(&sources, query, options, cancel).await
  }

  async fn update_search_with(
    &self,
    sources: &[Arc<dyn RemoteSource>],
    query: &SearchQuery,
    options: &RequestOptions,
    cancel: &CancellationToken,
  ) -> Result<()> {
    for source in sources {
      match self.fetch_search(source.as_ref(), query, options, cancel).await {
        Ok(snapshot) => return self.store_search(query, snapshot, cancel),
        Err(e) if skip_account(&e) => {
          debug!(account = %source.label(), search = %query, "{}", e);
        }
        Err(e) => return Err(e),
      }
    }

    warn!(search = %query, "no connected account could run search");
    Ok(())
  }

  /// Sync `is:pr is:open author:<login>` for every connected account, each
  /// with its own credentials.
  pub async fn update_developer_pull_requests(
    &self,
    options: &RequestOptions,
    cancel: &CancellationToken,
  ) -> Result<()> {
    self.ensure_connected()?;

    for source in self.accounts.accounts() {
      checkpoint(cancel)?;
      let user = match tokio::time::timeout(IDENTITY_TIMEOUT, source.current_user()).await {
        Ok(Ok(user)) => user,
        Ok(Err(e)) if e.is_access_error() => {
          warn!(account = %source.label(), "cannot resolve identity: {}", e);
          continue;
        }
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
          warn!(account = %source.label(), "identity lookup timed out");
          continue;
        }
      };

      let query = developer_search(&user.login);
      self
        .update_search_with(std::slice::from_ref(&source), &query, options, cancel)
        .await?;
    }
    Ok(())
  }

  /// Sync every saved search, every configured repository and the developer
  /// pull requests, then drop searches nobody refreshed in a long while and
  /// issues and pull requests that no search links and this pass did not see.
  pub async fn update_all(&self, options: &RequestOptions, cancel: &CancellationToken) -> Result<()> {
    self.ensure_connected()?;
    let started = chrono::Utc::now();

    for query in self.saved.searches() {
      checkpoint(cancel)?;
      self.update_search(&query, options, cancel).await?;
    }
    self
      .update_repositories(&self.saved.repositories(), options, cancel)
      .await?;
    self.update_developer_pull_requests(options, cancel).await?;

    // Everything still wanted was re-observed by this pass.
    let retention_cutoff = started - self.options.search_retention;
    let observed_cutoff = started - self.options.prune_grace;
    let (dropped, swept) = self.db.write(|tx| {
      let dropped = search::delete_before(tx, retention_cutoff)?;
      let swept = issue::delete_unreferenced(tx, observed_cutoff)?
        + pull_request::delete_unreferenced(tx, observed_cutoff)?;
      if swept > 0 {
        association::delete_orphans(tx)?;
      }
      Ok((dropped, swept))
    })?;
    if dropped > 0 || swept > 0 {
      info!(dropped, swept, "removed expired searches and unreferenced items");
    }
    Ok(())
  }

  async fn fetch_repository(
    &self,
    source: &dyn RemoteSource,
    repo: &RepositoryRef,
    options: &RequestOptions,
    cancel: &CancellationToken,
  ) -> Result<RepositorySnapshot> {
    checkpoint(cancel)?;
    let repository = source.get_repository(repo).await?;
    let issues = collect_pages(options, cancel, move |page| source.list_issues(repo, page)).await?;
    let pull_requests =
      collect_pages(options, cancel, move |page| source.list_pull_requests(repo, page)).await?;

    debug!(
      account = %source.label(),
      repository = %repo,
      issues = issues.len(),
      pull_requests = pull_requests.len(),
      "fetched repository"
    );
    Ok(RepositorySnapshot {
      repository,
      issues,
      pull_requests,
    })
  }

  fn store_repository(&self, snapshot: RepositorySnapshot, cancel: &CancellationToken) -> Result<()> {
    checkpoint(cancel)?;
    let policy = UpsertPolicy::new(self.options.update_threshold);
    let cutoff = policy.now - self.options.prune_grace;

    let (repo, pruned) = self.db.write(|tx| {
      let repo = repository::get_or_create(tx, &snapshot.repository, &policy)?;
      for remote in &snapshot.issues {
        issue::get_or_create(tx, remote, repo.id, &policy)?;
      }
      for remote in &snapshot.pull_requests {
        pull_request::get_or_create(tx, remote, repo.id, &policy)?;
      }
      checkpoint(cancel)?;

      let pruned = issue::delete_last_observed_before(tx, repo.id, cutoff)?
        + pull_request::delete_last_observed_before(tx, repo.id, cutoff)?;
      if pruned > 0 {
        association::delete_orphans(tx)?;
      }
      metadata::set_last_updated(tx, policy.now)?;
      Ok((repo, pruned))
    })?;

    info!(
      repository = %snapshot.repository.reference(),
      id = repo.id,
      issues = snapshot.issues.len(),
      pull_requests = snapshot.pull_requests.len(),
      pruned,
      "repository synced"
    );
    Ok(())
  }

  async fn fetch_search(
    &self,
    source: &dyn RemoteSource,
    query: &SearchQuery,
    options: &RequestOptions,
    cancel: &CancellationToken,
  ) -> Result<SearchSnapshot> {
    let kind = query.effective_kind();
    let q = query.query.as_str();

    if kind == SearchKind::Repositories {
      let repositories =
        collect_pages(options, cancel, move |page| source.search_repositories(q, page)).await?;
      return Ok(SearchSnapshot {
        items: Vec::new(),
        repositories,
      });
    }

    let items: Vec<RemoteSearchItem> =
      collect_pages(options, cancel, move |page| source.search_issues(q, page))
        .await?
        .into_iter()
        .filter(|item| match item {
          RemoteSearchItem::Issue(_) => kind.includes_issues(),
          RemoteSearchItem::PullRequest(_) => kind.includes_pull_requests(),
        })
        .collect();

    // Search hits only name their repository; fetch the ones not yet stored.
    let mut wanted: Vec<RepositoryRef> = Vec::new();
    let mut seen = HashSet::new();
    for item in &items {
      let reference = item.repository();
      if seen.insert(reference.clone()) {
        let stored = self
          .db
          .read(|c| repository::get_by_full_name(c, &reference.owner, &reference.name))?;
        if stored.is_none() {
          wanted.push(reference.clone());
        }
      }
    }

    let mut repositories = Vec::new();
    for reference in &wanted {
      checkpoint(cancel)?;
      match source.get_repository(reference).await {
        Ok(repo) => repositories.push(repo),
        Err(e) if e.is_access_error() => {
          debug!(repository = %reference, "repository of search hit unreadable: {}", e);
        }
        Err(e) => return Err(e.into()),
      }
    }

    debug!(
      account = %source.label(),
      search = %query,
      items = items.len(),
      repositories = repositories.len(),
      "fetched search"
    );
    Ok(SearchSnapshot {
      items,
      repositories,
    })
  }

  fn store_search(
    &self,
    query: &SearchQuery,
    snapshot: SearchSnapshot,
    cancel: &CancellationToken,
  ) -> Result<()> {
    checkpoint(cancel)?;
    let policy = UpsertPolicy::new(self.options.update_threshold);
    let cutoff = policy.now - self.options.prune_grace;
    let now = policy.now;
    let is_repository_search = query.effective_kind() == SearchKind::Repositories;

    let (stale, pruned) = self.db.write(|tx| {
      let search = search::get_or_create(tx, query, now)?;

      let mut repository_ids: HashMap<RepositoryRef, i64> = HashMap::new();
      for remote in &snapshot.repositories {
        let stored = repository::get_or_create(tx, remote, &policy)?;
        repository_ids.insert(remote.reference(), stored.id);
        if is_repository_search {
          association::upsert(tx, Association::SearchRepository, search.id, stored.id, now)?;
          association::upsert(tx, Association::SearchUser, search.id, stored.owner_id, now)?;
        }
      }

      for item in &snapshot.items {
        let reference = item.repository();
        let repository_id = match repository_ids.get(reference) {
          Some(id) => *id,
          None => repository::get_by_full_name(tx, &reference.owner, &reference.name)?
            .map(|r| r.id)
            .unwrap_or(NO_ROW_ID),
        };

        match item {
          RemoteSearchItem::Issue(remote) => {
            let stored = issue::get_or_create(tx, remote, repository_id, &policy)?;
            association::upsert(tx, Association::SearchIssue, search.id, stored.id, now)?;
            association::upsert(tx, Association::SearchUser, search.id, stored.author_id, now)?;
          }
          RemoteSearchItem::PullRequest(remote) => {
            let stored = pull_request::get_or_create(tx, remote, repository_id, &policy)?;
            association::upsert(tx, Association::SearchPullRequest, search.id, stored.id, now)?;
            association::upsert(tx, Association::SearchUser, search.id, stored.author_id, now)?;
          }
        }
      }
      checkpoint(cancel)?;

      let dropped_issues = association::targets_before(tx, Association::SearchIssue, search.id, now)?;
      let dropped_prs =
        association::targets_before(tx, Association::SearchPullRequest, search.id, now)?;
      let stale = search::delete_rows_before(tx, search.id, now)?;
      let pruned = issue::delete_not_referenced_by_search(tx, &dropped_issues, cutoff)?
        + pull_request::delete_not_referenced_by_search(tx, &dropped_prs, cutoff)?;
      if pruned > 0 {
        association::delete_orphans(tx)?;
      }
      metadata::set_last_updated(tx, now)?;
      Ok((stale, pruned))
    })?;

    info!(
      search = %query,
      items = snapshot.items.len(),
      repositories = snapshot.repositories.len(),
      stale,
      pruned,
      "search synced"
    );
    Ok(())
  }
}

/// The saved search backing a developer's own open pull requests.
pub fn developer_search(login: &str) -> SearchQuery {
  SearchQuery::new(
    format!("Pull requests by {login}"),
    format!("is:pr is:open author:{login}"),
    SearchKind::PullRequests,
  )
}

#[async_trait]
impl Synchronizer for SyncEngine {
  async fn synchronize(&self, target: &UpdateTarget, cancel: CancellationToken) -> Result<()> {
    let options = self.options.request;
    match target {
      UpdateTarget::All => self.update_all(&options, &cancel).await,
      UpdateTarget::Search(query) => self.update_search(query, &options, &cancel).await,
      UpdateTarget::Repository(name) => self.update_repository(name, &options, &cancel).await,
      UpdateTarget::DeveloperPullRequests => {
        self.update_developer_pull_requests(&options, &cancel).await
      }
    }
  }
}
