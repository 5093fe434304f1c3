//! The read facade hosts call.
//!
//! Every read serves what is stored and then asks for a background refresh,
//! so the next read sees newer data. The very first read of a search waits
//! for its initial fetch instead of returning nothing.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use rusqlite::Connection;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::db::Database;
use crate::error::CacheError;
use crate::github::{AccountProvider, PullRequestInfo, SourceBranchDecorator};
use crate::store::{issue, pull_request, repository, search, Issue, Repository, SearchQuery};

use super::events::{UpdateKind, UpdateTarget};
use super::manager::CacheManager;
use super::merge::merge_sorted_by_key;

/// One entry of a combined issue and pull request view.
pub enum SearchItem {
  Issue(Issue),
  PullRequest(SourceBranchDecorator),
}

impl SearchItem {
  pub fn updated_at(&self) -> DateTime<Utc> {
    match self {
      SearchItem::Issue(issue) => issue.time_updated,
      SearchItem::PullRequest(pr) => pr.updated_at(),
    }
  }

  pub fn html_url(&self) -> &str {
    match self {
      SearchItem::Issue(issue) => &issue.html_url,
      SearchItem::PullRequest(pr) => pr.html_url(),
    }
  }
}

pub struct CacheDataManager {
  db: Arc<Database>,
  manager: CacheManager,
  accounts: Arc<dyn AccountProvider>,
  first_fetch_timeout: Duration,
}

impl CacheDataManager {
  pub fn new(
    db: Arc<Database>,
    manager: CacheManager,
    accounts: Arc<dyn AccountProvider>,
    first_fetch_timeout: Duration,
  ) -> Self {
    Self {
      db,
      manager,
      accounts,
      first_fetch_timeout,
    }
  }

  pub fn manager(&self) -> &CacheManager {
    &self.manager
  }

  pub async fn get_issues(&self, query: &SearchQuery) -> Result<Vec<Issue>> {
    self.serve(query, issue::for_search).await
  }

  /// Pull requests of `query`, each resolving its source branch on demand.
  pub async fn get_pull_requests(&self, query: &SearchQuery) -> Result<Vec<SourceBranchDecorator>> {
    let pulls = self.serve(query, pull_request::for_search).await?;
    let resolvers = self.accounts.sources();
    Ok(
      pulls
        .into_iter()
        .map(|pr| SourceBranchDecorator::new(pr, resolvers.clone()))
        .collect(),
    )
  }

  /// Issues and pull requests of `query` in update order.
  pub async fn get_items(&self, query: &SearchQuery) -> Result<Vec<SearchItem>> {
    let (issues, pulls) = self
      .serve(query, |conn, id| {
        Ok((issue::for_search(conn, id)?, pull_request::for_search(conn, id)?))
      })
      .await?;

    let resolvers = self.accounts.sources();
    let issues: Vec<SearchItem> = issues.into_iter().map(SearchItem::Issue).collect();
    let pulls: Vec<SearchItem> = pulls
      .into_iter()
      .map(|pr| SearchItem::PullRequest(SourceBranchDecorator::new(pr, resolvers.clone())))
      .collect();
    Ok(merge_sorted_by_key(issues, pulls, SearchItem::updated_at))
  }

  pub async fn get_repositories(&self, query: &SearchQuery) -> Result<Vec<Repository>> {
    self.serve(query, repository::for_search).await
  }

  pub fn refresh(&self, target: UpdateTarget) -> Result<()> {
    self.manager.refresh(target)
  }

  pub fn cancel_update_in_progress(&self) {
    self.manager.cancel_update_in_progress();
  }

  async fn serve<T: Default>(
    &self,
    query: &SearchQuery,
    read: impl FnOnce(&Connection, i64) -> Result<T>,
  ) -> Result<T> {
    self.ensure_first_fetch(query).await?;

    let found = self.db.read(|conn| match search::get(conn, query)? {
      Some(stored) => read(conn, stored.id),
      None => Ok(T::default()),
    })?;

    let target = UpdateTarget::Search(query.clone());
    if let Err(e) = self.manager.refresh(target) {
      warn!(search = %query, "could not schedule refresh: {}", e);
    }
    Ok(found)
  }

  /// Block on the initial fetch of a search that was never stored.
  async fn ensure_first_fetch(&self, query: &SearchQuery) -> Result<()> {
    if self.db.read(|conn| search::get(conn, query))?.is_some() {
      return Ok(());
    }

    debug!(search = %query, "no local data; waiting for first fetch");
    let mut updates = self.manager.subscribe();
    self.manager.refresh(UpdateTarget::Search(query.clone()))?;

    match tokio::time::timeout(self.first_fetch_timeout, updates.wait_for(query)).await {
      Ok(Some(event)) if event.kind == UpdateKind::Error => {
        let message = event
          .message
          .unwrap_or_else(|| format!("update of {} failed", query));
        Err(CacheError::UpdateFailed(message).into())
      }
      Ok(_) => Ok(()),
      Err(_) => {
        warn!(search = %query, "first fetch timed out; serving local data");
        Ok(())
      }
    }
  }
}
