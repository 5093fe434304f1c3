//! Update targets and the completion events the cache manager raises.

use color_eyre::eyre::Report;
use std::fmt;
use tokio::sync::broadcast;
use tracing::warn;

use crate::error::is_rate_limited;
use crate::store::SearchQuery;

/// What a refresh should bring up to date.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UpdateTarget {
  /// Every saved search, configured repository and the developer's own pull
  /// requests.
  All,
  Search(SearchQuery),
  /// A repository by `owner/name`.
  Repository(String),
  /// Open pull requests authored by each connected account.
  DeveloperPullRequests,
}

impl UpdateTarget {
  /// Whether completing this target means fresh data for `search`.
  pub fn covers(&self, search: &SearchQuery) -> bool {
    match self {
      UpdateTarget::All => true,
      UpdateTarget::Search(s) => s == search,
      _ => false,
    }
  }
}

impl fmt::Display for UpdateTarget {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      UpdateTarget::All => write!(f, "all"),
      UpdateTarget::Search(search) => write!(f, "search {}", search),
      UpdateTarget::Repository(name) => write!(f, "repository {}", name),
      UpdateTarget::DeveloperPullRequests => write!(f, "developer pull requests"),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
  Success,
  Cancel,
  Error,
  /// The store was wiped; every view should reload.
  Cleared,
}

#[derive(Debug, Clone)]
pub struct UpdateEvent {
  pub kind: UpdateKind,
  pub target: UpdateTarget,
  /// Failure text for `Error` events, shown to the user as is.
  pub message: Option<String>,
  rate_limited: bool,
}

impl UpdateEvent {
  pub fn success(target: UpdateTarget) -> Self {
    Self {
      kind: UpdateKind::Success,
      target,
      message: None,
      rate_limited: false,
    }
  }

  pub fn cancel(target: UpdateTarget) -> Self {
    Self {
      kind: UpdateKind::Cancel,
      target,
      message: None,
      rate_limited: false,
    }
  }

  pub fn error(target: UpdateTarget, error: &Report) -> Self {
    Self {
      kind: UpdateKind::Error,
      target,
      message: Some(error.to_string()),
      rate_limited: is_rate_limited(error),
    }
  }

  pub fn cleared() -> Self {
    Self {
      kind: UpdateKind::Cleared,
      target: UpdateTarget::All,
      message: None,
      rate_limited: false,
    }
  }

  /// The error came from an exhausted API quota.
  pub fn is_rate_limited(&self) -> bool {
    self.rate_limited
  }
}

/// A live subscription to update events. Dropping it unsubscribes.
pub struct UpdateSubscription {
  rx: broadcast::Receiver<UpdateEvent>,
}

impl UpdateSubscription {
  pub(crate) fn new(rx: broadcast::Receiver<UpdateEvent>) -> Self {
    Self { rx }
  }

  /// Next event, or `None` once the manager is gone.
  pub async fn recv(&mut self) -> Option<UpdateEvent> {
    loop {
      match self.rx.recv().await {
        Ok(event) => return Some(event),
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
          warn!(skipped, "update subscriber lagged; events dropped");
        }
        Err(broadcast::error::RecvError::Closed) => return None,
      }
    }
  }

  /// Wait for the first completion that covers `search`.
  pub async fn wait_for(&mut self, search: &SearchQuery) -> Option<UpdateEvent> {
    while let Some(event) = self.recv().await {
      if event.kind == UpdateKind::Cleared || event.target.covers(search) {
        return Some(event);
      }
    }
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::github::RemoteError;
  use crate::store::SearchKind;

  fn search(name: &str) -> SearchQuery {
    SearchQuery::new(name, "is:issue", SearchKind::Issues)
  }

  #[test]
  fn all_covers_every_search() {
    assert!(UpdateTarget::All.covers(&search("a")));
    assert!(UpdateTarget::Search(search("a")).covers(&search("a")));
    assert!(!UpdateTarget::Search(search("a")).covers(&search("b")));
    assert!(!UpdateTarget::Repository("o/r".into()).covers(&search("a")));
  }

  #[test]
  fn error_event_keeps_rate_limit_message() {
    let report = Report::new(RemoteError::RateLimited {
      message: "API rate limit exceeded for 1.2.3.4".to_string(),
    });
    let event = UpdateEvent::error(UpdateTarget::All, &report);

    assert_eq!(event.kind, UpdateKind::Error);
    assert!(event.is_rate_limited());
    assert_eq!(
      event.message.as_deref(),
      Some("API rate limit exceeded for 1.2.3.4")
    );
  }

  #[tokio::test]
  async fn wait_for_skips_unrelated_events() {
    let (tx, rx) = broadcast::channel(8);
    let mut sub = UpdateSubscription::new(rx);

    tx.send(UpdateEvent::success(UpdateTarget::Search(search("b"))))
      .unwrap();
    tx.send(UpdateEvent::cancel(UpdateTarget::Search(search("a"))))
      .unwrap();

    let event = sub.wait_for(&search("a")).await.unwrap();
    assert_eq!(event.kind, UpdateKind::Cancel);
  }

  #[tokio::test]
  async fn closed_channel_ends_subscription() {
    let (tx, rx) = broadcast::channel::<UpdateEvent>(8);
    let mut sub = UpdateSubscription::new(rx);
    drop(tx);
    assert!(sub.recv().await.is_none());
  }
}
