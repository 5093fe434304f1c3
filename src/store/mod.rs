//! Entity repository layer.
//!
//! Each submodule owns one table (or family of join tables) and exposes free
//! functions that take an explicit connection and return plain values.
//! Relationships (author, repository, labels) are resolved by calling the
//! owning module, never implicitly.
//!
//! ```ignore
//! db.write(|tx| {
//!   let policy = UpsertPolicy::new(Duration::hours(4));
//!   let repo = repository::get_or_create(tx, &remote_repo, &policy)?;
//!   let issue = issue::get_or_create(tx, &remote_issue, repo.id, &policy)?;
//!   let labels = label::for_issue(tx, issue.id)?;
//!   Ok(())
//! })?;
//! ```

pub mod association;
pub mod issue;
pub mod label;
pub mod metadata;
pub mod pull_request;
pub mod repository;
pub mod search;
pub mod user;

use chrono::{DateTime, Duration, Utc};

pub use association::Association;
pub use issue::Issue;
pub use label::Label;
pub use pull_request::PullRequest;
pub use repository::Repository;
pub use search::{Search, SearchKind, SearchQuery};
pub use user::User;

/// Timestamp and throttle shared by every upsert in one sync pass.
#[derive(Debug, Clone, Copy)]
pub struct UpsertPolicy {
  /// When this pass observed the data; written as last-observed.
  pub now: DateTime<Utc>,
  /// Minimum age before a stored user or label is rewritten.
  pub update_threshold: Duration,
}

impl UpsertPolicy {
  pub fn new(update_threshold: Duration) -> Self {
    Self::at(Utc::now(), update_threshold)
  }

  pub fn at(now: DateTime<Utc>, update_threshold: Duration) -> Self {
    Self {
      now,
      update_threshold,
    }
  }

  /// Whether a row last written at `stored` may be rewritten now.
  pub fn is_due(&self, stored: DateTime<Utc>) -> bool {
    self.now - stored > self.update_threshold
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn due_only_past_threshold() {
    let now = Utc::now();
    let policy = UpsertPolicy::at(now, Duration::hours(4));

    assert!(!policy.is_due(now));
    assert!(!policy.is_due(now - Duration::hours(4)));
    assert!(policy.is_due(now - Duration::hours(4) - Duration::seconds(1)));
  }
}
