//! Typed error leaves carried inside `eyre::Report`.
//!
//! Most of the crate returns `color_eyre::Result`. The few failures callers
//! need to branch on (a closed store, a cancelled sync) are expressed here and
//! recovered with `Report::downcast_ref`.

use color_eyre::eyre::Report;
use thiserror::Error;

use crate::github::RemoteError;

#[derive(Debug, Error)]
pub enum CacheError {
  /// The embedded store is closed or failed to open.
  #[error("cache store is inaccessible")]
  StoreInaccessible,

  /// A sync operation observed its cancellation token.
  #[error("update was cancelled")]
  Cancelled,

  /// A refresh finished with an error event; carries the event message.
  #[error("{0}")]
  UpdateFailed(String),
}

/// True when the report (or anything it wraps) is a cancellation.
pub fn is_cancelled(report: &Report) -> bool {
  matches!(report.downcast_ref::<CacheError>(), Some(CacheError::Cancelled))
}

/// True when the report wraps a remote rate-limit error.
pub fn is_rate_limited(report: &Report) -> bool {
  matches!(
    report.downcast_ref::<RemoteError>(),
    Some(RemoteError::RateLimited { .. })
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cancelled_is_detected_through_report() {
    let report = Report::new(CacheError::Cancelled);
    assert!(is_cancelled(&report));
    assert!(!is_rate_limited(&report));
  }

  #[test]
  fn rate_limit_is_detected_through_report() {
    let report = Report::new(RemoteError::RateLimited {
      message: "API rate limit exceeded".to_string(),
    });
    assert!(is_rate_limited(&report));
    assert!(!is_cancelled(&report));
  }
}
