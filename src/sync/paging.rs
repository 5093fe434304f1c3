use color_eyre::Result;
use std::future::Future;
use tokio_util::sync::CancellationToken;

use crate::error::CacheError;
use crate::github::{Page, PageRequest, RemoteError};

/// Paging for remote listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOptions {
  pub page_size: u32,
  /// Stop after this many pages even if the remote has more.
  pub max_pages: u32,
}

impl Default for RequestOptions {
  fn default() -> Self {
    Self {
      page_size: 50,
      max_pages: 2,
    }
  }
}

/// Fail with `CacheError::Cancelled` once `cancel` has fired.
pub fn checkpoint(cancel: &CancellationToken) -> Result<()> {
  if cancel.is_cancelled() {
    Err(CacheError::Cancelled.into())
  } else {
    Ok(())
  }
}

/// Fetch pages until the remote runs out or `max_pages` is reached, checking
/// for cancellation before every page.
pub async fn collect_pages<T, F, Fut>(
  options: &RequestOptions,
  cancel: &CancellationToken,
  mut fetch: F,
) -> Result<Vec<T>>
where
  F: FnMut(PageRequest) -> Fut,
  Fut: Future<Output = std::result::Result<Page<T>, RemoteError>>,
{
  let mut items = Vec::new();
  for page in 1..=options.max_pages.max(1) {
    checkpoint(cancel)?;
    let result = fetch(PageRequest {
      page,
      per_page: options.page_size.max(1),
    })
    .await?;
    items.extend(result.items);
    if !result.has_next {
      break;
    }
  }
  Ok(items)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::is_cancelled;

  type Ready = std::future::Ready<std::result::Result<Page<u32>, RemoteError>>;

  /// A remote listing of `0..total`.
  fn numbers(total: u32) -> impl FnMut(PageRequest) -> Ready {
    move |req| {
      let start = (req.page - 1) * req.per_page;
      let end = (start + req.per_page).min(total);
      std::future::ready(Ok(Page {
        items: (start..end).collect(),
        has_next: end < total,
      }))
    }
  }

  #[tokio::test]
  async fn stops_when_remote_runs_out() {
    let options = RequestOptions {
      page_size: 10,
      max_pages: 5,
    };
    let items = collect_pages(&options, &CancellationToken::new(), numbers(25))
      .await
      .unwrap();
    assert_eq!(items.len(), 25);
  }

  #[tokio::test]
  async fn caps_at_max_pages() {
    let options = RequestOptions {
      page_size: 10,
      max_pages: 1,
    };
    let items = collect_pages(&options, &CancellationToken::new(), numbers(25))
      .await
      .unwrap();
    assert_eq!(items, (0..10).collect::<Vec<_>>());
  }

  #[tokio::test]
  async fn cancelled_before_first_page() {
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = collect_pages(&RequestOptions::default(), &cancel, numbers(5))
      .await
      .unwrap_err();
    assert!(is_cancelled(&err));
  }

  #[tokio::test]
  async fn remote_error_is_kept_typed() {
    let fetch = |_req: PageRequest| {
      std::future::ready(Err::<Page<u32>, _>(RemoteError::Forbidden("private".into())))
    };
    let err = collect_pages(&RequestOptions::default(), &CancellationToken::new(), fetch)
      .await
      .unwrap_err();
    assert!(matches!(
      err.downcast_ref::<RemoteError>(),
      Some(RemoteError::Forbidden(_))
    ));
  }
}
