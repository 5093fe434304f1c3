//! Refresh state machine.
//!
//! At most one sync runs at a time and at most one more waits behind it.
//! Asking again for the target already in flight is a no-op; asking for a
//! different one cancels the running sync and queues the new target, which
//! starts as soon as the cancelled one reports back.
//!
//! ```text
//! Idle ──refresh──▶ Refreshing ──refresh(other)──▶ PendingRefresh
//!  ▲ ▲                 │  ▲                              │
//!  │ └─success/error───┘  └──────────cancel──────────────┘
//!  └──success/error── PeriodicUpdating ◀──timer── Idle
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::db::Database;
use crate::error::{is_cancelled, CacheError};
use crate::store::metadata;

use super::events::{UpdateEvent, UpdateKind, UpdateSubscription, UpdateTarget};
use super::periodic::PeriodicTimer;

const EVENT_CAPACITY: usize = 64;

/// Runs one update. Implemented by the sync engine; tests substitute their
/// own.
#[async_trait]
pub trait Synchronizer: Send + Sync {
  async fn synchronize(&self, target: &UpdateTarget, cancel: CancellationToken) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheState {
  #[default]
  Idle,
  Refreshing,
  PeriodicUpdating,
  PendingRefresh,
}

#[derive(Debug, Clone)]
pub struct ManagerOptions {
  /// Minimum time between two periodic passes.
  pub periodic_interval: Duration,
  /// How often the periodic timer checks whether a pass is due.
  pub periodic_tick: std::time::Duration,
}

impl Default for ManagerOptions {
  fn default() -> Self {
    Self {
      periodic_interval: Duration::minutes(30),
      periodic_tick: std::time::Duration::from_secs(60),
    }
  }
}

#[derive(Default)]
struct Machine {
  state: CacheState,
  current: Option<UpdateTarget>,
  pending: Option<UpdateTarget>,
  cancel: Option<CancellationToken>,
  /// When the last update finished with success or error.
  last_pass: Option<DateTime<Utc>>,
}

struct Shared {
  db: Arc<Database>,
  sync: Arc<dyn Synchronizer>,
  events: broadcast::Sender<UpdateEvent>,
  machine: Mutex<Machine>,
  options: ManagerOptions,
  timer: PeriodicTimer,
}

/// Owns the refresh state machine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct CacheManager {
  shared: Arc<Shared>,
}

impl CacheManager {
  pub fn new(db: Arc<Database>, sync: Arc<dyn Synchronizer>, options: ManagerOptions) -> Self {
    let last_pass = match db.read(metadata::last_updated) {
      Ok(last) => last,
      Err(e) => {
        warn!("could not read last update time: {}", e);
        None
      }
    };
    let (events, _) = broadcast::channel(EVENT_CAPACITY);
    let timer = PeriodicTimer::new(options.periodic_tick);

    Self {
      shared: Arc::new(Shared {
        db,
        sync,
        events,
        machine: Mutex::new(Machine {
          last_pass,
          ..Machine::default()
        }),
        options,
        timer,
      }),
    }
  }

  fn machine(&self) -> MutexGuard<'_, Machine> {
    self
      .shared
      .machine
      .lock()
      .unwrap_or_else(|e| e.into_inner())
  }

  pub fn state(&self) -> CacheState {
    self.machine().state
  }

  /// Target of the sync currently running.
  pub fn current_target(&self) -> Option<UpdateTarget> {
    self.machine().current.clone()
  }

  /// Target queued behind the running sync.
  pub fn pending_target(&self) -> Option<UpdateTarget> {
    self.machine().pending.clone()
  }

  pub fn subscribe(&self) -> UpdateSubscription {
    UpdateSubscription::new(self.shared.events.subscribe())
  }

  /// When data was last committed by a successful sync.
  pub fn last_updated(&self) -> Result<Option<DateTime<Utc>>> {
    self.shared.db.read(metadata::last_updated)
  }

  /// Request an update of `target`. Must be called from a tokio runtime.
  pub fn refresh(&self, target: UpdateTarget) -> Result<()> {
    if !self.shared.db.is_connected() {
      return Err(CacheError::StoreInaccessible.into());
    }

    let mut machine = self.machine();
    match machine.state {
      CacheState::Idle => {
        info!(target = %target, "starting refresh");
        self.launch(&mut machine, target, CacheState::Refreshing);
      }
      CacheState::Refreshing | CacheState::PeriodicUpdating => {
        if machine.current.as_ref() == Some(&target) {
          debug!(target = %target, "refresh already in flight");
          return Ok(());
        }
        info!(target = %target, "superseding in-flight refresh");
        machine.pending = Some(target);
        machine.state = CacheState::PendingRefresh;
        if let Some(cancel) = &machine.cancel {
          cancel.cancel();
        }
      }
      CacheState::PendingRefresh => {
        debug!(target = %target, "replacing pending refresh");
        machine.pending = Some(target);
      }
    }
    Ok(())
  }

  /// Start a full pass if idle and the periodic interval has elapsed.
  /// Returns whether a pass was started.
  pub fn periodic_update(&self) -> bool {
    if !self.shared.db.is_connected() {
      return false;
    }

    let mut machine = self.machine();
    if machine.state != CacheState::Idle {
      return false;
    }
    if let Some(last) = machine.last_pass {
      if Utc::now() - last < self.shared.options.periodic_interval {
        return false;
      }
    }

    info!("starting periodic update");
    self.launch(&mut machine, UpdateTarget::All, CacheState::PeriodicUpdating);
    true
  }

  /// Run [`CacheManager::periodic_update`] on the configured tick until
  /// stopped. Returns `false` if already running.
  pub fn start_periodic(&self) -> bool {
    let weak: Weak<Shared> = Arc::downgrade(&self.shared);
    self.shared.timer.start(move || {
      let weak = weak.clone();
      async move {
        if let Some(shared) = weak.upgrade() {
          CacheManager { shared }.periodic_update();
        }
      }
    })
  }

  pub fn stop_periodic(&self) -> bool {
    self.shared.timer.stop()
  }

  pub fn is_periodic_running(&self) -> bool {
    self.shared.timer.is_running()
  }

  /// Cancel the running sync and forget the pending one.
  pub fn cancel_update_in_progress(&self) {
    let mut machine = self.machine();
    machine.pending = None;
    if machine.state == CacheState::PendingRefresh {
      machine.state = CacheState::Refreshing;
    }
    if let Some(cancel) = &machine.cancel {
      info!("cancelling update in progress");
      cancel.cancel();
    }
  }

  /// Cancel any update, wipe the store and tell subscribers.
  pub fn clear_cache(&self) -> Result<()> {
    self.cancel_update_in_progress();
    self.shared.db.reset()?;
    self.machine().last_pass = None;
    info!("cache cleared");
    self.publish(UpdateEvent::cleared());
    Ok(())
  }

  fn launch(&self, machine: &mut Machine, target: UpdateTarget, state: CacheState) {
    let cancel = CancellationToken::new();
    machine.state = state;
    machine.current = Some(target.clone());
    machine.cancel = Some(cancel.clone());

    let manager = self.clone();
    tokio::spawn(async move {
      // A panicking sync still has to return the machine to idle.
      let result = AssertUnwindSafe(manager.shared.sync.synchronize(&target, cancel))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Err(eyre!("Update of {} panicked", target)));
      manager.complete(target, result);
    });
  }

  fn complete(&self, target: UpdateTarget, result: Result<()>) {
    let event = match result {
      Ok(()) => {
        info!(target = %target, "update succeeded");
        UpdateEvent::success(target)
      }
      Err(e) if is_cancelled(&e) => {
        info!(target = %target, "update cancelled");
        UpdateEvent::cancel(target)
      }
      Err(e) => {
        error!(target = %target, "update failed: {:#}", e);
        UpdateEvent::error(target, &e)
      }
    };

    {
      let mut machine = self.machine();
      machine.current = None;
      machine.cancel = None;

      match (event.kind, machine.pending.take()) {
        (UpdateKind::Cancel, Some(next)) => {
          info!(target = %next, "starting pending refresh");
          self.launch(&mut machine, next, CacheState::Refreshing);
        }
        (UpdateKind::Cancel, None) => machine.state = CacheState::Idle,
        _ => {
          machine.state = CacheState::Idle;
          machine.last_pass = Some(Utc::now());
        }
      }
    }

    self.publish(event);
  }

  fn publish(&self, event: UpdateEvent) {
    // No subscribers is fine.
    let _ = self.shared.events.send(event);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::github::RemoteError;
  use crate::store::{SearchKind, SearchQuery};
  use std::time::Duration as StdDuration;
  use tokio::sync::Notify;

  /// Records every call; each call blocks until released or cancelled.
  #[derive(Default)]
  struct GatedSync {
    calls: Mutex<Vec<UpdateTarget>>,
    gate: Notify,
    ignore_cancel: bool,
    fail_with: Option<RemoteError>,
  }

  impl GatedSync {
    fn calls(&self) -> Vec<UpdateTarget> {
      self.calls.lock().unwrap().clone()
    }

    async fn wait_for_calls(&self, n: usize) {
      for _ in 0..200 {
        if self.calls.lock().unwrap().len() >= n {
          return;
        }
        tokio::time::sleep(StdDuration::from_millis(5)).await;
      }
      panic!("expected {} sync calls, saw {:?}", n, self.calls());
    }
  }

  #[async_trait]
  impl Synchronizer for GatedSync {
    async fn synchronize(&self, target: &UpdateTarget, cancel: CancellationToken) -> Result<()> {
      self.calls.lock().unwrap().push(target.clone());
      if self.ignore_cancel {
        self.gate.notified().await;
      } else {
        tokio::select! {
          _ = cancel.cancelled() => return Err(CacheError::Cancelled.into()),
          _ = self.gate.notified() => {}
        }
      }
      match &self.fail_with {
        Some(e) => Err(e.clone().into()),
        None => Ok(()),
      }
    }
  }

  fn manager(sync: Arc<GatedSync>) -> CacheManager {
    let db = Arc::new(Database::open_in_memory().unwrap());
    CacheManager::new(db, sync, ManagerOptions::default())
  }

  fn search(name: &str) -> UpdateTarget {
    UpdateTarget::Search(SearchQuery::new(name, "is:issue", SearchKind::Issues))
  }

  #[tokio::test]
  async fn same_target_is_coalesced() {
    let sync = Arc::new(GatedSync::default());
    let mgr = manager(sync.clone());
    let mut events = mgr.subscribe();

    mgr.refresh(search("a")).unwrap();
    mgr.refresh(search("a")).unwrap();
    assert_eq!(mgr.state(), CacheState::Refreshing);

    sync.wait_for_calls(1).await;
    sync.gate.notify_one();
    let event = events.recv().await.unwrap();

    assert_eq!(event.kind, UpdateKind::Success);
    assert_eq!(sync.calls(), vec![search("a")]);
    assert_eq!(mgr.state(), CacheState::Idle);
  }

  #[tokio::test]
  async fn different_target_supersedes_in_flight() {
    let sync = Arc::new(GatedSync::default());
    let mgr = manager(sync.clone());
    let mut events = mgr.subscribe();

    mgr.refresh(search("a")).unwrap();
    sync.wait_for_calls(1).await;
    mgr.refresh(search("b")).unwrap();
    assert_eq!(mgr.state(), CacheState::PendingRefresh);
    assert_eq!(mgr.pending_target(), Some(search("b")));

    let cancelled = events.recv().await.unwrap();
    assert_eq!(cancelled.kind, UpdateKind::Cancel);
    assert_eq!(cancelled.target, search("a"));
    assert_eq!(mgr.state(), CacheState::Refreshing);
    assert_eq!(mgr.current_target(), Some(search("b")));
    assert_eq!(mgr.pending_target(), None);

    sync.wait_for_calls(2).await;
    sync.gate.notify_one();
    let done = events.recv().await.unwrap();
    assert_eq!(done.kind, UpdateKind::Success);
    assert_eq!(done.target, search("b"));
    assert_eq!(sync.calls(), vec![search("a"), search("b")]);
  }

  #[tokio::test]
  async fn newest_pending_wins() {
    let sync = Arc::new(GatedSync {
      ignore_cancel: true,
      ..GatedSync::default()
    });
    let mgr = manager(sync.clone());

    mgr.refresh(search("a")).unwrap();
    mgr.refresh(search("b")).unwrap();
    mgr.refresh(search("c")).unwrap();
    assert_eq!(mgr.pending_target(), Some(search("c")));
  }

  #[tokio::test]
  async fn success_clears_pending() {
    let sync = Arc::new(GatedSync {
      ignore_cancel: true,
      ..GatedSync::default()
    });
    let mgr = manager(sync.clone());
    let mut events = mgr.subscribe();

    mgr.refresh(search("a")).unwrap();
    mgr.refresh(search("b")).unwrap();
    sync.wait_for_calls(1).await;
    sync.gate.notify_one();

    let event = events.recv().await.unwrap();
    assert_eq!(event.kind, UpdateKind::Success);
    assert_eq!(mgr.state(), CacheState::Idle);
    assert_eq!(mgr.pending_target(), None);
    assert_eq!(sync.calls(), vec![search("a")]);
  }

  #[tokio::test]
  async fn failure_raises_error_event() {
    let sync = Arc::new(GatedSync {
      fail_with: Some(RemoteError::RateLimited {
        message: "API rate limit exceeded".into(),
      }),
      ..GatedSync::default()
    });
    let mgr = manager(sync.clone());
    let mut events = mgr.subscribe();

    mgr.refresh(UpdateTarget::All).unwrap();
    sync.wait_for_calls(1).await;
    sync.gate.notify_one();

    let event = events.recv().await.unwrap();
    assert_eq!(event.kind, UpdateKind::Error);
    assert!(event.is_rate_limited());
    assert_eq!(event.message.as_deref(), Some("API rate limit exceeded"));
    assert_eq!(mgr.state(), CacheState::Idle);
  }

  struct PanickingSync;

  #[async_trait]
  impl Synchronizer for PanickingSync {
    async fn synchronize(&self, _target: &UpdateTarget, _cancel: CancellationToken) -> Result<()> {
      panic!("sync blew up");
    }
  }

  #[tokio::test]
  async fn panicking_sync_reports_error_and_recovers() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let mgr = CacheManager::new(db, Arc::new(PanickingSync), ManagerOptions::default());
    let mut events = mgr.subscribe();

    mgr.refresh(UpdateTarget::All).unwrap();
    let event = events.recv().await.unwrap();
    assert_eq!(event.kind, UpdateKind::Error);
    assert!(event.message.unwrap_or_default().contains("panicked"));
    assert_eq!(mgr.state(), CacheState::Idle);

    mgr.refresh(search("a")).unwrap();
    assert_eq!(mgr.state(), CacheState::Refreshing);
    assert_eq!(events.recv().await.unwrap().kind, UpdateKind::Error);
  }

  #[tokio::test]
  async fn cancel_drops_pending_and_returns_to_idle() {
    let sync = Arc::new(GatedSync::default());
    let mgr = manager(sync.clone());
    let mut events = mgr.subscribe();

    mgr.refresh(search("a")).unwrap();
    sync.wait_for_calls(1).await;
    mgr.refresh(search("b")).unwrap();
    mgr.cancel_update_in_progress();

    let event = events.recv().await.unwrap();
    assert_eq!(event.kind, UpdateKind::Cancel);
    assert_eq!(mgr.state(), CacheState::Idle);
    assert_eq!(sync.calls(), vec![search("a")]);
  }

  #[tokio::test]
  async fn periodic_update_respects_interval() {
    let sync = Arc::new(GatedSync::default());
    let mgr = manager(sync.clone());
    let mut events = mgr.subscribe();

    assert!(mgr.periodic_update());
    assert_eq!(mgr.state(), CacheState::PeriodicUpdating);
    assert!(!mgr.periodic_update());

    sync.wait_for_calls(1).await;
    sync.gate.notify_one();
    events.recv().await.unwrap();

    assert_eq!(mgr.state(), CacheState::Idle);
    assert!(!mgr.periodic_update(), "interval has not elapsed");
    assert_eq!(sync.calls(), vec![UpdateTarget::All]);
  }

  #[tokio::test]
  async fn refresh_during_periodic_supersedes_it() {
    let sync = Arc::new(GatedSync::default());
    let mgr = manager(sync.clone());

    assert!(mgr.periodic_update());
    sync.wait_for_calls(1).await;
    mgr.refresh(search("a")).unwrap();
    assert_eq!(mgr.state(), CacheState::PendingRefresh);

    sync.wait_for_calls(2).await;
    assert_eq!(mgr.current_target(), Some(search("a")));
  }

  #[tokio::test]
  async fn clear_cache_resets_store_and_notifies() {
    let sync = Arc::new(GatedSync::default());
    let db = Arc::new(Database::open_in_memory().unwrap());
    db.write(|tx| metadata::set_last_updated(tx, Utc::now()))
      .unwrap();
    let mgr = CacheManager::new(db.clone(), sync, ManagerOptions::default());
    let mut events = mgr.subscribe();
    assert!(mgr.last_updated().unwrap().is_some());

    mgr.clear_cache().unwrap();

    let event = events.recv().await.unwrap();
    assert_eq!(event.kind, UpdateKind::Cleared);
    assert!(mgr.last_updated().unwrap().is_none());
  }

  #[tokio::test]
  async fn closed_store_rejects_refresh() {
    let sync = Arc::new(GatedSync::default());
    let db = Arc::new(Database::open_in_memory().unwrap());
    let mgr = CacheManager::new(db.clone(), sync.clone(), ManagerOptions::default());
    db.close();

    let err = mgr.refresh(search("a")).unwrap_err();
    assert!(matches!(
      err.downcast_ref::<CacheError>(),
      Some(CacheError::StoreInaccessible)
    ));
    assert!(!mgr.periodic_update());
    assert!(sync.calls().is_empty());
  }

  #[tokio::test]
  async fn periodic_timer_is_idempotent() {
    let sync = Arc::new(GatedSync::default());
    let mgr = manager(sync.clone());

    assert!(mgr.start_periodic());
    assert!(!mgr.start_periodic());
    assert!(mgr.is_periodic_running());

    sync.wait_for_calls(1).await;
    assert!(mgr.stop_periodic());
    assert!(!mgr.stop_periodic());
    assert_eq!(sync.calls(), vec![UpdateTarget::All]);
  }
}
