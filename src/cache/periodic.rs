//! A single background loop that invokes a callback on a fixed tick.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct Running {
  cancel: CancellationToken,
  handle: JoinHandle<()>,
}

/// Owns at most one ticking task. `start` and `stop` are idempotent.
pub struct PeriodicTimer {
  tick: Duration,
  running: Mutex<Option<Running>>,
}

impl PeriodicTimer {
  pub fn new(tick: Duration) -> Self {
    Self {
      tick,
      running: Mutex::new(None),
    }
  }

  /// Spawn the loop. Returns `false` if it is already running.
  ///
  /// The first tick fires immediately. Must be called from a tokio runtime.
  pub fn start<F, Fut>(&self, callback: F) -> bool
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
    if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
      return false;
    }

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let tick = self.tick;
    let handle = tokio::spawn(async move {
      let mut interval = tokio::time::interval(tick);
      interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
      loop {
        tokio::select! {
          biased;
          _ = token.cancelled() => break,
          _ = interval.tick() => callback().await,
        }
      }
      debug!("periodic timer stopped");
    });

    *running = Some(Running { cancel, handle });
    true
  }

  /// Stop the loop. Returns `false` if it was not running.
  pub fn stop(&self) -> bool {
    let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
    match running.take() {
      Some(r) => {
        r.cancel.cancel();
        true
      }
      None => false,
    }
  }

  pub fn is_running(&self) -> bool {
    self
      .running
      .lock()
      .map(|r| r.as_ref().is_some_and(|r| !r.handle.is_finished()))
      .unwrap_or(false)
  }
}

impl Drop for PeriodicTimer {
  fn drop(&mut self) {
    self.stop();
  }
}
