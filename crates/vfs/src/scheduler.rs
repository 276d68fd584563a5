//! The cooperative idle loop.
//!
//! Everything observer-visible in the cache runs here: ready-callback
//! drains, search hit merges, deferred existence probes. The loop executes
//! exactly one posted closure per iteration and yields between iterations,
//! so no single burst of work can stall the runtime, and a callback posted
//! during registration always runs after the registering call returns.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

type Task = Box<dyn FnOnce() + Send>;

/// Handle to the idle loop. Cheap to clone.
#[derive(Clone)]
pub struct Scheduler {
  tx: mpsc::UnboundedSender<Task>,
}

impl Scheduler {
  /// Spawn the loop task; it runs until the token is cancelled.
  pub fn spawn(cancel: CancellationToken) -> Self {
    let (tx, mut rx) = mpsc::unbounded_channel::<Task>();

    tokio::spawn(async move {
      loop {
        tokio::select! {
          biased;

          _ = cancel.cancelled() => {
            debug!("scheduler loop shutting down");
            break;
          }

          task = rx.recv() => {
            let Some(task) = task else { break };
            task();
            tokio::task::yield_now().await;
          }
        }
      }
    });

    Self { tx }
  }

  /// Queue a closure for one future idle iteration.
  ///
  /// Never runs synchronously; posting from inside a scheduled task is fine
  /// and keeps FIFO order.
  pub fn post(&self, task: impl FnOnce() + Send + 'static) {
    // A send error means the loop is shutting down; late work is dropped by
    // design, teardown guards re-check state anyway.
    let _ = self.tx.send(Box::new(task));
  }
}

impl std::fmt::Debug for Scheduler {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Scheduler").finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;
  use std::time::Duration;

  #[tokio::test]
  async fn test_posted_tasks_run_in_order() {
    let scheduler = Scheduler::spawn(CancellationToken::new());
    let (tx, mut rx) = mpsc::unbounded_channel();

    for i in 0..3 {
      let tx = tx.clone();
      scheduler.post(move || {
        let _ = tx.send(i);
      });
    }

    for expected in 0..3 {
      let got = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
      assert_eq!(got, Some(expected));
    }
  }

  #[tokio::test]
  async fn test_post_never_runs_synchronously() {
    let scheduler = Scheduler::spawn(CancellationToken::new());
    let ran = Arc::new(AtomicUsize::new(0));
    let ran_clone = Arc::clone(&ran);
    scheduler.post(move || {
      ran_clone.fetch_add(1, Ordering::SeqCst);
    });
    // Still zero in the registering "stack frame".
    assert_eq!(ran.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(ran.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_cancelled_loop_drops_tasks() {
    let cancel = CancellationToken::new();
    let scheduler = Scheduler::spawn(cancel.clone());
    cancel.cancel();
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Posting after shutdown is a silent no-op.
    scheduler.post(|| panic!("must not run"));
    tokio::time::sleep(Duration::from_millis(50)).await;
  }
}
