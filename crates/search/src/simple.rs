//! A simple search engine that walks the query anchor matching file names.
//!
//! This is the fallback engine: no index, no content search, just a
//! cancellable recursive walk batching hits back to the directory. A newer
//! query supersedes a running walk; the superseded run is announced with
//! [`FinishStatus::Restarting`] before any hit of the new run is delivered,
//! so the consumer can drop stale state without mistaking it for completion.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use manila_core::config::SearchConfig;
use manila_core::Location;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::engine::{EventReceiver, EventSender, FinishStatus, SearchEngine, SearchEvent};
use crate::hit::SearchHit;
use crate::query::Query;

struct EngineState {
  query: Option<Query>,
  generation: u64,
  walk_cancel: Option<CancellationToken>,
}

/// Filename-matching walk engine.
pub struct SimpleEngine {
  config: SearchConfig,
  state: Arc<Mutex<EngineState>>,
  events: EventSender,
}

impl SimpleEngine {
  /// Create an engine and the event stream its directory consumes.
  pub fn new(config: SearchConfig) -> (Self, EventReceiver) {
    let (events, rx) = tokio::sync::mpsc::unbounded_channel();
    let engine = Self {
      config,
      state: Arc::new(Mutex::new(EngineState {
        query: None,
        generation: 0,
        walk_cancel: None,
      })),
      events,
    };
    (engine, rx)
  }
}

impl SearchEngine for SimpleEngine {
  fn set_query(&self, query: Query) {
    self.state.lock().unwrap_or_else(|e| e.into_inner()).query = Some(query);
  }

  fn start(&self) {
    let (walk, generation) = {
      let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

      let Some(query) = state.query.clone() else {
        warn!("simple engine started without a query");
        return;
      };

      // Supersede any in-flight walk. Announcing the restart before the new
      // walk spawns keeps the event channel ordered: stale teardown first,
      // fresh hits after.
      if let Some(old) = state.walk_cancel.take() {
        old.cancel();
        let _ = self.events.send(SearchEvent::Finished(FinishStatus::Restarting));
      }

      state.generation += 1;
      let cancel = CancellationToken::new();
      state.walk_cancel = Some(cancel.clone());

      let walk = Walk {
        query,
        config: self.config.clone(),
        cancel,
        generation: state.generation,
        state: Arc::clone(&self.state),
        events: self.events.clone(),
      };
      (walk, state.generation)
    };

    debug!(generation, "starting filename walk");
    tokio::spawn(walk.run());
  }

  fn stop(&self) {
    let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(cancel) = state.walk_cancel.take() {
      cancel.cancel();
    }
  }
}

struct Walk {
  query: Query,
  config: SearchConfig,
  cancel: CancellationToken,
  generation: u64,
  state: Arc<Mutex<EngineState>>,
  events: EventSender,
}

impl Walk {
  async fn run(self) {
    let Some(root) = self.query.location().to_path() else {
      let _ = self.events.send(SearchEvent::Error(format!(
        "cannot walk non-native location {}",
        self.query.location()
      )));
      self.clear_token();
      return;
    };

    let terms = self.query.terms();
    let mut batch: Vec<SearchHit> = Vec::new();
    let mut stack: Vec<(PathBuf, usize)> = vec![(root, 0)];
    let mut scanned = 0usize;

    while let Some((dir, depth)) = stack.pop() {
      if self.cancel.is_cancelled() {
        trace!(generation = self.generation, "walk cancelled");
        return;
      }

      let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(error) => {
          trace!(dir = %dir.display(), %error, "skipping unreadable directory");
          continue;
        }
      };

      while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') && !self.query.show_hidden() {
          continue;
        }
        scanned += 1;

        let file_type = entry.file_type().await.ok();
        if file_type.is_some_and(|t| t.is_dir()) && depth + 1 <= self.config.max_depth {
          stack.push((entry.path(), depth + 1));
        }

        let lowered = name.to_lowercase();
        if !terms.iter().all(|term| lowered.contains(term.as_str())) {
          continue;
        }

        let (modified, accessed) = match entry.metadata().await {
          Ok(meta) => (
            meta.modified().ok().map(to_datetime),
            meta.accessed().ok().map(to_datetime),
          ),
          Err(_) => (None, None),
        };

        batch.push(SearchHit::new(Location::from_path(&entry.path())).with_times(modified, accessed));
        if batch.len() >= self.config.batch_size {
          if self.cancel.is_cancelled() {
            return;
          }
          let _ = self.events.send(SearchEvent::HitsAdded(std::mem::take(&mut batch)));
        }
      }

      tokio::task::yield_now().await;
    }

    if self.cancel.is_cancelled() {
      return;
    }

    if !batch.is_empty() {
      let _ = self.events.send(SearchEvent::HitsAdded(batch));
    }

    debug!(generation = self.generation, scanned, "walk finished");
    self.clear_token();
    let _ = self.events.send(SearchEvent::Finished(FinishStatus::Normal));
  }

  /// Forget our cancellation token so a later `start` does not announce a
  /// restart for a walk that already completed.
  fn clear_token(&self) {
    let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
    if state.generation == self.generation {
      state.walk_cancel = None;
    }
  }
}

fn to_datetime(time: SystemTime) -> DateTime<Utc> {
  time.into()
}
