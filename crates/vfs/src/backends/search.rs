//! The search directory: drives a query engine and merges its asynchronous
//! hit batches into a file set, one hit per idle tick.
//!
//! The load cycle runs `Idle → Running → (hits arriving)* → Finishing →
//! ready-and-valid`. "Ready and valid" is distinct from merely "not
//! loading": it means the file set reflects the *current* query, so new
//! observers waiting for the full list are parked until it holds and a
//! superseded run's teardown is never misreported as completion.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use manila_core::Location;
use manila_search::{FinishStatus, Query, SearchEngine, SearchEvent, SearchHit};
use tracing::{debug, trace};

use crate::directory::{Directory, DirectoryBackend};
use crate::error::{LoadError, RequestError};
use crate::events::DirectoryEvent;
use crate::file::{File, FileId};
use crate::monitor::{ClientId, Monitor};
use crate::registry::Registry;
use crate::request::{CallbackId, ReadyCallback};
use crate::scheduler::Scheduler;

/// One outstanding per-file attribute wait belonging to a search callback.
struct SubWait {
  sub: CallbackId,
  directory: Weak<Directory>,
  file: FileId,
}

/// A `call_when_ready` registration against the search directory.
///
/// Gated behind ready-and-valid when it waits for the full list; once
/// activated it snapshots the file set and waits for each file's requested
/// attributes through that file's own directory.
struct SearchCallback {
  id: CallbackId,
  callback: Option<ReadyCallback>,
  file_list: Vec<Arc<File>>,
  subs: Vec<SubWait>,
}

#[derive(Default)]
struct SearchState {
  query: Option<Query>,
  running: bool,
  ready_and_valid: bool,
  hits_queue: VecDeque<SearchHit>,
  drain_scheduled: bool,
  /// The engine finished while hits were still draining; doneness is owed
  /// once the queue empties.
  emit_done_deferred: bool,
  files: Vec<Arc<File>>,
  by_location: HashMap<Location, Arc<File>>,
  /// Result files link to their owning directories weakly; holding the
  /// owners here keeps those directories, and the entities' identity,
  /// alive for as long as the results are shown.
  owners: HashMap<Location, Arc<Directory>>,
  /// Bumped on every file-list reset; in-flight hit merges compare against
  /// it and drop stale work.
  generation: u64,
  callbacks: Vec<SearchCallback>,
  pending: Vec<SearchCallback>,
}

struct SearchInner {
  dir: Weak<Directory>,
  registry: Registry,
  engine: Box<dyn SearchEngine>,
  scheduler: Scheduler,
  state: Mutex<SearchState>,
}

pub struct SearchBackend {
  inner: Arc<SearchInner>,
}

impl SearchBackend {
  pub fn new(dir: &Arc<Directory>, registry: &Registry) -> Self {
    let (engine, events) = registry.new_engine();
    let inner = Arc::new(SearchInner {
      dir: Arc::downgrade(dir),
      registry: registry.clone(),
      engine,
      scheduler: dir.scheduler().clone(),
      state: Mutex::new(SearchState::default()),
    });

    inner.spawn_engine_driver(events, dir);
    Self { inner }
  }

  /// Replace the query this directory answers. Takes effect on the next
  /// search cycle (monitor addition, pending callback, or force reload).
  pub fn set_query(&self, query: Query) {
    self.inner.state().query = Some(query);
    if let Some(dir) = self.inner.dir.upgrade()
      && let Some(file) = dir.existing_corresponding_file()
    {
      file.notify_changed();
    }
  }

  pub fn query(&self) -> Option<Query> {
    self.inner.state().query.clone()
  }
}

impl SearchInner {
  fn state(&self) -> MutexGuard<'_, SearchState> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  // --- engine event handling ---

  fn spawn_engine_driver(self: &Arc<Self>, mut events: manila_search::engine::EventReceiver, dir: &Arc<Directory>) {
    let inner = Arc::clone(self);
    let cancel = dir.cancel_token().clone();

    tokio::spawn(async move {
      loop {
        let event = tokio::select! {
          biased;
          _ = cancel.cancelled() => break,
          event = events.recv() => match event {
            Some(event) => event,
            None => break,
          },
        };

        match event {
          SearchEvent::HitsAdded(hits) => inner.on_hits_added(hits),
          SearchEvent::Finished(status) => inner.on_finished(status),
          SearchEvent::Error(message) => inner.on_engine_error(message),
        }
      }
    });
  }

  fn on_hits_added(self: &Arc<Self>, hits: Vec<SearchHit>) {
    let schedule = {
      let mut state = self.state();
      if !state.running {
        return;
      }
      trace!(count = hits.len(), "queueing hit batch");
      state.hits_queue.extend(hits);
      !std::mem::replace(&mut state.drain_scheduled, true)
    };
    if schedule {
      self.schedule_hit_drain();
    }
  }

  fn on_finished(self: &Arc<Self>, status: FinishStatus) {
    match status {
      FinishStatus::Normal => {
        let finish_now = {
          let mut state = self.state();
          if !state.running {
            return;
          }
          if state.hits_queue.is_empty() && !state.drain_scheduled {
            true
          } else {
            state.emit_done_deferred = true;
            false
          }
        };
        if finish_now {
          self.become_ready_and_valid();
        }
      }
      // An old, superseded run wound down: silently drop its leftovers.
      // Reporting "done" here would misattribute completion to the new
      // query.
      FinishStatus::Restarting => {
        debug!("superseded search finished; discarding stale results");
        self.reset_hits_queue();
        self.reset_file_list();
      }
    }
  }

  fn on_engine_error(self: &Arc<Self>, message: String) {
    self.reset_hits_queue();
    if let Some(dir) = self.dir.upgrade() {
      dir.emit(DirectoryEvent::LoadError(LoadError::new(message)));
    }
  }

  // --- the hit pipeline ---

  fn schedule_hit_drain(self: &Arc<Self>) {
    let inner = Arc::clone(self);
    self.scheduler.post(move || inner.drain_one_hit());
  }

  /// Merge exactly one queued hit, then yield. Bounds per-tick cost no
  /// matter how large the engine's batches are, which is what lets results
  /// appear progressively.
  fn drain_one_hit(self: &Arc<Self>) {
    let Some(dir) = self.dir.upgrade() else { return };

    let (hit, query, generation, merged) = {
      let mut state = self.state();
      match state.hits_queue.pop_front() {
        Some(hit) => {
          let Some(query) = state.query.clone() else {
            state.drain_scheduled = false;
            return;
          };
          let merged = state.by_location.get(hit.location()).cloned();
          (hit, query, state.generation, merged)
        }
        None => {
          state.drain_scheduled = false;
          let owe_done = std::mem::replace(&mut state.emit_done_deferred, false);
          drop(state);
          if owe_done {
            self.become_ready_and_valid();
          }
          return;
        }
      }
    };

    let mut hit = hit;
    hit.compute_scores(&query);

    if let Some(file) = merged {
      // Duplicate URI: refreshed relevance/snippet on the merged entity,
      // not a second entry.
      file.set_search_result(hit.relevance(), hit.snippet().map(str::to_string));
      dir.emit(DirectoryEvent::FilesChanged(vec![file]));
    } else {
      // Resolve the hit outside the lock: the lookup may construct the
      // owning directory.
      let (file, owner) = self.registry.get_file_with_owner(hit.location());
      file.set_search_result(hit.relevance(), hit.snippet().map(str::to_string));

      let clients = {
        let mut state = self.state();
        if state.generation != generation {
          // The list was reset while we were merging; this hit belongs to
          // a dead run.
          state.drain_scheduled = false;
          return;
        }
        state.by_location.insert(hit.location().clone(), Arc::clone(&file));
        state.owners.insert(owner.location().clone(), owner);
        state.files.push(Arc::clone(&file));
        dir.with_monitors(|m| m.clients())
      };

      for client in clients {
        file.add_watch(client, &dir);
      }
      dir.emit(DirectoryEvent::FilesAdded(vec![file]));
    }

    if let Some(self_file) = dir.existing_corresponding_file() {
      self_file.notify_changed();
    }

    self.schedule_hit_drain();
  }

  /// The file set now reflects the current query: release parked
  /// callbacks, then announce doneness.
  fn become_ready_and_valid(self: &Arc<Self>) {
    let Some(dir) = self.dir.upgrade() else { return };
    let pending = {
      let mut state = self.state();
      state.ready_and_valid = true;
      std::mem::take(&mut state.pending)
    };
    for callback in pending {
      self.activate_callback(callback);
    }
    dir.emit(DirectoryEvent::DoneLoading);
  }

  // --- callback plumbing ---

  /// Snapshot the file set for a callback and wait for each file's
  /// requested attributes through its own directory.
  fn activate_callback(self: &Arc<Self>, mut entry: SearchCallback) {
    let Some(callback) = entry.callback.as_ref() else { return };
    let attrs = callback.request.fetchable();
    let id = entry.id;

    entry.file_list = self.state().files.clone();

    let mut subs = Vec::new();
    for file in &entry.file_list {
      if file.is_ready(attrs) || file.is_gone() {
        continue;
      }
      let Some(owner) = file.directory() else { continue };
      let sub = CallbackId::next();
      subs.push((sub, owner, Arc::clone(file)));
    }

    if subs.is_empty() {
      let inner = Arc::clone(self);
      self.state().callbacks.push(entry);
      self.scheduler.post(move || inner.fire_callback(id));
      return;
    }

    entry.subs = subs
      .iter()
      .map(|(sub, owner, file)| SubWait {
        sub: *sub,
        directory: Arc::downgrade(owner),
        file: file.id(),
      })
      .collect();
    self.state().callbacks.push(entry);

    for (sub, owner, file) in subs {
      let inner = Arc::clone(self);
      let file_id = file.id();
      let result = owner.call_when_ready(Some(file), attrs, false, sub, move |_, _| {
        inner.on_file_ready(id, file_id);
      });
      if result.is_err() {
        // The owner already had this sub id pending (cannot happen with
        // fresh ids); treat the file as ready rather than wedging.
        self.on_file_ready(id, file_id);
      }
    }
  }

  fn on_file_ready(self: &Arc<Self>, id: CallbackId, file: FileId) {
    let ready = {
      let mut state = self.state();
      let Some(entry) = state.callbacks.iter_mut().find(|cb| cb.id == id) else {
        return;
      };
      entry.subs.retain(|sub| sub.file != file);
      entry.subs.is_empty()
    };
    if ready {
      self.fire_callback(id);
    }
  }

  fn fire_callback(self: &Arc<Self>, id: CallbackId) {
    let Some(dir) = self.dir.upgrade() else { return };
    let entry = {
      let mut state = self.state();
      let index = state.callbacks.iter().position(|cb| cb.id == id);
      index.map(|i| state.callbacks.remove(i))
    };
    if let Some(mut entry) = entry
      && let Some(callback) = entry.callback.take()
    {
      callback.fire(&dir, entry.file_list);
    }

    let idle = {
      let state = self.state();
      state.callbacks.is_empty() && state.pending.is_empty()
    };
    if idle && self.dir.upgrade().is_some_and(|d| d.with_monitors(|m| m.is_empty())) {
      self.stop_search();
    }
  }

  // --- search lifecycle ---

  fn start_search(self: &Arc<Self>) {
    let Some(dir) = self.dir.upgrade() else { return };

    let query = {
      let state = self.state();
      let Some(query) = state.query.clone() else { return };
      query
    };

    // An empty query is immediately ready with zero results; the engine is
    // never consulted.
    if query.is_empty() {
      let was_valid = {
        let mut state = self.state();
        std::mem::replace(&mut state.ready_and_valid, true)
      };
      if !was_valid {
        let pending = std::mem::take(&mut self.state().pending);
        for callback in pending {
          self.activate_callback(callback);
        }
        dir.emit(DirectoryEvent::DoneLoading);
      }
      return;
    }

    {
      let mut state = self.state();
      if state.running {
        return;
      }
      // Never search speculatively: somebody must be listening.
      let has_listeners = dir.with_monitors(|m| !m.is_empty()) || !state.pending.is_empty();
      if !has_listeners {
        return;
      }
      state.running = true;
      state.ready_and_valid = false;
    }

    self.reset_hits_queue();
    self.reset_file_list();

    let mut query = query;
    query.set_show_hidden(dir.with_monitors(|m| m.any_include_hidden()));
    debug!(query = query.text(), "starting search");
    self.engine.set_query(query);
    self.engine.start();
  }

  fn stop_search(self: &Arc<Self>) {
    {
      let mut state = self.state();
      if !state.running {
        return;
      }
      state.running = false;
      state.emit_done_deferred = false;
    }
    debug!("stopping search");
    self.engine.stop();
    self.reset_hits_queue();
    self.reset_file_list();
  }

  fn reset_hits_queue(self: &Arc<Self>) {
    let mut state = self.state();
    state.hits_queue.clear();
    state.emit_done_deferred = false;
  }

  /// Drop the merged results and every watch installed on them.
  fn reset_file_list(self: &Arc<Self>) {
    let files = {
      let mut state = self.state();
      state.by_location.clear();
      state.owners.clear();
      state.generation += 1;
      std::mem::take(&mut state.files)
    };
    if files.is_empty() {
      return;
    }
    let clients = self
      .dir
      .upgrade()
      .map(|dir| dir.with_monitors(|m| m.clients()))
      .unwrap_or_default();
    for file in files {
      for client in &clients {
        file.remove_watch(*client);
      }
    }
  }
}

impl DirectoryBackend for SearchBackend {
  fn as_any(&self) -> &dyn Any {
    self
  }

  fn contains_file(&self, _dir: &Arc<Directory>, file: &Arc<File>) -> bool {
    self.inner.state().files.iter().any(|f| f.id() == file.id())
  }

  fn are_all_files_seen(&self, _dir: &Arc<Directory>) -> bool {
    let state = self.inner.state();
    state.query.is_none() || state.ready_and_valid
  }

  fn call_when_ready(&self, dir: &Arc<Directory>, callback: ReadyCallback) -> Result<(), RequestError> {
    if let Some(target) = callback.target.clone() {
      let dir = Arc::clone(dir);
      dir.scheduler().clone().post(move || callback.fire(&dir, vec![target]));
      return Ok(());
    }

    let parked = {
      let state = self.inner.state();
      if state.callbacks.iter().chain(state.pending.iter()).any(|cb| cb.id == callback.id) {
        return Err(RequestError::Duplicate(callback.id));
      }
      callback.wants_file_list() && !state.ready_and_valid
    };

    let entry = SearchCallback {
      id: callback.id,
      callback: Some(callback),
      file_list: Vec::new(),
      subs: Vec::new(),
    };

    if parked {
      // Parked until the current search's data is valid; a search may need
      // starting to ever get there.
      self.inner.state().pending.push(entry);
      self.inner.start_search();
    } else {
      self.inner.activate_callback(entry);
    }
    Ok(())
  }

  fn cancel_callback(&self, _dir: &Arc<Directory>, id: CallbackId) {
    let (entry, now_idle) = {
      let mut state = self.inner.state();
      let entry = if let Some(index) = state.callbacks.iter().position(|cb| cb.id == id) {
        Some(state.callbacks.remove(index))
      } else if let Some(index) = state.pending.iter().position(|cb| cb.id == id) {
        Some(state.pending.remove(index))
      } else {
        None
      };
      let idle = state.callbacks.is_empty() && state.pending.is_empty();
      (entry, idle)
    };

    let Some(entry) = entry else { return };
    for sub in &entry.subs {
      if let Some(owner) = sub.directory.upgrade() {
        owner.cancel_callback(sub.sub);
      }
    }

    if now_idle && self.inner.dir.upgrade().is_some_and(|d| d.with_monitors(|m| m.is_empty())) {
      self.inner.stop_search();
    }
  }

  fn on_monitor_added(&self, dir: &Arc<Directory>, client: ClientId) {
    let files = self.inner.state().files.clone();
    for file in &files {
      file.add_watch(client, dir);
    }
    self.inner.start_search();
  }

  fn on_monitor_removed(&self, dir: &Arc<Directory>, monitor: Monitor) {
    let files = self.inner.state().files.clone();
    for file in &files {
      file.remove_watch(monitor.client);
    }

    let idle = {
      let state = self.inner.state();
      state.callbacks.is_empty() && state.pending.is_empty()
    };
    if idle && dir.with_monitors(|m| m.is_empty()) {
      self.inner.stop_search();
    }
  }

  fn get_file_list(&self, _dir: &Arc<Directory>) -> Vec<Arc<File>> {
    self.inner.state().files.clone()
  }

  fn force_reload(&self, dir: &Arc<Directory>) {
    if self.inner.state().query.is_none() {
      return;
    }

    self.inner.state().ready_and_valid = false;
    self.inner.reset_hits_queue();
    self.inner.reset_file_list();
    self.inner.stop_search();

    if let Some(file) = dir.existing_corresponding_file() {
      file.invalidate_attributes();
    }
    self.inner.start_search();
  }

  fn has_pending_requests(&self) -> bool {
    let state = self.inner.state();
    !state.callbacks.is_empty() || !state.pending.is_empty()
  }
}
