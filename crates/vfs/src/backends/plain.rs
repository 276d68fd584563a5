//! The default filesystem-backed variant.
//!
//! Owns the full coordinator machinery: the file entity cache, the
//! unsatisfied/ready request buckets, the three work queues and the state
//! pump that advances exactly one attribute fetch at a time. Listing and
//! fetching run on spawned tasks and report back through the scheduler
//! loop, so observers only ever hear about state from idle ticks.

use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::attributes::AttrMask;
use crate::directory::{Directory, DirectoryBackend};
use crate::error::{LoadError, RequestError};
use crate::events::DirectoryEvent;
use crate::fetch::AttributeFetcher;
use crate::file::{File, FileInfo};
use crate::file_map::FileMap;
use crate::monitor::{ClientId, Monitor};
use crate::queue::WorkQueues;
use crate::registry::Registry;
use crate::request::{CallbackId, ReadyCallback, RequestBook};
use crate::scheduler::Scheduler;

#[derive(Default)]
struct PlainState {
  files: FileMap,
  requests: RequestBook,
  queues: WorkQueues,
  /// The backend delivered a complete listing.
  loaded: bool,
  /// ...and done-loading went out for it; full-list requests wait on both.
  loaded_sent: bool,
  listing: Option<CancellationToken>,
  fetch_in_flight: bool,
  drain_scheduled: bool,
}

struct PlainInner {
  dir: Weak<Directory>,
  fetcher: Arc<dyn AttributeFetcher>,
  scheduler: Scheduler,
  cancel: CancellationToken,
  list_batch_size: usize,
  state: Mutex<PlainState>,
}

pub struct PlainBackend {
  inner: Arc<PlainInner>,
}

impl PlainBackend {
  pub fn new(dir: &Arc<Directory>, registry: &Registry) -> Self {
    Self {
      inner: Arc::new(PlainInner {
        dir: Arc::downgrade(dir),
        fetcher: registry.fetcher(),
        scheduler: dir.scheduler().clone(),
        cancel: dir.cancel_token().clone(),
        list_batch_size: registry.config().cache.list_batch_size,
        state: Mutex::new(PlainState::default()),
      }),
    }
  }
}

impl PlainInner {
  fn state(&self) -> MutexGuard<'_, PlainState> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// The pump: called after every mutation. Starts or cancels the listing,
  /// promotes satisfied requests, and keeps at most one attribute fetch in
  /// flight.
  fn state_changed(self: &Arc<Self>) {
    let Some(dir) = self.dir.upgrade() else { return };

    let mut start_listing = None;
    let mut start_fetch = None;
    let mut schedule_drain = false;
    {
      let monitors_mask = dir.with_monitors(|m| m.wanted_attrs());
      let has_monitors = dir.with_monitors(|m| !m.is_empty());

      let mut state = self.state();
      let wants_list = has_monitors || state.requests.has_file_list_request();

      if wants_list && !state.loaded && state.listing.is_none() {
        let token = self.cancel.child_token();
        state.listing = Some(token.clone());
        start_listing = Some(token);
      } else if !wants_list && !state.loaded {
        if let Some(token) = state.listing.take() {
          token.cancel();
        }
      }

      let fully_loaded = state.loaded && state.loaded_sent;
      let PlainState {
        files,
        requests,
        queues,
        fetch_in_flight,
        drain_scheduled,
        ..
      } = &mut *state;

      if requests.promote(|cb| request_satisfied(files, fully_loaded, cb)) && !*drain_scheduled {
        *drain_scheduled = true;
        schedule_drain = true;
      }

      if !*fetch_in_flight {
        let next = queues.next_fetch(|file| requests.wanted_for(file.id()) | monitors_mask);
        if let Some((file, class, _tier)) = next {
          *fetch_in_flight = true;
          start_fetch = Some((file, class));
        }
      }
    }

    if let Some(token) = start_listing {
      self.spawn_listing(&dir, token);
    }
    if let Some((file, class)) = start_fetch {
      self.spawn_fetch(&dir, file, class);
    }
    if schedule_drain {
      let inner = Arc::clone(self);
      let dir = Arc::clone(&dir);
      self.scheduler.post(move || inner.drain_ready(&dir));
    }
  }

  fn spawn_listing(self: &Arc<Self>, dir: &Arc<Directory>, token: CancellationToken) {
    let inner = Arc::clone(self);
    let dir = Arc::clone(dir);
    let location = dir.location().clone();
    debug!(%location, "starting directory listing");

    tokio::spawn(async move {
      let result = tokio::select! {
        biased;
        _ = token.cancelled() => return,
        result = inner.fetcher.list(&location) => result,
      };

      let applier = Arc::clone(&inner);
      inner.scheduler.post(move || {
        if token.is_cancelled() {
          return;
        }
        applier.apply_listing(&dir, result);
      });
    });
  }

  fn apply_listing(self: &Arc<Self>, dir: &Arc<Directory>, result: Result<Vec<FileInfo>, LoadError>) {
    let infos = match result {
      Ok(infos) => infos,
      Err(error) => {
        warn!(location = %dir.location(), %error, "directory listing failed");
        self.state().listing = None;
        dir.emit(DirectoryEvent::LoadError(error));
        return;
      }
    };

    let mut added = Vec::new();
    let mut changed = Vec::new();
    {
      let mut state = self.state();
      let listed: std::collections::HashSet<&str> = infos.iter().map(|i| i.name.as_str()).collect();

      // A completed listing is authoritative: anything it does not mention
      // is gone, provisional entities included.
      for file in state.files.list() {
        if !listed.contains(file.name().as_str()) {
          file.mark_gone();
          state.files.remove(&file);
          state.queues.remove(file.id());
          changed.push(file);
        }
      }

      for info in infos {
        if let Some(file) = state.files.find_by_name(&info.name) {
          file.update_info(info);
          changed.push(file.clone());
          state.queues.enqueue(file);
        } else {
          let file = File::new(dir, info.name.clone(), false);
          file.update_info(info);
          state.files.add(Arc::clone(&file));
          state.queues.enqueue(Arc::clone(&file));
          added.push(file);
        }
      }

      state.loaded = true;
      state.listing = None;
    }

    for batch in added.chunks(self.list_batch_size.max(1)) {
      dir.emit(DirectoryEvent::FilesAdded(batch.to_vec()));
    }
    if !changed.is_empty() {
      for file in &changed {
        file.notify_changed();
      }
      dir.emit(DirectoryEvent::FilesChanged(changed));
    }
    dir.emit(DirectoryEvent::DoneLoading);
    self.state().loaded_sent = true;

    debug!(location = %dir.location(), files = added.len(), "listing applied");
    self.state_changed();
  }

  fn spawn_fetch(self: &Arc<Self>, dir: &Arc<Directory>, file: Arc<File>, class: AttrMask) {
    let inner = Arc::clone(self);
    let dir = Arc::clone(dir);
    let location = file.location();

    // Existence probes against remote locations are answered "does not
    // exist" from the next idle tick instead of stalling on a slow stat.
    if !location.is_native() && class == AttrMask::INFO {
      self.scheduler.post(move || {
        file.mark_gone();
        file.mark_failed(class);
        inner.state().fetch_in_flight = false;
        inner.state_changed();
      });
      return;
    }

    let token = self.cancel.child_token();
    tokio::spawn(async move {
      let result = tokio::select! {
        biased;
        _ = token.cancelled() => return,
        result = inner.fetcher.fetch(&location, class) => result,
      };

      let applier = Arc::clone(&inner);
      inner.scheduler.post(move || applier.apply_fetch(&dir, file, class, result));
    });
  }

  fn apply_fetch(
    self: &Arc<Self>,
    dir: &Arc<Directory>,
    file: Arc<File>,
    class: AttrMask,
    result: Result<crate::fetch::AttrPayload, LoadError>,
  ) {
    let ok = result.is_ok();
    match result {
      Ok(payload) => file.apply(payload),
      Err(error) => {
        trace!(file = %file.name(), ?class, %error, "attribute fetch failed");
        file.mark_failed(class);
      }
    }

    {
      let mut state = self.state();
      state.fetch_in_flight = false;
      // Re-enter the queues for the remaining classes; a file with nothing
      // missing falls straight out again. Gone files stay out for good.
      if !file.is_gone() {
        state.queues.enqueue(Arc::clone(&file));
      }
    }

    if ok {
      file.notify_changed();
      dir.emit(DirectoryEvent::FilesChanged(vec![Arc::clone(&file)]));
    }
    self.state_changed();
  }

  /// Fire everything in the ready bucket. Runs on the idle loop; callbacks
  /// see a consistent snapshot and never our locks.
  fn drain_ready(self: &Arc<Self>, dir: &Arc<Directory>) {
    let callbacks = {
      let mut state = self.state();
      state.drain_scheduled = false;
      state.requests.take_ready()
    };
    if callbacks.is_empty() {
      return;
    }

    for callback in callbacks {
      let files = if let Some(target) = &callback.target {
        vec![Arc::clone(target)]
      } else if callback.wants_file_list() {
        self.state().files.list()
      } else {
        Vec::new()
      };
      callback.fire(dir, files);
    }

    self.state_changed();
  }
}

fn request_satisfied(files: &FileMap, fully_loaded: bool, callback: &ReadyCallback) -> bool {
  if callback.wants_file_list() && !fully_loaded {
    return false;
  }
  let mask = callback.request.fetchable();
  match &callback.target {
    Some(file) => file.is_gone() || file.is_ready(mask),
    None => files.iter().all(|f| f.is_gone() || f.is_ready(mask)),
  }
}

impl DirectoryBackend for PlainBackend {
  fn as_any(&self) -> &dyn Any {
    self
  }

  fn contains_file(&self, _dir: &Arc<Directory>, file: &Arc<File>) -> bool {
    self.inner.state().files.contains(file.id())
  }

  fn are_all_files_seen(&self, _dir: &Arc<Directory>) -> bool {
    self.inner.state().loaded
  }

  fn is_not_empty(&self, _dir: &Arc<Directory>) -> bool {
    !self.inner.state().files.is_empty()
  }

  fn is_editable(&self, _dir: &Arc<Directory>) -> bool {
    true
  }

  fn call_when_ready(&self, _dir: &Arc<Directory>, callback: ReadyCallback) -> Result<(), RequestError> {
    {
      let mut state = self.inner.state();
      let target = callback.target.clone();
      state.requests.insert(callback)?;
      match target {
        Some(file) => state.queues.enqueue(file),
        None => {
          for file in state.files.list() {
            state.queues.enqueue(file);
          }
        }
      }
    }
    self.inner.state_changed();
    Ok(())
  }

  fn cancel_callback(&self, _dir: &Arc<Directory>, id: CallbackId) {
    self.inner.state().requests.cancel(id);
    self.inner.state_changed();
  }

  fn on_monitor_added(&self, _dir: &Arc<Directory>, _client: ClientId) {
    {
      let mut state = self.inner.state();
      for file in state.files.list() {
        state.queues.enqueue(file);
      }
    }
    self.inner.state_changed();
  }

  fn on_monitor_removed(&self, _dir: &Arc<Directory>, _monitor: Monitor) {
    self.inner.state_changed();
  }

  fn get_file_list(&self, _dir: &Arc<Directory>) -> Vec<Arc<File>> {
    self.inner.state().files.list()
  }

  fn find_file_by_name(&self, _dir: &Arc<Directory>, name: &str) -> Option<Arc<File>> {
    self.inner.state().files.find_by_name(name)
  }

  fn ensure_file(&self, dir: &Arc<Directory>, name: &str) -> Arc<File> {
    let mut state = self.inner.state();
    if let Some(existing) = state.files.find_by_name(name) {
      return existing;
    }
    let file = File::new(dir, name, false);
    state.files.add(Arc::clone(&file));
    file
  }

  fn force_reload(&self, _dir: &Arc<Directory>) {
    {
      let mut state = self.inner.state();
      state.loaded = false;
      state.loaded_sent = false;
      if let Some(token) = state.listing.take() {
        token.cancel();
      }
      for file in state.files.list() {
        file.invalidate_attributes();
        state.queues.enqueue(file);
      }
    }
    self.inner.state_changed();
  }

  fn has_pending_requests(&self) -> bool {
    !self.inner.state().requests.is_empty()
  }
}
