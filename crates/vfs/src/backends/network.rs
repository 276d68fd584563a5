//! The composite network view: remote mounts from the computer backend
//! unioned with the raw network-places backend.
//!
//! Readiness fans in: a ready callback fires only once *both* backends
//! reported ready, tracked by a small two-boolean join per request. The join
//! flags are only ever flipped under the state lock, which makes the
//! synchronization explicit instead of relying on single-threaded timing.

use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use manila_core::{scheme, Location};
use tracing::warn;

use crate::attributes::AttrMask;
use crate::directory::{Directory, DirectoryBackend};
use crate::error::RequestError;
use crate::events::DirectoryEvent;
use crate::file::File;
use crate::monitor::{ClientId, Monitor};
use crate::registry::Registry;
use crate::request::{CallbackId, ReadyCallback};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Backend {
  Computer,
  Places,
}

struct NetworkCallback {
  id: CallbackId,
  callback: Option<ReadyCallback>,
  computer_sub: CallbackId,
  places_sub: CallbackId,
  computer_ready: bool,
  places_ready: bool,
}

#[derive(Default)]
struct NetworkState {
  computer_done: bool,
  places_done: bool,
  callbacks: Vec<NetworkCallback>,
}

struct NetworkInner {
  dir: Weak<Directory>,
  computer: Arc<Directory>,
  places: Arc<Directory>,
  forward_computer: ClientId,
  forward_places: ClientId,
  state: Mutex<NetworkState>,
}

pub struct NetworkBackend {
  inner: Arc<NetworkInner>,
}

/// Mountables without a dedicated "remote" attribute are classified by
/// icon name, the same heuristic the mounts themselves advertise.
fn is_remote_mountable(file: &Arc<File>) -> bool {
  file
    .info()
    .map(|info| {
      info
        .icon_names
        .iter()
        .any(|name| name.contains("network") || name.contains("remote"))
    })
    .unwrap_or(false)
}

fn remote_mountables(files: Vec<Arc<File>>) -> Vec<Arc<File>> {
  files.into_iter().filter(is_remote_mountable).collect()
}

impl NetworkBackend {
  pub fn new(dir: &Arc<Directory>, registry: &Registry) -> Self {
    let computer = registry
      .get(&Location::new(format!("{}:///", scheme::COMPUTER)), true)
      .unwrap_or_else(|| unreachable!("get with create always returns a directory"));
    let places = registry
      .get(&Location::new(format!("{}:///", scheme::NETWORK_PLACES)), true)
      .unwrap_or_else(|| unreachable!("get with create always returns a directory"));

    let forward_computer = ClientId::next();
    let forward_places = ClientId::next();

    let inner = Arc::new(NetworkInner {
      dir: Arc::downgrade(dir),
      computer: Arc::clone(&computer),
      places: Arc::clone(&places),
      forward_computer,
      forward_places,
      state: Mutex::new(NetworkState::default()),
    });

    inner.spawn_forwarder(&computer, forward_computer, Backend::Computer, dir);
    inner.spawn_forwarder(&places, forward_places, Backend::Places, dir);

    Self { inner }
  }
}

impl NetworkInner {
  fn state(&self) -> MutexGuard<'_, NetworkState> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Subscribe to one backend and re-emit its events on the network view,
  /// filtering the computer side down to remote mountables.
  fn spawn_forwarder(self: &Arc<Self>, backend: &Arc<Directory>, client: ClientId, which: Backend, dir: &Arc<Directory>) {
    let mut stream = backend.file_monitor_add(client, true, AttrMask::INFO);
    let inner = Arc::clone(self);
    let cancel = dir.cancel_token().clone();

    tokio::spawn(async move {
      loop {
        let event = tokio::select! {
          biased;
          _ = cancel.cancelled() => break,
          event = stream.recv() => match event {
            Some(event) => event,
            None => break,
          },
        };

        let Some(dir) = inner.dir.upgrade() else { break };
        match event {
          DirectoryEvent::FilesAdded(files) => {
            let files = match which {
              Backend::Computer => remote_mountables(files),
              Backend::Places => files,
            };
            if !files.is_empty() {
              dir.emit(DirectoryEvent::FilesAdded(files));
            }
          }
          DirectoryEvent::FilesChanged(files) => {
            let files = match which {
              Backend::Computer => remote_mountables(files),
              Backend::Places => files,
            };
            if !files.is_empty() {
              dir.emit(DirectoryEvent::FilesChanged(files));
            }
          }
          DirectoryEvent::DoneLoading => {
            let both_done = {
              let mut state = inner.state();
              match which {
                Backend::Computer => state.computer_done = true,
                Backend::Places => state.places_done = true,
              }
              state.computer_done && state.places_done
            };
            if both_done {
              dir.emit(DirectoryEvent::DoneLoading);
            }
          }
          // One side failing does not suppress the other side's files;
          // the error is propagated once per failure.
          DirectoryEvent::LoadError(error) => dir.emit(DirectoryEvent::LoadError(error)),
        }
      }
    });
  }

  fn on_backend_ready(self: &Arc<Self>, id: CallbackId, which: Backend) {
    let fired = {
      let mut state = self.state();
      let Some(index) = state.callbacks.iter().position(|cb| cb.id == id) else {
        return;
      };
      let entry = &mut state.callbacks[index];
      match which {
        Backend::Computer => entry.computer_ready = true,
        Backend::Places => entry.places_ready = true,
      }
      if entry.computer_ready && entry.places_ready {
        Some(state.callbacks.remove(index))
      } else {
        None
      }
    };

    if let Some(mut entry) = fired
      && let Some(callback) = entry.callback.take()
      && let Some(dir) = self.dir.upgrade()
    {
      let files = if callback.wants_file_list() {
        dir.get_file_list()
      } else {
        Vec::new()
      };
      callback.fire(&dir, files);
    }
  }

  /// Register the two-sided join: one sub-request per backend, each
  /// flipping its boolean when that backend is ready.
  fn register_join(self: &Arc<Self>, callback: ReadyCallback) {
    let id = callback.id;
    let attrs = callback.request.fetchable();
    let wait = callback.wants_file_list();
    let computer_sub = CallbackId::next();
    let places_sub = CallbackId::next();

    self.state().callbacks.push(NetworkCallback {
      id,
      callback: Some(callback),
      computer_sub,
      places_sub,
      computer_ready: false,
      places_ready: false,
    });

    for (backend, sub, which) in [
      (&self.computer, computer_sub, Backend::Computer),
      (&self.places, places_sub, Backend::Places),
    ] {
      let inner = Arc::clone(self);
      if let Err(error) = backend.call_when_ready(None, attrs, wait, sub, move |_, _| {
        inner.on_backend_ready(id, which);
      }) {
        warn!(%error, "network backend sub-request rejected");
      }
    }
  }
}

impl Drop for NetworkInner {
  fn drop(&mut self) {
    self.computer.file_monitor_remove(self.forward_computer);
    self.places.file_monitor_remove(self.forward_places);
  }
}

impl DirectoryBackend for NetworkBackend {
  fn as_any(&self) -> &dyn Any {
    self
  }

  fn contains_file(&self, dir: &Arc<Directory>, file: &Arc<File>) -> bool {
    if file.directory().is_some_and(|d| Arc::ptr_eq(&d, dir)) {
      return true;
    }
    if self.inner.places.contains_file(file) {
      return true;
    }
    self.inner.computer.contains_file(file) && is_remote_mountable(file)
  }

  fn are_all_files_seen(&self, _dir: &Arc<Directory>) -> bool {
    self.inner.computer.are_all_files_seen() && self.inner.places.are_all_files_seen()
  }

  fn is_not_empty(&self, _dir: &Arc<Directory>) -> bool {
    self.inner.places.is_not_empty()
      || !remote_mountables(self.inner.computer.get_file_list()).is_empty()
  }

  fn call_when_ready(&self, dir: &Arc<Directory>, callback: ReadyCallback) -> Result<(), RequestError> {
    if self.inner.state().callbacks.iter().any(|cb| cb.id == callback.id) {
      return Err(RequestError::Duplicate(callback.id));
    }

    // File-scoped requests have no fan-in: directly-owned entries are
    // always complete.
    if let Some(target) = callback.target.clone() {
      let dir = Arc::clone(dir);
      dir.scheduler().clone().post(move || callback.fire(&dir, vec![target]));
      return Ok(());
    }

    self.inner.register_join(callback);
    Ok(())
  }

  fn cancel_callback(&self, _dir: &Arc<Directory>, id: CallbackId) {
    let entry = {
      let mut state = self.inner.state();
      let index = state.callbacks.iter().position(|cb| cb.id == id);
      index.map(|i| state.callbacks.remove(i))
    };

    let Some(entry) = entry else { return };
    if !entry.computer_ready {
      self.inner.computer.cancel_callback(entry.computer_sub);
    }
    if !entry.places_ready {
      self.inner.places.cancel_callback(entry.places_sub);
    }
  }

  fn on_monitor_added(&self, dir: &Arc<Directory>, client: ClientId) {
    let (include_hidden, attrs) = dir.with_monitors(|m| {
      m.iter()
        .find(|monitor| monitor.client == client)
        .map(|monitor| (monitor.include_hidden, monitor.attrs))
        .unwrap_or((false, AttrMask::empty()))
    });

    // Pass the client through so both backends keep their lists alive for
    // it; events reach the client via the forwarders, so the pass-through
    // streams are dropped.
    let _ = self.inner.computer.file_monitor_add(client, include_hidden, attrs);
    let _ = self.inner.places.file_monitor_add(client, include_hidden, attrs);
  }

  fn on_monitor_removed(&self, _dir: &Arc<Directory>, monitor: Monitor) {
    self.inner.computer.file_monitor_remove(monitor.client);
    self.inner.places.file_monitor_remove(monitor.client);
  }

  fn get_file_list(&self, _dir: &Arc<Directory>) -> Vec<Arc<File>> {
    let mut files = remote_mountables(self.inner.computer.get_file_list());
    files.extend(self.inner.places.get_file_list());
    files
  }

  fn force_reload(&self, _dir: &Arc<Directory>) {
    {
      let mut state = self.inner.state();
      state.computer_done = false;
      state.places_done = false;
    }
    self.inner.computer.force_reload();
    self.inner.places.force_reload();
  }

  fn has_pending_requests(&self) -> bool {
    !self.inner.state().callbacks.is_empty()
  }
}
