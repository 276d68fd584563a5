//! The recent view: the recent-documents backing store plus a handful of
//! synthetic "recently used window" entries.
//!
//! Window entries are regenerated on every listing: window state changes
//! independently of the backing store, so caching them would serve stale
//! entries.

use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::{Duration, Utc};
use manila_core::{scheme, Location};
use tracing::warn;

use crate::attributes::AttrMask;
use crate::directory::{Directory, DirectoryBackend};
use crate::error::RequestError;
use crate::events::DirectoryEvent;
use crate::file::{File, FileInfo, FileType};
use crate::monitor::{ClientId, Monitor};
use crate::registry::Registry;
use crate::request::{CallbackId, ReadyCallback};

/// Live application window state, consumed as a capability.
pub trait WindowLister: Send + Sync {
  /// Locations currently shown in windows, most recently active first.
  fn active_locations(&self) -> Vec<Location>;
}

/// The default lister for processes with no window tracking.
pub struct NoWindows;

impl WindowLister for NoWindows {
  fn active_locations(&self) -> Vec<Location> {
    Vec::new()
  }
}

struct RecentCallback {
  id: CallbackId,
  callback: Option<ReadyCallback>,
  sub: CallbackId,
}

#[derive(Default)]
struct RecentState {
  window_files: Vec<Arc<File>>,
  callbacks: Vec<RecentCallback>,
}

struct RecentInner {
  dir: Weak<Directory>,
  backend: Arc<Directory>,
  windows: Arc<dyn WindowLister>,
  max_windows: usize,
  forward_client: ClientId,
  state: Mutex<RecentState>,
}

pub struct RecentBackend {
  inner: Arc<RecentInner>,
}

impl RecentBackend {
  pub fn new(dir: &Arc<Directory>, registry: &Registry) -> Self {
    let backend = registry
      .get(&Location::new(format!("{}:///", scheme::RECENT_FILES)), true)
      .unwrap_or_else(|| unreachable!("get with create always returns a directory"));

    let forward_client = ClientId::next();
    let inner = Arc::new(RecentInner {
      dir: Arc::downgrade(dir),
      backend: Arc::clone(&backend),
      windows: registry.windows(),
      max_windows: registry.config().recent.max_windows,
      forward_client,
      state: Mutex::new(RecentState::default()),
    });

    inner.spawn_forwarder(&backend, dir);

    Self { inner }
  }
}

impl RecentInner {
  fn state(&self) -> MutexGuard<'_, RecentState> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn spawn_forwarder(self: &Arc<Self>, backend: &Arc<Directory>, dir: &Arc<Directory>) {
    let mut stream = backend.file_monitor_add(self.forward_client, true, AttrMask::INFO);
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
        dir.emit(event);
      }
    });
  }

  /// Build this listing's window entries: newest first, internal schemes
  /// skipped, one entry per activation target, capped.
  fn regenerate_windows(&self, dir: &Arc<Directory>) -> Vec<Arc<File>> {
    let now = Utc::now();
    let mut files: Vec<Arc<File>> = Vec::new();

    for location in self.windows.active_locations() {
      if files.len() >= self.max_windows {
        break;
      }
      if scheme::is_internal(location.scheme()) {
        continue;
      }
      if files.iter().any(|f| f.activation_location() == location) {
        continue;
      }

      let name = uuid::Uuid::new_v4().to_string();
      let file = File::new(dir, name.clone(), false);
      let display_name = location
        .basename()
        .map(str::to_string)
        .unwrap_or_else(|| location.to_string());
      file.update_info(FileInfo {
        name,
        display_name: Some(display_name),
        file_type: FileType::Shortcut,
        is_virtual: true,
        icon_names: vec!["folder".into(), "folder-symbolic".into()],
        target_uri: Some(location.as_uri().to_string()),
        // Ordered timestamps keep recency sorting stable across entries
        // generated in the same instant.
        modified: Some(now - Duration::seconds(files.len() as i64)),
        ..FileInfo::default()
      });
      files.push(file);
    }

    self.state().window_files = files.clone();
    files
  }

  fn on_backend_ready(self: &Arc<Self>, id: CallbackId) {
    let entry = {
      let mut state = self.state();
      let index = state.callbacks.iter().position(|cb| cb.id == id);
      index.map(|i| state.callbacks.remove(i))
    };

    if let Some(mut entry) = entry
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
}

impl Drop for RecentInner {
  fn drop(&mut self) {
    self.backend.file_monitor_remove(self.forward_client);
  }
}

impl DirectoryBackend for RecentBackend {
  fn as_any(&self) -> &dyn Any {
    self
  }

  fn contains_file(&self, dir: &Arc<Directory>, file: &Arc<File>) -> bool {
    if file.directory().is_some_and(|d| Arc::ptr_eq(&d, dir)) {
      return true;
    }
    self.inner.backend.contains_file(file)
  }

  fn are_all_files_seen(&self, _dir: &Arc<Directory>) -> bool {
    self.inner.backend.are_all_files_seen()
  }

  fn is_not_empty(&self, _dir: &Arc<Directory>) -> bool {
    !self.inner.state().window_files.is_empty() || self.inner.backend.is_not_empty()
  }

  fn call_when_ready(&self, dir: &Arc<Directory>, callback: ReadyCallback) -> Result<(), RequestError> {
    if self.inner.state().callbacks.iter().any(|cb| cb.id == callback.id) {
      return Err(RequestError::Duplicate(callback.id));
    }

    if let Some(target) = callback.target.clone() {
      let dir = Arc::clone(dir);
      dir.scheduler().clone().post(move || callback.fire(&dir, vec![target]));
      return Ok(());
    }

    let id = callback.id;
    let attrs = callback.request.fetchable();
    let wait = callback.wants_file_list();
    let sub = CallbackId::next();
    self.inner.state().callbacks.push(RecentCallback {
      id,
      callback: Some(callback),
      sub,
    });

    let inner = Arc::clone(&self.inner);
    if let Err(error) = self
      .inner
      .backend
      .call_when_ready(None, attrs, wait, sub, move |_, _| inner.on_backend_ready(id))
    {
      warn!(%error, "recent backend sub-request rejected");
    }
    Ok(())
  }

  fn cancel_callback(&self, _dir: &Arc<Directory>, id: CallbackId) {
    let entry = {
      let mut state = self.inner.state();
      let index = state.callbacks.iter().position(|cb| cb.id == id);
      index.map(|i| state.callbacks.remove(i))
    };
    if let Some(entry) = entry {
      self.inner.backend.cancel_callback(entry.sub);
    }
  }

  fn on_monitor_added(&self, dir: &Arc<Directory>, client: ClientId) {
    let (include_hidden, attrs) = dir.with_monitors(|m| {
      m.iter()
        .find(|monitor| monitor.client == client)
        .map(|monitor| (monitor.include_hidden, monitor.attrs))
        .unwrap_or((false, AttrMask::empty()))
    });
    let _ = self.inner.backend.file_monitor_add(client, include_hidden, attrs);
  }

  fn on_monitor_removed(&self, _dir: &Arc<Directory>, monitor: Monitor) {
    self.inner.backend.file_monitor_remove(monitor.client);
  }

  fn get_file_list(&self, dir: &Arc<Directory>) -> Vec<Arc<File>> {
    let mut files = self.inner.regenerate_windows(dir);
    files.extend(self.inner.backend.get_file_list());
    files
  }

  fn force_reload(&self, _dir: &Arc<Directory>) {
    self.inner.state().window_files.clear();
    self.inner.backend.force_reload();
  }

  fn has_pending_requests(&self) -> bool {
    !self.inner.state().callbacks.is_empty()
  }
}
