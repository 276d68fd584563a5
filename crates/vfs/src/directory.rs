//! The directory entity and the backend capability it dispatches to.

use std::any::Any;
use std::sync::{Arc, Mutex, OnceLock, Weak};

use manila_core::Location;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::attributes::AttrMask;
use crate::error::RequestError;
use crate::events::DirectoryEvent;
use crate::file::File;
use crate::monitor::{ClientId, EventStream, Monitor, MonitorSet};
use crate::registry::RegistryInner;
use crate::request::{CallbackId, ReadyCallback, ReadyFn};
use crate::scheduler::Scheduler;

/// The capability set every directory variant implements.
///
/// A backend is chosen by provider dispatch at construction and never
/// replaced. Methods receive the owning directory so backends can emit
/// events and hand out references without storing a strong back-pointer.
pub trait DirectoryBackend: Send + Sync {
  fn as_any(&self) -> &dyn Any;

  fn contains_file(&self, dir: &Arc<Directory>, file: &Arc<File>) -> bool;

  /// Whether the current load cycle has delivered every file it will.
  fn are_all_files_seen(&self, dir: &Arc<Directory>) -> bool;

  fn is_not_empty(&self, dir: &Arc<Directory>) -> bool {
    !self.get_file_list(dir).is_empty()
  }

  fn is_editable(&self, _dir: &Arc<Directory>) -> bool {
    false
  }

  /// File a one-shot readiness request. Implementations must never invoke
  /// the callback synchronously; satisfied requests fire on an idle tick.
  fn call_when_ready(&self, dir: &Arc<Directory>, callback: ReadyCallback) -> Result<(), RequestError>;

  /// Drop a pending request. Idempotent.
  fn cancel_callback(&self, dir: &Arc<Directory>, id: CallbackId);

  /// A monitor was added to the directory's monitor set.
  fn on_monitor_added(&self, dir: &Arc<Directory>, client: ClientId);

  /// A monitor was removed; the backend cleans up whatever it attached on
  /// the monitor's behalf and may tear down idle machinery.
  fn on_monitor_removed(&self, dir: &Arc<Directory>, monitor: Monitor);

  fn get_file_list(&self, dir: &Arc<Directory>) -> Vec<Arc<File>>;

  fn find_file_by_name(&self, dir: &Arc<Directory>, name: &str) -> Option<Arc<File>> {
    self.get_file_list(dir).into_iter().find(|f| f.name() == name)
  }

  /// Look up or create the entity for a named child, possibly before any
  /// attribute of it is known.
  fn ensure_file(&self, dir: &Arc<Directory>, name: &str) -> Arc<File> {
    File::new(dir, name, false)
  }

  /// Throw away cached state and run the load cycle again.
  fn force_reload(&self, dir: &Arc<Directory>);

  /// Leak check for teardown assertions.
  fn has_pending_requests(&self) -> bool {
    false
  }
}

/// Terminal no-op fallback used before a backend is installed (and by the
/// blank provider): always ready, never has files.
pub(crate) struct NullBackend;

impl DirectoryBackend for NullBackend {
  fn as_any(&self) -> &dyn Any {
    self
  }

  fn contains_file(&self, _dir: &Arc<Directory>, _file: &Arc<File>) -> bool {
    false
  }

  fn are_all_files_seen(&self, _dir: &Arc<Directory>) -> bool {
    true
  }

  fn call_when_ready(&self, dir: &Arc<Directory>, callback: ReadyCallback) -> Result<(), RequestError> {
    let dir = Arc::clone(dir);
    dir.scheduler().clone().post(move || {
      let files = callback.target.as_ref().map(|f| vec![Arc::clone(f)]).unwrap_or_default();
      callback.fire(&dir, files);
    });
    Ok(())
  }

  fn cancel_callback(&self, _dir: &Arc<Directory>, _id: CallbackId) {}

  fn on_monitor_added(&self, _dir: &Arc<Directory>, _client: ClientId) {}

  fn on_monitor_removed(&self, _dir: &Arc<Directory>, _monitor: Monitor) {}

  fn get_file_list(&self, _dir: &Arc<Directory>) -> Vec<Arc<File>> {
    Vec::new()
  }

  fn force_reload(&self, _dir: &Arc<Directory>) {}
}

static NULL_BACKEND: NullBackend = NullBackend;

/// One location's metadata view.
///
/// At most one live instance exists per canonical location; the registry
/// enforces that and a dropped directory prunes its own registry entry
/// before any other teardown.
pub struct Directory {
  location: Location,
  variant: &'static str,
  registry: Weak<RegistryInner>,
  scheduler: Scheduler,
  cancel: CancellationToken,
  monitors: Mutex<MonitorSet>,
  self_file: Mutex<Weak<File>>,
  backend: OnceLock<Box<dyn DirectoryBackend>>,
}

impl Directory {
  pub(crate) fn new(
    location: Location,
    variant: &'static str,
    registry: Weak<RegistryInner>,
    scheduler: Scheduler,
    cancel: CancellationToken,
  ) -> Self {
    Self {
      location,
      variant,
      registry,
      scheduler,
      cancel,
      monitors: Mutex::new(MonitorSet::default()),
      self_file: Mutex::new(Weak::new()),
      backend: OnceLock::new(),
    }
  }

  pub(crate) fn install_backend(&self, backend: Box<dyn DirectoryBackend>) {
    if self.backend.set(backend).is_err() {
      warn!(location = %self.location, "backend installed twice; keeping the first");
    }
  }

  fn backend(&self) -> &dyn DirectoryBackend {
    match self.backend.get() {
      Some(backend) => backend.as_ref(),
      None => &NULL_BACKEND,
    }
  }

  /// Downcast access to the concrete backend (e.g. to set a search query).
  pub fn backend_as<T: Any>(&self) -> Option<&T> {
    self.backend().as_any().downcast_ref()
  }

  pub fn location(&self) -> &Location {
    &self.location
  }

  /// The provider variant tag this directory was constructed with.
  pub fn variant(&self) -> &'static str {
    self.variant
  }

  pub(crate) fn scheduler(&self) -> &Scheduler {
    &self.scheduler
  }

  /// Teardown token; child tokens guard every task this directory spawns.
  pub(crate) fn cancel_token(&self) -> &CancellationToken {
    &self.cancel
  }

  // --- request coordination ---

  /// Register a one-shot callback for when `target` (or the whole
  /// directory) has the requested attributes and, with
  /// `wait_for_full_list`, the full file list. Fires at most once, on an
  /// idle tick, never inside this call.
  pub fn call_when_ready(
    self: &Arc<Self>,
    target: Option<Arc<File>>,
    attrs: AttrMask,
    wait_for_full_list: bool,
    id: CallbackId,
    func: impl FnOnce(&Arc<Directory>, Vec<Arc<File>>) + Send + 'static,
  ) -> Result<(), RequestError> {
    let mut request = attrs;
    if wait_for_full_list {
      request |= AttrMask::FILE_LIST;
    }
    let callback = ReadyCallback::new(id, target, request, Box::new(func) as ReadyFn);
    let result = self.backend().call_when_ready(self, callback);
    if let Err(RequestError::Duplicate(id)) = &result {
      warn!(location = %self.location, ?id, "tried to add a new callback while an old one was pending");
    }
    result
  }

  /// Cancel a pending callback. Unconditional-cleanup safe: cancelling a
  /// fired or never-registered id is a no-op.
  pub fn cancel_callback(self: &Arc<Self>, id: CallbackId) {
    self.backend().cancel_callback(self, id);
  }

  // --- monitors ---

  /// Add a persistent monitor and get its event stream. While at least one
  /// monitor exists the file list is actively maintained.
  pub fn file_monitor_add(self: &Arc<Self>, client: ClientId, include_hidden: bool, attrs: AttrMask) -> EventStream {
    let (monitor, stream) = Monitor::new(client, include_hidden, attrs);
    self.monitors.lock().unwrap_or_else(|e| e.into_inner()).add(monitor);
    self.backend().on_monitor_added(self, client);
    stream
  }

  pub fn file_monitor_remove(self: &Arc<Self>, client: ClientId) {
    let removed = self.monitors.lock().unwrap_or_else(|e| e.into_inner()).remove(client);
    if let Some(monitor) = removed {
      self.backend().on_monitor_removed(self, monitor);
    }
  }

  pub(crate) fn with_monitors<R>(&self, f: impl FnOnce(&MonitorSet) -> R) -> R {
    f(&self.monitors.lock().unwrap_or_else(|e| e.into_inner()))
  }

  /// Deliver an event to every monitor, in emission order.
  pub(crate) fn emit(&self, event: DirectoryEvent) {
    self.monitors.lock().unwrap_or_else(|e| e.into_inner()).emit(&event);
  }

  // --- file access ---

  pub fn get_file_list(self: &Arc<Self>) -> Vec<Arc<File>> {
    self.backend().get_file_list(self)
  }

  pub fn find_file_by_name(self: &Arc<Self>, name: &str) -> Option<Arc<File>> {
    self.backend().find_file_by_name(self, name)
  }

  pub(crate) fn ensure_child(self: &Arc<Self>, name: &str) -> Arc<File> {
    self.backend().ensure_file(self, name)
  }

  /// The entity standing for this directory itself (its row in the parent
  /// view). Created on demand, cached weakly, owned by this directory.
  pub fn corresponding_file(self: &Arc<Self>) -> Arc<File> {
    let mut slot = self.self_file.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(file) = slot.upgrade() {
      return file;
    }
    let file = File::new(self, self.location.as_uri(), true);
    *slot = Arc::downgrade(&file);
    file
  }

  pub fn existing_corresponding_file(&self) -> Option<Arc<File>> {
    self.self_file.lock().unwrap_or_else(|e| e.into_inner()).upgrade()
  }

  // --- state queries ---

  pub fn contains_file(self: &Arc<Self>, file: &Arc<File>) -> bool {
    self.backend().contains_file(self, file)
  }

  pub fn are_all_files_seen(self: &Arc<Self>) -> bool {
    self.backend().are_all_files_seen(self)
  }

  pub fn is_not_empty(self: &Arc<Self>) -> bool {
    self.backend().is_not_empty(self)
  }

  pub fn is_editable(self: &Arc<Self>) -> bool {
    self.backend().is_editable(self)
  }

  pub fn force_reload(self: &Arc<Self>) {
    self.backend().force_reload(self);
  }
}

impl Drop for Directory {
  fn drop(&mut self) {
    // The registry entry goes first: a lookup racing this teardown must
    // construct a fresh instance, never observe the dying one.
    if let Some(inner) = self.registry.upgrade() {
      inner
        .directories
        .remove_if(&self.location, |_, weak| std::ptr::eq(weak.as_ptr(), self as *const _));
    }

    self.cancel.cancel();

    let monitors = self.monitors.get_mut().unwrap_or_else(|e| e.into_inner());
    debug_assert!(
      monitors.is_empty(),
      "directory {} dropped with {} live monitors",
      self.location,
      monitors.len()
    );
    debug_assert!(
      !self.backend.get().is_some_and(|b| b.has_pending_requests()),
      "directory {} dropped with pending ready callbacks",
      self.location
    );
  }
}

impl std::fmt::Debug for Directory {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Directory")
      .field("location", &self.location)
      .field("variant", &self.variant)
      .finish_non_exhaustive()
  }
}
