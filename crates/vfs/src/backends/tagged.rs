//! Starred and favorite views, driven entirely by a tag manager.
//!
//! The file set is "every location the tag manager says is tagged". On a
//! tag change the backend diffs against its cached list: newly tagged
//! locations emit `FilesAdded`, untagged ones emit `FilesChanged` (they no
//! longer belong, they are not gone). Re-running the diff with no
//! underlying change emits nothing.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use manila_core::Location;
use tokio::sync::mpsc;

use crate::directory::{Directory, DirectoryBackend};
use crate::error::RequestError;
use crate::events::DirectoryEvent;
use crate::file::File;
use crate::monitor::{ClientId, Monitor};
use crate::registry::Registry;
use crate::request::{CallbackId, ReadyCallback};

/// Which tag a view is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
  Starred,
  Favorite,
}

/// A batch of locations whose tag state may have changed.
#[derive(Debug, Clone)]
pub struct TagEvent {
  pub kind: TagKind,
  pub changed: Vec<Location>,
}

/// The tag capability: membership queries plus change notification.
pub trait TagManager: Send + Sync {
  fn is_tagged(&self, kind: TagKind, location: &Location) -> bool;

  /// Every tagged location, in tagging order.
  fn tagged(&self, kind: TagKind) -> Vec<Location>;

  fn subscribe(&self) -> mpsc::UnboundedReceiver<TagEvent>;
}

#[derive(Default)]
struct TagStoreState {
  starred: Vec<Location>,
  favorites: Vec<Location>,
  subscribers: Vec<mpsc::UnboundedSender<TagEvent>>,
}

/// In-memory tag manager.
#[derive(Default)]
pub struct TagStore {
  state: Mutex<TagStoreState>,
}

impl TagStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Tag or untag a location. Redundant calls notify nobody.
  pub fn set_tagged(&self, kind: TagKind, location: Location, tagged: bool) {
    let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
    let list = match kind {
      TagKind::Starred => &mut state.starred,
      TagKind::Favorite => &mut state.favorites,
    };

    let present = list.contains(&location);
    if tagged == present {
      return;
    }
    if tagged {
      list.push(location.clone());
    } else {
      list.retain(|l| l != &location);
    }

    let event = TagEvent {
      kind,
      changed: vec![location],
    };
    state.subscribers.retain(|s| s.send(event.clone()).is_ok());
  }
}

impl TagManager for TagStore {
  fn is_tagged(&self, kind: TagKind, location: &Location) -> bool {
    let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
    match kind {
      TagKind::Starred => state.starred.contains(location),
      TagKind::Favorite => state.favorites.contains(location),
    }
  }

  fn tagged(&self, kind: TagKind) -> Vec<Location> {
    let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
    match kind {
      TagKind::Starred => state.starred.clone(),
      TagKind::Favorite => state.favorites.clone(),
    }
  }

  fn subscribe(&self) -> mpsc::UnboundedReceiver<TagEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    self
      .state
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .subscribers
      .push(tx);
    rx
  }
}

#[derive(Default)]
struct TaggedState {
  files: Vec<Arc<File>>,
  /// Tagged entities link to their owning directories weakly; the owners
  /// are held here so membership and watches survive as long as the view.
  owners: HashMap<Location, Arc<Directory>>,
  pending: Vec<CallbackId>,
}

struct TaggedInner {
  dir: Weak<Directory>,
  registry: Registry,
  tags: Arc<dyn TagManager>,
  kind: TagKind,
  state: Mutex<TaggedState>,
}

pub struct TaggedBackend {
  inner: Arc<TaggedInner>,
}

impl TaggedBackend {
  pub fn new(dir: &Arc<Directory>, registry: &Registry, kind: TagKind) -> Self {
    let tags = registry.tags();
    let inner = Arc::new(TaggedInner {
      dir: Arc::downgrade(dir),
      registry: registry.clone(),
      tags: Arc::clone(&tags),
      kind,
      state: Mutex::new(TaggedState::default()),
    });

    // Seed from the current tag set; no signals for the initial fill.
    {
      let mut state = inner.state();
      for location in tags.tagged(kind) {
        let (file, owner) = inner.registry.get_file_with_owner(&location);
        state.owners.insert(owner.location().clone(), owner);
        state.files.push(file);
      }
    }

    inner.spawn_subscription(dir);
    Self { inner }
  }
}

impl TaggedInner {
  fn state(&self) -> MutexGuard<'_, TaggedState> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn spawn_subscription(self: &Arc<Self>, dir: &Arc<Directory>) {
    let mut events = self.tags.subscribe();
    let inner = Arc::clone(self);
    let cancel = dir.cancel_token().clone();
    let scheduler = dir.scheduler().clone();

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
        if event.kind != inner.kind {
          continue;
        }

        let handler = Arc::clone(&inner);
        scheduler.post(move || handler.update_files(event.changed));
      }
    });
  }

  /// The tag-changed diff. Idempotent: a location whose membership did not
  /// flip produces no signal.
  fn update_files(self: &Arc<Self>, changed: Vec<Location>) {
    let Some(dir) = self.dir.upgrade() else { return };

    let mut added = Vec::new();
    let mut removed = Vec::new();
    {
      let mut state = self.state();
      for location in changed {
        let index = state.files.iter().position(|f| f.location() == location);
        let tagged = self.tags.is_tagged(self.kind, &location);

        match (index, tagged) {
          (Some(i), false) => removed.push(state.files.remove(i)),
          (None, true) => {
            let (file, owner) = self.registry.get_file_with_owner(&location);
            state.owners.insert(owner.location().clone(), owner);
            state.files.push(Arc::clone(&file));
            added.push(file);
          }
          // Already agrees with the tag manager (e.g. a move updated the
          // entity's own location first).
          _ => {}
        }
      }
    }

    let clients = dir.with_monitors(|m| m.clients());
    for file in &added {
      for client in &clients {
        file.add_watch(*client, &dir);
      }
    }
    for file in &removed {
      for client in &clients {
        file.remove_watch(*client);
      }
    }

    if !added.is_empty() {
      dir.emit(DirectoryEvent::FilesAdded(added));
    }
    if !removed.is_empty() {
      dir.emit(DirectoryEvent::FilesChanged(removed));
    }
  }
}

impl DirectoryBackend for TaggedBackend {
  fn as_any(&self) -> &dyn Any {
    self
  }

  fn contains_file(&self, _dir: &Arc<Directory>, file: &Arc<File>) -> bool {
    self.inner.tags.is_tagged(self.inner.kind, &file.location())
  }

  fn are_all_files_seen(&self, _dir: &Arc<Directory>) -> bool {
    true
  }

  fn call_when_ready(&self, dir: &Arc<Directory>, callback: ReadyCallback) -> Result<(), RequestError> {
    {
      let mut state = self.inner.state();
      if state.pending.contains(&callback.id) {
        return Err(RequestError::Duplicate(callback.id));
      }
      state.pending.push(callback.id);
    }

    // Tag membership is always current, so the only wait is the idle-tick
    // deferral. Cancellation between now and the tick is honored.
    let inner = Arc::clone(&self.inner);
    let dir = Arc::clone(dir);
    dir.scheduler().clone().post(move || {
      let id = callback.id;
      let still_pending = {
        let mut state = inner.state();
        match state.pending.iter().position(|p| *p == id) {
          Some(index) => {
            state.pending.remove(index);
            true
          }
          None => false,
        }
      };
      if !still_pending {
        return;
      }

      let files = match &callback.target {
        Some(target) => vec![Arc::clone(target)],
        None => inner.state().files.clone(),
      };
      callback.fire(&dir, files);
    });
    Ok(())
  }

  fn cancel_callback(&self, _dir: &Arc<Directory>, id: CallbackId) {
    self.inner.state().pending.retain(|p| *p != id);
  }

  fn on_monitor_added(&self, dir: &Arc<Directory>, client: ClientId) {
    let files = self.inner.state().files.clone();
    for file in files {
      file.add_watch(client, dir);
    }
  }

  fn on_monitor_removed(&self, _dir: &Arc<Directory>, monitor: Monitor) {
    let files = self.inner.state().files.clone();
    for file in files {
      file.remove_watch(monitor.client);
    }
  }

  fn get_file_list(&self, _dir: &Arc<Directory>) -> Vec<Arc<File>> {
    self.inner.state().files.clone()
  }

  fn force_reload(&self, _dir: &Arc<Directory>) {
    // Recompute from scratch: diff against the union of the cached list
    // and the tag manager's current set.
    let mut locations: Vec<Location> = self.inner.state().files.iter().map(|f| f.location()).collect();
    for location in self.inner.tags.tagged(self.inner.kind) {
      if !locations.contains(&location) {
        locations.push(location);
      }
    }
    self.inner.update_files(locations);
  }

  fn has_pending_requests(&self) -> bool {
    !self.inner.state().pending.is_empty()
  }
}
