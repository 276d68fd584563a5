//! The file entity: one named item's cached metadata within a directory.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};
use manila_core::Location;

use crate::attributes::AttrMask;
use crate::directory::Directory;
use crate::events::DirectoryEvent;
use crate::fetch::AttrPayload;
use crate::monitor::ClientId;

/// Stable identity of a file entity, independent of its (renamable) name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(u64);

impl FileId {
  fn next() -> Self {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    Self(NEXT.fetch_add(1, Ordering::Relaxed))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileType {
  Regular,
  Directory,
  Symlink,
  /// A virtual entry pointing somewhere else (its `target_uri`).
  Shortcut,
  Mountable,
  #[default]
  Unknown,
}

/// The basic-info attribute class payload.
#[derive(Debug, Clone, Default)]
pub struct FileInfo {
  /// Entry name within the parent. Carried by listings; the file cache, not
  /// this field, is authoritative for an entity's name after creation.
  pub name: String,
  pub display_name: Option<String>,
  pub file_type: FileType,
  pub size: u64,
  pub modified: Option<DateTime<Utc>>,
  pub accessed: Option<DateTime<Utc>>,
  pub is_hidden: bool,
  pub is_virtual: bool,
  /// Icon names in preference order; the network view's remote heuristic
  /// keys off these.
  pub icon_names: Vec<String>,
  pub target_uri: Option<String>,
}

/// The deep-count attribute class payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeepCount {
  pub files: usize,
  pub directories: usize,
  pub bytes: u64,
}

/// The filesystem-info attribute class payload.
#[derive(Debug, Clone, Default)]
pub struct FilesystemInfo {
  pub fs_type: String,
  pub read_only: bool,
}

/// A directory watching this file on behalf of one of its monitors.
///
/// Virtual directories (search, starred) show files owned by other
/// directories; a watch routes this file's changes to them as
/// `FilesChanged` on their own event streams.
struct FileWatch {
  client: ClientId,
  directory: Weak<Directory>,
}

#[derive(Default)]
struct FileState {
  name: String,
  ready: AttrMask,
  info: Option<FileInfo>,
  directory_count: Option<usize>,
  deep_count: Option<DeepCount>,
  thumbnail: Option<PathBuf>,
  mount: Option<String>,
  filesystem_info: Option<FilesystemInfo>,
  extension_info: HashMap<String, String>,
  confirmed: bool,
  gone: bool,
  relevance: f64,
  snippet: Option<String>,
}

/// One item's cached metadata.
///
/// A file belongs to exactly one directory at a time (the directory owns the
/// strong reference; the back-reference here is weak). It exists from the
/// first time anything references its location, possibly before any
/// attribute is known, and is "confirmed" once a backend vouches for it.
pub struct File {
  id: FileId,
  self_owned: bool,
  directory: Mutex<Weak<Directory>>,
  state: Mutex<FileState>,
  watches: Mutex<Vec<FileWatch>>,
}

impl File {
  pub(crate) fn new(directory: &Arc<Directory>, name: impl Into<String>, self_owned: bool) -> Arc<File> {
    Arc::new(File {
      id: FileId::next(),
      self_owned,
      directory: Mutex::new(Arc::downgrade(directory)),
      state: Mutex::new(FileState {
        name: name.into(),
        ..FileState::default()
      }),
      watches: Mutex::new(Vec::new()),
    })
  }

  pub fn id(&self) -> FileId {
    self.id
  }

  pub fn name(&self) -> String {
    self.state().name.clone()
  }

  /// Mutate the name. Only valid between a cache's `begin_name_change` and
  /// `end_name_change`, which keep the name index consistent around the
  /// mutation.
  pub fn set_name(&self, name: impl Into<String>) {
    self.state().name = name.into();
  }

  /// Whether this entity stands for its directory itself rather than a
  /// child of it.
  pub fn is_self_owned(&self) -> bool {
    self.self_owned
  }

  pub fn directory(&self) -> Option<Arc<Directory>> {
    self.directory.lock().unwrap_or_else(|e| e.into_inner()).upgrade()
  }

  /// Move the entity under a different directory. A rename across
  /// directory boundaries reparents the same entity, it does not copy; the
  /// caller removes it from the old cache and adds it to the new one.
  pub fn reparent(&self, directory: &Arc<Directory>) {
    *self.directory.lock().unwrap_or_else(|e| e.into_inner()) = Arc::downgrade(directory);
  }

  pub fn location(&self) -> Location {
    let name = self.name();
    match self.directory() {
      Some(dir) if self.self_owned => dir.location().clone(),
      Some(dir) => dir.location().child(&name),
      None => Location::new(name),
    }
  }

  fn state(&self) -> std::sync::MutexGuard<'_, FileState> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  // --- attribute readiness ---

  /// Whether every fetchable class in `mask` is present.
  pub fn is_ready(&self, mask: AttrMask) -> bool {
    self.state().ready.contains(mask.fetchable())
  }

  /// The classes in `mask` still missing.
  pub fn missing(&self, mask: AttrMask) -> AttrMask {
    mask.fetchable() & !self.state().ready
  }

  /// Store a fetched attribute payload and mark its class ready.
  pub(crate) fn apply(&self, payload: AttrPayload) {
    let mut state = self.state();
    match payload {
      AttrPayload::Info(info) => {
        state.info = Some(info);
        state.confirmed = true;
        state.ready |= AttrMask::INFO;
      }
      AttrPayload::DirectoryCount(count) => {
        state.directory_count = Some(count);
        state.ready |= AttrMask::DIRECTORY_COUNT;
      }
      AttrPayload::DeepCount(counts) => {
        state.deep_count = Some(counts);
        state.ready |= AttrMask::DEEP_COUNT;
      }
      AttrPayload::Thumbnail(path) => {
        state.thumbnail = path;
        state.ready |= AttrMask::THUMBNAIL;
      }
      AttrPayload::Mount(mount) => {
        state.mount = mount;
        state.ready |= AttrMask::MOUNT;
      }
      AttrPayload::FilesystemInfo(info) => {
        state.filesystem_info = Some(info);
        state.ready |= AttrMask::FILESYSTEM_INFO;
      }
      AttrPayload::ExtensionInfo(map) => {
        state.extension_info = map;
        state.ready |= AttrMask::EXTENSION_INFO;
      }
    }
  }

  /// A failed fetch still counts as "answered" so requests cannot wait
  /// forever on an attribute the backend cannot produce.
  pub(crate) fn mark_failed(&self, class: AttrMask) {
    self.state().ready |= class.fetchable();
  }

  /// Drop all readiness so the next load cycle fetches fresh attributes.
  pub(crate) fn invalidate_attributes(&self) {
    self.state().ready = AttrMask::empty();
  }

  // --- payload accessors ---

  pub fn info(&self) -> Option<FileInfo> {
    self.state().info.clone()
  }

  pub(crate) fn update_info(&self, info: FileInfo) {
    self.apply(AttrPayload::Info(info));
  }

  pub fn directory_count(&self) -> Option<usize> {
    self.state().directory_count
  }

  pub fn deep_count(&self) -> Option<DeepCount> {
    self.state().deep_count
  }

  pub fn display_name(&self) -> String {
    let state = self.state();
    state
      .info
      .as_ref()
      .and_then(|i| i.display_name.clone())
      .unwrap_or_else(|| state.name.clone())
  }

  pub fn is_hidden(&self) -> bool {
    let state = self.state();
    state.name.starts_with('.') || state.info.as_ref().is_some_and(|i| i.is_hidden)
  }

  /// The location this entry activates: its target for shortcuts, its own
  /// location otherwise.
  pub fn activation_location(&self) -> Location {
    match self.state().info.as_ref().and_then(|i| i.target_uri.clone()) {
      Some(uri) => Location::new(uri),
      None => self.location(),
    }
  }

  // --- lifecycle ---

  pub fn is_confirmed(&self) -> bool {
    self.state().confirmed
  }

  pub fn is_gone(&self) -> bool {
    self.state().gone
  }

  pub(crate) fn mark_gone(&self) {
    self.state().gone = true;
  }

  // --- search decoration ---

  pub fn search_relevance(&self) -> f64 {
    self.state().relevance
  }

  pub fn search_snippet(&self) -> Option<String> {
    self.state().snippet.clone()
  }

  pub(crate) fn set_search_result(&self, relevance: f64, snippet: Option<String>) {
    let mut state = self.state();
    state.relevance = relevance;
    state.snippet = snippet;
  }

  // --- change watches ---

  pub(crate) fn add_watch(&self, client: ClientId, directory: &Arc<Directory>) {
    let mut watches = self.watches.lock().unwrap_or_else(|e| e.into_inner());
    if watches.iter().any(|w| w.client == client) {
      return;
    }
    watches.push(FileWatch {
      client,
      directory: Arc::downgrade(directory),
    });
  }

  pub(crate) fn remove_watch(&self, client: ClientId) {
    let mut watches = self.watches.lock().unwrap_or_else(|e| e.into_inner());
    watches.retain(|w| w.client != client);
  }

  /// Tell every watching directory this file changed. The owning directory
  /// emits on its own monitors separately.
  pub(crate) fn notify_changed(self: &Arc<Self>) {
    let directories: Vec<Arc<Directory>> = {
      let watches = self.watches.lock().unwrap_or_else(|e| e.into_inner());
      watches.iter().filter_map(|w| w.directory.upgrade()).collect()
    };
    for directory in directories {
      directory.emit(DirectoryEvent::FilesChanged(vec![Arc::clone(self)]));
    }
  }
}

impl PartialEq for File {
  fn eq(&self, other: &Self) -> bool {
    self.id == other.id
  }
}

impl Eq for File {}

impl std::fmt::Debug for File {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let state = self.state();
    f.debug_struct("File")
      .field("id", &self.id)
      .field("name", &state.name)
      .field("ready", &state.ready)
      .field("confirmed", &state.confirmed)
      .field("gone", &state.gone)
      .finish()
  }
}
