//! The process-wide directory registry and provider dispatch.
//!
//! One registry per process maps each canonical location to a single shared
//! [`Directory`]. Variants register a predicate and a constructor; the first
//! matching provider wins, with the plain filesystem variant as the
//! unconditional fallback.

use std::sync::{Arc, RwLock, Weak};

use dashmap::DashMap;
use manila_core::{scheme, Config, Location};
use manila_search::engine::EventReceiver;
use manila_search::{SearchEngine, SimpleEngine};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::backends::blank::BlankBackend;
use crate::backends::network::NetworkBackend;
use crate::backends::plain::PlainBackend;
use crate::backends::recent::{NoWindows, RecentBackend, WindowLister};
use crate::backends::search::SearchBackend;
use crate::backends::tagged::{TagKind, TagManager, TagStore, TaggedBackend};
use crate::directory::{Directory, DirectoryBackend};
use crate::fetch::{AttributeFetcher, FsFetcher};
use crate::file::File;
use crate::scheduler::Scheduler;

type HandlesFn = Box<dyn Fn(&Location) -> bool + Send + Sync>;
type ConstructFn = Box<dyn Fn(&Arc<Directory>, &Registry) -> Box<dyn DirectoryBackend> + Send + Sync>;
type EngineFactory = Box<dyn Fn() -> (Box<dyn SearchEngine>, EventReceiver) + Send + Sync>;

/// One registered directory variant.
pub struct Provider {
  pub tag: &'static str,
  handles: HandlesFn,
  construct: ConstructFn,
}

pub(crate) struct RegistryInner {
  pub(crate) directories: DashMap<Location, Weak<Directory>>,
  providers: RwLock<Vec<Arc<Provider>>>,
  config: Config,
  fetcher: Arc<dyn AttributeFetcher>,
  tags: Arc<dyn TagManager>,
  windows: Arc<dyn WindowLister>,
  engine_factory: EngineFactory,
  scheduler: Scheduler,
  cancel: CancellationToken,
}

impl Drop for RegistryInner {
  fn drop(&mut self) {
    self.cancel.cancel();
  }
}

/// Handle to the registry. Cheap to clone; backends keep clones for lookups
/// of their backing directories and file entities.
#[derive(Clone)]
pub struct Registry {
  inner: Arc<RegistryInner>,
}

impl Registry {
  /// A registry with the default capability set: real filesystem fetcher,
  /// in-memory tag store, no window source, simple search engine.
  pub fn new(config: Config) -> Self {
    Self::builder(config).build()
  }

  pub fn builder(config: Config) -> RegistryBuilder {
    RegistryBuilder {
      config,
      fetcher: None,
      tags: None,
      windows: None,
      engine_factory: None,
    }
  }

  /// Look up the directory for `location`, constructing it when `create`
  /// is set. Two concurrent lookups always resolve to the same instance.
  pub fn get(&self, location: &Location, create: bool) -> Option<Arc<Directory>> {
    if let Some(existing) = self
      .inner
      .directories
      .get(location)
      .and_then(|weak| weak.upgrade())
    {
      return Some(existing);
    }

    if !create {
      return None;
    }

    // Construct outside the map lock: composite constructors recurse into
    // the registry for their backing directories.
    let directory = self.construct_directory(location);

    // A racing construction may have inserted first; the loser is dropped
    // after the shard lock is released (its prune matches nothing).
    let mut loser = None;
    let winner = match self.inner.directories.entry(location.clone()) {
      dashmap::mapref::entry::Entry::Occupied(mut occupied) => match occupied.get().upgrade() {
        Some(existing) => {
          debug!(%location, "lost construction race, reusing existing directory");
          loser = Some(directory);
          existing
        }
        None => {
          occupied.insert(Arc::downgrade(&directory));
          directory
        }
      },
      dashmap::mapref::entry::Entry::Vacant(vacant) => {
        vacant.insert(Arc::downgrade(&directory));
        directory
      }
    };
    drop(loser);

    Some(winner)
  }

  /// Look up an already-live directory without constructing one.
  pub fn get_existing(&self, location: &Location) -> Option<Arc<Directory>> {
    self.get(location, false)
  }

  /// The file entity for a location, created unconfirmed if nothing has
  /// referenced it yet. Roots resolve to their directory's own entity.
  pub fn get_file(&self, location: &Location) -> Arc<File> {
    self.get_file_with_owner(location).0
  }

  /// Like [`get_file`](Self::get_file), also returning the directory that
  /// owns the entity. Callers that hold files long-term (search results,
  /// tag-driven views) keep the owner too: the parent link on a file is
  /// deliberately non-owning, so without the owner reference the entity's
  /// directory, and with it the entity's identity, would not survive.
  pub fn get_file_with_owner(&self, location: &Location) -> (Arc<File>, Arc<Directory>) {
    match location.parent() {
      Some(parent) => {
        let directory = self
          .get(&parent, true)
          .unwrap_or_else(|| unreachable!("get with create always returns a directory"));
        let name = location.basename().unwrap_or_default();
        (directory.ensure_child(name), directory)
      }
      None => {
        let directory = self
          .get(location, true)
          .unwrap_or_else(|| unreachable!("get with create always returns a directory"));
        (directory.corresponding_file(), directory)
      }
    }
  }

  /// Register a variant ahead of the plain-filesystem fallback. First
  /// matching provider wins, in registration order.
  pub fn register_provider(
    &self,
    tag: &'static str,
    handles: impl Fn(&Location) -> bool + Send + Sync + 'static,
    construct: impl Fn(&Arc<Directory>, &Registry) -> Box<dyn DirectoryBackend> + Send + Sync + 'static,
  ) {
    let provider = Arc::new(Provider {
      tag,
      handles: Box::new(handles),
      construct: Box::new(construct),
    });
    let mut providers = self.inner.providers.write().unwrap_or_else(|e| e.into_inner());
    let fallback = providers.len().saturating_sub(1);
    providers.insert(fallback, provider);
    info!(tag, "registered directory provider");
  }

  /// Cancel every directory's outstanding work and the scheduler loop.
  pub fn close(&self) {
    self.inner.cancel.cancel();
  }

  fn construct_directory(&self, location: &Location) -> Arc<Directory> {
    let provider = self.find_provider(location);
    let directory = Arc::new(Directory::new(
      location.clone(),
      provider.tag,
      Arc::downgrade(&self.inner),
      self.inner.scheduler.clone(),
      self.inner.cancel.child_token(),
    ));
    let backend = (provider.construct)(&directory, self);
    directory.install_backend(backend);
    debug!(%location, variant = provider.tag, "constructed directory");
    directory
  }

  fn find_provider(&self, location: &Location) -> Arc<Provider> {
    let providers = self.inner.providers.read().unwrap_or_else(|e| e.into_inner());
    providers
      .iter()
      .find(|p| (p.handles)(location))
      .cloned()
      // The built-in table ends in a catch-all; reaching this means the
      // bootstrap never ran or the table was emptied. Fatal, not a
      // runtime condition.
      .unwrap_or_else(|| panic!("no directory provider handles {location}; provider table not initialized"))
  }

  // --- capability access for backends ---

  pub(crate) fn config(&self) -> &Config {
    &self.inner.config
  }

  pub(crate) fn fetcher(&self) -> Arc<dyn AttributeFetcher> {
    Arc::clone(&self.inner.fetcher)
  }

  pub(crate) fn tags(&self) -> Arc<dyn TagManager> {
    Arc::clone(&self.inner.tags)
  }

  pub(crate) fn windows(&self) -> Arc<dyn WindowLister> {
    Arc::clone(&self.inner.windows)
  }

  pub(crate) fn new_engine(&self) -> (Box<dyn SearchEngine>, EventReceiver) {
    (self.inner.engine_factory)()
  }
}

impl std::fmt::Debug for Registry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Registry")
      .field("directories", &self.inner.directories.len())
      .finish_non_exhaustive()
  }
}

/// Assembles a registry with overridable capabilities.
pub struct RegistryBuilder {
  config: Config,
  fetcher: Option<Arc<dyn AttributeFetcher>>,
  tags: Option<Arc<dyn TagManager>>,
  windows: Option<Arc<dyn WindowLister>>,
  engine_factory: Option<EngineFactory>,
}

impl RegistryBuilder {
  pub fn fetcher(mut self, fetcher: Arc<dyn AttributeFetcher>) -> Self {
    self.fetcher = Some(fetcher);
    self
  }

  pub fn tags(mut self, tags: Arc<dyn TagManager>) -> Self {
    self.tags = Some(tags);
    self
  }

  pub fn windows(mut self, windows: Arc<dyn WindowLister>) -> Self {
    self.windows = Some(windows);
    self
  }

  pub fn engine_factory(
    mut self,
    factory: impl Fn() -> (Box<dyn SearchEngine>, EventReceiver) + Send + Sync + 'static,
  ) -> Self {
    self.engine_factory = Some(Box::new(factory));
    self
  }

  pub fn build(self) -> Registry {
    let cancel = CancellationToken::new();
    let scheduler = Scheduler::spawn(cancel.child_token());
    let search_config = self.config.search.clone();

    let inner = Arc::new(RegistryInner {
      directories: DashMap::new(),
      providers: RwLock::new(builtin_providers()),
      config: self.config,
      fetcher: self.fetcher.unwrap_or_else(|| Arc::new(FsFetcher)),
      tags: self.tags.unwrap_or_else(|| Arc::new(TagStore::new())),
      windows: self.windows.unwrap_or_else(|| Arc::new(NoWindows)),
      engine_factory: self.engine_factory.unwrap_or_else(|| {
        Box::new(move || {
          let (engine, events) = SimpleEngine::new(search_config.clone());
          (Box::new(engine) as Box<dyn SearchEngine>, events)
        })
      }),
      scheduler,
      cancel,
    });

    Registry { inner }
  }
}

/// The built-in variant table, in dispatch order, ending in the plain
/// catch-all.
fn builtin_providers() -> Vec<Arc<Provider>> {
  fn provider(
    tag: &'static str,
    handles: impl Fn(&Location) -> bool + Send + Sync + 'static,
    construct: impl Fn(&Arc<Directory>, &Registry) -> Box<dyn DirectoryBackend> + Send + Sync + 'static,
  ) -> Arc<Provider> {
    Arc::new(Provider {
      tag,
      handles: Box::new(handles),
      construct: Box::new(construct),
    })
  }

  vec![
    provider(
      "search",
      |l| l.scheme() == scheme::SEARCH,
      |dir, registry| Box::new(SearchBackend::new(dir, registry)),
    ),
    provider(
      "recent",
      |l| l.scheme() == scheme::RECENT,
      |dir, registry| Box::new(RecentBackend::new(dir, registry)),
    ),
    provider(
      "network",
      |l| l.scheme() == scheme::NETWORK,
      |dir, registry| Box::new(NetworkBackend::new(dir, registry)),
    ),
    provider(
      "starred",
      |l| l.scheme() == scheme::STARRED,
      |dir, registry| Box::new(TaggedBackend::new(dir, registry, TagKind::Starred)),
    ),
    provider(
      "favorites",
      |l| l.scheme() == scheme::FAVORITES,
      |dir, registry| Box::new(TaggedBackend::new(dir, registry, TagKind::Favorite)),
    ),
    provider(
      "blank",
      |l| l.scheme() == scheme::BLANK,
      |_dir, _registry| Box::new(BlankBackend),
    ),
    provider("plain", |_| true, |dir, registry| {
      Box::new(PlainBackend::new(dir, registry))
    }),
  ]
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[tokio::test]
  async fn test_one_directory_per_location() {
    let registry = Registry::new(Config::default());
    let location = Location::new("file:///tmp/uniq");

    let a = registry.get(&location, true).unwrap();
    let b = registry.get(&location, true).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
  }

  #[tokio::test]
  async fn test_get_existing_does_not_construct() {
    let registry = Registry::new(Config::default());
    let location = Location::new("file:///tmp/nothing-here");
    assert!(registry.get_existing(&location).is_none());

    let dir = registry.get(&location, true).unwrap();
    assert!(registry.get_existing(&location).is_some());
    drop(dir);
  }

  #[tokio::test]
  async fn test_dead_entries_are_pruned_on_drop() {
    let registry = Registry::new(Config::default());
    let location = Location::new("file:///tmp/short-lived");

    let dir = registry.get(&location, true).unwrap();
    drop(dir);

    assert!(registry.get_existing(&location).is_none());
    // A fresh lookup constructs a new instance rather than resurrecting
    // the dead one.
    assert!(registry.get(&location, true).is_some());
  }

  #[tokio::test]
  async fn test_dispatch_picks_variant_by_scheme() {
    let registry = Registry::new(Config::default());
    let cases = [
      ("search://q1/", "search"),
      ("recent:///", "recent"),
      ("network:///", "network"),
      ("starred:///", "starred"),
      ("favorites:///", "favorites"),
      ("x-manila-blank:///", "blank"),
      ("file:///tmp", "plain"),
      ("sftp://host/share", "plain"),
    ];
    for (uri, variant) in cases {
      let dir = registry.get(&Location::new(uri), true).unwrap();
      assert_eq!(dir.variant(), variant, "{uri}");
    }
  }

  #[tokio::test]
  async fn test_registered_provider_wins_over_fallback() {
    let registry = Registry::new(Config::default());
    registry.register_provider(
      "custom",
      |l| l.scheme() == "custom",
      |_dir, _registry| Box::new(BlankBackend),
    );

    let dir = registry.get(&Location::new("custom:///x"), true).unwrap();
    assert_eq!(dir.variant(), "custom");
  }

  #[tokio::test]
  async fn test_get_file_parents_into_directory() {
    let registry = Registry::new(Config::default());
    let file = registry.get_file(&Location::new("file:///tmp/parented/a.txt"));

    assert_eq!(file.name(), "a.txt");
    let dir = file.directory().unwrap();
    assert_eq!(dir.location(), &Location::new("file:///tmp/parented"));
    assert!(!file.is_confirmed());

    // Same location resolves to the same entity.
    let again = registry.get_file(&Location::new("file:///tmp/parented/a.txt"));
    assert_eq!(file.id(), again.id());
  }

  #[tokio::test]
  async fn test_get_file_for_root_is_self_owned() {
    let registry = Registry::new(Config::default());
    let file = registry.get_file(&Location::new("search://7/"));

    assert!(file.is_self_owned());
    let dir = file.directory().unwrap();
    assert_eq!(dir.variant(), "search");
    assert_eq!(file.location(), *dir.location());
  }
}
