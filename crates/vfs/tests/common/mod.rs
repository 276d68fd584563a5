//! Shared fixtures for the integration suite: a scriptable fetcher, a
//! hand-driven search engine, and event-stream helpers.

// Each integration binary uses its own subset of these.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use manila_core::Location;
use manila_search::engine::{EventSender, SearchEvent};
use manila_search::{Query, SearchEngine};
use manila_vfs::{AttrMask, AttrPayload, AttributeFetcher, DirectoryEvent, EventStream, FileInfo, LoadError};
use tokio::sync::Semaphore;
use tokio::time::timeout;

pub const WAIT: Duration = Duration::from_secs(5);

/// Scriptable attribute fetcher: listings per location, optional per-location
/// gates that block the listing until released, and a global failure switch.
#[derive(Default)]
pub struct FakeFetcher {
  listings: Mutex<HashMap<Location, Vec<FileInfo>>>,
  gates: Mutex<HashMap<Location, Arc<Semaphore>>>,
  fail: AtomicBool,
}

impl FakeFetcher {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn set_listing(&self, location: Location, infos: Vec<FileInfo>) {
    self.listings.lock().unwrap().insert(location, infos);
  }

  pub fn set_names(&self, location: Location, names: &[&str]) {
    let infos = names
      .iter()
      .map(|n| FileInfo {
        name: n.to_string(),
        ..FileInfo::default()
      })
      .collect();
    self.set_listing(location, infos);
  }

  /// Gate a location's listing; each `release` lets one listing through.
  pub fn gate(&self, location: Location) -> Arc<Semaphore> {
    let semaphore = Arc::new(Semaphore::new(0));
    self.gates.lock().unwrap().insert(location, Arc::clone(&semaphore));
    semaphore
  }

  pub fn set_failing(&self, fail: bool) {
    self.fail.store(fail, Ordering::SeqCst);
  }
}

#[async_trait]
impl AttributeFetcher for FakeFetcher {
  async fn list(&self, location: &Location) -> Result<Vec<FileInfo>, LoadError> {
    let gate = self.gates.lock().unwrap().get(location).cloned();
    if let Some(gate) = gate {
      gate.acquire().await.expect("gate closed").forget();
    }

    if self.fail.load(Ordering::SeqCst) {
      return Err(LoadError::new("backend unavailable"));
    }
    self
      .listings
      .lock()
      .unwrap()
      .get(location)
      .cloned()
      .ok_or_else(|| LoadError::new(format!("no listing for {location}")))
  }

  async fn fetch(&self, location: &Location, class: AttrMask) -> Result<AttrPayload, LoadError> {
    if self.fail.load(Ordering::SeqCst) {
      return Err(LoadError::new("backend unavailable"));
    }
    if class == AttrMask::INFO {
      Ok(AttrPayload::Info(FileInfo {
        name: location.basename().unwrap_or_default().to_string(),
        ..FileInfo::default()
      }))
    } else if class == AttrMask::DIRECTORY_COUNT {
      Ok(AttrPayload::DirectoryCount(0))
    } else {
      Ok(AttrPayload::ExtensionInfo(HashMap::new()))
    }
  }
}

/// A search engine the test drives by hand through the shared handle.
pub struct FakeEngineHandle {
  senders: Mutex<Vec<EventSender>>,
  started: Mutex<Vec<Query>>,
  stopped: std::sync::atomic::AtomicUsize,
}

impl FakeEngineHandle {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      senders: Mutex::new(Vec::new()),
      started: Mutex::new(Vec::new()),
      stopped: std::sync::atomic::AtomicUsize::new(0),
    })
  }

  /// Deliver an event to every engine created so far.
  pub fn send(&self, event: SearchEvent) {
    for sender in self.senders.lock().unwrap().iter() {
      let _ = sender.send(event.clone());
    }
  }

  pub fn started_queries(&self) -> Vec<Query> {
    self.started.lock().unwrap().clone()
  }

  pub fn stop_count(&self) -> usize {
    self.stopped.load(Ordering::SeqCst)
  }
}

pub struct FakeEngine {
  handle: Arc<FakeEngineHandle>,
  query: Mutex<Option<Query>>,
}

impl FakeEngine {
  /// Factory suitable for `RegistryBuilder::engine_factory`.
  pub fn factory(handle: Arc<FakeEngineHandle>) -> impl Fn() -> (Box<dyn SearchEngine>, manila_search::engine::EventReceiver) + Send + Sync {
    move || {
      let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
      handle.senders.lock().unwrap().push(tx);
      let engine = FakeEngine {
        handle: Arc::clone(&handle),
        query: Mutex::new(None),
      };
      (Box::new(engine) as Box<dyn SearchEngine>, rx)
    }
  }
}

impl SearchEngine for FakeEngine {
  fn set_query(&self, query: Query) {
    *self.query.lock().unwrap() = Some(query);
  }

  fn start(&self) {
    if let Some(query) = self.query.lock().unwrap().clone() {
      self.handle.started.lock().unwrap().push(query);
    }
  }

  fn stop(&self) {
    self.handle.stopped.fetch_add(1, Ordering::SeqCst);
  }
}

/// Poll a condition until it holds, failing the test after the standard
/// wait. For states that may be reached before an observer attaches.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
  let deadline = tokio::time::Instant::now() + WAIT;
  while !condition() {
    if tokio::time::Instant::now() > deadline {
      panic!("condition not reached in time");
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
}

/// Receive events until done-loading (inclusive).
pub async fn events_until_done(stream: &mut EventStream) -> Vec<DirectoryEvent> {
  let mut events = Vec::new();
  loop {
    let event = timeout(WAIT, stream.recv())
      .await
      .expect("timed out waiting for done-loading")
      .expect("event stream closed");
    let done = matches!(event, DirectoryEvent::DoneLoading);
    events.push(event);
    if done {
      return events;
    }
  }
}

/// Next event, failing the test after the standard wait.
pub async fn next_event(stream: &mut EventStream) -> DirectoryEvent {
  timeout(WAIT, stream.recv())
    .await
    .expect("timed out waiting for event")
    .expect("event stream closed")
}

/// Assert silence on the stream for a short window.
pub async fn expect_no_event(stream: &mut EventStream) {
  if let Ok(Some(event)) = timeout(Duration::from_millis(200), stream.recv()).await {
    panic!("expected no event, got {event:?}");
  }
}

pub fn added_names(events: &[DirectoryEvent]) -> Vec<String> {
  events
    .iter()
    .filter_map(|e| match e {
      DirectoryEvent::FilesAdded(files) => Some(files.iter().map(|f| f.name()).collect::<Vec<_>>()),
      _ => None,
    })
    .flatten()
    .collect()
}
