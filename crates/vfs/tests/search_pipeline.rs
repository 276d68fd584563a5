//! The search directory's hit pipeline and readiness state machine,
//! driven through a hand-controlled engine.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{events_until_done, expect_no_event, next_event, FakeEngine, FakeEngineHandle, FakeFetcher, WAIT};
use manila_core::{Config, Location};
use manila_search::engine::SearchEvent;
use manila_search::{FinishStatus, Query, SearchHit};
use manila_vfs::{AttrMask, AttributeFetcher, CallbackId, ClientId, Directory, DirectoryEvent, Registry, SearchBackend};
use pretty_assertions::assert_eq;
use tokio::time::timeout;

struct Fixture {
  registry: Registry,
  engine: Arc<FakeEngineHandle>,
}

fn fixture() -> Fixture {
  let fetcher = FakeFetcher::new();
  let engine = FakeEngineHandle::new();
  let registry = Registry::builder(Config::default())
    .fetcher(fetcher as Arc<dyn AttributeFetcher>)
    .engine_factory(FakeEngine::factory(Arc::clone(&engine)))
    .build();
  Fixture { registry, engine }
}

fn search_dir(registry: &Registry, query: &str) -> Arc<Directory> {
  let dir = registry.get(&Location::new("search://t1/"), true).unwrap();
  let backend = dir.backend_as::<SearchBackend>().expect("search variant");
  backend.set_query(Query::new(query, Location::new("file:///data")));
  dir
}

fn hit(name: &str) -> SearchHit {
  SearchHit::new(Location::new(format!("file:///data/{name}")))
}

#[tokio::test]
async fn test_hits_merge_incrementally_then_done() {
  let fx = fixture();
  let dir = search_dir(&fx.registry, "report");
  let client = ClientId::next();
  let mut stream = dir.file_monitor_add(client, false, AttrMask::empty());

  assert_eq!(fx.engine.started_queries().len(), 1);
  assert_eq!(fx.engine.started_queries()[0].text(), "report");

  fx.engine.send(SearchEvent::HitsAdded(vec![hit("r1"), hit("r2"), hit("r3")]));
  fx.engine.send(SearchEvent::HitsAdded(vec![hit("r4"), hit("r5")]));
  fx.engine.send(SearchEvent::Finished(FinishStatus::Normal));

  let events = events_until_done(&mut stream).await;
  let adds: Vec<usize> = events
    .iter()
    .filter_map(|e| match e {
      DirectoryEvent::FilesAdded(files) => Some(files.len()),
      _ => None,
    })
    .collect();
  // One files-added per hit: results appear progressively, never as one
  // five-file batch, and done-loading comes strictly after all of them.
  assert_eq!(adds, vec![1, 1, 1, 1, 1]);
  assert!(matches!(events.last(), Some(DirectoryEvent::DoneLoading)));

  assert_eq!(dir.get_file_list().len(), 5);
  assert!(dir.are_all_files_seen());

  dir.file_monitor_remove(client);
}

#[tokio::test]
async fn test_scored_hits_decorate_files() {
  let fx = fixture();
  let dir = search_dir(&fx.registry, "report");
  let client = ClientId::next();
  let mut stream = dir.file_monitor_add(client, false, AttrMask::empty());

  let scored = hit("r1").with_fts(3.0, Some("…annual report…".to_string()));
  fx.engine.send(SearchEvent::HitsAdded(vec![scored]));
  fx.engine.send(SearchEvent::Finished(FinishStatus::Normal));
  events_until_done(&mut stream).await;

  let files = dir.get_file_list();
  assert_eq!(files.len(), 1);
  // Direct child of the query anchor: full proximity bonus plus the match
  // bonus.
  assert_eq!(files[0].search_relevance(), 10000.0 + 30.0);
  assert_eq!(files[0].search_snippet().as_deref(), Some("…annual report…"));

  dir.file_monitor_remove(client);
}

#[tokio::test]
async fn test_duplicate_uri_refreshes_instead_of_duplicating() {
  let fx = fixture();
  let dir = search_dir(&fx.registry, "report");
  let client = ClientId::next();
  let mut stream = dir.file_monitor_add(client, false, AttrMask::empty());

  fx.engine.send(SearchEvent::HitsAdded(vec![hit("same"), hit("same").with_fts(9.0, None)]));
  fx.engine.send(SearchEvent::Finished(FinishStatus::Normal));

  let events = events_until_done(&mut stream).await;
  let adds = events.iter().filter(|e| matches!(e, DirectoryEvent::FilesAdded(_))).count();
  let changes = events.iter().filter(|e| matches!(e, DirectoryEvent::FilesChanged(_))).count();
  assert_eq!(adds, 1);
  assert_eq!(changes, 1);

  let files = dir.get_file_list();
  assert_eq!(files.len(), 1);
  assert_eq!(files[0].search_relevance(), 10000.0 + 90.0);

  dir.file_monitor_remove(client);
}

#[tokio::test]
async fn test_ready_state_is_monotonic_until_reload() {
  let fx = fixture();
  let dir = search_dir(&fx.registry, "report");
  let client = ClientId::next();
  let mut stream = dir.file_monitor_add(client, false, AttrMask::empty());

  fx.engine.send(SearchEvent::Finished(FinishStatus::Normal));
  events_until_done(&mut stream).await;
  assert!(dir.are_all_files_seen());

  tokio::time::sleep(Duration::from_millis(100)).await;
  assert!(dir.are_all_files_seen());

  // Only an explicit reload (or superseding query) invalidates readiness.
  dir.force_reload();
  assert!(!dir.are_all_files_seen());
  assert!(fx.engine.started_queries().len() >= 2);

  fx.engine.send(SearchEvent::Finished(FinishStatus::Normal));
  events_until_done(&mut stream).await;
  assert!(dir.are_all_files_seen());

  dir.file_monitor_remove(client);
}

#[tokio::test]
async fn test_restarting_finish_never_reports_done() {
  let fx = fixture();
  let dir = search_dir(&fx.registry, "report");
  let client = ClientId::next();
  let mut stream = dir.file_monitor_add(client, false, AttrMask::empty());

  fx.engine.send(SearchEvent::HitsAdded(vec![hit("stale")]));
  match next_event(&mut stream).await {
    DirectoryEvent::FilesAdded(_) => {}
    other => panic!("expected files-added, got {other:?}"),
  }

  // An old search winding down must not look like completion of the
  // current one, and its results are dropped.
  fx.engine.send(SearchEvent::Finished(FinishStatus::Restarting));
  expect_no_event(&mut stream).await;
  assert!(!dir.are_all_files_seen());
  assert!(dir.get_file_list().is_empty());

  fx.engine.send(SearchEvent::HitsAdded(vec![hit("fresh")]));
  fx.engine.send(SearchEvent::Finished(FinishStatus::Normal));
  let events = events_until_done(&mut stream).await;
  let names = common::added_names(&events);
  assert_eq!(names.len(), 1);

  let listed: Vec<String> = dir.get_file_list().iter().map(|f| f.name()).collect();
  assert_eq!(listed, vec!["fresh"]);

  dir.file_monitor_remove(client);
}

#[tokio::test]
async fn test_engine_error_surfaces_as_load_error() {
  let fx = fixture();
  let dir = search_dir(&fx.registry, "report");
  let client = ClientId::next();
  let mut stream = dir.file_monitor_add(client, false, AttrMask::empty());

  fx.engine.send(SearchEvent::Error("index unavailable".to_string()));
  match next_event(&mut stream).await {
    DirectoryEvent::LoadError(error) => assert!(error.message().contains("index unavailable")),
    other => panic!("expected load error, got {other:?}"),
  }

  dir.file_monitor_remove(client);
}

#[tokio::test]
async fn test_empty_query_is_immediately_ready_without_engine() {
  let fx = fixture();
  let dir = search_dir(&fx.registry, "   ");
  let client = ClientId::next();
  let mut stream = dir.file_monitor_add(client, false, AttrMask::empty());

  let events = events_until_done(&mut stream).await;
  assert_eq!(common::added_names(&events).len(), 0);
  assert!(dir.are_all_files_seen());
  assert!(dir.get_file_list().is_empty());
  assert!(fx.engine.started_queries().is_empty());

  dir.file_monitor_remove(client);
}

#[tokio::test]
async fn test_full_list_callback_parks_until_ready_and_valid() {
  let fx = fixture();
  let dir = search_dir(&fx.registry, "report");

  let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
  dir
    .call_when_ready(None, AttrMask::INFO, true, CallbackId::next(), move |_, files| {
      let _ = tx.send(files.iter().map(|f| f.name()).collect::<Vec<_>>());
    })
    .unwrap();

  // The pending callback alone is a listener: the engine was started.
  assert_eq!(fx.engine.started_queries().len(), 1);
  assert!(timeout(Duration::from_millis(200), rx.recv()).await.is_err());

  fx.engine.send(SearchEvent::HitsAdded(vec![hit("r1"), hit("r2")]));
  fx.engine.send(SearchEvent::Finished(FinishStatus::Normal));

  let mut names = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
  names.sort();
  assert_eq!(names, vec!["r1", "r2"]);
}

#[tokio::test]
async fn test_last_listener_gone_stops_engine() {
  let fx = fixture();
  let dir = search_dir(&fx.registry, "report");
  let client = ClientId::next();
  let mut stream = dir.file_monitor_add(client, false, AttrMask::empty());

  fx.engine.send(SearchEvent::Finished(FinishStatus::Normal));
  events_until_done(&mut stream).await;

  let stops_before = fx.engine.stop_count();
  dir.file_monitor_remove(client);
  assert!(fx.engine.stop_count() > stops_before);
}
