//! End-to-end coverage of the registry, the request coordinator and the
//! plain backend's load cycle.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{added_names, events_until_done, expect_no_event, FakeFetcher, WAIT};
use manila_core::{Config, Location};
use manila_vfs::{AttrMask, AttributeFetcher, CallbackId, ClientId, DirectoryEvent, Registry, RequestError};
use pretty_assertions::assert_eq;
use tokio::time::timeout;

fn registry_with(fetcher: &Arc<FakeFetcher>) -> Registry {
  Registry::builder(Config::default())
    .fetcher(Arc::clone(fetcher) as Arc<dyn AttributeFetcher>)
    .build()
}

#[tokio::test]
async fn test_listing_delivers_files_in_insertion_order() {
  let fetcher = FakeFetcher::new();
  let location = Location::new("file:///tmp");
  fetcher.set_names(location.clone(), &["alpha", "beta", "gamma"]);
  let registry = registry_with(&fetcher);

  let dir = registry.get(&location, true).unwrap();
  let client = ClientId::next();
  let mut stream = dir.file_monitor_add(client, false, AttrMask::empty());

  let events = events_until_done(&mut stream).await;
  assert_eq!(added_names(&events), vec!["alpha", "beta", "gamma"]);

  let listed: Vec<String> = dir.get_file_list().iter().map(|f| f.name()).collect();
  assert_eq!(listed, vec!["alpha", "beta", "gamma"]);
  assert!(dir.are_all_files_seen());
  assert!(dir.is_not_empty());

  dir.file_monitor_remove(client);
}

#[tokio::test]
async fn test_call_when_ready_fires_exactly_once_for_late_info() {
  let fetcher = FakeFetcher::new();
  let location = Location::new("file:///tmp/docs");
  fetcher.set_names(location.clone(), &[]);
  let registry = registry_with(&fetcher);

  let dir = registry.get(&location, true).unwrap();
  let file = registry.get_file(&location.child("report.txt"));
  assert!(!file.is_ready(AttrMask::INFO));

  let fired = Arc::new(AtomicUsize::new(0));
  let fired_in_callback = Arc::clone(&fired);
  let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
  dir
    .call_when_ready(Some(Arc::clone(&file)), AttrMask::INFO, false, CallbackId::next(), move |_, files| {
      fired_in_callback.fetch_add(1, Ordering::SeqCst);
      let _ = tx.send(files);
    })
    .unwrap();

  // Registration returns before the callback runs.
  assert_eq!(fired.load(Ordering::SeqCst), 0);

  let files = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
  assert_eq!(files.len(), 1);
  assert!(files[0].is_ready(AttrMask::INFO));

  tokio::time::sleep(Duration::from_millis(200)).await;
  assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_wait_for_full_list_passes_snapshot() {
  let fetcher = FakeFetcher::new();
  let location = Location::new("file:///tmp/full");
  fetcher.set_names(location.clone(), &["one", "two"]);
  let registry = registry_with(&fetcher);

  let dir = registry.get(&location, true).unwrap();
  let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
  dir
    .call_when_ready(None, AttrMask::INFO, true, CallbackId::next(), move |_, files| {
      let _ = tx.send(files.iter().map(|f| f.name()).collect::<Vec<_>>());
    })
    .unwrap();

  let names = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
  assert_eq!(names, vec!["one", "two"]);
}

#[tokio::test]
async fn test_duplicate_registration_is_rejected_not_queued() {
  let fetcher = FakeFetcher::new();
  let location = Location::new("file:///tmp/dup");
  fetcher.set_names(location.clone(), &[]);
  let registry = registry_with(&fetcher);

  let dir = registry.get(&location, true).unwrap();
  let file = registry.get_file(&location.child("a"));

  let id = CallbackId::next();
  let count = Arc::new(AtomicUsize::new(0));
  let count_a = Arc::clone(&count);
  let count_b = Arc::clone(&count);
  dir
    .call_when_ready(Some(Arc::clone(&file)), AttrMask::INFO, false, id, move |_, _| {
      count_a.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();
  let second = dir.call_when_ready(Some(file), AttrMask::INFO, false, id, move |_, _| {
    count_b.fetch_add(1, Ordering::SeqCst);
  });
  assert!(matches!(second, Err(RequestError::Duplicate(_))));

  tokio::time::sleep(Duration::from_millis(300)).await;
  assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancelled_callback_never_fires() {
  let fetcher = FakeFetcher::new();
  let location = Location::new("file:///tmp/cancel");
  fetcher.set_names(location.clone(), &[]);
  let registry = registry_with(&fetcher);

  let dir = registry.get(&location, true).unwrap();
  let file = registry.get_file(&location.child("a"));

  let id = CallbackId::next();
  dir
    .call_when_ready(Some(file), AttrMask::INFO, false, id, |_, _| {
      panic!("cancelled callback fired");
    })
    .unwrap();
  dir.cancel_callback(id);
  // Idempotent, including for ids that never existed.
  dir.cancel_callback(id);
  dir.cancel_callback(CallbackId::next());

  tokio::time::sleep(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_load_error_leaves_directory_usable() {
  let fetcher = FakeFetcher::new();
  let location = Location::new("file:///tmp/flaky");
  fetcher.set_names(location.clone(), &["late"]);
  fetcher.set_failing(true);
  let registry = registry_with(&fetcher);

  let dir = registry.get(&location, true).unwrap();
  let client = ClientId::next();
  let mut stream = dir.file_monitor_add(client, false, AttrMask::empty());

  match common::next_event(&mut stream).await {
    DirectoryEvent::LoadError(error) => assert!(error.message().contains("unavailable")),
    other => panic!("expected load error, got {other:?}"),
  }
  assert!(!dir.are_all_files_seen());

  fetcher.set_failing(false);
  dir.force_reload();
  let events = events_until_done(&mut stream).await;
  assert_eq!(added_names(&events), vec!["late"]);
  assert!(dir.are_all_files_seen());

  dir.file_monitor_remove(client);
}

#[tokio::test]
async fn test_two_registries_are_independent() {
  let fetcher = FakeFetcher::new();
  let location = Location::new("file:///tmp/shared-name");
  fetcher.set_names(location.clone(), &[]);

  let registry_a = registry_with(&fetcher);
  let registry_b = registry_with(&fetcher);

  let a = registry_a.get(&location, true).unwrap();
  let b = registry_b.get(&location, true).unwrap();
  assert!(!Arc::ptr_eq(&a, &b));
}

#[tokio::test]
async fn test_quiet_directory_emits_nothing() {
  let fetcher = FakeFetcher::new();
  let location = Location::new("file:///tmp/quiet");
  fetcher.set_names(location.clone(), &[]);
  let registry = registry_with(&fetcher);

  let dir = registry.get(&location, true).unwrap();
  let client = ClientId::next();
  let mut stream = dir.file_monitor_add(client, false, AttrMask::empty());
  events_until_done(&mut stream).await;

  expect_no_event(&mut stream).await;
  dir.file_monitor_remove(client);
}
