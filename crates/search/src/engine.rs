//! The search engine capability consumed by the search directory.

use tokio::sync::mpsc;

use crate::hit::SearchHit;
use crate::query::Query;

/// How an engine run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishStatus {
  /// The query ran to completion; its results are the current results.
  Normal,
  /// An old run finished only because a newer query superseded it. Its
  /// results are stale and must not be reported as "done" to observers.
  Restarting,
}

/// Events an engine delivers back to its directory.
#[derive(Debug, Clone)]
pub enum SearchEvent {
  /// A batch of newly discovered hits.
  HitsAdded(Vec<SearchHit>),
  /// The engine stopped producing hits.
  Finished(FinishStatus),
  /// The engine failed; surfaced as a load error on the directory.
  Error(String),
}

/// A pluggable query engine.
///
/// Engines are handed to the search directory as trait objects together with
/// the receiving half of their event channel; all result delivery flows
/// through [`SearchEvent`]s, never through return values.
pub trait SearchEngine: Send + Sync {
  /// Replace the active query. Takes effect on the next [`start`](Self::start).
  fn set_query(&self, query: Query);

  /// Begin (or restart) producing hits for the active query.
  fn start(&self);

  /// Stop producing hits. Idempotent; a stopped engine emits nothing.
  fn stop(&self);
}

/// Channel pair used by engine implementations.
pub type EventSender = mpsc::UnboundedSender<SearchEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<SearchEvent>;
