//! One asynchronously discovered search match, scored against its query.

use chrono::{DateTime, Utc};
use manila_core::Location;

use crate::query::Query;

/// A single match produced by a search engine.
///
/// Hits are queued by the search directory and merged into its file set one
/// at a time; the relevance score and snippet survive the merge on the file
/// entity, the hit itself is discarded.
#[derive(Debug, Clone)]
pub struct SearchHit {
  location: Location,
  modified: Option<DateTime<Utc>>,
  accessed: Option<DateTime<Utc>>,
  fts_rank: f64,
  snippet: Option<String>,
  relevance: f64,
}

impl SearchHit {
  pub fn new(location: Location) -> Self {
    Self {
      location,
      modified: None,
      accessed: None,
      fts_rank: 0.0,
      snippet: None,
      relevance: 0.0,
    }
  }

  pub fn with_times(mut self, modified: Option<DateTime<Utc>>, accessed: Option<DateTime<Utc>>) -> Self {
    self.modified = modified;
    self.accessed = accessed;
    self
  }

  pub fn with_fts(mut self, rank: f64, snippet: Option<String>) -> Self {
    self.fts_rank = rank;
    self.snippet = snippet;
    self
  }

  pub fn location(&self) -> &Location {
    &self.location
  }

  pub fn relevance(&self) -> f64 {
    self.relevance
  }

  pub fn snippet(&self) -> Option<&str> {
    self.snippet.as_deref()
  }

  /// Score this hit against the query that produced it.
  ///
  /// Three independent bonuses: proximity to the query anchor, recency of
  /// use, and full-text match strength.
  pub fn compute_scores(&mut self, query: &Query) {
    self.relevance = self.proximity_bonus(query) + self.recent_bonus(Utc::now()) + self.match_bonus();
    tracing::trace!(uri = %self.location, relevance = self.relevance, "scored hit");
  }

  /// Hits close under the anchor beat distant ones: 10000 minus 1000 per
  /// intervening directory, nothing once ten levels deep or outside the
  /// anchor entirely.
  fn proximity_bonus(&self, query: &Query) -> f64 {
    if !query.location().is_ancestor_of(&self.location) {
      return 0.0;
    }

    let mut dir_count = 0u32;
    let mut parent = self.location.parent();
    while let Some(p) = parent {
      if p == *query.location() {
        break;
      }
      dir_count += 1;
      parent = p.parent();
    }

    if dir_count < 10 {
      10000.0 - 1000.0 * f64::from(dir_count)
    } else {
      0.0
    }
  }

  /// Tiered bonus on whichever of modification/access time is most recent.
  fn recent_bonus(&self, now: DateTime<Utc>) -> f64 {
    let days = |t: Option<DateTime<Utc>>| t.map_or(i64::MAX, |t| (now - t).num_days());
    let t_diff = days(self.modified).min(days(self.accessed));

    match t_diff {
      d if d > 90 => 0.0,
      d if d > 30 => 10.0,
      d if d > 14 => 30.0,
      d if d > 7 => 50.0,
      d if d > 1 => 70.0,
      _ => 100.0,
    }
  }

  fn match_bonus(&self) -> f64 {
    if self.fts_rank > 0.0 {
      (10.0 * self.fts_rank).min(500.0)
    } else {
      0.0
    }
  }
}
