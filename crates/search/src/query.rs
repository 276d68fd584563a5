//! The query a search directory is answering.

use manila_core::Location;

/// A search query: free text anchored at a location.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
  text: String,
  location: Location,
  show_hidden: bool,
}

impl Query {
  pub fn new(text: impl Into<String>, location: Location) -> Self {
    Self {
      text: text.into(),
      location,
      show_hidden: false,
    }
  }

  /// The raw query text.
  pub fn text(&self) -> &str {
    &self.text
  }

  /// The location the search is anchored at; hits below it score a
  /// proximity bonus.
  pub fn location(&self) -> &Location {
    &self.location
  }

  /// Case-folded terms; every term must match for a name to be a hit.
  pub fn terms(&self) -> Vec<String> {
    self.text.split_whitespace().map(|t| t.to_lowercase()).collect()
  }

  /// A query with no terms matches nothing and never reaches an engine.
  pub fn is_empty(&self) -> bool {
    self.text.trim().is_empty()
  }

  pub fn show_hidden(&self) -> bool {
    self.show_hidden
  }

  /// Widened by the directory when any monitor wants hidden files.
  pub fn set_show_hidden(&mut self, show_hidden: bool) {
    self.show_hidden = show_hidden;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_terms_are_case_folded() {
    let query = Query::new("Annual REPORT", Location::new("file:///docs"));
    assert_eq!(query.terms(), vec!["annual", "report"]);
    assert!(!query.is_empty());
  }

  #[test]
  fn test_whitespace_query_is_empty() {
    assert!(Query::new("   ", Location::new("file:///")).is_empty());
  }
}
