//! Canonical location handling.
//!
//! A [`Location`] is a normalized URI string. Normalization is intentionally
//! shallow (scheme lowercasing, trailing-slash trimming): the core treats
//! locations as opaque keys, and full URI handling belongs to the shell that
//! produces them.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::scheme;

/// A canonical URI identifying a directory or file.
///
/// Equal locations always compare equal as registry keys, which is what the
/// one-directory-per-location invariant hangs on.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location(String);

impl Location {
  /// Normalize a URI string into a canonical location.
  pub fn new(uri: impl Into<String>) -> Self {
    let uri = uri.into();
    let (scheme, rest) = match uri.split_once(':') {
      Some((s, rest)) => (s.to_ascii_lowercase(), rest),
      None => return Self(uri),
    };

    // Keep "scheme:///" roots intact, trim the trailing slash elsewhere.
    let mut normalized = format!("{scheme}:{rest}");
    while normalized.ends_with('/') && !normalized.ends_with(":///") {
      normalized.pop();
    }
    Self(normalized)
  }

  /// A location for a local filesystem path.
  pub fn from_path(path: &Path) -> Self {
    Self::new(format!("file://{}", path.display()))
  }

  /// The URI scheme, or `""` for scheme-less strings.
  pub fn scheme(&self) -> &str {
    self.0.split_once(':').map_or("", |(s, _)| s)
  }

  /// Whether this location lives on the local filesystem.
  pub fn is_native(&self) -> bool {
    scheme::is_native(self.scheme())
  }

  /// The full URI string.
  pub fn as_uri(&self) -> &str {
    &self.0
  }

  /// The last path segment, or `None` for a root.
  pub fn basename(&self) -> Option<&str> {
    let rest = self.0.split_once(":///").map(|(_, r)| r)?;
    if rest.is_empty() {
      return None;
    }
    Some(rest.rsplit('/').next().unwrap_or(rest))
  }

  /// The parent location, or `None` for a root.
  pub fn parent(&self) -> Option<Location> {
    let (prefix, rest) = self.0.split_once(":///")?;
    if rest.is_empty() {
      return None;
    }
    match rest.rsplit_once('/') {
      Some((parent, _)) => Some(Location::new(format!("{prefix}:///{parent}"))),
      None => Some(Location::new(format!("{prefix}:///"))),
    }
  }

  /// A child of this location.
  pub fn child(&self, name: &str) -> Location {
    if self.0.ends_with(":///") {
      Location::new(format!("{}{}", self.0, name))
    } else {
      Location::new(format!("{}/{}", self.0, name))
    }
  }

  /// The local path, if this is a native location.
  pub fn to_path(&self) -> Option<PathBuf> {
    if !self.is_native() {
      return None;
    }
    self.0.split_once("://").map(|(_, p)| PathBuf::from(p))
  }

  /// Whether `self` is an ancestor of `other`.
  pub fn is_ancestor_of(&self, other: &Location) -> bool {
    other.0.len() > self.0.len()
      && other.0.starts_with(&self.0)
      && (self.0.ends_with(":///") || other.0.as_bytes()[self.0.len()] == b'/')
  }
}

impl fmt::Display for Location {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl fmt::Debug for Location {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Location({})", self.0)
  }
}

impl From<&str> for Location {
  fn from(uri: &str) -> Self {
    Location::new(uri)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn test_normalization() {
    assert_eq!(Location::new("file:///tmp/"), Location::new("file:///tmp"));
    assert_eq!(Location::new("FILE:///tmp"), Location::new("file:///tmp"));
    assert_eq!(Location::new("recent:///").as_uri(), "recent:///");
  }

  #[test]
  fn test_parent_and_basename() {
    let loc = Location::new("file:///home/user/docs");
    assert_eq!(loc.basename(), Some("docs"));
    assert_eq!(loc.parent(), Some(Location::new("file:///home/user")));
    assert_eq!(Location::new("file:///").parent(), None);
    assert_eq!(Location::new("file:///").basename(), None);
  }

  #[test]
  fn test_child_join() {
    assert_eq!(
      Location::new("file:///tmp").child("a.txt"),
      Location::new("file:///tmp/a.txt")
    );
    assert_eq!(
      Location::new("recent:///").child("x"),
      Location::new("recent:///x")
    );
  }

  #[test]
  fn test_ancestor() {
    let root = Location::new("file:///home");
    assert!(root.is_ancestor_of(&Location::new("file:///home/user/f.txt")));
    assert!(!root.is_ancestor_of(&Location::new("file:///homestead")));
    assert!(!root.is_ancestor_of(&root));
  }

  #[test]
  fn test_path_round_trip() {
    let loc = Location::from_path(Path::new("/var/log"));
    assert_eq!(loc.to_path(), Some(PathBuf::from("/var/log")));
    assert_eq!(Location::new("search:///q").to_path(), None);
  }
}
