//! URI schemes recognized by the directory provider dispatch.
//!
//! Schemes are opaque strings everywhere else in the core; only the provider
//! predicates and a few composite backends interpret them.

/// Plain local filesystem.
pub const FILE: &str = "file";

/// Search results for the active query.
pub const SEARCH: &str = "search";

/// Recently used documents plus recently used windows.
pub const RECENT: &str = "recent";

/// The backing store of recently used documents the recent view wraps.
pub const RECENT_FILES: &str = "recent-files";

/// The composite network view (remote mounts + discovered places).
pub const NETWORK: &str = "network";

/// Raw network place discovery, one of the network view's two backends.
pub const NETWORK_PLACES: &str = "network-places";

/// Local drives and mounts, the network view's other backend.
pub const COMPUTER: &str = "computer";

/// Starred files.
pub const STARRED: &str = "starred";

/// Favorite files (legacy alias of starring, kept as its own view).
pub const FAVORITES: &str = "favorites";

/// Trash can.
pub const TRASH: &str = "trash";

/// Disc burning staging area.
pub const BURN: &str = "burn";

/// Elevated-privilege access to local files.
pub const ADMIN: &str = "admin";

/// Marker scheme for synthetic directories that have no provider of their own.
pub const BLANK: &str = "x-manila-blank";

/// Schemes manila invents for its own virtual views. Files living under one
/// of these never correspond to a location another application could open.
pub fn is_internal(scheme: &str) -> bool {
  matches!(
    scheme,
    SEARCH | RECENT | RECENT_FILES | NETWORK | NETWORK_PLACES | COMPUTER | STARRED | FAVORITES | BURN | BLANK
  )
}

/// Whether the scheme maps directly onto the local filesystem.
pub fn is_native(scheme: &str) -> bool {
  matches!(scheme, FILE | ADMIN)
}
