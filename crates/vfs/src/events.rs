//! Events a directory delivers to its monitors.

use std::sync::Arc;

use crate::error::LoadError;
use crate::file::File;

/// One state transition of a directory's file set.
///
/// Events are emitted in the order operations are applied to the file cache;
/// within one load cycle, `DoneLoading` never precedes the cycle's
/// `FilesAdded` emissions.
#[derive(Debug, Clone)]
pub enum DirectoryEvent {
  /// Files newly known to belong to the directory.
  FilesAdded(Vec<Arc<File>>),
  /// Files whose attributes changed, or which no longer belong to the
  /// directory (check [`File::is_gone`] / membership to tell the two apart).
  FilesChanged(Vec<Arc<File>>),
  /// The current load cycle delivered everything it knows about.
  DoneLoading,
  /// The backend failed; the directory stays usable for a reload.
  LoadError(LoadError),
}
