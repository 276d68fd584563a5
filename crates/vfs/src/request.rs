//! Request coordinator bookkeeping for one-shot ready callbacks.
//!
//! A request waits for one file (or the whole directory) to reach a target
//! attribute set. Requests sit in the unsatisfied bucket until their
//! condition holds, move to the ready bucket, and are drained on an idle
//! tick. At most one fire per registration, never synchronously within the
//! registering call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::attributes::AttrMask;
use crate::directory::Directory;
use crate::error::RequestError;
use crate::file::{File, FileId};

/// Caller-supplied identity of one registration.
///
/// Registering the same id again while the first registration is pending is
/// a caller bug and is rejected; cancelling by id is idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

impl CallbackId {
  /// Allocate a process-unique callback identity.
  pub fn next() -> Self {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    Self(NEXT.fetch_add(1, Ordering::Relaxed))
  }
}

/// The closure fired when a request's condition holds.
///
/// Receives the directory and the file snapshot: the target file for
/// file-scoped requests, the full list for wait-for-file-list requests,
/// empty otherwise.
pub type ReadyFn = Box<dyn FnOnce(&Arc<Directory>, Vec<Arc<File>>) + Send>;

pub struct ReadyCallback {
  pub id: CallbackId,
  pub target: Option<Arc<File>>,
  pub request: AttrMask,
  func: Option<ReadyFn>,
}

impl ReadyCallback {
  pub fn new(id: CallbackId, target: Option<Arc<File>>, request: AttrMask, func: ReadyFn) -> Self {
    Self {
      id,
      target,
      request,
      func: Some(func),
    }
  }

  pub fn wants_file_list(&self) -> bool {
    self.request.contains(AttrMask::FILE_LIST)
  }

  /// Invoke the callback with its snapshot. Safe to call once; a cancelled
  /// callback's closure is already gone and this is a no-op.
  pub fn fire(mut self, directory: &Arc<Directory>, files: Vec<Arc<File>>) {
    if let Some(func) = self.func.take() {
      func(directory, files);
    }
  }

  fn bucket_key(&self) -> Option<FileId> {
    self.target.as_ref().map(|f| f.id())
  }
}

impl std::fmt::Debug for ReadyCallback {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ReadyCallback")
      .field("id", &self.id)
      .field("target", &self.target.as_ref().map(|t| t.id()))
      .field("request", &self.request)
      .finish()
  }
}

/// The two-bucket request table of one directory.
#[derive(Default)]
pub struct RequestBook {
  unsatisfied: HashMap<Option<FileId>, Vec<ReadyCallback>>,
  ready: HashMap<Option<FileId>, Vec<ReadyCallback>>,
}

impl RequestBook {
  pub fn contains(&self, id: CallbackId) -> bool {
    self
      .unsatisfied
      .values()
      .chain(self.ready.values())
      .flatten()
      .any(|cb| cb.id == id)
  }

  /// File a new request. Duplicate identities are rejected, not merged.
  pub fn insert(&mut self, callback: ReadyCallback) -> Result<(), RequestError> {
    if self.contains(callback.id) {
      return Err(RequestError::Duplicate(callback.id));
    }
    self
      .unsatisfied
      .entry(callback.bucket_key())
      .or_default()
      .push(callback);
    Ok(())
  }

  /// Drop a request from either bucket. Unknown ids are a silent no-op:
  /// callers use cancellation unconditionally as cleanup.
  pub fn cancel(&mut self, id: CallbackId) -> bool {
    for bucket in [&mut self.unsatisfied, &mut self.ready] {
      let found = bucket
        .iter()
        .find_map(|(key, list)| list.iter().any(|cb| cb.id == id).then_some(*key));
      if let Some(key) = found {
        let now_empty = match bucket.get_mut(&key) {
          Some(list) => {
            list.retain(|cb| cb.id != id);
            list.is_empty()
          }
          None => false,
        };
        if now_empty {
          bucket.remove(&key);
        }
        return true;
      }
    }
    false
  }

  /// Move every satisfied request to the ready bucket. Returns whether any
  /// moved (the caller then schedules a drain).
  pub fn promote(&mut self, is_satisfied: impl Fn(&ReadyCallback) -> bool) -> bool {
    let mut moved = false;
    for (key, list) in std::mem::take(&mut self.unsatisfied) {
      let (satisfied, waiting): (Vec<_>, Vec<_>) = list.into_iter().partition(&is_satisfied);
      if !satisfied.is_empty() {
        moved = true;
        self.ready.entry(key).or_default().extend(satisfied);
      }
      if !waiting.is_empty() {
        self.unsatisfied.insert(key, waiting);
      }
    }
    moved
  }

  /// Swap out the ready bucket for draining.
  pub fn take_ready(&mut self) -> Vec<ReadyCallback> {
    std::mem::take(&mut self.ready).into_values().flatten().collect()
  }

  /// Union of attribute classes unsatisfied requests still want, for the
  /// fetch pipeline's "does anybody care" checks.
  pub fn wanted_attrs(&self) -> AttrMask {
    self
      .unsatisfied
      .values()
      .flatten()
      .fold(AttrMask::empty(), |mask, cb| mask | cb.request)
  }

  /// Classes wanted for one specific file: its own requests plus every
  /// whole-directory request.
  pub fn wanted_for(&self, id: FileId) -> AttrMask {
    let mut mask = AttrMask::empty();
    for key in [Some(id), None] {
      if let Some(list) = self.unsatisfied.get(&key) {
        mask = list.iter().fold(mask, |mask, cb| mask | cb.request);
      }
    }
    mask
  }

  pub fn has_file_list_request(&self) -> bool {
    self.unsatisfied.values().flatten().any(|cb| cb.wants_file_list())
  }

  pub fn is_empty(&self) -> bool {
    self.unsatisfied.is_empty() && self.ready.is_empty()
  }
}
