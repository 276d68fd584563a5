//! Pending attribute-fetch queues.
//!
//! Three dedup FIFOs per directory. High priority serves basic info for
//! user-visible requests, low priority serves the speculative classes,
//! extension serves third-party providers. One file is dequeued per
//! scheduling step; a file demotes one tier at a time as its classes for the
//! current tier are exhausted, and falls out entirely once nothing is
//! missing.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crate::attributes::AttrMask;
use crate::file::{File, FileId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueTier {
  High,
  Low,
  Extension,
}

#[derive(Default)]
struct FifoQueue {
  items: VecDeque<Arc<File>>,
  members: HashSet<FileId>,
}

impl FifoQueue {
  /// Enqueue unless already present.
  fn enqueue(&mut self, file: Arc<File>) {
    if self.members.insert(file.id()) {
      self.items.push_back(file);
    }
  }

  fn pop(&mut self) -> Option<Arc<File>> {
    let file = self.items.pop_front()?;
    self.members.remove(&file.id());
    Some(file)
  }

  fn remove(&mut self, id: FileId) {
    if self.members.remove(&id) {
      self.items.retain(|f| f.id() != id);
    }
  }

  fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}

/// The three per-directory work queues.
#[derive(Default)]
pub struct WorkQueues {
  high: FifoQueue,
  low: FifoQueue,
  extension: FifoQueue,
}

impl WorkQueues {
  /// File work always enters at high priority; the pop path demotes it.
  pub fn enqueue(&mut self, file: Arc<File>) {
    self.high.enqueue(file);
  }

  /// Drop a file from every tier, including mid-demotion.
  pub fn remove(&mut self, id: FileId) {
    self.high.remove(id);
    self.low.remove(id);
    self.extension.remove(id);
  }

  pub fn is_empty(&self) -> bool {
    self.high.is_empty() && self.low.is_empty() && self.extension.is_empty()
  }

  /// Pick the next (file, class) to fetch given what callers want.
  ///
  /// Gone files are discarded as they surface. A popped file that has no
  /// missing class at its tier demotes to the next tier instead of being
  /// fetched, so high drains before low before extension.
  pub fn next_fetch(&mut self, wanted_for: impl Fn(&Arc<File>) -> AttrMask) -> Option<(Arc<File>, AttrMask, QueueTier)> {
    loop {
      if let Some(file) = self.high.pop() {
        if file.is_gone() {
          self.remove(file.id());
          continue;
        }
        let missing = file.missing(wanted_for(&file));
        if missing.contains(AttrMask::INFO) {
          return Some((file, AttrMask::INFO, QueueTier::High));
        }
        self.low.enqueue(file);
        continue;
      }

      if let Some(file) = self.low.pop() {
        if file.is_gone() {
          self.remove(file.id());
          continue;
        }
        let missing = file.missing(wanted_for(&file)) & AttrMask::LOW_PRIORITY;
        if let Some(class) = AttrMask::CLASSES.into_iter().find(|c| missing.contains(*c)) {
          return Some((file, class, QueueTier::Low));
        }
        self.extension.enqueue(file);
        continue;
      }

      let file = self.extension.pop()?;
      if file.is_gone() {
        continue;
      }
      if file.missing(wanted_for(&file)).contains(AttrMask::EXTENSION_INFO) {
        return Some((file, AttrMask::EXTENSION_INFO, QueueTier::Extension));
      }
      // Fully satisfied; falls out of the queues.
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::registry::Registry;
  use manila_core::{Config, Location};

  fn wanted(mask: AttrMask) -> impl Fn(&Arc<File>) -> AttrMask {
    move |_| mask
  }

  async fn files(names: &[&str]) -> (Registry, Vec<Arc<File>>) {
    let registry = Registry::new(Config::default());
    let dir = registry.get(&Location::new("file:///queue-test"), true).unwrap();
    let files = names.iter().map(|n| File::new(&dir, *n, false)).collect();
    (registry, files)
  }

  #[tokio::test]
  async fn test_enqueue_is_idempotent() {
    let (_registry, files) = files(&["a"]).await;
    let mut queues = WorkQueues::default();
    queues.enqueue(Arc::clone(&files[0]));
    queues.enqueue(Arc::clone(&files[0]));

    let (file, class, tier) = queues.next_fetch(wanted(AttrMask::INFO)).unwrap();
    assert_eq!(file.id(), files[0].id());
    assert_eq!(class, AttrMask::INFO);
    assert_eq!(tier, QueueTier::High);
    assert!(queues.next_fetch(wanted(AttrMask::empty())).is_none());
  }

  #[tokio::test]
  async fn test_demotion_after_info() {
    let (_registry, files) = files(&["a"]).await;
    let mut queues = WorkQueues::default();

    files[0].mark_failed(AttrMask::INFO);
    queues.enqueue(Arc::clone(&files[0]));

    // INFO already present: demotes to low, where MOUNT is served.
    let (_, class, tier) = queues
      .next_fetch(wanted(AttrMask::INFO | AttrMask::MOUNT))
      .unwrap();
    assert_eq!(class, AttrMask::MOUNT);
    assert_eq!(tier, QueueTier::Low);
  }

  #[tokio::test]
  async fn test_extension_runs_last() {
    let (_registry, files) = files(&["a", "b"]).await;
    let mut queues = WorkQueues::default();

    files[0].mark_failed(AttrMask::INFO);
    queues.enqueue(Arc::clone(&files[0]));
    queues.enqueue(Arc::clone(&files[1]));

    let mask = AttrMask::INFO | AttrMask::EXTENSION_INFO;
    // b still lacks INFO and wins over a's extension-tier work.
    let (file, class, _) = queues.next_fetch(wanted(mask)).unwrap();
    assert_eq!(file.id(), files[1].id());
    assert_eq!(class, AttrMask::INFO);

    let (file, class, tier) = queues.next_fetch(wanted(mask)).unwrap();
    assert_eq!(file.id(), files[0].id());
    assert_eq!(class, AttrMask::EXTENSION_INFO);
    assert_eq!(tier, QueueTier::Extension);
  }

  #[tokio::test]
  async fn test_gone_files_are_discarded() {
    let (_registry, files) = files(&["a"]).await;
    let mut queues = WorkQueues::default();
    queues.enqueue(Arc::clone(&files[0]));
    files[0].mark_gone();

    assert!(queues.next_fetch(wanted(AttrMask::INFO)).is_none());
    assert!(queues.is_empty());
  }

  #[tokio::test]
  async fn test_remove_clears_every_tier() {
    let (_registry, files) = files(&["a"]).await;
    let mut queues = WorkQueues::default();
    queues.enqueue(Arc::clone(&files[0]));
    queues.remove(files[0].id());
    assert!(queues.is_empty());
  }
}
