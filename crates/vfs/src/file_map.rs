//! The per-directory file entity cache: a name index over an
//! insertion-ordered sequence.
//!
//! The index and the sequence always agree: every indexed entry appears
//! exactly once in the sequence and vice versa. Renames go through the
//! two-phase `begin_name_change` / `end_name_change` pair so the index never
//! holds two entries for one name mid-mutation.

use std::collections::HashMap;
use std::sync::Arc;

use crate::file::{File, FileId};

#[derive(Default)]
pub struct FileMap {
  by_name: HashMap<String, Arc<File>>,
  order: Vec<Arc<File>>,
}

impl FileMap {
  /// Insert a file under its current name. Returns false (and leaves the
  /// map untouched) if the name is already taken.
  pub fn add(&mut self, file: Arc<File>) -> bool {
    let name = file.name();
    if self.by_name.contains_key(&name) {
      return false;
    }
    self.by_name.insert(name, Arc::clone(&file));
    self.order.push(file);
    true
  }

  /// Remove a file from index and sequence. Unknown files are a no-op.
  pub fn remove(&mut self, file: &Arc<File>) -> bool {
    let name = file.name();
    match self.by_name.get(&name) {
      Some(existing) if existing.id() == file.id() => {
        self.by_name.remove(&name);
      }
      // The index entry may be absent mid-rename; fall through to the
      // sequence either way.
      _ => {}
    }
    let before = self.order.len();
    self.order.retain(|f| f.id() != file.id());
    before != self.order.len()
  }

  pub fn find_by_name(&self, name: &str) -> Option<Arc<File>> {
    self.by_name.get(name).cloned()
  }

  pub fn contains(&self, id: FileId) -> bool {
    self.order.iter().any(|f| f.id() == id)
  }

  /// Insertion-order snapshot, stable for UI iteration.
  pub fn list(&self) -> Vec<Arc<File>> {
    self.order.clone()
  }

  pub fn iter(&self) -> impl Iterator<Item = &Arc<File>> {
    self.order.iter()
  }

  pub fn len(&self) -> usize {
    self.order.len()
  }

  pub fn is_empty(&self) -> bool {
    self.order.is_empty()
  }

  pub fn clear(&mut self) -> Vec<Arc<File>> {
    self.by_name.clear();
    std::mem::take(&mut self.order)
  }

  /// Phase one of a rename: drop the index entry while keeping the
  /// sequence slot, so mutating the name cannot collide with itself.
  pub fn begin_name_change(&mut self, file: &Arc<File>) {
    let name = file.name();
    if self.by_name.get(&name).is_some_and(|f| f.id() == file.id()) {
      self.by_name.remove(&name);
    }
  }

  /// Phase two: reindex under the (already mutated) new name. Returns false
  /// if the new name collides with another entry; the file then stays in
  /// the sequence but unindexed, which the caller must resolve.
  pub fn end_name_change(&mut self, file: &Arc<File>) -> bool {
    let name = file.name();
    if self.by_name.contains_key(&name) {
      return false;
    }
    self.by_name.insert(name, Arc::clone(file));
    true
  }

  /// Index/sequence agreement, checked by tests after mutation sequences.
  #[cfg(test)]
  pub fn is_consistent(&self) -> bool {
    self.by_name.len() == self.order.len()
      && self
        .by_name
        .values()
        .all(|f| self.order.iter().filter(|o| o.id() == f.id()).count() == 1)
  }
}
