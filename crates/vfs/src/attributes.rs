//! Attribute classes a caller can wait on.

use bitflags::bitflags;

bitflags! {
  /// Which attribute classes a request needs before it is satisfied.
  ///
  /// `FILE_LIST` is a pseudo-attribute: it is never "fetched" for a file,
  /// it marks a request that also waits for the directory's full listing.
  #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
  pub struct AttrMask: u32 {
    const INFO            = 1 << 0;
    const DIRECTORY_COUNT = 1 << 1;
    const DEEP_COUNT      = 1 << 2;
    const THUMBNAIL       = 1 << 3;
    const MOUNT           = 1 << 4;
    const FILESYSTEM_INFO = 1 << 5;
    const EXTENSION_INFO  = 1 << 6;
    const FILE_LIST       = 1 << 7;
  }
}

impl AttrMask {
  /// The fetchable classes, high-priority first. `INFO` is fetched from the
  /// high-priority queue, `EXTENSION_INFO` only from the extension queue,
  /// everything else from the low-priority queue.
  pub const CLASSES: [AttrMask; 7] = [
    AttrMask::INFO,
    AttrMask::DIRECTORY_COUNT,
    AttrMask::FILESYSTEM_INFO,
    AttrMask::MOUNT,
    AttrMask::DEEP_COUNT,
    AttrMask::THUMBNAIL,
    AttrMask::EXTENSION_INFO,
  ];

  /// The classes fetched from the low-priority queue.
  pub const LOW_PRIORITY: AttrMask = AttrMask::DIRECTORY_COUNT
    .union(AttrMask::FILESYSTEM_INFO)
    .union(AttrMask::MOUNT)
    .union(AttrMask::DEEP_COUNT)
    .union(AttrMask::THUMBNAIL);

  /// The fetchable part of this mask (everything but `FILE_LIST`).
  pub fn fetchable(self) -> AttrMask {
    self & !AttrMask::FILE_LIST
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_classes_cover_every_fetchable_bit() {
    let mut union = AttrMask::empty();
    for class in AttrMask::CLASSES {
      union |= class;
    }
    assert_eq!(union | AttrMask::FILE_LIST, AttrMask::all());
  }

  #[test]
  fn test_fetchable_strips_file_list() {
    let mask = AttrMask::INFO | AttrMask::FILE_LIST;
    assert_eq!(mask.fetchable(), AttrMask::INFO);
  }
}
