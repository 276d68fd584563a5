//! The attribute-fetch capability and its real-filesystem implementation.
//!
//! Backends never talk to storage directly; they go through an
//! [`AttributeFetcher`], which keeps virtual directories, tests and the real
//! filesystem behind one seam.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use manila_core::Location;

use crate::attributes::AttrMask;
use crate::error::LoadError;
use crate::file::{DeepCount, FileInfo, FileType, FilesystemInfo};

/// One fetched attribute class.
#[derive(Debug, Clone)]
pub enum AttrPayload {
  Info(FileInfo),
  DirectoryCount(usize),
  DeepCount(DeepCount),
  Thumbnail(Option<PathBuf>),
  Mount(Option<String>),
  FilesystemInfo(FilesystemInfo),
  ExtensionInfo(HashMap<String, String>),
}

/// Per-attribute-class async fetch operations consumed by the work queues,
/// plus directory listing.
#[async_trait]
pub trait AttributeFetcher: Send + Sync {
  /// Enumerate a directory's entries.
  async fn list(&self, location: &Location) -> Result<Vec<FileInfo>, LoadError>;

  /// Fetch one attribute class for one item. `class` is always a single
  /// fetchable bit.
  async fn fetch(&self, location: &Location, class: AttrMask) -> Result<AttrPayload, LoadError>;
}

/// The local-filesystem fetcher.
pub struct FsFetcher;

#[async_trait]
impl AttributeFetcher for FsFetcher {
  async fn list(&self, location: &Location) -> Result<Vec<FileInfo>, LoadError> {
    let path = location
      .to_path()
      .ok_or_else(|| LoadError::new(format!("{location} is not listable on the local filesystem")))?;

    let mut entries = tokio::fs::read_dir(&path).await.map_err(|e| LoadError::io(&e))?;
    let mut infos = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| LoadError::io(&e))? {
      let name = entry.file_name().to_string_lossy().into_owned();
      let info = match entry.metadata().await {
        Ok(meta) => file_info_from_metadata(name, &meta),
        Err(_) => FileInfo {
          name,
          ..FileInfo::default()
        },
      };
      infos.push(info);
    }
    Ok(infos)
  }

  async fn fetch(&self, location: &Location, class: AttrMask) -> Result<AttrPayload, LoadError> {
    let path = location
      .to_path()
      .ok_or_else(|| LoadError::new(format!("{location} has no local path")))?;

    if class == AttrMask::INFO {
      let meta = tokio::fs::symlink_metadata(&path).await.map_err(|e| LoadError::io(&e))?;
      let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
      Ok(AttrPayload::Info(file_info_from_metadata(name, &meta)))
    } else if class == AttrMask::DIRECTORY_COUNT {
      let mut entries = tokio::fs::read_dir(&path).await.map_err(|e| LoadError::io(&e))?;
      let mut count = 0usize;
      while entries.next_entry().await.map_err(|e| LoadError::io(&e))?.is_some() {
        count += 1;
      }
      Ok(AttrPayload::DirectoryCount(count))
    } else if class == AttrMask::DEEP_COUNT {
      deep_count(path).await
    } else if class == AttrMask::THUMBNAIL {
      Ok(AttrPayload::Thumbnail(None))
    } else if class == AttrMask::MOUNT {
      Ok(AttrPayload::Mount(None))
    } else if class == AttrMask::FILESYSTEM_INFO {
      // Just enough to answer "can this be written": a real statfs lives
      // behind platform bindings the core does not carry.
      let meta = tokio::fs::metadata(&path).await.map_err(|e| LoadError::io(&e))?;
      Ok(AttrPayload::FilesystemInfo(FilesystemInfo {
        fs_type: "local".to_string(),
        read_only: meta.permissions().readonly(),
      }))
    } else if class == AttrMask::EXTENSION_INFO {
      Ok(AttrPayload::ExtensionInfo(HashMap::new()))
    } else {
      Err(LoadError::new(format!("unknown attribute class {class:?}")))
    }
  }
}

fn file_info_from_metadata(name: String, meta: &std::fs::Metadata) -> FileInfo {
  let file_type = if meta.file_type().is_symlink() {
    FileType::Symlink
  } else if meta.is_dir() {
    FileType::Directory
  } else {
    FileType::Regular
  };

  FileInfo {
    is_hidden: name.starts_with('.'),
    name,
    file_type,
    size: meta.len(),
    modified: meta.modified().ok().map(to_datetime),
    accessed: meta.accessed().ok().map(to_datetime),
    ..FileInfo::default()
  }
}

async fn deep_count(root: PathBuf) -> Result<AttrPayload, LoadError> {
  let mut counts = DeepCount::default();
  let mut stack = vec![root];

  while let Some(dir) = stack.pop() {
    let mut entries = match tokio::fs::read_dir(&dir).await {
      Ok(entries) => entries,
      Err(_) => continue,
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
      match entry.metadata().await {
        Ok(meta) if meta.is_dir() => {
          counts.directories += 1;
          stack.push(entry.path());
        }
        Ok(meta) => {
          counts.files += 1;
          counts.bytes += meta.len();
        }
        Err(_) => counts.files += 1,
      }
    }
    tokio::task::yield_now().await;
  }

  Ok(AttrPayload::DeepCount(counts))
}

fn to_datetime(time: std::time::SystemTime) -> DateTime<Utc> {
  time.into()
}
