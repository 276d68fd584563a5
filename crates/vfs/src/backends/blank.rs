//! The terminal no-op variant.
//!
//! A location with no meaningful provider still satisfies the full
//! directory contract: always ready, never any files, callbacks fire on the
//! next idle tick with an empty snapshot.

use std::any::Any;
use std::sync::Arc;

use crate::directory::{Directory, DirectoryBackend};
use crate::error::RequestError;
use crate::file::File;
use crate::monitor::{ClientId, Monitor};
use crate::request::{CallbackId, ReadyCallback};

pub struct BlankBackend;

impl DirectoryBackend for BlankBackend {
  fn as_any(&self) -> &dyn Any {
    self
  }

  fn contains_file(&self, _dir: &Arc<Directory>, _file: &Arc<File>) -> bool {
    false
  }

  fn are_all_files_seen(&self, _dir: &Arc<Directory>) -> bool {
    true
  }

  fn call_when_ready(&self, dir: &Arc<Directory>, callback: ReadyCallback) -> Result<(), RequestError> {
    let dir = Arc::clone(dir);
    dir.scheduler().clone().post(move || {
      let files = callback.target.as_ref().map(|f| vec![Arc::clone(f)]).unwrap_or_default();
      callback.fire(&dir, files);
    });
    Ok(())
  }

  fn cancel_callback(&self, _dir: &Arc<Directory>, _id: CallbackId) {}

  fn on_monitor_added(&self, _dir: &Arc<Directory>, _client: ClientId) {}

  fn on_monitor_removed(&self, _dir: &Arc<Directory>, _monitor: Monitor) {}

  fn get_file_list(&self, _dir: &Arc<Directory>) -> Vec<Arc<File>> {
    Vec::new()
  }

  fn force_reload(&self, _dir: &Arc<Directory>) {}
}
