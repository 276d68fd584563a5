//! Error types for the directory cache.

use crate::request::CallbackId;

/// Errors from the request coordinator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RequestError {
  /// The same callback identity was registered again before the first
  /// registration fired. The duplicate is rejected, not queued twice.
  #[error("callback {0:?} is already pending on this directory")]
  Duplicate(CallbackId),
}

/// A normalized backend failure, carried by the load-error event.
///
/// Backend-specific error codes never cross the core boundary; whatever went
/// wrong is reduced to a descriptive payload here. The directory stays usable
/// and a later `force_reload` retries from scratch.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct LoadError {
  message: String,
}

impl LoadError {
  pub fn new(message: impl Into<String>) -> Self {
    Self { message: message.into() }
  }

  pub fn io(error: &std::io::Error) -> Self {
    Self { message: error.to_string() }
  }

  pub fn message(&self) -> &str {
    &self.message
  }
}
