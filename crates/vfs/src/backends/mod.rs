//! Directory backend variants.
//!
//! Each variant implements [`DirectoryBackend`](crate::directory::DirectoryBackend)
//! and is chosen once by provider dispatch. `plain` owns the full
//! coordinator/queue machinery; the virtual variants compute their file sets
//! by delegating to backing directories or external capabilities.

pub mod blank;
pub mod network;
pub mod plain;
pub mod recent;
pub mod search;
pub mod tagged;
