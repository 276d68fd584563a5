//! The manila virtual-directory metadata cache.
//!
//! One [`Registry`] per process maps each location to a single shared
//! [`Directory`]. Callers register one-shot readiness callbacks
//! ([`Directory::call_when_ready`]) or persistent [monitors]
//! ([`Directory::file_monitor_add`]) and receive [`DirectoryEvent`]s as the
//! backend fills the cache. Virtual views (search, recent, network, starred,
//! favorites) are directory variants behind the same contracts.
//!
//! # Architecture
//!
//! - The registry routes each location to the backend variant that handles
//!   it; construction happens once, the instance is shared.
//! - Per-directory state is mutated under short lock-only critical sections;
//!   every observer-visible callback is deferred through the registry's
//!   cooperative [`scheduler`] loop, never invoked in the caller's stack.
//! - Backend I/O runs on spawned tasks guarded by per-directory
//!   cancellation tokens and reports back onto the scheduler loop.
//!
//! [monitors]: monitor::Monitor

pub mod attributes;
pub mod backends;
pub mod directory;
pub mod error;
pub mod events;
pub mod fetch;
pub mod file;
pub mod file_map;
pub mod monitor;
pub mod queue;
pub mod registry;
pub mod request;
pub mod scheduler;

pub use attributes::AttrMask;
pub use backends::recent::{NoWindows, WindowLister};
pub use backends::search::SearchBackend;
pub use backends::tagged::{TagEvent, TagKind, TagManager, TagStore};
pub use directory::{Directory, DirectoryBackend};
pub use error::{LoadError, RequestError};
pub use events::DirectoryEvent;
pub use fetch::{AttrPayload, AttributeFetcher, FsFetcher};
pub use file::{File, FileInfo, FileType};
pub use monitor::{ClientId, EventStream};
pub use registry::{Registry, RegistryBuilder};
pub use request::CallbackId;
