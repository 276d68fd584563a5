//! Shared foundation for the manila file manager: configuration, logging,
//! URI schemes and the canonical [`Location`] type.

pub mod config;
pub mod location;
pub mod logging;
pub mod scheme;

pub use config::Config;
pub use location::Location;
