//! AssetVault Client - Remote asset servers
//!
//! This crate defines the contract every remote backend fulfils, the legacy
//! fixed-field wire format spoken at that boundary, and the closed set of
//! concrete backends the configuration can name.

pub mod backend;
pub mod directory;
pub mod factory;
pub mod wire;

// Re-exports
pub use backend::{AssetServer, BackendError};
pub use directory::DirectoryServer;
pub use factory::BackendFactory;
