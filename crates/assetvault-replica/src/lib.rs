//! AssetVault Replica - Replication orchestrator
//!
//! Ties the local content store, the write-intent log and the remote
//! backend groups together:
//! - `AssetReader`: local lookup, then a single-flight remote fetch that
//!   races each group's backends and falls back group by group
//! - `AssetWriter`: per-id exclusive writes to the local store and upstream,
//!   guarded by a write-intent slot, with crash replay at startup
//! - `StoreBuilder`: assembles all of the above from configuration

pub mod builder;
pub mod reader;
pub mod topology;
pub mod writer;

#[cfg(test)]
pub(crate) mod mock;

// Re-exports
pub use builder::{ReplicatedStore, StoreBuilder};
pub use reader::{AssetReader, CacheRule, ReadStats};
pub use topology::{BackendGroup, BackendTopology};
pub use writer::{AssetWriter, ReplayReport};
