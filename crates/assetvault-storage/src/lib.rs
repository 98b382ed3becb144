//! AssetVault Storage Engine - Local durability primitives
//!
//! This crate implements the on-disk half of AssetVault:
//! - Write-intent log (fixed slot file of ids still owed upstream)
//! - Local content store (UUID-sharded directory tree, one file per asset)
//! - Asset filters used for bulk purges
//! - One-way availability state shared by both stores

pub mod filter;
pub mod raw_io;
pub mod state;
pub mod store;
pub mod wal;

// Re-exports
pub use filter::AssetFilter;
pub use raw_io::RawFile;
pub use state::Availability;
pub use store::{ASSET_FILE_EXTENSION, DiskStore, SHARD_DEPTH};
pub use wal::{PendingUpload, SLOT_SIZE, Slot, WAL_MAGIC, WriteIntentLog};
