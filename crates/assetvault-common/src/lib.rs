//! AssetVault Common - Shared types and utilities
//!
//! This crate provides the asset data model, error definitions, and
//! configuration structures used across all AssetVault components.

pub mod config;
pub mod error;
pub mod types;

pub use config::{BackendConfig, Config, LocalStoreConfig, WalConfig};
pub use error::{BackendFailure, Error, Result};
pub use types::*;
