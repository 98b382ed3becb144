//! Error types for AssetVault
//!
//! This module defines the common error types used throughout the system.
//! Local, recoverable conditions such as absence or corrupt cache records are
//! normally absorbed by the component that sees them; everything here is
//! what a caller may have to act on.

use crate::types::AssetId;
use thiserror::Error;

/// Common result type for AssetVault operations
pub type Result<T> = std::result::Result<T, Error>;

/// One backend's failure inside an aggregate replication error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendFailure {
    /// Name of the backend that failed
    pub backend: String,
    /// Rendered cause
    pub cause: String,
    /// The backend reported that it already holds the asset
    pub already_exists: bool,
}

impl std::fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.backend, self.cause)
    }
}

/// Common error type for AssetVault
#[derive(Debug, Error)]
pub enum Error {
    // Storage errors
    #[error("disk I/O error: {0}")]
    DiskIo(#[from] std::io::Error),

    #[error("asset not found: {0}")]
    NotFound(AssetId),

    #[error("asset already exists: {0}")]
    AlreadyExists(AssetId),

    #[error("storage environment failure: {0}")]
    Environment(String),

    #[error("{subsystem} is disabled: {reason}")]
    Disabled { subsystem: &'static str, reason: String },

    // Durability errors
    #[error("write cache full: all {slots} slots are pending upload")]
    WriteCacheFull { slots: usize },

    #[error("replication failed on every backend group: {}", render_failures(.failures))]
    Replication { failures: Vec<BackendFailure> },

    // Precondition errors
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    // Internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

fn render_failures(failures: &[BackendFailure]) -> String {
    if failures.is_empty() {
        return "no backend reported a cause".to_string();
    }
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create an invalid format error
    pub fn invalid_format(msg: impl Into<String>) -> Self {
        Self::InvalidFormat(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Check if this is a not found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if the write-intent log ran out of slots
    #[must_use]
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::WriteCacheFull { .. })
    }

    /// Check if retrying the same call later could succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::WriteCacheFull { .. } | Self::Replication { .. })
    }

    /// Individual causes of an aggregate replication error
    #[must_use]
    pub fn backend_failures(&self) -> &[BackendFailure] {
        match self {
            Self::Replication { failures } => failures,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_predicates() {
        assert!(Error::NotFound(AssetId::new()).is_not_found());
        assert!(Error::WriteCacheFull { slots: 4 }.is_capacity());
        assert!(Error::WriteCacheFull { slots: 4 }.is_retryable());
        assert!(!Error::AlreadyExists(AssetId::new()).is_retryable());
        assert!(!Error::Configuration("x".into()).is_not_found());
    }

    #[test]
    fn test_replication_error_lists_every_cause() {
        let err = Error::Replication {
            failures: vec![
                BackendFailure {
                    backend: "s1".into(),
                    cause: "connection refused".into(),
                    already_exists: false,
                },
                BackendFailure {
                    backend: "s2".into(),
                    cause: "write failed".into(),
                    already_exists: false,
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("s1: connection refused"));
        assert!(msg.contains("s2: write failed"));
        assert_eq!(err.backend_failures().len(), 2);
    }

    #[test]
    fn test_capacity_message() {
        let err = Error::WriteCacheFull { slots: 8 };
        assert!(err.to_string().starts_with("write cache full"));
        assert!(Error::internal("x").backend_failures().is_empty());
    }
}
