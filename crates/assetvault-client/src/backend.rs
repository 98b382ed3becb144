//! Remote backend contract
//!
//! The orchestrator only needs two operations from a backend: fetch an
//! asset by id and store an asset. How the bytes travel is the backend's
//! business.

use assetvault_common::{Asset, AssetId};
use async_trait::async_trait;

/// Failure reported by a remote backend on store
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The remote already holds an asset with this id
    #[error("asset already exists on the remote")]
    AlreadyExists,

    /// The remote accepted the request but could not persist it
    #[error("remote write failed: {0}")]
    WriteFailed(String),

    /// The remote could not be reached or refused the credentials
    #[error("transport error: {0}")]
    Transport(String),

    /// Several causes bundled by one backend
    #[error("{} errors: {}", .0.len(), render(.0))]
    Multiple(Vec<BackendError>),
}

fn render(errors: &[BackendError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl BackendError {
    /// True when every cause is "already exists"
    pub fn is_already_exists(&self) -> bool {
        match self {
            Self::AlreadyExists => true,
            Self::Multiple(errors) => {
                !errors.is_empty() && errors.iter().all(BackendError::is_already_exists)
            }
            _ => false,
        }
    }

    /// Unwrap a bundle by one layer; any other error is returned alone
    pub fn flatten_once(self) -> Vec<BackendError> {
        match self {
            Self::Multiple(errors) => errors,
            other => vec![other],
        }
    }
}

/// A remote asset server
#[async_trait]
pub trait AssetServer: Send + Sync {
    /// Backend name for logs and aggregate errors
    fn name(&self) -> &str;

    /// Fetch an asset; any handled failure is reported as `None`
    async fn request(&self, id: AssetId) -> Option<Asset>;

    /// Store an asset
    async fn store(&self, asset: &Asset) -> Result<(), BackendError>;
}
