//! Directory-backed asset server
//!
//! Stores each asset as one wire-format file under a root directory, fanned
//! out by the first id byte. Used for shared network mounts and for
//! exercising the orchestrator without a live remote.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use assetvault_common::{Asset, AssetId};
use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::{AssetServer, BackendError};
use crate::wire;

const FILE_EXTENSION: &str = "bin";

/// Asset server over a local or mounted directory
#[derive(Debug, Clone)]
pub struct DirectoryServer {
    name: String,
    root: PathBuf,
}

impl DirectoryServer {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File holding `id`
    pub fn path_for(&self, id: AssetId) -> PathBuf {
        let hex = id.to_simple_hex();
        self.root
            .join(&hex[..2])
            .join(format!("{hex}.{FILE_EXTENSION}"))
    }

    async fn publish(&self, asset: &Asset, target: &Path) -> Result<(), BackendError> {
        let encoded = wire::encode(asset).map_err(|e| BackendError::WriteFailed(e.to_string()))?;

        let dir = target
            .parent()
            .ok_or_else(|| BackendError::WriteFailed("asset path has no parent".into()))?;
        tokio::fs::create_dir_all(dir).await.map_err(store_error)?;

        let tmp = dir.join(format!(".{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, &encoded).await.map_err(store_error)?;

        // Linking fails if the target exists, so two writers never clobber
        // each other and readers never see a partial file
        let linked = tokio::fs::hard_link(&tmp, target).await;
        if let Err(e) = tokio::fs::remove_file(&tmp).await {
            debug!(path = %tmp.display(), error = %e, "failed to remove temp file");
        }
        linked.map_err(store_error)
    }
}

fn store_error(e: std::io::Error) -> BackendError {
    match e.kind() {
        ErrorKind::AlreadyExists => BackendError::AlreadyExists,
        ErrorKind::PermissionDenied => BackendError::Transport(e.to_string()),
        _ => BackendError::WriteFailed(e.to_string()),
    }
}

#[async_trait]
impl AssetServer for DirectoryServer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn request(&self, id: AssetId) -> Option<Asset> {
        let path = self.path_for(id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(backend = %self.name, path = %path.display(), error = %e, "failed to read asset file");
                return None;
            }
        };

        match wire::decode(&bytes) {
            Ok(asset) if asset.id == id => Some(asset),
            Ok(asset) => {
                warn!(
                    backend = %self.name,
                    path = %path.display(),
                    %id,
                    found = %asset.id,
                    "asset file holds a different asset"
                );
                None
            }
            Err(e) => {
                warn!(backend = %self.name, path = %path.display(), error = %e, "undecodable asset file");
                None
            }
        }
    }

    async fn store(&self, asset: &Asset) -> Result<(), BackendError> {
        let target = self.path_for(asset.id);
        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            return Err(BackendError::AlreadyExists);
        }
        self.publish(asset, &target).await?;
        debug!(backend = %self.name, id = %asset.id, "stored asset");
        Ok(())
    }
}
