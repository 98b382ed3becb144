//! Backend factory
//!
//! Maps configuration entries onto concrete asset servers. The set of
//! backend kinds is closed; adding one means adding a `BackendConfig`
//! variant and a match arm here.

use std::sync::Arc;

use assetvault_common::{BackendConfig, Result};
use tracing::info;

use crate::backend::AssetServer;
use crate::directory::DirectoryServer;

/// Factory for creating asset servers from configuration
pub struct BackendFactory;

impl BackendFactory {
    /// Create one backend
    pub fn create(config: &BackendConfig) -> Result<Arc<dyn AssetServer>> {
        match config {
            BackendConfig::Directory { name, path } => {
                info!(backend = %name, path = %path.display(), "creating directory backend");
                Ok(Arc::new(DirectoryServer::new(name.clone(), path.clone())))
            }
        }
    }

    /// Create every backend, preserving the group structure
    pub fn create_groups(
        groups: &[Vec<BackendConfig>],
    ) -> Result<Vec<Vec<Arc<dyn AssetServer>>>> {
        groups
            .iter()
            .map(|group| group.iter().map(Self::create).collect())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn directory(name: &str) -> BackendConfig {
        BackendConfig::Directory {
            name: name.to_string(),
            path: PathBuf::from(format!("/srv/{name}")),
        }
    }

    #[test]
    fn test_create_directory() {
        let backend = BackendFactory::create(&directory("mirror")).unwrap();
        assert_eq!(backend.name(), "mirror");
    }

    #[test]
    fn test_groups_keep_shape() {
        let groups = vec![
            vec![directory("a"), directory("b")],
            vec![directory("c")],
        ];
        let created = BackendFactory::create_groups(&groups).unwrap();
        assert_eq!(created.len(), 2);
        assert_eq!(created[0].len(), 2);
        assert_eq!(created[0][1].name(), "b");
        assert_eq!(created[1][0].name(), "c");
    }
}
