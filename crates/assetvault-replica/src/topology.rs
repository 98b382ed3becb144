//! Ordered backend groups
//!
//! Groups are tried one after another; the backends inside a group are
//! contacted in parallel.

use std::sync::Arc;

use assetvault_client::{AssetServer, BackendFactory};
use assetvault_common::{BackendConfig, Error, Result};

/// Backends contacted together
pub type BackendGroup = Vec<Arc<dyn AssetServer>>;

/// Serial list of parallel backend groups
#[derive(Clone, Default)]
pub struct BackendTopology {
    groups: Vec<BackendGroup>,
}

impl BackendTopology {
    /// Build from ready backends; an empty group is a configuration error
    pub fn new(groups: Vec<BackendGroup>) -> Result<Self> {
        if let Some(index) = groups.iter().position(Vec::is_empty) {
            return Err(Error::configuration(format!(
                "backend group {index} is empty"
            )));
        }
        Ok(Self { groups })
    }

    /// No upstream at all
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_config(groups: &[Vec<BackendConfig>]) -> Result<Self> {
        Self::new(BackendFactory::create_groups(groups)?)
    }

    pub fn groups(&self) -> &[BackendGroup] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Total number of backends across groups
    pub fn backend_count(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }
}

impl std::fmt::Debug for BackendTopology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<Vec<&str>> = self
            .groups
            .iter()
            .map(|group| group.iter().map(|backend| backend.name()).collect())
            .collect();
        f.debug_struct("BackendTopology")
            .field("groups", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockServer;
    use std::path::PathBuf;

    #[test]
    fn test_rejects_empty_group() {
        let result = BackendTopology::new(vec![vec![MockServer::new("s1").shared()], vec![]]);
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_counts() {
        let topology = BackendTopology::new(vec![
            vec![MockServer::new("a").shared(), MockServer::new("b").shared()],
            vec![MockServer::new("c").shared()],
        ])
        .unwrap();
        assert!(!topology.is_empty());
        assert_eq!(topology.groups().len(), 2);
        assert_eq!(topology.backend_count(), 3);
        assert_eq!(format!("{topology:?}"), r#"BackendTopology { groups: [["a", "b"], ["c"]] }"#);

        assert!(BackendTopology::empty().is_empty());
    }

    #[test]
    fn test_from_config() {
        let topology = BackendTopology::from_config(&[vec![BackendConfig::Directory {
            name: "mirror".into(),
            path: PathBuf::from("/srv/mirror"),
        }]])
        .unwrap();
        assert_eq!(topology.groups()[0][0].name(), "mirror");
    }
}
