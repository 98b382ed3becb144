//! Configuration types for AssetVault
//!
//! These structures arrive already parsed; the components only validate
//! them. Text-file loading lives in the binaries.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default number of write-intent slots
pub const DEFAULT_WAL_SLOTS: usize = 1024;

/// Smallest usable write-intent log
pub const MIN_WAL_SLOTS: usize = 2;

/// Root configuration for AssetVault
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Local content store
    #[serde(default)]
    pub local_store: LocalStoreConfig,
    /// Write-intent log; durability is off when absent
    #[serde(default)]
    pub wal: Option<WalConfig>,
    /// Ordered backend groups; each inner list is raced/fanned out in parallel
    #[serde(default)]
    pub backends: Vec<Vec<BackendConfig>>,
}

impl Config {
    /// Check the configuration for values the components cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.local_store.enabled && self.local_store.path.as_os_str().is_empty() {
            return Err(Error::configuration("local store path is empty"));
        }

        if let Some(wal) = &self.wal {
            if wal.path.as_os_str().is_empty() {
                return Err(Error::configuration("write-intent log path is empty"));
            }
            if wal.slot_count < MIN_WAL_SLOTS {
                return Err(Error::configuration(format!(
                    "write-intent log needs at least {MIN_WAL_SLOTS} slots, got {}",
                    wal.slot_count
                )));
            }
        }

        for (index, group) in self.backends.iter().enumerate() {
            if group.is_empty() {
                return Err(Error::configuration(format!(
                    "backend group {index} is empty"
                )));
            }
            for backend in group {
                backend.validate()?;
            }
        }

        Ok(())
    }

    /// True when at least one remote backend is configured
    #[must_use]
    pub fn has_upstream(&self) -> bool {
        self.backends.iter().any(|group| !group.is_empty())
    }
}

/// Local content store configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LocalStoreConfig {
    /// Root directory of the sharded tree
    pub path: PathBuf,
    /// Set to false to run without a local copy
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for LocalStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/assetvault/cache"),
            enabled: true,
        }
    }
}

/// Write-intent log configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalConfig {
    /// Path of the slot file
    pub path: PathBuf,
    /// Number of pending-upload slots (grow-only)
    #[serde(default = "default_slot_count")]
    pub slot_count: usize,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/assetvault/write-intent.wal"),
            slot_count: DEFAULT_WAL_SLOTS,
        }
    }
}

/// A remote backend; the set of variants is closed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    /// A mirrored asset directory (local disk or network share) holding
    /// assets in the legacy wire format
    Directory {
        /// Name used in logs and aggregate errors
        name: String,
        /// Root directory of the mirror
        path: PathBuf,
    },
}

impl BackendConfig {
    /// Backend name for identification
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Directory { name, .. } => name,
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            Self::Directory { name, path } => {
                if name.is_empty() {
                    return Err(Error::configuration("backend name is empty"));
                }
                if path.as_os_str().is_empty() {
                    return Err(Error::configuration(format!(
                        "backend {name} has an empty path"
                    )));
                }
                Ok(())
            }
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_slot_count() -> usize {
    DEFAULT_WAL_SLOTS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory(name: &str) -> BackendConfig {
        BackendConfig::Directory {
            name: name.to_string(),
            path: PathBuf::from(format!("/srv/{name}")),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert!(config.wal.is_none());
        assert!(!config.has_upstream());
    }

    #[test]
    fn test_rejects_small_wal() {
        let config = Config {
            wal: Some(WalConfig {
                path: PathBuf::from("/tmp/x.wal"),
                slot_count: 1,
            }),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_rejects_empty_group() {
        let config = Config {
            backends: vec![vec![directory("s1")], vec![]],
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_parse_toml() {
        let text = r#"
            backends = [[]]

            [local_store]
            path = "/data/cache"

            [wal]
            path = "/data/wal"
        "#;
        // Empty groups parse but fail validation
        let config: Config = toml::from_str(text).unwrap();
        assert_eq!(config.wal.as_ref().unwrap().slot_count, DEFAULT_WAL_SLOTS);
        assert!(config.local_store.enabled);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_backend_groups() {
        let text = r#"
            backends = [
                [{ type = "directory", name = "primary", path = "/srv/a" }],
                [
                    { type = "directory", name = "mirror-1", path = "/srv/b" },
                    { type = "directory", name = "mirror-2", path = "/srv/c" },
                ],
            ]

            [local_store]
            path = "/data/cache"
        "#;
        let config: Config = toml::from_str(text).unwrap();
        config.validate().unwrap();
        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.backends[1].len(), 2);
        assert_eq!(config.backends[1][0].name(), "mirror-1");
        assert!(config.has_upstream());
    }
}
