//! Engine configuration
//!
//! Loaded from YAML; every field has a default so a config file only needs
//! the settings it changes.
//!
//! ```yaml
//! prefetch: 512
//! base_iri: "http://example.org/"
//! join_store:
//!   type: spill
//!   directory: /var/tmp/rml-joins
//!   commit_batch_size: 5000
//! resolvers:
//!   exclude: [sql-sqlite]
//! csv:
//!   delimiter: ";"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::mapping::CsvDialect;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Which resolvers the registry may use, by resolver name
///
/// An empty include list allows everything not excluded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverSelection {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl ResolverSelection {
    pub fn allows(&self, name: &str) -> bool {
        if self.exclude.iter().any(|excluded| excluded == name) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|included| included == name)
    }
}

fn default_commit_batch_size() -> usize {
    10_000
}

fn default_key_prefix() -> String {
    "rml".to_string()
}

/// Backing storage for join candidates and the parent index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JoinStoreConfig {
    /// In-process maps
    Memory,
    /// Child candidates spill to segment files, parent index in RocksDB
    Spill {
        /// Scratch directory; the system temp dir when unset
        #[serde(default)]
        directory: Option<PathBuf>,
        #[serde(default = "default_commit_batch_size")]
        commit_batch_size: usize,
    },
    /// Redis-compatible server
    Remote {
        address: String,
        #[serde(default = "default_key_prefix")]
        key_prefix: String,
    },
}

impl Default for JoinStoreConfig {
    fn default() -> Self {
        JoinStoreConfig::Memory
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Records requested from a source per demand batch
    pub prefetch: usize,
    /// Base for relative IRIs
    pub base_iri: Option<String>,
    pub join_store: JoinStoreConfig,
    pub resolvers: ResolverSelection,
    /// Dialect for CSV sources that do not declare one
    pub csv: CsvDialect,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            prefetch: 256,
            base_iri: None,
            join_store: JoinStoreConfig::Memory,
            resolvers: ResolverSelection::default(),
            csv: CsvDialect::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_str(yaml: &str) -> ConfigResult<Self> {
        let config: EngineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.prefetch == 0 {
            return Err(ConfigError::Invalid("prefetch must be at least 1".to_string()));
        }
        if let JoinStoreConfig::Spill {
            commit_batch_size: 0,
            ..
        } = self.join_store
        {
            return Err(ConfigError::Invalid(
                "commit_batch_size must be at least 1".to_string(),
            ));
        }
        if let Some(base) = &self.base_iri {
            oxiri::Iri::parse(base.as_str())
                .map_err(|e| ConfigError::Invalid(format!("base_iri '{}': {}", base, e)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.prefetch, 256);
        assert_eq!(config.join_store, JoinStoreConfig::Memory);
    }

    #[test]
    fn test_spill_store() {
        let config = EngineConfig::from_yaml_str(
            "join_store:\n  type: spill\n  directory: /tmp/joins\nresolvers:\n  exclude: [sql-sqlite]\n",
        )
        .unwrap();
        assert_eq!(
            config.join_store,
            JoinStoreConfig::Spill {
                directory: Some(PathBuf::from("/tmp/joins")),
                commit_batch_size: 10_000,
            }
        );
        assert!(!config.resolvers.allows("sql-sqlite"));
        assert!(config.resolvers.allows("csv"));
    }

    #[test]
    fn test_remote_store() {
        let config =
            EngineConfig::from_yaml_str("join_store:\n  type: remote\n  address: 127.0.0.1:6379\n")
                .unwrap();
        assert_eq!(
            config.join_store,
            JoinStoreConfig::Remote {
                address: "127.0.0.1:6379".to_string(),
                key_prefix: "rml".to_string(),
            }
        );
    }

    #[test]
    fn test_include_list() {
        let selection = ResolverSelection {
            include: vec!["csv".to_string(), "json".to_string()],
            exclude: vec!["json".to_string()],
        };
        assert!(selection.allows("csv"));
        assert!(!selection.allows("json"));
        assert!(!selection.allows("xml"));
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            EngineConfig::from_yaml_str("prefetch: 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EngineConfig::from_yaml_str("base_iri: 'not an iri'"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EngineConfig::from_yaml_str("prefetch: [1"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.yaml");
        std::fs::write(&path, "prefetch: 8\nbase_iri: http://example.org/\n").unwrap();
        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.prefetch, 8);
        assert_eq!(config.base_iri.as_deref(), Some("http://example.org/"));

        assert!(matches!(
            EngineConfig::from_file(dir.path().join("missing.yaml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
