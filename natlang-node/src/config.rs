//! Node configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use natlang_core::{BackendKind, QualityConfig, SealerConfig, StorageConfig, SymbolicLimits};
use natlang_validator::{ConsensusConfig, ProviderConfig};

use crate::rate_limit::RateLimitConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub symbolic: SymbolicLimits,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub sealer: SealerConfig,
    #[serde(default)]
    pub consensus: ConsensusConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    /// Semantic judges, in the order their results are reported
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    /// Directory relative storage paths resolve against
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Accept `validate: false` submissions (symbolic checks still run)
    #[serde(default)]
    pub allow_unvalidated: bool,

    /// Retried submissions remembered for idempotent replies
    #[serde(default = "default_outcome_cache")]
    pub outcome_cache_size: usize,

    /// Refuse a second transfer of an asset while one is pending
    #[serde(default = "default_true")]
    pub asset_tracking: bool,

    /// Index `parent_refs` links between sealed entries
    #[serde(default = "default_true")]
    pub lineage_tracking: bool,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            allow_unvalidated: false,
            outcome_cache_size: default_outcome_cache(),
            asset_tracking: true,
            lineage_tracking: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Validation records kept in memory
    #[serde(default = "default_audit_entries")]
    pub max_entries: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_entries: default_audit_entries(),
        }
    }
}

fn default_data_dir() -> PathBuf { PathBuf::from("data") }
fn default_outcome_cache() -> usize { 10_000 }
fn default_true() -> bool { true }
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 5000 }
fn default_audit_entries() -> usize { 1_000 }

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl Config {
    /// Load `path` if it exists, otherwise defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Storage config with the path resolved against the data directory.
    ///
    /// A sqlite backend left on the default JSON file name gets `chain.db`.
    pub fn storage_config(&self) -> StorageConfig {
        let mut storage = self.storage.clone();
        if storage.backend == BackendKind::Sqlite && storage.path == StorageConfig::default().path {
            storage.path = PathBuf::from("chain.db");
        }
        if storage.path.is_relative() {
            storage.path = self.node.data_dir.join(&storage.path);
        }
        storage
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }
}
