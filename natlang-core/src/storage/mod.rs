//! Storage backends for the chain, the pending set and the validation log.
//!
//! All backends implement [`StorageBackend`]; the coordinator only ever sees
//! `Arc<dyn StorageBackend>`. Full rewrites never pass through a window where
//! committed data is deleted but its replacement is not yet durable:
//! - `json` writes a temp file in the same directory and renames it over the
//!   snapshot
//! - `sqlite` performs every multi-statement write inside one transaction

pub mod json_file;
pub mod memory;
pub mod sqlite;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::info;

use crate::error::StorageError;
use crate::types::{AuditEntry, Block, Entry};

pub use json_file::JsonFileBackend;
pub use memory::MemoryBackend;
pub use sqlite::{PoolStats, SqliteBackend};

/// Which backend implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Json,
    Sqlite,
}

impl std::str::FromStr for BackendKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(BackendKind::Memory),
            "json" | "file" => Ok(BackendKind::Json),
            "sqlite" | "sql" => Ok(BackendKind::Sqlite),
            other => Err(StorageError::Config(format!("unknown backend '{}'", other))),
        }
    }
}

/// Crash points a backend can be told to fail at (tests only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    /// JSON: new snapshot written to the temp file, rename not yet done
    AfterTempWrite,
    /// SQLite: old rows cleared inside the rewrite transaction, new rows not yet copied
    AfterClear,
}

/// Descriptive information about a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendInfo {
    pub kind: BackendKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub height: u64,
    pub pending: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connections_acquired: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connections_released: Option<u64>,
}

/// Durable home of the chain, the pending set and the validation log.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// The full committed chain, genesis first.
    async fn load_chain(&self) -> Result<Vec<Block>, StorageError>;

    /// Append one block at the tail.
    ///
    /// Fails with `TailMismatch` unless the block extends the stored tail
    /// (or is genesis on an empty store).
    async fn append_block(&self, block: &Block) -> Result<(), StorageError>;

    /// Replace the whole chain atomically.
    async fn save_chain(&self, chain: &[Block]) -> Result<(), StorageError>;

    async fn load_pending(&self) -> Result<Vec<Entry>, StorageError>;

    /// Replace the persisted pending set atomically.
    async fn save_all_pending(&self, entries: &[Entry]) -> Result<(), StorageError>;

    /// Append one record to the validation log. Records are never removed.
    async fn append_validation(&self, record: &AuditEntry) -> Result<(), StorageError>;

    /// Up to `limit` validation records, newest first.
    async fn load_validations(&self, limit: usize) -> Result<Vec<AuditEntry>, StorageError>;

    async fn info(&self) -> Result<BackendInfo, StorageError>;

    /// Flush and release resources; later calls fail with `Closed`.
    async fn close(&self) -> Result<(), StorageError>;
}

/// Check that `block` may follow `tail` (None = empty store).
pub(crate) fn check_extends(tail: Option<&Block>, block: &Block) -> Result<(), StorageError> {
    match tail {
        None if block.is_genesis() => Ok(()),
        None => Err(StorageError::TailMismatch {
            height: block.index,
            expected: block.previous_hash.clone(),
            actual: "<empty>".to_string(),
        }),
        Some(tail) if tail.index + 1 == block.index && tail.hash == block.previous_hash => Ok(()),
        Some(tail) => Err(StorageError::TailMismatch {
            height: block.index,
            expected: block.previous_hash.clone(),
            actual: tail.hash.clone(),
        }),
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: BackendKind,
    /// File (json) or database (sqlite) path
    #[serde(default = "default_path")]
    pub path: PathBuf,
    /// Maximum pooled SQLite connections
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

fn default_backend() -> BackendKind { BackendKind::Json }
fn default_path() -> PathBuf { PathBuf::from("chain_data.json") }
fn default_pool_size() -> u32 { 8 }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_path(),
            pool_size: default_pool_size(),
        }
    }
}

/// Construct a backend from configuration.
pub async fn open_backend(config: &StorageConfig) -> Result<Arc<dyn StorageBackend>, StorageError> {
    info!(backend = ?config.backend, path = %config.path.display(), "Opening storage backend");
    let backend: Arc<dyn StorageBackend> = match config.backend {
        BackendKind::Memory => Arc::new(MemoryBackend::new()),
        BackendKind::Json => Arc::new(JsonFileBackend::open(&config.path).await?),
        BackendKind::Sqlite => {
            let path = config.path.clone();
            let pool_size = config.pool_size;
            Arc::new(
                tokio::task::spawn_blocking(move || SqliteBackend::open(&path, pool_size)).await??,
            )
        }
    };
    Ok(backend)
}

/// Holds at most one backend, constructed on first use.
///
/// Concurrent first callers wait for a single construction.
#[derive(Default)]
pub struct BackendRegistry {
    cell: OnceCell<Arc<dyn StorageBackend>>,
}

impl BackendRegistry {
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::const_new(),
        }
    }

    pub async fn get_or_open(
        &self,
        config: &StorageConfig,
    ) -> Result<Arc<dyn StorageBackend>, StorageError> {
        self.cell
            .get_or_try_init(|| open_backend(config))
            .await
            .cloned()
    }

    pub fn get(&self) -> Option<Arc<dyn StorageBackend>> {
        self.cell.get().cloned()
    }
}

static SHARED: BackendRegistry = BackendRegistry::new();

/// Process-wide backend; the first caller's config wins.
pub async fn shared_backend(config: &StorageConfig) -> Result<Arc<dyn StorageBackend>, StorageError> {
    SHARED.get_or_open(config).await
}
