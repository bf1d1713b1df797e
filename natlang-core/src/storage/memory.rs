//! In-memory backend. Nothing survives a restart.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{check_extends, BackendInfo, BackendKind, StorageBackend};
use crate::error::StorageError;
use crate::types::{AuditEntry, Block, Entry};

#[derive(Default)]
struct MemoryState {
    chain: Vec<Block>,
    pending: Vec<Entry>,
    /// Oldest first
    validations: Vec<AuditEntry>,
}

/// Volatile backend for tests and throwaway nodes.
#[derive(Default)]
pub struct MemoryBackend {
    state: RwLock<MemoryState>,
    closed: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend that already holds the genesis block.
    pub fn with_genesis() -> Self {
        Self {
            state: RwLock::new(MemoryState {
                chain: vec![Block::genesis()],
                ..Default::default()
            }),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), StorageError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn load_chain(&self) -> Result<Vec<Block>, StorageError> {
        self.ensure_open()?;
        Ok(self.state.read().await.chain.clone())
    }

    async fn append_block(&self, block: &Block) -> Result<(), StorageError> {
        self.ensure_open()?;
        let mut state = self.state.write().await;
        check_extends(state.chain.last(), block)?;
        state.chain.push(block.clone());
        Ok(())
    }

    async fn save_chain(&self, chain: &[Block]) -> Result<(), StorageError> {
        self.ensure_open()?;
        self.state.write().await.chain = chain.to_vec();
        Ok(())
    }

    async fn load_pending(&self) -> Result<Vec<Entry>, StorageError> {
        self.ensure_open()?;
        Ok(self.state.read().await.pending.clone())
    }

    async fn save_all_pending(&self, entries: &[Entry]) -> Result<(), StorageError> {
        self.ensure_open()?;
        self.state.write().await.pending = entries.to_vec();
        Ok(())
    }

    async fn append_validation(&self, record: &AuditEntry) -> Result<(), StorageError> {
        self.ensure_open()?;
        self.state.write().await.validations.push(record.clone());
        Ok(())
    }

    async fn load_validations(&self, limit: usize) -> Result<Vec<AuditEntry>, StorageError> {
        self.ensure_open()?;
        Ok(self.state.read().await.validations.iter().rev().take(limit).cloned().collect())
    }

    async fn info(&self) -> Result<BackendInfo, StorageError> {
        let state = self.state.read().await;
        Ok(BackendInfo {
            kind: BackendKind::Memory,
            location: None,
            height: state.chain.last().map(|b| b.index).unwrap_or(0),
            pending: state.pending.len(),
            connections_acquired: None,
            connections_released: None,
        })
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
