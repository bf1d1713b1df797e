//! Chain and block sealer.
//!
//! Sealing packages pending entries into the next block, searches a bounded
//! nonce range until the hash has the requested number of leading zero bits,
//! and appends through the storage backend. A single mutex around the tail
//! serializes sealing, a caller that read a stale tail is refused, and no
//! fingerprint is ever sealed twice.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{CoreError, SealError, StorageError};
use crate::hash::meets_difficulty;
use crate::storage::StorageBackend;
use crate::types::{Block, Entry, GENESIS_PREVIOUS_HASH};

/// Sealer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealerConfig {
    /// Leading zero bits required when the caller gives none
    #[serde(default = "default_difficulty")]
    pub default_difficulty: u32,
    /// Upper bound on requested difficulty
    #[serde(default = "default_max_difficulty")]
    pub max_difficulty: u32,
    /// Nonce search budget per block
    #[serde(default = "default_max_nonce_attempts")]
    pub max_nonce_attempts: u64,
}

fn default_difficulty() -> u32 { 2 }
fn default_max_difficulty() -> u32 { 24 }
fn default_max_nonce_attempts() -> u64 { 5_000_000 }

impl Default for SealerConfig {
    fn default() -> Self {
        Self {
            default_difficulty: default_difficulty(),
            max_difficulty: default_max_difficulty(),
            max_nonce_attempts: default_max_nonce_attempts(),
        }
    }
}

/// Height and hash of the last committed block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tail {
    pub index: u64,
    pub hash: String,
}

impl Tail {
    pub fn of(block: &Block) -> Self {
        Self {
            index: block.index,
            hash: block.hash.clone(),
        }
    }
}

/// Build a block on top of `previous_hash`, searching nonces from zero.
///
/// Deterministic: equal inputs always produce the same nonce and hash.
pub fn seal_block(
    index: u64,
    timestamp: DateTime<Utc>,
    entries: Vec<Entry>,
    previous_hash: &str,
    difficulty: u32,
    max_attempts: u64,
) -> Result<Block, SealError> {
    if entries.is_empty() {
        return Err(SealError::EmptySeal);
    }
    if let Some(entry) = entries.iter().find(|e| !e.is_valid()) {
        return Err(SealError::InvalidEntry {
            fingerprint: entry.fingerprint(),
            status: entry.validation_status,
        });
    }

    let mut block = Block::new(index, timestamp, entries, previous_hash, 0);
    let mut attempts = 1u64;
    while !meets_difficulty(&block.hash, difficulty) {
        if attempts >= max_attempts {
            return Err(SealError::NonceExhausted {
                difficulty,
                attempts,
            });
        }
        block.nonce += 1;
        block.hash = block.compute_hash();
        attempts += 1;
    }
    Ok(block)
}

/// Outcome of a full chain verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReport {
    pub valid: bool,
    pub block_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_invalid_index: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ChainReport {
    fn ok(block_count: usize) -> Self {
        Self {
            valid: true,
            block_count,
            first_invalid_index: None,
            reason: None,
        }
    }

    fn broken(block_count: usize, index: u64, reason: String) -> Self {
        Self {
            valid: false,
            block_count,
            first_invalid_index: Some(index),
            reason: Some(reason),
        }
    }

    /// Convert a failed report into the fatal error kind.
    pub fn into_result(self) -> Result<Self, CoreError> {
        match (self.valid, self.first_invalid_index, &self.reason) {
            (false, Some(index), Some(reason)) => Err(CoreError::ChainIntegrity {
                index,
                reason: reason.clone(),
            }),
            _ => Ok(self),
        }
    }
}

/// Recompute every hash and link from genesis onward.
///
/// Also refuses a fingerprint that appears in more than one place. Blocks
/// carry no difficulty, so proof of work is not re-checked here. Reports
/// the first block that fails; never mutates anything.
pub fn validate_chain(chain: &[Block]) -> ChainReport {
    let count = chain.len();
    let mut seen = HashSet::new();
    let Some(genesis) = chain.first() else {
        return ChainReport::broken(0, 0, "chain is empty".to_string());
    };

    if genesis.index != 0 {
        return ChainReport::broken(count, genesis.index, "first block is not genesis".to_string());
    }
    if genesis.previous_hash != GENESIS_PREVIOUS_HASH {
        return ChainReport::broken(count, 0, "genesis previous_hash must be \"0\"".to_string());
    }

    for (position, block) in chain.iter().enumerate() {
        let expected_index = position as u64;
        if block.index != expected_index {
            return ChainReport::broken(
                count,
                expected_index,
                format!("index {} found at height {}", block.index, expected_index),
            );
        }

        let recomputed = block.compute_hash();
        if block.hash != recomputed {
            return ChainReport::broken(
                count,
                block.index,
                format!("hash mismatch: stored {}, recomputed {}", block.hash, recomputed),
            );
        }

        if position > 0 {
            let previous = &chain[position - 1];
            if block.previous_hash != previous.hash {
                return ChainReport::broken(
                    count,
                    block.index,
                    format!(
                        "previous_hash {} does not match block {} hash {}",
                        block.previous_hash, previous.index, previous.hash
                    ),
                );
            }
            if block.entries.is_empty() {
                return ChainReport::broken(count, block.index, "non-genesis block is empty".to_string());
            }
        }

        if let Some(entry) = block.entries.iter().find(|e| !e.is_valid()) {
            return ChainReport::broken(
                count,
                block.index,
                format!(
                    "sealed entry {} has status {}",
                    entry.fingerprint(),
                    entry.validation_status.as_str()
                ),
            );
        }

        for entry in &block.entries {
            let fingerprint = entry.fingerprint();
            if !seen.insert(fingerprint.clone()) {
                return ChainReport::broken(
                    count,
                    block.index,
                    format!("entry {} is sealed more than once", fingerprint),
                );
            }
        }
    }

    ChainReport::ok(count)
}

struct SealerState {
    tail: Tail,
    /// Fingerprints already committed
    sealed: HashSet<String>,
}

/// Single writer for the chain.
pub struct Sealer {
    config: SealerConfig,
    storage: Arc<dyn StorageBackend>,
    state: Mutex<SealerState>,
}

impl Sealer {
    /// Create a sealer positioned at the given committed tail.
    pub fn new(config: SealerConfig, storage: Arc<dyn StorageBackend>, tail: Tail) -> Self {
        Self {
            config,
            storage,
            state: Mutex::new(SealerState {
                tail,
                sealed: HashSet::new(),
            }),
        }
    }

    /// Seed the fingerprints already on the committed chain.
    pub fn with_sealed(mut self, sealed: HashSet<String>) -> Self {
        self.state.get_mut().sealed = sealed;
        self
    }

    pub fn config(&self) -> &SealerConfig {
        &self.config
    }

    /// Current committed tail.
    pub async fn tail(&self) -> Tail {
        self.state.lock().await.tail.clone()
    }

    /// Seal `entries` on top of `expected_previous_hash` and commit the block.
    ///
    /// Refuses empty input, a tail that moved since the caller read it, and
    /// any fingerprint already committed or repeated in `entries`.
    pub async fn seal(
        &self,
        expected_previous_hash: &str,
        entries: Vec<Entry>,
        difficulty: Option<u32>,
    ) -> Result<Block, SealError> {
        let mut state = self.state.lock().await;

        if entries.is_empty() {
            return Err(SealError::EmptySeal);
        }
        let mut batch = HashSet::with_capacity(entries.len());
        for entry in &entries {
            let fingerprint = entry.fingerprint();
            if state.sealed.contains(&fingerprint) {
                warn!(fingerprint = %fingerprint, "Seal refused: entry already on the chain");
                return Err(SealError::AlreadySealed { fingerprint });
            }
            if !batch.insert(fingerprint.clone()) {
                return Err(SealError::DuplicateInBatch { fingerprint });
            }
        }
        let tail = &state.tail;
        if tail.hash != expected_previous_hash {
            warn!(
                expected = %expected_previous_hash,
                actual = %tail.hash,
                "Seal refused: chain tail moved"
            );
            return Err(SealError::TailMismatch {
                expected: expected_previous_hash.to_string(),
                actual: tail.hash.clone(),
            });
        }

        let difficulty = difficulty.unwrap_or(self.config.default_difficulty);
        if difficulty > self.config.max_difficulty {
            return Err(SealError::DifficultyTooHigh {
                requested: difficulty,
                max: self.config.max_difficulty,
            });
        }

        let index = tail.index + 1;
        let previous_hash = tail.hash.clone();
        let max_attempts = self.config.max_nonce_attempts;
        let entry_count = entries.len();
        let timestamp = Utc::now();

        let block = tokio::task::spawn_blocking(move || {
            seal_block(index, timestamp, entries, &previous_hash, difficulty, max_attempts)
        })
        .await
        .map_err(|e| SealError::Task(e.to_string()))??;

        self.storage.append_block(&block).await.map_err(|e| match e {
            StorageError::TailMismatch { expected, actual, .. } => {
                SealError::TailMismatch { expected, actual }
            }
            other => SealError::Storage(other),
        })?;

        state.tail = Tail::of(&block);
        state.sealed.extend(batch);

        info!(
            index = block.index,
            hash = %block.hash,
            nonce = block.nonce,
            entries = entry_count,
            difficulty,
            "Block sealed"
        );

        Ok(block)
    }
}
