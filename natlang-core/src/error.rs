//! Error taxonomy for the ledger.

use thiserror::Error;

use crate::types::ValidationStatus;

/// Top-level pipeline errors.
///
/// Only `ChainIntegrity` and unrecoverable `Storage` failures are meant to
/// reach an operator; the rest are folded into validation records upstream.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed or forbidden input, never retried
    #[error("Symbolic rejection: {}", .reasons.join("; "))]
    SymbolicRejection { reasons: Vec<String> },

    /// A single provider failed
    #[error("Provider {provider_id} failed: {message}")]
    Provider { provider_id: String, message: String },

    /// Too few providers answered
    #[error("Quorum failure: {responded} of {required} required providers responded")]
    QuorumFailure { responded: usize, required: usize },

    /// Hash or link mismatch in the committed chain
    #[error("Chain integrity error at block {index}: {reason}")]
    ChainIntegrity { index: u64, reason: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Seal(#[from] SealError),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Storage backend failures.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection pool error: {0}")]
    Pool(String),

    /// Appended block does not extend the stored tail
    #[error("Tail mismatch at height {height}: block links to {expected}, store tail is {actual}")]
    TailMismatch {
        height: u64,
        expected: String,
        actual: String,
    },

    #[error("Backend is closed")]
    Closed,

    /// Failure injected by a crash point (tests only)
    #[error("Simulated crash: {0}")]
    SimulatedCrash(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Database(e.to_string())
    }
}

impl From<r2d2::Error> for StorageError {
    fn from(e: r2d2::Error) -> Self {
        StorageError::Pool(e.to_string())
    }
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(e: tokio::task::JoinError) -> Self {
        StorageError::Internal(format!("Blocking task failed: {}", e))
    }
}

/// Block sealing failures.
#[derive(Debug, Error)]
pub enum SealError {
    /// Only genesis may be empty
    #[error("Cannot seal an empty block")]
    EmptySeal,

    /// Chain tail moved since the caller read it
    #[error("Tail mismatch: expected previous hash {expected}, chain tail is {actual}")]
    TailMismatch { expected: String, actual: String },

    #[error("Difficulty {requested} exceeds maximum {max}")]
    DifficultyTooHigh { requested: u32, max: u32 },

    #[error("No nonce satisfied difficulty {difficulty} within {attempts} attempts")]
    NonceExhausted { difficulty: u32, attempts: u64 },

    #[error("Sealed entry {fingerprint} is not valid (status {status:?})")]
    InvalidEntry {
        fingerprint: String,
        status: ValidationStatus,
    },

    /// Fingerprint already on the chain
    #[error("Entry {fingerprint} is already sealed")]
    AlreadySealed { fingerprint: String },

    /// Same fingerprint twice in one batch
    #[error("Entry {fingerprint} appears more than once in the batch")]
    DuplicateInBatch { fingerprint: String },

    #[error("Sealing task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Pending pool failures.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Only VALID entries may wait for sealing
    #[error("Entry {fingerprint} has status {status:?} and cannot enter the pending pool")]
    NotValid {
        fingerprint: String,
        status: ValidationStatus,
    },

    /// The fingerprint is already on the chain
    #[error("Entry {fingerprint} is already sealed")]
    AlreadySealed { fingerprint: String },
}

/// Asset ownership failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssetError {
    /// Another entry already moves this asset
    #[error("Asset '{asset_id}' already has a pending transfer to {to}")]
    AlreadyPending { asset_id: String, to: String },

    #[error("Author '{author}' is not the owner of asset '{asset_id}' (owner: {owner})")]
    NotOwner {
        asset_id: String,
        author: String,
        owner: String,
    },

    #[error("No pending transfer for asset '{asset_id}'")]
    NoPendingTransfer { asset_id: String },

    /// Completion attempted by an entry that did not reserve the asset
    #[error("Fingerprint mismatch for asset '{asset_id}'")]
    FingerprintMismatch { asset_id: String },
}

impl AssetError {
    /// Stable reason code reported on rejected submissions.
    pub fn reason(&self) -> &'static str {
        match self {
            AssetError::AlreadyPending { .. } => "already_pending",
            AssetError::NotOwner { .. } => "not_owner",
            AssetError::NoPendingTransfer { .. } => "no_pending_transfer",
            AssetError::FingerprintMismatch { .. } => "fingerprint_mismatch",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbolic_rejection_lists_every_reason() {
        let err = CoreError::SymbolicRejection {
            reasons: vec!["content is empty".into(), "forbidden metadata key 'validated'".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("content is empty"));
        assert!(msg.contains("'validated'"));
    }

    #[test]
    fn test_storage_error_wraps_into_core() {
        let err: CoreError = StorageError::Closed.into();
        assert!(matches!(err, CoreError::Storage(StorageError::Closed)));
    }
}
