//! Coordinator errors.

use thiserror::Error;

use natlang_core::{CoreError, PoolError, SealError, StorageError};

use crate::coordinator::EntryState;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Unvalidated submissions are disabled on this node")]
    UnvalidatedDisabled,

    #[error("No pending entries to mine")]
    NoPendingEntries,

    #[error("Illegal entry transition {from:?} -> {to:?}")]
    InvalidTransition { from: EntryState, to: EntryState },

    #[error(transparent)]
    Seal(#[from] SealError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl CoordinatorError {
    /// Errors an operator has to look at.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoordinatorError::Storage(_)
                | CoordinatorError::Core(CoreError::ChainIntegrity { .. })
                | CoordinatorError::Core(CoreError::Storage(_))
        )
    }
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;
