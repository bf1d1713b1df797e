//! NatLangChain Core - the ledger half of the admission pipeline
//!
//! Provides everything that must hold for committed data to stay correct:
//! - Entry / Block data model with content-addressed fingerprints
//! - Symbolic validation (size limits, forbidden metadata, injection screening)
//! - Entry quality gate, asset double-transfer prevention and derivative lineage
//! - Pending pool with idempotent admission and atomic drain
//! - Deterministic block sealing and chain integrity checks
//! - Read-only chain queries and the narrative rendering
//! - Interchangeable storage backends (memory, JSON snapshot, SQLite)
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ SymbolicValid. │──▶│ PendingPool  │──▶│   Sealer     │
//! │ (no I/O)       │   │ (dedup/drain)│   │ (nonce, link)│
//! └────────────────┘   └──────────────┘   └──────┬───────┘
//!                                                │
//!                                                ▼
//!                                    ┌───────────────────────┐
//!                                    │   StorageBackend      │
//!                                    │ memory | json | sqlite│
//!                                    └───────────────────────┘
//! ```

pub mod assets;
pub mod chain;
pub mod error;
pub mod hash;
pub mod lineage;
pub mod pool;
pub mod quality;
pub mod query;
pub mod storage;
pub mod symbolic;
pub mod types;

pub use assets::{AssetRegistry, PendingTransfer, TransferHold, TransferIntent, TransferRecord};
pub use chain::{seal_block, validate_chain, ChainReport, Sealer, SealerConfig, Tail};
pub use error::{AssetError, CoreError, PoolError, Result, SealError, StorageError};
pub use lineage::{DerivationTree, DerivativeSpec, DerivativeType, EntryRef, LineageLink, LineageRegistry};
pub use pool::{AdmitOutcome, PendingPool};
pub use quality::{QualityAnalyzer, QualityConfig, QualityDecision, QualityReport};
pub use query::{entries_by_author, entries_by_intent, narrative, stats, ChainStats};
pub use storage::{open_backend, BackendKind, StorageBackend, StorageConfig};
pub use symbolic::{SymbolicLimits, SymbolicValidator};
pub use types::*;
