//! NatLangChain Node - admission pipeline and HTTP surface
//!
//! Wires the ledger (`natlang-core`) and the semantic validators
//! (`natlang-validator`) into one service:
//! - [`Coordinator`]: rate limit → symbolic → consensus → pool → seal
//! - [`ValidationAudit`]: every validation record, newest first
//! - [`api`]: the axum router exposed by the `natlang-node` binary

pub mod api;
pub mod audit;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod rate_limit;

pub use audit::{AuditEntry, AuditKind, AuditStats, ValidationAudit};
pub use config::Config;
pub use coordinator::{Coordinator, EntryState, SubmitOptions, Submission};
pub use error::CoordinatorError;
pub use rate_limit::{RateLimitConfig, RateLimiter};
