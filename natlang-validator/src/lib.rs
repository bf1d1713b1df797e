//! NatLangChain Validator - semantic judgement of entries
//!
//! Asks several independent judges (remote LLMs, local models, a heuristic
//! fallback) whether an entry's prose says what its stated intent claims,
//! then folds their verdicts into one admission decision with a drift score.
//!
//! # Architecture
//!
//! ```text
//!              ┌──────────────────────┐
//!   Entry ────▶│  ConsensusValidator  │
//!              │  deadline, retries,  │
//!              │  circuit breakers    │
//!              └──────────┬───────────┘
//!          ┌──────────────┼──────────────┐
//!          ▼              ▼              ▼
//!     ┌─────────┐    ┌─────────┐    ┌──────────┐
//!     │ OpenAI  │    │Anthropic│    │ Ollama / │
//!     │ compat. │    │         │    │ heuristic│
//!     └─────────┘    └─────────┘    └──────────┘
//!          └──────────────┼──────────────┘
//!                         ▼
//!                 aggregate() ─▶ ValidationRecord
//! ```

pub mod aggregate;
pub mod config;
pub mod consensus;
pub mod prompt;
pub mod provider;
pub mod retry;

pub use aggregate::{aggregate, Aggregate, AggregationPolicy};
pub use config::{build_provider, build_providers, ConfigError, ConsensusConfig, ProviderConfig, ProviderType};
pub use consensus::{ConsensusOutcome, ConsensusValidator, ProviderStatus};
pub use provider::{
    AnthropicProvider, AssessmentRequest, HeuristicProvider, MockProvider, OllamaProvider, OpenAiProvider,
    Provider, ProviderError, ProviderKind, ProviderVerdict,
};
pub use retry::{BreakerPermit, CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryPolicy};
