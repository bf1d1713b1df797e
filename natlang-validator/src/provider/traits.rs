//! Core traits for semantic judges.
//!
//! This module defines the `Provider` trait - the single abstraction over
//! every engine that can judge an entry (remote LLM APIs, a local model, the
//! offline heuristic judge, scripted mocks).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use natlang_core::{Decision, Entry};

use crate::prompt;

/// Error types for provider calls.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// Provider is not reachable or is switched off
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    /// Call exceeded its time budget
    #[error("Timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    /// Transport failure
    #[error("Network error: {0}")]
    Network(String),

    /// Rate limited by the provider
    #[error("Rate limited, retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    /// Non-success HTTP status
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Response could not be turned into a verdict
    #[error("Parse error: {0}")]
    Parse(String),

    /// The assessment was abandoned before the call finished
    #[error("Cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Whether a second attempt may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Timeout { .. }
            | ProviderError::Network(_)
            | ProviderError::RateLimited { .. } => true,
            ProviderError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout { after_ms: 0 }
        } else if e.is_decode() {
            ProviderError::Parse(e.to_string())
        } else {
            ProviderError::Network(e.to_string())
        }
    }
}

/// Where a provider runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Remote,
    Local,
    Mock,
}

impl ProviderKind {
    /// Default vote weight for this kind.
    pub fn default_weight(&self) -> f64 {
        match self {
            ProviderKind::Remote => 1.0,
            ProviderKind::Local => 0.8,
            ProviderKind::Mock => 1.0,
        }
    }
}

/// What a provider is asked to judge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssessmentRequest {
    pub content: String,
    pub author: String,
    pub intent: String,
}

impl AssessmentRequest {
    pub fn new(
        content: impl Into<String>,
        author: impl Into<String>,
        intent: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            author: author.into(),
            intent: intent.into(),
        }
    }

    pub fn from_entry(entry: &Entry) -> Self {
        Self::new(&entry.content, &entry.author, &entry.intent)
    }

    /// Full prompt text sent to LLM-backed providers.
    pub fn prompt(&self) -> String {
        prompt::build_validation_prompt(self)
    }
}

/// A provider's parsed answer.
///
/// Field names follow the JSON the providers are asked to return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderVerdict {
    #[serde(default)]
    pub paraphrase: String,
    #[serde(default = "default_intent_match")]
    pub intent_match: bool,
    #[serde(default)]
    pub ambiguities: Vec<String>,
    #[serde(default)]
    pub adversarial_indicators: Vec<String>,
    pub decision: Decision,
    #[serde(default)]
    pub reasoning: String,
}

fn default_intent_match() -> bool {
    true
}

impl ProviderVerdict {
    /// A clean VALID verdict.
    pub fn valid(paraphrase: impl Into<String>) -> Self {
        Self {
            paraphrase: paraphrase.into(),
            intent_match: true,
            ambiguities: Vec::new(),
            adversarial_indicators: Vec::new(),
            decision: Decision::Valid,
            reasoning: String::new(),
        }
    }

    pub fn invalid(reasoning: impl Into<String>) -> Self {
        Self {
            decision: Decision::Invalid,
            intent_match: false,
            reasoning: reasoning.into(),
            ..Self::valid("")
        }
    }

    pub fn needs_review(ambiguity: impl Into<String>) -> Self {
        Self {
            decision: Decision::NeedsReview,
            ambiguities: vec![ambiguity.into()],
            ..Self::valid("")
        }
    }

    pub fn with_adversarial(mut self, indicator: impl Into<String>) -> Self {
        self.adversarial_indicators.push(indicator.into());
        self
    }

    pub fn with_ambiguity(mut self, ambiguity: impl Into<String>) -> Self {
        self.ambiguities.push(ambiguity.into());
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }
}

/// Core trait for semantic judges.
///
/// Implementations are selected by configuration; the consensus validator
/// only ever holds `Arc<dyn Provider>`.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable identifier used in validation records.
    fn id(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    /// Vote weight in aggregation.
    fn weight(&self) -> f64 {
        self.kind().default_weight()
    }

    /// Cheap reachability check.
    async fn is_available(&self) -> bool;

    /// Judge one entry.
    async fn assess(&self, request: &AssessmentRequest) -> Result<ProviderVerdict, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::Timeout { after_ms: 10 }.is_transient());
        assert!(ProviderError::Network("reset".into()).is_transient());
        assert!(ProviderError::RateLimited { retry_after_ms: None }.is_transient());
        assert!(ProviderError::Http { status: 503, body: String::new() }.is_transient());
        assert!(!ProviderError::Http { status: 401, body: String::new() }.is_transient());
        assert!(!ProviderError::Parse("bad json".into()).is_transient());
        assert!(!ProviderError::Cancelled.is_transient());
    }

    #[test]
    fn test_verdict_parses_with_defaults() {
        let v: ProviderVerdict =
            serde_json::from_str(r#"{"decision": "NEEDS_CLARIFICATION"}"#).unwrap();
        assert_eq!(v.decision, Decision::NeedsReview);
        assert!(v.intent_match);
        assert!(v.ambiguities.is_empty());
    }

    #[test]
    fn test_local_weight_lower_than_remote() {
        assert!(ProviderKind::Local.default_weight() < ProviderKind::Remote.default_weight());
    }
}
