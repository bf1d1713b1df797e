//! Configuration for consensus validation and the provider list.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::aggregate::AggregationPolicy;
use crate::provider::{
    AnthropicProvider, HeuristicProvider, OllamaProvider, OpenAiProvider, Provider, ProviderError,
    ProviderKind,
};
use crate::retry::{CircuitBreakerConfig, RetryPolicy};

/// Consensus validator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Successful providers needed for a decisive outcome
    #[serde(default = "default_min_quorum")]
    pub min_quorum: usize,
    /// Budget for one provider attempt
    #[serde(default = "default_provider_timeout_ms")]
    pub provider_timeout_ms: u64,
    /// Budget for a whole assessment, retries included
    #[serde(default = "default_assessment_timeout_ms")]
    pub assessment_timeout_ms: u64,
    /// Outbound calls in flight at once, across all assessments
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,
    /// Weighted share of clean VALID verdicts needed for VALID (1.0 = unanimous)
    #[serde(default = "default_threshold")]
    pub valid_threshold: f64,
    /// Weighted share of INVALID verdicts needed for INVALID
    #[serde(default = "default_threshold")]
    pub invalid_threshold: f64,
    /// Any provider error keeps the outcome from being VALID
    #[serde(default = "default_true")]
    pub require_full_participation: bool,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

fn default_min_quorum() -> usize { 2 }
fn default_provider_timeout_ms() -> u64 { 30_000 }
fn default_assessment_timeout_ms() -> u64 { 60_000 }
fn default_max_concurrent_calls() -> usize { 8 }
fn default_threshold() -> f64 { 1.0 }
fn default_true() -> bool { true }

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            min_quorum: default_min_quorum(),
            provider_timeout_ms: default_provider_timeout_ms(),
            assessment_timeout_ms: default_assessment_timeout_ms(),
            max_concurrent_calls: default_max_concurrent_calls(),
            valid_threshold: default_threshold(),
            invalid_threshold: default_threshold(),
            require_full_participation: default_true(),
            retry: RetryPolicy::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl ConsensusConfig {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    pub fn assessment_timeout(&self) -> Duration {
        Duration::from_millis(self.assessment_timeout_ms)
    }

    pub fn policy(&self) -> AggregationPolicy {
        AggregationPolicy {
            min_quorum: self.min_quorum,
            valid_threshold: self.valid_threshold,
            invalid_threshold: self.invalid_threshold,
            require_full_participation: self.require_full_participation,
        }
    }
}

/// Which provider implementation a `[[providers]]` entry builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Openai,
    Anthropic,
    Ollama,
    Heuristic,
}

/// One configured provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderType,
    /// Identifier in validation records; derived from kind and model if absent
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Name of the environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Treat an OpenAI-compatible endpoint as a local model
    #[serde(default)]
    pub local: bool,
}

impl ProviderConfig {
    pub fn heuristic() -> Self {
        Self {
            kind: ProviderType::Heuristic,
            id: None,
            model: None,
            base_url: None,
            api_key_env: None,
            weight: None,
            timeout_ms: None,
            local: false,
        }
    }

    fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|key| !key.is_empty())
    }
}

/// Errors building providers from configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Provider '{provider}' is missing required field '{field}'")]
    MissingField { provider: String, field: &'static str },

    #[error("Environment variable {0} is not set")]
    MissingApiKey(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Build one provider from its configuration.
pub fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn Provider>, ConfigError> {
    let timeout = Duration::from_millis(config.timeout_ms.unwrap_or(30_000));
    let model = || {
        config.model.clone().ok_or_else(|| ConfigError::MissingField {
            provider: format!("{:?}", config.kind).to_lowercase(),
            field: "model",
        })
    };
    let required_key = || {
        let name = config.api_key_env.clone().unwrap_or_default();
        config.api_key().ok_or(ConfigError::MissingApiKey(name))
    };

    let provider: Arc<dyn Provider> = match config.kind {
        ProviderType::Openai => {
            let model = model()?;
            let base_url = config
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
            let id = config.id.clone().unwrap_or_else(|| format!("openai:{}", model));
            let kind = if config.local { ProviderKind::Local } else { ProviderKind::Remote };
            let mut p = OpenAiProvider::new(id, base_url, model, config.api_key())?
                .with_kind(kind)
                .with_timeout(timeout)?;
            if let Some(w) = config.weight {
                p = p.with_weight(w);
            }
            Arc::new(p)
        }
        ProviderType::Anthropic => {
            let mut p = AnthropicProvider::new(model()?, required_key()?)?.with_timeout(timeout)?;
            if let Some(id) = &config.id {
                p = p.with_id(id);
            }
            if let Some(url) = &config.base_url {
                p = p.with_base_url(url);
            }
            if let Some(w) = config.weight {
                p = p.with_weight(w);
            }
            Arc::new(p)
        }
        ProviderType::Ollama => {
            let mut p = OllamaProvider::new(model()?)?.with_timeout(timeout)?;
            if let Some(id) = &config.id {
                p = p.with_id(id);
            }
            if let Some(url) = &config.base_url {
                p = p.with_base_url(url);
            }
            if let Some(w) = config.weight {
                p = p.with_weight(w);
            }
            Arc::new(p)
        }
        ProviderType::Heuristic => {
            let mut p = HeuristicProvider::new(config.id.clone().unwrap_or_else(|| "heuristic".into()));
            if let Some(w) = config.weight {
                p = p.with_weight(w);
            }
            Arc::new(p)
        }
    };

    info!(provider = %provider.id(), kind = ?provider.kind(), weight = provider.weight(), "Provider configured");
    Ok(provider)
}

/// Build every configured provider, skipping ones that cannot be built.
///
/// Falls back to the heuristic judge when nothing usable is configured.
pub fn build_providers(configs: &[ProviderConfig]) -> Vec<Arc<dyn Provider>> {
    let mut providers = Vec::with_capacity(configs.len());
    for config in configs {
        match build_provider(config) {
            Ok(p) => providers.push(p),
            Err(e) => warn!(kind = ?config.kind, error = %e, "Skipping provider"),
        }
    }

    if providers.is_empty() {
        warn!("No usable providers configured, using the heuristic judge");
        providers.push(Arc::new(HeuristicProvider::default()) as Arc<dyn Provider>);
    }
    providers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConsensusConfig::default();
        assert_eq!(config.min_quorum, 2);
        assert_eq!(config.provider_timeout(), Duration::from_secs(30));
        assert_eq!(config.assessment_timeout(), Duration::from_secs(60));
        assert_eq!(config.retry.max_retries, 1);
        assert!(config.require_full_participation);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ConsensusConfig = serde_json::from_str(r#"{"min_quorum": 3}"#).unwrap();
        assert_eq!(config.min_quorum, 3);
        assert_eq!(config.valid_threshold, 1.0);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
    }

    #[test]
    fn test_missing_model_is_an_error() {
        let config = ProviderConfig {
            kind: ProviderType::Ollama,
            ..ProviderConfig::heuristic()
        };
        assert!(matches!(
            build_provider(&config),
            Err(ConfigError::MissingField { field: "model", .. })
        ));
    }

    #[test]
    fn test_missing_key_skipped_with_fallback() {
        let configs = vec![ProviderConfig {
            kind: ProviderType::Anthropic,
            model: Some("claude-3-5-sonnet".into()),
            api_key_env: Some("NATLANG_TEST_UNSET_KEY_VAR".into()),
            ..ProviderConfig::heuristic()
        }];
        let providers = build_providers(&configs);
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].id(), "heuristic");
    }

    #[test]
    fn test_ollama_built_as_local() {
        let config = ProviderConfig {
            kind: ProviderType::Ollama,
            model: Some("llama3.2".into()),
            ..ProviderConfig::heuristic()
        };
        let provider = build_provider(&config).unwrap();
        assert_eq!(provider.kind(), ProviderKind::Local);
        assert_eq!(provider.id(), "ollama:llama3.2");
    }
}
