//! Provider abstraction layer.
//!
//! Provides a trait-based interface over every semantic judge:
//! - OpenAI-compatible chat APIs (OpenAI, vLLM, LocalAI, Grok)
//! - Anthropic messages API
//! - Local Ollama models
//! - Deterministic offline heuristic judge
//! - Scripted mock provider for testing

pub mod anthropic;
pub mod heuristic;
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod traits;

use std::time::Duration;

use reqwest::{header, Client, Response};

pub use anthropic::AnthropicProvider;
pub use heuristic::HeuristicProvider;
pub use mock::MockProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use traits::{AssessmentRequest, Provider, ProviderError, ProviderKind, ProviderVerdict};

/// Default per-call timeout for HTTP providers.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// JSON client with a request timeout.
pub(crate) fn http_client(timeout: Duration) -> Result<Client, ProviderError> {
    let mut headers = header::HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );

    Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::Unavailable(format!("failed to create HTTP client: {}", e)))
}

/// Map non-success statuses onto provider errors.
pub(crate) async fn check_status(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status.as_u16() == 429 {
        let retry_after_ms = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|secs| secs * 1_000);
        return Err(ProviderError::RateLimited { retry_after_ms });
    }

    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::Http {
        status: status.as_u16(),
        body,
    })
}

/// Map a reqwest failure, filling in the configured timeout.
pub(crate) fn transport_error(e: reqwest::Error, timeout: Duration) -> ProviderError {
    match ProviderError::from(e) {
        ProviderError::Timeout { .. } => ProviderError::Timeout {
            after_ms: timeout.as_millis() as u64,
        },
        other => other,
    }
}
