//! Anthropic messages API provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::traits::*;
use super::{check_status, http_client, transport_error, DEFAULT_HTTP_TIMEOUT};
use crate::prompt;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    id: String,
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    weight: f64,
    timeout: Duration,
}

impl AnthropicProvider {
    pub fn new(model: impl Into<String>, api_key: impl Into<String>) -> Result<Self, ProviderError> {
        let model = model.into();
        Ok(Self {
            id: format!("anthropic:{}", model),
            client: http_client(DEFAULT_HTTP_TIMEOUT)?,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            model,
            max_tokens: 1024,
            weight: ProviderKind::Remote.default_weight(),
            timeout: DEFAULT_HTTP_TIMEOUT,
        })
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, ProviderError> {
        self.client = http_client(timeout)?;
        self.timeout = timeout;
        Ok(self)
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: [UserMessage<'a>; 1],
}

#[derive(Debug, Serialize)]
struct UserMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Remote
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    /// There is no free health endpoint; a configured key is the best signal.
    async fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn assess(&self, request: &AssessmentRequest) -> Result<ProviderVerdict, ProviderError> {
        let prompt = request.prompt();
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: [UserMessage {
                role: "user",
                content: &prompt,
            }],
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;
        let response = check_status(response).await?;

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let text = parsed
            .content
            .into_iter()
            .next()
            .and_then(|block| block.text)
            .ok_or_else(|| ProviderError::Parse("Empty response: no content returned".to_string()))?;

        debug!(provider = %self.id, chars = text.len(), "Provider replied");
        prompt::parse_verdict(&text)
    }
}
