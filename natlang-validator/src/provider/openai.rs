//! OpenAI-compatible provider.
//!
//! Works with any OpenAI-compatible API including:
//! - OpenAI API
//! - vLLM
//! - LocalAI
//! - xAI Grok

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::traits::*;
use super::{check_status, http_client, transport_error, DEFAULT_HTTP_TIMEOUT};
use crate::prompt;

const SYSTEM_PROMPT: &str = "You are a careful validator for a natural-language ledger. \
                             Reply with a single JSON object and nothing else.";

/// OpenAI-compatible provider.
pub struct OpenAiProvider {
    id: String,
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    weight: f64,
    kind: ProviderKind,
    timeout: Duration,
}

impl OpenAiProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        id: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            id: id.into(),
            client: http_client(DEFAULT_HTTP_TIMEOUT)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            max_tokens: 1024,
            weight: ProviderKind::Remote.default_weight(),
            kind: ProviderKind::Remote,
            timeout: DEFAULT_HTTP_TIMEOUT,
        })
    }

    /// Provider for the OpenAI API.
    pub fn openai(model: &str, api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::new(format!("openai:{}", model), "https://api.openai.com/v1", model, Some(api_key.into()))
    }

    /// Provider pointing at a local vLLM server.
    pub fn vllm(port: u16, model: &str) -> Result<Self, ProviderError> {
        Ok(Self::new(
            format!("vllm:{}", model),
            format!("http://localhost:{}/v1", port),
            model,
            None,
        )?
        .with_kind(ProviderKind::Local))
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

    /// Change the kind; the weight follows unless set explicitly afterwards.
    pub fn with_kind(mut self, kind: ProviderKind) -> Self {
        self.kind = kind;
        self.weight = kind.default_weight();
        self
    }

    fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn auth_header(&self) -> Option<String> {
        self.api_key.as_ref().map(|k| format!("Bearer {}", k))
    }
}

/// Chat completion request body.
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    response_format: ResponseFormat,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageResponse,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Option<String>,
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    async fn is_available(&self) -> bool {
        let mut request = self.client.get(format!("{}/models", self.base_url));
        if let Some(auth) = self.auth_header() {
            request = request.header(header::AUTHORIZATION, auth);
        }
        request
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    async fn assess(&self, request: &AssessmentRequest) -> Result<ProviderVerdict, ProviderError> {
        let prompt = request.prompt();
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: 0.0,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
            stream: false,
        };

        let mut http_request = self.client.post(self.chat_completions_url());
        if let Some(auth) = self.auth_header() {
            http_request = http_request.header(header::AUTHORIZATION, auth);
        }

        let response = http_request
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;
        let response = check_status(response).await?;

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::Parse("No choices in response".to_string()))?;

        debug!(provider = %self.id, chars = content.len(), "Provider replied");
        prompt::parse_verdict(&content)
    }
}
