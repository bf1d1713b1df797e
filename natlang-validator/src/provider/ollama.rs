//! Local Ollama provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::traits::*;
use super::{check_status, http_client, transport_error, DEFAULT_HTTP_TIMEOUT};
use crate::prompt;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

pub struct OllamaProvider {
    id: String,
    client: Client,
    base_url: String,
    model: String,
    num_predict: u32,
    weight: f64,
    timeout: Duration,
}

impl OllamaProvider {
    pub fn new(model: impl Into<String>) -> Result<Self, ProviderError> {
        let model = model.into();
        Ok(Self {
            id: format!("ollama:{}", model),
            client: http_client(DEFAULT_HTTP_TIMEOUT)?,
            base_url: DEFAULT_BASE_URL.to_string(),
            model,
            num_predict: 1024,
            weight: ProviderKind::Local.default_weight(),
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

    pub fn with_num_predict(mut self, num_predict: u32) -> Self {
        self.num_predict = num_predict;
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[async_trait]
impl Provider for OllamaProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    async fn is_available(&self) -> bool {
        self.client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    async fn assess(&self, request: &AssessmentRequest) -> Result<ProviderVerdict, ProviderError> {
        let prompt = request.prompt();
        let body = GenerateRequest {
            model: &self.model,
            prompt: &prompt,
            stream: false,
            options: GenerateOptions {
                num_predict: self.num_predict,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;
        let response = check_status(response).await?;

        let generated: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        debug!(provider = %self.id, chars = generated.response.len(), "Provider replied");
        prompt::parse_verdict(&generated.response)
    }
}
