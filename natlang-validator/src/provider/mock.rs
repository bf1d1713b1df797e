//! Mock provider for testing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::traits::*;

type Scripted = Result<ProviderVerdict, ProviderError>;

/// Scripted provider.
///
/// Replies come from a queue first, then from the fallback reply. An
/// optional delay runs before every reply.
pub struct MockProvider {
    id: String,
    kind: ProviderKind,
    weight: f64,
    available: AtomicBool,
    delay: Duration,
    script: Mutex<VecDeque<Scripted>>,
    fallback: Scripted,
    call_count: AtomicU32,
}

impl MockProvider {
    /// A provider that always answers VALID.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ProviderKind::Mock,
            weight: ProviderKind::Mock.default_weight(),
            available: AtomicBool::new(true),
            delay: Duration::ZERO,
            script: Mutex::new(VecDeque::new()),
            fallback: Ok(ProviderVerdict::valid("Mock paraphrase")),
            call_count: AtomicU32::new(0),
        }
    }

    pub fn with_verdict(mut self, verdict: ProviderVerdict) -> Self {
        self.fallback = Ok(verdict);
        self
    }

    pub fn with_error(mut self, error: ProviderError) -> Self {
        self.fallback = Err(error);
        self
    }

    /// Queue one-off replies consumed before the fallback.
    pub fn with_script(self, replies: impl IntoIterator<Item = Scripted>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.extend(replies);
        }
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_kind(mut self, kind: ProviderKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_available(self, available: bool) -> Self {
        self.available.store(available, Ordering::SeqCst);
        self
    }

    /// Number of times `assess` was entered.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for MockProvider {
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
        self.available.load(Ordering::SeqCst)
    }

    async fn assess(&self, _request: &AssessmentRequest) -> Result<ProviderVerdict, ProviderError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("Mock provider disabled".to_string()));
        }

        let scripted = self.script.lock().ok().and_then(|mut s| s.pop_front());
        scripted.unwrap_or_else(|| self.fallback.clone())
    }
}
