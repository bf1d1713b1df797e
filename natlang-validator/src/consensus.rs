//! Consensus validator - fans an entry out to every provider and aggregates.
//!
//! Each provider call runs under its own timeout and the whole fan-out runs
//! under one deadline. Failures of any kind become `ProviderResult` values
//! with an error set, so one provider can never abort the others. Dropping
//! the future returned by [`ConsensusValidator::assess`] drops every
//! in-flight provider call with it.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use natlang_core::{Entry, ProviderResult, SymbolicResult, ValidationRecord};

use crate::aggregate::{aggregate, Aggregate};
use crate::config::ConsensusConfig;
use crate::provider::{AssessmentRequest, Provider, ProviderError, ProviderVerdict};
use crate::retry::{CircuitBreaker, CircuitState};

/// A provider with its breaker.
struct ProviderSlot {
    provider: Arc<dyn Provider>,
    breaker: CircuitBreaker,
}

/// Provider results plus their aggregate, before the symbolic part is attached.
#[derive(Debug, Clone)]
pub struct ConsensusOutcome {
    /// In configured provider order
    pub provider_results: Vec<ProviderResult>,
    pub aggregate: Aggregate,
}

impl ConsensusOutcome {
    pub fn into_record(self, symbolic_result: SymbolicResult) -> ValidationRecord {
        ValidationRecord {
            symbolic_result,
            provider_results: self.provider_results,
            aggregate_decision: self.aggregate.decision,
            drift_score: self.aggregate.drift_score,
            drift_level: self.aggregate.drift_level,
            insufficient_quorum: self.aggregate.insufficient_quorum,
            quorum: self.aggregate.quorum,
            quality: None,
            rejection: None,
            decided_at: chrono::Utc::now(),
        }
    }
}

/// Status of one configured provider.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProviderStatus {
    pub id: String,
    pub kind: crate::provider::ProviderKind,
    pub weight: f64,
    pub available: bool,
    pub circuit: CircuitState,
}

/// Multi-provider semantic validator.
pub struct ConsensusValidator {
    config: ConsensusConfig,
    slots: Vec<ProviderSlot>,
    permits: Arc<Semaphore>,
}

impl ConsensusValidator {
    pub fn new(config: ConsensusConfig, providers: Vec<Arc<dyn Provider>>) -> Self {
        let slots = providers
            .into_iter()
            .map(|provider| ProviderSlot {
                provider,
                breaker: CircuitBreaker::new(config.circuit_breaker.clone()),
            })
            .collect();
        let permits = Arc::new(Semaphore::new(config.max_concurrent_calls.max(1)));
        Self {
            config,
            slots,
            permits,
        }
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    pub fn provider_ids(&self) -> Vec<String> {
        self.slots.iter().map(|s| s.provider.id().to_string()).collect()
    }

    /// Health-check every provider concurrently.
    pub async fn provider_status(&self) -> Vec<ProviderStatus> {
        join_all(self.slots.iter().map(|slot| async move {
            ProviderStatus {
                id: slot.provider.id().to_string(),
                kind: slot.provider.kind(),
                weight: slot.provider.weight(),
                available: slot.provider.is_available().await,
                circuit: slot.breaker.state(),
            }
        }))
        .await
    }

    /// Judge an entry and build its validation record.
    ///
    /// `deadline` (if earlier than the configured assessment timeout) bounds
    /// the whole fan-out; providers still running then are recorded as
    /// timed out.
    pub async fn assess(
        &self,
        entry: &Entry,
        symbolic_result: SymbolicResult,
        deadline: Option<Instant>,
    ) -> ValidationRecord {
        let request = AssessmentRequest::from_entry(entry);
        self.assess_with_deadline(&request, deadline)
            .await
            .into_record(symbolic_result)
    }

    /// Fan out `request` and aggregate the results.
    pub async fn assess_with_deadline(
        &self,
        request: &AssessmentRequest,
        deadline: Option<Instant>,
    ) -> ConsensusOutcome {
        let started = Instant::now();
        let budget = started + self.config.assessment_timeout();
        let deadline = deadline.map_or(budget, |d| d.min(budget));

        let calls = self.slots.iter().map(|slot| async move {
            match timeout_at(deadline, self.call_provider(slot, request, deadline)).await {
                Ok(result) => result,
                Err(_) => {
                    slot.breaker.record_failure();
                    let elapsed = started.elapsed().as_millis() as u64;
                    ProviderResult::failed(
                        slot.provider.id(),
                        ProviderError::Timeout { after_ms: elapsed }.to_string(),
                        elapsed,
                    )
                }
            }
        });
        let provider_results = join_all(calls).await;

        let weights: Vec<f64> = self.slots.iter().map(|s| s.provider.weight()).collect();
        let aggregate = aggregate(&provider_results, &weights, &self.config.policy());

        if let Some(err) = aggregate.quorum_failure() {
            warn!(error = %err, "Consensus without quorum");
        }
        info!(
            decision = ?aggregate.decision,
            drift = aggregate.drift_score,
            drift_level = ?aggregate.drift_level,
            quorum = aggregate.quorum,
            providers = provider_results.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Consensus reached"
        );

        ConsensusOutcome {
            provider_results,
            aggregate,
        }
    }

    /// One provider: breaker check, bounded attempts, retry on transient errors.
    async fn call_provider(
        &self,
        slot: &ProviderSlot,
        request: &AssessmentRequest,
        deadline: Instant,
    ) -> ProviderResult {
        let id = slot.provider.id();
        let started = Instant::now();

        let Some(permit) = slot.breaker.allow() else {
            debug!(provider = %id, "Circuit open, skipping call");
            return ProviderResult::failed(id, ProviderError::Unavailable("circuit open".into()).to_string(), 0);
        };

        let policy = &self.config.retry;
        let per_call = self.config.provider_timeout();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let outcome = self.attempt(slot, request, per_call, deadline).await;

            let err = match outcome {
                Ok(verdict) => {
                    permit.success();
                    return success_result(id, verdict, started.elapsed(), attempts);
                }
                Err(err) => err,
            };

            let retries_used = attempts - 1;
            if err.is_transient() && retries_used < policy.max_retries {
                let mut delay = policy.delay_for(retries_used);
                if let ProviderError::RateLimited { retry_after_ms: Some(ms) } = &err {
                    delay = delay.max(Duration::from_millis(*ms)).min(Duration::from_millis(policy.max_delay_ms));
                }
                if Instant::now() + delay < deadline {
                    warn!(provider = %id, error = %err, delay_ms = delay.as_millis() as u64, "Retrying provider");
                    tokio::time::sleep(delay).await;
                    continue;
                }
            }

            permit.failure();
            warn!(provider = %id, error = %err, attempts, "Provider failed");
            let mut result = ProviderResult::failed(id, err.to_string(), started.elapsed().as_millis() as u64);
            result.attempts = attempts;
            return result;
        }
    }

    async fn attempt(
        &self,
        slot: &ProviderSlot,
        request: &AssessmentRequest,
        per_call: Duration,
        deadline: Instant,
    ) -> Result<ProviderVerdict, ProviderError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ProviderError::Cancelled)?;

        let call_deadline = (Instant::now() + per_call).min(deadline);
        match timeout_at(call_deadline, slot.provider.assess(request)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                after_ms: per_call.as_millis() as u64,
            }),
        }
    }
}

fn success_result(id: &str, verdict: ProviderVerdict, elapsed: Duration, attempts: u32) -> ProviderResult {
    ProviderResult {
        provider_id: id.to_string(),
        decision: verdict.decision,
        paraphrase: verdict.paraphrase,
        intent_match: Some(verdict.intent_match),
        ambiguity_flags: verdict.ambiguities,
        adversarial_flags: verdict.adversarial_indicators,
        reasoning: (!verdict.reasoning.is_empty()).then_some(verdict.reasoning),
        latency_ms: elapsed.as_millis() as u64,
        error: None,
        attempts,
    }
}
