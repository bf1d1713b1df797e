//! Retry policy and per-provider circuit breaker.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Backoff schedule for transient provider failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Extra attempts after the first call
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_exponential_base")]
    pub exponential_base: f64,
    /// Fraction of the delay added or removed at random
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_retries() -> u32 { 1 }
fn default_base_delay_ms() -> u64 { 1_000 }
fn default_exponential_base() -> f64 { 2.0 }
fn default_jitter() -> f64 { 0.1 }
fn default_max_delay_ms() -> u64 { 10_000 }

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            exponential_base: default_exponential_base(),
            jitter: default_jitter(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms as f64 * self.exponential_base.powi(attempt as i32);
        let capped = base.min(self.max_delay_ms as f64);
        let spread = capped * self.jitter.clamp(0.0, 1.0);
        let jittered = if spread > 0.0 {
            capped + rand::thread_rng().gen_range(-spread..=spread)
        } else {
            capped
        };
        Duration::from_millis(jittered.max(0.0) as u64)
    }
}

/// Breaker thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the breaker opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// How long an open breaker rejects calls
    #[serde(default = "default_open_secs")]
    pub open_secs: u64,
}

fn default_failure_threshold() -> u32 { 5 }
fn default_open_secs() -> u64 { 30 }

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            open_secs: default_open_secs(),
        }
    }
}

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CircuitState {
    /// Calls flow normally
    Closed,
    /// Calls are rejected until the open period ends
    Open,
    /// One trial call is allowed through
    HalfOpen,
}

struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Per-provider circuit breaker.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    /// A permit when a call may proceed now.
    ///
    /// In `HalfOpen` only one permit is out at a time. Resolve it with
    /// [`BreakerPermit::success`] or [`BreakerPermit::failure`]; a permit
    /// dropped unresolved frees the trial slot without judging the provider.
    pub fn allow(&self) -> Option<BreakerPermit<'_>> {
        let Ok(mut inner) = self.inner.lock() else {
            return Some(BreakerPermit::new(self, false));
        };
        match inner.state {
            CircuitState::Closed => Some(BreakerPermit::new(self, false)),
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= Duration::from_secs(self.config.open_secs) {
                    debug!("Circuit half-open, allowing trial call");
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    Some(BreakerPermit::new(self, true))
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    None
                } else {
                    inner.trial_in_flight = true;
                    Some(BreakerPermit::new(self, true))
                }
            }
        }
    }

    fn release_trial(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            if inner.state == CircuitState::HalfOpen && inner.trial_in_flight {
                debug!("Trial call abandoned, half-open slot released");
                inner.trial_in_flight = false;
            }
        }
    }

    pub fn record_success(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.state = CircuitState::Closed;
            inner.consecutive_failures = 0;
            inner.opened_at = None;
            inner.trial_in_flight = false;
        }
    }

    pub fn record_failure(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.consecutive_failures += 1;
            inner.trial_in_flight = false;
            let trip = match inner.state {
                CircuitState::HalfOpen => true,
                CircuitState::Closed => inner.consecutive_failures >= self.config.failure_threshold,
                CircuitState::Open => false,
            };
            if trip {
                warn!(failures = inner.consecutive_failures, "Circuit opened");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner
            .lock()
            .map(|inner| inner.state)
            .unwrap_or(CircuitState::Closed)
    }
}

/// Outstanding call admitted by [`CircuitBreaker::allow`].
#[must_use = "resolve the permit with success() or failure()"]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    resolved: bool,
}

impl<'a> BreakerPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            resolved: false,
        }
    }

    /// Whether this is the single half-open trial call.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.resolved = true;
        self.breaker.record_success();
    }

    pub fn failure(mut self) {
        self.resolved = true;
        self.breaker.record_failure();
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.resolved && self.trial {
            self.breaker.release_trial();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..Default::default()
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(2_000));
        assert_eq!(policy.delay_for(10), Duration::from_millis(10_000));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let d = policy.delay_for(0).as_millis();
            assert!((900..=1_100).contains(&d), "delay {} out of band", d);
        }
    }

    #[test]
    fn test_breaker_opens_after_threshold() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 3,
            open_secs: 60,
        });
        for _ in 0..2 {
            cb.record_failure();
        }
        cb.allow().expect("closed breaker admits").failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.allow().is_none());
    }

    #[test]
    fn test_half_open_allows_single_trial() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            open_secs: 0,
        });
        cb.record_failure();
        let trial = cb.allow().expect("trial admitted");
        assert!(trial.is_trial());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.allow().is_none());

        trial.success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow().is_some());
    }

    #[test]
    fn test_dropped_trial_frees_half_open_slot() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            open_secs: 0,
        });
        cb.record_failure();

        // caller cancelled mid-call: permit dropped without a verdict
        drop(cb.allow().expect("trial admitted"));
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let retry = cb.allow().expect("slot released for a new trial");
        assert!(retry.is_trial());
        retry.failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_dropped_closed_permit_changes_nothing() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            open_secs: 60,
        });
        drop(cb.allow());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow().is_some());
    }
}
