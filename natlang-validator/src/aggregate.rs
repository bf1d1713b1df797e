//! Aggregation of provider results into one admission decision.
//!
//! A pure function of the ordered result list, the provider weights and the
//! policy. Rerunning it on the same inputs always yields the same answer.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use natlang_core::{AggregateDecision, CoreError, Decision, DriftLevel, ProviderResult};

/// Thresholds applied when combining verdicts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationPolicy {
    /// Successful providers required for a non-AMBIGUOUS outcome
    pub min_quorum: usize,
    /// Weighted fraction of successful providers that must say clean VALID
    pub valid_threshold: f64,
    /// Weighted fraction of successful providers that must say INVALID
    pub invalid_threshold: f64,
    /// Any provider error downgrades VALID to AMBIGUOUS
    pub require_full_participation: bool,
}

impl Default for AggregationPolicy {
    fn default() -> Self {
        Self {
            min_quorum: 2,
            valid_threshold: 1.0,
            invalid_threshold: 1.0,
            require_full_participation: true,
        }
    }
}

/// Outcome of aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub decision: AggregateDecision,
    pub drift_score: f64,
    pub drift_level: DriftLevel,
    pub insufficient_quorum: bool,
    /// Providers that produced a verdict
    pub quorum: usize,
    /// Quorum actually required (bounded by the provider count)
    pub required: usize,
    /// Most frequent verdict among successful providers
    pub majority: Option<Decision>,
}

impl Aggregate {
    /// The quorum shortfall as an error value, for logging and callers that
    /// want to surface it.
    pub fn quorum_failure(&self) -> Option<CoreError> {
        self.insufficient_quorum.then(|| CoreError::QuorumFailure {
            responded: self.quorum,
            required: self.required,
        })
    }
}

/// Most frequent decision; ties go to the more severe one.
pub fn majority_decision<'a>(decisions: impl Iterator<Item = &'a Decision>) -> Option<(Decision, usize)> {
    let mut counts: HashMap<Decision, usize> = HashMap::new();
    for d in decisions {
        *counts.entry(*d).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by(|(da, ca), (db, cb)| ca.cmp(cb).then(da.severity().cmp(&db.severity())))
}

/// Combine `results` (in provider order) with their `weights`.
///
/// `weights` is indexed like `results`; missing weights count as 1.0.
pub fn aggregate(results: &[ProviderResult], weights: &[f64], policy: &AggregationPolicy) -> Aggregate {
    let total = results.len();
    let required = policy.min_quorum.min(total).max(1);

    let successes: Vec<(usize, &ProviderResult)> = results
        .iter()
        .enumerate()
        .filter(|(_, r)| r.is_success())
        .collect();
    let quorum = successes.len();
    let errors = total - quorum;

    let majority = majority_decision(successes.iter().map(|(_, r)| &r.decision));
    let majority_count = majority.map(|(_, c)| c).unwrap_or(0);
    let drift_score = if total == 0 || quorum == 0 {
        1.0
    } else {
        (total - majority_count) as f64 / total as f64
    };

    let adversarial = successes.iter().any(|(_, r)| !r.adversarial_flags.is_empty());
    let insufficient_quorum = quorum < required;

    let decision = if adversarial {
        AggregateDecision::Invalid
    } else if insufficient_quorum {
        AggregateDecision::Ambiguous
    } else {
        let weight = |i: usize| weights.get(i).copied().unwrap_or(1.0).max(0.0);
        let weight_sum: f64 = successes.iter().map(|(i, _)| weight(*i)).sum();
        let valid_weight: f64 = successes
            .iter()
            .filter(|(_, r)| r.decision == Decision::Valid && r.ambiguity_flags.is_empty())
            .map(|(i, _)| weight(*i))
            .sum();
        let invalid_weight: f64 = successes
            .iter()
            .filter(|(_, r)| r.decision == Decision::Invalid)
            .map(|(i, _)| weight(*i))
            .sum();

        if weight_sum <= 0.0 {
            AggregateDecision::Ambiguous
        } else if valid_weight / weight_sum >= policy.valid_threshold
            && (!policy.require_full_participation || errors == 0)
        {
            AggregateDecision::Valid
        } else if invalid_weight / weight_sum >= policy.invalid_threshold {
            AggregateDecision::Invalid
        } else {
            AggregateDecision::Ambiguous
        }
    };

    Aggregate {
        decision,
        drift_score,
        drift_level: DriftLevel::from_score(drift_score),
        insufficient_quorum,
        quorum,
        required,
        majority: majority.map(|(d, _)| d),
    }
}
