//! Admission coordinator - the only path from a submission to the chain.
//!
//! Sequences rate limiting, symbolic checks, the quality, lineage and asset
//! gates, consensus, pool admission and sealing for each entry, and writes
//! every validation record to the durable log whatever the decision.
//!
//! ```text
//! Submitted ─▶ SymbolicChecked ─▶ ConsensusPending ─▶ Admitted ─▶ Sealed
//!                    │                   ├──────────▶ Ambiguous
//!                    └───────────────────┴──────────▶ Rejected
//! ```
//!
//! Identical submissions (same fingerprint) are serialized: a retry waits for
//! the first copy to finish and then receives its outcome.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use natlang_core::storage::BackendInfo;
use natlang_core::{
    validate_chain, AdmitOutcome, AggregateDecision, AssetError, AssetRegistry, Block, ChainReport,
    ChainStats, CoreError, DerivativeSpec, Entry, EntryLocation, Gate, GateRejection, LineageRegistry,
    PendingPool, PoolError, QualityAnalyzer, QualityDecision, QualityReport, SealError, Sealer,
    StorageBackend, SymbolicValidator, Tail, TransferHold, TransferIntent, ValidationRecord,
};
use natlang_validator::{ConsensusValidator, Provider, ProviderStatus};

use crate::audit::{AuditKind, AuditStats, ValidationAudit};
use crate::config::Config;
use crate::error::{CoordinatorError, Result};
use crate::rate_limit::RateLimiter;

/// Where an entry is in the admission pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Submitted,
    SymbolicChecked,
    ConsensusPending,
    Admitted,
    Ambiguous,
    Rejected,
    Sealed,
}

impl EntryState {
    pub fn can_advance_to(self, next: EntryState) -> bool {
        use EntryState::*;
        matches!(
            (self, next),
            (Submitted, SymbolicChecked)
                | (SymbolicChecked, ConsensusPending)
                | (SymbolicChecked, Admitted)
                | (SymbolicChecked, Rejected)
                | (ConsensusPending, Admitted)
                | (ConsensusPending, Ambiguous)
                | (ConsensusPending, Rejected)
                | (Admitted, Sealed)
        )
    }

    /// Move forward; the pipeline never goes back.
    pub fn advance(self, next: EntryState) -> Result<EntryState> {
        if self.can_advance_to(next) {
            Ok(next)
        } else {
            Err(CoordinatorError::InvalidTransition { from: self, to: next })
        }
    }

    pub fn from_decision(decision: AggregateDecision) -> Self {
        match decision {
            AggregateDecision::Valid => EntryState::Admitted,
            AggregateDecision::Ambiguous => EntryState::Ambiguous,
            AggregateDecision::Invalid => EntryState::Rejected,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, EntryState::Ambiguous | EntryState::Rejected | EntryState::Sealed)
    }
}

/// Per-submission switches.
#[derive(Debug, Clone)]
pub struct SubmitOptions {
    /// Run consensus; symbolic checks always run
    pub validate: bool,
    /// Seal the pool right after admission
    pub auto_mine: bool,
    /// Bound on the consensus fan-out
    pub deadline: Option<Duration>,
    pub difficulty: Option<u32>,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            validate: true,
            auto_mine: false,
            deadline: None,
            difficulty: None,
        }
    }
}

/// Outcome of a submission.
#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub fingerprint: String,
    pub state: EntryState,
    pub entry: Entry,
    /// Block holding the entry once sealed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_index: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mined_block: Option<Block>,
    /// A retried submission answered from the earlier outcome
    pub duplicate: bool,
}

impl Submission {
    pub fn record(&self) -> Option<&ValidationRecord> {
        self.entry.validation_record.as_ref()
    }

    pub fn decision(&self) -> AggregateDecision {
        self.record()
            .map(|r| r.aggregate_decision)
            .unwrap_or(AggregateDecision::Invalid)
    }
}

/// Recent outcomes by fingerprint, oldest evicted first.
struct OutcomeCache {
    outcomes: DashMap<String, Submission>,
    order: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl OutcomeCache {
    fn new(capacity: usize) -> Self {
        Self {
            outcomes: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    fn get(&self, fingerprint: &str) -> Option<Submission> {
        self.outcomes.get(fingerprint).map(|s| s.value().clone())
    }

    fn insert(&self, mut submission: Submission) {
        submission.mined_block = None;
        submission.duplicate = false;
        let fingerprint = submission.fingerprint.clone();
        if self.outcomes.insert(fingerprint.clone(), submission).is_some() {
            return;
        }
        let mut order = self.order.lock().unwrap_or_else(|e| e.into_inner());
        order.push_back(fingerprint);
        while order.len() > self.capacity {
            if let Some(evicted) = order.pop_front() {
                self.outcomes.remove(&evicted);
            }
        }
    }

    fn remove(&self, fingerprint: &str) {
        if self.outcomes.remove(fingerprint).is_some() {
            let mut order = self.order.lock().unwrap_or_else(|e| e.into_inner());
            order.retain(|f| f != fingerprint);
        }
    }

    fn mark_sealed(&self, fingerprint: &str, block_index: u64) {
        if let Some(mut outcome) = self.outcomes.get_mut(fingerprint) {
            outcome.state = EntryState::Sealed;
            outcome.block_index = Some(block_index);
        }
    }

    fn sealed_at(&self, fingerprint: &str) -> Option<u64> {
        self.outcomes
            .get(fingerprint)
            .filter(|s| s.state == EntryState::Sealed)
            .and_then(|s| s.block_index)
    }
}

/// Per-fingerprint locks so identical submissions are judged one at a time.
#[derive(Default)]
struct SubmissionClaims {
    claims: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl SubmissionClaims {
    async fn claim(&self, fingerprint: &str) -> Claim<'_> {
        let lock = self.claims.entry(fingerprint.to_string()).or_default().clone();
        Claim {
            claims: &self.claims,
            fingerprint: fingerprint.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.claims.len()
    }
}

struct Claim<'a> {
    claims: &'a DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    fingerprint: String,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // the map holds the last reference unless another caller is waiting
        self.claims
            .remove_if(&self.fingerprint, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// What the pre-consensus gates made of an entry.
struct Screening<'a> {
    quality: Option<QualityReport>,
    outcome: std::result::Result<Option<TransferHold<'a>>, GateRejection>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub height: u64,
    pub tail_hash: String,
    pub pending: usize,
    pub providers: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeStats {
    pub chain: ChainStats,
    pub chain_valid: bool,
    pub pending: usize,
    pub backend: BackendInfo,
    pub providers: Vec<String>,
    pub validations: AuditStats,
}

pub struct Coordinator {
    symbolic: SymbolicValidator,
    quality: QualityAnalyzer,
    consensus: ConsensusValidator,
    pool: PendingPool,
    sealer: Sealer,
    storage: Arc<dyn StorageBackend>,
    rate_limiter: RateLimiter,
    audit: ValidationAudit,
    outcomes: OutcomeCache,
    claims: SubmissionClaims,
    assets: Option<AssetRegistry>,
    lineage: Option<LineageRegistry>,
    allow_unvalidated: bool,
    /// Serializes drain + seal
    mine_lock: tokio::sync::Mutex<()>,
    /// Serializes pending snapshots to storage
    persist_lock: tokio::sync::Mutex<()>,
}

impl Coordinator {
    /// Self-check the stored chain and build the pipeline on top of it.
    ///
    /// An empty store gets the genesis block; a chain that fails
    /// verification stops startup with `ChainIntegrity`.
    pub async fn start(
        config: &Config,
        storage: Arc<dyn StorageBackend>,
        providers: Vec<Arc<dyn Provider>>,
    ) -> Result<Self> {
        let mut chain = storage.load_chain().await?;
        if chain.is_empty() {
            let genesis = Block::genesis();
            storage.save_chain(std::slice::from_ref(&genesis)).await?;
            info!(hash = %genesis.hash, "Created genesis block");
            chain.push(genesis);
        }

        let report = validate_chain(&chain);
        if !report.valid {
            error!(
                index = ?report.first_invalid_index,
                reason = ?report.reason,
                "Stored chain failed verification, refusing to start"
            );
        }
        report.into_result()?;

        let tail = chain
            .last()
            .map(Tail::of)
            .ok_or_else(|| CoreError::ChainIntegrity {
                index: 0,
                reason: "chain is empty".to_string(),
            })?;

        let sealed: HashSet<String> = chain
            .iter()
            .flat_map(|b| b.entries.iter().map(Entry::fingerprint))
            .collect();
        let pool = PendingPool::restore(storage.load_pending().await?, sealed.clone()).await;
        let pending = pool.snapshot().await;

        let assets = config
            .node
            .asset_tracking
            .then(|| AssetRegistry::rebuild(&chain, &pending));
        let lineage = config.node.lineage_tracking.then(|| LineageRegistry::rebuild(&chain));

        let audit = ValidationAudit::restore(
            config.audit.max_entries,
            storage.load_validations(config.audit.max_entries).await?,
        );

        let consensus = ConsensusValidator::new(config.consensus.clone(), providers);
        info!(
            height = tail.index,
            tail = %tail.hash,
            pending = pending.len(),
            validations = audit.len().await,
            providers = ?consensus.provider_ids(),
            "Coordinator ready"
        );

        Ok(Self {
            symbolic: SymbolicValidator::new(config.symbolic.clone()),
            quality: QualityAnalyzer::new(config.quality.clone()),
            consensus,
            pool,
            sealer: Sealer::new(config.sealer.clone(), storage.clone(), tail).with_sealed(sealed),
            storage,
            rate_limiter: RateLimiter::new(config.rate_limit.clone()),
            audit,
            outcomes: OutcomeCache::new(config.node.outcome_cache_size),
            claims: SubmissionClaims::default(),
            assets,
            lineage,
            allow_unvalidated: config.node.allow_unvalidated,
            mine_lock: tokio::sync::Mutex::new(()),
            persist_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Run an entry through the pipeline.
    ///
    /// Rejections and ambiguous outcomes are returned as `Ok` with the full
    /// record; `Err` is reserved for requests that could not be judged or
    /// whose admission could not be made durable.
    pub async fn submit(&self, mut entry: Entry, options: SubmitOptions) -> Result<Submission> {
        if !options.validate && !self.allow_unvalidated {
            return Err(CoordinatorError::UnvalidatedDisabled);
        }
        let fingerprint = entry.fingerprint();

        // a retry waits here until the first copy has an outcome
        let _claim = self.claims.claim(&fingerprint).await;
        if let Some(prior) = self.prior_outcome(&fingerprint).await? {
            info!(fingerprint = %fingerprint, state = ?prior.state, "Returning prior outcome");
            return Ok(prior);
        }
        self.check_rate(&entry.author)?;

        let mut state = EntryState::Submitted;
        let symbolic = self.symbolic.check(&entry, Utc::now());
        state = state.advance(EntryState::SymbolicChecked)?;

        let mut hold = None;
        let record = if !symbolic.passed {
            ValidationRecord::symbolic_rejection(symbolic)
        } else {
            let screening = self.screen(&entry, &fingerprint, true);
            let record = match screening.outcome {
                Err(rejection) => {
                    info!(
                        fingerprint = %fingerprint,
                        gate = ?rejection.gate,
                        reason = %rejection.reason,
                        "Entry refused before consensus"
                    );
                    ValidationRecord::gate_rejection(symbolic, rejection)
                }
                Ok(transfer) => {
                    hold = transfer;
                    if options.validate {
                        state = state.advance(EntryState::ConsensusPending)?;
                        let deadline = options.deadline.map(|d| Instant::now() + d);
                        self.consensus.assess(&entry, symbolic, deadline).await
                    } else {
                        warn!(fingerprint = %fingerprint, author = %entry.author, "Admitting without consensus");
                        ValidationRecord::unvalidated(symbolic)
                    }
                }
            };
            record.with_quality(screening.quality)
        };
        state = state.advance(EntryState::from_decision(record.aggregate_decision))?;

        let audit = self.audit.record(AuditKind::Submission, &entry, &record).await;
        self.storage.append_validation(&audit).await?;
        entry.apply_record(record);

        let mut submission = Submission {
            fingerprint: fingerprint.clone(),
            state,
            entry,
            block_index: None,
            mined_block: None,
            duplicate: false,
        };
        if state != EntryState::Admitted {
            self.outcomes.insert(submission.clone());
            return Ok(submission);
        }

        // cached first so a seal racing this call can mark it
        self.outcomes.insert(submission.clone());
        match self.pool.admit(submission.entry.clone()).await {
            Ok(AdmitOutcome::Admitted) => {}
            Ok(AdmitOutcome::Duplicate(prior)) => {
                submission.entry = *prior;
                self.outcomes.insert(submission.clone());
                submission.duplicate = true;
                return Ok(submission);
            }
            Err(PoolError::AlreadySealed { .. }) => {
                self.outcomes.remove(&fingerprint);
                if let Some(prior) = self.prior_outcome(&fingerprint).await? {
                    return Ok(prior);
                }
                return Err(PoolError::AlreadySealed { fingerprint }.into());
            }
            Err(e) => {
                self.outcomes.remove(&fingerprint);
                return Err(e.into());
            }
        }

        if let Err(e) = self.persist_pending().await {
            error!(error = %e, fingerprint = %fingerprint, "Admission not durable, entry withdrawn");
            self.pool.remove(&fingerprint).await;
            self.outcomes.remove(&fingerprint);
            return Err(e);
        }
        if let Some(hold) = hold {
            hold.keep();
        }

        if options.auto_mine {
            let sealed_in = match self.mine(options.difficulty).await {
                Ok(block) if block.entries.iter().any(|e| e.fingerprint() == fingerprint) => {
                    let index = block.index;
                    submission.mined_block = Some(block);
                    Some(index)
                }
                // a concurrent seal already took it
                Ok(_) | Err(CoordinatorError::NoPendingEntries) => self.outcomes.sealed_at(&fingerprint),
                Err(e) => return Err(e),
            };
            if let Some(index) = sealed_in {
                submission.state = state.advance(EntryState::Sealed)?;
                submission.block_index = Some(index);
            }
        }

        Ok(submission)
    }

    /// Judge an entry without touching the pool or reserving assets.
    pub async fn validate_only(&self, entry: &Entry, deadline: Option<Duration>) -> Result<ValidationRecord> {
        self.check_rate(&entry.author)?;

        let symbolic = self.symbolic.check(entry, Utc::now());
        let record = if symbolic.passed {
            let screening = self.screen(entry, &entry.fingerprint(), false);
            let record = match screening.outcome {
                Err(rejection) => ValidationRecord::gate_rejection(symbolic, rejection),
                Ok(_) => {
                    let deadline = deadline.map(|d| Instant::now() + d);
                    self.consensus.assess(entry, symbolic, deadline).await
                }
            };
            record.with_quality(screening.quality)
        } else {
            ValidationRecord::symbolic_rejection(symbolic)
        };

        let audit = self.audit.record(AuditKind::DryRun, entry, &record).await;
        self.storage.append_validation(&audit).await?;
        Ok(record)
    }

    /// Quality, lineage and asset gates, in that order.
    ///
    /// With `reserve` the asset is held for the entry; otherwise it is only
    /// checked.
    fn screen(&self, entry: &Entry, fingerprint: &str, reserve: bool) -> Screening<'_> {
        let quality = self
            .quality
            .is_enabled()
            .then(|| self.quality.analyze(&entry.content, &entry.intent));
        let outcome = self.gate(entry, fingerprint, quality.as_ref(), reserve);
        Screening { quality, outcome }
    }

    fn gate(
        &self,
        entry: &Entry,
        fingerprint: &str,
        quality: Option<&QualityReport>,
        reserve: bool,
    ) -> std::result::Result<Option<TransferHold<'_>>, GateRejection> {
        if let Some(report) = quality {
            let reason = match report.decision {
                QualityDecision::Reject => Some("quality_check_failed"),
                QualityDecision::NeedsRevision => Some("quality_needs_improvement"),
                _ => None,
            };
            if let Some(reason) = reason {
                return Err(GateRejection {
                    gate: Gate::Quality,
                    reason: reason.to_string(),
                    message: report.summary.clone(),
                });
            }
        }

        if self.lineage.is_some() {
            DerivativeSpec::from_entry(entry).map_err(|message| GateRejection {
                gate: Gate::Lineage,
                reason: "invalid_derivative".to_string(),
                message,
            })?;
        }

        let (Some(assets), Some(transfer)) = (&self.assets, TransferIntent::detect(entry)) else {
            return Ok(None);
        };
        let refused = |e: AssetError| {
            warn!(author = %entry.author, asset = %transfer.asset_id, reason = e.reason(), "Asset transfer refused");
            GateRejection {
                gate: Gate::AssetTransfer,
                reason: match e {
                    AssetError::NotOwner { .. } => "not_owner",
                    _ => "double_transfer",
                }
                .to_string(),
                message: e.to_string(),
            }
        };
        if reserve {
            assets.hold(transfer.clone(), fingerprint).map(Some).map_err(refused)
        } else {
            assets.check(&transfer, fingerprint).map(|_| None).map_err(refused)
        }
    }

    /// The earlier outcome for a fingerprint, from the cache or, once
    /// evicted, from the pool or the chain.
    async fn prior_outcome(&self, fingerprint: &str) -> Result<Option<Submission>> {
        if let Some(prior) = self.outcomes.get(fingerprint) {
            return Ok(Some(Submission {
                duplicate: true,
                ..prior
            }));
        }
        if let Some(entry) = self.pool.get(fingerprint).await {
            return Ok(Some(Submission {
                fingerprint: fingerprint.to_string(),
                state: EntryState::Admitted,
                entry,
                block_index: None,
                mined_block: None,
                duplicate: true,
            }));
        }
        if self.pool.is_sealed(fingerprint).await {
            let found = natlang_core::query::entry_by_fingerprint(&self.chain().await?, fingerprint);
            if let Some(location) = found {
                return Ok(Some(Submission {
                    fingerprint: fingerprint.to_string(),
                    state: EntryState::Sealed,
                    entry: location.entry,
                    block_index: Some(location.block_index),
                    mined_block: None,
                    duplicate: true,
                }));
            }
        }
        Ok(None)
    }

    /// Seal every pending entry into a new block.
    ///
    /// On failure the drained entries go back to the front of the pool.
    pub async fn mine(&self, difficulty: Option<u32>) -> Result<Block> {
        let _guard = self.mine_lock.lock().await;

        let batch = self.pool.drain().await;
        if batch.is_empty() {
            return Err(CoordinatorError::NoPendingEntries);
        }
        let fingerprints: Vec<String> = batch.iter().map(Entry::fingerprint).collect();
        let tail = self.sealer.tail().await;

        match self.sealer.seal(&tail.hash, batch.clone(), difficulty).await {
            Ok(block) => {
                self.pool.mark_sealed(&fingerprints).await;
                for fingerprint in &fingerprints {
                    self.outcomes.mark_sealed(fingerprint, block.index);
                }
                self.settle_sealed(&block);
                // restart drops anything already on the chain from the pending set
                if let Err(e) = self.persist_pending().await {
                    warn!(error = %e, index = block.index, "Pending set not rewritten after seal");
                }
                Ok(block)
            }
            Err(e) => {
                if let SealError::AlreadySealed { fingerprint } = &e {
                    self.pool.mark_sealed(std::iter::once(fingerprint)).await;
                }
                warn!(error = %e, entries = fingerprints.len(), "Seal failed, entries returned to the pool");
                self.pool.requeue(batch).await;
                if let Err(persist) = self.persist_pending().await {
                    warn!(error = %persist, "Pending set not rewritten after failed seal");
                }
                Err(e.into())
            }
        }
    }

    /// Complete asset transfers and index lineage for a committed block.
    fn settle_sealed(&self, block: &Block) {
        if let Some(assets) = &self.assets {
            for entry in &block.entries {
                let Some(transfer) = TransferIntent::detect(entry) else {
                    continue;
                };
                match assets.complete(&transfer.asset_id, &entry.fingerprint()) {
                    Ok(record) => info!(asset = %record.asset_id, from = %record.from, to = %record.to, "Asset transferred"),
                    Err(e) => warn!(error = %e, index = block.index, "Sealed transfer had no reservation"),
                }
            }
        }
        if let Some(lineage) = &self.lineage {
            let links = lineage.register_block(block);
            if links > 0 {
                debug!(index = block.index, links, "Lineage links registered");
            }
        }
    }

    fn check_rate(&self, author: &str) -> Result<()> {
        self.rate_limiter
            .check(author)
            .map_err(|limited| CoordinatorError::RateLimited {
                retry_after_secs: limited.retry_after_secs,
            })
    }

    async fn persist_pending(&self) -> Result<()> {
        let _guard = self.persist_lock.lock().await;
        let pending = self.pool.snapshot().await;
        self.storage.save_all_pending(&pending).await.map_err(|e| {
            warn!(error = %e, pending = pending.len(), "Failed to persist pending entries");
            e.into()
        })
    }

    // ========================================================================
    // Read side
    // ========================================================================

    pub async fn chain(&self) -> Result<Vec<Block>> {
        Ok(self.storage.load_chain().await?)
    }

    pub async fn pending(&self) -> Vec<Entry> {
        self.pool.snapshot().await
    }

    pub async fn validate_chain(&self) -> Result<ChainReport> {
        Ok(validate_chain(&self.chain().await?))
    }

    pub async fn block(&self, index: u64) -> Result<Option<Block>> {
        Ok(self.chain().await?.into_iter().find(|b| b.index == index))
    }

    pub async fn latest_block(&self) -> Result<Option<Block>> {
        Ok(self.chain().await?.pop())
    }

    pub async fn entries_by_author(&self, author: &str) -> Result<Vec<EntryLocation>> {
        Ok(natlang_core::query::entries_by_author(&self.chain().await?, author))
    }

    pub async fn entries_by_intent(&self, keyword: &str) -> Result<Vec<EntryLocation>> {
        Ok(natlang_core::query::entries_by_intent(&self.chain().await?, keyword))
    }

    pub async fn narrative(&self) -> Result<String> {
        Ok(natlang_core::query::narrative(&self.chain().await?))
    }

    pub async fn stats(&self) -> Result<NodeStats> {
        let chain = self.chain().await?;
        Ok(NodeStats {
            chain: natlang_core::query::stats(&chain),
            chain_valid: validate_chain(&chain).valid,
            pending: self.pool.len().await,
            backend: self.storage.info().await?,
            providers: self.consensus.provider_ids(),
            validations: self.audit.stats().await,
        })
    }

    pub async fn health(&self) -> Health {
        let tail = self.sealer.tail().await;
        Health {
            status: "healthy",
            height: tail.index,
            tail_hash: tail.hash,
            pending: self.pool.len().await,
            providers: self.consensus.provider_ids(),
        }
    }

    pub async fn provider_status(&self) -> Vec<ProviderStatus> {
        self.consensus.provider_status().await
    }

    pub fn audit(&self) -> &ValidationAudit {
        &self.audit
    }

    /// Asset ownership, when asset tracking is on.
    pub fn assets(&self) -> Option<&AssetRegistry> {
        self.assets.as_ref()
    }

    /// Derivative links, when lineage tracking is on.
    pub fn lineage(&self) -> Option<&LineageRegistry> {
        self.lineage.as_ref()
    }

    /// Durable validation records, newest first.
    pub async fn validation_log(&self, limit: usize) -> Result<Vec<crate::audit::AuditEntry>> {
        Ok(self.storage.load_validations(limit).await?)
    }

    /// Flush the pending set and close storage.
    pub async fn shutdown(&self) -> Result<()> {
        self.persist_pending().await?;
        self.storage.close().await?;
        info!("Coordinator stopped");
        Ok(())
    }
}
