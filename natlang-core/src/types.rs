//! Shared types for the ledger: entries, validation records and blocks.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::hash::compute_hash;
use crate::quality::QualityReport;

/// Open key/value metadata attached to an entry.
///
/// `serde_json::Map` is ordered by key, which keeps block hashes stable.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Lifecycle status of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Pending,
    Valid,
    Ambiguous,
    Rejected,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Pending => "pending",
            ValidationStatus::Valid => "valid",
            ValidationStatus::Ambiguous => "ambiguous",
            ValidationStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ValidationStatus::Pending),
            "valid" => Some(ValidationStatus::Valid),
            "ambiguous" => Some(ValidationStatus::Ambiguous),
            "rejected" => Some(ValidationStatus::Rejected),
            _ => None,
        }
    }
}

/// A single provider's verdict on an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Valid,
    #[serde(alias = "NEEDS_CLARIFICATION")]
    NeedsReview,
    Invalid,
    /// The provider produced no usable verdict
    Error,
}

impl Decision {
    /// Ordering used to break ties: higher is more severe.
    pub fn severity(&self) -> u8 {
        match self {
            Decision::Valid => 0,
            Decision::NeedsReview => 1,
            Decision::Invalid => 2,
            Decision::Error => 3,
        }
    }
}

/// Combined admission decision across providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregateDecision {
    Valid,
    Ambiguous,
    Invalid,
}

impl AggregateDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateDecision::Valid => "VALID",
            AggregateDecision::Ambiguous => "AMBIGUOUS",
            AggregateDecision::Invalid => "INVALID",
        }
    }

    /// Entry status implied by this decision.
    pub fn status(&self) -> ValidationStatus {
        match self {
            AggregateDecision::Valid => ValidationStatus::Valid,
            AggregateDecision::Ambiguous => ValidationStatus::Ambiguous,
            AggregateDecision::Invalid => ValidationStatus::Rejected,
        }
    }
}

/// Reporting band for inter-provider disagreement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DriftLevel {
    D0,
    D1,
    D2,
    D3,
    D4,
}

impl DriftLevel {
    /// Band a drift score in `[0.0, 1.0]`.
    pub fn from_score(score: f64) -> Self {
        if score <= 0.10 {
            DriftLevel::D0
        } else if score <= 0.25 {
            DriftLevel::D1
        } else if score <= 0.45 {
            DriftLevel::D2
        } else if score <= 0.70 {
            DriftLevel::D3
        } else {
            DriftLevel::D4
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            DriftLevel::D0 => "Semantic validation passed; meaning preserved.",
            DriftLevel::D1 => "Minor semantic variation detected; meaning remains aligned.",
            DriftLevel::D2 => {
                "Intent meaning partially ambiguous; clarification required before execution."
            }
            DriftLevel::D3 => {
                "Semantic deviation exceeds safe threshold; human ratification required."
            }
            DriftLevel::D4 => "Semantic break detected; interpretation rejected as unsafe.",
        }
    }
}

/// Outcome of the local, deterministic checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolicResult {
    /// Whether every check passed
    pub passed: bool,
    /// One reason per failed check
    pub reasons: Vec<String>,
}

impl SymbolicResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            reasons: Vec::new(),
        }
    }

    pub fn fail(reasons: Vec<String>) -> Self {
        Self {
            passed: reasons.is_empty(),
            reasons,
        }
    }
}

/// One provider's contribution to a validation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResult {
    /// Provider identifier
    pub provider_id: String,
    /// Verdict (ERROR when the call failed)
    pub decision: Decision,
    /// Provider's restatement of the entry
    #[serde(default)]
    pub paraphrase: String,
    /// Whether the provider judged the content to match the intent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_match: Option<bool>,
    /// Ambiguities the provider detected
    #[serde(default)]
    pub ambiguity_flags: Vec<String>,
    /// Adversarial patterns the provider detected
    #[serde(default)]
    pub adversarial_flags: Vec<String>,
    /// Short explanation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Wall-clock latency including retries
    pub latency_ms: u64,
    /// Failure description, if the call failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Number of calls made (1 or 2)
    #[serde(default = "default_attempts")]
    pub attempts: u32,
}

fn default_attempts() -> u32 {
    1
}

impl ProviderResult {
    /// A failed call folded into a result value.
    pub fn failed(provider_id: impl Into<String>, error: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            provider_id: provider_id.into(),
            decision: Decision::Error,
            paraphrase: String::new(),
            intent_match: None,
            ambiguity_flags: Vec::new(),
            adversarial_flags: Vec::new(),
            reasoning: None,
            latency_ms,
            error: Some(error.into()),
            attempts: 1,
        }
    }

    /// Whether the provider produced a usable verdict.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.decision != Decision::Error
    }
}

/// Full trace of how an entry was judged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub symbolic_result: SymbolicResult,
    /// In configured provider order
    pub provider_results: Vec<ProviderResult>,
    pub aggregate_decision: AggregateDecision,
    /// Fraction of providers not agreeing with the majority
    pub drift_score: f64,
    pub drift_level: DriftLevel,
    /// Fewer providers answered than the configured minimum
    #[serde(default)]
    pub insufficient_quorum: bool,
    /// Number of providers that produced a verdict
    #[serde(default)]
    pub quorum: usize,
    /// Entry quality analysis, when the gate is enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityReport>,
    /// Pre-consensus gate that refused the entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection: Option<GateRejection>,
    pub decided_at: DateTime<Utc>,
}

/// Gates that can refuse an entry between symbolic checks and consensus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gate {
    Quality,
    AssetTransfer,
    Lineage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateRejection {
    pub gate: Gate,
    /// Stable code such as `quality_check_failed` or `double_transfer`
    pub reason: String,
    pub message: String,
}

impl ValidationRecord {
    /// Record for an entry stopped by the symbolic validator.
    pub fn symbolic_rejection(symbolic_result: SymbolicResult) -> Self {
        Self {
            symbolic_result,
            provider_results: Vec::new(),
            aggregate_decision: AggregateDecision::Invalid,
            drift_score: 0.0,
            drift_level: DriftLevel::D0,
            insufficient_quorum: false,
            quorum: 0,
            quality: None,
            rejection: None,
            decided_at: Utc::now(),
        }
    }

    /// Record for an entry refused by a pre-consensus gate.
    pub fn gate_rejection(symbolic_result: SymbolicResult, rejection: GateRejection) -> Self {
        Self {
            rejection: Some(rejection),
            ..Self::symbolic_rejection(symbolic_result)
        }
    }

    /// Attach the quality analysis.
    pub fn with_quality(mut self, quality: Option<QualityReport>) -> Self {
        self.quality = quality;
        self
    }

    /// Record for an entry admitted without consensus.
    pub fn unvalidated(symbolic_result: SymbolicResult) -> Self {
        Self {
            symbolic_result,
            provider_results: Vec::new(),
            aggregate_decision: AggregateDecision::Valid,
            drift_score: 0.0,
            drift_level: DriftLevel::D0,
            insufficient_quorum: false,
            quorum: 0,
            quality: None,
            rejection: None,
            decided_at: Utc::now(),
        }
    }

    pub fn drift_message(&self) -> &'static str {
        self.drift_level.message()
    }

    /// Paraphrases from providers that answered.
    pub fn paraphrases(&self) -> Vec<&str> {
        self.provider_results
            .iter()
            .filter(|r| r.is_success() && !r.paraphrase.is_empty())
            .map(|r| r.paraphrase.as_str())
            .collect()
    }
}

/// A natural-language ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub content: String,
    pub author: String,
    pub intent: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub timestamp: DateTime<Utc>,
    pub validation_status: ValidationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_record: Option<ValidationRecord>,
}

impl Entry {
    /// Create a pending entry stamped with the current time.
    pub fn new(
        content: impl Into<String>,
        author: impl Into<String>,
        intent: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            author: author.into(),
            intent: intent.into(),
            metadata: Metadata::new(),
            timestamp: Utc::now(),
            validation_status: ValidationStatus::Pending,
            validation_record: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Content-addressed identity of the submission.
    ///
    /// Two submissions with equal author, content and timestamp are the same
    /// submission regardless of intent or metadata.
    pub fn fingerprint(&self) -> String {
        let material = format!(
            "{}\n{}\n{}",
            self.author,
            self.content,
            self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
        );
        compute_hash(material.as_bytes())
    }

    /// Attach the final record and derive status from it.
    pub fn apply_record(&mut self, record: ValidationRecord) {
        self.validation_status = record.aggregate_decision.status();
        self.validation_record = Some(record);
    }

    pub fn is_valid(&self) -> bool {
        self.validation_status == ValidationStatus::Valid
    }
}

/// A sealed batch of entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub timestamp: DateTime<Utc>,
    pub entries: Vec<Entry>,
    pub previous_hash: String,
    pub nonce: u64,
    pub hash: String,
}

/// Fields covered by the block hash, in canonical order.
#[derive(Serialize)]
struct BlockHashInput<'a> {
    index: u64,
    timestamp: &'a DateTime<Utc>,
    entries: &'a [Entry],
    previous_hash: &'a str,
    nonce: u64,
}

/// Previous-hash marker of the genesis block.
pub const GENESIS_PREVIOUS_HASH: &str = "0";

impl Block {
    /// Build a block and compute its hash for the given nonce.
    pub fn new(
        index: u64,
        timestamp: DateTime<Utc>,
        entries: Vec<Entry>,
        previous_hash: impl Into<String>,
        nonce: u64,
    ) -> Self {
        let mut block = Self {
            index,
            timestamp,
            entries,
            previous_hash: previous_hash.into(),
            nonce,
            hash: String::new(),
        };
        block.hash = block.compute_hash();
        block
    }

    /// The fixed first block of every chain.
    pub fn genesis() -> Self {
        let epoch = DateTime::<Utc>::UNIX_EPOCH;
        let mut metadata = Metadata::new();
        metadata.insert("type".into(), serde_json::Value::String("genesis".into()));

        let entry = Entry {
            content: "Genesis block: the ledger begins here. Every later entry is prose \
                      judged for meaning before it is committed."
                .into(),
            author: "system".into(),
            intent: "Initialize the NatLangChain".into(),
            metadata,
            timestamp: epoch,
            validation_status: ValidationStatus::Valid,
            validation_record: None,
        };

        Self::new(0, epoch, vec![entry], GENESIS_PREVIOUS_HASH, 0)
    }

    /// Recompute the hash from the block's own fields.
    pub fn compute_hash(&self) -> String {
        let input = BlockHashInput {
            index: self.index,
            timestamp: &self.timestamp,
            entries: &self.entries,
            previous_hash: &self.previous_hash,
            nonce: self.nonce,
        };
        // Every field is plain data with string map keys
        let bytes = serde_json::to_vec(&input).expect("Failed to encode block hash input");
        compute_hash(&bytes)
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }

    pub fn summary(&self) -> BlockSummary {
        BlockSummary {
            index: self.index,
            hash: self.hash.clone(),
            previous_hash: self.previous_hash.clone(),
            timestamp: self.timestamp,
            nonce: self.nonce,
            entry_count: self.entries.len(),
        }
    }
}

/// Block header without entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSummary {
    pub index: u64,
    pub hash: String,
    pub previous_hash: String,
    pub timestamp: DateTime<Utc>,
    pub nonce: u64,
    pub entry_count: usize,
}

/// A sealed entry together with where it lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryLocation {
    pub block_index: u64,
    pub block_hash: String,
    pub entry_index: usize,
    pub entry: Entry,
}

/// Why a validation record was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Submission,
    DryRun,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditKind::Submission => "submission",
            AuditKind::DryRun => "dry_run",
        }
    }
}

/// One validation outcome as it is kept in the durable log.
///
/// Written for every judged submission whatever the decision, so rejected
/// and ambiguous entries leave a trace even though they never reach a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub audit_id: String,
    pub kind: AuditKind,
    pub fingerprint: String,
    pub author: String,
    pub intent: String,
    pub decision: AggregateDecision,
    pub drift_score: f64,
    pub drift_level: DriftLevel,
    pub insufficient_quorum: bool,
    /// Providers that produced a verdict / providers asked
    pub quorum: usize,
    pub providers: usize,
    /// Symbolic or quality failure reasons, if any
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,
    pub record: ValidationRecord,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(kind: AuditKind, entry: &Entry, record: &ValidationRecord) -> Self {
        Self {
            audit_id: uuid::Uuid::new_v4().to_string(),
            kind,
            fingerprint: entry.fingerprint(),
            author: entry.author.clone(),
            intent: entry.intent.clone(),
            decision: record.aggregate_decision,
            drift_score: record.drift_score,
            drift_level: record.drift_level,
            insufficient_quorum: record.insufficient_quorum,
            quorum: record.quorum,
            providers: record.provider_results.len(),
            reasons: record
                .symbolic_result
                .reasons
                .iter()
                .cloned()
                .chain(record.rejection.iter().map(|r| format!("{}: {}", r.reason, r.message)))
                .collect(),
            record: record.clone(),
            recorded_at: record.decided_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drift_bands() {
        assert_eq!(DriftLevel::from_score(0.0), DriftLevel::D0);
        assert_eq!(DriftLevel::from_score(0.10), DriftLevel::D0);
        assert_eq!(DriftLevel::from_score(0.2), DriftLevel::D1);
        assert_eq!(DriftLevel::from_score(1.0 / 3.0), DriftLevel::D2);
        assert_eq!(DriftLevel::from_score(0.5), DriftLevel::D3);
        assert_eq!(DriftLevel::from_score(0.9), DriftLevel::D4);
    }

    #[test]
    fn test_decision_accepts_clarification_alias() {
        let d: Decision = serde_json::from_str("\"NEEDS_CLARIFICATION\"").unwrap();
        assert_eq!(d, Decision::NeedsReview);
        assert_eq!(serde_json::to_string(&d).unwrap(), "\"NEEDS_REVIEW\"");
    }

    #[test]
    fn test_fingerprint_ignores_intent_and_metadata() {
        let ts = Utc::now();
        let a = Entry::new("Alice pays Bob $10", "alice", "payment").with_timestamp(ts);
        let mut meta = Metadata::new();
        meta.insert("topic".into(), "money".into());
        let b = Entry::new("Alice pays Bob $10", "alice", "transfer")
            .with_timestamp(ts)
            .with_metadata(meta);
        assert_eq!(a.fingerprint(), b.fingerprint());

        let c = Entry::new("Alice pays Bob $10", "bob", "payment").with_timestamp(ts);
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_genesis_is_stable() {
        let a = Block::genesis();
        let b = Block::genesis();
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.previous_hash, GENESIS_PREVIOUS_HASH);
        assert_eq!(a.entries[0].author, "system");
        assert_eq!(a.hash, a.compute_hash());
    }

    #[test]
    fn test_block_hash_survives_json_roundtrip() {
        let entry = Entry::new("Alice pays Bob $10", "alice", "payment");
        let block = Block::new(1, Utc::now(), vec![entry], "abc", 7);
        let json = serde_json::to_string(&block).unwrap();
        let restored: Block = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.compute_hash(), block.hash);
    }

    #[test]
    fn test_block_hash_covers_nonce() {
        let ts = Utc::now();
        let a = Block::new(1, ts, vec![], "abc", 0);
        let b = Block::new(1, ts, vec![], "abc", 1);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn test_block_hash_never_falls_back_to_empty_payload() {
        let mut metadata = Metadata::new();
        metadata.insert("terms".into(), serde_json::json!({"net": 30, "parties": ["alice", "bob"]}));
        metadata.insert("ratio".into(), serde_json::json!(0.25));
        let entry = Entry::new("Alice pays Bob $10", "alice", "payment").with_metadata(metadata);
        let block = Block::new(1, Utc::now(), vec![entry], "abc", 0);

        assert_ne!(block.hash, compute_hash(b""));
        assert_ne!(block.hash, Block::new(1, block.timestamp, vec![], "abc", 0).hash);
    }
}
