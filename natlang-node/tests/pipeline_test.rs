//! Admission pipeline integration tests
//!
//! Drive the coordinator end to end against in-memory and JSON-file
//! storage with scripted providers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio_test::assert_ok;

use natlang_core::storage::{BackendInfo, BackendKind, JsonFileBackend, MemoryBackend};
use natlang_core::{
    AggregateDecision, AuditEntry, Block, CoreError, DriftLevel, Entry, EntryRef, Gate, Metadata,
    SealError, StorageBackend, StorageError, ValidationStatus,
};
use natlang_node::{Config, Coordinator, CoordinatorError, EntryState, SubmitOptions};
use natlang_validator::{MockProvider, Provider, ProviderVerdict};

// ============================================================================
// Helpers
// ============================================================================

fn test_config() -> Config {
    let mut config = Config::default();
    config.consensus.provider_timeout_ms = 100;
    config.consensus.assessment_timeout_ms = 2_000;
    config.consensus.retry.base_delay_ms = 10;
    config.consensus.retry.jitter = 0.0;
    config.quality.min_chars = 5;
    config
}

fn valid_providers(n: usize) -> Vec<Arc<dyn Provider>> {
    (0..n)
        .map(|i| Arc::new(MockProvider::new(format!("mock-{}", i))) as Arc<dyn Provider>)
        .collect()
}

async fn memory_node(config: &Config, providers: Vec<Arc<dyn Provider>>) -> Coordinator {
    let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    Coordinator::start(config, storage, providers).await.unwrap()
}

async fn json_node(path: &std::path::Path, config: &Config) -> Result<Coordinator, CoordinatorError> {
    let storage: Arc<dyn StorageBackend> = Arc::new(JsonFileBackend::open(path).await.unwrap());
    Coordinator::start(config, storage, valid_providers(3)).await
}

fn payment() -> Entry {
    Entry::new("Alice pays Bob $10 for the bicycle", "alice", "payment")
}

fn transfer(asset_id: &str, author: &str, recipient: &str) -> Entry {
    let mut metadata = Metadata::new();
    metadata.insert("asset_id".to_string(), json!(asset_id));
    metadata.insert("recipient".to_string(), json!(recipient));
    Entry::new(
        format!("{} transfers the bicycle {} to {}", author, asset_id, recipient),
        author,
        "transfer",
    )
    .with_metadata(metadata)
}

/// Memory storage whose pending-set writes can be switched off.
#[derive(Default)]
struct FlakyBackend {
    inner: MemoryBackend,
    fail_pending: AtomicBool,
}

#[async_trait]
impl StorageBackend for FlakyBackend {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    async fn load_chain(&self) -> Result<Vec<Block>, StorageError> {
        self.inner.load_chain().await
    }

    async fn append_block(&self, block: &Block) -> Result<(), StorageError> {
        self.inner.append_block(block).await
    }

    async fn save_chain(&self, chain: &[Block]) -> Result<(), StorageError> {
        self.inner.save_chain(chain).await
    }

    async fn load_pending(&self) -> Result<Vec<Entry>, StorageError> {
        self.inner.load_pending().await
    }

    async fn save_all_pending(&self, entries: &[Entry]) -> Result<(), StorageError> {
        if self.fail_pending.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::other("disk full")));
        }
        self.inner.save_all_pending(entries).await
    }

    async fn append_validation(&self, record: &AuditEntry) -> Result<(), StorageError> {
        self.inner.append_validation(record).await
    }

    async fn load_validations(&self, limit: usize) -> Result<Vec<AuditEntry>, StorageError> {
        self.inner.load_validations(limit).await
    }

    async fn info(&self) -> Result<BackendInfo, StorageError> {
        self.inner.info().await
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.inner.close().await
    }
}

// ============================================================================
// Admission
// ============================================================================

#[tokio::test]
async fn test_valid_entry_is_admitted_and_sealed_on_tail() {
    let node = memory_node(&test_config(), valid_providers(3)).await;
    let genesis_hash = node.health().await.tail_hash;

    let submission = node.submit(payment(), SubmitOptions::default()).await.unwrap();
    assert_eq!(submission.state, EntryState::Admitted);
    assert_eq!(submission.decision(), AggregateDecision::Valid);
    assert_eq!(submission.entry.validation_status, ValidationStatus::Valid);

    let record = submission.record().unwrap();
    assert_eq!(record.provider_results.len(), 3);
    assert_eq!(record.drift_level, DriftLevel::D0);
    assert_eq!(node.pending().await.len(), 1);

    let block = node.mine(None).await.unwrap();
    assert_eq!(block.index, 1);
    assert_eq!(block.previous_hash, genesis_hash);
    assert_eq!(block.entries.len(), 1);
    assert_eq!(block.entries[0].fingerprint(), submission.fingerprint);

    assert!(node.pending().await.is_empty());
    assert_eq!(node.chain().await.unwrap().len(), 2);
    assert!(node.validate_chain().await.unwrap().valid);
    assert_eq!(node.health().await.tail_hash, block.hash);
}

#[tokio::test]
async fn test_provider_timeout_leaves_entry_ambiguous() {
    let mut providers = valid_providers(2);
    providers.push(Arc::new(MockProvider::new("slow").with_delay(Duration::from_secs(2))));
    let node = memory_node(&test_config(), providers).await;

    let submission = node.submit(payment(), SubmitOptions::default()).await.unwrap();

    assert_eq!(submission.state, EntryState::Ambiguous);
    let record = submission.record().unwrap();
    assert!(!record.insufficient_quorum);
    assert!((record.drift_score - 1.0 / 3.0).abs() < 1e-9);
    assert!(record.provider_results[2].error.is_some());
    assert!(node.pending().await.is_empty());
    assert_eq!(node.audit().len().await, 1);
}

#[tokio::test]
async fn test_caller_deadline_bounds_consensus() {
    let providers: Vec<Arc<dyn Provider>> = (0..3)
        .map(|i| {
            Arc::new(MockProvider::new(format!("slow-{}", i)).with_delay(Duration::from_secs(5)))
                as Arc<dyn Provider>
        })
        .collect();
    let mut config = test_config();
    config.consensus.provider_timeout_ms = 10_000;
    config.consensus.assessment_timeout_ms = 20_000;
    let node = memory_node(&config, providers).await;

    let started = std::time::Instant::now();
    let options = SubmitOptions {
        deadline: Some(Duration::from_millis(150)),
        ..SubmitOptions::default()
    };
    let submission = node.submit(payment(), options).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(submission.state, EntryState::Ambiguous);
    assert!(submission.record().unwrap().insufficient_quorum);
}

#[tokio::test]
async fn test_adversarial_flag_rejects() {
    let mut providers = valid_providers(2);
    providers.push(Arc::new(
        MockProvider::new("watchdog")
            .with_verdict(ProviderVerdict::valid("Pays Bob").with_adversarial("hidden instruction")),
    ));
    let node = memory_node(&test_config(), providers).await;

    let submission = node.submit(payment(), SubmitOptions::default()).await.unwrap();
    assert_eq!(submission.state, EntryState::Rejected);
    assert_eq!(submission.entry.validation_status, ValidationStatus::Rejected);
    assert!(node.pending().await.is_empty());
}

#[tokio::test]
async fn test_forbidden_metadata_never_reaches_providers() {
    let counted = Arc::new(MockProvider::new("counted"));
    let providers: Vec<Arc<dyn Provider>> = vec![counted.clone(), Arc::new(MockProvider::new("other"))];
    let node = memory_node(&test_config(), providers).await;

    let mut metadata = Metadata::new();
    metadata.insert("force_accept".to_string(), json!(true));
    let entry = payment().with_metadata(metadata);

    let submission = node.submit(entry, SubmitOptions::default()).await.unwrap();

    assert_eq!(submission.state, EntryState::Rejected);
    let record = submission.record().unwrap();
    assert!(!record.symbolic_result.passed);
    assert!(record.symbolic_result.reasons.iter().any(|r| r.contains("force_accept")));
    assert!(record.provider_results.is_empty());
    assert_eq!(counted.call_count(), 0);
}

#[tokio::test]
async fn test_unvalidated_submissions_need_opt_in() {
    let node = memory_node(&test_config(), valid_providers(2)).await;
    let options = SubmitOptions {
        validate: false,
        ..SubmitOptions::default()
    };
    let err = node.submit(payment(), options.clone()).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::UnvalidatedDisabled));

    let mut config = test_config();
    config.node.allow_unvalidated = true;
    let node = memory_node(&config, valid_providers(2)).await;
    let submission = node.submit(payment(), options).await.unwrap();
    assert_eq!(submission.state, EntryState::Admitted);
    assert!(submission.record().unwrap().provider_results.is_empty());
}

#[tokio::test]
async fn test_per_author_rate_limit() {
    let mut config = test_config();
    config.rate_limit.per_author = 2;
    let node = memory_node(&config, valid_providers(2)).await;

    for i in 0..2 {
        let entry = Entry::new(format!("Alice note number {}", i), "alice", "note");
        assert_ok!(node.submit(entry, SubmitOptions::default()).await);
    }
    let err = node
        .submit(Entry::new("One too many", "alice", "note"), SubmitOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::RateLimited { .. }));

    // other authors are unaffected
    assert_ok!(node.submit(Entry::new("Bob's note", "bob", "note"), SubmitOptions::default()).await);
}

// ============================================================================
// Idempotency
// ============================================================================

#[tokio::test]
async fn test_resubmission_returns_prior_outcome() {
    let counted = Arc::new(MockProvider::new("counted"));
    let providers: Vec<Arc<dyn Provider>> = vec![counted.clone(), Arc::new(MockProvider::new("other"))];
    let node = memory_node(&test_config(), providers).await;

    let timestamp = Utc::now();
    let entry = payment().with_timestamp(timestamp);

    let first = node.submit(entry.clone(), SubmitOptions::default()).await.unwrap();
    assert!(!first.duplicate);

    let second = node.submit(entry.clone(), SubmitOptions::default()).await.unwrap();
    assert!(second.duplicate);
    assert_eq!(second.fingerprint, first.fingerprint);
    assert_eq!(second.state, EntryState::Admitted);
    assert_eq!(node.pending().await.len(), 1);
    assert_eq!(counted.call_count(), 1);

    let block = node.mine(None).await.unwrap();

    let third = node.submit(entry, SubmitOptions::default()).await.unwrap();
    assert!(third.duplicate);
    assert_eq!(third.state, EntryState::Sealed);
    assert_eq!(third.block_index, Some(block.index));
    assert!(node.pending().await.is_empty());
}

#[tokio::test]
async fn test_auto_mine_seals_immediately() {
    let node = memory_node(&test_config(), valid_providers(2)).await;
    let options = SubmitOptions {
        auto_mine: true,
        ..SubmitOptions::default()
    };

    let submission = node.submit(payment(), options).await.unwrap();
    assert_eq!(submission.state, EntryState::Sealed);
    assert_eq!(submission.block_index, Some(1));
    let block = submission.mined_block.unwrap();
    assert_eq!(block.entries.len(), 1);
    assert!(node.pending().await.is_empty());
}

#[tokio::test]
async fn test_retry_during_consensus_waits_for_sealed_outcome() {
    let providers: Vec<Arc<dyn Provider>> = (0..3)
        .map(|i| {
            Arc::new(MockProvider::new(format!("slow-{}", i)).with_delay(Duration::from_millis(300)))
                as Arc<dyn Provider>
        })
        .collect();
    let mut config = test_config();
    config.consensus.provider_timeout_ms = 2_000;
    let node = Arc::new(memory_node(&config, providers).await);
    let entry = payment();
    let fingerprint = entry.fingerprint();

    let first = {
        let node = node.clone();
        let entry = entry.clone();
        tokio::spawn(async move {
            let options = SubmitOptions {
                auto_mine: true,
                ..SubmitOptions::default()
            };
            node.submit(entry, options).await
        })
    };
    tokio::time::sleep(Duration::from_millis(150)).await;
    let retry = node.submit(entry, SubmitOptions::default()).await.unwrap();
    let first = first.await.unwrap().unwrap();

    assert_eq!(first.state, EntryState::Sealed);
    assert!(retry.duplicate);
    assert_eq!(retry.state, EntryState::Sealed);
    assert_eq!(retry.block_index, first.block_index);
    assert!(matches!(node.mine(None).await, Err(CoordinatorError::NoPendingEntries)));

    let copies = node
        .chain()
        .await
        .unwrap()
        .iter()
        .flat_map(|b| b.entries.iter())
        .filter(|e| e.fingerprint() == fingerprint)
        .count();
    assert_eq!(copies, 1);
}

#[tokio::test]
async fn test_concurrent_identical_submissions_admit_once() {
    let node = Arc::new(memory_node(&test_config(), valid_providers(2)).await);
    let entry = payment();

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let node = node.clone();
            let entry = entry.clone();
            tokio::spawn(async move { node.submit(entry, SubmitOptions::default()).await })
        })
        .collect();
    let mut fresh = 0;
    for handle in handles {
        let submission = handle.await.unwrap().unwrap();
        assert_eq!(submission.state, EntryState::Admitted);
        if !submission.duplicate {
            fresh += 1;
        }
    }

    assert_eq!(fresh, 1);
    assert_eq!(node.pending().await.len(), 1);
}

// ============================================================================
// Sealing
// ============================================================================

#[tokio::test]
async fn test_concurrent_submissions_seal_in_one_block() {
    let node = Arc::new(memory_node(&test_config(), valid_providers(3)).await);

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let node = node.clone();
            tokio::spawn(async move {
                let entry = Entry::new(format!("Entry body {}", i), format!("author-{}", i), "note");
                node.submit(entry, SubmitOptions::default()).await
            })
        })
        .collect();
    for handle in handles {
        let submission = handle.await.unwrap().unwrap();
        assert_eq!(submission.state, EntryState::Admitted);
    }

    assert_eq!(node.pending().await.len(), 20);
    let block = node.mine(None).await.unwrap();
    assert_eq!(block.entries.len(), 20);
    assert!(node.pending().await.is_empty());
    assert!(matches!(node.mine(None).await, Err(CoordinatorError::NoPendingEntries)));
}

#[tokio::test]
async fn test_failed_seal_requeues_batch() {
    let node = memory_node(&test_config(), valid_providers(2)).await;
    node.submit(payment(), SubmitOptions::default()).await.unwrap();

    let err = node.mine(Some(99)).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::Seal(SealError::DifficultyTooHigh { .. })));
    assert_eq!(node.pending().await.len(), 1);
    assert_eq!(node.chain().await.unwrap().len(), 1);

    let block = node.mine(None).await.unwrap();
    assert_eq!(block.entries.len(), 1);
}

#[tokio::test]
async fn test_mining_empty_pool_fails() {
    let node = memory_node(&test_config(), valid_providers(2)).await;
    let err = node.mine(None).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::NoPendingEntries));
}

// ============================================================================
// Restart
// ============================================================================

#[tokio::test]
async fn test_pending_entries_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chain_data.json");
    let config = test_config();

    let node = json_node(&path, &config).await.unwrap();
    node.submit(payment(), SubmitOptions::default()).await.unwrap();
    node.shutdown().await.unwrap();
    drop(node);

    let node = json_node(&path, &config).await.unwrap();
    assert_eq!(node.pending().await.len(), 1);
    let block = node.mine(None).await.unwrap();
    node.shutdown().await.unwrap();
    drop(node);

    let node = json_node(&path, &config).await.unwrap();
    assert!(node.pending().await.is_empty());
    assert_eq!(node.health().await.tail_hash, block.hash);
    assert_eq!(node.entries_by_author("alice").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_rejected_records_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chain_data.json");
    let config = test_config();

    let mut metadata = Metadata::new();
    metadata.insert("force_accept".to_string(), json!(true));
    let entry = payment().with_metadata(metadata);

    let node = json_node(&path, &config).await.unwrap();
    let submission = node.submit(entry, SubmitOptions::default()).await.unwrap();
    assert_eq!(submission.state, EntryState::Rejected);
    node.shutdown().await.unwrap();
    drop(node);

    let node = json_node(&path, &config).await.unwrap();
    let log = node.validation_log(10).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].fingerprint, submission.fingerprint);
    assert_eq!(log[0].decision, AggregateDecision::Invalid);
    assert!(log[0].reasons.iter().any(|r| r.contains("force_accept")));

    let recent = node.audit().recent(10).await;
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].fingerprint, submission.fingerprint);
}

#[tokio::test]
async fn test_unpersisted_admission_is_withdrawn() {
    let storage = Arc::new(FlakyBackend::default());
    let node = Coordinator::start(&test_config(), storage.clone(), valid_providers(2))
        .await
        .unwrap();

    storage.fail_pending.store(true, Ordering::SeqCst);
    let err = node.submit(payment(), SubmitOptions::default()).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::Storage(_)));
    assert!(node.pending().await.is_empty());

    // nothing was cached, so the retry runs the pipeline again
    storage.fail_pending.store(false, Ordering::SeqCst);
    let submission = node.submit(payment(), SubmitOptions::default()).await.unwrap();
    assert_eq!(submission.state, EntryState::Admitted);
    assert!(!submission.duplicate);
    assert_eq!(storage.load_pending().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_withdrawn_transfer_releases_asset() {
    let storage = Arc::new(FlakyBackend::default());
    let node = Coordinator::start(&test_config(), storage.clone(), valid_providers(2))
        .await
        .unwrap();

    storage.fail_pending.store(true, Ordering::SeqCst);
    assert!(node
        .submit(transfer("bike-7", "alice", "bob"), SubmitOptions::default())
        .await
        .is_err());
    let assets = node.assets().unwrap();
    assert!(assets.pending_transfer("bike-7").is_none());
    assert_eq!(assets.owner("bike-7"), None);
}

#[tokio::test]
async fn test_tampered_chain_refuses_to_start() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chain_data.json");
    let config = test_config();

    let node = json_node(&path, &config).await.unwrap();
    node.submit(payment(), SubmitOptions::default()).await.unwrap();
    node.mine(None).await.unwrap();
    node.shutdown().await.unwrap();
    drop(node);

    let mut raw: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    raw["chain"][1]["entries"][0]["content"] = json!("Alice pays Bob $10,000 for the bicycle");
    std::fs::write(&path, serde_json::to_vec(&raw).unwrap()).unwrap();

    let err = json_node(&path, &config).await.err().unwrap();
    match err {
        CoordinatorError::Core(CoreError::ChainIntegrity { index, .. }) => assert_eq!(index, 1),
        other => panic!("expected chain integrity failure, got {}", other),
    }
}

// ============================================================================
// Gates
// ============================================================================

#[tokio::test]
async fn test_low_quality_entry_is_refused_before_consensus() {
    let counted = Arc::new(MockProvider::new("counted"));
    let providers: Vec<Arc<dyn Provider>> = vec![counted.clone(), Arc::new(MockProvider::new("other"))];
    let node = memory_node(&test_config(), providers).await;

    let padded = Entry::new("The buyer pays the seller. ".repeat(8), "alice", "payment");
    let submission = node.submit(padded, SubmitOptions::default()).await.unwrap();

    assert_eq!(submission.state, EntryState::Rejected);
    let record = submission.record().unwrap();
    let rejection = record.rejection.as_ref().unwrap();
    assert_eq!(rejection.gate, Gate::Quality);
    assert_eq!(rejection.reason, "quality_check_failed");
    assert!(record.quality.is_some());
    assert!(record.provider_results.is_empty());
    assert_eq!(counted.call_count(), 0);
    assert!(node.pending().await.is_empty());
}

#[tokio::test]
async fn test_short_entry_fails_default_quality_floor() {
    let mut config = test_config();
    config.quality = Default::default();
    let node = memory_node(&config, valid_providers(2)).await;

    let submission = node
        .submit(Entry::new("Bob's note", "bob", "note"), SubmitOptions::default())
        .await
        .unwrap();
    assert_eq!(submission.state, EntryState::Rejected);
    assert_eq!(submission.record().unwrap().rejection.as_ref().unwrap().gate, Gate::Quality);

    config.quality.enabled = false;
    let node = memory_node(&config, valid_providers(2)).await;
    let submission = node
        .submit(Entry::new("Bob's note", "bob", "note"), SubmitOptions::default())
        .await
        .unwrap();
    assert_eq!(submission.state, EntryState::Admitted);
    assert!(submission.record().unwrap().quality.is_none());
}

#[tokio::test]
async fn test_second_transfer_of_pending_asset_is_refused() {
    let node = memory_node(&test_config(), valid_providers(2)).await;

    let first = node
        .submit(transfer("bike-1", "alice", "bob"), SubmitOptions::default())
        .await
        .unwrap();
    assert_eq!(first.state, EntryState::Admitted);
    let assets = node.assets().unwrap();
    assert_eq!(assets.pending_transfer("bike-1").unwrap().fingerprint, first.fingerprint);

    let second = node
        .submit(transfer("bike-1", "alice", "carol"), SubmitOptions::default())
        .await
        .unwrap();
    assert_eq!(second.state, EntryState::Rejected);
    let rejection = second.record().unwrap().rejection.clone().unwrap();
    assert_eq!(rejection.gate, Gate::AssetTransfer);
    assert_eq!(rejection.reason, "double_transfer");
    assert_eq!(node.pending().await.len(), 1);

    node.mine(None).await.unwrap();
    assert_eq!(assets.owner("bike-1").as_deref(), Some("bob"));
    assert!(assets.pending_transfer("bike-1").is_none());
    assert_eq!(assets.history(Some("bike-1")).len(), 1);

    let stale = node
        .submit(transfer("bike-1", "alice", "dave"), SubmitOptions::default())
        .await
        .unwrap();
    assert_eq!(stale.state, EntryState::Rejected);
    assert_eq!(stale.record().unwrap().rejection.as_ref().unwrap().reason, "not_owner");
}

#[tokio::test]
async fn test_failed_consensus_releases_asset() {
    let providers: Vec<Arc<dyn Provider>> = (0..2)
        .map(|i| {
            Arc::new(MockProvider::new(format!("slow-{}", i)).with_delay(Duration::from_secs(2)))
                as Arc<dyn Provider>
        })
        .collect();
    let node = memory_node(&test_config(), providers).await;

    let submission = node
        .submit(transfer("bike-2", "alice", "bob"), SubmitOptions::default())
        .await
        .unwrap();
    assert_ne!(submission.state, EntryState::Admitted);
    let assets = node.assets().unwrap();
    assert!(assets.pending_transfer("bike-2").is_none());
    assert_eq!(assets.owner("bike-2"), None);
}

#[tokio::test]
async fn test_asset_tracking_can_be_disabled() {
    let mut config = test_config();
    config.node.asset_tracking = false;
    let node = memory_node(&config, valid_providers(2)).await;

    assert!(node.assets().is_none());
    for recipient in ["bob", "carol"] {
        let submission = node
            .submit(transfer("bike-3", "alice", recipient), SubmitOptions::default())
            .await
            .unwrap();
        assert_eq!(submission.state, EntryState::Admitted);
    }
}

#[tokio::test]
async fn test_sealed_derivatives_are_indexed() {
    let node = memory_node(&test_config(), valid_providers(2)).await;
    node.submit(payment(), SubmitOptions::default()).await.unwrap();
    let parent_block = node.mine(None).await.unwrap();

    let mut metadata = Metadata::new();
    metadata.insert(
        "parent_refs".to_string(),
        json!([{ "block_index": parent_block.index, "entry_index": 0 }]),
    );
    metadata.insert("derivative_type".to_string(), json!("amendment"));
    let amendment = Entry::new("Alice pays Bob $12 for the bicycle instead", "alice", "amendment")
        .with_metadata(metadata);
    node.submit(amendment, SubmitOptions::default()).await.unwrap();

    let lineage = node.lineage().unwrap();
    let parent = EntryRef::new(parent_block.index, 0);
    assert!(!lineage.has_derivatives(parent));

    let child_block = node.mine(None).await.unwrap();
    let children = lineage.derivatives(parent, false, 10);
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].entry_ref(), EntryRef::new(child_block.index, 0));
    assert!(lineage.is_derivative(EntryRef::new(child_block.index, 0)));
}

#[tokio::test]
async fn test_malformed_parent_refs_are_refused() {
    let node = memory_node(&test_config(), valid_providers(2)).await;

    let mut metadata = Metadata::new();
    metadata.insert("parent_refs".to_string(), json!("block one"));
    let entry = payment().with_metadata(metadata);
    let submission = node.submit(entry, SubmitOptions::default()).await.unwrap();

    assert_eq!(submission.state, EntryState::Rejected);
    let rejection = submission.record().unwrap().rejection.clone().unwrap();
    assert_eq!(rejection.gate, Gate::Lineage);
    assert_eq!(rejection.reason, "invalid_derivative");
}
