//! Sealing and chain integrity integration tests

use std::sync::Arc;

use natlang_core::storage::{JsonFileBackend, MemoryBackend};
use natlang_core::{
    validate_chain, AdmitOutcome, Block, Entry, PendingPool, SealError, Sealer, SealerConfig,
    StorageBackend, Tail, ValidationStatus,
};
use tempfile::TempDir;

fn valid_entry(content: &str) -> Entry {
    let mut e = Entry::new(content, "alice", "record a note");
    e.validation_status = ValidationStatus::Valid;
    e
}

fn sealer_on(storage: Arc<dyn StorageBackend>) -> Sealer {
    Sealer::new(SealerConfig::default(), storage, Tail::of(&Block::genesis()))
}

#[tokio::test]
async fn test_concurrent_seals_on_same_tail_only_one_wins() {
    let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::with_genesis());
    let sealer = Arc::new(sealer_on(storage.clone()));
    let genesis_hash = Block::genesis().hash;

    let mut handles = Vec::new();
    for i in 0..8 {
        let sealer = sealer.clone();
        let prev = genesis_hash.clone();
        handles.push(tokio::spawn(async move {
            sealer
                .seal(&prev, vec![valid_entry(&format!("racer {}", i))], Some(1))
                .await
        }));
    }

    let mut won = 0;
    let mut refused = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => won += 1,
            Err(SealError::TailMismatch { .. }) => refused += 1,
            Err(other) => panic!("unexpected error: {}", other),
        }
    }

    assert_eq!(won, 1);
    assert_eq!(refused, 7);

    let chain = storage.load_chain().await.unwrap();
    assert_eq!(chain.len(), 2);
    assert!(validate_chain(&chain).valid);
}

#[tokio::test]
async fn test_difficulty_above_maximum_refused() {
    let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::with_genesis());
    let sealer = sealer_on(storage.clone());
    let max = sealer.config().max_difficulty;

    let err = sealer
        .seal(&Block::genesis().hash, vec![valid_entry("too hard")], Some(max + 1))
        .await
        .unwrap_err();
    assert!(matches!(err, SealError::DifficultyTooHigh { .. }));
    assert_eq!(storage.load_chain().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_pool_drain_seal_roundtrip_on_disk() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("chain.json");

    let backend = JsonFileBackend::open(&path).await.unwrap();
    backend.append_block(&Block::genesis()).await.unwrap();
    let storage: Arc<dyn StorageBackend> = Arc::new(backend);
    let sealer = sealer_on(storage.clone());

    let pool = PendingPool::new();
    for text in ["Alice lends Bob a drill", "Bob returns the drill", "Carol pays Alice $5"] {
        assert!(matches!(pool.admit(valid_entry(text)).await.unwrap(), AdmitOutcome::Admitted));
    }

    let tail = sealer.tail().await;
    let batch = pool.drain().await;
    let block = sealer.seal(&tail.hash, batch, None).await.unwrap();
    assert!(pool.is_empty().await);
    assert_eq!(block.entries.len(), 3);
    assert_eq!(block.entries[0].content, "Alice lends Bob a drill");

    let reopened = JsonFileBackend::open(&path).await.unwrap();
    let chain = reopened.load_chain().await.unwrap();
    let report = validate_chain(&chain);
    assert!(report.valid);
    assert_eq!(report.block_count, 2);
}

#[tokio::test]
async fn test_failed_seal_requeues_in_order() {
    let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::with_genesis());
    let sealer = sealer_on(storage);
    let pool = PendingPool::new();

    pool.admit(valid_entry("first")).await.unwrap();
    pool.admit(valid_entry("second")).await.unwrap();

    let batch = pool.drain().await;
    pool.admit(valid_entry("arrived during seal")).await.unwrap();

    let result = sealer.seal("stale-tail", batch.clone(), None).await;
    assert!(result.is_err());
    pool.requeue(batch).await;

    let contents: Vec<String> = pool.snapshot().await.into_iter().map(|e| e.content).collect();
    assert_eq!(contents, vec!["first", "second", "arrived during seal"]);
}

#[test]
fn test_tampering_detected_at_first_bad_block() {
    let mut chain = vec![Block::genesis()];
    for i in 1..5u64 {
        let prev = chain.last().unwrap().hash.clone();
        chain.push(
            natlang_core::seal_block(
                i,
                chrono::Utc::now(),
                vec![valid_entry(&format!("entry {}", i))],
                &prev,
                2,
                100_000,
            )
            .unwrap(),
        );
    }
    assert!(validate_chain(&chain).valid);

    chain[2].entries[0].author = "mallory".into();
    chain[4].entries[0].content = "also tampered".into();
    let report = validate_chain(&chain);
    assert!(!report.valid);
    assert_eq!(report.first_invalid_index, Some(2));
}
