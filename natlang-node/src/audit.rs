//! Validation audit trail.
//!
//! Every validation record the node produces, including rejections and
//! dry runs, is emitted as a tracing event and kept here (newest first) as
//! a bounded window over the durable log in storage.

use std::collections::VecDeque;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::info;

pub use natlang_core::{AuditEntry, AuditKind};
use natlang_core::{AggregateDecision, Entry, ValidationRecord};

/// Counts over the retained records.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditStats {
    pub total: usize,
    pub valid: usize,
    pub ambiguous: usize,
    pub invalid: usize,
    pub insufficient_quorum: usize,
    pub avg_drift: f64,
}

/// Bounded in-memory window over the validation log.
pub struct ValidationAudit {
    /// Newest first
    entries: RwLock<VecDeque<AuditEntry>>,
    max_entries: usize,
}

impl ValidationAudit {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
            max_entries: max_entries.max(1),
        }
    }

    /// Seed the window from records loaded newest first.
    pub fn restore(max_entries: usize, newest_first: Vec<AuditEntry>) -> Self {
        let max_entries = max_entries.max(1);
        let mut entries = VecDeque::from(newest_first);
        entries.truncate(max_entries);
        Self {
            entries: RwLock::new(entries),
            max_entries,
        }
    }

    pub async fn record(&self, kind: AuditKind, entry: &Entry, record: &ValidationRecord) -> AuditEntry {
        let audit = AuditEntry::new(kind, entry, record);

        info!(
            audit_id = %audit.audit_id,
            kind = ?audit.kind,
            fingerprint = %audit.fingerprint,
            author = %audit.author,
            decision = ?audit.decision,
            drift = audit.drift_score,
            drift_level = ?audit.drift_level,
            quorum = audit.quorum,
            providers = audit.providers,
            "Validation recorded"
        );

        let mut entries = self.entries.write().await;
        entries.push_front(audit.clone());
        while entries.len() > self.max_entries {
            entries.pop_back();
        }

        audit
    }

    pub async fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        self.entries.read().await.iter().take(limit).cloned().collect()
    }

    pub async fn by_fingerprint(&self, fingerprint: &str) -> Vec<AuditEntry> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| e.fingerprint == fingerprint)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> AuditStats {
        let entries = self.entries.read().await;
        let total = entries.len();
        let count = |d: AggregateDecision| entries.iter().filter(|e| e.decision == d).count();

        AuditStats {
            total,
            valid: count(AggregateDecision::Valid),
            ambiguous: count(AggregateDecision::Ambiguous),
            invalid: count(AggregateDecision::Invalid),
            insufficient_quorum: entries.iter().filter(|e| e.insufficient_quorum).count(),
            avg_drift: if total > 0 {
                entries.iter().map(|e| e.drift_score).sum::<f64>() / total as f64
            } else {
                0.0
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use natlang_core::SymbolicResult;

    fn entry(content: &str) -> Entry {
        Entry::new(content, "alice", "payment")
    }

    #[tokio::test]
    async fn test_newest_first_and_bounded() {
        let audit = ValidationAudit::new(2);
        let record = ValidationRecord::unvalidated(SymbolicResult::pass());
        let (one, two, three) = (entry("one"), entry("two"), entry("three"));
        audit.record(AuditKind::Submission, &one, &record).await;
        audit.record(AuditKind::Submission, &two, &record).await;
        audit.record(AuditKind::DryRun, &three, &record).await;

        let recent = audit.recent(10).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].kind, AuditKind::DryRun);
        assert_eq!(recent[1].fingerprint, two.fingerprint());
        assert!(audit.by_fingerprint(&one.fingerprint()).await.is_empty());
    }

    #[tokio::test]
    async fn test_rejections_are_kept() {
        let audit = ValidationAudit::new(10);
        let rejected = ValidationRecord::symbolic_rejection(SymbolicResult::fail(vec![
            "forbidden metadata key 'force_accept'".into(),
        ]));
        let e = entry("Alice pays Bob $10");
        audit.record(AuditKind::Submission, &e, &rejected).await;

        let stats = audit.stats().await;
        assert_eq!(stats.total, 1);
        assert_eq!(stats.invalid, 1);
        let found = audit.by_fingerprint(&e.fingerprint()).await;
        assert_eq!(found[0].reasons, vec!["forbidden metadata key 'force_accept'"]);
    }

    #[tokio::test]
    async fn test_restore_keeps_newest_within_bound() {
        let record = ValidationRecord::unvalidated(SymbolicResult::pass());
        let loaded: Vec<AuditEntry> = ["newest", "middle", "oldest"]
            .iter()
            .map(|c| AuditEntry::new(AuditKind::Submission, &entry(c), &record))
            .collect();

        let audit = ValidationAudit::restore(2, loaded.clone());
        let recent = audit.recent(10).await;
        assert_eq!(recent, loaded[..2].to_vec());

        audit.record(AuditKind::DryRun, &entry("fresh"), &record).await;
        let recent = audit.recent(10).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].kind, AuditKind::DryRun);
        assert_eq!(recent[1], loaded[0]);
    }
}
