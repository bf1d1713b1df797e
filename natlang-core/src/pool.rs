//! Pending pool - admitted entries waiting to be sealed.

use std::collections::{HashMap, HashSet};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::PoolError;
use crate::types::Entry;

/// Result of an admission attempt.
#[derive(Debug, Clone)]
pub enum AdmitOutcome {
    /// The entry joined the pool
    Admitted,
    /// An entry with the same fingerprint was already waiting; it is returned
    Duplicate(Box<Entry>),
}

impl AdmitOutcome {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, AdmitOutcome::Duplicate(_))
    }
}

#[derive(Default)]
struct PoolInner {
    /// Insertion order
    entries: Vec<Entry>,
    fingerprints: HashSet<String>,
    /// Drained for a seal that has not finished yet
    in_flight: HashMap<String, Entry>,
    /// Already on the chain; never admitted again
    sealed: HashSet<String>,
}

/// Insertion-ordered set of VALID entries keyed by fingerprint.
///
/// A fingerprint lives in exactly one of waiting, in flight or sealed, so a
/// retried submission can never put a second copy in front of the sealer.
#[derive(Default)]
pub struct PendingPool {
    inner: Mutex<PoolInner>,
}

impl PendingPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a pool from persisted entries, dropping duplicates, anything
    /// that is not VALID and anything in `sealed`.
    pub async fn restore(entries: Vec<Entry>, sealed: HashSet<String>) -> Self {
        let pool = Self::new();
        pool.inner.lock().await.sealed = sealed;
        let mut restored = 0usize;
        for entry in entries {
            if let Ok(AdmitOutcome::Admitted) = pool.admit(entry).await {
                restored += 1;
            }
        }
        if restored > 0 {
            info!(restored, "Restored pending entries");
        }
        pool
    }

    /// Admit a VALID entry; a retried submission returns the waiting copy.
    pub async fn admit(&self, entry: Entry) -> Result<AdmitOutcome, PoolError> {
        let fingerprint = entry.fingerprint();
        if !entry.is_valid() {
            return Err(PoolError::NotValid {
                fingerprint,
                status: entry.validation_status,
            });
        }

        let mut inner = self.inner.lock().await;
        if inner.sealed.contains(&fingerprint) {
            debug!(fingerprint = %fingerprint, "Admission refused, already sealed");
            return Err(PoolError::AlreadySealed { fingerprint });
        }
        if let Some(prior) = inner.in_flight.get(&fingerprint) {
            debug!(fingerprint = %fingerprint, "Duplicate admission ignored, seal in progress");
            return Ok(AdmitOutcome::Duplicate(Box::new(prior.clone())));
        }
        if inner.fingerprints.contains(&fingerprint) {
            let prior = inner
                .entries
                .iter()
                .find(|e| e.fingerprint() == fingerprint)
                .cloned()
                .unwrap_or(entry);
            debug!(fingerprint = %fingerprint, "Duplicate admission ignored");
            return Ok(AdmitOutcome::Duplicate(Box::new(prior)));
        }

        inner.fingerprints.insert(fingerprint);
        inner.entries.push(entry);
        Ok(AdmitOutcome::Admitted)
    }

    /// Remove and return every member in insertion order.
    ///
    /// The drained fingerprints stay reserved until [`mark_sealed`] or
    /// [`requeue`] settles them.
    ///
    /// [`mark_sealed`]: PendingPool::mark_sealed
    /// [`requeue`]: PendingPool::requeue
    pub async fn drain(&self) -> Vec<Entry> {
        let mut inner = self.inner.lock().await;
        inner.fingerprints.clear();
        let drained = std::mem::take(&mut inner.entries);
        for entry in &drained {
            inner.in_flight.insert(entry.fingerprint(), entry.clone());
        }
        drained
    }

    /// Put drained entries back in front of anything admitted since.
    pub async fn requeue(&self, entries: Vec<Entry>) {
        let mut inner = self.inner.lock().await;
        let mut merged = Vec::with_capacity(entries.len() + inner.entries.len());
        let mut seen = HashSet::new();
        let waiting = std::mem::take(&mut inner.entries);
        for entry in entries.into_iter().chain(waiting) {
            let fingerprint = entry.fingerprint();
            inner.in_flight.remove(&fingerprint);
            if inner.sealed.contains(&fingerprint) {
                continue;
            }
            if seen.insert(fingerprint) {
                merged.push(entry);
            }
        }
        inner.entries = merged;
        inner.fingerprints = seen;
    }

    /// Record that these drained fingerprints are now on the chain.
    pub async fn mark_sealed<'a>(&self, fingerprints: impl IntoIterator<Item = &'a String>) {
        let mut inner = self.inner.lock().await;
        for fingerprint in fingerprints {
            inner.in_flight.remove(fingerprint);
            inner.sealed.insert(fingerprint.clone());
        }
    }

    /// Take a waiting entry back out, e.g. when its admission could not be
    /// made durable.
    pub async fn remove(&self, fingerprint: &str) -> Option<Entry> {
        let mut inner = self.inner.lock().await;
        if !inner.fingerprints.remove(fingerprint) {
            return None;
        }
        let position = inner.entries.iter().position(|e| e.fingerprint() == fingerprint)?;
        Some(inner.entries.remove(position))
    }

    /// A waiting or in-flight entry by fingerprint.
    pub async fn get(&self, fingerprint: &str) -> Option<Entry> {
        let inner = self.inner.lock().await;
        if let Some(entry) = inner.in_flight.get(fingerprint) {
            return Some(entry.clone());
        }
        if !inner.fingerprints.contains(fingerprint) {
            return None;
        }
        inner.entries.iter().find(|e| e.fingerprint() == fingerprint).cloned()
    }

    /// Copy of the current members.
    pub async fn snapshot(&self) -> Vec<Entry> {
        self.inner.lock().await.entries.clone()
    }

    pub async fn contains(&self, fingerprint: &str) -> bool {
        self.inner.lock().await.fingerprints.contains(fingerprint)
    }

    pub async fn is_sealed(&self, fingerprint: &str) -> bool {
        self.inner.lock().await.sealed.contains(fingerprint)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
