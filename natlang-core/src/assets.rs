//! Asset ownership registry - stops one asset from being transferred twice.
//!
//! An entry that moves an asset reserves it before consensus. The reservation
//! is completed when the entry is sealed and cancelled when the entry is
//! refused or cannot be admitted, so at most one transfer per asset is ever
//! waiting in the pool.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::AssetError;
use crate::types::{Block, Entry};

/// Words that mark an entry as moving an asset.
pub const TRANSFER_KEYWORDS: &[&str] = &[
    "transfer", "transfers", "transferring", "transferred",
    "sell", "sells", "selling", "sold",
    "give", "gives", "giving", "gave",
    "assign", "assigns", "assigning", "assigned",
    "convey", "conveys", "conveying", "conveyed",
    "grant", "grants", "granting", "granted",
];

/// An entry's claim to move an asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferIntent {
    pub asset_id: String,
    pub from: String,
    /// "unknown" when the entry names no recipient
    pub to: String,
}

impl TransferIntent {
    /// Read a transfer out of an entry's metadata and wording.
    ///
    /// Needs `asset_id` plus either a transfer keyword in the intent or
    /// content, or an explicit `recipient` / `to` key.
    pub fn detect(entry: &Entry) -> Option<Self> {
        let asset_id = metadata_id(entry, "asset_id")?;
        let recipient = metadata_id(entry, "recipient").or_else(|| metadata_id(entry, "to"));

        let has_keyword = |text: &str| {
            text.to_lowercase()
                .split_whitespace()
                .any(|w| TRANSFER_KEYWORDS.contains(&w))
        };
        if !(has_keyword(&entry.intent) || has_keyword(&entry.content) || recipient.is_some()) {
            return None;
        }

        Some(Self {
            asset_id,
            from: entry.author.clone(),
            to: recipient.unwrap_or_else(|| "unknown".to_string()),
        })
    }
}

fn metadata_id(entry: &Entry, key: &str) -> Option<String> {
    match entry.metadata.get(key)? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTransfer {
    pub from: String,
    pub to: String,
    pub fingerprint: String,
    pub reserved_at: DateTime<Utc>,
    /// Ownership was claimed by this reservation and is undone on cancel
    #[serde(default)]
    pub claimed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub asset_id: String,
    pub from: String,
    pub to: String,
    pub fingerprint: String,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct RegistryState {
    ownership: HashMap<String, String>,
    pending: HashMap<String, PendingTransfer>,
    history: Vec<TransferRecord>,
}

#[derive(Debug, Default)]
pub struct AssetRegistry {
    state: Mutex<RegistryState>,
}

impl AssetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay sealed transfers from the chain, then reserve for the pool.
    pub fn rebuild(chain: &[Block], pending: &[Entry]) -> Self {
        let registry = Self::new();
        let mut completed = 0;
        for entry in chain.iter().flat_map(|b| b.entries.iter()) {
            if let Some(transfer) = TransferIntent::detect(entry) {
                let fingerprint = entry.fingerprint();
                if registry.reserve(&transfer, &fingerprint).is_ok()
                    && registry.complete(&transfer.asset_id, &fingerprint).is_ok()
                {
                    completed += 1;
                }
            }
        }
        let mut reserved = 0;
        for entry in pending {
            if let Some(transfer) = TransferIntent::detect(entry) {
                if registry.reserve(&transfer, &entry.fingerprint()).is_ok() {
                    reserved += 1;
                }
            }
        }
        info!(completed, reserved, "Asset registry rebuilt");
        registry
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register an asset with no prior owner.
    pub fn register(&self, asset_id: &str, owner: &str) -> bool {
        let mut state = self.lock();
        if state.ownership.contains_key(asset_id) {
            return false;
        }
        state.ownership.insert(asset_id.to_string(), owner.to_string());
        true
    }

    /// Whether `reserve` would succeed, without reserving anything.
    pub fn check(&self, transfer: &TransferIntent, fingerprint: &str) -> Result<(), AssetError> {
        Self::admissible(&self.lock(), transfer, fingerprint).map(|_| ())
    }

    /// `Ok(true)` if a new reservation is needed, `Ok(false)` if `fingerprint`
    /// already holds the asset.
    fn admissible(state: &RegistryState, transfer: &TransferIntent, fingerprint: &str) -> Result<bool, AssetError> {
        if let Some(existing) = state.pending.get(&transfer.asset_id) {
            if existing.fingerprint == fingerprint {
                return Ok(false);
            }
            return Err(AssetError::AlreadyPending {
                asset_id: transfer.asset_id.clone(),
                to: existing.to.clone(),
            });
        }
        match state.ownership.get(&transfer.asset_id) {
            Some(owner) if owner != &transfer.from => Err(AssetError::NotOwner {
                asset_id: transfer.asset_id.clone(),
                author: transfer.from.clone(),
                owner: owner.clone(),
            }),
            _ => Ok(true),
        }
    }

    /// Hold the asset for `fingerprint` until the transfer is sealed or cancelled.
    ///
    /// An unregistered asset is claimed for the sender. Returns `false` when
    /// the same entry already holds the reservation.
    pub fn reserve(&self, transfer: &TransferIntent, fingerprint: &str) -> Result<bool, AssetError> {
        let mut state = self.lock();
        if !Self::admissible(&state, transfer, fingerprint)? {
            return Ok(false);
        }

        let claimed = !state.ownership.contains_key(&transfer.asset_id);
        if claimed {
            state
                .ownership
                .insert(transfer.asset_id.clone(), transfer.from.clone());
        }

        state.pending.insert(
            transfer.asset_id.clone(),
            PendingTransfer {
                from: transfer.from.clone(),
                to: transfer.to.clone(),
                fingerprint: fingerprint.to_string(),
                reserved_at: Utc::now(),
                claimed,
            },
        );
        debug!(asset = %transfer.asset_id, from = %transfer.from, to = %transfer.to, "Asset reserved");
        Ok(true)
    }

    /// Reserve and get a guard that cancels the reservation unless kept.
    pub fn hold(&self, transfer: TransferIntent, fingerprint: &str) -> Result<TransferHold<'_>, AssetError> {
        let fresh = self.reserve(&transfer, fingerprint)?;
        Ok(TransferHold {
            registry: self,
            transfer,
            fingerprint: fingerprint.to_string(),
            settled: !fresh,
        })
    }

    /// Hand the asset to the recipient once the reserving entry is sealed.
    pub fn complete(&self, asset_id: &str, fingerprint: &str) -> Result<TransferRecord, AssetError> {
        let mut state = self.lock();
        let pending = match state.pending.remove(asset_id) {
            None => {
                return Err(AssetError::NoPendingTransfer {
                    asset_id: asset_id.to_string(),
                })
            }
            Some(pending) if pending.fingerprint != fingerprint => {
                state.pending.insert(asset_id.to_string(), pending);
                return Err(AssetError::FingerprintMismatch {
                    asset_id: asset_id.to_string(),
                });
            }
            Some(pending) => pending,
        };

        state.ownership.insert(asset_id.to_string(), pending.to.clone());
        let record = TransferRecord {
            asset_id: asset_id.to_string(),
            from: pending.from,
            to: pending.to,
            fingerprint: pending.fingerprint,
            completed_at: Utc::now(),
        };
        state.history.push(record.clone());
        Ok(record)
    }

    /// Drop the reservation held by `fingerprint`, if it is still the holder.
    pub fn cancel(&self, asset_id: &str, fingerprint: &str) -> bool {
        let mut state = self.lock();
        if state.pending.get(asset_id).map(|p| p.fingerprint.as_str()) != Some(fingerprint) {
            return false;
        }
        if let Some(pending) = state.pending.remove(asset_id) {
            if pending.claimed {
                state.ownership.remove(asset_id);
            }
        }
        debug!(asset = %asset_id, "Asset reservation cancelled");
        true
    }

    pub fn owner(&self, asset_id: &str) -> Option<String> {
        self.lock().ownership.get(asset_id).cloned()
    }

    pub fn pending_transfer(&self, asset_id: &str) -> Option<PendingTransfer> {
        self.lock().pending.get(asset_id).cloned()
    }

    /// Sorted asset ids held by `owner`.
    pub fn assets_of(&self, owner: &str) -> Vec<String> {
        let mut assets: Vec<String> = self
            .lock()
            .ownership
            .iter()
            .filter(|(_, o)| o.as_str() == owner)
            .map(|(a, _)| a.clone())
            .collect();
        assets.sort();
        assets
    }

    /// Completed transfers, oldest first, optionally for one asset.
    pub fn history(&self, asset_id: Option<&str>) -> Vec<TransferRecord> {
        self.lock()
            .history
            .iter()
            .filter(|t| asset_id.map_or(true, |a| t.asset_id == a))
            .cloned()
            .collect()
    }

    /// Assets currently known, with or without an owner change pending.
    pub fn asset_ids(&self) -> HashSet<String> {
        self.lock().ownership.keys().cloned().collect()
    }
}

/// A reservation taken for an entry still being judged.
///
/// Dropping it cancels the reservation, so an entry that is refused, fails
/// to persist or whose request is abandoned mid-consensus frees the asset.
#[must_use]
pub struct TransferHold<'a> {
    registry: &'a AssetRegistry,
    transfer: TransferIntent,
    fingerprint: String,
    settled: bool,
}

impl TransferHold<'_> {
    pub fn transfer(&self) -> &TransferIntent {
        &self.transfer
    }

    /// The entry reached the pool; the reservation now waits for the seal.
    pub fn keep(mut self) {
        self.settled = true;
    }
}

impl Drop for TransferHold<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.registry.cancel(&self.transfer.asset_id, &self.fingerprint);
        }
    }
}
