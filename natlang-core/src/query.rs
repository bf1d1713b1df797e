//! Read-only views over a loaded chain.

use serde::Serialize;

use crate::types::{Block, EntryLocation};

/// Every sealed entry by `author`, oldest first.
pub fn entries_by_author(chain: &[Block], author: &str) -> Vec<EntryLocation> {
    locate(chain, |e| e.author == author)
}

/// Sealed entries whose intent contains `keyword` (case-insensitive).
pub fn entries_by_intent(chain: &[Block], keyword: &str) -> Vec<EntryLocation> {
    let needle = keyword.to_lowercase();
    locate(chain, |e| e.intent.to_lowercase().contains(&needle))
}

/// Where the entry with `fingerprint` was sealed, if anywhere.
pub fn entry_by_fingerprint(chain: &[Block], fingerprint: &str) -> Option<EntryLocation> {
    locate(chain, |e| e.fingerprint() == fingerprint).into_iter().next()
}

fn locate(chain: &[Block], pred: impl Fn(&crate::types::Entry) -> bool) -> Vec<EntryLocation> {
    chain
        .iter()
        .flat_map(|block| {
            block
                .entries
                .iter()
                .enumerate()
                .filter(|(_, e)| pred(e))
                .map(move |(entry_index, e)| EntryLocation {
                    block_index: block.index,
                    block_hash: block.hash.clone(),
                    entry_index,
                    entry: e.clone(),
                })
        })
        .collect()
}

/// Aggregate counts over a chain.
#[derive(Debug, Clone, Serialize)]
pub struct ChainStats {
    pub blocks: usize,
    pub entries: usize,
    pub unique_authors: usize,
    pub tail_hash: Option<String>,
}

pub fn stats(chain: &[Block]) -> ChainStats {
    let mut authors = std::collections::HashSet::new();
    let mut entries = 0;
    for block in chain {
        for entry in &block.entries {
            authors.insert(entry.author.as_str());
            entries += 1;
        }
    }
    ChainStats {
        blocks: chain.len(),
        entries,
        unique_authors: authors.len(),
        tail_hash: chain.last().map(|b| b.hash.clone()),
    }
}

/// The ledger rendered as readable prose.
pub fn narrative(chain: &[Block]) -> String {
    let mut out = String::from("=== NatLangChain Narrative History ===\n");

    for block in chain {
        out.push_str(&format!("\n--- Block {} ---\n", block.index));
        out.push_str(&format!("Hash: {}\n", block.hash));
        out.push_str(&format!("Timestamp: {}\n", block.timestamp.to_rfc3339()));
        out.push_str(&format!("Previous Hash: {}\n\n", block.previous_hash));

        for (i, entry) in block.entries.iter().enumerate() {
            out.push_str(&format!("Entry {}:\n", i + 1));
            out.push_str(&format!("  Author: {}\n", entry.author));
            out.push_str(&format!("  Intent: {}\n", entry.intent));
            out.push_str(&format!("  Time: {}\n", entry.timestamp.to_rfc3339()));
            out.push_str(&format!("  Status: {}\n", entry.validation_status.as_str()));
            out.push_str(&format!("  Content:\n    {}\n", entry.content));

            if let Some(record) = &entry.validation_record {
                let paraphrases = record.paraphrases();
                if !paraphrases.is_empty() {
                    out.push_str("  Validation Paraphrases:\n");
                    for p in paraphrases {
                        out.push_str(&format!("    - {}\n", p));
                    }
                }
            }
            out.push('\n');
        }
    }

    out
}
