//! Derivative lineage - which sealed entries amend, extend or answer others.
//!
//! A derivative names its parents in metadata:
//!
//! ```json
//! { "parent_refs": [{ "block_index": 3, "entry_index": 0 }], "derivative_type": "amendment" }
//! ```
//!
//! Links are registered when the child is sealed and rebuilt from the chain
//! on startup, so the graph always mirrors committed data.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::{Block, Entry};

/// How deep ancestry and descendant walks go unless told otherwise.
pub const DEFAULT_MAX_DEPTH: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DerivativeType {
    Amendment,
    Extension,
    Response,
    Revision,
    Reference,
    Fulfillment,
}

impl DerivativeType {
    pub const ALL: [DerivativeType; 6] = [
        DerivativeType::Amendment,
        DerivativeType::Extension,
        DerivativeType::Response,
        DerivativeType::Revision,
        DerivativeType::Reference,
        DerivativeType::Fulfillment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DerivativeType::Amendment => "amendment",
            DerivativeType::Extension => "extension",
            DerivativeType::Response => "response",
            DerivativeType::Revision => "revision",
            DerivativeType::Reference => "reference",
            DerivativeType::Fulfillment => "fulfillment",
        }
    }
}

impl fmt::Display for DerivativeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DerivativeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("invalid derivative type '{}'", s))
    }
}

/// Position of a sealed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryRef {
    pub block_index: u64,
    pub entry_index: usize,
}

impl EntryRef {
    pub fn new(block_index: u64, entry_index: usize) -> Self {
        Self {
            block_index,
            entry_index,
        }
    }
}

impl fmt::Display for EntryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block_index, self.entry_index)
    }
}

/// Parent reference as written in entry metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRef {
    pub block_index: u64,
    pub entry_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship: Option<String>,
}

/// What a derivative entry declares about its origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivativeSpec {
    pub parents: Vec<ParentRef>,
    pub derivative_type: DerivativeType,
}

impl DerivativeSpec {
    /// Parse `parent_refs` / `derivative_type` out of an entry's metadata.
    ///
    /// `Ok(None)` for an entry with no parents; `Err` names the malformed key.
    pub fn from_entry(entry: &Entry) -> Result<Option<Self>, String> {
        let Some(raw) = entry.metadata.get("parent_refs") else {
            return Ok(None);
        };
        let parents: Vec<ParentRef> = serde_json::from_value(raw.clone())
            .map_err(|e| format!("malformed parent_refs: {}", e))?;
        if parents.is_empty() {
            return Ok(None);
        }

        let derivative_type = match entry.metadata.get("derivative_type") {
            None | Some(serde_json::Value::Null) => DerivativeType::Reference,
            Some(serde_json::Value::String(s)) => s.parse()?,
            Some(other) => return Err(format!("derivative_type must be a string, got {}", other)),
        };
        Ok(Some(Self {
            parents,
            derivative_type,
        }))
    }
}

/// One edge seen from either end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageLink {
    pub block_index: u64,
    pub entry_index: usize,
    pub derivative_type: DerivativeType,
    /// Defaults to the derivative type
    pub relationship: String,
    /// Distance from the queried entry, set on recursive walks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<usize>,
}

impl LineageLink {
    pub fn entry_ref(&self) -> EntryRef {
        EntryRef::new(self.block_index, self.entry_index)
    }

    fn at_depth(&self, depth: usize) -> Self {
        Self {
            depth: Some(depth),
            ..self.clone()
        }
    }
}

/// Ancestors and descendants of one entry.
#[derive(Debug, Clone, Serialize)]
pub struct DerivationTree {
    pub entry: EntryRef,
    pub parents: Vec<LineageLink>,
    pub lineage: Vec<LineageLink>,
    pub roots: Vec<EntryRef>,
    pub derivatives: Vec<LineageLink>,
    pub all_descendants: Vec<LineageLink>,
}

#[derive(Debug, Default)]
struct Graph {
    children: HashMap<EntryRef, Vec<LineageLink>>,
    parents: HashMap<EntryRef, Vec<LineageLink>>,
}

impl Graph {
    fn walk(
        edges: &HashMap<EntryRef, Vec<LineageLink>>,
        start: EntryRef,
        max_depth: usize,
    ) -> Vec<LineageLink> {
        let mut visited = HashSet::new();
        let mut out = Vec::new();
        let mut stack = vec![(start, 1usize)];
        // depth-first, children in registration order
        while let Some((current, depth)) = stack.pop() {
            if depth > max_depth || !visited.insert(current) {
                continue;
            }
            if let Some(links) = edges.get(&current) {
                for link in links.iter().rev() {
                    stack.push((link.entry_ref(), depth + 1));
                }
                out.extend(links.iter().map(|l| l.at_depth(depth)));
            }
        }
        out
    }
}

#[derive(Debug, Default)]
pub struct LineageRegistry {
    graph: RwLock<Graph>,
}

impl LineageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every derivative already on the chain.
    pub fn rebuild(chain: &[Block]) -> Self {
        let registry = Self::new();
        let mut links = 0;
        for block in chain {
            links += registry.register_block(block);
        }
        info!(links, "Lineage rebuilt");
        registry
    }

    /// Register the derivatives sealed in `block`, returning how many edges were added.
    pub fn register_block(&self, block: &Block) -> usize {
        block
            .entries
            .iter()
            .enumerate()
            .filter_map(|(i, entry)| {
                let spec = DerivativeSpec::from_entry(entry).ok().flatten()?;
                Some(self.register(EntryRef::new(block.index, i), &spec))
            })
            .sum()
    }

    pub fn register(&self, child: EntryRef, spec: &DerivativeSpec) -> usize {
        let mut graph = self.graph.write().unwrap_or_else(|e| e.into_inner());
        let mut parents = Vec::with_capacity(spec.parents.len());
        for parent in &spec.parents {
            let relationship = parent
                .relationship
                .clone()
                .unwrap_or_else(|| spec.derivative_type.to_string());
            let parent_ref = EntryRef::new(parent.block_index, parent.entry_index);
            graph.children.entry(parent_ref).or_default().push(LineageLink {
                block_index: child.block_index,
                entry_index: child.entry_index,
                derivative_type: spec.derivative_type,
                relationship: relationship.clone(),
                depth: None,
            });
            parents.push(LineageLink {
                block_index: parent.block_index,
                entry_index: parent.entry_index,
                derivative_type: spec.derivative_type,
                relationship,
                depth: None,
            });
        }
        let added = parents.len();
        graph.parents.insert(child, parents);
        added
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Graph> {
        self.graph.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Direct children, or every descendant up to `max_depth` when recursive.
    pub fn derivatives(&self, entry: EntryRef, recursive: bool, max_depth: usize) -> Vec<LineageLink> {
        let graph = self.read();
        if recursive {
            Graph::walk(&graph.children, entry, max_depth)
        } else {
            graph.children.get(&entry).cloned().unwrap_or_default()
        }
    }

    pub fn parents(&self, entry: EntryRef) -> Vec<LineageLink> {
        self.read().parents.get(&entry).cloned().unwrap_or_default()
    }

    /// Every ancestor up to `max_depth`.
    pub fn lineage(&self, entry: EntryRef, max_depth: usize) -> Vec<LineageLink> {
        Graph::walk(&self.read().parents, entry, max_depth)
    }

    /// Ancestors with no parents of their own; the entry itself if it has none.
    pub fn roots(&self, entry: EntryRef, max_depth: usize) -> Vec<EntryRef> {
        let lineage = self.lineage(entry, max_depth);
        let graph = self.read();
        let mut roots: Vec<EntryRef> = Vec::new();
        for link in &lineage {
            let r = link.entry_ref();
            let orphan = graph.parents.get(&r).map_or(true, Vec::is_empty);
            if orphan && !roots.contains(&r) {
                roots.push(r);
            }
        }
        if roots.is_empty() {
            roots.push(entry);
        }
        roots
    }

    pub fn tree(&self, entry: EntryRef, max_depth: usize) -> DerivationTree {
        DerivationTree {
            entry,
            parents: self.parents(entry),
            lineage: self.lineage(entry, max_depth),
            roots: self.roots(entry, max_depth),
            derivatives: self.derivatives(entry, false, max_depth),
            all_descendants: self.derivatives(entry, true, max_depth),
        }
    }

    pub fn is_derivative(&self, entry: EntryRef) -> bool {
        self.read().parents.get(&entry).is_some_and(|p| !p.is_empty())
    }

    pub fn has_derivatives(&self, entry: EntryRef) -> bool {
        self.read().children.get(&entry).is_some_and(|c| !c.is_empty())
    }
}
