//! Deterministic offline judge.
//!
//! Makes no network calls. Flags vague wording, a fixed list of adversarial
//! contract phrases, and content whose high-impact action does not fit the
//! stated intent. Used by offline nodes and throughout the test suites.

use std::collections::{BTreeSet, HashSet};

use async_trait::async_trait;

use natlang_core::Decision;

use super::traits::*;

const AMBIGUOUS_TERMS: &[&str] = &[
    "soon",
    "later",
    "reasonable",
    "appropriate",
    "satisfactory",
    "acceptable",
    "approximately",
    "some",
    "various",
    "etc",
    "as needed",
    "when possible",
    "in due time",
];

const ADVERSARIAL_PHRASES: &[&str] = &[
    "waives all rights",
    "null and void",
    "sole arbiter",
    "irrevocable",
    "perpetual",
    "supersedes all",
    "hidden",
    "buried in",
    "appendix z",
    "non-refundable",
    "minimum order",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum ActionCategory {
    Restriction,
    Modification,
    Creation,
    Financial,
    Agreement,
}

impl ActionCategory {
    const ALL: [ActionCategory; 5] = [
        ActionCategory::Restriction,
        ActionCategory::Modification,
        ActionCategory::Creation,
        ActionCategory::Financial,
        ActionCategory::Agreement,
    ];

    fn name(&self) -> &'static str {
        match self {
            ActionCategory::Restriction => "restriction",
            ActionCategory::Modification => "modification",
            ActionCategory::Creation => "creation",
            ActionCategory::Financial => "financial",
            ActionCategory::Agreement => "agreement",
        }
    }

    /// Verbs that place content in this category.
    fn actions(&self) -> &'static [&'static str] {
        match self {
            ActionCategory::Restriction => &[
                "banned", "ban", "banning", "blocked", "block", "blocking", "suspended",
                "suspend", "suspending", "terminated", "terminate", "revoked", "revoke",
                "revoking", "denied", "deny", "denying", "prohibited", "prohibit", "forbid",
                "forbidden", "expelled", "removed", "remove", "removing", "deleted", "delete",
                "deleting",
            ],
            ActionCategory::Modification => &[
                "updated", "update", "updating", "edited", "edit", "editing", "changed",
                "change", "changing", "modified", "modify", "modifying", "revised", "revise",
                "revising", "amended", "amend", "amending",
            ],
            ActionCategory::Creation => &[
                "created", "create", "creating", "added", "add", "adding", "registered",
                "register", "registering", "established", "establish", "initiated", "initiate",
                "initiating", "opened", "open", "opening",
            ],
            ActionCategory::Financial => &[
                "paid", "pay", "paying", "transferred", "transfer", "transferring", "deposited",
                "deposit", "depositing", "withdrew", "withdraw", "refunded", "refund",
                "refunding", "charged", "charge", "charging",
            ],
            ActionCategory::Agreement => &[
                "agreed", "agree", "agreeing", "accepted", "accept", "accepting", "approved",
                "approve", "approving", "confirmed", "confirm", "signed", "sign", "signing",
                "consented", "consent", "consenting",
            ],
        }
    }

    /// Intent words that announce this category.
    fn intent_keywords(&self) -> &'static [&'static str] {
        match self {
            ActionCategory::Restriction => &[
                "ban", "block", "suspend", "terminate", "revoke", "deny", "prohibit", "remove",
                "delete", "moderation",
            ],
            ActionCategory::Modification => {
                &["update", "edit", "change", "modify", "revise", "amend", "profile"]
            }
            ActionCategory::Creation => {
                &["create", "add", "register", "establish", "initiate", "open", "new"]
            }
            ActionCategory::Financial => &[
                "pay", "transfer", "deposit", "withdraw", "refund", "charge", "payment",
                "transaction",
            ],
            ActionCategory::Agreement => {
                &["agree", "accept", "approve", "confirm", "sign", "consent", "contract"]
            }
        }
    }

    fn is_drastic(&self) -> bool {
        matches!(self, ActionCategory::Restriction | ActionCategory::Financial)
    }
}

const STOP_WORDS: &[&str] = &["the", "a", "an", "to", "for", "of", "and", "is", "in", "on", "at"];

/// Crude suffix stripping so "pays", "paying" and "payment" meet at "pay".
fn stem(word: &str) -> &str {
    for suffix in ["ments", "ment", "ing", "ed", "es", "s"] {
        if word.len() > suffix.len() + 2 {
            if let Some(stripped) = word.strip_suffix(suffix) {
                return stripped;
            }
        }
    }
    word
}

fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn stems(words: &[String]) -> HashSet<&str> {
    words.iter().map(|w| stem(w)).collect()
}

fn categories_by(
    stems: &HashSet<&str>,
    vocabulary: impl Fn(&ActionCategory) -> &'static [&'static str],
) -> BTreeSet<ActionCategory> {
    ActionCategory::ALL
        .into_iter()
        .filter(|c| vocabulary(c).iter().any(|w| stems.contains(stem(w))))
        .collect()
}

/// Offline provider applying fixed heuristics.
pub struct HeuristicProvider {
    id: String,
    weight: f64,
}

impl HeuristicProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            weight: ProviderKind::Local.default_weight(),
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// The verdict for `request`; pure and deterministic.
    pub fn judge(&self, request: &AssessmentRequest) -> ProviderVerdict {
        let content_lower = request.content.to_lowercase();
        let content_words = words(&request.content);
        let intent_words = words(&request.intent);

        let adversarial: Vec<String> = ADVERSARIAL_PHRASES
            .iter()
            .filter(|p| content_lower.contains(*p))
            .map(|p| p.to_string())
            .collect();
        if !adversarial.is_empty() {
            return ProviderVerdict {
                paraphrase: "Entry contains adversarial patterns".into(),
                intent_match: false,
                ambiguities: Vec::new(),
                reasoning: format!("Detected adversarial patterns: {}", adversarial.join(", ")),
                adversarial_indicators: adversarial,
                decision: Decision::Invalid,
            };
        }

        let content_stems = stems(&content_words);
        let intent_stems = stems(&intent_words);

        if let Some(reason) = action_mismatch(&content_stems, &intent_stems, &request.intent) {
            return ProviderVerdict {
                paraphrase: "Entry action doesn't match stated intent".into(),
                intent_match: false,
                ambiguities: Vec::new(),
                adversarial_indicators: Vec::new(),
                decision: Decision::Invalid,
                reasoning: reason,
            };
        }

        let ambiguities: Vec<String> = AMBIGUOUS_TERMS
            .iter()
            .filter(|term| {
                if term.contains(' ') {
                    content_lower.contains(*term)
                } else {
                    content_words.iter().any(|w| w == *term)
                }
            })
            .map(|t| t.to_string())
            .collect();

        let intent_keywords: HashSet<&str> = intent_words
            .iter()
            .filter(|w| !STOP_WORDS.contains(&w.as_str()))
            .map(|w| stem(w))
            .collect();
        let intent_match =
            intent_keywords.is_empty() || intent_keywords.iter().any(|k| content_stems.contains(k));

        if !ambiguities.is_empty() {
            return ProviderVerdict {
                paraphrase: format!("Entry about: {}", request.intent),
                intent_match,
                reasoning: format!("Contains ambiguous terms: {}", ambiguities.join(", ")),
                ambiguities,
                adversarial_indicators: Vec::new(),
                decision: Decision::NeedsReview,
            };
        }

        if !intent_match {
            return ProviderVerdict {
                paraphrase: "Entry content does not match stated intent".into(),
                intent_match: false,
                ambiguities: Vec::new(),
                adversarial_indicators: Vec::new(),
                decision: Decision::Invalid,
                reasoning: "Intent does not match content keywords".into(),
            };
        }

        let excerpt: String = request.content.chars().take(100).collect();
        ProviderVerdict::valid(format!("The author {} states: {}", request.author, excerpt))
            .with_reasoning("Entry passes heuristic checks")
    }
}

fn action_mismatch(
    content_stems: &HashSet<&str>,
    intent_stems: &HashSet<&str>,
    intent: &str,
) -> Option<String> {
    let content_categories = categories_by(content_stems, ActionCategory::actions);
    if content_categories.is_empty() {
        return None;
    }
    let intent_categories = categories_by(intent_stems, ActionCategory::intent_keywords);
    let names = |set: &BTreeSet<ActionCategory>| {
        set.iter().map(|c| c.name()).collect::<Vec<_>>().join(", ")
    };

    if intent_categories.is_empty() {
        if content_categories.iter().any(ActionCategory::is_drastic) {
            return Some(format!(
                "Content contains drastic action ({}) but intent '{}' doesn't indicate this",
                names(&content_categories),
                intent
            ));
        }
        return None;
    }

    if content_categories.is_disjoint(&intent_categories) {
        return Some(format!(
            "Content action category ({}) doesn't match intent category ({})",
            names(&content_categories),
            names(&intent_categories)
        ));
    }
    None
}

impl Default for HeuristicProvider {
    fn default() -> Self {
        Self::new("heuristic")
    }
}

#[async_trait]
impl Provider for HeuristicProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn assess(&self, request: &AssessmentRequest) -> Result<ProviderVerdict, ProviderError> {
        Ok(self.judge(request))
    }
}
