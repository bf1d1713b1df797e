//! Entry quality gate - keeps bloated or unreadable prose off the chain.
//!
//! Runs after the symbolic checks and before any provider is asked. Size and
//! redundancy errors reject outright; other errors ask the author to revise;
//! warnings and notes ride along on the validation record as suggestions.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Hard ceiling on the configurable maximum size.
pub const ABSOLUTE_MAX_CHARS: usize = 50_000;

const TARGET_SENTENCE_WORDS: f64 = 25.0;
const TARGET_WORD_CHARS: f64 = 6.0;
const MAX_READING_GRADE: f64 = 16.0;
const MAX_PARAGRAPH_CHARS: usize = 500;
const MIN_PUNCTUATION_RATIO: f64 = 0.02;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Minimum content length in characters
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
    /// Capped at [`ABSOLUTE_MAX_CHARS`]
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    /// Bigram repeat ratio that earns a warning
    #[serde(default = "default_repetition_threshold")]
    pub repetition_threshold: f64,
    /// Bigram repeat ratio that rejects the entry
    #[serde(default = "default_redundancy_threshold")]
    pub redundancy_threshold: f64,
    /// Treat warnings as needing revision
    #[serde(default)]
    pub strict: bool,
}

fn default_enabled() -> bool { true }
fn default_min_chars() -> usize { 20 }
fn default_max_chars() -> usize { 10_000 }
fn default_repetition_threshold() -> f64 { 0.3 }
fn default_redundancy_threshold() -> f64 { 0.5 }

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            min_chars: default_min_chars(),
            max_chars: default_max_chars(),
            repetition_threshold: default_repetition_threshold(),
            redundancy_threshold: default_redundancy_threshold(),
            strict: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityDecision {
    Accept,
    AcceptWithSuggestions,
    NeedsRevision,
    Reject,
}

impl QualityDecision {
    /// Whether the entry may continue to consensus.
    pub fn is_acceptable(&self) -> bool {
        matches!(self, QualityDecision::Accept | QualityDecision::AcceptWithSuggestions)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityIssueKind {
    TooShort,
    TooLong,
    ExcessiveRepetition,
    RedundantContent,
    PoorReadability,
    DenseText,
    AmbiguousStructure,
    MissingPunctuation,
}

impl QualityIssueKind {
    /// Errors of these kinds reject instead of asking for a revision.
    fn is_hard_reject(&self) -> bool {
        matches!(
            self,
            QualityIssueKind::TooShort | QualityIssueKind::TooLong | QualityIssueKind::RedundantContent
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityIssue {
    pub kind: QualityIssueKind,
    pub severity: Severity,
    pub message: String,
    pub suggestion: String,
}

impl QualityIssue {
    fn new(
        kind: QualityIssueKind,
        severity: Severity,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub char_count: usize,
    pub word_count: usize,
    pub sentence_count: usize,
    pub paragraph_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bigram_repetition: Option<f64>,
    #[serde(default)]
    pub duplicate_sentences: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_sentence_length: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_word_length: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readability_grade: Option<f64>,
}

/// What the quality gate made of an entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub decision: QualityDecision,
    /// 0.0 (worst) to 1.0
    pub score: f64,
    #[serde(default)]
    pub issues: Vec<QualityIssue>,
    pub metrics: QualityMetrics,
    pub summary: String,
}

impl QualityReport {
    pub fn errors(&self) -> impl Iterator<Item = &QualityIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }
}

fn word_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b[a-zA-Z]+\b").expect("Failed to compile word pattern"))
}

fn sentence_break() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[.!?]+").expect("Failed to compile sentence pattern"))
}

#[derive(Debug, Clone, Default)]
pub struct QualityAnalyzer {
    config: QualityConfig,
}

impl QualityAnalyzer {
    pub fn new(mut config: QualityConfig) -> Self {
        config.max_chars = config.max_chars.min(ABSOLUTE_MAX_CHARS);
        Self { config }
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Score `content` and decide whether it may go on.
    ///
    /// `intent` is accepted for symmetry with the other gates; the checks
    /// currently look at the prose only.
    pub fn analyze(&self, content: &str, _intent: &str) -> QualityReport {
        let sentences = split_sentences(content);
        let mut metrics = QualityMetrics {
            char_count: content.chars().count(),
            word_count: content.split_whitespace().count(),
            sentence_count: sentences.len(),
            paragraph_count: content.split("\n\n").filter(|p| !p.trim().is_empty()).count(),
            ..Default::default()
        };

        let mut issues = self.check_size(metrics.char_count);
        issues.extend(self.check_repetition(content, &sentences, &mut metrics));
        issues.extend(check_readability(content, &sentences, &mut metrics));
        issues.extend(check_structure(content, metrics.word_count));

        let score = quality_score(&issues, &metrics);
        let decision = self.decide(&issues);
        let summary = summarize(decision, &issues);
        debug!(?decision, score, issues = issues.len(), "Quality analysis finished");

        QualityReport {
            decision,
            score,
            issues,
            metrics,
            summary,
        }
    }

    fn check_size(&self, chars: usize) -> Vec<QualityIssue> {
        let min = self.config.min_chars;
        let max = self.config.max_chars;
        let mut issues = Vec::new();

        if chars < min {
            issues.push(QualityIssue::new(
                QualityIssueKind::TooShort,
                Severity::Error,
                format!("Entry too short ({} chars, minimum {})", chars, min),
                "Provide more detail about your intent: the key terms, the parties and the expected outcome.",
            ));
        } else if chars > max {
            issues.push(QualityIssue::new(
                QualityIssueKind::TooLong,
                Severity::Error,
                format!("Entry exceeds size limit ({} chars, maximum {})", chars, max),
                format!("Reduce by about {} characters or split into linked entries.", chars - max),
            ));
        } else if chars * 5 > max * 4 {
            issues.push(QualityIssue::new(
                QualityIssueKind::TooLong,
                Severity::Warning,
                format!("Entry approaching size limit ({} chars remaining)", max - chars),
                "Consider condensing to leave room for amendments.",
            ));
        }
        issues
    }

    fn check_repetition(
        &self,
        content: &str,
        sentences: &[&str],
        metrics: &mut QualityMetrics,
    ) -> Vec<QualityIssue> {
        let mut issues = Vec::new();
        let lowered = content.to_lowercase();
        let words: Vec<&str> = word_pattern().find_iter(&lowered).map(|m| m.as_str()).collect();
        if words.len() < 10 {
            return issues;
        }

        let ratio = bigram_repetition(&words);
        metrics.bigram_repetition = Some(round(ratio, 3));

        let duplicates = duplicate_sentences(sentences);
        metrics.duplicate_sentences = duplicates.len();

        if ratio > self.config.redundancy_threshold {
            issues.push(QualityIssue::new(
                QualityIssueKind::RedundantContent,
                Severity::Error,
                format!("Excessive repetition detected ({:.0}% of phrases repeat)", ratio * 100.0),
                "Remove duplicate phrases and consolidate similar points.",
            ));
        } else if ratio > self.config.repetition_threshold {
            issues.push(QualityIssue::new(
                QualityIssueKind::ExcessiveRepetition,
                Severity::Warning,
                format!("High repetition detected ({:.0}% of phrases repeat)", ratio * 100.0),
                "Consolidate repeated phrases; repetition makes terms harder to interpret.",
            ));
        }

        if duplicates.len() > 2 {
            let severity = if duplicates.len() > 4 {
                Severity::Error
            } else {
                Severity::Warning
            };
            let sample: Vec<&str> = duplicates.iter().take(2).map(String::as_str).collect();
            issues.push(QualityIssue::new(
                QualityIssueKind::RedundantContent,
                severity,
                format!("Found {} duplicate sentences", duplicates.len()),
                format!("Remove duplicated sentences such as {:?}.", sample),
            ));
        }
        issues
    }

    fn decide(&self, issues: &[QualityIssue]) -> QualityDecision {
        let errors: Vec<&QualityIssue> = issues.iter().filter(|i| i.severity == Severity::Error).collect();
        if errors.iter().any(|i| i.kind.is_hard_reject()) {
            return QualityDecision::Reject;
        }
        if !errors.is_empty() {
            return QualityDecision::NeedsRevision;
        }
        if self.config.strict && issues.iter().any(|i| i.severity == Severity::Warning) {
            return QualityDecision::NeedsRevision;
        }
        if issues.is_empty() {
            QualityDecision::Accept
        } else {
            QualityDecision::AcceptWithSuggestions
        }
    }
}

fn check_readability(content: &str, sentences: &[&str], metrics: &mut QualityMetrics) -> Vec<QualityIssue> {
    let mut issues = Vec::new();
    let words: Vec<&str> = content.split_whitespace().collect();
    if words.is_empty() || sentences.is_empty() {
        return issues;
    }

    let words_per_sentence = words.len() as f64 / sentences.len() as f64;
    let avg_word = words.iter().map(|w| w.chars().count()).sum::<usize>() as f64 / words.len() as f64;
    let syllables = words.iter().map(|w| count_syllables(w)).sum::<usize>() as f64;
    let grade = (0.39 * words_per_sentence + 11.8 * (syllables / words.len() as f64) - 15.59).clamp(0.0, 20.0);

    metrics.avg_sentence_length = Some(round(words_per_sentence, 1));
    metrics.avg_word_length = Some(round(avg_word, 1));
    metrics.readability_grade = Some(round(grade, 1));

    if words_per_sentence > TARGET_SENTENCE_WORDS * 1.5 {
        issues.push(QualityIssue::new(
            QualityIssueKind::PoorReadability,
            Severity::Info,
            format!("Long sentences detected (avg {:.0} words)", words_per_sentence),
            "Break long sentences up; 15-25 words per sentence reads clearly.",
        ));
    }
    if avg_word > TARGET_WORD_CHARS * 1.3 {
        issues.push(QualityIssue::new(
            QualityIssueKind::PoorReadability,
            Severity::Info,
            "Complex vocabulary detected",
            "Use simpler words where possible.",
        ));
    }
    if grade > MAX_READING_GRADE {
        issues.push(QualityIssue::new(
            QualityIssueKind::PoorReadability,
            Severity::Warning,
            format!("High reading level (grade {:.0}+)", grade),
            "Simplify the wording for a broader audience.",
        ));
    }
    issues
}

fn check_structure(content: &str, word_count: usize) -> Vec<QualityIssue> {
    let mut issues = Vec::new();

    let dense = content
        .split("\n\n")
        .filter(|p| p.chars().count() > MAX_PARAGRAPH_CHARS)
        .count();
    if dense > 0 {
        issues.push(QualityIssue::new(
            QualityIssueKind::DenseText,
            Severity::Info,
            format!("Found {} dense paragraph(s)", dense),
            "Break long paragraphs into smaller sections.",
        ));
    }

    if word_count > 50 {
        let marks = content.chars().filter(|c| ".!?;:".contains(*c)).count();
        if (marks as f64 / word_count as f64) < MIN_PUNCTUATION_RATIO {
            issues.push(QualityIssue::new(
                QualityIssueKind::MissingPunctuation,
                Severity::Warning,
                "Low punctuation density (possible run-on text)",
                "Add punctuation to separate ideas.",
            ));
        }
    }

    let bullets = content.chars().filter(|c| matches!(c, '•' | '●' | '◦' | '▪')).count();
    if bullets > 10 && !content.contains('\n') {
        issues.push(QualityIssue::new(
            QualityIssueKind::AmbiguousStructure,
            Severity::Info,
            "Bullet points without line breaks detected",
            "Put each bullet point on its own line.",
        ));
    }
    issues
}

fn quality_score(issues: &[QualityIssue], metrics: &QualityMetrics) -> f64 {
    let mut score = 1.0;
    for issue in issues {
        score -= match issue.severity {
            Severity::Error => 0.3,
            Severity::Warning => 0.1,
            Severity::Info => 0.02,
        };
    }
    if metrics.avg_sentence_length.unwrap_or(30.0) <= TARGET_SENTENCE_WORDS {
        score += 0.05;
    }
    if metrics.readability_grade.unwrap_or(16.0) <= 12.0 {
        score += 0.05;
    }
    f64::clamp(score, 0.0, 1.0)
}

fn summarize(decision: QualityDecision, issues: &[QualityIssue]) -> String {
    match decision {
        QualityDecision::Accept => "Entry meets quality standards.".to_string(),
        QualityDecision::Reject => {
            let errors: Vec<&str> = issues
                .iter()
                .filter(|i| i.severity == Severity::Error)
                .map(|i| i.message.as_str())
                .collect();
            format!("Entry rejected: {}", errors.join("; "))
        }
        QualityDecision::NeedsRevision => "Entry needs revision before acceptance.".to_string(),
        QualityDecision::AcceptWithSuggestions => {
            format!("Entry acceptable with {} suggestion(s) for improvement.", issues.len())
        }
    }
}

fn split_sentences(text: &str) -> Vec<&str> {
    sentence_break()
        .split(text)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Fraction of bigrams that repeat an earlier one.
fn bigram_repetition(words: &[&str]) -> f64 {
    if words.len() < 2 {
        return 0.0;
    }
    let mut counts: HashMap<(&str, &str), usize> = HashMap::new();
    for pair in words.windows(2) {
        *counts.entry((pair[0], pair[1])).or_default() += 1;
    }
    let repeated: usize = counts.values().filter(|c| **c > 1).map(|c| c - 1).sum();
    repeated as f64 / (words.len() - 1) as f64
}

fn duplicate_sentences(sentences: &[&str]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut reported = HashSet::new();
    let mut duplicates = Vec::new();
    for sentence in sentences {
        let normalized = sentence.to_lowercase();
        if !seen.insert(normalized.clone()) && reported.insert(normalized) {
            duplicates.push(sentence.chars().take(50).collect());
        }
    }
    duplicates
}

/// Vowel-group approximation.
fn count_syllables(word: &str) -> usize {
    let word = word.to_lowercase();
    if word.chars().count() <= 3 {
        return 1;
    }
    let mut count: usize = 0;
    let mut prev_vowel = false;
    for c in word.chars() {
        let vowel = "aeiouy".contains(c);
        if vowel && !prev_vowel {
            count += 1;
        }
        prev_vowel = vowel;
    }
    if word.ends_with('e') {
        count = count.saturating_sub(1);
    }
    count.max(1)
}

fn round(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
