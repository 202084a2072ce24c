//! Context assembly: turn raw evidence from one or more retrieval calls into a
//! single labeled, bounded block the synthesis prompt can cite.
//!
//! # Algorithm
//!
//! 1. Deduplicate by [`EvidenceKey`]; a duplicate keeps the higher score and
//!    the union of contributing sub-query indices.
//! 2. Sort by score descending. Ties: documents before web, then first-seen.
//! 3. Greedily include items up to the item cap and the character budget.
//!    The item that overflows is truncated at a sentence boundary (else a word
//!    boundary, never inside a `[Source N]` marker) or dropped when less than
//!    `min_snippet_chars` of it would survive.
//! 4. Render each item as a `[Source N]` header line followed by its snippet.
//!
//! # Determinism
//!
//! Identical evidence and budget always produce identical output. Nothing
//! here reads the clock or iterates a hash map in output order.

use crate::context::token;
use ragloom_core::error::RunError;
use ragloom_core::retrieval::{EvidenceItem, EvidenceKey, Locator};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

/// Placed in the synthesis prompt instead of the source block when no
/// evidence survived assembly.
pub const NO_EVIDENCE_MARKER: &str = "[NO EVIDENCE: retrieval returned no usable sources]";

const SEPARATOR: &str = "\n\n";

// ── Types ─────────────────────────────────────────────────────────────────

/// Limits applied to one assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextBudget {
    /// Ceiling on the rendered block, in characters.
    pub max_chars: usize,
    /// Ceiling on the number of included items.
    pub max_items: usize,
    /// A truncated snippet shorter than this is dropped instead.
    pub min_snippet_chars: usize,
    /// Below this score everywhere, the context is flagged low-confidence.
    pub confidence_floor: f32,
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self {
            max_chars: 12_000,
            max_items: ragloom_core::query::DEFAULT_MAX_RESULTS,
            min_snippet_chars: 80,
            confidence_floor: 0.2,
        }
    }
}

impl ContextBudget {
    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }
}

/// An included piece of evidence and the label the answer cites it by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextItem {
    /// `N` in `[Source N]`, starting at 1.
    pub label: usize,
    pub evidence: EvidenceItem,
    /// Indices of every sub-query that retrieved this item, ascending.
    #[serde(default)]
    pub origins: Vec<usize>,
    #[serde(default)]
    pub truncated: bool,
}

impl ContextItem {
    pub fn marker(&self) -> String {
        format!("[Source {}]", self.label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// The item cap was already reached.
    ResultCap,
    /// Not enough of the character budget left for a useful snippet.
    Budget,
}

/// One piece of evidence left out of the context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropInfo {
    pub key: String,
    pub title: String,
    pub score: f32,
    pub reason: DropReason,
}

/// Counts describing one assembly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssemblyStats {
    /// Raw items handed in, duplicates included.
    pub considered: usize,
    /// Items left after deduplication.
    pub unique: usize,
    pub included: usize,
    pub truncated: usize,
    pub dropped: usize,
    pub rendered_chars: usize,
    pub budget_chars: usize,
    pub estimated_tokens: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub drops: Vec<DropInfo>,
}

/// The labeled context block for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledContext {
    /// Included items, in label order.
    pub items: Vec<ContextItem>,
    /// Rendered block. Empty when `items` is empty.
    pub text: String,
    /// Every included item scored below the confidence floor.
    pub low_confidence: bool,
    pub stats: AssemblyStats,
}

impl AssembledContext {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// What goes into the prompt: the block, or the no-evidence marker.
    pub fn prompt_block(&self) -> &str {
        if self.is_empty() {
            NO_EVIDENCE_MARKER
        } else {
            &self.text
        }
    }

    /// Whether the model must be told to answer with the insufficient-context
    /// phrase.
    pub fn needs_insufficient_notice(&self) -> bool {
        self.is_empty() || self.low_confidence
    }

    pub fn item(&self, label: usize) -> Option<&ContextItem> {
        label.checked_sub(1).and_then(|i| self.items.get(i))
    }
}

/// Errors from context assembly.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AssemblyError {
    /// The rendered block came out larger than the ceiling. Internal
    /// invariant; the fill loop should make this unreachable.
    #[error("Rendered context ({rendered} chars) exceeds budget ({budget} chars)")]
    BudgetExceeded { rendered: usize, budget: usize },
}

impl From<AssemblyError> for RunError {
    fn from(err: AssemblyError) -> Self {
        match err {
            AssemblyError::BudgetExceeded { rendered, budget } => {
                RunError::BudgetExceeded { rendered, budget }
            }
        }
    }
}

struct Candidate {
    item: EvidenceItem,
    key: EvidenceKey,
    origins: BTreeSet<usize>,
    first_seen: usize,
}

// ── Assembler ─────────────────────────────────────────────────────────────

/// The context assembler. Stateless; create one per budget and reuse it.
#[derive(Debug, Clone, Default)]
pub struct ContextAssembler {
    budget: ContextBudget,
}

impl ContextAssembler {
    pub fn new(budget: ContextBudget) -> Self {
        Self { budget }
    }

    pub fn budget(&self) -> &ContextBudget {
        &self.budget
    }

    /// Deduplicate, rank, fill and render `evidence`.
    pub fn assemble(&self, evidence: Vec<EvidenceItem>) -> Result<AssembledContext, AssemblyError> {
        let considered = evidence.len();
        let mut candidates = dedup(evidence);
        let unique = candidates.len();
        candidates.sort_by(rank);

        let mut items: Vec<ContextItem> = Vec::new();
        let mut blocks: Vec<String> = Vec::new();
        let mut drops: Vec<DropInfo> = Vec::new();
        let mut used = 0usize;

        for Candidate {
            mut item,
            key,
            origins,
            ..
        } in candidates
        {
            if items.len() >= self.budget.max_items {
                drops.push(drop_info(&key, &item, DropReason::ResultCap));
                continue;
            }

            let label = items.len() + 1;
            let header = render_header(label, &item);
            let separator = if blocks.is_empty() { 0 } else { SEPARATOR.len() };
            let fixed = separator + header.chars().count() + 1;
            let remaining = self.budget.max_chars.saturating_sub(used);

            let content = item.content.trim();
            let (snippet, truncated) = if fixed + content.chars().count() <= remaining {
                (content.to_string(), false)
            } else {
                let room = remaining.saturating_sub(fixed);
                let cut = if room >= self.budget.min_snippet_chars {
                    truncate_snippet(content, room)
                } else {
                    String::new()
                };
                if cut.chars().count() < self.budget.min_snippet_chars {
                    drops.push(drop_info(&key, &item, DropReason::Budget));
                    continue;
                }
                (cut, true)
            };

            let block = format!("{header}\n{snippet}");
            used += separator + block.chars().count();
            blocks.push(block);

            item.content = snippet;
            items.push(ContextItem {
                label,
                evidence: item,
                origins: origins.into_iter().collect(),
                truncated,
            });
        }

        let text = blocks.join(SEPARATOR);
        let rendered_chars = text.chars().count();
        if rendered_chars > self.budget.max_chars {
            return Err(AssemblyError::BudgetExceeded {
                rendered: rendered_chars,
                budget: self.budget.max_chars,
            });
        }

        let low_confidence = !items.is_empty()
            && items
                .iter()
                .all(|i| i.evidence.score < self.budget.confidence_floor);

        let stats = AssemblyStats {
            considered,
            unique,
            included: items.len(),
            truncated: items.iter().filter(|i| i.truncated).count(),
            dropped: drops.len(),
            rendered_chars,
            budget_chars: self.budget.max_chars,
            estimated_tokens: token::estimate_tokens(&text),
            drops,
        };

        Ok(AssembledContext {
            items,
            text,
            low_confidence,
            stats,
        })
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────

fn dedup(evidence: Vec<EvidenceItem>) -> Vec<Candidate> {
    let mut index: HashMap<EvidenceKey, usize> = HashMap::new();
    let mut candidates: Vec<Candidate> = Vec::new();

    for item in evidence {
        let key = item.key();
        match index.get(&key) {
            Some(&i) => {
                let existing = &mut candidates[i];
                existing.origins.extend(item.origin);
                if item.score > existing.item.score {
                    existing.item = item;
                }
            }
            None => {
                index.insert(key.clone(), candidates.len());
                candidates.push(Candidate {
                    origins: item.origin.into_iter().collect(),
                    first_seen: candidates.len(),
                    item,
                    key,
                });
            }
        }
    }

    candidates
}

fn rank(a: &Candidate, b: &Candidate) -> Ordering {
    b.item
        .score
        .total_cmp(&a.item.score)
        .then_with(|| a.item.kind.cmp(&b.item.kind))
        .then_with(|| a.first_seen.cmp(&b.first_seen))
}

fn drop_info(key: &EvidenceKey, item: &EvidenceItem, reason: DropReason) -> DropInfo {
    DropInfo {
        key: key.as_str().to_string(),
        title: item.title.clone(),
        score: item.score,
        reason,
    }
}

/// `[Source N] (kind, relevance 0.87) Title | page 3 | file.pdf`
fn render_header(label: usize, item: &EvidenceItem) -> String {
    let title = item.title.split_whitespace().collect::<Vec<_>>().join(" ");
    let title = if title.is_empty() { "Untitled" } else { title.as_str() };

    let mut header = format!(
        "[Source {label}] ({}, relevance {:.2}) {title}",
        item.kind, item.score
    );
    match &item.locator {
        Locator::Page(page) => header.push_str(&format!(" | page {page}")),
        Locator::Url(url) => header.push_str(&format!(" | {url}")),
        Locator::None => {}
    }
    if let Some(path) = &item.source_path {
        header.push_str(&format!(" | {path}"));
    }
    header
}

/// Cut `text` to at most `max_chars` characters.
///
/// Prefers the last sentence end, as long as it keeps at least half the
/// allowance; otherwise the last word boundary. A cut that would split a
/// `[Source N]` marker moves back to before the marker.
pub(crate) fn truncate_snippet(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let end = text
        .char_indices()
        .nth(max_chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len());

    let cut = sentence_boundary(text, end)
        .filter(|&b| b * 2 >= end)
        .or_else(|| text[..end].rfind(char::is_whitespace))
        .unwrap_or(end);

    text[..avoid_marker_split(text, cut)].trim_end().to_string()
}

fn sentence_boundary(text: &str, end: usize) -> Option<usize> {
    text[..end]
        .char_indices()
        .filter(|&(i, c)| {
            matches!(c, '.' | '!' | '?')
                && text[i + c.len_utf8()..]
                    .chars()
                    .next()
                    .is_none_or(char::is_whitespace)
        })
        .map(|(i, c)| i + c.len_utf8())
        .last()
}

fn avoid_marker_split(text: &str, cut: usize) -> usize {
    let Some(open) = text[..cut].rfind('[') else {
        return cut;
    };
    let rest = &text[open..];
    if !rest.starts_with("[Source") {
        return cut;
    }
    match rest.find(']') {
        Some(close) if open + close + 1 > cut => open,
        _ => cut,
    }
}
