//! The structured outcome of a run.

use crate::context::{AssemblyStats, ContextItem};
use crate::strategy::{RunState, Strategy};
use ragloom_core::provider::Usage;
use ragloom_core::query::QueryId;
use ragloom_core::retrieval::Target;
use serde::{Deserialize, Serialize};

/// The final answer plus everything a caller needs to show or audit it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisResult {
    pub query_id: QueryId,
    /// Model output, unmodified.
    pub answer: String,
    /// Sub-query texts used for retrieval. Empty when nothing was decomposed.
    pub sub_queries: Vec<String>,
    /// Assembled sources the answer actually cites, in label order.
    pub sources: Vec<ContextItem>,
    pub metadata: RunMetadata,
}

impl SynthesisResult {
    pub fn is_degraded(&self) -> bool {
        !self.metadata.degradations.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub strategy: Strategy,
    pub provider: String,
    pub model: String,
    pub target: Target,
    pub sub_queries_dispatched: usize,
    pub sub_queries_failed: usize,
    pub sub_queries_empty: usize,
    #[serde(default)]
    pub degradations: Vec<Degradation>,
    pub context: AssemblyStats,
    pub low_confidence: bool,
    pub trace: Vec<RunState>,
    #[serde(default)]
    pub unresolved_citations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationKind {
    SubQueryFailed,
    SubQueriesEmpty,
    DecompositionFailed,
    DecompositionEmpty,
    ExploratoryFailed,
}

/// A recoverable problem the run worked around.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Degradation {
    pub kind: DegradationKind,
    pub message: String,
}

impl Degradation {
    pub fn new(kind: DegradationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Degradation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}
