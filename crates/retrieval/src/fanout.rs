//! Bounded concurrent fan-out of sub-queries to one retrieval backend.
//!
//! Every sub-query gets its own timeout. A failing or empty sub-query never
//! cancels its siblings; each outcome is reported separately so the caller
//! can decide whether the run as a whole still has something to work with.

use futures::StreamExt;
use ragloom_core::error::RetrievalError;
use ragloom_core::query::SubQuery;
use ragloom_core::retrieval::{EvidenceItem, RetrievalBackend, Target};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default in-flight cap.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// What happened to one sub-query.
#[derive(Debug, Clone)]
pub enum SubQueryOutcome {
    Retrieved(Vec<EvidenceItem>),
    Empty,
    Failed(RetrievalError),
}

#[derive(Debug, Clone)]
pub struct SubQueryReport {
    pub index: usize,
    pub query: String,
    pub outcome: SubQueryOutcome,
    pub elapsed: Duration,
}

impl SubQueryReport {
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, SubQueryOutcome::Failed(_))
    }
}

/// Per-sub-query reports, ordered by sub-query index.
#[derive(Debug, Clone, Default)]
pub struct FanOutReport {
    pub reports: Vec<SubQueryReport>,
}

impl FanOutReport {
    /// All retrieved evidence, in sub-query order then backend rank.
    pub fn evidence(&self) -> Vec<EvidenceItem> {
        self.reports
            .iter()
            .filter_map(|r| match &r.outcome {
                SubQueryOutcome::Retrieved(items) => Some(items.iter().cloned()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn dispatched(&self) -> usize {
        self.reports.len()
    }

    pub fn failed_count(&self) -> usize {
        self.reports.iter().filter(|r| r.is_failed()).count()
    }

    pub fn empty_count(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| matches!(r.outcome, SubQueryOutcome::Empty))
            .count()
    }

    /// True when every dispatched sub-query errored. Empty results don't count.
    pub fn all_failed(&self) -> bool {
        !self.reports.is_empty() && self.failed_count() == self.reports.len()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&SubQueryReport, &RetrievalError)> {
        self.reports.iter().filter_map(|r| match &r.outcome {
            SubQueryOutcome::Failed(e) => Some((r, e)),
            _ => None,
        })
    }
}

pub struct FanOut {
    backend: Arc<dyn RetrievalBackend>,
    timeout: Duration,
    max_concurrency: usize,
}

impl FanOut {
    pub fn new(backend: Arc<dyn RetrievalBackend>, timeout: Duration) -> Self {
        Self {
            backend,
            timeout,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Run every sub-query against `target`, at most
    /// `min(sub_queries.len(), max_concurrency)` at a time.
    pub async fn run(&self, sub_queries: &[SubQuery], target: &Target, top_k: usize) -> FanOutReport {
        if sub_queries.is_empty() {
            return FanOutReport::default();
        }

        let limit = sub_queries.len().min(self.max_concurrency);
        debug!(
            backend = self.backend.name(),
            sub_queries = sub_queries.len(),
            limit,
            "Fan-out: dispatching"
        );

        // Futures own their inputs; borrowing them makes `run` non-`Send`.
        let backend = Arc::clone(&self.backend);
        let timeout = self.timeout;
        let mut reports: Vec<SubQueryReport> = futures::stream::iter(sub_queries.to_vec())
            .map(|sq| search_one(Arc::clone(&backend), sq, target.clone(), top_k, timeout))
            .buffer_unordered(limit)
            .collect()
            .await;
        reports.sort_by_key(|r| r.index);

        let report = FanOutReport { reports };
        info!(
            dispatched = report.dispatched(),
            failed = report.failed_count(),
            empty = report.empty_count(),
            "Fan-out: complete"
        );
        report
    }
}

async fn search_one(
    backend: Arc<dyn RetrievalBackend>,
    sub_query: SubQuery,
    target: Target,
    top_k: usize,
    timeout: Duration,
) -> SubQueryReport {
    let started = Instant::now();
    let result = tokio::time::timeout(timeout, backend.search(&sub_query.text, &target, top_k)).await;

    let outcome = match result {
        Ok(Ok(items)) if items.is_empty() => SubQueryOutcome::Empty,
        Ok(Ok(items)) => SubQueryOutcome::Retrieved(
            items
                .into_iter()
                .map(|item| item.with_origin(sub_query.index))
                .collect(),
        ),
        Ok(Err(e)) => {
            warn!(index = sub_query.index, query = %sub_query.text, error = %e, "Sub-query retrieval failed");
            SubQueryOutcome::Failed(e)
        }
        Err(_) => {
            let ms = timeout.as_millis() as u64;
            warn!(index = sub_query.index, query = %sub_query.text, timeout_ms = ms, "Sub-query retrieval timed out");
            SubQueryOutcome::Failed(RetrievalError::Timeout(ms))
        }
    };

    SubQueryReport {
        index: sub_query.index,
        query: sub_query.text,
        outcome,
        elapsed: started.elapsed(),
    }
}
