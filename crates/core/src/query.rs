//! Query and sub-query value types.
//!
//! A [`Query`] is created once at request entry and never mutated; the
//! orchestrator derives [`SubQuery`] values from it during decomposition.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RunError;
use crate::retrieval::Target;

/// Lower and upper bound for the per-query result cap.
pub const MAX_RESULTS_RANGE: (usize, usize) = (1, 10);

/// Result cap used when the caller doesn't pick one.
pub const DEFAULT_MAX_RESULTS: usize = 4;

/// Unique identifier for a query run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryId(pub Uuid);

impl QueryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for QueryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for QueryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-selected options for one query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Cap on evidence items in the assembled context. Clamped to 1..=10.
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Split the query into sub-queries before retrieval.
    #[serde(default)]
    pub decompose: bool,

    /// Run an exploratory pass first and decompose with its answer in hand.
    /// Only meaningful together with `decompose`.
    #[serde(default)]
    pub informed: bool,

    /// Fetch full pages for top web results.
    #[serde(default)]
    pub deep_scrape: bool,
}

fn default_max_results() -> usize {
    DEFAULT_MAX_RESULTS
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            max_results: DEFAULT_MAX_RESULTS,
            decompose: false,
            informed: false,
            deep_scrape: false,
        }
    }
}

impl QueryOptions {
    pub fn decomposed() -> Self {
        Self {
            decompose: true,
            ..Self::default()
        }
    }

    pub fn informed() -> Self {
        Self {
            decompose: true,
            informed: true,
            ..Self::default()
        }
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_deep_scrape(mut self, deep_scrape: bool) -> Self {
        self.deep_scrape = deep_scrape;
        self
    }
}

/// An immutable user question plus where and how to answer it.
#[derive(Debug, Clone, Serialize)]
pub struct Query {
    id: QueryId,
    text: String,
    target: Target,
    options: QueryOptions,
}

impl Query {
    /// Validate and build a query. Blank text or a blank collection id is rejected;
    /// `max_results` is clamped into range.
    pub fn new(
        text: impl Into<String>,
        target: Target,
        mut options: QueryOptions,
    ) -> Result<Self, RunError> {
        let text = text.into().trim().to_string();
        if text.is_empty() {
            return Err(RunError::InvalidQuery("query text is empty".into()));
        }
        if let Target::Collection(id) = &target
            && id.trim().is_empty()
        {
            return Err(RunError::InvalidQuery("collection id is empty".into()));
        }

        options.max_results = options
            .max_results
            .clamp(MAX_RESULTS_RANGE.0, MAX_RESULTS_RANGE.1);

        Ok(Self {
            id: QueryId::new(),
            text,
            target,
            options,
        })
    }

    pub fn id(&self) -> QueryId {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    /// A sub-query of this query at `index`.
    pub fn sub_query(&self, index: usize, text: impl Into<String>) -> SubQuery {
        SubQuery {
            index,
            text: text.into(),
            parent: self.id,
        }
    }
}

/// A narrower query derived from a parent [`Query`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubQuery {
    pub index: usize,
    pub text: String,
    pub parent: QueryId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_query_is_rejected() {
        let err = Query::new("   ", Target::Web, QueryOptions::default()).unwrap_err();
        assert_eq!(err.code(), "invalid_query");
    }

    #[test]
    fn blank_collection_is_rejected() {
        let err = Query::new("q", Target::collection(" "), QueryOptions::default()).unwrap_err();
        assert!(matches!(err, RunError::InvalidQuery(_)));
    }

    #[test]
    fn max_results_is_clamped() {
        let q = Query::new("q", Target::Web, QueryOptions::default().with_max_results(50)).unwrap();
        assert_eq!(q.options().max_results, 10);

        let q = Query::new("q", Target::Web, QueryOptions::default().with_max_results(0)).unwrap();
        assert_eq!(q.options().max_results, 1);
    }

    #[test]
    fn text_is_trimmed_and_sub_queries_point_at_parent() {
        let q = Query::new("  what is rust?  ", Target::Web, QueryOptions::decomposed()).unwrap();
        assert_eq!(q.text(), "what is rust?");

        let sub = q.sub_query(1, "rust ownership");
        assert_eq!(sub.parent, q.id());
        assert_eq!(sub.index, 1);
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let opts: QueryOptions = serde_json::from_str(r#"{"decompose": true}"#).unwrap();
        assert!(opts.decompose);
        assert!(!opts.informed);
        assert_eq!(opts.max_results, DEFAULT_MAX_RESULTS);
    }
}
