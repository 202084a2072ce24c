//! In-memory backend: keyword-overlap search over a fixed corpus.
//!
//! Useful for tests, demos and offline runs where neither SearXNG nor Qdrant
//! is reachable.

use async_trait::async_trait;
use ragloom_core::error::RetrievalError;
use ragloom_core::retrieval::{EvidenceItem, RetrievalBackend, Target};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    web: Vec<EvidenceItem>,
    collections: HashMap<String, Vec<EvidenceItem>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a page to the web corpus.
    pub fn with_web(mut self, item: EvidenceItem) -> Self {
        self.web.push(item);
        self
    }

    /// Add a chunk to `collection`, creating it if needed.
    pub fn with_document(mut self, collection: impl Into<String>, item: EvidenceItem) -> Self {
        self.collections.entry(collection.into()).or_default().push(item);
        self
    }

    /// Register an empty collection.
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collections.entry(collection.into()).or_default();
        self
    }
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(|t| t.to_lowercase())
        .collect()
}

#[async_trait]
impl RetrievalBackend for InMemoryBackend {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn search(
        &self,
        query: &str,
        target: &Target,
        top_k: usize,
    ) -> Result<Vec<EvidenceItem>, RetrievalError> {
        let corpus = match target {
            Target::Web => &self.web,
            Target::Collection(id) => self
                .collections
                .get(id)
                .ok_or_else(|| RetrievalError::CollectionNotFound(id.clone()))?,
        };

        let query_terms = terms(query);
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut results: Vec<EvidenceItem> = corpus
            .iter()
            .filter_map(|item| {
                let item_terms = terms(&format!("{} {}", item.title, item.content));
                let hits = query_terms.intersection(&item_terms).count();
                (hits > 0).then(|| {
                    let mut found = item.clone();
                    found.score = hits as f32 / query_terms.len() as f32;
                    found
                })
            })
            .collect();

        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(top_k);
        Ok(results)
    }
}
