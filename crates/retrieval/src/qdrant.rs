//! Vector-similarity search over a Qdrant collection via its REST API.
//!
//! The query is embedded through a generation provider's `embed()` and the
//! resulting vector is searched against the named collection. Chunk payloads
//! are expected to carry `document_id`, `document_title`, `content`,
//! `page_number` and `file_path`, as written by the ingestion pipeline.

use async_trait::async_trait;
use ragloom_core::error::RetrievalError;
use ragloom_core::provider::{EmbeddingRequest, Provider};
use ragloom_core::retrieval::{EvidenceItem, RetrievalBackend, Target};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct QdrantBackend {
    base_url: String,
    api_key: Option<String>,
    embedder: Arc<dyn Provider>,
    embedding_model: String,
    client: reqwest::Client,
}

impl QdrantBackend {
    pub fn new(
        base_url: impl Into<String>,
        embedder: Arc<dyn Provider>,
        embedding_model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client for Qdrant");
                reqwest::Client::new()
            });

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            embedder,
            embedding_model: embedding_model.into(),
            client,
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, RetrievalError> {
        let response = self
            .embedder
            .embed(EmbeddingRequest {
                model: self.embedding_model.clone(),
                inputs: vec![query.to_string()],
            })
            .await?;

        response
            .embeddings
            .into_iter()
            .next()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| RetrievalError::InvalidResponse("embedding response was empty".into()))
    }
}

#[async_trait]
impl RetrievalBackend for QdrantBackend {
    fn name(&self) -> &str {
        "qdrant"
    }

    async fn search(
        &self,
        query: &str,
        target: &Target,
        top_k: usize,
    ) -> Result<Vec<EvidenceItem>, RetrievalError> {
        let Target::Collection(collection) = target else {
            return Err(RetrievalError::UnsupportedTarget {
                backend: self.name().into(),
                target: target.to_string(),
            });
        };

        let vector = self.embed_query(query).await?;
        debug!(collection = %collection, dims = vector.len(), top_k, "Qdrant: searching");

        let mut request = self
            .client
            .post(format!("{}/collections/{collection}/points/search", self.base_url))
            .json(&serde_json::json!({
                "vector": vector,
                "limit": top_k,
                "with_payload": true,
            }));
        if let Some(key) = &self.api_key {
            request = request.header("api-key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RetrievalError::Network(e.to_string()))?;

        match response.status().as_u16() {
            200 => {}
            404 => return Err(RetrievalError::CollectionNotFound(collection.clone())),
            status => {
                let body = response.text().await.unwrap_or_default();
                return Err(RetrievalError::Backend {
                    backend: self.name().into(),
                    message: format!("HTTP {status}: {body}"),
                });
            }
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::InvalidResponse(e.to_string()))?;

        Ok(into_evidence(body.result, top_k))
    }
}

fn into_evidence(points: Vec<ScoredPoint>, top_k: usize) -> Vec<EvidenceItem> {
    let mut items: Vec<EvidenceItem> = points
        .into_iter()
        .filter(|p| !p.payload.content.trim().is_empty())
        .map(|p| {
            let id = match &p.id {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let title = p
                .payload
                .document_title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| "Untitled document".into());

            let mut item = EvidenceItem::document(id, title, p.payload.content, p.score);
            if let Some(page) = p.payload.page_number {
                item = item.with_page(page);
            }
            if let Some(path) = p.payload.file_path {
                item = item.with_source_path(path);
            }
            item
        })
        .collect();

    items.sort_by(|a, b| b.score.total_cmp(&a.score));
    items.truncate(top_k);
    items
}

// --- Qdrant API types ---

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<ScoredPoint>,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    id: serde_json::Value,
    score: f32,
    #[serde(default)]
    payload: ChunkPayload,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    document_title: Option<String>,
    #[serde(default)]
    content: String,
    #[serde(default)]
    page_number: Option<u32>,
    #[serde(default)]
    file_path: Option<String>,
}
