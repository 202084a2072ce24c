//! Web meta-search through a SearXNG instance's JSON API.

use async_trait::async_trait;
use ragloom_core::error::RetrievalError;
use ragloom_core::retrieval::{EvidenceItem, RetrievalBackend, Target};
use std::time::Duration;
use tracing::{debug, warn};

/// SearXNG caps a single result page; asking for more is pointless.
const MAX_RESULTS: usize = 25;

/// Score decay per rank when the engine returns no scores.
const RANK_DECAY: f32 = 0.05;

pub struct SearxngBackend {
    base_url: String,
    categories: Vec<String>,
    language: String,
    client: reqwest::Client,
}

impl SearxngBackend {
    pub fn new(base_url: impl Into<String>, user_agent: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client for SearXNG");
                reqwest::Client::new()
            });

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            categories: vec!["general".into()],
            language: "en".into(),
            client,
        }
    }

    pub fn from_config(config: &ragloom_config::RetrievalConfig, timeout: Duration) -> Self {
        Self::new(&config.searxng_url, &config.user_agent, timeout)
            .with_categories(config.search_categories.clone())
    }

    pub fn with_categories(mut self, categories: Vec<String>) -> Self {
        if !categories.is_empty() {
            self.categories = categories;
        }
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }
}

#[async_trait]
impl RetrievalBackend for SearxngBackend {
    fn name(&self) -> &str {
        "searxng"
    }

    async fn search(
        &self,
        query: &str,
        target: &Target,
        top_k: usize,
    ) -> Result<Vec<EvidenceItem>, RetrievalError> {
        if !target.is_web() {
            return Err(RetrievalError::UnsupportedTarget {
                backend: self.name().into(),
                target: target.to_string(),
            });
        }

        let categories = self.categories.join(",");
        let limit = top_k.min(MAX_RESULTS).to_string();
        debug!(query = %query, categories = %categories, "SearXNG: searching");

        let response = self
            .client
            .get(format!("{}/search", self.base_url))
            .header("Accept", "application/json")
            .query(&[
                ("q", query),
                ("format", "json"),
                ("categories", categories.as_str()),
                ("language", self.language.as_str()),
                ("results", limit.as_str()),
            ])
            .send()
            .await
            .map_err(|e| RetrievalError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            return Err(RetrievalError::Backend {
                backend: self.name().into(),
                message: format!("HTTP {status}"),
            });
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RetrievalError::InvalidResponse(e.to_string()))?;

        let items = parse_results(&body, top_k);
        debug!(query = %query, count = items.len(), "SearXNG: results parsed");
        Ok(items)
    }
}

/// Turn a SearXNG JSON body into evidence sorted by descending score.
///
/// Raw engine scores are unbounded, so they are divided by the batch maximum.
/// When no result carries a score, rank order decides.
fn parse_results(body: &serde_json::Value, top_k: usize) -> Vec<EvidenceItem> {
    let Some(results) = body["results"].as_array() else {
        return Vec::new();
    };

    let usable: Vec<&serde_json::Value> = results
        .iter()
        .filter(|r| {
            let has = |k: &str| r[k].as_str().is_some_and(|s| !s.trim().is_empty());
            has("url") && has("title")
        })
        .collect();

    let max_raw = usable
        .iter()
        .filter_map(|r| r["score"].as_f64())
        .fold(0.0_f64, f64::max);

    let mut items: Vec<EvidenceItem> = usable
        .into_iter()
        .enumerate()
        .map(|(rank, r)| {
            let score = match r["score"].as_f64() {
                Some(raw) if max_raw > 0.0 => (raw / max_raw) as f32,
                Some(_) => 0.0,
                None if max_raw > 0.0 => 0.0,
                None => (1.0 - rank as f32 * RANK_DECAY).max(RANK_DECAY),
            };
            EvidenceItem::web(
                r["url"].as_str().unwrap_or_default().trim(),
                r["title"].as_str().unwrap_or_default().trim(),
                r["content"].as_str().unwrap_or_default().trim(),
                score,
            )
        })
        .collect();

    // Stable: equal scores keep engine order
    items.sort_by(|a, b| b.score.total_cmp(&a.score));
    items.truncate(top_k);
    items
}
