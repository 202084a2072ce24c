//! Retrieval router: picks the backend for a target.

use async_trait::async_trait;
use ragloom_core::error::RetrievalError;
use ragloom_core::provider::Provider;
use ragloom_core::retrieval::{EvidenceItem, RetrievalBackend, Target};
use std::sync::Arc;
use tracing::debug;

use crate::qdrant::QdrantBackend;
use crate::scrape::DeepScrapeBackend;
use crate::searxng::SearxngBackend;

/// Holds one backend per target family.
#[derive(Clone, Default)]
pub struct RetrievalRouter {
    web: Option<Arc<dyn RetrievalBackend>>,
    deep_web: Option<Arc<dyn RetrievalBackend>>,
    collections: Option<Arc<dyn RetrievalBackend>>,
}

impl RetrievalRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route every target to the same backend.
    pub fn single(backend: Arc<dyn RetrievalBackend>) -> Self {
        Self {
            web: Some(backend.clone()),
            deep_web: None,
            collections: Some(backend),
        }
    }

    pub fn with_web(mut self, backend: Arc<dyn RetrievalBackend>) -> Self {
        self.web = Some(backend);
        self
    }

    pub fn with_deep_web(mut self, backend: Arc<dyn RetrievalBackend>) -> Self {
        self.deep_web = Some(backend);
        self
    }

    pub fn with_collections(mut self, backend: Arc<dyn RetrievalBackend>) -> Self {
        self.collections = Some(backend);
        self
    }

    /// The backend serving `target`. Deep scrape falls back to plain web
    /// search when no scraping backend is configured.
    pub fn select(
        &self,
        target: &Target,
        deep_scrape: bool,
    ) -> Result<Arc<dyn RetrievalBackend>, RetrievalError> {
        let chosen = match target {
            Target::Web if deep_scrape => match &self.deep_web {
                Some(deep) => Some(deep),
                None => {
                    debug!("Deep scrape requested but not configured, using plain web search");
                    self.web.as_ref()
                }
            },
            Target::Web => self.web.as_ref(),
            Target::Collection(_) => self.collections.as_ref(),
        };

        chosen.cloned().ok_or_else(|| RetrievalError::UnsupportedTarget {
            backend: "router".into(),
            target: target.to_string(),
        })
    }
}

#[async_trait]
impl RetrievalBackend for RetrievalRouter {
    fn name(&self) -> &str {
        "router"
    }

    async fn search(
        &self,
        query: &str,
        target: &Target,
        top_k: usize,
    ) -> Result<Vec<EvidenceItem>, RetrievalError> {
        self.select(target, false)?.search(query, target, top_k).await
    }
}

/// Build the standard backends from configuration.
///
/// Collection search needs an embedding provider; without one only web
/// search is available.
pub fn build_from_config(
    config: &ragloom_config::AppConfig,
    embedder: Option<Arc<dyn Provider>>,
) -> RetrievalRouter {
    let timeout = config.timeouts.retrieval();
    let web: Arc<dyn RetrievalBackend> =
        Arc::new(SearxngBackend::from_config(&config.retrieval, timeout));
    let deep: Arc<dyn RetrievalBackend> = Arc::new(DeepScrapeBackend::from_config(
        web.clone(),
        &config.retrieval,
        &config.scraper,
        timeout,
    ));

    let mut router = RetrievalRouter::new().with_web(web).with_deep_web(deep);

    if let Some(embedder) = embedder {
        let qdrant = QdrantBackend::new(
            &config.retrieval.qdrant_url,
            embedder,
            &config.retrieval.embedding_model,
            timeout,
        )
        .with_api_key(config.retrieval.qdrant_api_key.clone());
        router = router.with_collections(Arc::new(qdrant));
    }

    router
}
