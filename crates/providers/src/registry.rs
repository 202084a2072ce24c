//! Model registry: an immutable snapshot of which models each provider offers.
//!
//! A snapshot is built once at startup and shared read-only. `refresh()`
//! queries every provider and returns a *new* snapshot; callers swap it in
//! wherever they hold the current one. Nothing is mutated in place.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

use crate::router::ProviderRouter;

/// How current a provider's model list is.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ListingStatus {
    /// Never listed.
    Unknown,
    /// Listed successfully at `listed_at`.
    Fresh,
    /// The last refresh failed; the models are from an earlier listing.
    Stale { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderModels {
    pub models: Vec<String>,
    pub status: ListingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listed_at: Option<DateTime<Utc>>,
}

impl ProviderModels {
    fn unknown() -> Self {
        Self {
            models: Vec::new(),
            status: ListingStatus::Unknown,
            listed_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelRegistry {
    /// Incremented on every refresh.
    pub generation: u64,
    pub default_provider: String,
    pub default_model: String,
    pub providers: BTreeMap<String, ProviderModels>,
}

impl ModelRegistry {
    /// An initial snapshot listing the router's providers with no models yet.
    pub fn from_router(router: &ProviderRouter) -> Self {
        Self {
            generation: 0,
            default_provider: router.default_provider_name().to_string(),
            default_model: router.default_model().to_string(),
            providers: router
                .list()
                .into_iter()
                .map(|name| (name.to_string(), ProviderModels::unknown()))
                .collect(),
        }
    }

    /// Query every provider and return the resulting snapshot.
    ///
    /// Providers that fail or time out keep their previous models, marked stale.
    pub async fn refresh(&self, router: &ProviderRouter, timeout: Duration) -> ModelRegistry {
        let targets: Vec<_> = router
            .list()
            .into_iter()
            .map(|name| (name.to_string(), router.get(name)))
            .collect();

        let listings = join_all(targets.into_iter().map(|(name, provider)| async move {
            let Some(provider) = provider else {
                return (name, Err("provider not registered".to_string()));
            };
            let result = match tokio::time::timeout(timeout, provider.list_models()).await {
                Ok(Ok(models)) => Ok(models),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("timed out after {}s", timeout.as_secs())),
            };
            (name, result)
        }))
        .await;

        let now = Utc::now();
        let mut providers = BTreeMap::new();
        for (name, result) in listings {
            let entry = match result {
                Ok(models) => {
                    info!(provider = %name, count = models.len(), "Model listing refreshed");
                    ProviderModels {
                        models,
                        status: ListingStatus::Fresh,
                        listed_at: Some(now),
                    }
                }
                Err(error) => {
                    warn!(provider = %name, error = %error, "Model listing failed, keeping previous");
                    let previous = self.providers.get(&name);
                    ProviderModels {
                        models: previous.map(|p| p.models.clone()).unwrap_or_default(),
                        status: ListingStatus::Stale { error },
                        listed_at: previous.and_then(|p| p.listed_at),
                    }
                }
            };
            providers.insert(name, entry);
        }

        ModelRegistry {
            generation: self.generation + 1,
            default_provider: router.default_provider_name().to_string(),
            default_model: router.default_model().to_string(),
            providers,
        }
    }

    /// Models known for `provider`.
    pub fn models(&self, provider: &str) -> &[String] {
        self.providers
            .get(provider)
            .map(|p| p.models.as_slice())
            .unwrap_or(&[])
    }

    /// Whether `model` is known for `provider`. Unknown listings accept anything.
    pub fn accepts(&self, provider: &str, model: &str) -> bool {
        match self.providers.get(provider) {
            Some(p) if p.status == ListingStatus::Unknown || p.models.is_empty() => true,
            Some(p) => p.models.iter().any(|m| m == model),
            None => false,
        }
    }
}
