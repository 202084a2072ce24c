//! HTTP API gateway for ragloom.
//!
//! Exposes a health check, buffered and streaming query endpoints, and the
//! model registry under `/v1`.
//!
//! Built on Axum for high performance async HTTP.

pub mod api_v1;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method, header};
use axum::{Router, response::Json, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use ragloom_orchestrator::{OrchestratorSettings, QueryOrchestrator};
use ragloom_providers::{ModelRegistry, ProviderRouter};

/// How long a provider gets to list its models.
pub const MODEL_LIST_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared application state for the gateway.
pub struct GatewayState {
    pub orchestrator: QueryOrchestrator,
    pub providers: ProviderRouter,
    /// Current registry snapshot. Refresh swaps in a new `Arc`.
    pub registry: RwLock<Arc<ModelRegistry>>,
    /// Held for a whole refresh so each one builds on the last published snapshot.
    refresh_lock: Mutex<()>,
    pub list_timeout: Duration,
    pub start_time: DateTime<Utc>,
}

impl GatewayState {
    pub fn new(
        orchestrator: QueryOrchestrator,
        providers: ProviderRouter,
        registry: ModelRegistry,
    ) -> Self {
        Self {
            orchestrator,
            providers,
            registry: RwLock::new(Arc::new(registry)),
            refresh_lock: Mutex::new(()),
            list_timeout: MODEL_LIST_TIMEOUT,
            start_time: Utc::now(),
        }
    }

    /// The registry snapshot current at the time of the call.
    pub async fn registry(&self) -> Arc<ModelRegistry> {
        self.registry.read().await.clone()
    }

    /// Re-list provider models and publish the new snapshot.
    ///
    /// Concurrent refreshes run one after another; readers keep seeing the
    /// previous snapshot until the swap.
    pub async fn refresh_registry(&self) -> Arc<ModelRegistry> {
        let _refreshing = self.refresh_lock.lock().await;
        let current = self.registry().await;
        let refreshed = Arc::new(current.refresh(&self.providers, self.list_timeout).await);

        *self.registry.write().await = Arc::clone(&refreshed);
        info!(generation = refreshed.generation, "Model registry refreshed");
        refreshed
    }
}

pub type SharedState = Arc<GatewayState>;

/// Build the full router: `/health` plus the v1 API.
///
/// Layers applied:
/// - CORS restricted to `allowed_origins` (any origin when empty)
/// - Request body size limit (1 MB)
/// - HTTP trace logging
pub fn build_router(state: SharedState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", api_v1::v1_router(state))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors_layer(allowed_origins))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    if origins.is_empty() {
        cors.allow_origin(AllowOrigin::any())
    } else {
        cors.allow_origin(AllowOrigin::list(origins))
    }
}

/// Start the gateway HTTP server.
///
/// Builds the provider router, retrieval router and orchestrator once and
/// shares them across requests.
pub async fn start(config: ragloom_config::AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let providers = ragloom_providers::build_from_config(&config);
    let provider = providers
        .default()
        .ok_or("No default provider configured: set an API key")?;
    let retrieval = ragloom_retrieval::build_from_config(&config, Some(provider.clone()));

    let orchestrator = QueryOrchestrator::new(provider, providers.default_model(), retrieval)
        .with_settings(OrchestratorSettings::from_config(&config));

    let registry = ModelRegistry::from_router(&providers)
        .refresh(&providers, MODEL_LIST_TIMEOUT)
        .await;

    info!(
        provider = orchestrator.provider_name(),
        model = orchestrator.model(),
        "Gateway orchestrator ready"
    );

    let state = Arc::new(GatewayState::new(orchestrator, providers, registry));
    let app = build_router(state, &config.gateway.allowed_origins);

    info!(addr = %addr, "Gateway starting with v1 API");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app(allowed_origins: &[String]) -> Router {
        build_router(api_v1::tests::test_state("unused"), allowed_origins)
    }

    #[tokio::test]
    async fn health_endpoint() {
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = app(&[]).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn cors_allows_configured_origin() {
        let origins = vec!["http://localhost:3000".to_string()];
        let req = Request::builder()
            .method("OPTIONS")
            .uri("/v1/query")
            .header("origin", "http://localhost:3000")
            .header("access-control-request-method", "POST")
            .body(Body::empty())
            .unwrap();

        let response = app(&origins).oneshot(req).await.unwrap();
        assert_eq!(
            response
                .headers()
                .get("access-control-allow-origin")
                .and_then(|v| v.to_str().ok()),
            Some("http://localhost:3000")
        );
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let req = Request::builder()
            .uri("/v1/nope")
            .body(Body::empty())
            .unwrap();

        let response = app(&[]).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
