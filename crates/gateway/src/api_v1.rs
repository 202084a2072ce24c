//! HTTP API v1: queries and the model registry.
//!
//! Endpoints:
//!
//! - `POST /v1/query`            run a query, get a JSON `SynthesisResult`
//! - `POST /v1/query/stream`     run a query, get an SSE stream of run events
//! - `GET  /v1/models`           current model registry snapshot
//! - `POST /v1/models/refresh`   re-list provider models, swap in the new snapshot

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::sse::{Event as SseEvent, Sse},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use ragloom_core::error::RunError;
use ragloom_core::message::{ConversationContext, Message};
use ragloom_core::query::{DEFAULT_MAX_RESULTS, Query, QueryOptions};
use ragloom_core::retrieval::Target;
use ragloom_orchestrator::SynthesisResult;
use ragloom_providers::ModelRegistry;

use crate::SharedState;

// ── Router ────────────────────────────────────────────────────────────────

/// Build the v1 API router. Nest this under "/v1" in the main router.
pub fn v1_router(state: SharedState) -> Router {
    Router::new()
        .route("/query", post(query_handler))
        .route("/query/stream", post(query_stream_handler))
        .route("/models", get(list_models_handler))
        .route("/models/refresh", post(refresh_models_handler))
        .with_state(state)
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    /// Answer from this document collection. Mutually exclusive with `web`.
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub web: Option<bool>,
    #[serde(default)]
    pub decompose: bool,
    /// Implies `decompose`.
    #[serde(default)]
    pub informed: bool,
    #[serde(default)]
    pub deep_scrape: bool,
    #[serde(default)]
    pub max_results: Option<usize>,
    /// Prior turns, oldest first.
    #[serde(default)]
    pub history: Vec<Message>,
}

impl QueryRequest {
    fn into_query(self) -> Result<(Query, Option<ConversationContext>), RunError> {
        let target = match (self.collection, self.web) {
            (Some(_), Some(true)) => {
                return Err(RunError::InvalidQuery(
                    "choose either a collection or the web, not both".into(),
                ));
            }
            (Some(id), _) => Target::collection(id),
            (None, Some(false)) => {
                return Err(RunError::InvalidQuery(
                    "no target: set a collection or enable web".into(),
                ));
            }
            (None, _) => Target::Web,
        };

        let options = QueryOptions {
            max_results: self.max_results.unwrap_or(DEFAULT_MAX_RESULTS),
            decompose: self.decompose || self.informed,
            informed: self.informed,
            deep_scrape: self.deep_scrape,
        };

        let query = Query::new(self.query, target, options)?;
        let conversation = (!self.history.is_empty()).then(|| ConversationContext::new(self.history));
        Ok((query, conversation))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// A fatal run error rendered as `{"error": {"code", "message"}}`.
#[derive(Debug)]
pub struct ApiError(RunError);

impl From<RunError> for ApiError {
    fn from(error: RunError) -> Self {
        Self(error)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            RunError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            RunError::AllRetrievalFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            RunError::SynthesisFailure(_) => StatusCode::BAD_GATEWAY,
            RunError::BudgetExceeded { .. } | RunError::Cancelled => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = match &self.0 {
            RunError::Cancelled => "internal",
            other => other.code(),
        };
        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: self.0.user_message(),
            },
        };
        (status, Json(body)).into_response()
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn query_handler(
    State(state): State<SharedState>,
    Json(payload): Json<QueryRequest>,
) -> Result<Json<SynthesisResult>, ApiError> {
    let (query, conversation) = payload.into_query()?;
    info!(query_id = %query.id(), target = %query.target(), "v1/query request");

    let result = state
        .orchestrator
        .answer(&query, conversation.as_ref())
        .await
        .inspect_err(|e| warn!(code = e.code(), "v1/query failed"))?;

    Ok(Json(result))
}

/// `POST /v1/query/stream`: run a query, receive an SSE stream of events.
///
/// Validation errors are returned as plain JSON before the stream starts.
/// Closing the connection cancels the run.
async fn query_stream_handler(
    State(state): State<SharedState>,
    Json(payload): Json<QueryRequest>,
) -> Result<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let (query, conversation) = payload.into_query()?;
    info!(query_id = %query.id(), target = %query.target(), "v1/query/stream SSE request");

    let rx = state.orchestrator.run_stream(query, conversation);

    let stream = ReceiverStream::new(rx).map(|event| {
        let event_type = event.event_type();
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok(SseEvent::default().event(event_type).data(data))
    });

    Ok(Sse::new(stream))
}

async fn list_models_handler(State(state): State<SharedState>) -> Json<ModelRegistry> {
    Json(state.registry().await.as_ref().clone())
}

async fn refresh_models_handler(State(state): State<SharedState>) -> Json<ModelRegistry> {
    let refreshed = state.refresh_registry().await;
    Json(refreshed.as_ref().clone())
}
