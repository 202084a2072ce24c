//! End-to-end integration tests for the ragloom query pipeline.
//!
//! These tests drive the orchestrator from query to cited answer against an
//! in-memory corpus and a scripted generation backend, then exercise the
//! same pipeline through the gateway router.

use std::sync::{Arc, Mutex};

use ragloom_core::error::{ProviderError, RunError};
use ragloom_core::message::{ConversationContext, Message};
use ragloom_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use ragloom_core::query::{Query, QueryOptions};
use ragloom_core::retrieval::{EvidenceItem, Target};
use ragloom_orchestrator::{
    DegradationKind, OrchestratorSettings, QueryOrchestrator, RunState, StreamEvent, Strategy,
};
use ragloom_providers::{ModelRegistry, ProviderRouter};
use ragloom_retrieval::{InMemoryBackend, RetrievalRouter};

// ── Mock Provider ────────────────────────────────────────────────────────

/// A mock provider that returns scripted responses in sequence and records
/// every prompt it was sent.
struct ScriptedProvider {
    responses: Vec<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    fn new(responses: &[&str]) -> Self {
        Self {
            responses: responses.iter().map(|r| r.to_string()).collect(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    fn prompt(&self, n: usize) -> String {
        self.prompts.lock().unwrap()[n].clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut prompts = self.prompts.lock().unwrap();
        let n = prompts.len();
        if n >= self.responses.len() {
            panic!(
                "ScriptedProvider exhausted: call #{}, have {}",
                n,
                self.responses.len()
            );
        }
        prompts.push(
            request
                .messages
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        );
        Ok(text_response(&self.responses[n]))
    }
}

fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock".into(),
        metadata: serde_json::Map::new(),
    }
}

fn corpus() -> InMemoryBackend {
    InMemoryBackend::new()
        .with_document(
            "manuals",
            EvidenceItem::document(
                "kettle-p2-c1",
                "Kettle X manual",
                "Refund policy: unused products can be returned for a full refund within 30 days.",
                0.0,
            )
            .with_page(2),
        )
        .with_document(
            "manuals",
            EvidenceItem::document(
                "kettle-p7-c1",
                "Kettle X manual",
                "Warranty: the heating element carries a warranty length of two years.",
                0.0,
            )
            .with_page(7),
        )
        .with_collection("empty")
        .with_web(EvidenceItem::web(
            "https://doc.rust-lang.org/book/ch04-01-what-is-ownership.html",
            "What is Ownership?",
            "Each value in Rust has an owner. There can only be one owner at a time.",
            0.0,
        ))
}

fn orchestrator(provider: Arc<ScriptedProvider>) -> QueryOrchestrator {
    QueryOrchestrator::new(
        provider,
        "mock",
        RetrievalRouter::single(Arc::new(corpus())),
    )
}

// ── E2E: Simple web question ─────────────────────────────────────────────

#[tokio::test]
async fn e2e_web_question_answered_with_citation() {
    let provider = Arc::new(ScriptedProvider::new(&[
        "Every value in Rust has exactly one owner [Source 1].",
    ]));

    let query = Query::new("rust ownership owner", Target::Web, QueryOptions::default()).unwrap();
    let result = orchestrator(provider.clone())
        .answer(&query, None)
        .await
        .expect("run should succeed");

    assert_eq!(provider.calls(), 1);
    assert_eq!(result.metadata.strategy, Strategy::SimpleWeb);
    assert_eq!(result.sources.len(), 1);
    assert_eq!(result.sources[0].evidence.title, "What is Ownership?");
    assert!(provider.prompt(0).contains("[Source 1] (web"));
}

// ── E2E: Collection decomposition ────────────────────────────────────────

#[tokio::test]
async fn e2e_collection_decomposition_merges_sources() {
    let provider = Arc::new(ScriptedProvider::new(&[
        "1. refund policy\n2. warranty length",
        "Refunds within 30 days [Source 1]; two-year warranty [Source 2].",
    ]));
    let conversation = ConversationContext::new(vec![
        Message::user("Which kettle do you mean?"),
        Message::assistant("Kettle X."),
    ]);

    let query = Query::new(
        "Compare the refund policy and warranty length of Kettle X",
        Target::collection("manuals"),
        QueryOptions::decomposed().with_max_results(3),
    )
    .unwrap();

    let result = orchestrator(provider.clone())
        .answer(&query, Some(&conversation))
        .await
        .expect("run should succeed");

    assert_eq!(result.sub_queries, vec!["refund policy", "warranty length"]);
    assert_eq!(result.metadata.strategy, Strategy::CollectionDecomposition);
    assert_eq!(result.metadata.sub_queries_dispatched, 2);
    assert!(result.metadata.context.included <= 6);
    assert_eq!(result.sources.len(), 2);
    assert!(result.sources.iter().all(|s| s.evidence.kind == ragloom_core::retrieval::SourceKind::Document));

    let synthesis = provider.prompt(1);
    assert!(synthesis.contains("page 2"));
    assert!(synthesis.contains("page 7"));
    assert!(synthesis.contains("Previous conversation"));
    assert!(!provider.prompt(0).contains("Previous conversation"));
}

// ── E2E: Empty collection ────────────────────────────────────────────────

#[tokio::test]
async fn e2e_empty_collection_answers_without_fabricating() {
    let provider = Arc::new(ScriptedProvider::new(&[
        "I don't have enough information to answer this question.",
    ]));

    let query = Query::new(
        "What is the warranty?",
        Target::collection("empty"),
        QueryOptions::default(),
    )
    .unwrap();
    let result = orchestrator(provider.clone()).answer(&query, None).await.unwrap();

    assert!(result.sources.is_empty());
    assert!(provider.prompt(0).contains("[NO EVIDENCE"));
    assert!(provider.prompt(0).contains("I don't have enough information to answer this question"));
}

#[tokio::test]
async fn e2e_missing_collection_is_insufficient_context() {
    let provider = Arc::new(ScriptedProvider::new(&[]));

    let query = Query::new("anything", Target::collection("nope"), QueryOptions::default()).unwrap();
    let err = orchestrator(provider.clone()).answer(&query, None).await.unwrap_err();

    assert!(matches!(err, RunError::AllRetrievalFailed { attempted: 1 }));
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn e2e_unparseable_decomposition_degrades() {
    let provider = Arc::new(ScriptedProvider::new(&[
        "Sure! Here you go:",
        "Values have one owner [Source 1].",
    ]));

    let query = Query::new("rust ownership", Target::Web, QueryOptions::decomposed()).unwrap();
    let result = orchestrator(provider).answer(&query, None).await.unwrap();

    assert!(result.sub_queries.is_empty());
    assert_eq!(result.metadata.degradations[0].kind, DegradationKind::DecompositionEmpty);
    assert!(result.metadata.trace.contains(&RunState::SkipDecompose));
}

// ── E2E: Streaming ───────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_run_stream_event_order() {
    let provider = Arc::new(ScriptedProvider::new(&[
        "- rust ownership rules",
        "One owner at a time [Source 1].",
    ]));

    let query = Query::new("rust ownership", Target::Web, QueryOptions::decomposed()).unwrap();
    let mut rx = orchestrator(provider).run_stream(query, None);

    let mut types = Vec::new();
    while let Some(event) = rx.recv().await {
        types.push(event.event_type());
        if let StreamEvent::Done { result } = &event {
            assert_eq!(result.sub_queries, vec!["rust ownership rules"]);
        }
    }

    assert_eq!(types.first(), Some(&"started"));
    let sub_queries = types.iter().position(|t| *t == "sub_queries").unwrap();
    let chunk = types.iter().position(|t| *t == "chunk").unwrap();
    assert!(sub_queries < chunk);
    assert_eq!(types.last(), Some(&"done"));
}

// ── E2E: Gateway API (router only, no server) ──────────────────────────

#[tokio::test]
async fn e2e_gateway_query_endpoint() {
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    let provider = Arc::new(ScriptedProvider::new(&["One owner [Source 1]."]));
    let mut providers = ProviderRouter::new("e2e_mock", "mock");
    providers.register("e2e_mock", provider.clone());
    let registry = ModelRegistry::from_router(&providers);

    let state = Arc::new(ragloom_gateway::GatewayState::new(
        orchestrator(provider),
        providers,
        registry,
    ));
    let app = ragloom_gateway::build_router(state, &[]);

    let req = Request::builder()
        .method("POST")
        .uri("/v1/query")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({ "query": "rust ownership owner" }).to_string(),
        ))
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), 200);

    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["answer"], "One owner [Source 1].");
    assert_eq!(json["metadata"]["provider"], "e2e_mock");
}

// ── E2E: Configuration System ───────────────────────────────────────────

#[tokio::test]
async fn e2e_config_defaults_and_validation() {
    let config = ragloom_config::AppConfig::default();
    config.validate().expect("defaults should validate");

    // Settings derive from config.
    let settings = OrchestratorSettings::from_config(&config);
    assert_eq!(settings.max_context_chars, config.orchestrator.max_context_chars);
    assert_eq!(settings.synthesis_timeout, config.timeouts.synthesis());

    // Verify TOML roundtrip.
    let toml_str = config.to_toml().expect("Config should serialize");
    let reparsed: ragloom_config::AppConfig =
        toml::from_str(&toml_str).expect("Config should parse back");

    assert_eq!(reparsed.default_model, config.default_model);
    assert_eq!(reparsed.gateway.port, config.gateway.port);
}
