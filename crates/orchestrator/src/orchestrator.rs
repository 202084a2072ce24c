//! The query orchestrator: one end-to-end answer-generation run.
//!
//! # Flow
//!
//! 1. Select a [`Strategy`] from the query options
//! 2. Optionally decompose (informed: explore first, then decompose)
//! 3. Fan sub-queries out to the retrieval backend for the target
//! 4. Assemble a bounded, labeled context from the evidence
//! 5. Stream one synthesis call into the sink
//! 6. Validate citations and close the sink with the final result
//!
//! Recoverable problems (a failed sub-query, a failed decomposition) are
//! recorded as degradations. Retrieval failing everywhere and synthesis
//! failing are fatal. A closed sink stops the run at the next stage boundary
//! or the next rejected emit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ragloom_core::error::{RetrievalError, RunError};
use ragloom_core::message::ConversationContext;
use ragloom_core::provider::{Provider, ProviderRequest, Usage};
use ragloom_core::query::{Query, SubQuery};
use ragloom_retrieval::{FanOut, RetrievalRouter};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::citations::check_citations;
use crate::context::{AssembledContext, ContextAssembler, ContextBudget, token};
use crate::decompose::parse_sub_queries;
use crate::prompts::PromptTemplate;
use crate::result::{Degradation, DegradationKind, RunMetadata, SynthesisResult};
use crate::strategy::{RunState, RunTrace, Strategy};
use crate::stream::{BufferedStream, ChannelStream, ResultStream};
use crate::stream_event::StreamEvent;

/// Buffered events between a streaming run and its consumer.
pub const STREAM_CAPACITY: usize = 128;

/// Tunables for every run an orchestrator performs.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub max_context_chars: usize,
    pub min_snippet_chars: usize,
    pub confidence_floor: f32,
    pub max_concurrency: usize,
    pub temperature: f32,
    pub decomposition_max_tokens: u32,
    pub synthesis_max_tokens: u32,
    pub retrieval_timeout: Duration,
    pub decomposition_timeout: Duration,
    /// Bounds the whole synthesis stream, not each chunk.
    pub synthesis_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_context_chars: 12_000,
            min_snippet_chars: 80,
            confidence_floor: 0.2,
            max_concurrency: 4,
            temperature: 0.3,
            decomposition_max_tokens: 500,
            synthesis_max_tokens: 1500,
            retrieval_timeout: Duration::from_secs(15),
            decomposition_timeout: Duration::from_secs(60),
            synthesis_timeout: Duration::from_secs(120),
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &ragloom_config::AppConfig) -> Self {
        let o = &config.orchestrator;
        Self {
            max_context_chars: o.max_context_chars,
            min_snippet_chars: o.min_snippet_chars,
            confidence_floor: o.confidence_floor,
            max_concurrency: o.max_concurrency,
            temperature: config.default_temperature,
            decomposition_max_tokens: o.decomposition_max_tokens,
            synthesis_max_tokens: o.synthesis_max_tokens,
            retrieval_timeout: config.timeouts.retrieval(),
            decomposition_timeout: config.timeouts.decomposition(),
            synthesis_timeout: config.timeouts.synthesis(),
        }
    }
}

/// Bookkeeping for one run.
struct RunLog {
    trace: RunTrace,
    degradations: Vec<Degradation>,
    usage: Option<Usage>,
}

impl RunLog {
    fn new() -> Self {
        Self {
            trace: RunTrace::new(),
            degradations: Vec::new(),
            usage: None,
        }
    }

    fn degrade(&mut self, kind: DegradationKind, message: impl Into<String>) {
        let degradation = Degradation::new(kind, message);
        warn!(kind = ?degradation.kind, "{}", degradation.message);
        self.degradations.push(degradation);
    }

    fn add_usage(&mut self, usage: Option<Usage>) {
        if let Some(usage) = usage {
            self.usage = Some(match &self.usage {
                Some(previous) => previous.combine(&usage),
                None => usage,
            });
        }
    }
}

/// Output of the informed strategy's exploratory pass.
struct Exploration {
    answer: String,
    context: AssembledContext,
    usage: Option<Usage>,
}

/// Drives query runs against one generation backend and one retrieval router.
///
/// Cheap to clone; holds no per-run state.
#[derive(Clone)]
pub struct QueryOrchestrator {
    provider: Arc<dyn Provider>,
    model: String,
    retrieval: RetrievalRouter,
    settings: OrchestratorSettings,
}

impl QueryOrchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        retrieval: RetrievalRouter,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            retrieval,
            settings: OrchestratorSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Run `query` to completion, writing incremental output to `sink`.
    ///
    /// On success the sink has been closed with the returned result. On a
    /// fatal error the sink has received `fail`. On [`RunError::Cancelled`]
    /// the sink has not been touched since it reported closed.
    pub async fn run(
        &self,
        query: &Query,
        conversation: Option<&ConversationContext>,
        sink: &mut dyn ResultStream,
    ) -> Result<SynthesisResult, RunError> {
        let started = Instant::now();
        let strategy = Strategy::select(query);
        let mut log = RunLog::new();

        info!(
            query_id = %query.id(),
            strategy = %strategy,
            target = %query.target(),
            provider = self.provider.name(),
            model = %self.model,
            "Orchestrator: run started"
        );

        if sink.open(query, strategy).await.is_err() {
            info!(query_id = %query.id(), "Orchestrator: consumer gone before start");
            return Err(RunError::Cancelled);
        }

        match self
            .execute(query, strategy, conversation, sink, &mut log, started)
            .await
        {
            Ok(result) => {
                if sink.close(&result).await.is_err() {
                    debug!(query_id = %query.id(), "Orchestrator: consumer gone before final result");
                }
                info!(
                    query_id = %query.id(),
                    sources = result.sources.len(),
                    degradations = result.metadata.degradations.len(),
                    elapsed_ms = result.metadata.elapsed_ms,
                    "Orchestrator: run complete"
                );
                Ok(result)
            }
            Err(RunError::Cancelled) => {
                info!(
                    query_id = %query.id(),
                    state = %log.trace.current(),
                    "Orchestrator: consumer disconnected, run cancelled"
                );
                Err(RunError::Cancelled)
            }
            Err(e) => {
                let state = log.trace.current();
                log.trace.advance(RunState::Failed);
                warn!(
                    query_id = %query.id(),
                    state = %state,
                    code = e.code(),
                    error = %e,
                    "Orchestrator: run failed"
                );
                sink.fail(&e).await;
                Err(e)
            }
        }
    }

    /// Run `query` into a [`BufferedStream`] and return the result.
    pub async fn answer(
        &self,
        query: &Query,
        conversation: Option<&ConversationContext>,
    ) -> Result<SynthesisResult, RunError> {
        let mut sink = BufferedStream::new();
        self.run(query, conversation, &mut sink).await
    }

    /// Spawn a run and return the receiving end of its event stream.
    ///
    /// Dropping the receiver cancels the run at its next checkpoint.
    pub fn run_stream(
        &self,
        query: Query,
        conversation: Option<ConversationContext>,
    ) -> mpsc::Receiver<StreamEvent> {
        let (mut sink, rx) = ChannelStream::channel(STREAM_CAPACITY);
        let orchestrator = self.clone();

        tokio::spawn(async move {
            let _ = orchestrator
                .run(&query, conversation.as_ref(), &mut sink)
                .await;
        });

        rx
    }

    // ── Stages ────────────────────────────────────────────────────────────

    async fn execute(
        &self,
        query: &Query,
        strategy: Strategy,
        conversation: Option<&ConversationContext>,
        sink: &mut dyn ResultStream,
        log: &mut RunLog,
        started: Instant,
    ) -> Result<SynthesisResult, RunError> {
        self.enter(RunState::StrategySelected, sink, log).await?;

        // ── Decomposition ──
        let decomposed = if strategy.decomposes() {
            self.enter(RunState::Decomposing, sink, log).await?;
            self.decompose(query, strategy, sink, log).await?
        } else {
            None
        };

        let (sub_queries, sub_query_texts) = match decomposed {
            Some(sub_queries) => {
                let texts = sub_queries.iter().map(|sq| sq.text.clone()).collect();
                (sub_queries, texts)
            }
            None => {
                self.enter(RunState::SkipDecompose, sink, log).await?;
                (vec![query.sub_query(0, query.text())], Vec::new())
            }
        };

        // ── Retrieval ──
        self.enter(RunState::Retrieving, sink, log).await?;
        let top_k = query.options().max_results;
        let report = match self.fan_out(query) {
            Ok(fan_out) => fan_out.run(&sub_queries, query.target(), top_k).await,
            Err(e) => {
                warn!(target = %query.target(), error = %e, "Orchestrator: no retrieval backend");
                return Err(RunError::AllRetrievalFailed {
                    attempted: sub_queries.len(),
                });
            }
        };

        if report.all_failed() {
            return Err(RunError::AllRetrievalFailed {
                attempted: report.dispatched(),
            });
        }
        for (failed, error) in report.failures() {
            log.degrade(
                DegradationKind::SubQueryFailed,
                format!("Sub-query {} ('{}') failed: {error}", failed.index + 1, failed.query),
            );
        }
        if !sub_query_texts.is_empty() && report.empty_count() > 0 {
            log.degrade(
                DegradationKind::SubQueriesEmpty,
                format!(
                    "{} of {} sub-queries returned no results",
                    report.empty_count(),
                    report.dispatched()
                ),
            );
        }

        // ── Context ──
        ensure_open(&*sink)?;
        let context = self
            .assembler(top_k * sub_queries.len())
            .assemble(report.evidence())?;
        self.enter(RunState::ContextAssembled, sink, log).await?;
        info!(
            strategy = %strategy,
            sub_queries = sub_queries.len(),
            evidence = context.stats.considered,
            included = context.stats.included,
            dropped = context.stats.dropped,
            chars = context.stats.rendered_chars,
            low_confidence = context.low_confidence,
            "Orchestrator: context assembled"
        );

        // ── Synthesis ──
        self.enter(RunState::Synthesizing, sink, log).await?;
        let answer = self
            .synthesize(query, &context, &sub_query_texts, conversation, sink, log)
            .await?;

        let citations = check_citations(&answer, context.items.len());
        if !citations.unresolved.is_empty() {
            warn!(unresolved = ?citations.unresolved, "Orchestrator: answer cites unknown sources");
        }
        let sources = citations
            .cited
            .iter()
            .filter_map(|&label| context.item(label).cloned())
            .collect();

        self.enter(RunState::Done, sink, log).await?;

        Ok(SynthesisResult {
            query_id: query.id(),
            answer,
            sub_queries: sub_query_texts,
            sources,
            metadata: RunMetadata {
                strategy,
                provider: self.provider.name().to_string(),
                model: self.model.clone(),
                target: query.target().clone(),
                sub_queries_dispatched: report.dispatched(),
                sub_queries_failed: report.failed_count(),
                sub_queries_empty: report.empty_count(),
                degradations: std::mem::take(&mut log.degradations),
                low_confidence: context.low_confidence,
                context: context.stats,
                trace: log.trace.states().to_vec(),
                unresolved_citations: citations.unresolved,
                usage: log.usage.clone(),
                elapsed_ms: started.elapsed().as_millis() as u64,
            },
        })
    }

    /// Produce sub-queries, or `None` to continue on the non-decomposed path.
    /// Only fails with [`RunError::Cancelled`].
    async fn decompose(
        &self,
        query: &Query,
        strategy: Strategy,
        sink: &mut dyn ResultStream,
        log: &mut RunLog,
    ) -> Result<Option<Vec<SubQuery>>, RunError> {
        let web = query.target().is_web();

        let exploration = if strategy.is_informed() {
            ensure_open(&*sink)?;
            match self.explore(query).await {
                Ok(exploration) => {
                    log.add_usage(exploration.usage.clone());
                    Some(exploration)
                }
                Err(reason) => {
                    log.degrade(
                        DegradationKind::ExploratoryFailed,
                        format!("Exploratory pass failed ({reason}); decomposing without it"),
                    );
                    None
                }
            }
        } else {
            None
        };

        let template = match &exploration {
            Some(exploration) => PromptTemplate::InformedDecompose {
                query: query.text(),
                preliminary_answer: &exploration.answer,
                findings: &exploration.context.items,
                web,
            },
            None => PromptTemplate::Decompose {
                query: query.text(),
                web,
            },
        };

        ensure_open(&*sink)?;
        let response = self
            .generate(
                &template,
                self.settings.decomposition_max_tokens,
                self.settings.decomposition_timeout,
            )
            .await;
        let text = match response {
            Ok((text, usage)) => {
                log.add_usage(usage);
                text
            }
            Err(reason) => {
                log.degrade(
                    DegradationKind::DecompositionFailed,
                    format!("Decomposition failed ({reason}); answering the original query directly"),
                );
                return Ok(None);
            }
        };

        let parsed = parse_sub_queries(&text);
        if parsed.is_empty() {
            log.degrade(
                DegradationKind::DecompositionEmpty,
                "Decomposition produced no sub-queries; answering the original query directly",
            );
            return Ok(None);
        }

        info!(count = parsed.len(), informed = exploration.is_some(), "Orchestrator: query decomposed");
        sink.sub_queries(&parsed)
            .await
            .map_err(|_| RunError::Cancelled)?;

        Ok(Some(
            parsed
                .into_iter()
                .enumerate()
                .map(|(i, text)| query.sub_query(i, text))
                .collect(),
        ))
    }

    /// Retrieve for the original query and draft a preliminary answer.
    /// Its evidence only informs decomposition and is not reused.
    async fn explore(&self, query: &Query) -> Result<Exploration, String> {
        let exploratory = vec![query.sub_query(0, query.text())];
        let top_k = query.options().max_results;
        let report = self
            .fan_out(query)
            .map_err(|e| e.to_string())?
            .run(&exploratory, query.target(), top_k)
            .await;

        if let Some((_, error)) = report.failures().next() {
            return Err(format!("retrieval failed: {error}"));
        }

        let context = self
            .assembler(top_k)
            .assemble(report.evidence())
            .map_err(|e| e.to_string())?;
        if context.is_empty() {
            return Err("no evidence found".into());
        }

        let template = PromptTemplate::Exploratory {
            query: query.text(),
            context: &context,
        };
        let (answer, usage) = self
            .generate(
                &template,
                self.settings.decomposition_max_tokens,
                self.settings.decomposition_timeout,
            )
            .await?;
        if answer.trim().is_empty() {
            return Err("empty preliminary answer".into());
        }

        debug!(chars = answer.len(), sources = context.items.len(), "Orchestrator: exploratory answer drafted");
        Ok(Exploration {
            answer,
            context,
            usage,
        })
    }

    async fn synthesize(
        &self,
        query: &Query,
        context: &AssembledContext,
        sub_queries: &[String],
        conversation: Option<&ConversationContext>,
        sink: &mut dyn ResultStream,
        log: &mut RunLog,
    ) -> Result<String, RunError> {
        let messages = PromptTemplate::Synthesize {
            query: query.text(),
            context,
            sub_queries,
            conversation,
            web: query.target().is_web(),
        }
        .render()
        .map_err(|e| RunError::SynthesisFailure(e.to_string()))?;

        debug!(
            messages = messages.len(),
            estimated_tokens = token::estimate_messages_tokens(&messages),
            "Orchestrator: synthesis request"
        );

        let request = ProviderRequest::new(&self.model, messages)
            .with_temperature(self.settings.temperature)
            .with_max_tokens(self.settings.synthesis_max_tokens)
            .streaming();

        let timeout = self.settings.synthesis_timeout;
        match tokio::time::timeout(timeout, self.stream_answer(request, sink, log)).await {
            Ok(result) => result,
            Err(_) => Err(RunError::SynthesisFailure(format!(
                "timed out after {}s",
                timeout.as_secs()
            ))),
        }
    }

    async fn stream_answer(
        &self,
        request: ProviderRequest,
        sink: &mut dyn ResultStream,
        log: &mut RunLog,
    ) -> Result<String, RunError> {
        let mut rx = self
            .provider
            .stream(request)
            .await
            .map_err(|e| RunError::SynthesisFailure(e.to_string()))?;

        let mut answer = String::new();
        while let Some(chunk) = rx.recv().await {
            let chunk = chunk.map_err(|e| RunError::SynthesisFailure(e.to_string()))?;

            if let Some(text) = chunk.content.filter(|t| !t.is_empty()) {
                sink.emit(&text).await.map_err(|_| RunError::Cancelled)?;
                answer.push_str(&text);
            }
            log.add_usage(chunk.usage);
            if chunk.done {
                break;
            }
        }

        if answer.trim().is_empty() {
            return Err(RunError::SynthesisFailure(
                "model returned an empty answer".into(),
            ));
        }
        Ok(answer)
    }

    // ── Helpers ───────────────────────────────────────────────────────────

    async fn enter(
        &self,
        state: RunState,
        sink: &mut dyn ResultStream,
        log: &mut RunLog,
    ) -> Result<(), RunError> {
        ensure_open(&*sink)?;
        log.trace.advance(state);
        debug!(state = %state, "Orchestrator: state transition");
        sink.stage(state).await.map_err(|_| RunError::Cancelled)
    }

    async fn generate(
        &self,
        template: &PromptTemplate<'_>,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<(String, Option<Usage>), String> {
        let messages = template.render().map_err(|e| e.to_string())?;
        debug!(
            template = template.name(),
            estimated_tokens = token::estimate_messages_tokens(&messages),
            "Orchestrator: generation request"
        );

        let request = ProviderRequest::new(&self.model, messages)
            .with_temperature(self.settings.temperature)
            .with_max_tokens(max_tokens);

        match tokio::time::timeout(timeout, self.provider.complete(request)).await {
            Ok(Ok(response)) => Ok((response.message.content, response.usage)),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("timed out after {}s", timeout.as_secs())),
        }
    }

    fn fan_out(&self, query: &Query) -> Result<FanOut, RetrievalError> {
        let backend = self
            .retrieval
            .select(query.target(), query.options().deep_scrape)?;
        Ok(FanOut::new(backend, self.settings.retrieval_timeout)
            .with_max_concurrency(self.settings.max_concurrency))
    }

    fn assembler(&self, max_items: usize) -> ContextAssembler {
        ContextAssembler::new(ContextBudget {
            max_chars: self.settings.max_context_chars,
            max_items,
            min_snippet_chars: self.settings.min_snippet_chars,
            confidence_floor: self.settings.confidence_floor,
        })
    }
}

fn ensure_open(sink: &dyn ResultStream) -> Result<(), RunError> {
    if sink.is_closed() {
        Err(RunError::Cancelled)
    } else {
        Ok(())
    }
}
