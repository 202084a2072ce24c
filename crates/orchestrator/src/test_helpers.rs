//! Shared test doubles for orchestrator tests.

use async_trait::async_trait;
use ragloom_core::error::{ProviderError, RetrievalError};
use ragloom_core::message::Message;
use ragloom_core::provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage};
use ragloom_core::retrieval::{EvidenceItem, RetrievalBackend, Target};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// One scripted provider reply.
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    Fail(ProviderError),
    /// Never answers; for timeout tests.
    Hang,
}

impl Reply {
    pub fn text(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

/// A mock provider that returns a sequence of scripted replies.
///
/// Each `complete` or `stream` call takes the next reply and records the
/// request. Panics if more calls are made than replies provided.
pub struct SequentialMockProvider {
    replies: Mutex<Vec<Reply>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl SequentialMockProvider {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn single_text(text: &str) -> Self {
        Self::new(vec![Reply::text(text)])
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Concatenated message contents of call `n`.
    pub fn prompt(&self, n: usize) -> String {
        self.requests()[n]
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn next(&self, request: ProviderRequest) -> Reply {
        let mut requests = self.requests.lock().unwrap();
        let replies = self.replies.lock().unwrap();
        let n = requests.len();
        if n >= replies.len() {
            panic!(
                "SequentialMockProvider: no more replies (call #{}, have {})",
                n,
                replies.len()
            );
        }
        requests.push(request);
        replies[n].clone()
    }
}

#[async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        match self.next(request) {
            Reply::Text(text) => Ok(make_text_response(&text)),
            Reply::Fail(e) => Err(e),
            Reply::Hang => std::future::pending().await,
        }
    }

    /// Streams the reply word by word, usage on the final chunk.
    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> Result<mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError> {
        let text = match self.next(request) {
            Reply::Text(text) => text,
            Reply::Fail(e) => return Err(e),
            Reply::Hang => std::future::pending().await,
        };

        let pieces: Vec<String> = text.split_inclusive(' ').map(String::from).collect();
        let (tx, rx) = mpsc::channel(pieces.len() + 1);
        for piece in pieces {
            let _ = tx
                .send(Ok(StreamChunk {
                    content: Some(piece),
                    done: false,
                    usage: None,
                }))
                .await;
        }
        let _ = tx
            .send(Ok(StreamChunk {
                content: None,
                done: true,
                usage: Some(mock_usage()),
            }))
            .await;
        Ok(rx)
    }
}

pub fn mock_usage() -> Usage {
    Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    }
}

/// Create a simple text response.
pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(mock_usage()),
        model: "mock-model".into(),
        metadata: serde_json::Map::new(),
    }
}

/// What a scripted backend does for one query text.
#[derive(Debug, Clone)]
pub enum Script {
    Items(Vec<EvidenceItem>),
    Fail,
    Hang,
}

/// A retrieval backend scripted per query text.
pub struct ScriptedBackend {
    scripts: HashMap<String, Script>,
    fallback: Script,
    calls: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    /// Unscripted queries return nothing.
    pub fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            fallback: Script::Items(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn on(mut self, query: &str, items: Vec<EvidenceItem>) -> Self {
        self.scripts.insert(query.to_string(), Script::Items(items));
        self
    }

    pub fn fail_on(mut self, query: &str) -> Self {
        self.scripts.insert(query.to_string(), Script::Fail);
        self
    }

    pub fn hang_on(mut self, query: &str) -> Self {
        self.scripts.insert(query.to_string(), Script::Hang);
        self
    }

    pub fn otherwise(mut self, script: Script) -> Self {
        self.fallback = script;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RetrievalBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn search(
        &self,
        query: &str,
        _target: &Target,
        top_k: usize,
    ) -> Result<Vec<EvidenceItem>, RetrievalError> {
        self.calls.lock().unwrap().push(query.to_string());
        let script = self.scripts.get(query).unwrap_or(&self.fallback).clone();
        match script {
            Script::Items(mut items) => {
                items.truncate(top_k);
                Ok(items)
            }
            Script::Fail => Err(RetrievalError::Backend {
                backend: "scripted".into(),
                message: format!("scripted failure for '{query}'"),
            }),
            Script::Hang => std::future::pending().await,
        }
    }
}

/// `n` document chunks for `prefix`, descending scores.
pub fn docs(prefix: &str, n: usize) -> Vec<EvidenceItem> {
    (0..n)
        .map(|i| {
            EvidenceItem::document(
                format!("{prefix}-{i}"),
                format!("{prefix} chunk {i}"),
                format!("Details about {prefix}, part {i}."),
                0.9 - i as f32 * 0.1,
            )
        })
        .collect()
}
