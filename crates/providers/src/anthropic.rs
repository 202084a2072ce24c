//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly (not an OpenAI-compatible proxy).
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Streaming via SSE with `content_block_delta` events

use async_trait::async_trait;
use futures::StreamExt;
use ragloom_core::error::ProviderError;
use ragloom_core::message::{Message, Role};
use ragloom_core::provider::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::transport::{LineBuffer, check_status, http_client, sse_data, sse_event};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Models offered when the listing endpoint is unreachable.
const KNOWN_MODELS: &[&str] = &[
    "claude-sonnet-4-20250514",
    "claude-opus-4-20250514",
    "claude-3-5-haiku-20241022",
];

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client: http_client(std::time::Duration::from_secs(300)),
        }
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    ///
    /// A trailing `/v1` is accepted and stripped since request paths add it.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base = base_url.into();
        let base = base.trim_end_matches('/');
        self.base_url = base.strip_suffix("/v1").unwrap_or(base).to_string();
        self
    }

    /// Split system messages off the message list.
    /// Anthropic puts the system prompt in a top-level field, not in messages.
    fn extract_system(messages: &[Message]) -> (Option<String>, Vec<AnthropicMessage>) {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut turns: Vec<AnthropicMessage> = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => system_parts.push(&msg.content),
                Role::User | Role::Assistant => turns.push(AnthropicMessage {
                    role: msg.role.to_string(),
                    content: msg.content.clone(),
                }),
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };

        (system, turns)
    }

    fn request_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let (system, messages) = Self::extract_system(&request.messages);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": request.temperature,
        });

        if stream {
            body["stream"] = serde_json::json!(true);
        }
        if let Some(sys) = system {
            body["system"] = serde_json::json!(sys);
        }
        if !request.stop.is_empty() {
            body["stop_sequences"] = serde_json::json!(request.stop);
        }
        body
    }

    fn post_messages(&self) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
    }

    /// Convert an Anthropic API response to our ProviderResponse.
    fn into_provider_response(resp: AnthropicResponse) -> ProviderResponse {
        let text = resp
            .content
            .iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n");

        ProviderResponse {
            message: Message::assistant(text),
            usage: Some(Usage {
                prompt_tokens: resp.usage.input_tokens,
                completion_tokens: resp.usage.output_tokens,
                total_tokens: resp.usage.input_tokens + resp.usage.output_tokens,
            }),
            model: resp.model,
            metadata: serde_json::Map::new(),
        }
    }
}

#[async_trait]
impl ragloom_core::Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let body = Self::request_body(&request, false);

        debug!(provider = "anthropic", model = %request.model, "Sending completion request");

        let response = self
            .post_messages()
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        let response = check_status(&self.name, response).await?;

        let api_resp: AnthropicResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse Anthropic response: {e}"),
            })?;

        Ok(Self::into_provider_response(api_resp))
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>,
        ProviderError,
    > {
        let body = Self::request_body(&request, true);

        debug!(provider = "anthropic", model = %request.model, "Sending streaming request");

        let response = self
            .post_messages()
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        let response = check_status(&self.name, response).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut lines = LineBuffer::default();
            let mut usage = StreamUsage::default();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                for line in lines.push(&bytes) {
                    if sse_event(&line) == Some("message_stop") {
                        let _ = tx
                            .send(Ok(StreamChunk {
                                content: None,
                                done: true,
                                usage: usage.finish(),
                            }))
                            .await;
                        return;
                    }

                    let Some(data) = sse_data(&line) else {
                        continue;
                    };

                    let event: serde_json::Value = match serde_json::from_str(data) {
                        Ok(v) => v,
                        Err(e) => {
                            trace!(error = %e, data = %data, "Ignoring unparseable Anthropic SSE");
                            continue;
                        }
                    };

                    if let Some(text) = usage.observe(&event) {
                        let chunk = StreamChunk {
                            content: Some(text),
                            done: false,
                            usage: None,
                        };
                        if tx.send(Ok(chunk)).await.is_err() {
                            return;
                        }
                    }
                }
            }

            // Stream ended without message_stop
            let _ = tx
                .send(Ok(StreamChunk {
                    content: None,
                    done: true,
                    usage: usage.finish(),
                }))
                .await;
        });

        Ok(rx)
    }

    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        let response = self
            .client
            .get(format!("{}/v1/models", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .send()
            .await;

        let listed = match response {
            Ok(r) if r.status().is_success() => r
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|body| {
                    body["data"].as_array().map(|arr| {
                        arr.iter()
                            .filter_map(|m| m["id"].as_str().map(String::from))
                            .collect::<Vec<_>>()
                    })
                })
                .unwrap_or_default(),
            _ => Vec::new(),
        };

        if listed.is_empty() {
            return Ok(KNOWN_MODELS.iter().map(|m| m.to_string()).collect());
        }
        Ok(listed)
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let response = self
            .client
            .get(format!("{}/v1/models", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        // 401 = bad key; anything else means the API is reachable
        Ok(response.status().as_u16() != 401)
    }
}

/// Token accounting across one Anthropic stream.
///
/// Input tokens arrive in `message_start`, output tokens in `message_delta`.
#[derive(Debug, Default)]
struct StreamUsage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}

impl StreamUsage {
    /// Record usage from an event and return its text delta, if any.
    fn observe(&mut self, event: &serde_json::Value) -> Option<String> {
        match event["type"].as_str().unwrap_or("") {
            "message_start" => {
                self.input_tokens = event["message"]["usage"]["input_tokens"]
                    .as_u64()
                    .map(|v| v as u32);
                None
            }
            "message_delta" => {
                self.output_tokens = event["usage"]["output_tokens"].as_u64().map(|v| v as u32);
                None
            }
            "content_block_delta" if event["delta"]["type"] == "text_delta" => event["delta"]
                ["text"]
                .as_str()
                .filter(|t| !t.is_empty())
                .map(String::from),
            _ => None,
        }
    }

    fn finish(&self) -> Option<Usage> {
        let output = self.output_tokens?;
        let input = self.input_tokens.unwrap_or(0);
        Some(Usage {
            prompt_tokens: input,
            completion_tokens: output,
            total_tokens: input + output,
        })
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<ResponseContentBlock>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct ResponseContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}
