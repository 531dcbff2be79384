//! OpenAI-compatible Chat Completions client.
//!
//! Works against any endpoint speaking the OpenAI wire format (OpenAI itself,
//! Anthropic's compatibility surface, vLLM, LM Studio, Ollama, llama.cpp).
//! Swapping providers only requires a different base URL.
//!
//! # Key features
//!
//! - **`complete`**: one request/response round-trip returning a
//!   [`ProviderResponse`] with native tool calls and token usage.
//! - **`stream`**: SSE decoding into [`CompletionChunk`] values, with
//!   fragmented tool-call deltas reassembled onto the final chunk.
//! - **Connection reuse**: all instances share the pooled client from
//!   [`common`](crate::clients::common).

use async_trait::async_trait;
use futures_util::stream::StreamExt;

use crate::agenthive::client::{
    ChunkStream, CompletionChunk, LlmClient, LlmError, LlmErrorKind, ProviderRequest,
    ProviderResponse, ToolCallRequest,
};
use crate::agenthive::clients::common::{
    from_wire_tool_calls, get_shared_http_client, to_wire_message, to_wire_tool, WireChatRequest,
    WireChatResponse, WireStreamChunk,
};

/// Wire client for OpenAI-compatible endpoints.
pub struct OpenAiCompatClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiCompatClient {
    /// Create a client for the given base URL (e.g. `https://api.openai.com/v1`)
    /// and bearer key.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: get_shared_http_client().clone(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_body(&self, request: &ProviderRequest, stream: bool) -> WireChatRequest {
        WireChatRequest {
            model: request.model.clone(),
            messages: request.messages.iter().map(to_wire_message).collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            tools: if request.tools.is_empty() {
                None
            } else {
                Some(request.tools.iter().map(to_wire_tool).collect())
            },
            stream,
        }
    }

    async fn post(&self, request: &ProviderRequest, stream: bool) -> Result<reqwest::Response, LlmError> {
        let response = self
            .http
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&self.build_body(request, stream))
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if log::log_enabled!(log::Level::Error) {
                log::error!(
                    "OpenAiCompatClient: upstream returned {} for model {}: {}",
                    status,
                    request.model,
                    body
                );
            }
            return Err(LlmError::from_status(status.as_u16(), body));
        }
        Ok(response)
    }
}

/// Map reqwest failures onto the engine's error kinds.
fn classify_transport_error(err: reqwest::Error) -> LlmError {
    if err.is_timeout() {
        LlmError::new(LlmErrorKind::Timeout, err.to_string())
    } else {
        LlmError::new(LlmErrorKind::Network, err.to_string())
    }
}

/// Accumulates fragmented tool-call deltas across SSE chunks.
#[derive(Default)]
struct ToolCallAssembler {
    // index-ordered (id, name, arguments) fragments
    parts: Vec<(String, String, String)>,
}

impl ToolCallAssembler {
    fn absorb(&mut self, deltas: Vec<crate::agenthive::clients::common::WireDeltaToolCall>) {
        for delta in deltas {
            while self.parts.len() <= delta.index {
                self.parts.push((String::new(), String::new(), String::new()));
            }
            let slot = &mut self.parts[delta.index];
            if let Some(id) = delta.id {
                slot.0 = id;
            }
            if let Some(function) = delta.function {
                if let Some(name) = function.name {
                    slot.1.push_str(&name);
                }
                if let Some(arguments) = function.arguments {
                    slot.2.push_str(&arguments);
                }
            }
        }
    }

    fn finish(self) -> Vec<ToolCallRequest> {
        self.parts
            .into_iter()
            .filter(|(_, name, _)| !name.is_empty())
            .map(|(id, name, arguments)| ToolCallRequest {
                id,
                name,
                arguments,
            })
            .collect()
    }

    fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn complete(&self, request: &ProviderRequest) -> Result<ProviderResponse, LlmError> {
        let response = self.post(request, false).await?;
        let body: WireChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::new(LlmErrorKind::Network, format!("invalid body: {}", e)))?;

        let usage = body.usage.unwrap_or_default();
        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::new(LlmErrorKind::Network, "response carried no choices"))?;

        Ok(ProviderResponse {
            content: choice.message.content.unwrap_or_default(),
            thinking: choice.message.reasoning_content,
            tool_calls: from_wire_tool_calls(choice.message.tool_calls.unwrap_or_default()),
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            finish_reason: choice.finish_reason,
        })
    }

    async fn stream(&self, request: &ProviderRequest) -> Result<ChunkStream, LlmError> {
        let response = self.post(request, true).await?;
        let mut bytes = response.bytes_stream();

        // Decode the SSE byte stream into CompletionChunks on a channel-backed
        // stream so the decode state machine stays out of the caller's task.
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<CompletionChunk, LlmError>>(32);
        tokio::spawn(async move {
            let mut buffer = String::new();
            let mut assembler = ToolCallAssembler::default();

            'outer: while let Some(piece) = bytes.next().await {
                let piece = match piece {
                    Ok(piece) => piece,
                    Err(err) => {
                        let _ = tx.send(Err(classify_transport_error(err))).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&piece));

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);

                    let Some(payload) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let payload = payload.trim();
                    if payload.is_empty() {
                        continue;
                    }
                    if payload == "[DONE]" {
                        break 'outer;
                    }

                    let parsed: WireStreamChunk = match serde_json::from_str(payload) {
                        Ok(parsed) => parsed,
                        Err(err) => {
                            if log::log_enabled!(log::Level::Warn) {
                                log::warn!("OpenAiCompatClient: skipping undecodable SSE chunk: {}", err);
                            }
                            continue;
                        }
                    };
                    let Some(choice) = parsed.choices.into_iter().next() else {
                        continue;
                    };

                    if let Some(calls) = choice.delta.tool_calls {
                        assembler.absorb(calls);
                    }

                    let mut chunk = CompletionChunk {
                        content: choice.delta.content.unwrap_or_default(),
                        thinking: choice.delta.reasoning_content.unwrap_or_default(),
                        tool_calls: Vec::new(),
                        finish_reason: choice.finish_reason,
                    };

                    if chunk.finish_reason.is_some() && !assembler.is_empty() {
                        chunk.tool_calls = std::mem::take(&mut assembler).finish();
                    }

                    let done = chunk.finish_reason.is_some();
                    if tx.send(Ok(chunk)).await.is_err() {
                        // Receiver dropped: the turn was cancelled downstream.
                        return;
                    }
                    if done {
                        break 'outer;
                    }
                }
            }
        });

        Ok(Box::pin(tokio_stream_from(rx)))
    }
}

/// Adapt an mpsc receiver into a `futures_util` stream.
fn tokio_stream_from<T: Send + 'static>(
    mut rx: tokio::sync::mpsc::Receiver<T>,
) -> impl futures_util::Stream<Item = T> + Send {
    futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx))
}
