//! Chat engine: one conversational turn, end to end.
//!
//! [`ChatEngine`] orchestrates the full life of a turn:
//!
//! ```text
//! send_message
//!   ├─ Protection: validate → sanitize → rate limits → capacity → write lock
//!   ├─ persist user message
//!   ├─ ContextManager: token-budgeted window over the history
//!   ├─ tool loop (≤ MAX_TOOL_ITERATIONS)
//!   │    ├─ Gateway.complete / Gateway.stream
//!   │    ├─ persist assistant(tool_calls) + tool results
//!   │    └─ repeat until the model stops requesting tools
//!   └─ persist final assistant message, update counters and title
//! ```
//!
//! The streaming variant walks the same state machine but forwards typed
//! [`StreamEvent`]s over a bounded channel as the model produces them; the
//! bounded capacity is what gives slow transports natural back-pressure.  If
//! the receiver goes away mid-stream the turn is cancelled cooperatively and
//! whatever assistant text accumulated is persisted with finish reason
//! `cancelled`.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::agenthive::client::{
    estimate_message_tokens, estimate_tokens, ChatMessage, TokenUsage, ToolCallRequest,
};
use crate::agenthive::context::build_window;
use crate::agenthive::error::EngineError;
use crate::agenthive::gateway::{catalogue_entry, compute_cost, CompletionRequest, Gateway};
use crate::agenthive::protection::SessionProtection;
use crate::agenthive::store::{
    NewMessage, NewSession, SessionRecord, SessionStore,
};
use crate::agenthive::tool_protocol::{
    SubqueryCapability, ToolInvocation, ToolRegistry, ToolResult,
};
use futures_util::StreamExt;

/// Upper bound on model → tool → model round-trips within one turn.
pub const MAX_TOOL_ITERATIONS: usize = 10;

/// Tokens held back from the context budget for the model's own output when
/// the session does not specify `max_output_tokens`.
pub const DEFAULT_RESERVE_TOKENS: usize = 1024;

/// Context budget assumed for models the catalogue does not know.
pub const DEFAULT_CONTEXT_TOKENS: usize = 8192;

/// Capacity of the stream-event channel; bounds how far the engine can run
/// ahead of a slow transport.
pub const STREAM_CHANNEL_CAPACITY: usize = 32;

/// Session lifecycle violations.
#[derive(Debug, Clone)]
pub enum SessionError {
    /// No session with that id.
    NotFound(String),
    /// The session has been ended and is immutable for new messages.
    Ended(String),
    /// The session has reached its message cap.
    Full(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::NotFound(id) => write!(f, "session not found: {}", id),
            SessionError::Ended(id) => write!(f, "session has ended: {}", id),
            SessionError::Full(id) => write!(f, "session is full: {}", id),
        }
    }
}

impl std::error::Error for SessionError {}

/// Per-call options for [`ChatEngine::send_message`].
#[derive(Debug, Clone)]
pub struct SendOptions {
    /// Model alias override; defaults to the session's model, then the
    /// gateway default.
    pub model: Option<String>,
    /// Ask the provider for reasoning content where supported.
    pub enable_thinking: bool,
    /// Offer the registry's tools to the model.
    pub enable_tools: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            model: None,
            enable_thinking: false,
            enable_tools: true,
        }
    }
}

/// The result of one completed turn.
#[derive(Debug, Clone)]
pub struct TurnResponse {
    /// Final assistant content.
    pub content: String,
    /// Accumulated reasoning text, when the provider produced any.
    pub thinking: Option<String>,
    /// Every tool call executed during the turn, in order.
    pub tool_calls: Vec<ToolCallRequest>,
    /// Token usage accumulated across all LLM calls in the turn.
    pub usage: TokenUsage,
    /// Cost accumulated across all LLM calls in the turn, USD.
    pub cost: f64,
    /// Wall-clock latency accumulated across all LLM calls, milliseconds.
    pub latency_ms: u64,
    /// `"stop"`, `"tool_loop_exhausted"`, `"length"`, ...
    pub finish_reason: String,
}

/// Typed frames forwarded to the transport during a streaming turn.
///
/// Serialises with a `type` tag matching the socket protocol
/// (`stream_start`, `content`, `thinking`, `tool_call`, `tool_result`,
/// `stream_end`, `error`, `message`).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    StreamStart {
        session_id: String,
    },
    Content {
        delta: String,
    },
    Thinking {
        delta: String,
    },
    ToolCall {
        id: String,
        name: String,
    },
    ToolResult {
        id: String,
        name: String,
        success: bool,
    },
    StreamEnd {
        content: String,
        finish_reason: String,
        total_tokens: usize,
        cost: f64,
        latency_ms: u64,
    },
    Error {
        kind: String,
        message: String,
    },
    /// A complete non-streamed message, for transports that relay both shapes.
    Message {
        role: String,
        content: String,
    },
}

struct TurnAccumulator {
    content: String,
    thinking: String,
    tool_calls: Vec<ToolCallRequest>,
    usage: TokenUsage,
    cost: f64,
    latency_ms: u64,
}

impl TurnAccumulator {
    fn new() -> Self {
        Self {
            content: String::new(),
            thinking: String::new(),
            tool_calls: Vec::new(),
            usage: TokenUsage::default(),
            cost: 0.0,
            latency_ms: 0,
        }
    }

    fn thinking_opt(&self) -> Option<String> {
        if self.thinking.is_empty() {
            None
        } else {
            Some(self.thinking.clone())
        }
    }
}

/// Orchestrates conversational turns against one [`SessionStore`],
/// [`Gateway`], and [`ToolRegistry`].
pub struct ChatEngine {
    store: Arc<SessionStore>,
    gateway: Arc<Gateway>,
    tools: Arc<ToolRegistry>,
    protection: Arc<SessionProtection>,
    /// Back-reference to the owning `Arc`, for spawned stream tasks and the
    /// dispatch-time tool capability.
    self_ref: std::sync::Weak<ChatEngine>,
}

impl ChatEngine {
    pub fn new(
        store: Arc<SessionStore>,
        gateway: Arc<Gateway>,
        tools: Arc<ToolRegistry>,
        protection: Arc<SessionProtection>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            store,
            gateway,
            tools,
            protection,
            self_ref: self_ref.clone(),
        })
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn protection(&self) -> &Arc<SessionProtection> {
        &self.protection
    }

    /// Create a session.
    pub fn create_session(&self, new: NewSession) -> Result<SessionRecord, EngineError> {
        Ok(self.store.create_session(new)?)
    }

    /// Load an existing session for continued use.
    pub fn resume_session(&self, session_id: &str) -> Result<SessionRecord, EngineError> {
        let session = self.active_session(session_id)?;
        Ok(session)
    }

    /// Mark a session ended; it becomes immutable for new messages.
    pub fn end_session(&self, session_id: &str) -> Result<(), EngineError> {
        if !self.store.end_session(session_id)? {
            return Err(SessionError::NotFound(session_id.to_string()).into());
        }
        Ok(())
    }

    fn active_session(&self, session_id: &str) -> Result<SessionRecord, EngineError> {
        let session = self
            .store
            .get_session(session_id)?
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        if session.status == crate::agenthive::store::SessionStatus::Ended {
            return Err(SessionError::Ended(session_id.to_string()).into());
        }
        Ok(session)
    }

    /// Run protection over an inbound user message; returns the sanitized
    /// content ready for persistence.
    fn admit_user_message(
        &self,
        session: &SessionRecord,
        content: &str,
    ) -> Result<String, EngineError> {
        self.protection.validate_message("user", content)?;
        let sanitized = self.protection.sanitize_content(content);
        self.protection.check_session_rate(&session.id)?;
        if let Some(agent_id) = &session.agent_id {
            self.protection.check_agent_rate(agent_id)?;
        }
        self.protection
            .check_session_capacity(session.message_count)
            .map_err(|_| SessionError::Full(session.id.clone()))?;
        Ok(sanitized)
    }

    /// Build the context window for a turn: the session's system prompt plus
    /// the most recent `context_window` history messages, budgeted to the
    /// model's input allowance.
    fn build_context(
        &self,
        session: &SessionRecord,
        model_alias: &str,
    ) -> Result<Vec<ChatMessage>, EngineError> {
        let mut candidates = Vec::new();
        if let Some(system_prompt) = &session.system_prompt {
            if !system_prompt.is_empty() {
                candidates.push(ChatMessage::system(system_prompt));
            }
        }
        let history = self
            .store
            .recent_messages(&session.id, session.context_window)?;
        candidates.extend(history.iter().map(|m| m.to_chat_message()));

        let max_tokens = catalogue_entry(model_alias)
            .map(|spec| spec.context_window)
            .unwrap_or(DEFAULT_CONTEXT_TOKENS);
        let reserve = session
            .max_output_tokens
            .map(|t| t as usize)
            .unwrap_or(DEFAULT_RESERVE_TOKENS);

        Ok(build_window(&candidates, max_tokens, reserve)?)
    }

    fn model_alias(&self, session: &SessionRecord, options: &SendOptions) -> String {
        options
            .model
            .clone()
            .or_else(|| session.model.clone())
            .unwrap_or_else(|| self.gateway.default_model().to_string())
    }

    fn completion_request(
        &self,
        session: &SessionRecord,
        options: &SendOptions,
        model_alias: &str,
        messages: Vec<ChatMessage>,
    ) -> CompletionRequest {
        CompletionRequest {
            model: Some(model_alias.to_string()),
            messages,
            temperature: session.temperature,
            max_tokens: session.max_output_tokens,
            tools: if options.enable_tools {
                self.tools.descriptors_for_llm()
            } else {
                Vec::new()
            },
            enable_thinking: options.enable_thinking,
        }
    }

    fn persist_user_message(
        &self,
        session: &SessionRecord,
        content: &str,
    ) -> Result<(), EngineError> {
        self.store.append_message(NewMessage {
            session_id: session.id.clone(),
            role: "user".into(),
            content: content.to_string(),
            tokens_in: estimate_tokens(content) as u64,
            ..Default::default()
        })?;
        Ok(())
    }

    /// Execute one tool call and persist the resulting `tool` message.
    async fn run_tool_call(
        &self,
        session: &SessionRecord,
        call: &ToolCallRequest,
    ) -> Result<ToolResult, EngineError> {
        let invocation = ToolInvocation {
            tool_call_id: call.id.clone(),
            session_id: Some(session.id.clone()),
            engine: self.self_ref.upgrade().map(|engine| {
                Arc::new(EngineCapability { engine }) as Arc<dyn SubqueryCapability>
            }),
        };
        let result = match self
            .tools
            .execute(&call.id, &call.name, &call.arguments, &invocation)
            .await
        {
            Ok(result) => result,
            // Unknown tool / malformed arguments: report back to the model
            // as a failed result instead of aborting the turn.
            Err(err) => ToolResult {
                tool_call_id: call.id.clone(),
                name: call.name.clone(),
                content: err.to_string(),
                success: false,
                duration_ms: 0,
            },
        };

        let serialized = serde_json::to_string(&result)
            .unwrap_or_else(|_| format!("{{\"success\":false,\"name\":\"{}\"}}", result.name));
        self.store.append_message(NewMessage {
            session_id: session.id.clone(),
            role: "tool".into(),
            content: serialized,
            tool_call_id: Some(result.tool_call_id.clone()),
            latency_ms: result.duration_ms,
            ..Default::default()
        })?;
        Ok(result)
    }

    /// Persist an intermediate assistant message carrying tool calls.  Token
    /// and cost accounting stays off these rows; the final assistant message
    /// carries the turn's accumulated usage, so session counters equal the
    /// turn's charges.
    fn persist_assistant_with_tool_calls(
        &self,
        session: &SessionRecord,
        model_alias: &str,
        content: &str,
        thinking: Option<&str>,
        tool_calls: &[ToolCallRequest],
    ) -> Result<(), EngineError> {
        self.store.append_message(NewMessage {
            session_id: session.id.clone(),
            role: "assistant".into(),
            content: content.to_string(),
            thinking: thinking.map(str::to_string),
            tool_calls: tool_calls.to_vec(),
            model: Some(model_alias.to_string()),
            ..Default::default()
        })?;
        Ok(())
    }

    fn finish_turn(
        &self,
        session: &SessionRecord,
        first_turn: bool,
        user_content: &str,
        model_alias: &str,
        acc: &TurnAccumulator,
        finish_reason: &str,
        final_usage: &TokenUsage,
        final_cost: f64,
        final_latency_ms: u64,
    ) -> Result<(), EngineError> {
        self.store.append_message(NewMessage {
            session_id: session.id.clone(),
            role: "assistant".into(),
            content: acc.content.clone(),
            thinking: acc.thinking_opt(),
            model: Some(model_alias.to_string()),
            tokens_in: final_usage.input_tokens as u64,
            tokens_out: final_usage.output_tokens as u64,
            cost: final_cost,
            latency_ms: final_latency_ms,
            metadata: Some(serde_json::json!({ "finish_reason": finish_reason })),
            ..Default::default()
        })?;

        if first_turn && session.title.is_none() {
            self.store.update_session(
                &session.id,
                crate::agenthive::store::SessionUpdate {
                    title: Some(compact_title(user_content)),
                    ..Default::default()
                },
            )?;
        }
        Ok(())
    }

    /// Send one user message through the full turn contract and wait for the
    /// final response.
    pub async fn send_message(
        &self,
        session_id: &str,
        content: &str,
        options: SendOptions,
    ) -> Result<TurnResponse, EngineError> {
        let session = self.active_session(session_id)?;
        let sanitized = self.admit_user_message(&session, content)?;
        let first_turn = session.message_count == 0;
        let model_alias = self.model_alias(&session, &options);

        let lock = self.protection.session_lock(session_id);
        let _guard = lock.lock().await;

        self.persist_user_message(&session, &sanitized)?;

        let mut working = self.build_context(&session, &model_alias)?;
        let mut acc = TurnAccumulator::new();
        let mut finish_reason = String::from("stop");

        for iteration in 1..=MAX_TOOL_ITERATIONS {
            let request =
                self.completion_request(&session, &options, &model_alias, working.clone());
            let response = self.gateway.complete(&request).await?;

            let call_usage = TokenUsage {
                input_tokens: response.prompt_tokens,
                output_tokens: response.completion_tokens,
                total_tokens: response.prompt_tokens + response.completion_tokens,
            };
            acc.usage.absorb(&call_usage);
            acc.cost += response.cost;
            acc.latency_ms += response.latency_ms;
            if let Some(thinking) = &response.thinking {
                acc.thinking.push_str(thinking);
            }
            acc.content = response.content.clone();

            if response.tool_calls.is_empty() {
                finish_reason = response.finish_reason.clone();
                break;
            }

            self.persist_assistant_with_tool_calls(
                &session,
                &model_alias,
                &response.content,
                response.thinking.as_deref(),
                &response.tool_calls,
            )?;
            working.push(
                ChatMessage::assistant(&response.content)
                    .with_tool_calls(response.tool_calls.clone()),
            );

            for call in &response.tool_calls {
                acc.tool_calls.push(call.clone());
                let result = self.run_tool_call(&session, call).await?;
                let serialized = serde_json::to_string(&result)
                    .unwrap_or_else(|_| "{\"success\":false}".to_string());
                working.push(ChatMessage::tool(&result.tool_call_id, &serialized));
            }

            if iteration == MAX_TOOL_ITERATIONS {
                finish_reason = "tool_loop_exhausted".to_string();
            }
        }

        let total_usage = acc.usage.clone();
        self.finish_turn(
            &session,
            first_turn,
            &sanitized,
            &model_alias,
            &acc,
            &finish_reason,
            &total_usage,
            acc.cost,
            acc.latency_ms,
        )?;

        Ok(TurnResponse {
            content: acc.content.clone(),
            thinking: acc.thinking_opt(),
            tool_calls: acc.tool_calls.clone(),
            usage: acc.usage.clone(),
            cost: acc.cost,
            latency_ms: acc.latency_ms,
            finish_reason,
        })
    }

    /// Streaming variant of [`send_message`](Self::send_message).
    ///
    /// Validation and admission run synchronously; the returned receiver then
    /// yields typed [`StreamEvent`]s as the turn progresses.  Dropping the
    /// receiver cancels the turn cooperatively.
    pub async fn send_message_stream(
        &self,
        session_id: &str,
        content: &str,
        options: SendOptions,
    ) -> Result<mpsc::Receiver<StreamEvent>, EngineError> {
        let session = self.active_session(session_id)?;
        let sanitized = self.admit_user_message(&session, content)?;
        let engine = self
            .self_ref
            .upgrade()
            .ok_or_else(|| EngineError::Other("engine is shutting down".into()))?;

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            engine.drive_stream(session, sanitized, options, tx).await;
        });
        Ok(rx)
    }

    async fn drive_stream(
        self: Arc<Self>,
        session: SessionRecord,
        user_content: String,
        options: SendOptions,
        tx: mpsc::Sender<StreamEvent>,
    ) {
        let first_turn = session.message_count == 0;
        let model_alias = self.model_alias(&session, &options);

        let lock = self.protection.session_lock(&session.id);
        let _guard = lock.lock().await;

        // History must already contain the user message if the stream dies
        // half way through.
        if let Err(err) = self.persist_user_message(&session, &user_content) {
            let _ = tx
                .send(StreamEvent::Error {
                    kind: err.kind_label().to_string(),
                    message: err.to_string(),
                })
                .await;
            return;
        }

        let _ = tx
            .send(StreamEvent::StreamStart {
                session_id: session.id.clone(),
            })
            .await;

        let mut working = match self.build_context(&session, &model_alias) {
            Ok(working) => working,
            Err(err) => {
                let _ = tx
                    .send(StreamEvent::Error {
                        kind: err.kind_label().to_string(),
                        message: err.to_string(),
                    })
                    .await;
                return;
            }
        };

        let mut acc = TurnAccumulator::new();
        let mut finish_reason = String::from("stop");
        let mut cancelled = false;

        'turn: for iteration in 1..=MAX_TOOL_ITERATIONS {
            let request =
                self.completion_request(&session, &options, &model_alias, working.clone());
            let mut gateway_stream = match self.gateway.stream(&request).await {
                Ok(stream) => stream,
                Err(err) => {
                    let engine_err: EngineError = err.into();
                    let _ = tx
                        .send(StreamEvent::Error {
                            kind: engine_err.kind_label().to_string(),
                            message: engine_err.to_string(),
                        })
                        .await;
                    return;
                }
            };

            let prompt_tokens: usize = working.iter().map(estimate_message_tokens).sum();
            let mut iter_content = String::new();
            let mut iter_thinking = String::new();
            let mut tool_calls: Vec<ToolCallRequest> = Vec::new();

            while let Some(chunk) = gateway_stream.chunks.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        let engine_err: EngineError = err.into();
                        let _ = tx
                            .send(StreamEvent::Error {
                                kind: engine_err.kind_label().to_string(),
                                message: engine_err.to_string(),
                            })
                            .await;
                        return;
                    }
                };

                if !chunk.content.is_empty() {
                    iter_content.push_str(&chunk.content);
                    if tx
                        .send(StreamEvent::Content {
                            delta: chunk.content.clone(),
                        })
                        .await
                        .is_err()
                    {
                        cancelled = true;
                        break;
                    }
                }
                if !chunk.thinking.is_empty() {
                    iter_thinking.push_str(&chunk.thinking);
                    if tx
                        .send(StreamEvent::Thinking {
                            delta: chunk.thinking.clone(),
                        })
                        .await
                        .is_err()
                    {
                        cancelled = true;
                        break;
                    }
                }
                if let Some(reason) = &chunk.finish_reason {
                    finish_reason = reason.clone();
                    tool_calls = chunk.tool_calls.clone();
                    break;
                }
            }

            let completion_tokens = estimate_tokens(&iter_content);
            let call_usage = TokenUsage {
                input_tokens: prompt_tokens,
                output_tokens: completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            };
            acc.usage.absorb(&call_usage);
            acc.cost += compute_cost(&gateway_stream.model, prompt_tokens, completion_tokens);
            acc.latency_ms += gateway_stream.started.elapsed().as_millis() as u64;
            acc.thinking.push_str(&iter_thinking);
            acc.content = iter_content.clone();

            if cancelled {
                finish_reason = "cancelled".to_string();
                break 'turn;
            }

            if tool_calls.is_empty() {
                break 'turn;
            }

            if self
                .persist_assistant_with_tool_calls(
                    &session,
                    &model_alias,
                    &iter_content,
                    if iter_thinking.is_empty() {
                        None
                    } else {
                        Some(iter_thinking.as_str())
                    },
                    &tool_calls,
                )
                .is_err()
            {
                break 'turn;
            }
            working.push(
                ChatMessage::assistant(&iter_content).with_tool_calls(tool_calls.clone()),
            );

            for call in &tool_calls {
                acc.tool_calls.push(call.clone());
                let _ = tx
                    .send(StreamEvent::ToolCall {
                        id: call.id.clone(),
                        name: call.name.clone(),
                    })
                    .await;
                match self.run_tool_call(&session, call).await {
                    Ok(result) => {
                        let _ = tx
                            .send(StreamEvent::ToolResult {
                                id: result.tool_call_id.clone(),
                                name: result.name.clone(),
                                success: result.success,
                            })
                            .await;
                        let serialized = serde_json::to_string(&result)
                            .unwrap_or_else(|_| "{\"success\":false}".to_string());
                        working.push(ChatMessage::tool(&result.tool_call_id, &serialized));
                    }
                    Err(err) => {
                        let _ = tx
                            .send(StreamEvent::Error {
                                kind: err.kind_label().to_string(),
                                message: err.to_string(),
                            })
                            .await;
                        return;
                    }
                }
            }

            if iteration == MAX_TOOL_ITERATIONS {
                finish_reason = "tool_loop_exhausted".to_string();
                break 'turn;
            }
        }

        if self
            .finish_turn(
                &session,
                first_turn,
                &user_content,
                &model_alias,
                &acc,
                &finish_reason,
                &acc.usage.clone(),
                acc.cost,
                acc.latency_ms,
            )
            .is_err()
        {
            return;
        }

        let _ = tx
            .send(StreamEvent::StreamEnd {
                content: acc.content.clone(),
                finish_reason,
                total_tokens: acc.usage.total_tokens,
                cost: acc.cost,
                latency_ms: acc.latency_ms,
            })
            .await;
    }
}

/// Dispatch-time capability handed to tools; holds the engine only for the
/// duration of the call.
struct EngineCapability {
    engine: Arc<ChatEngine>,
}

#[async_trait::async_trait]
impl SubqueryCapability for EngineCapability {
    async fn subquery(&self, session_id: &str, prompt: &str) -> Result<String, String> {
        // Sub-queries run as bare completions in the session's configuration;
        // they do not take the session write lock (the invoking turn holds
        // it) and are not persisted.
        let session = self
            .engine
            .store
            .get_session(session_id)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("session not found: {}", session_id))?;
        let model_alias = session
            .model
            .clone()
            .unwrap_or_else(|| self.engine.gateway.default_model().to_string());

        let mut messages = Vec::new();
        if let Some(system_prompt) = &session.system_prompt {
            messages.push(ChatMessage::system(system_prompt));
        }
        messages.push(ChatMessage::user(prompt));

        let response = self
            .engine
            .gateway
            .complete(&CompletionRequest {
                model: Some(model_alias),
                messages,
                temperature: session.temperature,
                max_tokens: session.max_output_tokens,
                tools: Vec::new(),
                enable_thinking: false,
            })
            .await
            .map_err(|e| e.to_string())?;
        Ok(response.content)
    }
}

/// Derive a session title from the first user message: whitespace collapsed,
/// capped at 80 characters with an ellipsis when truncated.
pub fn compact_title(content: &str) -> String {
    let compacted: String = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if compacted.chars().count() <= 80 {
        compacted
    } else {
        let truncated: String = compacted.chars().take(80).collect();
        format!("{}…", truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn titles_compact_whitespace_and_truncate() {
        assert_eq!(compact_title("hello   world\n\tagain"), "hello world again");
        let long = "word ".repeat(40);
        let title = compact_title(&long);
        assert_eq!(title.chars().count(), 81); // 80 + ellipsis
        assert!(title.ends_with('…'));
    }

    #[test]
    fn stream_events_serialize_with_type_tags() {
        let event = StreamEvent::Content {
            delta: "hi".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "content");
        assert_eq!(json["delta"], "hi");

        let event = StreamEvent::StreamEnd {
            content: "done".into(),
            finish_reason: "stop".into(),
            total_tokens: 10,
            cost: 0.0,
            latency_ms: 5,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "stream_end");
    }
}
