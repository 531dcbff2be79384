//! Shared primitives for provider-agnostic LLM transport.
//!
//! The engine talks to upstream model providers through the [`LlmClient`]
//! trait and the lightweight data types defined in this module.  The trait
//! abstracts over concrete wire implementations while the supporting structs
//! describe chat messages, streaming chunks, tool declarations, and token
//! accounting.  Conversation bookkeeping lives elsewhere; see
//! [`crate::engine::ChatEngine`].
//!
//! # Basic request/response
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use agenthive::client::{ChatMessage, LlmClient, ProviderRequest, Role};
//! use agenthive::clients::openai_compat::OpenAiCompatClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let key = std::env::var("LLM_API_KEY")?;
//!     let client = OpenAiCompatClient::new("https://api.openai.com/v1", &key);
//!
//!     let request = ProviderRequest::new(
//!         "gpt-4.1-mini",
//!         vec![ChatMessage::user("Who are you?")],
//!     );
//!     let response = client.complete(&request).await?;
//!     println!("Assistant: {}", response.content);
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use futures_util::stream::Stream;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

/// The possible roles of a chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// A system authored message that primes or constrains assistant behaviour.
    System,
    /// A user authored message (or a scheduler-injected prompt).
    User,
    /// An assistant authored message (model responses).
    Assistant,
    /// A tool-result message correlating with a prior assistant [`ToolCallRequest`].
    ///
    /// Serialises as `{"role": "tool", "tool_call_id": "<call_id>", "content": "..."}`
    /// in the OpenAI-compatible wire format.
    Tool {
        /// The provider-assigned id of the call this result answers.
        call_id: String,
    },
}

impl Role {
    /// The wire/storage label for this role (`"system"`, `"user"`, `"assistant"`, `"tool"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool { .. } => "tool",
        }
    }
}

/// A single tool call requested by the LLM in a native function-calling response.
///
/// Providers assign an opaque [`id`](ToolCallRequest::id) to each call so that
/// the tool result can be correlated back in a follow-up `Role::Tool` message.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ToolCallRequest {
    /// Provider-assigned call id, e.g. `"call_abc123"`.
    pub id: String,
    /// Tool name matching one of the [`ToolSpec`]s sent with the request.
    pub name: String,
    /// JSON-encoded arguments exactly as the model produced them.
    pub arguments: String,
}

/// Provider-agnostic tool schema passed to the LLM along with a chat request.
///
/// Serialised as an OpenAI-compatible `tools` array entry before transmission.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    /// Tool name as it will appear in the API `tools` array.
    pub name: String,
    /// Human-readable description surfaced to the LLM to aid tool selection.
    pub description: String,
    /// JSON Schema object describing the accepted parameters.
    pub parameters_schema: serde_json::Value,
}

/// How many tokens were spent on prompt vs. completion.
#[derive(Clone, Debug, Default)]
pub struct TokenUsage {
    /// Number of prompt/input tokens billed by the provider.
    pub input_tokens: usize,
    /// Number of generated/output tokens billed by the provider.
    pub output_tokens: usize,
    /// Convenience total equal to `input_tokens + output_tokens`.
    pub total_tokens: usize,
}

impl TokenUsage {
    /// Accumulate another usage sample into this one.
    pub fn absorb(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// A generic chat message exchanged with an LLM.
///
/// The `tool_calls` field is populated on assistant messages when the provider
/// returns native function-calling results; it is empty for all other kinds.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    /// The role associated with the message.
    pub role: Role,
    /// The message body.  Stored as `Arc<str>` so that histories can be
    /// cheaply cloned by the context manager and downstream components.
    pub content: Arc<str>,
    /// Native tool calls requested by the assistant.
    pub tool_calls: Vec<ToolCallRequest>,
}

impl ChatMessage {
    /// Build a message with the given role and content and no tool calls.
    pub fn new(role: Role, content: impl AsRef<str>) -> Self {
        Self {
            role,
            content: Arc::from(content.as_ref()),
            tool_calls: Vec::new(),
        }
    }

    /// Shorthand for a `Role::System` message.
    pub fn system(content: impl AsRef<str>) -> Self {
        Self::new(Role::System, content)
    }

    /// Shorthand for a `Role::User` message.
    pub fn user(content: impl AsRef<str>) -> Self {
        Self::new(Role::User, content)
    }

    /// Shorthand for a `Role::Assistant` message.
    pub fn assistant(content: impl AsRef<str>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Shorthand for a `Role::Tool` result message.
    pub fn tool(call_id: impl Into<String>, content: impl AsRef<str>) -> Self {
        Self::new(
            Role::Tool {
                call_id: call_id.into(),
            },
            content,
        )
    }

    /// Attach native tool calls (builder pattern).
    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCallRequest>) -> Self {
        self.tool_calls = tool_calls;
        self
    }
}

/// Estimates the number of tokens in a string.
/// Uses an approximate formula: one token per 4 characters.
pub fn estimate_tokens(text: &str) -> usize {
    (text.len() / 4).max(1)
}

/// Estimates the number of tokens in a [`ChatMessage`], including a fixed
/// allowance for the role annotation.
pub fn estimate_message_tokens(message: &ChatMessage) -> usize {
    let role_token_count = 1;
    role_token_count + estimate_tokens(&message.content)
}

/// Classification of upstream LLM failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// The request did not complete within the deadline.
    Timeout,
    /// The provider rejected the request (4xx).
    Upstream4xx,
    /// The provider failed to serve the request (5xx).
    Upstream5xx,
    /// The circuit breaker is open; upstream was not invoked.
    CircuitOpen,
    /// Connection-level failure before an HTTP status was obtained.
    Network,
}

impl LlmErrorKind {
    /// Stable label used in logs and transport error frames.
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmErrorKind::Timeout => "timeout",
            LlmErrorKind::Upstream4xx => "upstream_4xx",
            LlmErrorKind::Upstream5xx => "upstream_5xx",
            LlmErrorKind::CircuitOpen => "circuit_open",
            LlmErrorKind::Network => "network",
        }
    }
}

/// Error raised by the LLM transport or the gateway wrapped around it.
#[derive(Debug, Clone)]
pub struct LlmError {
    /// Failure classification.
    pub kind: LlmErrorKind,
    /// Upstream HTTP status, when one was received.
    pub status: Option<u16>,
    /// Human-readable detail from the transport or provider body.
    pub detail: String,
}

impl LlmError {
    /// Build an error of the given kind with no HTTP status.
    pub fn new(kind: LlmErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            detail: detail.into(),
        }
    }

    /// Build an error from an upstream HTTP status code.
    pub fn from_status(status: u16, detail: impl Into<String>) -> Self {
        let kind = if status >= 500 {
            LlmErrorKind::Upstream5xx
        } else {
            LlmErrorKind::Upstream4xx
        };
        Self {
            kind,
            status: Some(status),
            detail: detail.into(),
        }
    }

    /// True for authentication and argument-shape rejections that must never
    /// be retried against a fallback model.
    pub fn is_permanent_rejection(&self) -> bool {
        matches!(self.status, Some(400) | Some(401) | Some(403) | Some(422))
    }
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "llm {} ({}): {}", self.kind.as_str(), status, self.detail),
            None => write!(f, "llm {}: {}", self.kind.as_str(), self.detail),
        }
    }
}

impl std::error::Error for LlmError {}

/// A raw completion returned by an [`LlmClient`], before the gateway attaches
/// pricing and latency.
#[derive(Debug, Clone, Default)]
pub struct ProviderResponse {
    /// Assistant content (may be empty when the model only requested tools).
    pub content: String,
    /// Optional reasoning text when the provider surfaces it separately.
    pub thinking: Option<String>,
    /// Native tool calls requested by the model.
    pub tool_calls: Vec<ToolCallRequest>,
    /// Prompt tokens billed by the provider.
    pub prompt_tokens: usize,
    /// Completion tokens billed by the provider.
    pub completion_tokens: usize,
    /// Provider finish reason (`"stop"`, `"tool_calls"`, `"length"`, ...).
    pub finish_reason: Option<String>,
}

/// A chunk of content in a streaming response.  Each chunk carries the
/// incremental deltas; tool calls assembled from fragmented deltas are
/// attached to the final chunk together with the finish reason.
#[derive(Clone, Debug, Default)]
pub struct CompletionChunk {
    /// The incremental content delta in this chunk.  May be empty.
    pub content: String,
    /// The incremental reasoning delta, for providers that stream it.
    pub thinking: String,
    /// Fully assembled tool calls; non-empty only on the final chunk of a
    /// response that ended in `finish_reason == "tool_calls"`.
    pub tool_calls: Vec<ToolCallRequest>,
    /// Set only on the final chunk.
    pub finish_reason: Option<String>,
}

/// Type alias for a stream of completion chunks compatible with `Send` executors.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<CompletionChunk, LlmError>> + Send>>;

/// Fully resolved request handed to an [`LlmClient`].
///
/// The `model` field carries the upstream-native identifier; alias resolution
/// happens in [`crate::gateway::Gateway`] before the request reaches the client.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    /// Upstream-native model identifier.
    pub model: String,
    /// Full message list including any system priming messages.
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature, when the caller overrides the provider default.
    pub temperature: Option<f32>,
    /// Output token ceiling, when the caller overrides the provider default.
    pub max_tokens: Option<u32>,
    /// Native tool declarations forwarded to the provider's function-calling API.
    pub tools: Vec<ToolSpec>,
    /// Ask the provider to surface reasoning content where supported.
    pub enable_thinking: bool,
}

impl ProviderRequest {
    /// Build a minimal request for the given model and message list.
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
            tools: Vec::new(),
            enable_thinking: false,
        }
    }
}

/// Trait defining the wire interface to an upstream LLM service.
///
/// Implementations **must** be thread-safe (`Send + Sync`) so they can be
/// shared between concurrent engine tasks.  The engine's tests substitute
/// mock implementations; production deployments use
/// [`OpenAiCompatClient`](crate::clients::openai_compat::OpenAiCompatClient).
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a full request/response style chat completion.
    async fn complete(&self, request: &ProviderRequest) -> Result<ProviderResponse, LlmError>;

    /// Request a streaming response from the provider.
    ///
    /// The returned stream yields [`CompletionChunk`]s that mirror the
    /// incremental tokens supplied by the upstream service and terminates
    /// after the chunk carrying `finish_reason`.  Streams are finite and not
    /// restartable.
    async fn stream(&self, request: &ProviderRequest) -> Result<ChunkStream, LlmError>;
}
