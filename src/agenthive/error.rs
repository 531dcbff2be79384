//! Crate-wide error taxonomy.
//!
//! Each subsystem defines its own error enum next to the code that raises it
//! (the same way [`ToolError`](crate::tool_protocol::ToolError) lives in the
//! tool layer); [`EngineError`] is the umbrella the public API surfaces, with
//! `From` conversions from every subsystem error and an HTTP status mapping
//! for transport adapters.

use std::fmt;

use crate::agenthive::client::{LlmError, LlmErrorKind};
use crate::agenthive::context::ContextError;
use crate::agenthive::engine::SessionError;
use crate::agenthive::pool::AgentError;
use crate::agenthive::protection::{RateLimitError, ValidationError};
use crate::agenthive::router::RouterError;
use crate::agenthive::scheduler::SchedulerError;
use crate::agenthive::store::StoreError;
use crate::agenthive::tool_protocol::ToolError;

/// Umbrella error for every fallible engine operation.
#[derive(Debug)]
pub enum EngineError {
    /// Upstream LLM failure (timeout, 4xx/5xx, network, circuit open).
    Llm(LlmError),
    /// Session lifecycle violation (not found, ended, full).
    Session(SessionError),
    /// Scheduler failure (invalid schedule, unknown job).
    Scheduler(SchedulerError),
    /// Agent pool failure (disabled, busy, unknown agent).
    Agent(AgentError),
    /// Pinned messages exceed the context budget.
    Context(ContextError),
    /// Tool registration/dispatch failure that escaped the chat loop.
    Tool(ToolError),
    /// Sliding-window rate limit exceeded.
    RateLimit(RateLimitError),
    /// Input validation failure.
    Validation(ValidationError),
    /// Persistence failure.
    Store(StoreError),
    /// Routing failure.
    Router(RouterError),
    /// Anything that does not fit the categories above.
    Other(String),
}

impl EngineError {
    /// The HTTP status a transport adapter should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::Session(SessionError::NotFound(_)) => 404,
            EngineError::Scheduler(SchedulerError::UnknownJob(_)) => 404,
            EngineError::Agent(AgentError::Unknown(_)) => 404,
            EngineError::Store(StoreError::SessionNotFound(_)) => 404,
            EngineError::Validation(_) => 400,
            EngineError::Scheduler(SchedulerError::InvalidSchedule(_)) => 400,
            EngineError::RateLimit(_) => 429,
            EngineError::Llm(_) => 503,
            _ => 500,
        }
    }

    /// Retry-After seconds, present only for rate-limit errors.
    pub fn retry_after_s(&self) -> Option<u64> {
        match self {
            EngineError::RateLimit(err) => Some(err.retry_after_s),
            _ => None,
        }
    }

    /// Stable machine-readable label for transport error frames.
    pub fn kind_label(&self) -> &'static str {
        match self {
            EngineError::Llm(err) => match err.kind {
                LlmErrorKind::CircuitOpen => "circuit_open",
                _ => "llm_error",
            },
            EngineError::Session(SessionError::NotFound(_)) => "session_not_found",
            EngineError::Session(SessionError::Ended(_)) => "session_ended",
            EngineError::Session(SessionError::Full(_)) => "session_full",
            EngineError::Scheduler(_) => "scheduler_error",
            EngineError::Agent(_) => "agent_error",
            EngineError::Context(_) => "context_error",
            EngineError::Tool(_) => "tool_error",
            EngineError::RateLimit(_) => "rate_limited",
            EngineError::Validation(_) => "validation_error",
            EngineError::Store(_) => "store_error",
            EngineError::Router(_) => "router_error",
            EngineError::Other(_) => "engine_error",
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Llm(e) => write!(f, "{}", e),
            EngineError::Session(e) => write!(f, "{}", e),
            EngineError::Scheduler(e) => write!(f, "{}", e),
            EngineError::Agent(e) => write!(f, "{}", e),
            EngineError::Context(e) => write!(f, "{}", e),
            EngineError::Tool(e) => write!(f, "{}", e),
            EngineError::RateLimit(e) => write!(f, "{}", e),
            EngineError::Validation(e) => write!(f, "{}", e),
            EngineError::Store(e) => write!(f, "{}", e),
            EngineError::Router(e) => write!(f, "{}", e),
            EngineError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<LlmError> for EngineError {
    fn from(e: LlmError) -> Self {
        EngineError::Llm(e)
    }
}

impl From<SessionError> for EngineError {
    fn from(e: SessionError) -> Self {
        EngineError::Session(e)
    }
}

impl From<SchedulerError> for EngineError {
    fn from(e: SchedulerError) -> Self {
        EngineError::Scheduler(e)
    }
}

impl From<AgentError> for EngineError {
    fn from(e: AgentError) -> Self {
        EngineError::Agent(e)
    }
}

impl From<ContextError> for EngineError {
    fn from(e: ContextError) -> Self {
        EngineError::Context(e)
    }
}

impl From<ToolError> for EngineError {
    fn from(e: ToolError) -> Self {
        EngineError::Tool(e)
    }
}

impl From<RateLimitError> for EngineError {
    fn from(e: RateLimitError) -> Self {
        EngineError::RateLimit(e)
    }
}

impl From<ValidationError> for EngineError {
    fn from(e: ValidationError) -> Self {
        EngineError::Validation(e)
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::SessionEnded(id) => EngineError::Session(SessionError::Ended(id)),
            StoreError::SessionNotFound(id) => EngineError::Session(SessionError::NotFound(id)),
            other => EngineError::Store(other),
        }
    }
}

impl From<RouterError> for EngineError {
    fn from(e: RouterError) -> Self {
        EngineError::Router(e)
    }
}
