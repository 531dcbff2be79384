// src/lib.rs

// Import the top-level `agenthive` module.
pub mod agenthive;

// Re-exporting key items for easier external access.
pub use agenthive::client::{self, ChatMessage, LlmClient, Role, TokenUsage};
pub use agenthive::clients;
pub use agenthive::config::{self, EngineConfig};
pub use agenthive::context;
pub use agenthive::engine::{self, ChatEngine, SendOptions, StreamEvent, TurnResponse};
pub use agenthive::error::{self, EngineError};
pub use agenthive::export;
pub use agenthive::gateway::{self, Gateway};
pub use agenthive::hive::Hive;
pub use agenthive::pool::{self, AgentPool, AgentState, AgentStatus, FocusType};
pub use agenthive::protection;
pub use agenthive::roundtable::{self, Roundtable, RoundtableConfig};
pub use agenthive::router::{self, Router};
pub use agenthive::scheduler::{self, JobPayload, JobSchedule, JobSpec, Scheduler, SessionMode};
pub use agenthive::store::{self, SessionStore};
pub use agenthive::tool_protocol::{self, ToolRegistry};
pub use agenthive::tools;

/// Initialise env_logger once, defaulting to `info`.  Safe to call from
/// every test; repeat calls are no-ops.
pub fn init_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}
