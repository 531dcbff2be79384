//! Engine configuration.
//!
//! One plain struct, constructed manually or from the environment.  No
//! config-file parsing dependencies are introduced.
//!
//! # Example
//!
//! ```rust
//! use agenthive::EngineConfig;
//!
//! // In-memory store, placeholder upstream; good for tests.
//! let config = EngineConfig::default();
//! assert_eq!(config.database_url, ":memory:");
//!
//! // Or read DATABASE_URL / LLM_BASE_URL / LLM_API_KEY / MEMORIES_PATH.
//! let config = EngineConfig::from_env();
//! ```

use std::path::PathBuf;
use std::time::Duration;

/// Global configuration for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Persistent store DSN: a path, a `sqlite:` URL, or `:memory:`.
    pub database_url: String,
    /// Base URL of the OpenAI-compatible upstream.
    pub llm_base_url: String,
    /// Bearer key for the upstream.
    pub llm_api_key: String,
    /// Root directory for JSONL exports, when exports are wanted.
    pub memories_path: Option<PathBuf>,
    /// Default model alias for sessions that do not pick one.
    pub default_model: String,
    /// Per-call upstream timeout.
    pub request_timeout: Duration,
    /// Circuit-breaker reset interval.
    pub breaker_reset: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: ":memory:".to_string(),
            llm_base_url: "https://api.openai.com/v1".to_string(),
            llm_api_key: String::new(),
            memories_path: None,
            default_model: "balanced".to_string(),
            request_timeout: Duration::from_secs(120),
            breaker_reset: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    /// Read the deployment environment: `DATABASE_URL`, `LLM_BASE_URL`,
    /// `LLM_API_KEY`, `MEMORIES_PATH`, `DEFAULT_MODEL`.  Unset variables keep
    /// their defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = url;
        }
        if let Ok(url) = std::env::var("LLM_BASE_URL") {
            config.llm_base_url = url;
        }
        if let Ok(key) = std::env::var("LLM_API_KEY") {
            config.llm_api_key = key;
        }
        if let Ok(path) = std::env::var("MEMORIES_PATH") {
            config.memories_path = Some(PathBuf::from(path));
        }
        if let Ok(model) = std::env::var("DEFAULT_MODEL") {
            config.default_model = model;
        }
        config
    }
}
