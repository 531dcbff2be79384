//! LLM Gateway — the single choke point for upstream model calls.
//!
//! Every completion or streaming request made by the engine flows through
//! [`Gateway`], which layers three behaviours on top of the raw
//! [`LlmClient`](crate::client::LlmClient) transport:
//!
//! - **Model alias resolution** against a static catalogue, loaded once and
//!   readable without locking.  Unknown aliases pass through verbatim so that
//!   deployments can address upstream models the catalogue has never heard of.
//! - **Circuit breaking**: five consecutive upstream failures open the
//!   breaker; while open, calls fail fast with
//!   [`LlmErrorKind::CircuitOpen`](crate::client::LlmErrorKind::CircuitOpen)
//!   without touching the network.  After the reset interval the breaker
//!   half-opens and the next call probes upstream.
//! - **Fallback chains**: a per-alias list of alternate models tried in order
//!   when the upstream answer is an error that is neither a circuit-open nor
//!   an authentication/argument-shape rejection.
//!
//! The gateway also attaches pricing (from the catalogue) and wall-clock
//! latency to every response, and exposes the token estimator used by the
//! context manager.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lazy_static::lazy_static;

use crate::agenthive::client::{
    estimate_tokens, ChunkStream, LlmClient, LlmError, LlmErrorKind, ProviderRequest,
    ProviderResponse, ToolCallRequest,
};

/// Consecutive failures required to open the circuit breaker.
pub const BREAKER_THRESHOLD: u32 = 5;

/// One entry of the model catalogue.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    /// Alias the engine exposes, e.g. `"fast"`.
    pub alias: &'static str,
    /// Upstream-native identifier the alias rewrites to.
    pub upstream_id: &'static str,
    /// Context window, in tokens.
    pub context_window: usize,
    /// Price per 1 000 prompt tokens, USD.
    pub input_cost_per_1k: f64,
    /// Price per 1 000 completion tokens, USD.
    pub output_cost_per_1k: f64,
}

lazy_static! {
    /// Static model catalogue.  Loaded once at first use; reads take no lock.
    static ref MODEL_CATALOGUE: HashMap<&'static str, ModelSpec> = {
        let specs = [
            ModelSpec { alias: "fast", upstream_id: "gpt-4.1-nano", context_window: 128_000, input_cost_per_1k: 0.000_1, output_cost_per_1k: 0.000_4 },
            ModelSpec { alias: "balanced", upstream_id: "gpt-4.1-mini", context_window: 128_000, input_cost_per_1k: 0.000_4, output_cost_per_1k: 0.001_6 },
            ModelSpec { alias: "deep", upstream_id: "gpt-4.1", context_window: 128_000, input_cost_per_1k: 0.002, output_cost_per_1k: 0.008 },
            ModelSpec { alias: "claude-fast", upstream_id: "claude-haiku-3-5-haiku-latest", context_window: 200_000, input_cost_per_1k: 0.000_8, output_cost_per_1k: 0.004 },
            ModelSpec { alias: "claude-deep", upstream_id: "claude-sonnet-4-0", context_window: 200_000, input_cost_per_1k: 0.003, output_cost_per_1k: 0.015 },
        ];
        specs.into_iter().map(|s| (s.alias, s)).collect()
    };
}

/// Rewrite a model alias to its upstream-native identifier.
/// Unknown aliases pass through verbatim.
pub fn resolve_model(alias: &str) -> &str {
    MODEL_CATALOGUE
        .get(alias)
        .map(|spec| spec.upstream_id)
        .unwrap_or(alias)
}

/// Look up the catalogue entry for an alias, if any.
pub fn catalogue_entry(alias: &str) -> Option<&'static ModelSpec> {
    MODEL_CATALOGUE.get(alias)
}

/// Price a call from the catalogue.  Unknown aliases cost 0.0.
pub fn compute_cost(alias: &str, prompt_tokens: usize, completion_tokens: usize) -> f64 {
    match MODEL_CATALOGUE.get(alias) {
        Some(spec) => {
            (prompt_tokens as f64 / 1000.0) * spec.input_cost_per_1k
                + (completion_tokens as f64 / 1000.0) * spec.output_cost_per_1k
        }
        None => 0.0,
    }
}

/// Token estimate for one message on behalf of the context manager.
/// Falls back to `max(len/4, 1)` — upstream counters are not consulted here.
pub fn count_tokens(content: &str, _model_alias: &str) -> usize {
    estimate_tokens(content)
}

// ---------------------------------------------------------------------------
// Circuit breaker
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct BreakerState {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Closed / open / half-open breaker over consecutive upstream failures.
///
/// Callers `check()` before dialling upstream and report the outcome with
/// `on_success()` / `on_failure()`.  While open, `check()` fails fast; once
/// the reset interval has elapsed the next `check()` passes (half-open) and
/// the following outcome decides whether the breaker closes or re-opens.
pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    reset_interval: Duration,
}

impl CircuitBreaker {
    /// Create a breaker with the given reset interval.
    pub fn new(reset_interval: Duration) -> Self {
        Self {
            state: Mutex::new(BreakerState {
                consecutive_failures: 0,
                opened_at: None,
            }),
            reset_interval,
        }
    }

    /// Fail fast when the breaker is open and the reset interval has not yet
    /// elapsed.  Passing while open (half-open probe) does not close the
    /// breaker; only a reported success does.
    pub fn check(&self) -> Result<(), LlmError> {
        let state = self.state.lock().expect("breaker lock poisoned");
        if let Some(opened_at) = state.opened_at {
            if opened_at.elapsed() < self.reset_interval {
                return Err(LlmError::new(
                    LlmErrorKind::CircuitOpen,
                    format!(
                        "circuit open after {} consecutive failures",
                        state.consecutive_failures
                    ),
                ));
            }
            // Reset interval elapsed: allow one half-open probe through.
        }
        Ok(())
    }

    /// Record a successful upstream call; closes the breaker.
    pub fn on_success(&self) {
        let mut state = self.state.lock().expect("breaker lock poisoned");
        state.consecutive_failures = 0;
        state.opened_at = None;
    }

    /// Record a failed upstream call; opens the breaker at the threshold and
    /// re-opens it on a failed half-open probe.
    pub fn on_failure(&self) {
        let mut state = self.state.lock().expect("breaker lock poisoned");
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        if state.consecutive_failures >= BREAKER_THRESHOLD || state.opened_at.is_some() {
            state.opened_at = Some(Instant::now());
        }
    }

    /// True while calls would fail fast.
    pub fn is_open(&self) -> bool {
        self.check().is_err()
    }

    /// Current consecutive-failure count (diagnostics).
    pub fn failure_count(&self) -> u32 {
        self.state
            .lock()
            .expect("breaker lock poisoned")
            .consecutive_failures
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// A completion request in engine terms (aliases, not upstream ids).
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Model alias; `None` selects the gateway default.
    pub model: Option<String>,
    /// Full message list, system priming included.
    pub messages: Vec<crate::agenthive::client::ChatMessage>,
    /// Sampling temperature override.
    pub temperature: Option<f32>,
    /// Output-token ceiling override.
    pub max_tokens: Option<u32>,
    /// Tool declarations for native function calling.
    pub tools: Vec<crate::agenthive::client::ToolSpec>,
    /// Ask for reasoning content where the provider supports it.
    pub enable_thinking: bool,
}

impl CompletionRequest {
    /// Build a plain request over the given messages.
    pub fn new(messages: Vec<crate::agenthive::client::ChatMessage>) -> Self {
        Self {
            model: None,
            messages,
            temperature: None,
            max_tokens: None,
            tools: Vec::new(),
            enable_thinking: false,
        }
    }
}

/// A priced, timed completion response.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// Assistant content.
    pub content: String,
    /// Optional reasoning text.
    pub thinking: Option<String>,
    /// Native tool calls requested by the model.
    pub tool_calls: Vec<ToolCallRequest>,
    /// The model alias this response was produced under (after fallback).
    pub model: String,
    /// Prompt tokens billed.
    pub prompt_tokens: usize,
    /// Completion tokens billed.
    pub completion_tokens: usize,
    /// Cost in USD, from the catalogue pricing.
    pub cost: f64,
    /// Wall-clock latency of the upstream call, in milliseconds.
    pub latency_ms: u64,
    /// Finish reason (`"stop"`, `"tool_calls"`, `"length"`, ...).
    pub finish_reason: String,
}

/// Upstream model gateway with alias resolution, circuit breaking, and
/// fallback chains.
pub struct Gateway {
    client: Arc<dyn LlmClient>,
    breaker: CircuitBreaker,
    default_model: String,
    fallbacks: HashMap<String, Vec<String>>,
    request_timeout: Duration,
}

impl Gateway {
    /// Wrap a wire client with the default model alias.
    pub fn new(client: Arc<dyn LlmClient>, default_model: impl Into<String>) -> Self {
        Self {
            client,
            breaker: CircuitBreaker::new(Duration::from_secs(30)),
            default_model: default_model.into(),
            fallbacks: HashMap::new(),
            request_timeout: Duration::from_secs(120),
        }
    }

    /// Configure the fallback chain tried for a model alias (builder pattern).
    pub fn with_fallback_chain(
        mut self,
        alias: impl Into<String>,
        chain: Vec<String>,
    ) -> Self {
        self.fallbacks.insert(alias.into(), chain);
        self
    }

    /// Override the per-call timeout (builder pattern).
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Override the breaker reset interval (builder pattern).
    pub fn with_breaker_reset(mut self, reset_interval: Duration) -> Self {
        self.breaker = CircuitBreaker::new(reset_interval);
        self
    }

    /// The alias used when a request carries no model.
    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Breaker state, for diagnostics and tests.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    fn provider_request(&self, request: &CompletionRequest, alias: &str) -> ProviderRequest {
        ProviderRequest {
            model: resolve_model(alias).to_string(),
            messages: request.messages.clone(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            tools: request.tools.clone(),
            enable_thinking: request.enable_thinking,
        }
    }

    /// The alias chain attempted for a request: the requested alias followed
    /// by its configured fallbacks.
    fn alias_chain(&self, alias: &str) -> Vec<String> {
        let mut chain = vec![alias.to_string()];
        if let Some(fallbacks) = self.fallbacks.get(alias) {
            chain.extend(fallbacks.iter().cloned());
        }
        chain
    }

    async fn attempt_complete(
        &self,
        request: &CompletionRequest,
        alias: &str,
    ) -> Result<ProviderResponse, LlmError> {
        self.breaker.check()?;
        let provider_request = self.provider_request(request, alias);
        let outcome = tokio::time::timeout(self.request_timeout, self.client.complete(&provider_request))
            .await
            .unwrap_or_else(|_| {
                Err(LlmError::new(
                    LlmErrorKind::Timeout,
                    format!("no response within {:?}", self.request_timeout),
                ))
            });
        match &outcome {
            Ok(_) => self.breaker.on_success(),
            Err(_) => self.breaker.on_failure(),
        }
        outcome
    }

    /// One full completion round-trip with alias resolution, breaker, and
    /// fallback chain.
    pub async fn complete(&self, request: &CompletionRequest) -> Result<LlmResponse, LlmError> {
        let alias = request
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        let started = Instant::now();
        let mut last_error: Option<LlmError> = None;

        for candidate in self.alias_chain(&alias) {
            match self.attempt_complete(request, &candidate).await {
                Ok(raw) => {
                    let latency_ms = started.elapsed().as_millis() as u64;
                    return Ok(LlmResponse {
                        cost: compute_cost(&candidate, raw.prompt_tokens, raw.completion_tokens),
                        content: raw.content,
                        thinking: raw.thinking,
                        tool_calls: raw.tool_calls,
                        model: candidate,
                        prompt_tokens: raw.prompt_tokens,
                        completion_tokens: raw.completion_tokens,
                        latency_ms,
                        finish_reason: raw.finish_reason.unwrap_or_else(|| "stop".to_string()),
                    });
                }
                Err(err) => {
                    let fatal = err.kind == LlmErrorKind::CircuitOpen || err.is_permanent_rejection();
                    if log::log_enabled!(log::Level::Warn) {
                        log::warn!("Gateway: model '{}' failed: {}", candidate, err);
                    }
                    last_error = Some(err);
                    if fatal {
                        break;
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| LlmError::new(LlmErrorKind::Network, "empty fallback chain")))
    }

    /// Open a streaming completion.  The breaker and fallback chain guard the
    /// stream *establishment*; chunks received after that are forwarded as-is.
    pub async fn stream(&self, request: &CompletionRequest) -> Result<GatewayStream, LlmError> {
        let alias = request
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        let mut last_error: Option<LlmError> = None;
        for candidate in self.alias_chain(&alias) {
            if let Err(err) = self.breaker.check() {
                last_error = Some(err);
                break;
            }
            let provider_request = self.provider_request(request, &candidate);
            match self.client.stream(&provider_request).await {
                Ok(chunks) => {
                    self.breaker.on_success();
                    return Ok(GatewayStream {
                        model: candidate,
                        started: Instant::now(),
                        chunks,
                    });
                }
                Err(err) => {
                    self.breaker.on_failure();
                    let fatal = err.is_permanent_rejection();
                    if log::log_enabled!(log::Level::Warn) {
                        log::warn!("Gateway: stream on '{}' failed to open: {}", candidate, err);
                    }
                    last_error = Some(err);
                    if fatal {
                        break;
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| LlmError::new(LlmErrorKind::Network, "empty fallback chain")))
    }
}

/// An open stream plus the alias that produced it.
pub struct GatewayStream {
    /// The model alias the stream was established under (after fallback).
    pub model: String,
    /// Establishment instant, for latency accounting.
    pub started: Instant,
    /// The chunk stream itself.
    pub chunks: ChunkStream,
}
