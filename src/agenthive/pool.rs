//! Agent pool: per-agent configuration, runtime status, and dispatch.
//!
//! The pool owns every [`AgentState`] in the process.  Other subsystems read
//! agent state through the pool and never mutate it directly; in particular
//! the router computes pheromone updates but the pool applies and persists
//! them.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::agenthive::engine::{ChatEngine, SendOptions};
use crate::agenthive::error::EngineError;
use crate::agenthive::router::Router;
use crate::agenthive::store::{AgentSnapshot, NewSession, SessionStatus, SessionStore};

/// What a focused agent is good at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FocusType {
    Social,
    Analysis,
    Devops,
    Creative,
    Research,
}

impl FocusType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FocusType::Social => "social",
            FocusType::Analysis => "analysis",
            FocusType::Devops => "devops",
            FocusType::Creative => "creative",
            FocusType::Research => "research",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "social" => Some(FocusType::Social),
            "analysis" => Some(FocusType::Analysis),
            "devops" => Some(FocusType::Devops),
            "creative" => Some(FocusType::Creative),
            "research" => Some(FocusType::Research),
            _ => None,
        }
    }
}

/// Runtime status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgentStatus {
    #[default]
    Idle,
    Busy,
    Error,
    Disabled,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Busy => "busy",
            AgentStatus::Error => "error",
            AgentStatus::Disabled => "disabled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "busy" => AgentStatus::Busy,
            "error" => AgentStatus::Error,
            "disabled" => AgentStatus::Disabled,
            _ => AgentStatus::Idle,
        }
    }
}

/// Configuration and runtime state of one agent.
#[derive(Debug, Clone)]
pub struct AgentState {
    pub id: String,
    pub display_name: String,
    pub focus: Option<FocusType>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub system_prompt: Option<String>,
    pub status: AgentStatus,
    pub consecutive_failures: u32,
    pub total_errors: u64,
    /// Rolling performance estimate in `[0, 1]`; 0.5 until evidence arrives.
    pub pheromone: f64,
    pub last_active: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, String>,
}

impl AgentState {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            focus: None,
            model: None,
            temperature: None,
            system_prompt: None,
            status: AgentStatus::Idle,
            consecutive_failures: 0,
            total_errors: 0,
            pheromone: 0.5,
            last_active: None,
            metadata: HashMap::new(),
        }
    }

    /// Attach a focus type (builder pattern).
    pub fn with_focus(mut self, focus: FocusType) -> Self {
        self.focus = Some(focus);
        self
    }

    /// Attach a model alias (builder pattern).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Attach a system prompt (builder pattern).
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Attach a sampling temperature (builder pattern).
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the pheromone score, clamped to `[0, 1]`.
    pub fn set_pheromone(&mut self, score: f64) {
        self.pheromone = score.clamp(0.0, 1.0);
    }

    fn to_snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
            focus: self.focus.map(|f| f.as_str().to_string()),
            model: self.model.clone(),
            temperature: self.temperature,
            system_prompt: self.system_prompt.clone(),
            status: self.status.as_str().to_string(),
            consecutive_failures: self.consecutive_failures,
            total_errors: self.total_errors,
            pheromone: self.pheromone,
            last_active: self.last_active,
            metadata: serde_json::to_value(&self.metadata)
                .unwrap_or_else(|_| serde_json::json!({})),
        }
    }

    fn from_snapshot(snapshot: AgentSnapshot) -> Self {
        Self {
            id: snapshot.id,
            display_name: snapshot.display_name,
            focus: snapshot.focus.as_deref().and_then(FocusType::parse),
            model: snapshot.model,
            temperature: snapshot.temperature,
            system_prompt: snapshot.system_prompt,
            status: AgentStatus::parse(&snapshot.status),
            consecutive_failures: snapshot.consecutive_failures,
            total_errors: snapshot.total_errors,
            pheromone: snapshot.pheromone.clamp(0.0, 1.0),
            last_active: snapshot.last_active,
            metadata: serde_json::from_value(snapshot.metadata).unwrap_or_default(),
        }
    }
}

/// Agent dispatch failures.
#[derive(Debug, Clone)]
pub enum AgentError {
    /// The agent is disabled and refuses to process.
    Disabled(String),
    /// The agent is busy and the caller asked for exclusive dispatch.
    Busy(String),
    /// No agent with that id.
    Unknown(String),
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::Disabled(id) => write!(f, "agent is disabled: {}", id),
            AgentError::Busy(id) => write!(f, "agent is busy: {}", id),
            AgentError::Unknown(id) => write!(f, "unknown agent: {}", id),
        }
    }
}

impl std::error::Error for AgentError {}

/// Per-agent roll-up for the metrics surface.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AgentMetrics {
    pub agent_id: String,
    pub display_name: String,
    pub status: String,
    pub pheromone: f64,
    pub messages_processed: u64,
    pub total_tokens: u64,
    pub avg_latency_ms: f64,
    pub errors: u64,
    pub error_rate: f64,
    pub consecutive_failures: u32,
    pub uptime_s: u64,
    pub last_active: Option<DateTime<Utc>>,
}

/// Owns the agent registry and pushes messages through agents.
pub struct AgentPool {
    agents: Mutex<HashMap<String, AgentState>>,
    /// Default chat session per agent, reused across calls.
    default_sessions: Mutex<HashMap<String, String>>,
    engine: Arc<ChatEngine>,
    router: Arc<Router>,
    store: Arc<SessionStore>,
    started_at: Instant,
}

impl AgentPool {
    pub fn new(engine: Arc<ChatEngine>, router: Arc<Router>, store: Arc<SessionStore>) -> Self {
        Self {
            agents: Mutex::new(HashMap::new()),
            default_sessions: Mutex::new(HashMap::new()),
            engine,
            router,
            store,
            started_at: Instant::now(),
        }
    }

    /// Load previously persisted agents into the registry.
    pub fn load_persisted(&self) -> Result<usize, EngineError> {
        let snapshots = self.store.load_agents()?;
        let mut agents = self.agents.lock().expect("agent registry poisoned");
        let count = snapshots.len();
        for snapshot in snapshots {
            let mut state = AgentState::from_snapshot(snapshot);
            // A process restart leaves no call in flight.
            if state.status == AgentStatus::Busy {
                state.status = AgentStatus::Idle;
            }
            agents.insert(state.id.clone(), state);
        }
        Ok(count)
    }

    /// Register (or replace) an agent and persist its snapshot.
    pub fn register_agent(&self, state: AgentState) -> Result<(), EngineError> {
        self.store.upsert_agent(&state.to_snapshot())?;
        self.agents
            .lock()
            .expect("agent registry poisoned")
            .insert(state.id.clone(), state);
        Ok(())
    }

    /// Fetch a copy of one agent's state.
    pub fn get_agent(&self, agent_id: &str) -> Option<AgentState> {
        self.agents
            .lock()
            .expect("agent registry poisoned")
            .get(agent_id)
            .cloned()
    }

    /// Copies of every registered agent, sorted by id.
    pub fn list_agents(&self) -> Vec<AgentState> {
        let mut agents: Vec<AgentState> = self
            .agents
            .lock()
            .expect("agent registry poisoned")
            .values()
            .cloned()
            .collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    /// Set an agent's status (e.g. to disable it).
    pub fn set_agent_status(&self, agent_id: &str, status: AgentStatus) -> Result<(), EngineError> {
        let snapshot = {
            let mut agents = self.agents.lock().expect("agent registry poisoned");
            let state = agents
                .get_mut(agent_id)
                .ok_or_else(|| AgentError::Unknown(agent_id.to_string()))?;
            state.status = status;
            state.to_snapshot()
        };
        self.store.upsert_agent(&snapshot)?;
        Ok(())
    }

    fn mutate_agent<R>(
        &self,
        agent_id: &str,
        f: impl FnOnce(&mut AgentState) -> R,
    ) -> Result<R, EngineError> {
        let (result, snapshot) = {
            let mut agents = self.agents.lock().expect("agent registry poisoned");
            let state = agents
                .get_mut(agent_id)
                .ok_or_else(|| AgentError::Unknown(agent_id.to_string()))?;
            let result = f(state);
            (result, state.to_snapshot())
        };
        self.store.upsert_agent(&snapshot)?;
        Ok(result)
    }

    /// Route a free-text message: pick the best non-disabled agent.
    pub fn route_message(&self, message: &str) -> Result<String, EngineError> {
        let agents = self.agents.lock().expect("agent registry poisoned");
        let candidates: Vec<&AgentState> = agents
            .values()
            .filter(|a| a.status != AgentStatus::Disabled)
            .collect();
        let picked = self.router.select_agent(message, &candidates)?;
        Ok(picked.id.clone())
    }

    /// Find or create the agent's default chat session.
    fn session_for(&self, agent: &AgentState) -> Result<String, EngineError> {
        {
            let sessions = self.default_sessions.lock().expect("session map poisoned");
            if let Some(session_id) = sessions.get(&agent.id) {
                if let Some(session) = self.store.get_session(session_id)? {
                    if session.status == SessionStatus::Active {
                        return Ok(session_id.clone());
                    }
                }
            }
        }
        let session = self.store.create_session(NewSession {
            agent_id: Some(agent.id.clone()),
            system_prompt: agent.system_prompt.clone(),
            model: agent.model.clone(),
            temperature: agent.temperature,
            ..Default::default()
        })?;
        self.default_sessions
            .lock()
            .expect("session map poisoned")
            .insert(agent.id.clone(), session.id.clone());
        Ok(session.id)
    }

    /// Record an interaction outcome for an agent: updates the router's
    /// performance buffer, recomputes the pheromone, and persists it.
    pub fn record_result(
        &self,
        agent_id: &str,
        success: bool,
        duration_ms: u64,
        token_cost: f64,
    ) -> Result<f64, EngineError> {
        let score = self
            .router
            .record_interaction(agent_id, success, duration_ms, token_cost);
        self.mutate_agent(agent_id, |state| {
            state.set_pheromone(score);
            state.last_active = Some(Utc::now());
        })?;
        Ok(score)
    }

    /// Push one message through an agent and return the reply text.
    ///
    /// Status transitions around the call: `idle → busy → idle` on success,
    /// `busy → error` with a failure increment on error.  Disabled agents
    /// refuse to process.
    pub async fn process_with_agent(
        &self,
        agent_id: &str,
        message: &str,
        session_id: Option<&str>,
    ) -> Result<String, EngineError> {
        let agent = self
            .get_agent(agent_id)
            .ok_or_else(|| AgentError::Unknown(agent_id.to_string()))?;
        if agent.status == AgentStatus::Disabled {
            return Err(AgentError::Disabled(agent_id.to_string()).into());
        }

        let session_id = match session_id {
            Some(id) => id.to_string(),
            None => self.session_for(&agent)?,
        };

        self.mutate_agent(agent_id, |state| state.status = AgentStatus::Busy)?;

        let started = Instant::now();
        let outcome = self
            .engine
            .send_message(&session_id, message, SendOptions::default())
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(response) => {
                self.mutate_agent(agent_id, |state| {
                    state.status = AgentStatus::Idle;
                    state.consecutive_failures = 0;
                    state.last_active = Some(Utc::now());
                })?;
                self.record_result(agent_id, true, duration_ms, response.cost)?;
                Ok(response.content)
            }
            Err(err) => {
                if log::log_enabled!(log::Level::Warn) {
                    log::warn!("AgentPool: agent '{}' failed: {}", agent_id, err);
                }
                self.mutate_agent(agent_id, |state| {
                    state.status = AgentStatus::Error;
                    state.consecutive_failures += 1;
                    state.total_errors += 1;
                })?;
                self.record_result(agent_id, false, duration_ms, 0.0)?;
                Err(err)
            }
        }
    }

    /// Per-agent metrics roll-up.
    pub fn agent_metrics(&self) -> Result<Vec<AgentMetrics>, EngineError> {
        let uptime_s = self.started_at.elapsed().as_secs();
        let mut metrics = Vec::new();
        for agent in self.list_agents() {
            let stats = self.store.agent_message_stats(&agent.id)?;
            let error_rate = if stats.messages + agent.total_errors > 0 {
                agent.total_errors as f64 / (stats.messages + agent.total_errors) as f64
            } else {
                0.0
            };
            metrics.push(AgentMetrics {
                agent_id: agent.id.clone(),
                display_name: agent.display_name.clone(),
                status: agent.status.as_str().to_string(),
                pheromone: agent.pheromone,
                messages_processed: stats.messages,
                total_tokens: stats.total_tokens,
                avg_latency_ms: stats.avg_latency_ms,
                errors: agent.total_errors,
                error_rate,
                consecutive_failures: agent.consecutive_failures,
                uptime_s,
                last_active: agent.last_active,
            });
        }
        Ok(metrics)
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }
}
