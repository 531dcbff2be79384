//! Pheromone-weighted message routing.
//!
//! The router picks the best agent for a free-text message by combining four
//! factors, each normalised to `[0, 1]`:
//!
//! | factor     | weight | source                                         |
//! |------------|--------|------------------------------------------------|
//! | pheromone  | 0.35   | decayed rolling performance score              |
//! | specialty  | 0.30   | focus-keyword matches against the message      |
//! | load       | 0.20   | agent status and consecutive failures          |
//! | recency    | 0.15   | success ratio of the last 10 recorded outcomes |
//!
//! Performance records live in memory only (at most
//! [`MAX_RECORDS_PER_AGENT`] per agent, FIFO, aged out after two hours); the
//! pheromone score distilled from them is what gets persisted, by the pool,
//! after every interaction.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;

use crate::agenthive::pool::{AgentState, AgentStatus, FocusType};

/// FIFO cap on in-memory performance records per agent.
pub const MAX_RECORDS_PER_AGENT: usize = 200;

/// Records older than this are dropped by [`Router::compact`].
pub const RECORD_MAX_AGE: Duration = Duration::from_secs(2 * 60 * 60);

/// Duration ceiling for the speed score: a 30 s turn scores 0.0.
const SPEED_CEILING_MS: f64 = 30_000.0;

/// Routing failure.
#[derive(Debug, Clone)]
pub enum RouterError {
    /// The candidate list was empty.
    NoCandidates,
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterError::NoCandidates => write!(f, "no candidate agents to route to"),
        }
    }
}

impl std::error::Error for RouterError {}

/// One recorded interaction outcome.
#[derive(Debug, Clone)]
pub struct PerformanceRecord {
    pub success: bool,
    /// `max(0, 1 − duration_ms/30000)`.
    pub speed_score: f64,
    /// `max(0, 1 − min(token_cost, 1))`.
    pub cost_score: f64,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

lazy_static! {
    /// Focus-keyword tables; one compiled word-boundary regex per keyword.
    static ref FOCUS_KEYWORDS: HashMap<FocusType, Vec<Regex>> = {
        // Keywords are stems: anchored at the left word boundary only, so
        // "analyz" matches "analyze" and "analyzing".
        fn compile(words: &[&str]) -> Vec<Regex> {
            words
                .iter()
                .map(|w| Regex::new(&format!(r"(?i)\b{}", w)).expect("keyword regex"))
                .collect()
        }
        let mut table = HashMap::new();
        table.insert(
            FocusType::Social,
            compile(&["chat", "talk", "hello", "thanks", "joke", "feel", "friend", "story"]),
        );
        table.insert(
            FocusType::Analysis,
            compile(&["analyz", "data", "metric", "report", "compare", "statistic", "trend", "evaluate"]),
        );
        table.insert(
            FocusType::Devops,
            compile(&["deploy", "docker", "server", "build", "pipeline", "kubernetes", "container", "release", "infra"]),
        );
        table.insert(
            FocusType::Creative,
            compile(&["write", "poem", "design", "imagine", "draft", "creative", "brainstorm", "name"]),
        );
        table.insert(
            FocusType::Research,
            compile(&["research", "search", "find", "source", "paper", "investigate", "summarize", "learn"]),
        );
        table
    };
}

/// Count how many distinct focus keywords the message matches.
fn keyword_matches(message: &str, focus: FocusType) -> usize {
    FOCUS_KEYWORDS
        .get(&focus)
        .map(|patterns| patterns.iter().filter(|p| p.is_match(message)).count())
        .unwrap_or(0)
}

/// Specialty factor: 0.1 / 0.6 / 0.8 / 1.0 for 0 / 1 / 2 / ≥3 keyword
/// matches; agents without a focus score a neutral 0.3.
pub fn specialty_score(message: &str, focus: Option<FocusType>) -> f64 {
    let Some(focus) = focus else {
        return 0.3;
    };
    match keyword_matches(message, focus) {
        0 => 0.1,
        1 => 0.6,
        2 => 0.8,
        _ => 1.0,
    }
}

/// Load factor from runtime status and failure streak.
pub fn load_score(status: AgentStatus, consecutive_failures: u32) -> f64 {
    match status {
        AgentStatus::Disabled => 0.0,
        AgentStatus::Error => 0.1,
        AgentStatus::Busy => 0.3,
        AgentStatus::Idle => (1.0 - 0.1 * consecutive_failures as f64).max(0.2),
    }
}

/// In-memory performance records plus the scoring logic.
pub struct Router {
    records: Mutex<HashMap<String, VecDeque<PerformanceRecord>>>,
}

impl Router {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Recency factor: success ratio of the agent's last 10 records, 0.5
    /// when no records exist.
    pub fn recency_score(&self, agent_id: &str) -> f64 {
        let records = self.records.lock().expect("router records poisoned");
        match records.get(agent_id) {
            Some(list) if !list.is_empty() => {
                let recent: Vec<&PerformanceRecord> = list.iter().rev().take(10).collect();
                let successes = recent.iter().filter(|r| r.success).count();
                successes as f64 / recent.len() as f64
            }
            _ => 0.5,
        }
    }

    /// Combined score for one candidate.
    pub fn score(&self, message: &str, agent: &AgentState) -> f64 {
        0.35 * agent.pheromone
            + 0.30 * specialty_score(message, agent.focus)
            + 0.20 * load_score(agent.status, agent.consecutive_failures)
            + 0.15 * self.recency_score(&agent.id)
    }

    /// Pick the best candidate for a message.
    ///
    /// Ties break towards the higher pheromone, then the lexicographically
    /// smaller agent id.  A single candidate short-circuits.
    pub fn select_agent<'a>(
        &self,
        message: &str,
        candidates: &[&'a AgentState],
    ) -> Result<&'a AgentState, RouterError> {
        match candidates {
            [] => Err(RouterError::NoCandidates),
            [only] => Ok(only),
            _ => {
                let mut best: Option<(&AgentState, f64)> = None;
                for candidate in candidates {
                    let score = self.score(message, candidate);
                    if log::log_enabled!(log::Level::Debug) {
                        log::debug!("Router: {} scored {:.4}", candidate.id, score);
                    }
                    best = match best {
                        None => Some((candidate, score)),
                        Some((current, current_score)) => {
                            let wins = score > current_score
                                || (score == current_score
                                    && (candidate.pheromone > current.pheromone
                                        || (candidate.pheromone == current.pheromone
                                            && candidate.id < current.id)));
                            if wins {
                                Some((candidate, score))
                            } else {
                                Some((current, current_score))
                            }
                        }
                    };
                }
                Ok(best.map(|(agent, _)| agent).expect("non-empty candidates"))
            }
        }
    }

    /// Append one interaction outcome and recompute the agent's pheromone.
    ///
    /// Returns the new pheromone score; the caller (the agent pool, which
    /// owns the agent state) applies and persists it.
    pub fn record_interaction(
        &self,
        agent_id: &str,
        success: bool,
        duration_ms: u64,
        token_cost: f64,
    ) -> f64 {
        let record = PerformanceRecord {
            success,
            speed_score: (1.0 - duration_ms as f64 / SPEED_CEILING_MS).max(0.0),
            cost_score: (1.0 - token_cost.min(1.0)).max(0.0),
            duration_ms,
            created_at: Utc::now(),
        };

        let mut records = self.records.lock().expect("router records poisoned");
        let list = records.entry(agent_id.to_string()).or_default();
        list.push_back(record);
        while list.len() > MAX_RECORDS_PER_AGENT {
            list.pop_front();
        }
        Self::pheromone_of(list)
    }

    /// Time-decayed pheromone over a record list:
    /// `Σ (0.6·success + 0.3·speed + 0.1·cost)·d / Σ d` with
    /// `d = 0.95^age_days`.  Empty lists score the neutral 0.5.
    fn pheromone_of(records: &VecDeque<PerformanceRecord>) -> f64 {
        if records.is_empty() {
            return 0.5;
        }
        let now = Utc::now();
        let mut weighted = 0.0;
        let mut weights = 0.0;
        for record in records {
            let age_days =
                (now - record.created_at).num_seconds().max(0) as f64 / 86_400.0;
            let decay = 0.95_f64.powf(age_days);
            let quality = 0.6 * (record.success as u8 as f64)
                + 0.3 * record.speed_score
                + 0.1 * record.cost_score;
            weighted += quality * decay;
            weights += decay;
        }
        if weights == 0.0 {
            return 0.5;
        }
        (weighted / weights).clamp(0.0, 1.0)
    }

    /// The current pheromone distilled from an agent's records, 0.5 when none.
    pub fn pheromone(&self, agent_id: &str) -> f64 {
        let records = self.records.lock().expect("router records poisoned");
        records
            .get(agent_id)
            .map(Self::pheromone_of)
            .unwrap_or(0.5)
    }

    /// Number of retained records for an agent (diagnostics and tests).
    pub fn record_count(&self, agent_id: &str) -> usize {
        self.records
            .lock()
            .expect("router records poisoned")
            .get(agent_id)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Drop records older than [`RECORD_MAX_AGE`] and empty buffers.
    pub fn compact(&self) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(RECORD_MAX_AGE).unwrap_or_else(|_| chrono::Duration::hours(2));
        let mut records = self.records.lock().expect("router records poisoned");
        records.retain(|_, list| {
            list.retain(|record| record.created_at >= cutoff);
            !list.is_empty()
        });
    }

    /// Spawn the periodic compaction task.
    pub fn spawn_compactor(
        self: std::sync::Arc<Self>,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let router = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                router.compact();
            }
        })
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}
