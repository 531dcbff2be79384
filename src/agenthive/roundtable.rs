//! Multi-agent roundtable discussions.
//!
//! A roundtable runs a bounded, structured discussion: every participant
//! answers in parallel each round, rounds walk the EXPLORE → WORK → VALIDATE
//! phases, and a designated synthesizer distils the result.  Two nested
//! deadlines keep it honest: a per-agent timeout and an aggregate per-round
//! timeout; agents that miss a deadline are logged and dropped for that
//! round.  If the synthesizer itself fails or times out, a deterministic
//! fallback synthesis is produced from the final round's contributions.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::agenthive::client::ChatMessage;
use crate::agenthive::engine::compact_title;
use crate::agenthive::error::EngineError;
use crate::agenthive::gateway::{CompletionRequest, Gateway};
use crate::agenthive::pool::{AgentPool, AgentState};
use crate::agenthive::protection::ValidationError;
use crate::agenthive::store::{NewMessage, NewSession, SessionStore, SessionType};

/// Discussion phases, one per round (cycling when `rounds > 3`).
pub const PHASES: [&str; 3] = ["EXPLORE", "WORK", "VALIDATE"];

/// Per-turn context excerpt cap, characters.
const TURN_EXCERPT_CHARS: usize = 300;

/// Timeouts and round count for a discussion.
#[derive(Debug, Clone)]
pub struct RoundtableConfig {
    pub rounds: usize,
    pub agent_timeout: Duration,
    pub total_timeout: Duration,
}

impl Default for RoundtableConfig {
    fn default() -> Self {
        Self {
            rounds: 3,
            agent_timeout: Duration::from_secs(60),
            total_timeout: Duration::from_secs(300),
        }
    }
}

/// One completed contribution.
#[derive(Debug, Clone)]
pub struct RoundtableTurn {
    pub agent_id: String,
    pub round: usize,
    pub phase: &'static str,
    pub content: String,
    pub latency_ms: u64,
}

/// The outcome of a discussion.
#[derive(Debug, Clone)]
pub struct RoundtableResult {
    pub session_id: String,
    pub topic: String,
    pub turns: Vec<RoundtableTurn>,
    pub synthesis: String,
    pub synthesizer_id: String,
    /// True when the deterministic fallback replaced the synthesizer.
    pub fallback_synthesis: bool,
    pub duration_ms: u64,
}

/// Runs structured multi-agent discussions.
pub struct Roundtable {
    pool: Arc<AgentPool>,
    gateway: Arc<Gateway>,
    store: Arc<SessionStore>,
}

impl Roundtable {
    pub fn new(pool: Arc<AgentPool>, gateway: Arc<Gateway>, store: Arc<SessionStore>) -> Self {
        Self {
            pool,
            gateway,
            store,
        }
    }

    /// Run a discussion over `topic` between `agent_ids`, synthesised by
    /// `synthesizer_id`.
    pub async fn discuss(
        &self,
        topic: &str,
        agent_ids: &[String],
        synthesizer_id: &str,
        config: RoundtableConfig,
    ) -> Result<RoundtableResult, EngineError> {
        let participants: Vec<AgentState> = agent_ids
            .iter()
            .filter_map(|id| {
                let agent = self.pool.get_agent(id);
                if agent.is_none() {
                    log::warn!("Roundtable: skipping unknown agent '{}'", id);
                }
                agent
            })
            .collect();
        if participants.len() < 2 {
            return Err(ValidationError(format!(
                "roundtable needs at least 2 participants, got {}",
                participants.len()
            ))
            .into());
        }

        let started = Instant::now();
        let deadline = started + config.total_timeout;

        let session = self.store.create_session(NewSession {
            session_type: Some(SessionType::Roundtable),
            title: Some(compact_title(topic)),
            metadata: Some(serde_json::json!({
                "participants": agent_ids,
                "synthesizer": synthesizer_id,
            })),
            ..Default::default()
        })?;

        let mut turns: Vec<RoundtableTurn> = Vec::new();

        for round in 1..=config.rounds.max(1) {
            let phase = PHASES[(round - 1) % PHASES.len()];
            let context = discussion_context(&turns);

            let round_budget = config
                .agent_timeout
                .saturating_mul(participants.len() as u32)
                .min(deadline.saturating_duration_since(Instant::now()));
            if round_budget.is_zero() {
                log::warn!("Roundtable: total timeout reached before round {}", round);
                break;
            }

            let mut join_set: JoinSet<(String, Option<(String, u64)>)> = JoinSet::new();
            for agent in &participants {
                let gateway = Arc::clone(&self.gateway);
                let request = participant_request(agent, topic, phase, &context);
                let agent_id = agent.id.clone();
                let agent_timeout = config.agent_timeout;
                join_set.spawn(async move {
                    let call_started = Instant::now();
                    let outcome =
                        tokio::time::timeout(agent_timeout, gateway.complete(&request)).await;
                    let latency_ms = call_started.elapsed().as_millis() as u64;
                    match outcome {
                        Ok(Ok(response)) => (agent_id, Some((response.content, latency_ms))),
                        Ok(Err(err)) => {
                            log::warn!("Roundtable: agent '{}' failed: {}", agent_id, err);
                            (agent_id, None)
                        }
                        Err(_) => {
                            log::warn!("Roundtable: agent '{}' timed out", agent_id);
                            (agent_id, None)
                        }
                    }
                });
            }

            let round_deadline = Instant::now() + round_budget;
            loop {
                let remaining = round_deadline.saturating_duration_since(Instant::now());
                let joined = tokio::time::timeout(remaining, join_set.join_next()).await;
                match joined {
                    Ok(Some(Ok((agent_id, Some((content, latency_ms)))))) => {
                        self.store.append_message(NewMessage {
                            session_id: session.id.clone(),
                            role: "assistant".into(),
                            content: content.clone(),
                            latency_ms,
                            metadata: Some(serde_json::json!({
                                "round": round,
                                "phase": phase,
                                "agent_id": agent_id,
                            })),
                            ..Default::default()
                        })?;
                        turns.push(RoundtableTurn {
                            agent_id,
                            round,
                            phase,
                            content,
                            latency_ms,
                        });
                    }
                    Ok(Some(Ok((_, None)))) => {}
                    Ok(Some(Err(err))) => {
                        log::warn!("Roundtable: participant task panicked: {}", err);
                    }
                    Ok(None) => break,
                    Err(_) => {
                        log::warn!(
                            "Roundtable: round {} deadline hit, dropping stragglers",
                            round
                        );
                        join_set.abort_all();
                        break;
                    }
                }
            }
        }

        let (synthesis, fallback) = self
            .synthesize(topic, synthesizer_id, &turns, &config)
            .await;

        self.store.append_message(NewMessage {
            session_id: session.id.clone(),
            role: "assistant".into(),
            content: synthesis.clone(),
            metadata: Some(serde_json::json!({
                "synthesis": true,
                "agent_id": synthesizer_id,
                "fallback": fallback,
            })),
            ..Default::default()
        })?;

        // Pheromone updates: every invited participant is scored, present in
        // the transcript or not.
        for agent in &participants {
            let agent_turns: Vec<&RoundtableTurn> =
                turns.iter().filter(|t| t.agent_id == agent.id).collect();
            let success = !agent_turns.is_empty();
            let avg_latency = if success {
                agent_turns.iter().map(|t| t.latency_ms).sum::<u64>() / agent_turns.len() as u64
            } else {
                config.agent_timeout.as_millis() as u64
            };
            if let Err(err) = self.pool.record_result(&agent.id, success, avg_latency, 0.0) {
                log::warn!(
                    "Roundtable: pheromone update for '{}' failed: {}",
                    agent.id,
                    err
                );
            }
        }

        Ok(RoundtableResult {
            session_id: session.id,
            topic: topic.to_string(),
            turns,
            synthesis,
            synthesizer_id: synthesizer_id.to_string(),
            fallback_synthesis: fallback,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn synthesize(
        &self,
        topic: &str,
        synthesizer_id: &str,
        turns: &[RoundtableTurn],
        config: &RoundtableConfig,
    ) -> (String, bool) {
        let synthesizer = self.pool.get_agent(synthesizer_id);
        if let Some(synthesizer) = synthesizer {
            let prompt = format!(
                "The roundtable on \"{}\" has concluded. Synthesise the discussion below \
                 into a final answer: agreements, disagreements, and the recommended outcome.\n\n{}",
                topic,
                discussion_context(turns),
            );
            let request = participant_request(&synthesizer, &prompt, "SYNTHESIZE", "");
            match tokio::time::timeout(config.agent_timeout, self.gateway.complete(&request)).await
            {
                Ok(Ok(response)) if !response.content.trim().is_empty() => {
                    return (response.content, false);
                }
                Ok(Ok(_)) => log::warn!("Roundtable: synthesizer returned empty content"),
                Ok(Err(err)) => log::warn!("Roundtable: synthesizer failed: {}", err),
                Err(_) => log::warn!("Roundtable: synthesizer timed out"),
            }
        } else {
            log::warn!("Roundtable: synthesizer '{}' is not registered", synthesizer_id);
        }
        (fallback_synthesis(topic, turns), true)
    }
}

/// Build the running-discussion excerpt fed to each participant.
fn discussion_context(turns: &[RoundtableTurn]) -> String {
    let mut context = String::new();
    for turn in turns {
        let excerpt: String = turn.content.chars().take(TURN_EXCERPT_CHARS).collect();
        context.push_str(&format!(
            "[round {} · {}] {}: {}\n",
            turn.round, turn.phase, turn.agent_id, excerpt
        ));
    }
    context
}

/// Compose one participant's completion request, priming it with identity
/// and phase.
fn participant_request(
    agent: &AgentState,
    topic: &str,
    phase: &str,
    context: &str,
) -> CompletionRequest {
    let mut system = format!("You are {}.\n", agent.display_name);
    if let Some(focus) = agent.focus {
        system.push_str(&format!("Your specialty: {}.\n", focus.as_str()));
    }
    if let Some(prompt) = &agent.system_prompt {
        system.push_str(prompt);
        system.push('\n');
    }
    system.push_str(&format!(
        "You are one voice in a multi-agent roundtable. Current phase: {}. \
         Be concise and build on what the others said.",
        phase
    ));

    let mut user = topic.to_string();
    if !context.is_empty() {
        user.push_str("\n\nDiscussion so far:\n");
        user.push_str(context);
    }

    let mut request = CompletionRequest::new(vec![
        ChatMessage::system(&system),
        ChatMessage::user(&user),
    ]);
    request.model = agent.model.clone();
    request.temperature = agent.temperature;
    request
}

/// Deterministic synthesis used when the synthesizer is unavailable: list
/// the final round's contributions verbatim.
fn fallback_synthesis(topic: &str, turns: &[RoundtableTurn]) -> String {
    let last_round = turns.iter().map(|t| t.round).max().unwrap_or(0);
    let mut synthesis = format!("Roundtable on \"{}\" — summary of final contributions:\n", topic);
    if last_round == 0 {
        synthesis.push_str("(no contributions were received)\n");
        return synthesis;
    }
    for turn in turns.iter().filter(|t| t.round == last_round) {
        let excerpt: String = turn.content.chars().take(TURN_EXCERPT_CHARS).collect();
        synthesis.push_str(&format!("- {}: {}\n", turn.agent_id, excerpt));
    }
    synthesis
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(agent_id: &str, round: usize, content: &str) -> RoundtableTurn {
        RoundtableTurn {
            agent_id: agent_id.to_string(),
            round,
            phase: PHASES[(round - 1) % PHASES.len()],
            content: content.to_string(),
            latency_ms: 10,
        }
    }

    #[test]
    fn fallback_lists_final_round_only() {
        let turns = vec![
            turn("a", 1, "early thought"),
            turn("b", 1, "another early thought"),
            turn("a", 2, "final position A"),
            turn("b", 2, "final position B"),
        ];
        let synthesis = fallback_synthesis("testing", &turns);
        assert!(synthesis.contains("final position A"));
        assert!(synthesis.contains("final position B"));
        assert!(!synthesis.contains("early thought"));
    }

    #[test]
    fn fallback_handles_empty_discussions() {
        let synthesis = fallback_synthesis("nothing", &[]);
        assert!(synthesis.contains("no contributions"));
    }

    #[test]
    fn context_excerpts_are_capped() {
        let turns = vec![turn("a", 1, &"x".repeat(1000))];
        let context = discussion_context(&turns);
        assert!(context.len() < 1000 + 100);
        assert!(context.contains("[round 1 · EXPLORE] a:"));
    }

    #[test]
    fn phases_cycle_past_three_rounds() {
        assert_eq!(PHASES[(4 - 1) % PHASES.len()], "EXPLORE");
        assert_eq!(PHASES[(5 - 1) % PHASES.len()], "WORK");
    }
}
