/// Tests for roundtable discussions: parallel rounds, synthesis, fallback,
/// and pheromone updates for participants.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use agenthive::client::{
    ChunkStream, CompletionChunk, LlmClient, LlmError, LlmErrorKind, ProviderRequest,
    ProviderResponse,
};
use agenthive::engine::ChatEngine;
use agenthive::gateway::Gateway;
use agenthive::pool::{AgentPool, AgentState};
use agenthive::protection::SessionProtection;
use agenthive::roundtable::{Roundtable, RoundtableConfig};
use agenthive::router::Router;
use agenthive::store::{SessionStore, SessionType};
use agenthive::tool_protocol::ToolRegistry;

/// Mock client that labels each reply with its call ordinal.
struct CountingClient {
    calls: AtomicUsize,
}

#[async_trait]
impl LlmClient for CountingClient {
    async fn complete(&self, _request: &ProviderRequest) -> Result<ProviderResponse, LlmError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ProviderResponse {
            content: format!("contribution #{}", n),
            prompt_tokens: 5,
            completion_tokens: 5,
            finish_reason: Some("stop".into()),
            ..Default::default()
        })
    }

    async fn stream(&self, request: &ProviderRequest) -> Result<ChunkStream, LlmError> {
        let response = self.complete(request).await?;
        Ok(Box::pin(futures_util::stream::iter(vec![Ok(
            CompletionChunk {
                content: response.content,
                finish_reason: Some("stop".into()),
                ..Default::default()
            },
        )])))
    }
}

/// Mock client that always fails; used to force the fallback synthesis.
struct DeadClient;

#[async_trait]
impl LlmClient for DeadClient {
    async fn complete(&self, _request: &ProviderRequest) -> Result<ProviderResponse, LlmError> {
        Err(LlmError::new(LlmErrorKind::Network, "unreachable"))
    }

    async fn stream(&self, _request: &ProviderRequest) -> Result<ChunkStream, LlmError> {
        Err(LlmError::new(LlmErrorKind::Network, "unreachable"))
    }
}

fn roundtable_with(client: Arc<dyn LlmClient>) -> (Roundtable, Arc<AgentPool>, Arc<SessionStore>) {
    agenthive::init_logger();
    let store = Arc::new(SessionStore::in_memory().unwrap());
    let gateway = Arc::new(Gateway::new(client, "balanced"));
    let tools = Arc::new(ToolRegistry::new());
    let protection = Arc::new(SessionProtection::default());
    let engine = ChatEngine::new(store.clone(), gateway.clone(), tools, protection);
    let router = Arc::new(Router::new());
    let pool = Arc::new(AgentPool::new(engine, router, store.clone()));
    pool.register_agent(AgentState::new("alpha", "Alpha")).unwrap();
    pool.register_agent(AgentState::new("beta", "Beta")).unwrap();
    pool.register_agent(AgentState::new("gamma", "Gamma")).unwrap();
    let roundtable = Roundtable::new(pool.clone(), gateway, store.clone());
    (roundtable, pool, store)
}

fn quick_config(rounds: usize) -> RoundtableConfig {
    RoundtableConfig {
        rounds,
        agent_timeout: Duration::from_secs(5),
        total_timeout: Duration::from_secs(30),
    }
}

#[tokio::test]
async fn discussion_collects_turns_from_every_participant() {
    let (roundtable, _pool, store) = roundtable_with(Arc::new(CountingClient {
        calls: AtomicUsize::new(0),
    }));

    let result = roundtable
        .discuss(
            "How do we scale?",
            &["alpha".to_string(), "beta".to_string()],
            "gamma",
            quick_config(2),
        )
        .await
        .unwrap();

    // Two rounds x two participants.
    assert_eq!(result.turns.len(), 4);
    assert!(result.turns.iter().any(|t| t.agent_id == "alpha"));
    assert!(result.turns.iter().any(|t| t.agent_id == "beta"));
    assert_eq!(result.turns.iter().filter(|t| t.round == 1).count(), 2);
    assert!(!result.fallback_synthesis);
    assert!(!result.synthesis.is_empty());

    // Session persisted as a roundtable with one message per turn plus the
    // synthesis.
    let session = store.get_session(&result.session_id).unwrap().unwrap();
    assert_eq!(session.session_type, SessionType::Roundtable);
    assert_eq!(session.message_count, 5);
}

#[tokio::test]
async fn rounds_walk_the_phases() {
    let (roundtable, _pool, _store) = roundtable_with(Arc::new(CountingClient {
        calls: AtomicUsize::new(0),
    }));

    let result = roundtable
        .discuss(
            "phased work",
            &["alpha".to_string(), "beta".to_string()],
            "gamma",
            quick_config(3),
        )
        .await
        .unwrap();

    let phases: Vec<&str> = result
        .turns
        .iter()
        .filter(|t| t.agent_id == "alpha")
        .map(|t| t.phase)
        .collect();
    assert_eq!(phases, ["EXPLORE", "WORK", "VALIDATE"]);
}

#[tokio::test]
async fn two_participants_are_required() {
    let (roundtable, _pool, _store) = roundtable_with(Arc::new(CountingClient {
        calls: AtomicUsize::new(0),
    }));

    let err = roundtable
        .discuss("solo?", &["alpha".to_string()], "gamma", quick_config(1))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn unknown_participants_are_skipped() {
    let (roundtable, _pool, _store) = roundtable_with(Arc::new(CountingClient {
        calls: AtomicUsize::new(0),
    }));

    let result = roundtable
        .discuss(
            "mixed list",
            &[
                "alpha".to_string(),
                "nobody".to_string(),
                "beta".to_string(),
            ],
            "gamma",
            quick_config(1),
        )
        .await
        .unwrap();
    assert!(result.turns.iter().all(|t| t.agent_id != "nobody"));
}

#[tokio::test]
async fn dead_upstream_produces_fallback_synthesis() {
    let (roundtable, pool, _store) = roundtable_with(Arc::new(DeadClient));

    let result = roundtable
        .discuss(
            "doomed",
            &["alpha".to_string(), "beta".to_string()],
            "gamma",
            quick_config(1),
        )
        .await
        .unwrap();

    assert!(result.fallback_synthesis);
    assert!(result.turns.is_empty());
    assert!(result.synthesis.contains("no contributions"));

    // Failed participants still get a pheromone update, and it drops.
    let alpha = pool.get_agent("alpha").unwrap();
    assert!(alpha.pheromone < 0.5);
}

#[tokio::test]
async fn participants_gain_pheromone_on_success() {
    let (roundtable, pool, _store) = roundtable_with(Arc::new(CountingClient {
        calls: AtomicUsize::new(0),
    }));

    roundtable
        .discuss(
            "pheromones",
            &["alpha".to_string(), "beta".to_string()],
            "gamma",
            quick_config(1),
        )
        .await
        .unwrap();

    let alpha = pool.get_agent("alpha").unwrap();
    assert!(
        alpha.pheromone > 0.5,
        "fast successful turns should raise the score, got {}",
        alpha.pheromone
    );
}
