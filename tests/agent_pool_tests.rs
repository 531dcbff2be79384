/// Tests for the agent pool: dispatch status transitions, failure
/// accounting, routing, metrics, and persistence of agent state.
use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use agenthive::client::{
    ChunkStream, CompletionChunk, LlmClient, LlmError, LlmErrorKind, ProviderRequest,
    ProviderResponse,
};
use agenthive::engine::ChatEngine;
use agenthive::gateway::Gateway;
use agenthive::pool::{AgentPool, AgentState, AgentStatus, FocusType};
use agenthive::protection::SessionProtection;
use agenthive::router::Router;
use agenthive::store::SessionStore;
use agenthive::tool_protocol::ToolRegistry;

enum Step {
    Ok(String),
    Err,
}

struct StepClient {
    steps: Mutex<VecDeque<Step>>,
}

impl StepClient {
    fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
        }
    }
}

#[async_trait]
impl LlmClient for StepClient {
    async fn complete(&self, _request: &ProviderRequest) -> Result<ProviderResponse, LlmError> {
        match self.steps.lock().await.pop_front() {
            Some(Step::Ok(content)) => Ok(ProviderResponse {
                content,
                prompt_tokens: 4,
                completion_tokens: 4,
                finish_reason: Some("stop".into()),
                ..Default::default()
            }),
            _ => Err(LlmError::new(LlmErrorKind::Upstream5xx, "boom")),
        }
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

fn pool_with(steps: Vec<Step>) -> (Arc<AgentPool>, Arc<SessionStore>) {
    agenthive::init_logger();
    let store = Arc::new(SessionStore::in_memory().unwrap());
    let gateway = Arc::new(Gateway::new(Arc::new(StepClient::new(steps)), "balanced"));
    let tools = Arc::new(ToolRegistry::new());
    let protection = Arc::new(SessionProtection::default());
    let engine = ChatEngine::new(store.clone(), gateway, tools, protection);
    let router = Arc::new(Router::new());
    let pool = Arc::new(AgentPool::new(engine, router, store.clone()));
    (pool, store)
}

#[tokio::test]
async fn successful_dispatch_returns_to_idle() {
    let (pool, _store) = pool_with(vec![Step::Ok("reply".into())]);
    pool.register_agent(AgentState::new("main", "Main")).unwrap();

    let reply = pool.process_with_agent("main", "hello", None).await.unwrap();
    assert_eq!(reply, "reply");

    let agent = pool.get_agent("main").unwrap();
    assert_eq!(agent.status, AgentStatus::Idle);
    assert_eq!(agent.consecutive_failures, 0);
    assert!(agent.last_active.is_some());
    assert!(agent.pheromone > 0.5);
}

#[tokio::test]
async fn failures_mark_the_agent_and_count_up() {
    let (pool, _store) = pool_with(vec![]);
    pool.register_agent(AgentState::new("main", "Main")).unwrap();

    let err = pool.process_with_agent("main", "hello", None).await.unwrap_err();
    assert_eq!(err.status_code(), 503);

    let agent = pool.get_agent("main").unwrap();
    assert_eq!(agent.status, AgentStatus::Error);
    assert_eq!(agent.consecutive_failures, 1);
    assert_eq!(agent.total_errors, 1);
    assert!(agent.pheromone < 0.5);
}

#[tokio::test]
async fn disabled_agents_refuse_to_process() {
    let (pool, _store) = pool_with(vec![Step::Ok("never".into())]);
    pool.register_agent(AgentState::new("off", "Off")).unwrap();
    pool.set_agent_status("off", AgentStatus::Disabled).unwrap();

    let err = pool.process_with_agent("off", "hello", None).await.unwrap_err();
    assert_eq!(err.kind_label(), "agent_error");
}

#[tokio::test]
async fn unknown_agents_are_not_found() {
    let (pool, _store) = pool_with(vec![]);
    let err = pool.process_with_agent("ghost", "hello", None).await.unwrap_err();
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn dispatch_reuses_the_agents_default_session() {
    let (pool, store) = pool_with(vec![Step::Ok("one".into()), Step::Ok("two".into())]);
    pool.register_agent(AgentState::new("main", "Main")).unwrap();

    pool.process_with_agent("main", "first", None).await.unwrap();
    pool.process_with_agent("main", "second", None).await.unwrap();

    let page = store
        .list_sessions(&agenthive::store::SessionFilter {
            limit: 100,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.sessions[0].message_count, 4);
    assert_eq!(page.sessions[0].agent_id.as_deref(), Some("main"));
}

#[tokio::test]
async fn routing_prefers_the_specialist() {
    let (pool, _store) = pool_with(vec![]);
    pool.register_agent(AgentState::new("main", "Main")).unwrap();
    pool.register_agent(AgentState::new("devops", "DevOps").with_focus(FocusType::Devops))
        .unwrap();
    pool.register_agent(AgentState::new("talk", "Talk")).unwrap();
    // Never route to disabled agents, whatever the message.
    pool.set_agent_status("talk", AgentStatus::Disabled).unwrap();

    let picked = pool.route_message("Deploy the Docker build").unwrap();
    assert_eq!(picked, "devops");
}

#[tokio::test]
async fn metrics_roll_up_messages_and_errors() {
    let (pool, _store) = pool_with(vec![Step::Ok("reply".into())]);
    pool.register_agent(AgentState::new("main", "Main")).unwrap();

    pool.process_with_agent("main", "hello", None).await.unwrap();
    let _ = pool.process_with_agent("main", "fail now", None).await;

    let metrics = pool.agent_metrics().unwrap();
    assert_eq!(metrics.len(), 1);
    let m = &metrics[0];
    assert_eq!(m.agent_id, "main");
    assert_eq!(m.messages_processed, 1); // one assistant message persisted
    assert_eq!(m.errors, 1);
    assert!(m.error_rate > 0.0 && m.error_rate < 1.0);
    assert!(m.total_tokens > 0);
}

#[tokio::test]
async fn agent_state_survives_a_restart() {
    let (pool, store) = pool_with(vec![Step::Ok("reply".into())]);
    pool.register_agent(
        AgentState::new("keeper", "Keeper")
            .with_focus(FocusType::Research)
            .with_model("fast"),
    )
    .unwrap();
    pool.process_with_agent("keeper", "hello", None).await.unwrap();
    let before = pool.get_agent("keeper").unwrap();

    // A second pool over the same store plays the role of a restart.
    let gateway = Arc::new(Gateway::new(Arc::new(StepClient::new(vec![])), "balanced"));
    let tools = Arc::new(ToolRegistry::new());
    let protection = Arc::new(SessionProtection::default());
    let engine = ChatEngine::new(store.clone(), gateway, tools, protection);
    let revived = AgentPool::new(engine, Arc::new(Router::new()), store.clone());
    revived.load_persisted().unwrap();

    let after = revived.get_agent("keeper").unwrap();
    assert_eq!(after.focus, Some(FocusType::Research));
    assert!((after.pheromone - before.pheromone).abs() < 1e-9);
}
