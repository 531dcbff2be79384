/// End-to-end tests through the root `Hive` handle, plus the protection
/// surfaces (rate limits) as a turn sees them.
use std::sync::Arc;

use async_trait::async_trait;

use agenthive::client::{
    ChunkStream, CompletionChunk, LlmClient, LlmError, ProviderRequest, ProviderResponse,
};
use agenthive::engine::ChatEngine;
use agenthive::gateway::Gateway;
use agenthive::protection::{ProtectionConfig, SessionProtection};
use agenthive::store::{NewSession, SessionFilter, SessionStore};
use agenthive::tool_protocol::ToolRegistry;
use agenthive::{EngineConfig, Hive, SendOptions};

struct EchoClient;

#[async_trait]
impl LlmClient for EchoClient {
    async fn complete(&self, request: &ProviderRequest) -> Result<ProviderResponse, LlmError> {
        let last = request
            .messages
            .last()
            .map(|m| m.content.to_string())
            .unwrap_or_default();
        Ok(ProviderResponse {
            content: format!("echo: {}", last),
            prompt_tokens: 8,
            completion_tokens: 4,
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

#[tokio::test]
async fn hive_wires_a_full_turn() {
    agenthive::init_logger();
    let hive = Hive::open_with_client(EngineConfig::default(), Arc::new(EchoClient)).unwrap();

    let session = hive.chat().create_session(NewSession::default()).unwrap();
    let response = hive
        .chat()
        .send_message(&session.id, "ping", SendOptions::default())
        .await
        .unwrap();
    assert_eq!(response.content, "echo: ping");

    // The built-in tools came along.
    assert!(hive.tools().metadata("calculator").is_some());
    assert!(hive.tools().metadata("current_time").is_some());

    // Stats see the turn.
    let stats = hive.store().stats().unwrap();
    assert_eq!(stats.total_sessions, 1);
    assert_eq!(stats.total_messages, 2);
    assert!(stats.total_tokens > 0);

    // Listing backs the sessions surface.
    let page = hive
        .store()
        .list_sessions(&SessionFilter {
            limit: 10,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(page.total, 1);
    assert!(!page.has_more);

    hive.shutdown(std::time::Duration::from_millis(100)).await;
}

#[tokio::test]
async fn hive_scheduler_round_trips_jobs() {
    let hive = Hive::open_with_client(EngineConfig::default(), Arc::new(EchoClient)).unwrap();

    hive.scheduler()
        .add_job(
            agenthive::JobSpec::new("hello", "Hello", "5m")
                .with_payload(agenthive::JobPayload::Prompt("hi".into())),
        )
        .unwrap();
    hive.scheduler().trigger_job("hello").await.unwrap();
    assert_eq!(
        hive.scheduler().get_job("hello").unwrap().success_count,
        1
    );

    hive.shutdown(std::time::Duration::from_millis(100)).await;
}

#[tokio::test]
async fn session_rate_limit_surfaces_as_429_with_retry_after() {
    let store = Arc::new(SessionStore::in_memory().unwrap());
    let gateway = Arc::new(Gateway::new(Arc::new(EchoClient), "balanced"));
    let tools = Arc::new(ToolRegistry::new());
    let protection = Arc::new(SessionProtection::new(ProtectionConfig {
        session_max_requests: 2,
        ..Default::default()
    }));
    let engine = ChatEngine::new(store, gateway, tools, protection);

    let session = engine.create_session(NewSession::default()).unwrap();
    for _ in 0..2 {
        engine
            .send_message(&session.id, "hi", SendOptions::default())
            .await
            .unwrap();
    }
    let err = engine
        .send_message(&session.id, "one too many", SendOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 429);
    assert!(err.retry_after_s().unwrap() >= 1);
}

#[tokio::test]
async fn empty_messages_are_rejected() {
    let hive = Hive::open_with_client(EngineConfig::default(), Arc::new(EchoClient)).unwrap();
    let session = hive.chat().create_session(NewSession::default()).unwrap();

    let err = hive
        .chat()
        .send_message(&session.id, "   ", SendOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);

    hive.shutdown(std::time::Duration::from_millis(100)).await;
}
