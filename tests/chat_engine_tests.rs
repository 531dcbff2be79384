/// Tests for the chat engine turn contract: persistence order, tool loop,
/// streaming frames, and counter accounting.
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use agenthive::client::{
    ChunkStream, CompletionChunk, LlmClient, LlmError, LlmErrorKind, ProviderRequest,
    ProviderResponse, ToolCallRequest,
};
use agenthive::engine::{ChatEngine, SendOptions, StreamEvent};
use agenthive::gateway::Gateway;
use agenthive::protection::SessionProtection;
use agenthive::store::{NewSession, SessionStore};
use agenthive::tool_protocol::{
    ToolError, ToolExecutor, ToolInvocation, ToolMetadata, ToolParameter, ToolParameterType,
    ToolRegistry,
};

/// Mock wire client that replays a scripted sequence of responses.
struct ScriptedClient {
    responses: Mutex<VecDeque<ProviderResponse>>,
    calls: AtomicUsize,
}

impl ScriptedClient {
    fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
        }
    }

    fn text_response(content: &str) -> ProviderResponse {
        ProviderResponse {
            content: content.to_string(),
            prompt_tokens: 10,
            completion_tokens: 5,
            finish_reason: Some("stop".to_string()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn complete(&self, _request: &ProviderRequest) -> Result<ProviderResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| LlmError::new(LlmErrorKind::Network, "script exhausted"))
    }

    async fn stream(&self, request: &ProviderRequest) -> Result<ChunkStream, LlmError> {
        let response = self.complete(request).await?;
        let mut chunks: Vec<Result<CompletionChunk, LlmError>> = Vec::new();
        if !response.content.is_empty() {
            chunks.push(Ok(CompletionChunk {
                content: response.content.clone(),
                ..Default::default()
            }));
        }
        chunks.push(Ok(CompletionChunk {
            tool_calls: response.tool_calls.clone(),
            finish_reason: Some(response.finish_reason.unwrap_or_else(|| "stop".into())),
            ..Default::default()
        }));
        Ok(Box::pin(futures_util::stream::iter(chunks)))
    }
}

struct KnowledgeTool;

#[async_trait]
impl ToolExecutor for KnowledgeTool {
    async fn execute(
        &self,
        arguments: serde_json::Value,
        _invocation: &ToolInvocation,
    ) -> Result<serde_json::Value, ToolError> {
        let query = arguments
            .get("query")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        Ok(serde_json::json!({ "results": [format!("knowledge about {}", query)] }))
    }
}

fn engine_with(responses: Vec<ProviderResponse>) -> (Arc<ChatEngine>, Arc<SessionStore>) {
    agenthive::init_logger();
    let store = Arc::new(SessionStore::in_memory().unwrap());
    let gateway = Arc::new(Gateway::new(
        Arc::new(ScriptedClient::new(responses)),
        "balanced",
    ));
    let mut registry = ToolRegistry::new();
    registry.register(
        ToolMetadata::new("search_knowledge", "Searches the knowledge base.").with_parameter(
            ToolParameter::new("query", ToolParameterType::String).required(),
        ),
        Arc::new(KnowledgeTool),
    );
    let tools = Arc::new(registry);
    let protection = Arc::new(SessionProtection::default());
    let engine = ChatEngine::new(store.clone(), gateway, tools, protection);
    (engine, store)
}

#[tokio::test]
async fn basic_turn_persists_user_then_assistant() {
    let (engine, store) = engine_with(vec![ScriptedClient::text_response("Hi!")]);
    let session = engine.create_session(NewSession::default()).unwrap();

    let response = engine
        .send_message(&session.id, "Hello", SendOptions::default())
        .await
        .unwrap();
    assert_eq!(response.content, "Hi!");
    assert_eq!(response.finish_reason, "stop");

    let session = store.get_session(&session.id).unwrap().unwrap();
    assert_eq!(session.message_count, 2);
    assert_eq!(session.title.as_deref(), Some("Hello"));

    let messages = store.list_messages(&session.id, 10, 0, None).unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, "user");
    assert_eq!(messages[0].content, "Hello");
    assert_eq!(messages[1].role, "assistant");
    assert_eq!(messages[1].content, "Hi!");
}

#[tokio::test]
async fn tool_loop_persists_the_full_sequence() {
    let tool_call = ToolCallRequest {
        id: "call_42".to_string(),
        name: "search_knowledge".to_string(),
        arguments: "{\"query\":\"x\"}".to_string(),
    };
    let first = ProviderResponse {
        content: String::new(),
        tool_calls: vec![tool_call],
        prompt_tokens: 10,
        completion_tokens: 5,
        finish_reason: Some("tool_calls".to_string()),
        ..Default::default()
    };
    let second = ProviderResponse {
        content: "Based on search…".to_string(),
        prompt_tokens: 20,
        completion_tokens: 7,
        finish_reason: Some("stop".to_string()),
        ..Default::default()
    };
    let (engine, store) = engine_with(vec![first, second]);
    let session = engine.create_session(NewSession::default()).unwrap();

    let response = engine
        .send_message(&session.id, "look up x", SendOptions::default())
        .await
        .unwrap();
    assert_eq!(response.content, "Based on search…");
    assert_eq!(response.finish_reason, "stop");
    assert_eq!(response.tool_calls.len(), 1);

    // Invariant: turn usage equals the sum across the loop's LLM calls.
    assert_eq!(response.usage.input_tokens, 30);
    assert_eq!(response.usage.output_tokens, 12);
    assert_eq!(response.usage.total_tokens, 42);

    let messages = store.list_messages(&session.id, 10, 0, None).unwrap();
    let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
    assert_eq!(roles, ["user", "assistant", "tool", "assistant"]);

    // The intermediate assistant message carries the tool calls.
    assert_eq!(messages[1].tool_calls.len(), 1);
    assert_eq!(messages[1].tool_calls[0].name, "search_knowledge");

    // The tool message echoes the call id and carries the serialized result.
    assert_eq!(messages[2].tool_call_id.as_deref(), Some("call_42"));
    assert!(messages[2].content.contains("knowledge about x"));
    assert!(messages[2].content.contains("\"success\":true"));

    assert_eq!(messages[3].content, "Based on search…");
}

#[tokio::test]
async fn unknown_tool_is_reported_back_to_the_model() {
    let tool_call = ToolCallRequest {
        id: "call_9".to_string(),
        name: "no_such_tool".to_string(),
        arguments: "{}".to_string(),
    };
    let first = ProviderResponse {
        tool_calls: vec![tool_call],
        finish_reason: Some("tool_calls".to_string()),
        ..Default::default()
    };
    let second = ScriptedClient::text_response("recovered");
    let (engine, store) = engine_with(vec![first, second]);
    let session = engine.create_session(NewSession::default()).unwrap();

    let response = engine
        .send_message(&session.id, "try it", SendOptions::default())
        .await
        .unwrap();
    assert_eq!(response.content, "recovered");

    let messages = store.list_messages(&session.id, 10, 0, None).unwrap();
    let tool_message = messages.iter().find(|m| m.role == "tool").unwrap();
    assert!(tool_message.content.contains("\"success\":false"));
    assert!(tool_message.content.contains("unknown tool"));
}

#[tokio::test]
async fn streaming_turn_emits_start_content_end() {
    let (engine, store) = engine_with(vec![ScriptedClient::text_response("Hi!")]);
    let session = engine.create_session(NewSession::default()).unwrap();

    let mut rx = engine
        .send_message_stream(&session.id, "Hello", SendOptions::default())
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    assert!(matches!(events.first(), Some(StreamEvent::StreamStart { .. })));
    let content: String = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Content { delta } => Some(delta.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(content, "Hi!");
    assert!(matches!(events.last(), Some(StreamEvent::StreamEnd { .. })));

    // Persistence mirrors the non-streaming turn.
    let messages = store.list_messages(&session.id, 10, 0, None).unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].content, "Hi!");
    let session = store.get_session(&session.id).unwrap().unwrap();
    assert_eq!(session.message_count, 2);
}

#[tokio::test]
async fn streaming_tool_loop_emits_tool_frames() {
    let tool_call = ToolCallRequest {
        id: "call_7".to_string(),
        name: "search_knowledge".to_string(),
        arguments: "{\"query\":\"rust\"}".to_string(),
    };
    let first = ProviderResponse {
        tool_calls: vec![tool_call],
        finish_reason: Some("tool_calls".to_string()),
        ..Default::default()
    };
    let second = ScriptedClient::text_response("All done.");
    let (engine, store) = engine_with(vec![first, second]);
    let session = engine.create_session(NewSession::default()).unwrap();

    let mut rx = engine
        .send_message_stream(&session.id, "search rust", SendOptions::default())
        .await
        .unwrap();
    let mut saw_tool_call = false;
    let mut saw_tool_result = false;
    while let Some(event) = rx.recv().await {
        match event {
            StreamEvent::ToolCall { name, .. } => {
                assert_eq!(name, "search_knowledge");
                saw_tool_call = true;
            }
            StreamEvent::ToolResult { success, .. } => {
                assert!(success);
                saw_tool_result = true;
            }
            _ => {}
        }
    }
    assert!(saw_tool_call);
    assert!(saw_tool_result);

    let messages = store.list_messages(&session.id, 10, 0, None).unwrap();
    let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
    assert_eq!(roles, ["user", "assistant", "tool", "assistant"]);
}

#[tokio::test]
async fn ended_sessions_refuse_turns() {
    let (engine, _store) = engine_with(vec![ScriptedClient::text_response("unused")]);
    let session = engine.create_session(NewSession::default()).unwrap();
    engine.end_session(&session.id).unwrap();

    let err = engine
        .send_message(&session.id, "anyone there?", SendOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind_label(), "session_ended");
}

#[tokio::test]
async fn unknown_sessions_are_not_found() {
    let (engine, _store) = engine_with(vec![]);
    let err = engine
        .send_message("does-not-exist", "hello", SendOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn control_characters_are_stripped_before_persistence() {
    let (engine, store) = engine_with(vec![ScriptedClient::text_response("clean")]);
    let session = engine.create_session(NewSession::default()).unwrap();

    engine
        .send_message(&session.id, "hi\u{0000}the\u{001f}re", SendOptions::default())
        .await
        .unwrap();

    let messages = store.list_messages(&session.id, 10, 0, None).unwrap();
    assert_eq!(messages[0].content, "hithere");
}

#[tokio::test]
async fn llm_errors_leave_user_message_persisted() {
    // Empty script: the first gateway call fails.
    let (engine, store) = engine_with(vec![]);
    let session = engine.create_session(NewSession::default()).unwrap();

    let err = engine
        .send_message(&session.id, "hello?", SendOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 503);

    let messages = store.list_messages(&session.id, 10, 0, None).unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, "user");
}
