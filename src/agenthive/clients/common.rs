//! Shared plumbing for OpenAI-compatible wire clients.
//!
//! Holds the process-wide HTTP connection pool and the serde mirror of the
//! Chat Completions wire format.  Concrete clients (see
//! [`openai_compat`](crate::clients::openai_compat)) build requests out of
//! these types and share the pooled [`reqwest::Client`].

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::agenthive::client::{ChatMessage, Role, ToolCallRequest, ToolSpec};

lazy_static! {
    /// Shared HTTP client with persistent connection pooling.
    ///
    /// A single client instance keeps TLS sessions and DNS lookups warm, which
    /// significantly reduces latency when many concurrent requests are issued
    /// to upstream providers.
    static ref SHARED_HTTP_CLIENT: reqwest::Client = {
        reqwest::ClientBuilder::new()
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build shared HTTP client")
    };
}

/// Borrow the lazily initialised shared [`reqwest::Client`].
///
/// The returned reference can be cloned and reused by individual wire clients.
pub fn get_shared_http_client() -> &'static reqwest::Client {
    &SHARED_HTTP_CLIENT
}

// ---------------------------------------------------------------------------
// Wire format (OpenAI-compatible Chat Completions)
// ---------------------------------------------------------------------------

/// `messages[]` entry in the request body.
#[derive(Debug, Serialize)]
pub struct WireMessage {
    pub role: &'static str,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<WireToolCall>>,
}

/// `tool_calls[]` entry on assistant messages, and the mirror of the calls
/// the provider hands back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: WireFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireFunctionCall {
    pub name: String,
    pub arguments: String,
}

/// `tools[]` entry in the request body.
#[derive(Debug, Serialize)]
pub struct WireTool {
    #[serde(rename = "type")]
    pub tool_type: &'static str,
    pub function: WireToolFunction,
}

#[derive(Debug, Serialize)]
pub struct WireToolFunction {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Chat Completions request body.
#[derive(Debug, Serialize)]
pub struct WireChatRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

/// Non-streaming response body.
#[derive(Debug, Deserialize)]
pub struct WireChatResponse {
    #[serde(default)]
    pub choices: Vec<WireChoice>,
    #[serde(default)]
    pub usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
pub struct WireChoice {
    pub message: WireResponseMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WireResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
    /// Reasoning text, surfaced by providers that expose it as a separate field.
    #[serde(default)]
    pub reasoning_content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WireUsage {
    #[serde(default)]
    pub prompt_tokens: usize,
    #[serde(default)]
    pub completion_tokens: usize,
}

/// One SSE `data:` payload of a streaming response.
#[derive(Debug, Deserialize)]
pub struct WireStreamChunk {
    #[serde(default)]
    pub choices: Vec<WireStreamChoice>,
}

#[derive(Debug, Deserialize)]
pub struct WireStreamChoice {
    #[serde(default)]
    pub delta: WireDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WireDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<WireDeltaToolCall>>,
}

/// Fragment of a tool call inside a streaming delta.  The provider splits a
/// call across chunks and correlates the fragments by `index`.
#[derive(Debug, Deserialize)]
pub struct WireDeltaToolCall {
    pub index: usize,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<WireDeltaFunction>,
}

#[derive(Debug, Deserialize)]
pub struct WireDeltaFunction {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

/// Convert an engine [`ChatMessage`] into its wire shape.
pub fn to_wire_message(message: &ChatMessage) -> WireMessage {
    let tool_call_id = match &message.role {
        Role::Tool { call_id } => Some(call_id.clone()),
        _ => None,
    };
    let tool_calls = if message.tool_calls.is_empty() {
        None
    } else {
        Some(
            message
                .tool_calls
                .iter()
                .map(|tc| WireToolCall {
                    id: tc.id.clone(),
                    call_type: "function".to_string(),
                    function: WireFunctionCall {
                        name: tc.name.clone(),
                        arguments: tc.arguments.clone(),
                    },
                })
                .collect(),
        )
    };
    WireMessage {
        role: message.role.as_str(),
        content: message.content.to_string(),
        tool_call_id,
        tool_calls,
    }
}

/// Convert an engine [`ToolSpec`] into its wire shape.
pub fn to_wire_tool(spec: &ToolSpec) -> WireTool {
    WireTool {
        tool_type: "function",
        function: WireToolFunction {
            name: spec.name.clone(),
            description: spec.description.clone(),
            parameters: spec.parameters_schema.clone(),
        },
    }
}

/// Convert provider tool calls back into engine [`ToolCallRequest`]s.
pub fn from_wire_tool_calls(calls: Vec<WireToolCall>) -> Vec<ToolCallRequest> {
    calls
        .into_iter()
        .map(|c| ToolCallRequest {
            id: c.id,
            name: c.function.name,
            arguments: c.function.arguments,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agenthive::client::ChatMessage;

    #[test]
    fn tool_role_carries_call_id_on_the_wire() {
        let msg = ChatMessage::tool("call_1", "42");
        let wire = to_wire_message(&msg);
        assert_eq!(wire.role, "tool");
        assert_eq!(wire.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn assistant_tool_calls_serialize_as_function_entries() {
        let msg = ChatMessage::assistant("").with_tool_calls(vec![ToolCallRequest {
            id: "call_9".into(),
            name: "calculator".into(),
            arguments: "{\"expression\":\"2+2\"}".into(),
        }]);
        let wire = to_wire_message(&msg);
        let calls = wire.tool_calls.expect("tool calls present");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].call_type, "function");
        assert_eq!(calls[0].function.name, "calculator");
    }
}
