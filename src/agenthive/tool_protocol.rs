//! Tool declaration and dispatch layer.
//!
//! Agents gain capabilities through a [`ToolRegistry`]: a set of named tools,
//! each declared with a JSON-schema parameter description and backed by a
//! [`ToolExecutor`] implementation.
//!
//! # Architecture
//!
//! ```text
//! ChatEngine → ToolRegistry → ToolExecutor (calculator, clock, custom, ...)
//!                 │
//!                 └─ descriptors_for_llm() → Gateway → provider `tools` array
//! ```
//!
//! Execution failures never escape the registry as panics or engine errors:
//! the chat loop reports them back to the model as failed [`ToolResult`]s so
//! the model can react.
//!
//! # Example
//!
//! ```rust,no_run
//! use agenthive::tool_protocol::{ToolMetadata, ToolParameter, ToolParameterType, ToolRegistry};
//! use agenthive::tools::Calculator;
//! use std::sync::Arc;
//!
//! let mut registry = ToolRegistry::new();
//! registry.register(
//!     ToolMetadata::new("calculator", "Evaluates a mathematical expression.")
//!         .with_parameter(
//!             ToolParameter::new("expression", ToolParameterType::String)
//!                 .with_description("The expression to evaluate")
//!                 .required(),
//!         ),
//!     Arc::new(Calculator::new()),
//! );
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::agenthive::client::ToolSpec;

/// Defines the type of a tool parameter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ToolParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ToolParameterType {
    fn json_schema_name(&self) -> &'static str {
        match self {
            ToolParameterType::String => "string",
            ToolParameterType::Number => "number",
            ToolParameterType::Integer => "integer",
            ToolParameterType::Boolean => "boolean",
            ToolParameterType::Array => "array",
            ToolParameterType::Object => "object",
        }
    }
}

/// A single declared parameter of a tool.
#[derive(Debug, Clone)]
pub struct ToolParameter {
    pub name: String,
    pub param_type: ToolParameterType,
    pub description: Option<String>,
    pub required: bool,
}

impl ToolParameter {
    /// Declare a parameter of the given name and type (optional by default).
    pub fn new(name: impl Into<String>, param_type: ToolParameterType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: None,
            required: false,
        }
    }

    /// Attach a human-readable description (builder pattern).
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark the parameter as required (builder pattern).
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Identity and parameter declaration of a tool.
#[derive(Debug, Clone)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

impl ToolMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    /// Add a parameter declaration (builder pattern).
    pub fn with_parameter(mut self, param: ToolParameter) -> Self {
        self.parameters.push(param);
        self
    }

    /// Render the declaration in the shape the gateway passes to the model.
    pub fn to_tool_spec(&self) -> ToolSpec {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for param in &self.parameters {
            let mut schema = serde_json::Map::new();
            schema.insert(
                "type".to_string(),
                serde_json::Value::String(param.param_type.json_schema_name().to_string()),
            );
            if let Some(description) = &param.description {
                schema.insert(
                    "description".to_string(),
                    serde_json::Value::String(description.clone()),
                );
            }
            properties.insert(param.name.clone(), serde_json::Value::Object(schema));
            if param.required {
                required.push(serde_json::Value::String(param.name.clone()));
            }
        }
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters_schema: serde_json::json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }
}

/// The outcome of one tool invocation, in the shape the chat loop feeds back
/// to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The provider-assigned call id this result answers.
    pub tool_call_id: String,
    /// Tool name.
    pub name: String,
    /// Free-form or JSON-encoded result content.
    pub content: String,
    /// Whether the execution succeeded.
    pub success: bool,
    /// Execution wall-clock time, milliseconds.
    pub duration_ms: u64,
}

/// Error types for tool registration and execution.
#[derive(Debug, Clone)]
pub enum ToolError {
    /// No tool of that name is registered.
    UnknownTool(String),
    /// The arguments did not parse or did not match the declared schema.
    InvalidArguments { tool: String, detail: String },
    /// The tool ran and failed.
    ExecutionFailed(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::UnknownTool(name) => write!(f, "unknown tool: {}", name),
            ToolError::InvalidArguments { tool, detail } => {
                write!(f, "invalid arguments for '{}': {}", tool, detail)
            }
            ToolError::ExecutionFailed(msg) => write!(f, "tool execution failed: {}", msg),
        }
    }
}

impl std::error::Error for ToolError {}

/// Capability handed to tools at dispatch time so they can issue sub-queries
/// through the engine without holding a reference back to it.
#[async_trait]
pub trait SubqueryCapability: Send + Sync {
    /// Run a nested prompt in the given session and return the reply text.
    async fn subquery(&self, session_id: &str, prompt: &str) -> Result<String, String>;
}

/// Per-dispatch context passed to every [`ToolExecutor::execute`] call.
///
/// The engine capability, when present, is borrowed for the duration of the
/// dispatch only; executors must not store it.
#[derive(Clone, Default)]
pub struct ToolInvocation {
    /// The provider-assigned call id.
    pub tool_call_id: String,
    /// The session the invoking turn belongs to, when there is one.
    pub session_id: Option<String>,
    /// Engine sub-query capability, when the dispatcher grants it.
    pub engine: Option<Arc<dyn SubqueryCapability>>,
}

/// Implementation side of a tool.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute with the parsed JSON arguments, returning a JSON result.
    async fn execute(
        &self,
        arguments: serde_json::Value,
        invocation: &ToolInvocation,
    ) -> Result<serde_json::Value, ToolError>;
}

struct RegisteredTool {
    metadata: ToolMetadata,
    executor: Arc<dyn ToolExecutor>,
}

/// Holds the declared tools and dispatches invocations by name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    order: Vec<String>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a tool.
    pub fn register(&mut self, metadata: ToolMetadata, executor: Arc<dyn ToolExecutor>) {
        let name = metadata.name.clone();
        if self.tools.insert(name.clone(), RegisteredTool { metadata, executor }).is_none() {
            self.order.push(name);
        }
    }

    /// Remove a tool by name.
    pub fn remove(&mut self, name: &str) -> bool {
        self.order.retain(|n| n != name);
        self.tools.remove(name).is_some()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// True when no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Look up a tool's declaration.
    pub fn metadata(&self, name: &str) -> Option<&ToolMetadata> {
        self.tools.get(name).map(|t| &t.metadata)
    }

    /// The declarations in the shape the gateway passes to the model, in
    /// registration order.
    pub fn descriptors_for_llm(&self) -> Vec<ToolSpec> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.metadata.to_tool_spec())
            .collect()
    }

    /// Dispatch one invocation.
    ///
    /// Unknown names and malformed argument JSON surface as `Err(ToolError)`;
    /// the chat loop converts those into failed [`ToolResult`]s for the model
    /// rather than aborting the turn.
    pub async fn execute(
        &self,
        tool_call_id: &str,
        name: &str,
        arguments_json: &str,
        invocation: &ToolInvocation,
    ) -> Result<ToolResult, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        let arguments: serde_json::Value = if arguments_json.trim().is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(arguments_json).map_err(|e| ToolError::InvalidArguments {
                tool: name.to_string(),
                detail: e.to_string(),
            })?
        };

        let started = Instant::now();
        let outcome = tool.executor.execute(arguments, invocation).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(output) => Ok(ToolResult {
                tool_call_id: tool_call_id.to_string(),
                name: name.to_string(),
                content: output.to_string(),
                success: true,
                duration_ms,
            }),
            Err(err) => Ok(ToolResult {
                tool_call_id: tool_call_id.to_string(),
                name: name.to_string(),
                content: err.to_string(),
                success: false,
                duration_ms,
            }),
        }
    }
}
