//! Built-in tools registered by the engine by default.

pub mod calculator;
pub mod clock;

pub use calculator::Calculator;
pub use clock::Clock;

use std::sync::Arc;

use crate::agenthive::tool_protocol::{
    ToolMetadata, ToolParameter, ToolParameterType, ToolRegistry,
};

/// Register the built-in tool set on a registry.
pub fn register_builtin_tools(registry: &mut ToolRegistry) {
    registry.register(
        ToolMetadata::new(
            "calculator",
            "Evaluates a mathematical expression and returns the numeric result.",
        )
        .with_parameter(
            ToolParameter::new("expression", ToolParameterType::String)
                .with_description("The expression to evaluate, e.g. \"2 + 2 * 3\"")
                .required(),
        ),
        Arc::new(Calculator::new()),
    );
    registry.register(
        ToolMetadata::new("current_time", "Returns the current UTC date and time."),
        Arc::new(Clock),
    );
}
