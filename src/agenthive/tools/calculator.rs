//! Calculator tool backed by `evalexpr`.
//!
//! Supports arithmetic (`+`, `-`, `*`, `/`, `%`, `^`) and the builtin
//! functions `evalexpr` ships (`min`, `max`, `floor`, `ceil`, `round`,
//! `math::*`).  Results are coerced to a number; expressions run with no
//! variable context, so there is no state to leak between calls.

use async_trait::async_trait;

use crate::agenthive::tool_protocol::{ToolError, ToolExecutor, ToolInvocation};

/// Stateless expression evaluator.
pub struct Calculator;

impl Calculator {
    pub fn new() -> Self {
        Calculator
    }

    /// Evaluate an expression to a JSON number.
    pub fn evaluate(&self, expression: &str) -> Result<serde_json::Value, ToolError> {
        let value = evalexpr::eval(expression)
            .map_err(|e| ToolError::ExecutionFailed(format!("'{}': {}", expression, e)))?;
        match value.as_number() {
            Ok(n) => Ok(serde_json::json!(n)),
            Err(_) => Err(ToolError::ExecutionFailed(format!(
                "'{}' did not produce a number",
                expression
            ))),
        }
    }
}

impl Default for Calculator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for Calculator {
    async fn execute(
        &self,
        arguments: serde_json::Value,
        _invocation: &ToolInvocation,
    ) -> Result<serde_json::Value, ToolError> {
        let expression = arguments
            .get("expression")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments {
                tool: "calculator".to_string(),
                detail: "missing string field 'expression'".to_string(),
            })?;
        let result = self.evaluate(expression)?;
        Ok(serde_json::json!({ "expression": expression, "result": result }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn respects_operator_precedence() {
        let calc = Calculator::new();
        assert_eq!(calc.evaluate("2 + 2 * 3").unwrap(), serde_json::json!(8.0));
    }

    #[test]
    fn rejects_garbage() {
        let calc = Calculator::new();
        assert!(calc.evaluate("2 +* 3").is_err());
    }

    #[tokio::test]
    async fn tool_call_shape() {
        let calc = Calculator::new();
        let out = calc
            .execute(
                serde_json::json!({"expression": "10.0 / 4"}),
                &ToolInvocation::default(),
            )
            .await
            .unwrap();
        assert_eq!(out["result"], serde_json::json!(2.5));
    }
}
