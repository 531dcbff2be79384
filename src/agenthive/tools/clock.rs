//! Clock tool: current UTC time for time-aware agents.

use async_trait::async_trait;
use chrono::Utc;

use crate::agenthive::tool_protocol::{ToolError, ToolExecutor, ToolInvocation};

/// Returns the current UTC timestamp.
pub struct Clock;

#[async_trait]
impl ToolExecutor for Clock {
    async fn execute(
        &self,
        _arguments: serde_json::Value,
        _invocation: &ToolInvocation,
    ) -> Result<serde_json::Value, ToolError> {
        let now = Utc::now();
        Ok(serde_json::json!({
            "iso8601": now.to_rfc3339(),
            "unix": now.timestamp(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_both_formats() {
        let out = Clock
            .execute(serde_json::json!({}), &ToolInvocation::default())
            .await
            .unwrap();
        assert!(out["iso8601"].is_string());
        assert!(out["unix"].is_i64());
    }
}
