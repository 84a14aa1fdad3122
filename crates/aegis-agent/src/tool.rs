// ABOUTME: Defines the Tool trait every agent implementation exposes, plus ToolError.
// ABOUTME: A tool takes named params and returns a result mapping; an `error` key marks a fault.

use async_trait::async_trait;
use serde_json::Value;

use aegis_core::Params;

/// Key whose presence in a result mapping marks a task-level fault.
pub const ERROR_KEY: &str = "error";

/// Errors a tool invocation can raise.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("{0}")]
    Failed(String),

    #[error("missing required parameter: {0}")]
    MissingParam(String),

    #[error("tool not configured: {0}")]
    Configuration(String),
}

/// Invocation contract implemented by every agent/tool adapter.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Implementation name for logging (e.g. "SlackAPI").
    fn name(&self) -> &str;

    /// Run the tool with named parameters and return its result mapping.
    async fn invoke(&self, params: Params) -> Result<Params, ToolError>;
}

/// The fault message carried by a result, if it has an `error` key.
pub fn fault_message(result: &Value) -> Option<String> {
    let error = result.as_object()?.get(ERROR_KEY)?;
    Some(match error {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

/// Result mapping for a raised fault: `{"error": message}`.
pub fn error_result(message: impl Into<String>) -> Params {
    let mut result = Params::new();
    result.insert(ERROR_KEY.to_string(), Value::String(message.into()));
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fault_message_reads_error_key() {
        assert_eq!(fault_message(&json!({"error": "boom"})), Some("boom".into()));
        assert_eq!(
            fault_message(&json!({"error": {"code": 7}})),
            Some("{\"code\":7}".into())
        );
        assert_eq!(fault_message(&json!({"ok": true})), None);
        assert_eq!(fault_message(&json!(["error"])), None);
    }

    #[test]
    fn error_result_round_trips_through_fault_message() {
        let result = Value::Object(error_result("tool exploded"));
        assert_eq!(fault_message(&result).as_deref(), Some("tool exploded"));
    }

    #[test]
    fn tool_error_display() {
        assert_eq!(ToolError::Failed("x".into()).to_string(), "x");
        assert!(
            ToolError::MissingParam("message".into())
                .to_string()
                .contains("message")
        );
    }
}
