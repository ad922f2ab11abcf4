use crate::context::ToolContext;
use crate::error_code::ToolErrorCode;

/// Outcome of a single tool invocation, pre-truncation.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolExecResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ToolErrorCode>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl ToolExecResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error: None,
            error_code: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(message.into()),
            error_code: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn err_code(code: ToolErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(message.into()),
            error_code: Some(code),
            metadata: serde_json::Value::Null,
        }
    }
}

/// Per-tool truncation preference, overriding the registry-wide default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncationPreference {
    KeepHead,
    KeepTail,
}

/// Something the agent runtime can dispatch a tool call to. Concrete tool
/// bodies (filesystem edits, shell exec, web fetch, ...) are out of scope
/// here; this crate only owns the registry, schema validation, timeout
/// enforcement and truncation middleware around whatever implements this
/// trait.
#[async_trait::async_trait]
pub trait ToolExecutor: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema describing the tool's arguments.
    fn schema(&self) -> serde_json::Value;

    /// Meta-tools that themselves block on other agents (`wait_for_messages`,
    /// `dispatch_task`) opt out of the registry's per-call timeout — they
    /// have their own, usually much longer, internal deadline.
    fn skip_timeout(&self) -> bool {
        false
    }

    fn truncation_preference(&self) -> TruncationPreference {
        TruncationPreference::KeepHead
    }

    async fn execute(&self, args: serde_json::Value, ctx: &ToolContext) -> ToolExecResult;
}
