use serde::{Deserialize, Serialize};

/// `phase ∈ {streaming, completed}` on an assistant UI message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Streaming,
    Completed,
}

/// The result attached to a tool call once `TOOL_CALL_RESULT` arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub output: String,
    pub status: String,
}

/// One tool call surfaced on an assistant UI message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub args: serde_json::Value,
    /// Capped at 400 chunks / 120 000 chars; oldest chunks drop from front.
    pub stream_logs: Vec<String>,
    pub result: Option<ToolCallResult>,
    pub status: Option<String>,
    pub exit_code: Option<i32>,
}

impl UiToolCall {
    pub fn new(call_id: impl Into<String>, tool_name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            args,
            stream_logs: Vec::new(),
            result: None,
            status: None,
            exit_code: None,
        }
    }
}

/// Reducer output: one entry per rendered message. Identified by a stable
/// id; an `assistant` message's id equals the originating session message's
/// `messageId`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum UiMessage {
    #[serde(rename = "assistant")]
    Assistant {
        id: String,
        content: String,
        reasoning: Option<String>,
        tool_calls: Vec<UiToolCall>,
        phase: Phase,
    },
    #[serde(rename = "code_patch")]
    CodePatch {
        id: String,
        path: String,
        diff: String,
        language: Option<String>,
    },
    #[serde(rename = "error")]
    Error { id: String, error: String, phase: Option<Phase> },
    #[serde(rename = "system")]
    System { id: String, text: String },
    /// Passthrough wrapper for a nested run's re-emitted event stream.
    #[serde(rename = "subagent")]
    SubAgent {
        id: String,
        task_id: String,
        subagent_type: String,
        child_session_id: String,
        event: serde_json::Value,
    },
}

impl UiMessage {
    pub fn id(&self) -> &str {
        match self {
            UiMessage::Assistant { id, .. }
            | UiMessage::CodePatch { id, .. }
            | UiMessage::Error { id, .. }
            | UiMessage::System { id, .. }
            | UiMessage::SubAgent { id, .. } => id,
        }
    }
}
