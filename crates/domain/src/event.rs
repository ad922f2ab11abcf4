use serde::{Deserialize, Serialize};

use crate::message::ToolCall;
use crate::stream::Usage;

/// Coarse run-state carried by `STATUS` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatusEvent {
    Queued,
    Running,
    Completed,
    Failed,
    Aborted,
    Cancelled,
}

impl RunStatusEvent {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatusEvent::Queued | RunStatusEvent::Running)
    }
}

/// The closed event taxonomy consumed by the stream reducer. Events arrive
/// strictly ordered for a single session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    #[serde(rename = "text_start")]
    TextStart { msg_id: Option<String>, text: String },
    #[serde(rename = "text_delta")]
    TextDelta { msg_id: Option<String>, text: String },
    #[serde(rename = "text_complete")]
    TextComplete { msg_id: Option<String>, text: String },

    #[serde(rename = "reasoning_start")]
    ReasoningStart { msg_id: Option<String>, text: String },
    #[serde(rename = "reasoning_delta")]
    ReasoningDelta { msg_id: Option<String>, text: String },
    #[serde(rename = "reasoning_complete")]
    ReasoningComplete { msg_id: Option<String>, text: String },

    #[serde(rename = "tool_call_created")]
    ToolCallCreated {
        msg_id: Option<String>,
        calls: Vec<ToolCall>,
    },
    #[serde(rename = "tool_call_stream")]
    ToolCallStream {
        call_id: String,
        output: String,
    },
    #[serde(rename = "tool_call_result")]
    ToolCallResult {
        call_id: String,
        status: String,
        result: serde_json::Value,
    },

    #[serde(rename = "code_patch")]
    CodePatch {
        msg_id: Option<String>,
        path: String,
        diff: String,
        language: Option<String>,
    },

    #[serde(rename = "usage_update")]
    UsageUpdate { usage: Usage },

    #[serde(rename = "status")]
    Status { status: RunStatusEvent },

    #[serde(rename = "error")]
    Error { message: String },

    #[serde(rename = "subagent_event")]
    SubagentEvent {
        task_id: String,
        subagent_type: String,
        child_session_id: String,
        event: serde_json::Value,
    },
}
