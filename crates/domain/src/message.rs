use serde::{Deserialize, Serialize};

/// Internal tool call format (provider-agnostic).
/// Every provider adapter converts its own wire format to/from this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

/// Tool definition exposed to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

/// The `type` discriminant on a session-log message. Named `kind` in Rust to
/// avoid shadowing the keyword; serializes as `type` per the wire schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    Text,
    ToolCall,
    ToolResult,
    Summary,
}

/// Token accounting attached to a completion, when the provider reports it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MessageUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    #[serde(default)]
    pub cache_hit: u32,
    #[serde(default)]
    pub cache_miss: u32,
}

/// A single entry in a session's ordered message log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub role: Role,
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Set when `role == Tool`; must match a `call_id` of a strictly-earlier
    /// tool-call message in the same session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<MessageKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<MessageUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
}

impl Message {
    pub fn system(message_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::plain(message_id, Role::System, text)
    }

    pub fn user(message_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::plain(message_id, Role::User, text)
    }

    pub fn assistant(message_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::plain(message_id, Role::Assistant, text)
    }

    pub fn tool_result(
        message_id: impl Into<String>,
        tool_call_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            role: Role::Tool,
            content: MessageContent::Text(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
            finish_reason: None,
            kind: Some(MessageKind::ToolResult),
            usage: None,
            reasoning_content: None,
        }
    }

    fn plain(message_id: impl Into<String>, role: Role, text: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            role,
            content: MessageContent::Text(text.into()),
            tool_calls: None,
            tool_call_id: None,
            finish_reason: None,
            kind: Some(MessageKind::Text),
            usage: None,
            reasoning_content: None,
        }
    }

    /// True when this message declares one or more tool calls.
    pub fn is_tool_call(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|v| !v.is_empty())
    }
}

impl MessageContent {
    /// Extract the plain-text content (first text part, or the full text).
    pub fn text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(t) => Some(t.as_str()),
            MessageContent::Parts(parts) => parts.iter().find_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            }),
        }
    }

    /// Extract and join all text content, returning an owned String.
    pub fn extract_all_text(&self) -> String {
        match self {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_all_text_from_text_variant() {
        let content = MessageContent::Text("hello world".into());
        assert_eq!(content.extract_all_text(), "hello world");
    }

    #[test]
    fn extract_all_text_from_parts_joins_with_newline() {
        let content = MessageContent::Parts(vec![
            ContentPart::Text { text: "line one".into() },
            ContentPart::ToolUse {
                id: "c1".into(),
                name: "exec".into(),
                input: serde_json::json!({}),
            },
            ContentPart::Text { text: "line two".into() },
        ]);
        assert_eq!(content.extract_all_text(), "line one\nline two");
    }

    #[test]
    fn tool_result_carries_matching_call_id() {
        let m = Message::tool_result("msg-2", "c1", "ok");
        assert_eq!(m.tool_call_id.as_deref(), Some("c1"));
        assert_eq!(m.role, Role::Tool);
    }

    #[test]
    fn is_tool_call_detects_tool_calls() {
        let mut m = Message::assistant("m1", "");
        assert!(!m.is_tool_call());
        m.tool_calls = Some(vec![ToolCall {
            call_id: "c1".into(),
            tool_name: "lookup".into(),
            arguments: serde_json::json!({}),
        }]);
        assert!(m.is_tool_call());
    }
}
