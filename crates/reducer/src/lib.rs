//! Pure fold over the agent event stream into UI-oriented message state.
//!
//! `ReducerState::ingest` is deterministic: the same state plus the same
//! event always produces the same next state. State is mutated in place
//! (the idiomatic Rust shape for a fold that callers keep long-lived)
//! rather than returned as a fresh immutable value each call.

use std::collections::HashMap;

use ok_domain::event::{AgentEvent, RunStatusEvent};
use ok_domain::stream::Usage;
use ok_domain::ui::{Phase, ToolCallResult, UiMessage, UiToolCall};

const MAX_STREAM_LOG_CHUNKS: usize = 400;
const MAX_STREAM_LOG_CHARS: usize = 120_000;
const MAX_RESULT_CHARS: usize = 80_000;
const TRUNCATION_SENTINEL: &str = "...[truncated]";

/// Merge a text delta against the accumulated text. Providers ship either
/// incremental chunks or cumulative snapshots; this distinguishes them
/// without provider-specific knowledge.
pub fn merge_text_delta(current: &str, incoming: &str) -> String {
    if incoming.is_empty() {
        return current.to_string();
    }
    if incoming == current {
        return current.to_string();
    }
    if incoming.starts_with(current) {
        return incoming.to_string();
    }
    if current.starts_with(incoming) {
        return current.to_string();
    }
    format!("{current}{incoming}")
}

#[derive(Debug, Clone, Copy)]
struct Locator {
    message_index: usize,
    tool_index: usize,
}

/// State folded by the reducer: the rendered message list plus the
/// locator tables that let out-of-order tool events find their home.
#[derive(Debug, Default)]
pub struct ReducerState {
    messages: Vec<UiMessage>,
    message_index: HashMap<String, usize>,
    call_locator: HashMap<String, Locator>,
    error: Option<String>,
    streaming: bool,
    last_usage: Option<Usage>,
    next_seq: u64,
}

impl ReducerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[UiMessage] {
        &self.messages
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn last_usage(&self) -> Option<&Usage> {
        self.last_usage.as_ref()
    }

    /// At most one assistant message may have `phase == Streaming` at a
    /// time; exposed so callers (and tests) can check the invariant.
    pub fn streaming_assistant_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| matches!(m, UiMessage::Assistant { phase: Phase::Streaming, .. }))
            .count()
    }

    fn fresh_id(&mut self, prefix: &str) -> String {
        let id = format!("{prefix}-{}-{}", chrono::Utc::now().timestamp_millis(), self.next_seq);
        self.next_seq += 1;
        id
    }

    /// Resolve (or create) the assistant message a text/tool event targets.
    fn resolve_assistant(&mut self, msg_id: Option<&str>) -> usize {
        if let Some(id) = msg_id {
            if let Some(&idx) = self.message_index.get(id) {
                return idx;
            }
        }
        if let Some(UiMessage::Assistant { phase, content, .. }) = self.messages.last() {
            let reusable = *phase == Phase::Streaming || (*phase == Phase::Completed && content.is_empty());
            if reusable {
                return self.messages.len() - 1;
            }
        }
        let id = msg_id.map(str::to_string).unwrap_or_else(|| self.fresh_id("text"));
        self.messages.push(UiMessage::Assistant {
            id: id.clone(),
            content: String::new(),
            reasoning: None,
            tool_calls: Vec::new(),
            phase: Phase::Streaming,
        });
        let idx = self.messages.len() - 1;
        self.message_index.insert(id, idx);
        idx
    }

    fn assistant_mut(
        &mut self,
        idx: usize,
    ) -> (&mut String, &mut Option<String>, &mut Vec<UiToolCall>, &mut Phase) {
        match &mut self.messages[idx] {
            UiMessage::Assistant { content, reasoning, tool_calls, phase, .. } => {
                (content, reasoning, tool_calls, phase)
            }
            _ => unreachable!("resolve_assistant only ever returns assistant message indices"),
        }
    }

    /// Fold one event into the state. Events referencing an unknown
    /// `callId` without a `msgId`, or carrying empty required identifying
    /// fields, are dropped — the state is returned unchanged.
    pub fn ingest(&mut self, event: AgentEvent) {
        match event {
            AgentEvent::TextStart { msg_id, text } => self.apply_text(msg_id.as_deref(), &text, false),
            AgentEvent::TextDelta { msg_id, text } => self.apply_text(msg_id.as_deref(), &text, false),
            AgentEvent::TextComplete { msg_id, text } => self.apply_text(msg_id.as_deref(), &text, true),

            AgentEvent::ReasoningStart { msg_id, text } => self.apply_reasoning(msg_id.as_deref(), &text),
            AgentEvent::ReasoningDelta { msg_id, text } => self.apply_reasoning(msg_id.as_deref(), &text),
            AgentEvent::ReasoningComplete { msg_id, text } => self.apply_reasoning(msg_id.as_deref(), &text),

            AgentEvent::ToolCallCreated { msg_id, calls } => {
                if calls.is_empty() {
                    return;
                }
                let idx = self.resolve_assistant(msg_id.as_deref());
                let (_, _, tool_calls, _) = self.assistant_mut(idx);
                for call in calls {
                    if call.call_id.is_empty() {
                        continue;
                    }
                    if let Some(loc) = self.call_locator.get(&call.call_id) {
                        if let UiMessage::Assistant { tool_calls, .. } = &mut self.messages[loc.message_index] {
                            if let Some(tc) = tool_calls.get_mut(loc.tool_index) {
                                tc.tool_name = call.tool_name;
                                tc.args = call.arguments;
                                continue;
                            }
                        }
                    }
                    let tool_index = tool_calls.len();
                    tool_calls.push(UiToolCall::new(call.call_id.clone(), call.tool_name, call.arguments));
                    self.call_locator.insert(
                        call.call_id,
                        Locator { message_index: idx, tool_index },
                    );
                }
            }

            AgentEvent::ToolCallStream { call_id, output } => {
                if call_id.is_empty() {
                    return;
                }
                let Some(loc) = self.call_locator.get(&call_id).copied() else {
                    return;
                };
                if let UiMessage::Assistant { tool_calls, .. } = &mut self.messages[loc.message_index] {
                    if let Some(tc) = tool_calls.get_mut(loc.tool_index) {
                        tc.stream_logs.push(output);
                        cap_stream_logs(&mut tc.stream_logs);
                    }
                }
                self.streaming = true;
            }

            AgentEvent::ToolCallResult { call_id, status, result } => {
                if call_id.is_empty() {
                    return;
                }
                let Some(loc) = self.call_locator.get(&call_id).copied() else {
                    return;
                };
                let output = serde_json::to_string(&result).unwrap_or_else(|_| result.to_string());
                let output = truncate_result(&output);
                if let UiMessage::Assistant { tool_calls, .. } = &mut self.messages[loc.message_index] {
                    if let Some(tc) = tool_calls.get_mut(loc.tool_index) {
                        tc.status = Some(status.clone());
                        tc.result = Some(ToolCallResult { output, status });
                    }
                }
                self.streaming = false;
            }

            AgentEvent::CodePatch { msg_id, path, diff, language } => {
                if path.is_empty() {
                    return;
                }
                let id = msg_id.unwrap_or_else(|| self.fresh_id("code"));
                self.messages.push(UiMessage::CodePatch { id, path, diff, language });
            }

            AgentEvent::UsageUpdate { usage } => {
                self.last_usage = Some(usage);
            }

            AgentEvent::Status { status } => {
                self.streaming = !status.is_terminal();
                if matches!(status, RunStatusEvent::Completed | RunStatusEvent::Failed) {
                    // Terminal completion also closes out any still-open
                    // streaming assistant message.
                    if let Some(UiMessage::Assistant { phase, .. }) = self.messages.last_mut() {
                        if *phase == Phase::Streaming {
                            *phase = Phase::Completed;
                        }
                    }
                }
            }

            AgentEvent::Error { message } => {
                if message.is_empty() {
                    return;
                }
                let id = self.fresh_id("error");
                self.messages.push(UiMessage::Error { id, error: message.clone(), phase: None });
                self.error = Some(message);
                self.streaming = false;
            }

            AgentEvent::SubagentEvent { task_id, subagent_type, child_session_id, event } => {
                if task_id.is_empty() {
                    return;
                }
                let id = self.fresh_id("subagent");
                self.messages.push(UiMessage::SubAgent {
                    id,
                    task_id,
                    subagent_type,
                    child_session_id,
                    event,
                });
            }
        }
    }

    fn apply_text(&mut self, msg_id: Option<&str>, text: &str, complete: bool) {
        let idx = self.resolve_assistant(msg_id);
        let (content, _, _, phase) = self.assistant_mut(idx);
        let mut merged = merge_text_delta(content, text);
        if complete && text.len() >= merged.len() {
            merged = text.to_string();
        }
        *content = merged;
        *phase = if complete { Phase::Completed } else { Phase::Streaming };
        self.streaming = !complete;
    }

    fn apply_reasoning(&mut self, msg_id: Option<&str>, text: &str) {
        let idx = self.resolve_assistant(msg_id);
        let (_, reasoning, _, _) = self.assistant_mut(idx);
        let current = reasoning.clone().unwrap_or_default();
        *reasoning = Some(merge_text_delta(&current, text));
    }

    /// Keep the last `keep_last` messages, rebuilding both locator tables.
    pub fn prune(&mut self, keep_last: usize) {
        if self.messages.len() <= keep_last {
            return;
        }
        let drop_count = self.messages.len() - keep_last;
        self.messages.drain(0..drop_count);
        self.message_index.clear();
        self.call_locator.clear();
        for (idx, msg) in self.messages.iter().enumerate() {
            self.message_index.insert(msg.id().to_string(), idx);
            if let UiMessage::Assistant { tool_calls, .. } = msg {
                for (tool_index, tc) in tool_calls.iter().enumerate() {
                    self.call_locator
                        .insert(tc.call_id.clone(), Locator { message_index: idx, tool_index });
                }
            }
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }
}

fn cap_stream_logs(logs: &mut Vec<String>) {
    while logs.len() > MAX_STREAM_LOG_CHUNKS {
        logs.remove(0);
    }
    let mut total: usize = logs.iter().map(|s| s.len()).sum();
    while total > MAX_STREAM_LOG_CHARS && !logs.is_empty() {
        total -= logs.remove(0).len();
    }
}

fn truncate_result(s: &str) -> String {
    if s.len() <= MAX_RESULT_CHARS {
        return s.to_string();
    }
    let mut end = MAX_RESULT_CHARS;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &s[..end], TRUNCATION_SENTINEL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ok_domain::message::ToolCall;

    #[test]
    fn merge_text_delta_laws() {
        assert_eq!(merge_text_delta("abc", ""), "abc");
        assert_eq!(merge_text_delta("", "xyz"), "xyz");
        assert_eq!(merge_text_delta("abc", "abc"), "abc");
        assert_eq!(merge_text_delta("ab", "abcd"), "abcd");
        assert_eq!(merge_text_delta("abcd", "ab"), "abcd");
        assert_eq!(merge_text_delta("ab", "cd"), "abcd");
    }

    #[test]
    fn reset_yields_fresh_state() {
        let mut s = ReducerState::new();
        s.ingest(AgentEvent::TextDelta { msg_id: None, text: "hi".into() });
        s.reset();
        assert!(s.messages().is_empty());
        assert!(!s.is_streaming());
    }

    #[test]
    fn zero_events_yields_empty_state() {
        let s = ReducerState::new();
        assert!(s.messages().is_empty());
        assert!(s.error().is_none());
    }

    /// S1 — text stream with tool call.
    #[test]
    fn scenario_s1_text_stream_with_tool_call() {
        let mut s = ReducerState::new();
        s.ingest(AgentEvent::TextStart { msg_id: Some("m1".into()), text: "".into() });
        s.ingest(AgentEvent::TextDelta { msg_id: Some("m1".into()), text: "Hel".into() });
        s.ingest(AgentEvent::TextDelta { msg_id: Some("m1".into()), text: "lo".into() });
        s.ingest(AgentEvent::TextComplete { msg_id: Some("m1".into()), text: "".into() });
        s.ingest(AgentEvent::ToolCallCreated {
            msg_id: Some("m1".into()),
            calls: vec![ToolCall {
                call_id: "c1".into(),
                tool_name: "lookup".into(),
                arguments: serde_json::json!({"q": "x"}),
            }],
        });
        s.ingest(AgentEvent::ToolCallStream { call_id: "c1".into(), output: "line-1".into() });
        s.ingest(AgentEvent::ToolCallResult {
            call_id: "c1".into(),
            status: "success".into(),
            result: serde_json::json!({"ok": true}),
        });

        assert_eq!(s.messages().len(), 1);
        match &s.messages()[0] {
            UiMessage::Assistant { content, phase, tool_calls, .. } => {
                assert_eq!(content, "Hello");
                assert_eq!(*phase, Phase::Completed);
                assert_eq!(tool_calls.len(), 1);
                let tc = &tool_calls[0];
                assert_eq!(tc.stream_logs, vec!["line-1".to_string()]);
                let result = tc.result.as_ref().unwrap();
                assert_eq!(result.output, "{\"ok\":true}");
                assert_eq!(result.status, "success");
            }
            other => panic!("expected assistant message, got {other:?}"),
        }
    }

    #[test]
    fn at_most_one_streaming_assistant() {
        let mut s = ReducerState::new();
        s.ingest(AgentEvent::TextStart { msg_id: Some("m1".into()), text: "a".into() });
        s.ingest(AgentEvent::TextComplete { msg_id: Some("m1".into()), text: "a".into() });
        s.ingest(AgentEvent::TextStart { msg_id: Some("m2".into()), text: "b".into() });
        assert_eq!(s.streaming_assistant_count(), 1);
    }

    #[test]
    fn unknown_call_id_without_msg_id_is_dropped() {
        let mut s = ReducerState::new();
        s.ingest(AgentEvent::ToolCallStream { call_id: "ghost".into(), output: "x".into() });
        assert!(s.messages().is_empty());
    }

    #[test]
    fn error_event_sets_and_clear_error_resets() {
        let mut s = ReducerState::new();
        s.ingest(AgentEvent::Error { message: "boom".into() });
        assert_eq!(s.error(), Some("boom"));
        assert_eq!(s.messages().len(), 1);
        s.clear_error();
        assert!(s.error().is_none());
        // clearError does not touch messages.
        assert_eq!(s.messages().len(), 1);
    }

    #[test]
    fn stream_log_caps_drop_from_front() {
        let mut s = ReducerState::new();
        s.ingest(AgentEvent::ToolCallCreated {
            msg_id: Some("m1".into()),
            calls: vec![ToolCall {
                call_id: "c1".into(),
                tool_name: "exec".into(),
                arguments: serde_json::json!({}),
            }],
        });
        for i in 0..500 {
            s.ingest(AgentEvent::ToolCallStream { call_id: "c1".into(), output: format!("line-{i}") });
        }
        match &s.messages()[0] {
            UiMessage::Assistant { tool_calls, .. } => {
                assert!(tool_calls[0].stream_logs.len() <= 400);
                assert_eq!(tool_calls[0].stream_logs.last().unwrap(), "line-499");
            }
            _ => panic!("expected assistant"),
        }
    }

    #[test]
    fn truncation_boundary_exact_limit_does_not_truncate() {
        let s = "a".repeat(MAX_RESULT_CHARS);
        assert_eq!(truncate_result(&s), s);
        let s2 = "a".repeat(MAX_RESULT_CHARS + 1);
        assert!(truncate_result(&s2).ends_with(TRUNCATION_SENTINEL));
    }

    #[test]
    fn subagent_event_is_passthrough() {
        let mut s = ReducerState::new();
        s.ingest(AgentEvent::SubagentEvent {
            task_id: "t1".into(),
            subagent_type: "reviewer".into(),
            child_session_id: "child-1".into(),
            event: serde_json::json!({"type": "text_delta", "text": "hi"}),
        });
        assert_eq!(s.messages().len(), 1);
        assert!(matches!(s.messages()[0], UiMessage::SubAgent { .. }));
    }

    #[test]
    fn prune_rebuilds_locators() {
        let mut s = ReducerState::new();
        s.ingest(AgentEvent::TextStart { msg_id: Some("m1".into()), text: "a".into() });
        s.ingest(AgentEvent::TextComplete { msg_id: Some("m1".into()), text: "a".into() });
        s.ingest(AgentEvent::ToolCallCreated {
            msg_id: Some("m2".into()),
            calls: vec![ToolCall { call_id: "c1".into(), tool_name: "t".into(), arguments: serde_json::json!({}) }],
        });
        s.prune(1);
        assert_eq!(s.messages().len(), 1);
        s.ingest(AgentEvent::ToolCallStream { call_id: "c1".into(), output: "x".into() });
        match &s.messages()[0] {
            UiMessage::Assistant { tool_calls, .. } => assert_eq!(tool_calls[0].stream_logs, vec!["x".to_string()]),
            _ => panic!("expected assistant"),
        }
    }
}
