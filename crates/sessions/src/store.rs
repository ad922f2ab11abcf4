//! Ordered conversational log used to construct LLM requests, with
//! token-budget-triggered compaction that preserves tool-call/tool-result
//! pairing across the archive/keep boundary.

use std::sync::Arc;

use ok_domain::compaction::{CompactionRecord, SessionConfig, TokenInfo};
use ok_domain::message::{Message, MessageKind, Role};
use ok_providers::traits::{ChatRequest, LlmProvider};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

const HEAD_CHARS: usize = 1000;
const TAIL_CHARS: usize = 500;
const LONG_LINE_THRESHOLD: usize = 2000;

pub struct SessionStore {
    session_id: String,
    config: SessionConfig,
    messages: RwLock<Vec<Message>>,
    compaction_records: RwLock<Vec<CompactionRecord>>,
    provider: Option<Arc<dyn LlmProvider>>,
    next_seq: std::sync::atomic::AtomicU64,
}

impl SessionStore {
    pub fn new(session_id: impl Into<String>, config: SessionConfig, provider: Option<Arc<dyn LlmProvider>>) -> Self {
        Self {
            session_id: session_id.into(),
            config,
            messages: RwLock::new(Vec::new()),
            compaction_records: RwLock::new(Vec::new()),
            provider,
            next_seq: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Appends unconditionally. Never triggers compaction itself.
    pub fn add_message(&self, msg: Message) {
        self.messages.write().push(msg);
    }

    /// The visible window, after any compaction that has happened so far.
    pub fn get_messages(&self) -> Vec<Message> {
        self.messages.read().clone()
    }

    pub fn compaction_records(&self) -> Vec<CompactionRecord> {
        self.compaction_records.read().clone()
    }

    pub fn get_token_info(&self) -> TokenInfo {
        let messages = self.messages.read();
        let estimated_total = estimate_total(&messages);
        let usable_limit = self.config.usable_limit();
        let threshold = self.config.threshold();
        TokenInfo {
            estimated_total,
            usable_limit,
            threshold,
            message_count: messages.len(),
            should_compact: estimated_total as f64 >= threshold,
        }
    }

    fn fresh_summary_id(&self) -> String {
        let n = self.next_seq.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        format!("summary-{}-{n}", chrono::Utc::now().timestamp_millis())
    }

    /// Returns `true` if compaction was performed. Leaves the log unchanged
    /// and returns `false` if compaction is disabled, no provider is
    /// configured, the log is below threshold, or the summarization request
    /// fails.
    pub async fn compact_before_llm_call(&self, cancel: Option<&CancellationToken>) -> bool {
        let Some(provider) = self.provider.as_ref() else {
            return false;
        };
        if !self.config.auto {
            return false;
        }
        if !self.get_token_info().should_compact {
            return false;
        }

        let (archive, boundary, keep_suffix_len) = {
            let messages = self.messages.read();
            if messages.is_empty() || messages[0].role != Role::System {
                return false;
            }
            let len = messages.len();
            let keep_n = self.config.keep_messages_num;
            let boundary = pair_repair_boundary(&messages, len.saturating_sub(keep_n).max(1));
            if boundary <= 1 {
                return false;
            }
            (messages[1..boundary].to_vec(), boundary, len - boundary)
        };

        if archive.is_empty() {
            return false;
        }

        if cancel.is_some_and(|c| c.is_cancelled()) {
            return false;
        }

        let prompt = build_conversation_text(&archive);
        let req = ChatRequest {
            messages: vec![
                Message::system("compaction-system", SUMMARY_SYSTEM_PROMPT),
                Message::user("compaction-user", prompt),
            ],
            tools: vec![],
            temperature: None,
            max_tokens: Some(self.config.max_output_tokens),
            model: None,
        };

        let summary_text = tokio::select! {
            resp = provider.chat(req) => match resp {
                Ok(r) => r.content,
                Err(e) => {
                    tracing::warn!(error = %e, session_id = %self.session_id, "compaction summary request failed, continuing with full history");
                    return false;
                }
            },
            _ = cancelled_or_pending(cancel) => return false,
        };

        let archived_message_ids: Vec<String> = archive.iter().map(|m| m.message_id.clone()).collect();
        let mut summary_msg = Message::assistant(self.fresh_summary_id(), summary_text);
        summary_msg.kind = Some(MessageKind::Summary);

        {
            let mut messages = self.messages.write();
            let mut rebuilt = Vec::with_capacity(2 + keep_suffix_len);
            rebuilt.push(messages[0].clone());
            rebuilt.push(summary_msg);
            rebuilt.extend(messages[boundary..].iter().cloned());
            *messages = rebuilt;
        }

        self.compaction_records.write().push(CompactionRecord {
            reason: "token_limit".to_string(),
            archived_message_ids,
            timestamp: chrono::Utc::now(),
        });

        true
    }
}

async fn cancelled_or_pending(cancel: Option<&CancellationToken>) {
    match cancel {
        Some(c) => c.cancelled().await,
        None => std::future::pending().await,
    }
}

const SUMMARY_SYSTEM_PROMPT: &str =
    "Summarize the following conversation history concisely, preserving any decisions, \
     file paths, and outstanding action items. This summary replaces the original \
     messages in the session log.";

fn estimate_total(messages: &[Message]) -> u32 {
    let anchor = messages
        .iter()
        .enumerate()
        .rev()
        .find_map(|(i, m)| m.usage.map(|u| (i, u.prompt_tokens)));

    match anchor {
        Some((idx, base)) => {
            let tail: u32 = messages[idx + 1..].iter().map(heuristic_tokens).sum();
            base + tail
        }
        None => messages.iter().map(heuristic_tokens).sum(),
    }
}

fn heuristic_tokens(m: &Message) -> u32 {
    let mut len = m.content.extract_all_text().len();
    if let Some(r) = &m.reasoning_content {
        len += r.len();
    }
    (len / 4) as u32
}

/// Starting from a raw boundary index (first index of the keep suffix),
/// walk it down until no tool-call/tool-result pair straddles it. Monotone
/// decreasing, bounded below by 1 (the system message never moves), so this
/// always terminates.
fn pair_repair_boundary(messages: &[Message], mut boundary: usize) -> usize {
    loop {
        let mut moved = false;

        if boundary < messages.len() {
            if let Some(call_id) = messages[boundary].tool_call_id.clone() {
                if let Some(idx) = find_tool_call_index(messages, &call_id, boundary) {
                    if idx < boundary {
                        boundary = idx;
                        moved = true;
                    }
                }
            }
        }

        if boundary > 1 {
            let last_archived = &messages[boundary - 1];
            if let Some(calls) = &last_archived.tool_calls {
                let result_in_suffix = calls.iter().any(|c| {
                    messages[boundary..]
                        .iter()
                        .any(|m| m.tool_call_id.as_deref() == Some(c.call_id.as_str()))
                });
                if result_in_suffix {
                    boundary = boundary - 1;
                    moved = true;
                }
            }
        }

        if !moved {
            return boundary;
        }
    }
}

fn find_tool_call_index(messages: &[Message], call_id: &str, before: usize) -> Option<usize> {
    messages[..before].iter().position(|m| {
        m.tool_calls
            .as_ref()
            .is_some_and(|calls| calls.iter().any(|c| c.call_id == call_id))
    })
}

fn build_conversation_text(messages: &[Message]) -> String {
    messages
        .iter()
        .map(render_line)
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_line(m: &Message) -> String {
    let mut text = m.content.extract_all_text();
    if text.is_empty() {
        if let Some(r) = &m.reasoning_content {
            text = r.clone();
        }
    }
    let role = format!("{:?}", m.role).to_lowercase();
    let body = if text.len() > LONG_LINE_THRESHOLD {
        let mut head_end = HEAD_CHARS;
        while !text.is_char_boundary(head_end) {
            head_end -= 1;
        }
        let mut tail_start = text.len() - TAIL_CHARS;
        while !text.is_char_boundary(tail_start) {
            tail_start += 1;
        }
        format!("{}... [truncated] ...{}", &text[..head_end], &text[tail_start..])
    } else {
        text
    };
    format!("[{role}] {body}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ok_domain::message::{MessageUsage, ToolCall};
    use ok_providers::scripted::ScriptedProvider;
    use ok_providers::traits::ChatResponse;

    fn usage(prompt: u32) -> MessageUsage {
        MessageUsage { prompt_tokens: prompt, completion_tokens: 0, total_tokens: prompt, cache_hit: 0, cache_miss: 0 }
    }

    fn config() -> SessionConfig {
        SessionConfig { max_tokens: 260, max_output_tokens: 120, trigger_ratio: 0.9, keep_messages_num: 3, auto: true }
    }

    /// S5 — compaction with tool pair.
    #[tokio::test]
    async fn scenario_s5_compaction_preserves_tool_pair() {
        let provider = Arc::new(ScriptedProvider::new("scripted"));
        provider.push_chat(ChatResponse {
            content: "recap of the archived turns".into(),
            tool_calls: vec![],
            usage: None,
            model: "m".into(),
            finish_reason: Some("stop".into()),
        });

        let store = SessionStore::new("s1", config(), Some(provider.clone() as Arc<dyn LlmProvider>));
        store.add_message(Message::system("system", "you are an agent"));
        store.add_message(Message::user("user-1", "do the thing"));

        let mut assistant_call = Message::assistant("assistant-call", "");
        assistant_call.tool_calls = Some(vec![ToolCall {
            call_id: "c1".into(),
            tool_name: "lookup".into(),
            arguments: serde_json::json!({}),
        }]);
        assistant_call.usage = Some(usage(220));
        store.add_message(assistant_call);

        store.add_message(Message::tool_result("tool-result-1", "c1", "ok"));
        store.add_message(Message::user("user-2", "now do the next thing"));

        let mut assistant_2 = Message::assistant("assistant-2", "sure, working on it");
        assistant_2.usage = Some(usage(500));
        store.add_message(assistant_2);

        let compacted = store.compact_before_llm_call(None).await;
        assert!(compacted);

        let messages = store.get_messages();
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].kind, Some(MessageKind::Summary));

        // The tool-call/tool-result pair must land together, never split.
        let call_idx = messages.iter().position(|m| m.message_id == "assistant-call");
        let result_idx = messages.iter().position(|m| m.message_id == "tool-result-1");
        match (call_idx, result_idx) {
            (Some(_), Some(_)) => {
                // both survived in the kept suffix together
            }
            (None, None) => {
                // both archived into the summary together
            }
            _ => panic!("tool-call/tool-result pair was split across the compaction boundary"),
        }
    }

    #[tokio::test]
    async fn compaction_below_threshold_is_a_no_op() {
        let provider = Arc::new(ScriptedProvider::new("scripted"));
        let store = SessionStore::new("s1", config(), Some(provider as Arc<dyn LlmProvider>));
        store.add_message(Message::system("system", "sys"));
        store.add_message(Message::user("u1", "hi"));
        assert!(!store.compact_before_llm_call(None).await);
        assert_eq!(store.get_messages().len(), 2);
    }

    #[tokio::test]
    async fn compaction_preserves_suffix_equality_law() {
        let provider = Arc::new(ScriptedProvider::new("scripted"));
        provider.push_chat(ChatResponse {
            content: "recap".into(),
            tool_calls: vec![],
            usage: None,
            model: "m".into(),
            finish_reason: Some("stop".into()),
        });
        let store = SessionStore::new("s1", config(), Some(provider as Arc<dyn LlmProvider>));
        store.add_message(Message::system("system", "sys"));
        for i in 0..6 {
            let mut m = Message::user(format!("u{i}"), format!("message {i}"));
            if i == 5 {
                m.usage = Some(usage(500));
            }
            store.add_message(m);
        }
        let before_suffix: Vec<String> = store
            .get_messages()
            .iter()
            .rev()
            .take(3)
            .map(|m| m.message_id.clone())
            .collect();
        store.compact_before_llm_call(None).await;
        let after_suffix: Vec<String> = store
            .get_messages()
            .iter()
            .rev()
            .take(3)
            .map(|m| m.message_id.clone())
            .collect();
        assert_eq!(before_suffix, after_suffix);
    }

    #[test]
    fn token_info_falls_back_to_heuristic_without_usage() {
        let store = SessionStore::new("s1", SessionConfig::default(), None);
        store.add_message(Message::system("system", "sys"));
        store.add_message(Message::user("u1", "a".repeat(400)));
        let info = store.get_token_info();
        assert_eq!(info.estimated_total, (3 + 400) / 4);
    }
}
