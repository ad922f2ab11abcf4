//! A deterministic, in-memory `LlmProvider` used to drive the agent runtime
//! in tests without touching a real network. Callers push a script of
//! responses (and/or raw stream events) ahead of time; each call to
//! `chat`/`chat_stream` pops the next scripted item.

use std::collections::VecDeque;

use ok_domain::error::{Error, Result};
use ok_domain::stream::{BoxStream, StreamEvent};
use parking_lot::Mutex;

use crate::traits::{ChatRequest, ChatResponse, LlmProvider, ProviderCapabilities};

pub struct ScriptedProvider {
    id: String,
    capabilities: ProviderCapabilities,
    chat_script: Mutex<VecDeque<ChatResponse>>,
    stream_script: Mutex<VecDeque<Vec<StreamEvent>>>,
}

impl ScriptedProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capabilities: ProviderCapabilities {
                supports_tools: true,
                supports_streaming: true,
                supports_concurrent_tool_dispatch: true,
            },
            chat_script: Mutex::new(VecDeque::new()),
            stream_script: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_capabilities(mut self, capabilities: ProviderCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Queue a full `chat()` response for the next call.
    pub fn push_chat(&self, response: ChatResponse) {
        self.chat_script.lock().push_back(response);
    }

    /// Queue a sequence of stream events for the next `chat_stream()` call.
    pub fn push_stream(&self, events: Vec<StreamEvent>) {
        self.stream_script.lock().push_back(events);
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat(&self, _req: ChatRequest) -> Result<ChatResponse> {
        self.chat_script
            .lock()
            .pop_front()
            .ok_or_else(|| Error::Provider {
                provider: self.id.clone(),
                message: "scripted provider exhausted its chat script".into(),
            })
    }

    async fn chat_stream(&self, _req: ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let events = self.stream_script.lock().pop_front().ok_or_else(|| Error::Provider {
            provider: self.id.clone(),
            message: "scripted provider exhausted its stream script".into(),
        })?;
        Ok(Box::pin(futures_util::stream::iter(events.into_iter().map(Ok))))
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn chat_pops_scripted_responses_in_order() {
        let p = ScriptedProvider::new("scripted");
        p.push_chat(ChatResponse {
            content: "first".into(),
            tool_calls: vec![],
            usage: None,
            model: "m".into(),
            finish_reason: Some("stop".into()),
        });
        let r = p.chat(ChatRequest::default()).await.unwrap();
        assert_eq!(r.content, "first");
        assert!(p.chat(ChatRequest::default()).await.is_err());
    }

    #[tokio::test]
    async fn chat_stream_replays_scripted_events() {
        use futures_util::StreamExt;
        let p = ScriptedProvider::new("scripted");
        p.push_stream(vec![
            StreamEvent::Token { text: "hi".into() },
            StreamEvent::Done {
                usage: None,
                finish_reason: Some("stop".into()),
            },
        ]);
        let mut stream = p.chat_stream(ChatRequest::default()).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        matches!(first, StreamEvent::Token { .. });
    }
}
