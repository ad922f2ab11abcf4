use crate::executor::ToolExecResult;

/// Lifecycle notifications the registry raises around every dispatch, so a
/// runtime can mirror them into the UI event stream (`tool_call_created` /
/// `tool_call_stream` / `tool_call_result`) without the registry itself
/// knowing anything about sessions or reducers.
#[derive(Debug, Clone)]
pub enum ToolCallEvent {
    Start { call_id: String, tool_name: String },
    Complete { call_id: String, tool_name: String, result: ToolExecResult },
    Error { call_id: String, tool_name: String, message: String },
}

pub trait ToolEventSink: Send + Sync {
    fn emit(&self, event: ToolCallEvent);
}

/// Sink that drops everything. Useful for tests and for callers that only
/// care about the awaited result.
pub struct NullEventSink;

impl ToolEventSink for NullEventSink {
    fn emit(&self, _event: ToolCallEvent) {}
}
