use chrono::{DateTime, Utc};

/// Ambient information handed to every tool invocation. Narrow by design —
/// a tool reads what it needs off this struct rather than reaching into
/// global state, which is what makes `ToolExecutor` impls testable in
/// isolation.
#[derive(Clone)]
pub struct ToolContext {
    pub session_id: String,
    pub working_directory: String,
    pub platform: String,
    pub time: DateTime<Utc>,
    /// Opaque handle into a memory subsystem, when one is wired up. No
    /// concrete memory backend ships here; a tool that wants it downcasts
    /// or inspects the JSON itself.
    pub memory_handle: Option<serde_json::Value>,
    /// Sink a long-running tool can push incremental progress lines to,
    /// mirrored into the UI as stream log chunks. `None` when the caller
    /// isn't collecting incremental output (e.g. a background dispatch).
    pub stream_callback: Option<std::sync::Arc<dyn Fn(String) + Send + Sync>>,
}

impl ToolContext {
    pub fn new(session_id: impl Into<String>, working_directory: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            working_directory: working_directory.into(),
            platform: std::env::consts::OS.to_string(),
            time: Utc::now(),
            memory_handle: None,
            stream_callback: None,
        }
    }

    pub fn emit_progress(&self, line: impl Into<String>) {
        if let Some(cb) = &self.stream_callback {
            cb(line.into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_progress_is_a_no_op_without_a_callback() {
        let ctx = ToolContext::new("s1", "/tmp");
        ctx.emit_progress("line");
    }

    #[test]
    fn emit_progress_invokes_the_callback() {
        let seen = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let mut ctx = ToolContext::new("s1", "/tmp");
        ctx.stream_callback = Some(std::sync::Arc::new(move |line| seen2.lock().push(line)));
        ctx.emit_progress("hello");
        assert_eq!(*seen.lock(), vec!["hello".to_string()]);
    }
}
