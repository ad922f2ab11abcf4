use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ok_domain::config::TruncationConfig;
use ok_domain::message::ToolDefinition;
use parking_lot::RwLock;

use crate::context::ToolContext;
use crate::event::{NullEventSink, ToolCallEvent, ToolEventSink};
use crate::executor::{ToolExecResult, ToolExecutor};
use crate::truncation;

fn validate_against_schema(schema: &serde_json::Value, args: &serde_json::Value) -> Result<(), String> {
    let Some(required) = schema.get("required").and_then(|r| r.as_array()) else {
        return Ok(());
    };
    let obj = args.as_object();
    for field in required {
        let Some(name) = field.as_str() else { continue };
        let present = obj.is_some_and(|o| o.contains_key(name));
        if !present {
            return Err(format!("missing required argument: {name}"));
        }
    }
    Ok(())
}

/// Holds every tool an agent can call, wraps dispatch with schema
/// validation, a per-call timeout (opt-out for meta-tools) and the
/// truncation middleware, and emits lifecycle events a runtime can mirror
/// into the session's UI stream.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn ToolExecutor>>>,
    timeout: Duration,
    truncation: TruncationConfig,
    sink: Arc<dyn ToolEventSink>,
}

impl ToolRegistry {
    pub fn new(timeout: Duration, truncation: TruncationConfig) -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            timeout,
            truncation,
            sink: Arc::new(NullEventSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ToolEventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn register(&self, tool: Arc<dyn ToolExecutor>) {
        self.tools.write().insert(tool.name().to_string(), tool);
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    pub fn to_llm_tools(&self) -> Vec<ToolDefinition> {
        self.tools
            .read()
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.schema(),
            })
            .collect()
    }

    pub async fn execute(&self, name: &str, call_id: &str, args: serde_json::Value, ctx: &ToolContext) -> ToolExecResult {
        self.sink.emit(ToolCallEvent::Start {
            call_id: call_id.to_string(),
            tool_name: name.to_string(),
        });

        let tool = match self.tools.read().get(name).cloned() {
            Some(t) => t,
            None => {
                let message = format!("unknown tool: {name}");
                self.sink.emit(ToolCallEvent::Error {
                    call_id: call_id.to_string(),
                    tool_name: name.to_string(),
                    message: message.clone(),
                });
                return ToolExecResult::err(message);
            }
        };

        if let Err(message) = validate_against_schema(&tool.schema(), &args) {
            self.sink.emit(ToolCallEvent::Error {
                call_id: call_id.to_string(),
                tool_name: name.to_string(),
                message: message.clone(),
            });
            return ToolExecResult::err(message);
        }

        let mut result = if tool.skip_timeout() {
            tool.execute(args, ctx).await
        } else {
            match tokio::time::timeout(self.timeout, tool.execute(args, ctx)).await {
                Ok(r) => r,
                Err(_) => {
                    let message = format!("tool '{name}' timed out after {:?}", self.timeout);
                    self.sink.emit(ToolCallEvent::Error {
                        call_id: call_id.to_string(),
                        tool_name: name.to_string(),
                        message: message.clone(),
                    });
                    return ToolExecResult::err(message);
                }
            }
        };

        truncation::apply(name, &self.truncation, tool.truncation_preference(), &mut result).await;

        if result.success {
            self.sink.emit(ToolCallEvent::Complete {
                call_id: call_id.to_string(),
                tool_name: name.to_string(),
                result: result.clone(),
            });
        } else {
            self.sink.emit(ToolCallEvent::Error {
                call_id: call_id.to_string(),
                tool_name: name.to_string(),
                message: result.error.clone().unwrap_or_default(),
            });
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo;

    #[async_trait::async_trait]
    impl ToolExecutor for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "required": ["text"]})
        }
        async fn execute(&self, args: serde_json::Value, _ctx: &ToolContext) -> ToolExecResult {
            ToolExecResult::ok(args["text"].as_str().unwrap_or_default())
        }
    }

    struct Slow;

    #[async_trait::async_trait]
    impl ToolExecutor for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "never returns within the registry timeout"
        }
        fn schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(&self, _args: serde_json::Value, _ctx: &ToolContext) -> ToolExecResult {
            tokio::time::sleep(Duration::from_secs(60)).await;
            ToolExecResult::ok("unreachable")
        }
    }

    struct WaitForMessages;

    #[async_trait::async_trait]
    impl ToolExecutor for WaitForMessages {
        fn name(&self) -> &str {
            "wait_for_messages"
        }
        fn description(&self) -> &str {
            "meta-tool, opts out of the registry timeout"
        }
        fn schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        fn skip_timeout(&self) -> bool {
            true
        }
        async fn execute(&self, _args: serde_json::Value, _ctx: &ToolContext) -> ToolExecResult {
            tokio::time::sleep(Duration::from_millis(5)).await;
            ToolExecResult::ok("no messages")
        }
    }

    fn ctx() -> ToolContext {
        ToolContext::new("s1", "/tmp")
    }

    #[tokio::test]
    async fn execute_dispatches_to_the_registered_tool() {
        let reg = ToolRegistry::new(Duration::from_secs(5), TruncationConfig::default());
        reg.register(Arc::new(Echo));
        let result = reg.execute("echo", "c1", serde_json::json!({"text": "hi"}), &ctx()).await;
        assert!(result.success);
        assert_eq!(result.output.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn execute_rejects_missing_required_arguments() {
        let reg = ToolRegistry::new(Duration::from_secs(5), TruncationConfig::default());
        reg.register(Arc::new(Echo));
        let result = reg.execute("echo", "c1", serde_json::json!({}), &ctx()).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("text"));
    }

    #[tokio::test]
    async fn execute_reports_unknown_tools_without_panicking() {
        let reg = ToolRegistry::new(Duration::from_secs(5), TruncationConfig::default());
        let result = reg.execute("missing", "c1", serde_json::json!({}), &ctx()).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn execute_enforces_the_per_call_timeout() {
        let reg = ToolRegistry::new(Duration::from_millis(20), TruncationConfig::default());
        reg.register(Arc::new(Slow));
        let result = reg.execute("slow", "c1", serde_json::json!({}), &ctx()).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn meta_tools_bypass_the_per_call_timeout() {
        let reg = ToolRegistry::new(Duration::from_millis(1), TruncationConfig::default());
        reg.register(Arc::new(WaitForMessages));
        let result = reg.execute("wait_for_messages", "c1", serde_json::json!({}), &ctx()).await;
        assert!(result.success);
    }

    struct CountingSink {
        starts: AtomicUsize,
        completes: AtomicUsize,
    }

    impl ToolEventSink for CountingSink {
        fn emit(&self, event: ToolCallEvent) {
            match event {
                ToolCallEvent::Start { .. } => {
                    self.starts.fetch_add(1, Ordering::SeqCst);
                }
                ToolCallEvent::Complete { .. } => {
                    self.completes.fetch_add(1, Ordering::SeqCst);
                }
                ToolCallEvent::Error { .. } => {}
            }
        }
    }

    #[tokio::test]
    async fn events_fire_once_per_call() {
        let sink = Arc::new(CountingSink {
            starts: AtomicUsize::new(0),
            completes: AtomicUsize::new(0),
        });
        let reg = ToolRegistry::new(Duration::from_secs(5), TruncationConfig::default()).with_sink(sink.clone());
        reg.register(Arc::new(Echo));
        reg.execute("echo", "c1", serde_json::json!({"text": "hi"}), &ctx()).await;
        assert_eq!(sink.starts.load(Ordering::SeqCst), 1);
        assert_eq!(sink.completes.load(Ordering::SeqCst), 1);
    }
}
