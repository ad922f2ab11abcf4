//! The agent runtime's inner loop: think (LLM call) -> act (tool dispatch)
//! -> observe (tool results folded back in) -> reflect (another LLM call,
//! or stop). Generalizes a single-turn tool loop into the repeatable body
//! of one run, bounded by the agent's own loop/tool budgets rather than a
//! crate-wide constant.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use ok_domain::compaction::SessionConfig;
use ok_domain::event::{AgentEvent, RunStatusEvent};
use ok_domain::message::{Message, ToolCall};
use ok_domain::run::{AgentProfile, NodeKind, RunNode, RunStatus};
use ok_domain::stream::StreamEvent;
use ok_providers::traits::{ChatRequest, LlmProvider};
use ok_sessions::store::SessionStore;
use ok_tools::{ToolContext, ToolRegistry};
use uuid::Uuid;

use crate::runtime::AgentRuntime;

/// Substrings a reflection may contain to signal it considers the task
/// finished even though the provider still offered tool calls. Checked
/// case-insensitively; a turn with no pending tool calls is already done
/// regardless of these markers.
const COMPLETION_MARKERS: &[&str] = &["task is complete", "finished", "done", "no more work", "success"];

fn contains_completion_marker(text: &str) -> bool {
    let lower = text.to_lowercase();
    COMPLETION_MARKERS.iter().any(|m| lower.contains(m))
}

const PREVIEW_CHARS: usize = 200;

pub async fn run(
    runtime: Arc<AgentRuntime>,
    run_id: Uuid,
    profile: AgentProfile,
    provider: Arc<dyn LlmProvider>,
    registry: Arc<ToolRegistry>,
    input: String,
    session_config: SessionConfig,
    cancel: CancellationToken,
    deadline: Option<Duration>,
) {
    runtime.start_run(run_id);

    let persistence = runtime.persistence().clone();
    let session_key = run_id.to_string();
    let _ = persistence.create_session(&session_key).await;

    let session = SessionStore::new(session_key.clone(), session_config, Some(provider.clone()));
    let system_msg = Message::system(format!("system-{run_id}"), profile.system_prompt.clone());
    session.add_message(system_msg.clone());
    let _ = persistence.add_message_to_context(&session_key, system_msg).await;

    let user_msg = Message::user(format!("user-{run_id}"), input);
    session.add_message(user_msg.clone());
    let _ = persistence.add_message_to_context(&session_key, user_msg).await;

    let deadline_at = deadline.map(|d| Instant::now() + d);
    let tool_defs = registry.to_llm_tools();
    let capabilities = provider.capabilities();

    let mut tools_used: u32 = 0;

    let outcome = 'outer: loop {
        if cancel.is_cancelled() {
            break 'outer Outcome::Aborted;
        }
        if deadline_at.is_some_and(|d| Instant::now() >= d) {
            break 'outer Outcome::Timeout;
        }
        if runtime_loop_count(&runtime, run_id) >= profile.limits.max_loops {
            break 'outer summarize_after_max_loops(&provider, &session).await;
        }

        session.compact_before_llm_call(Some(&cancel)).await;
        runtime.bump_loop_count(run_id);

        let turn = match run_one_turn(&runtime, run_id, &provider, &session, &tool_defs, &cancel).await {
            Ok(t) => t,
            Err(message) => break 'outer Outcome::Failed(message),
        };
        if turn.cancelled {
            break 'outer Outcome::Aborted;
        }

        let assistant_msg_id = format!("assistant-{run_id}-{}", runtime_loop_count(&runtime, run_id));
        let mut assistant_msg = Message::assistant(assistant_msg_id, turn.text.clone());
        if !turn.tool_calls.is_empty() {
            assistant_msg.tool_calls = Some(turn.tool_calls.clone());
        }
        session.add_message(assistant_msg.clone());
        let _ = persistence.add_message_to_context(&session_key, assistant_msg).await;

        let is_done = turn.tool_calls.is_empty() || contains_completion_marker(&turn.text);
        if is_done {
            break 'outer Outcome::Completed(turn.text);
        }

        if tools_used + turn.tool_calls.len() as u32 > profile.limits.max_tools_per_task {
            break 'outer Outcome::ToolBudgetExceeded;
        }
        tools_used += turn.tool_calls.len() as u32;

        let results = dispatch_tools(
            &runtime,
            run_id,
            &registry,
            &turn.tool_calls,
            capabilities.supports_concurrent_tool_dispatch,
            &session_key,
        )
        .await;

        for (call, output, is_error) in results {
            let tool_msg = Message::tool_result(format!("tool-{}", call.call_id), call.call_id.clone(), output.clone());
            session.add_message(tool_msg.clone());
            let _ = persistence.add_message_to_context(&session_key, tool_msg).await;
            runtime.emit(
                run_id,
                AgentEvent::ToolCallResult {
                    call_id: call.call_id,
                    status: if is_error { "error".into() } else { "success".into() },
                    result: Value::String(output),
                },
            );
        }
    };

    let parent_run_id = runtime.status(run_id).and_then(|r| r.parent_run_id);
    finish(&runtime, run_id, outcome).await;
    if let Some(parent) = parent_run_id {
        runtime.remove_from_group(parent, run_id);
    }
    runtime.cleanup_events(run_id);
}

struct TurnOutcome {
    text: String,
    tool_calls: Vec<ToolCall>,
    cancelled: bool,
}

async fn run_one_turn(
    runtime: &Arc<AgentRuntime>,
    run_id: Uuid,
    provider: &Arc<dyn LlmProvider>,
    session: &SessionStore,
    tool_defs: &[ok_domain::message::ToolDefinition],
    cancel: &CancellationToken,
) -> Result<TurnOutcome, String> {
    let req = ChatRequest {
        messages: session.get_messages(),
        tools: tool_defs.to_vec(),
        temperature: None,
        max_tokens: None,
        model: None,
    };

    let started = chrono::Utc::now();
    let llm_span = tracing::info_span!("llm.call", run_id = %run_id);
    let _guard = llm_span.enter();

    let mut stream = provider.chat_stream(req).await.map_err(|e| e.to_string())?;

    let msg_id = format!("turn-{run_id}-{}", started.timestamp_millis());
    let mut text = String::new();
    let mut pending: std::collections::HashMap<String, (String, String)> = std::collections::HashMap::new();
    let mut finished_calls: Vec<ToolCall> = Vec::new();
    let mut cancelled = false;
    let mut started_text = false;

    loop {
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }
        let Some(next) = stream.next().await else { break };
        let event = next.map_err(|e| e.to_string())?;
        match event {
            StreamEvent::Token { text: chunk } => {
                if !started_text {
                    runtime.emit(run_id, AgentEvent::TextStart { msg_id: Some(msg_id.clone()), text: String::new() });
                    started_text = true;
                }
                text.push_str(&chunk);
                runtime.emit(run_id, AgentEvent::TextDelta { msg_id: Some(msg_id.clone()), text: chunk });
            }
            StreamEvent::ToolCallStarted { call_id, tool_name } => {
                pending.insert(call_id, (tool_name, String::new()));
            }
            StreamEvent::ToolCallDelta { call_id, delta } => {
                if let Some((_, args)) = pending.get_mut(&call_id) {
                    args.push_str(&delta);
                }
            }
            StreamEvent::ToolCallFinished { call_id, tool_name, arguments } => {
                pending.remove(&call_id);
                finished_calls.push(ToolCall { call_id, tool_name, arguments });
            }
            StreamEvent::Done { usage, .. } => {
                if let Some(usage) = usage {
                    runtime.emit(run_id, AgentEvent::UsageUpdate { usage });
                }
            }
            StreamEvent::Error { message } => {
                runtime.emit(run_id, AgentEvent::Error { message: message.clone() });
                return Err(message);
            }
        }
    }

    for (call_id, (tool_name, args_str)) in pending.into_iter() {
        let arguments = if args_str.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(&args_str).unwrap_or_else(|_| Value::Object(Default::default()))
        };
        finished_calls.push(ToolCall { call_id, tool_name, arguments });
    }

    if started_text {
        runtime.emit(run_id, AgentEvent::TextComplete { msg_id: Some(msg_id.clone()), text: text.clone() });
    }
    if !finished_calls.is_empty() {
        runtime.emit(run_id, AgentEvent::ToolCallCreated { msg_id: Some(msg_id), calls: finished_calls.clone() });
    }

    let node = RunNode {
        kind: NodeKind::LlmRequest,
        name: "llm".into(),
        is_error: false,
        started_at: started,
        ended_at: Some(chrono::Utc::now()),
        input_preview: String::new(),
        output_preview: truncate_preview(&text),
    };
    runtime.push_node(run_id, node);

    Ok(TurnOutcome { text, tool_calls: finished_calls, cancelled })
}

async fn dispatch_tools(
    runtime: &Arc<AgentRuntime>,
    run_id: Uuid,
    registry: &Arc<ToolRegistry>,
    calls: &[ToolCall],
    concurrent: bool,
    session_key: &str,
) -> Vec<(ToolCall, String, bool)> {
    let run_one = |call: ToolCall| {
        let registry = registry.clone();
        let runtime = runtime.clone();
        let mut ctx = ToolContext::new(session_key, ".");
        let stream_call_id = call.call_id.clone();
        ctx.stream_callback = Some(Arc::new(move |line: String| {
            runtime.emit(run_id, AgentEvent::ToolCallStream { call_id: stream_call_id.clone(), output: line });
        }));
        let started = chrono::Utc::now();
        async move {
            let result = registry.execute(&call.tool_name, &call.call_id, call.arguments.clone(), &ctx).await;
            let output = result.output.clone().unwrap_or_else(|| result.error.clone().unwrap_or_default());
            (call, started, result.success, output)
        }
    };

    let raw: Vec<(ToolCall, chrono::DateTime<chrono::Utc>, bool, String)> = if concurrent {
        futures_util::future::join_all(calls.iter().cloned().map(run_one)).await
    } else {
        let mut out = Vec::with_capacity(calls.len());
        for call in calls.iter().cloned() {
            out.push(run_one(call).await);
        }
        out
    };

    let mut out = Vec::with_capacity(raw.len());
    for (call, started, success, output) in raw {
        let node = RunNode {
            kind: NodeKind::ToolCall,
            name: call.tool_name.clone(),
            is_error: !success,
            started_at: started,
            ended_at: Some(chrono::Utc::now()),
            input_preview: truncate_preview(&call.arguments.to_string()),
            output_preview: truncate_preview(&output),
        };
        runtime.push_node(run_id, node);
        out.push((call, output, !success));
    }
    out
}

/// Final-turn policy when a run hits `max_loops` with work still pending:
/// one last tool-free call asking the model to summarize what it has so
/// far, rather than failing the run outright.
async fn summarize_after_max_loops(provider: &Arc<dyn LlmProvider>, session: &SessionStore) -> Outcome {
    let mut messages = session.get_messages();
    messages.push(Message::user(
        "max-loops-summary-request",
        "You have reached the maximum number of reasoning loops for this task. \
         Summarize what you accomplished and any remaining next steps, with no further tool calls.",
    ));
    let req = ChatRequest {
        messages,
        tools: Vec::new(),
        temperature: None,
        max_tokens: None,
        model: None,
    };
    match provider.chat(req).await {
        Ok(resp) => Outcome::Completed(resp.content),
        Err(e) => Outcome::Failed(format!("loop limit reached and final summary failed: {e}")),
    }
}

enum Outcome {
    Completed(String),
    Aborted,
    Timeout,
    Failed(String),
    ToolBudgetExceeded,
}

async fn finish(runtime: &Arc<AgentRuntime>, run_id: Uuid, outcome: Outcome) {
    let (status, output, error) = match outcome {
        Outcome::Completed(text) => (RunStatus::Completed, Some(text), None),
        Outcome::Aborted => (RunStatus::Aborted, None, Some("run aborted".to_string())),
        Outcome::Timeout => (RunStatus::Failed, None, Some("run exceeded its deadline".to_string())),
        Outcome::Failed(message) => (RunStatus::Failed, None, Some(message)),
        Outcome::ToolBudgetExceeded => (RunStatus::Failed, None, Some("tool call budget exceeded".to_string())),
    };

    let event_status = match status {
        RunStatus::Completed => RunStatusEvent::Completed,
        RunStatus::Failed => RunStatusEvent::Failed,
        RunStatus::Aborted => RunStatusEvent::Aborted,
        RunStatus::Cancelled => RunStatusEvent::Cancelled,
        RunStatus::Queued | RunStatus::Running => RunStatusEvent::Running,
    };
    runtime.emit(run_id, AgentEvent::Status { status: event_status });
    runtime.finish_run(run_id, status, output, error);
}

fn runtime_loop_count(runtime: &Arc<AgentRuntime>, run_id: Uuid) -> u32 {
    runtime.status(run_id).map(|r| r.loop_count).unwrap_or(0)
}

fn truncate_preview(s: &str) -> String {
    if s.chars().count() <= PREVIEW_CHARS {
        return s.to_string();
    }
    let truncated: String = s.chars().take(PREVIEW_CHARS).collect();
    format!("{truncated}...")
}
