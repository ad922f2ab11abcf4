//! The fixed set of tools every registered agent gets for free: status
//! introspection, inter-agent mailbox access, and (controller-only) child
//! dispatch. Installed once per agent registration by
//! [`install_privileged_tools`]; re-registering the same agent is a no-op
//! because `ToolRegistry::register` overwrites by name.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use ok_domain::error::Error;
use ok_domain::run::DispatchMode;
use ok_mailbox::{NullChildProgressQuery, SendRequest, WaitOptions};
use ok_tools::{ToolContext, ToolExecResult, ToolExecutor, ToolRegistry};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::kernel::{DispatchCommand, OrchestratorKernel, RunQueryFilter};

pub fn install_privileged_tools(registry: &Arc<ToolRegistry>, kernel: Weak<OrchestratorKernel>) {
    registry.register(Arc::new(AgentGetStatus { kernel: kernel.clone() }));
    registry.register(Arc::new(AgentDispatchTask { kernel: kernel.clone() }));
    registry.register(Arc::new(AgentSendMessage { kernel: kernel.clone() }));
    registry.register(Arc::new(AgentReceiveMessages { kernel: kernel.clone() }));
    registry.register(Arc::new(AgentWaitForMessages { kernel: kernel.clone() }));
    registry.register(Arc::new(AgentAckMessages { kernel: kernel.clone() }));
    registry.register(Arc::new(AgentNackMessage { kernel: kernel.clone() }));
    registry.register(Arc::new(AgentListDeadLetters { kernel }));
}

/// Every privileged tool call arrives with `ctx.session_id` set to the
/// caller's own run id (the loop sets it that way). Resolves it back to
/// the calling agent's id so the mailbox/dispatch calls know who "I" am
/// without the model ever having to pass its own identity as an argument.
fn caller_agent_id(kernel: &OrchestratorKernel, ctx: &ToolContext) -> Result<(Uuid, String), String> {
    if ctx.session_id.is_empty() {
        return Err("missing caller run id".to_string());
    }
    let run_id: Uuid = ctx
        .session_id
        .parse()
        .map_err(|_| format!("caller run id is not a valid uuid: {}", ctx.session_id))?;
    let record = kernel
        .run_status(run_id)
        .ok_or_else(|| format!("unknown run: {run_id}"))?;
    Ok((run_id, record.agent_id))
}

fn upgrade(kernel: &Weak<OrchestratorKernel>) -> Result<Arc<OrchestratorKernel>, ToolExecResult> {
    kernel
        .upgrade()
        .ok_or_else(|| ToolExecResult::err("orchestrator kernel has shut down"))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// agent_get_status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct AgentGetStatus {
    kernel: Weak<OrchestratorKernel>,
}

#[async_trait]
impl ToolExecutor for AgentGetStatus {
    fn name(&self) -> &str {
        "agent_get_status"
    }
    fn description(&self) -> &str {
        "Query tracked runs by run id, agent id, parent run id and/or status. With no \
         filters, defaults to my dispatched children if I'm the controller, or my own \
         runs otherwise."
    }
    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "run_id": { "type": "string" },
                "agent_id": { "type": "string" },
                "parent_run_id": { "type": "string" },
                "statuses": {
                    "type": "array",
                    "items": {
                        "type": "string",
                        "enum": ["queued", "running", "completed", "failed", "aborted", "cancelled"]
                    }
                },
                "limit": { "type": "integer" }
            }
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolExecResult {
        let kernel = match upgrade(&self.kernel) {
            Ok(k) => k,
            Err(e) => return e,
        };
        let (_, me) = match caller_agent_id(&kernel, ctx) {
            Ok(v) => v,
            Err(e) => return ToolExecResult::err(e),
        };

        let run_id = match args.get("run_id").and_then(Value::as_str) {
            Some(s) => match s.parse::<Uuid>() {
                Ok(id) => Some(id),
                Err(_) => return ToolExecResult::err("run_id is not a valid uuid"),
            },
            None => None,
        };
        let parent_run_id = match args.get("parent_run_id").and_then(Value::as_str) {
            Some(s) => match s.parse::<Uuid>() {
                Ok(id) => Some(id),
                Err(_) => return ToolExecResult::err("parent_run_id is not a valid uuid"),
            },
            None => None,
        };
        let agent_id = str_field(&args, "agent_id");
        let statuses = args.get("statuses").and_then(Value::as_array).map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .filter_map(parse_status)
                .collect::<Vec<_>>()
        });
        let limit = args.get("limit").and_then(Value::as_u64).map(|n| n as usize);

        let mut filter = RunQueryFilter {
            run_id,
            parent_run_id,
            agent_id,
            statuses,
            limit,
            ..Default::default()
        };

        let no_filters = filter.run_id.is_none()
            && filter.parent_run_id.is_none()
            && filter.agent_id.is_none()
            && filter.statuses.is_none();
        if no_filters {
            if is_controller(&kernel, &me) {
                filter.parent_agent_id = Some(me);
            } else {
                filter.agent_id = Some(me);
            }
        }

        let runs = kernel.query_runs(filter);
        match serde_json::to_string(&runs) {
            Ok(s) => ToolExecResult::ok(s),
            Err(e) => ToolExecResult::err(e.to_string()),
        }
    }
}

fn parse_status(s: &str) -> Option<ok_domain::run::RunStatus> {
    use ok_domain::run::RunStatus::*;
    match s {
        "queued" => Some(Queued),
        "running" => Some(Running),
        "completed" => Some(Completed),
        "failed" => Some(Failed),
        "aborted" => Some(Aborted),
        "cancelled" => Some(Cancelled),
        _ => None,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// agent_dispatch_task (controller-only)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct AgentDispatchTask {
    kernel: Weak<OrchestratorKernel>,
}

#[async_trait]
impl ToolExecutor for AgentDispatchTask {
    fn name(&self) -> &str {
        "agent_dispatch_task"
    }
    fn description(&self) -> &str {
        "Dispatch a task to another registered agent as a tracked child run. Controller-only."
    }
    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["child_agent_id", "input"],
            "properties": {
                "child_agent_id": { "type": "string" },
                "input": { "type": "string" },
                "mode": { "type": "string", "enum": ["foreground", "background"] },
                "subagent_type": { "type": "string" },
                "timeout_ms": { "type": "integer" }
            }
        })
    }
    fn skip_timeout(&self) -> bool {
        true
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolExecResult {
        let kernel = match upgrade(&self.kernel) {
            Ok(k) => k,
            Err(e) => return e,
        };
        let (caller_run_id, caller_agent_id) = match caller_agent_id(&kernel, ctx) {
            Ok(v) => v,
            Err(e) => return ToolExecResult::err(e),
        };
        if !is_controller(&kernel, &caller_agent_id) {
            return ToolExecResult::err("only the controller agent may dispatch child tasks");
        }

        let Some(child_agent_id) = args.get("child_agent_id").and_then(Value::as_str) else {
            return ToolExecResult::err("missing child_agent_id");
        };
        let Some(input) = args.get("input").and_then(Value::as_str) else {
            return ToolExecResult::err("missing input");
        };
        let mode = match args.get("mode").and_then(Value::as_str) {
            Some("background") => DispatchMode::Background,
            _ => DispatchMode::Foreground,
        };
        let subagent_type = args
            .get("subagent_type")
            .and_then(Value::as_str)
            .unwrap_or(child_agent_id)
            .to_string();
        let timeout_ms = args.get("timeout_ms").and_then(Value::as_u64);

        match kernel.dispatch(DispatchCommand {
            child_agent_id: child_agent_id.to_string(),
            parent_run_id: caller_run_id,
            input: input.to_string(),
            mode,
            subagent_type,
            timeout_ms,
        }) {
            Ok(handle) => ToolExecResult::ok(
                json!({
                    "callerAgentId": caller_agent_id,
                    "parentRunId": caller_run_id,
                    "childRunId": handle.run_id,
                    "childAgentId": child_agent_id,
                    "childStatus": handle.status,
                })
                .to_string(),
            ),
            Err(e) => ToolExecResult::err(e.to_string()),
        }
    }
}

fn is_controller(kernel: &OrchestratorKernel, agent_id: &str) -> bool {
    kernel.agent_exists(agent_id)
        && kernel
            .runtime
            .agent_profile(agent_id)
            .map(|p| p.is_controller())
            .unwrap_or(false)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// agent_send_message
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct AgentSendMessage {
    kernel: Weak<OrchestratorKernel>,
}

#[async_trait]
impl ToolExecutor for AgentSendMessage {
    fn name(&self) -> &str {
        "agent_send_message"
    }
    fn description(&self) -> &str {
        "Send a message to another agent's mailbox."
    }
    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["to", "payload"],
            "properties": {
                "to": { "type": "string" },
                "payload": { "type": "object" },
                "topic": { "type": "string" },
                "idempotency_key": { "type": "string" },
                "correlation_id": { "type": "string" },
                "max_attempts": { "type": "integer" }
            }
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolExecResult {
        let kernel = match upgrade(&self.kernel) {
            Ok(k) => k,
            Err(e) => return e,
        };
        let (_, from) = match caller_agent_id(&kernel, ctx) {
            Ok(v) => v,
            Err(e) => return ToolExecResult::err(e),
        };
        let Some(to) = args.get("to").and_then(Value::as_str) else {
            return ToolExecResult::err("missing to");
        };
        let payload = args
            .get("payload")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let req = SendRequest {
            from,
            to: to.to_string(),
            payload,
            topic: str_field(&args, "topic"),
            idempotency_key: str_field(&args, "idempotency_key"),
            correlation_id: str_field(&args, "correlation_id"),
            run_id: None,
            max_attempts: args.get("max_attempts").and_then(Value::as_u64).map(|n| n as u32),
            visible_at: None,
        };

        let runtime = &kernel.runtime;
        match kernel.mailbox.send_message(req, |id| runtime.agent_exists(id)) {
            Ok(msg) => ToolExecResult::ok(json!({ "messageId": msg.message_id }).to_string()),
            Err(e) => match e {
                Error::Validation(m) => ToolExecResult::err(m),
                other => ToolExecResult::err(other.to_string()),
            },
        }
    }
}

fn str_field(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(Value::as_str).map(str::to_string)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// agent_receive_messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct AgentReceiveMessages {
    kernel: Weak<OrchestratorKernel>,
}

#[async_trait]
impl ToolExecutor for AgentReceiveMessages {
    fn name(&self) -> &str {
        "agent_receive_messages"
    }
    fn description(&self) -> &str {
        "Drain up to `limit` queued messages addressed to me, leasing each for in-flight processing."
    }
    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "limit": { "type": "integer" },
                "lease_ms": { "type": "integer" }
            }
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolExecResult {
        let kernel = match upgrade(&self.kernel) {
            Ok(k) => k,
            Err(e) => return e,
        };
        let (_, me) = match caller_agent_id(&kernel, ctx) {
            Ok(v) => v,
            Err(e) => return ToolExecResult::err(e),
        };
        let limit = args.get("limit").and_then(Value::as_u64).map(|n| n as usize);
        let lease_ms = args.get("lease_ms").and_then(Value::as_i64);
        let messages = kernel.mailbox.receive_messages(&me, limit, lease_ms);
        match serde_json::to_string(&messages) {
            Ok(s) => ToolExecResult::ok(s),
            Err(e) => ToolExecResult::err(e.to_string()),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// agent_wait_for_messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct AgentWaitForMessages {
    kernel: Weak<OrchestratorKernel>,
}

#[async_trait]
impl ToolExecutor for AgentWaitForMessages {
    fn name(&self) -> &str {
        "agent_wait_for_messages"
    }
    fn description(&self) -> &str {
        "Block (up to wait_ms) until a message arrives, or report dispatched children's \
         progress when the wait times out empty."
    }
    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "wait_ms": { "type": "integer" },
                "poll_interval_ms": { "type": "integer" },
                "limit": { "type": "integer" },
                "lease_ms": { "type": "integer" },
                "include_child_progress_on_timeout": { "type": "boolean" }
            }
        })
    }
    fn skip_timeout(&self) -> bool {
        true
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolExecResult {
        let kernel = match upgrade(&self.kernel) {
            Ok(k) => k,
            Err(e) => return e,
        };
        let (run_id, me) = match caller_agent_id(&kernel, ctx) {
            Ok(v) => v,
            Err(e) => return ToolExecResult::err(e),
        };

        let mut opts = WaitOptions::new(&Default::default());
        if let Some(v) = args.get("wait_ms").and_then(Value::as_i64) {
            opts.wait_ms = v;
        }
        if let Some(v) = args.get("poll_interval_ms").and_then(Value::as_i64) {
            opts.poll_interval_ms = v;
        }
        opts.limit = args.get("limit").and_then(Value::as_u64).map(|n| n as usize);
        opts.lease_ms = args.get("lease_ms").and_then(Value::as_i64);
        opts.parent_run_id = Some(run_id);
        opts.include_child_progress_on_timeout = args
            .get("include_child_progress_on_timeout")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        let cancel = kernel.runtime.cancel_token(run_id);
        let null_progress = NullChildProgressQuery;
        let progress: &dyn ok_mailbox::ChildProgressQuery = if opts.include_child_progress_on_timeout {
            kernel.as_ref()
        } else {
            &null_progress
        };
        let result = kernel
            .mailbox
            .wait_for_messages(&me, opts, Some(progress), cancel.as_ref())
            .await;

        let body = json!({
            "timedOut": result.timed_out,
            "messages": result.messages,
            "childProgress": result.child_progress,
        });
        match serde_json::to_string(&body) {
            Ok(s) => ToolExecResult::ok(s),
            Err(e) => ToolExecResult::err(e.to_string()),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// agent_ack_messages / agent_nack_message / agent_list_dead_letters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct AgentAckMessages {
    kernel: Weak<OrchestratorKernel>,
}

#[async_trait]
impl ToolExecutor for AgentAckMessages {
    fn name(&self) -> &str {
        "agent_ack_messages"
    }
    fn description(&self) -> &str {
        "Acknowledge 1-100 leased messages, removing each from my mailbox for good."
    }
    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["message_ids"],
            "properties": {
                "message_ids": {
                    "type": "array",
                    "items": { "type": "string" },
                    "minItems": 1,
                    "maxItems": 100
                }
            }
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolExecResult {
        let kernel = match upgrade(&self.kernel) {
            Ok(k) => k,
            Err(e) => return e,
        };
        let (_, me) = match caller_agent_id(&kernel, ctx) {
            Ok(v) => v,
            Err(e) => return ToolExecResult::err(e),
        };
        let Some(ids) = args.get("message_ids").and_then(Value::as_array) else {
            return ToolExecResult::err("missing message_ids");
        };
        let mut acked = Vec::new();
        let mut missing = Vec::new();
        for id in ids {
            let Some(id) = id.as_str() else { continue };
            match kernel.mailbox.ack_message(&me, id) {
                Ok(()) => acked.push(id.to_string()),
                Err(_) => missing.push(id.to_string()),
            }
        }
        match serde_json::to_string(&json!({ "acked": acked, "missing": missing })) {
            Ok(body) => ToolExecResult::ok(body),
            Err(e) => ToolExecResult::err(e.to_string()),
        }
    }
}

struct AgentNackMessage {
    kernel: Weak<OrchestratorKernel>,
}

#[async_trait]
impl ToolExecutor for AgentNackMessage {
    fn name(&self) -> &str {
        "agent_nack_message"
    }
    fn description(&self) -> &str {
        "Reject a leased message, requeueing it (until its retry budget is spent, then \
         dead-lettering it)."
    }
    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["message_id"],
            "properties": {
                "message_id": { "type": "string" },
                "error": { "type": "string" },
                "requeue_delay_ms": { "type": "integer" }
            }
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolExecResult {
        let kernel = match upgrade(&self.kernel) {
            Ok(k) => k,
            Err(e) => return e,
        };
        let (_, me) = match caller_agent_id(&kernel, ctx) {
            Ok(v) => v,
            Err(e) => return ToolExecResult::err(e),
        };
        let Some(message_id) = args.get("message_id").and_then(Value::as_str) else {
            return ToolExecResult::err("missing message_id");
        };
        let error = args.get("error").and_then(Value::as_str).unwrap_or("");
        let requeue_delay_ms = args.get("requeue_delay_ms").and_then(Value::as_i64).unwrap_or(0);
        match kernel.mailbox.nack_message(&me, message_id, error, requeue_delay_ms) {
            Ok(outcome) => ToolExecResult::ok(
                json!({ "requeued": outcome.requeued, "deadLettered": outcome.dead_lettered }).to_string(),
            ),
            Err(e) => ToolExecResult::err(e.to_string()),
        }
    }
}

struct AgentListDeadLetters {
    kernel: Weak<OrchestratorKernel>,
}

#[async_trait]
impl ToolExecutor for AgentListDeadLetters {
    fn name(&self) -> &str {
        "agent_list_dead_letters"
    }
    fn description(&self) -> &str {
        "List messages that exhausted their retry budget and landed in my dead-letter pile."
    }
    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "limit": { "type": "integer" } }
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolExecResult {
        let kernel = match upgrade(&self.kernel) {
            Ok(k) => k,
            Err(e) => return e,
        };
        let (_, me) = match caller_agent_id(&kernel, ctx) {
            Ok(v) => v,
            Err(e) => return ToolExecResult::err(e),
        };
        let limit = args.get("limit").and_then(Value::as_u64).unwrap_or(20) as usize;
        let dead = kernel.mailbox.list_dead_letters(&me, limit);
        match serde_json::to_string(&dead) {
            Ok(s) => ToolExecResult::ok(s),
            Err(e) => ToolExecResult::err(e.to_string()),
        }
    }
}
