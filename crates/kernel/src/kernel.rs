//! The orchestrator kernel: agent registration, privileged-tool injection,
//! dispatching child runs under a controller, and the dual-notification
//! child watcher that lets a controller's `waitForMessages` call learn a
//! child finished without polling `queryRuns` itself.

use std::sync::{Arc, Weak};
use std::time::Duration;

use ok_domain::config::{MailboxConfig, CHILD_WATCH_POLL_MS, QUERY_RUNS_DEFAULT_LIMIT, QUERY_RUNS_MAX_LIMIT};
use ok_domain::error::{Error, Result};
use ok_domain::event::AgentEvent;
use ok_domain::run::{AgentProfile, DispatchMode, RunStatus, TrackedRun};
use ok_mailbox::{ChildProgressQuery, MailboxSystem, SendRequest};
use ok_providers::traits::LlmProvider;
use ok_sessions::persistence::SessionPersistence;
use ok_domain::compaction::SessionConfig;
use uuid::Uuid;

use crate::privileged_tools;
use crate::runtime::{AgentRuntime, ExecuteCommand};

/// A request to launch a child run under a controller's supervision.
pub struct DispatchCommand {
    pub child_agent_id: String,
    pub parent_run_id: Uuid,
    pub input: String,
    pub mode: DispatchMode,
    pub subagent_type: String,
    pub timeout_ms: Option<u64>,
}

/// What a successful dispatch hands back immediately — the run id and its
/// initial status, not its outcome. A `Foreground` dispatch's caller is
/// expected to follow up with `waitForMessages`; `Background` dispatches are
/// fire-and-forget until the terminal notification lands in the parent's
/// mailbox.
pub struct DispatchHandle {
    pub run_id: Uuid,
    pub status: RunStatus,
}

/// Filters `query_runs`/`agent_get_status` accept, matching §6's status
/// query tool contract: `{runId?, agentId?, parentRunId?, parentAgentId?,
/// statuses?, limit?}`. `parent_agent_id` isn't in the model-facing tool
/// schema (it can't name another agent's run by id, only its own), but the
/// kernel uses it internally to implement the "no filters → default to my
/// own runs" fallback for controllers, whose default is their children's
/// runs rather than their own.
#[derive(Debug, Clone, Default)]
pub struct RunQueryFilter {
    pub run_id: Option<Uuid>,
    pub parent_run_id: Option<Uuid>,
    pub agent_id: Option<String>,
    pub parent_agent_id: Option<String>,
    pub statuses: Option<Vec<RunStatus>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Owns the agent runtime and the inter-agent mailbox system, and is the
/// one thing privileged tools hold a (weak) handle back to. Constructed
/// with `Arc::new_cyclic` so those tools never form a reference cycle with
/// the kernel that installed them.
pub struct OrchestratorKernel {
    pub(crate) runtime: Arc<AgentRuntime>,
    pub(crate) mailbox: Arc<MailboxSystem>,
    self_weak: Weak<OrchestratorKernel>,
}

impl OrchestratorKernel {
    pub fn new(
        persistence: Arc<dyn SessionPersistence>,
        session_config: SessionConfig,
        mailbox_config: MailboxConfig,
    ) -> Arc<Self> {
        let runtime = AgentRuntime::new(persistence, session_config);
        let mailbox = Arc::new(MailboxSystem::new(mailbox_config));
        Arc::new_cyclic(|weak| Self {
            runtime,
            mailbox,
            self_weak: weak.clone(),
        })
    }

    pub fn register_provider(&self, provider: Arc<dyn LlmProvider>) {
        self.runtime.register_provider(provider);
    }

    /// Registers (or re-registers) an agent and installs its privileged
    /// tools. Idempotent: re-registering the same `agent_id` reuses the
    /// same tool registry, so calling this twice never double-installs.
    pub fn register_agent(&self, profile: AgentProfile) {
        let registry = self.runtime.upsert_agent(profile);
        privileged_tools::install_privileged_tools(&registry, self.self_weak.clone());
    }

    pub fn agent_exists(&self, agent_id: &str) -> bool {
        self.runtime.agent_exists(agent_id)
    }

    pub fn run_status(&self, run_id: Uuid) -> Option<ok_domain::run::RunRecord> {
        self.runtime.status(run_id)
    }

    pub fn subscribe(&self, run_id: Uuid) -> Option<tokio::sync::broadcast::Receiver<AgentEvent>> {
        self.runtime.subscribe(run_id)
    }

    pub fn abort(&self, run_id: Uuid) -> bool {
        self.runtime.abort(run_id)
    }

    /// Top-level entry point: dispatch the controller agent on a goal with
    /// no parent run. Fails if no agent has been registered with the
    /// `"controller"` role.
    pub fn execute_goal(&self, goal: impl Into<String>) -> Result<Uuid> {
        let controller = self
            .runtime
            .controller_agent_id()
            .ok_or_else(|| Error::Config("no controller agent registered".to_string()))?;
        self.runtime.execute(ExecuteCommand {
            agent_id: controller,
            input: goal.into(),
            parent_run_id: None,
            timeout_ms: None,
            metadata: serde_json::Value::Null,
        })
    }

    /// Launches a child run and, for the duration of its life, watches it
    /// for a terminal status so exactly one notification lands in the
    /// parent's mailbox. Only a controller may dispatch (enforced by the
    /// privileged tool that calls this, not by this method itself, since
    /// the kernel has no notion of "caller" below the tool layer).
    pub fn dispatch(self: &Arc<Self>, cmd: DispatchCommand) -> Result<DispatchHandle> {
        if !self.runtime.agent_exists(&cmd.child_agent_id) {
            return Err(Error::NotFound(format!("unknown agent: {}", cmd.child_agent_id)));
        }
        let metadata = serde_json::json!({
            "mode": cmd.mode,
            "subagent_type": cmd.subagent_type.clone(),
        });
        let run_id = self.runtime.execute(ExecuteCommand {
            agent_id: cmd.child_agent_id,
            input: cmd.input,
            parent_run_id: Some(cmd.parent_run_id),
            timeout_ms: cmd.timeout_ms,
            metadata,
        })?;
        let status = self.runtime.status(run_id).map_or(RunStatus::Queued, |r| r.status);

        let kernel = self.clone();
        tokio::spawn(async move {
            kernel.watch_child(cmd.parent_run_id, run_id).await;
        });

        Ok(DispatchHandle { run_id, status })
    }

    /// Races a subscription to the child's event stream against a coarse
    /// poll of its status, so the notification fires as soon as either
    /// signal sees a terminal state — whichever arrives first. Posts
    /// exactly one terminal notification per run, keyed by an idempotency
    /// key so a retry (or a race between the two signals) can never
    /// double-post.
    async fn watch_child(&self, parent_run_id: Uuid, child_run_id: Uuid) {
        let mut events = self.runtime.subscribe(child_run_id);
        let poll_interval = Duration::from_millis(CHILD_WATCH_POLL_MS);

        loop {
            if self.runtime.status(child_run_id).map_or(true, |r| r.status.is_terminal()) {
                break;
            }
            match &mut events {
                Some(rx) => {
                    tokio::select! {
                        event = rx.recv() => {
                            match event {
                                Ok(AgentEvent::Status { status }) if status.is_terminal() => break,
                                Ok(_) => {}
                                Err(_) => tokio::time::sleep(poll_interval).await,
                            }
                        }
                        _ = tokio::time::sleep(poll_interval) => {}
                    }
                }
                None => tokio::time::sleep(poll_interval).await,
            }
        }

        self.notify_child_terminal(parent_run_id, child_run_id).await;
    }

    async fn notify_child_terminal(&self, parent_run_id: Uuid, child_run_id: Uuid) {
        let Some(child) = self.runtime.status(child_run_id) else { return };
        let Some(parent) = self.runtime.status(parent_run_id) else { return };

        let topic = if child.status == RunStatus::Completed {
            "child-task-completed"
        } else {
            "child-task-terminal"
        };

        let payload = serde_json::json!({
            "runId": child_run_id,
            "parentRunId": parent_run_id,
            "status": child.status,
            "output": child.output,
            "error": child.error,
            "finishedAt": child.finished_at,
        });
        let payload = payload.as_object().cloned().unwrap_or_default();

        let req = SendRequest {
            from: child.agent_id.clone(),
            to: parent.agent_id.clone(),
            payload,
            topic: Some(topic.to_string()),
            idempotency_key: Some(format!("child-terminal:{child_run_id}")),
            correlation_id: Some(parent_run_id.to_string()),
            run_id: Some(child_run_id),
            max_attempts: None,
            visible_at: None,
        };

        let runtime = &self.runtime;
        if let Err(e) = self.mailbox.send_message(req, |id| runtime.agent_exists(id)) {
            tracing::warn!(parent_run_id = %parent_run_id, child_run_id = %child_run_id, error = %e, "failed to post child-terminal notification");
        }
    }

    /// Paginated, filtered view over every tracked run — the read side a
    /// controller's `queryRuns` tool (and this kernel's own child-progress
    /// lookups) both go through. Sorted newest-first, per §4.5.
    pub fn query_runs(&self, filter: RunQueryFilter) -> Vec<TrackedRun> {
        let limit = filter
            .limit
            .unwrap_or(QUERY_RUNS_DEFAULT_LIMIT)
            .min(QUERY_RUNS_MAX_LIMIT);
        let offset = filter.offset.unwrap_or(0);

        let all = self.runtime.all_runs();
        let agent_of = |run_id: Uuid| all.iter().find(|r| r.run_id == run_id).map(|r| r.agent_id.clone());

        let mut runs: Vec<TrackedRun> = all
            .iter()
            .filter(|r| filter.run_id.map_or(true, |id| r.run_id == id))
            .filter(|r| filter.parent_run_id.map_or(true, |p| r.parent_run_id == Some(p)))
            .filter(|r| filter.agent_id.as_deref().map_or(true, |a| r.agent_id == a))
            .filter(|r| {
                filter.parent_agent_id.as_deref().map_or(true, |a| {
                    r.parent_run_id.and_then(agent_of).as_deref() == Some(a)
                })
            })
            .filter(|r| filter.statuses.as_ref().map_or(true, |s| s.contains(&r.status)))
            .map(TrackedRun::from)
            .collect();

        runs.sort_by_key(|r| std::cmp::Reverse(r.created_at));
        runs.into_iter().skip(offset).take(limit).collect()
    }
}

#[async_trait::async_trait]
impl ChildProgressQuery for OrchestratorKernel {
    async fn child_progress(&self, parent_run_id: Uuid) -> Vec<serde_json::Value> {
        self.query_runs(RunQueryFilter {
            parent_run_id: Some(parent_run_id),
            statuses: Some(vec![RunStatus::Queued, RunStatus::Running]),
            limit: Some(200),
            ..Default::default()
        })
        .into_iter()
        .filter_map(|r| serde_json::to_value(r).ok())
        .collect()
    }
}
