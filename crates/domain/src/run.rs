use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-agent limits threaded into the runtime loop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AgentLimits {
    #[serde(default = "d_max_loops")]
    pub max_loops: u32,
    #[serde(default = "d_max_tools_per_task")]
    pub max_tools_per_task: u32,
    #[serde(default = "d_tool_timeout_ms")]
    pub tool_timeout_ms: u64,
}

fn d_max_loops() -> u32 {
    30
}
fn d_max_tools_per_task() -> u32 {
    16
}
fn d_tool_timeout_ms() -> u64 {
    60_000
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self {
            max_loops: d_max_loops(),
            max_tools_per_task: d_max_tools_per_task(),
            tool_timeout_ms: d_tool_timeout_ms(),
        }
    }
}

/// A configured identity: a role, a system prompt, a provider handle and a
/// tool registry handle. Owned by the runtime; immutable after `upsert`
/// except for tool-registry mutation (registering new tools in place).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub agent_id: String,
    /// Free-form role label. The distinguished value `"controller"` marks
    /// the agent permitted to dispatch child runs.
    pub role: String,
    pub system_prompt: String,
    /// Identifier of the provider this agent talks to (resolved by the
    /// embedder; the kernel treats it as an opaque handle).
    pub provider_id: String,
    pub limits: AgentLimits,
}

impl AgentProfile {
    pub fn is_controller(&self) -> bool {
        self.role == "controller"
    }
}

/// `status ∈ {queued, running, completed, failed, aborted, cancelled}`.
/// `cancelled` means the run was aborted before it ever started running;
/// `aborted` means it was aborted mid-flight. Both are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Aborted,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Aborted | RunStatus::Cancelled
        )
    }
}

/// One node (LLM request or tool call) in a run's execution trace, kept for
/// status-query observability. Not required by any correctness invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    LlmRequest,
    ToolCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunNode {
    pub kind: NodeKind,
    pub name: String,
    pub is_error: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub input_preview: String,
    pub output_preview: String,
}

/// A single invocation of an agent on an input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: uuid::Uuid,
    pub agent_id: String,
    pub parent_run_id: Option<uuid::Uuid>,
    pub status: RunStatus,
    pub input: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub output: Option<String>,
    pub error: Option<String>,
    pub loop_count: u32,
    pub nodes: Vec<RunNode>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl RunRecord {
    pub fn new(agent_id: impl Into<String>, input: impl Into<String>, parent_run_id: Option<uuid::Uuid>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4(),
            agent_id: agent_id.into(),
            parent_run_id,
            status: RunStatus::Queued,
            input: input.into(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            output: None,
            error: None,
            loop_count: 0,
            nodes: Vec::new(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Monotone terminal transition: once terminal, further calls are no-ops.
    pub fn finish(&mut self, status: RunStatus, output: Option<String>, error: Option<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
        self.output = output;
        self.error = error;
        self.finished_at = Some(Utc::now());
    }

    pub fn start(&mut self) {
        if self.status == RunStatus::Queued {
            self.status = RunStatus::Running;
            self.started_at = Some(Utc::now());
        }
    }
}

/// Kernel-side shadow of `RunRecord`, sufficient for topology queries
/// without a runtime round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedRun {
    pub run_id: uuid::Uuid,
    pub agent_id: String,
    pub parent_run_id: Option<uuid::Uuid>,
    pub created_at: DateTime<Utc>,
    pub status: RunStatus,
}

impl From<&RunRecord> for TrackedRun {
    fn from(r: &RunRecord) -> Self {
        Self {
            run_id: r.run_id,
            agent_id: r.agent_id.clone(),
            parent_run_id: r.parent_run_id,
            created_at: r.created_at,
            status: r.status,
        }
    }
}

/// `mode ∈ {foreground, background}` for a child run launched by a dispatch
/// (Task) tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    Foreground,
    Background,
}

/// Persisted record of a child run launched by the dispatch tool. Messages
/// themselves are not duplicated here; they live in the child session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTaskRun {
    pub run_id: uuid::Uuid,
    pub parent_run_id: uuid::Uuid,
    pub child_agent_id: String,
    pub mode: DispatchMode,
    pub status: RunStatus,
    pub subagent_type: String,
    pub started_at: DateTime<Utc>,
    pub message_count: u32,
    pub output: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_is_monotone() {
        let mut r = RunRecord::new("coder", "do it", None);
        r.start();
        r.finish(RunStatus::Completed, Some("done".into()), None);
        assert_eq!(r.status, RunStatus::Completed);
        // A second finish attempt must not overwrite the terminal state.
        r.finish(RunStatus::Failed, None, Some("late error".into()));
        assert_eq!(r.status, RunStatus::Completed);
        assert_eq!(r.output.as_deref(), Some("done"));
    }

    #[test]
    fn terminal_statuses() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Aborted.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(!RunStatus::Queued.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }

    #[test]
    fn tracked_run_mirrors_record() {
        let r = RunRecord::new("coder", "x", None);
        let t: TrackedRun = (&r).into();
        assert_eq!(t.run_id, r.run_id);
        assert_eq!(t.status, RunStatus::Queued);
    }
}
