use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ok_domain::compaction::SessionConfig;
use ok_domain::config::TruncationConfig;
use ok_domain::error::{Error, Result};
use ok_domain::event::{AgentEvent, RunStatusEvent};
use ok_domain::run::{AgentProfile, RunNode, RunRecord, RunStatus};
use ok_providers::traits::LlmProvider;
use ok_sessions::persistence::SessionPersistence;
use ok_tools::ToolRegistry;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cancel::CancelMap;

/// A request to start a run. Mirrors `agent::run_agent`'s parameters,
/// generalized from a session-key/task pair to an agent id and input.
pub struct ExecuteCommand {
    pub agent_id: String,
    pub input: String,
    pub parent_run_id: Option<Uuid>,
    pub timeout_ms: Option<u64>,
    pub metadata: serde_json::Value,
}

/// Owns every registered agent's profile, provider handle and tool
/// registry, plus every run's live state and event stream. One runtime per
/// deployment; the orchestrator kernel sits on top of it.
pub struct AgentRuntime {
    profiles: RwLock<HashMap<String, AgentProfile>>,
    tool_registries: RwLock<HashMap<String, Arc<ToolRegistry>>>,
    providers: RwLock<HashMap<String, Arc<dyn LlmProvider>>>,
    persistence: Arc<dyn SessionPersistence>,
    session_config: SessionConfig,
    runs: RwLock<HashMap<Uuid, Arc<Mutex<RunRecord>>>>,
    events: RwLock<HashMap<Uuid, broadcast::Sender<AgentEvent>>>,
    cancel: CancelMap,
}

impl AgentRuntime {
    pub fn new(persistence: Arc<dyn SessionPersistence>, session_config: SessionConfig) -> Arc<Self> {
        Arc::new(Self {
            profiles: RwLock::new(HashMap::new()),
            tool_registries: RwLock::new(HashMap::new()),
            providers: RwLock::new(HashMap::new()),
            persistence,
            session_config,
            runs: RwLock::new(HashMap::new()),
            events: RwLock::new(HashMap::new()),
            cancel: CancelMap::new(),
        })
    }

    pub fn register_provider(&self, provider: Arc<dyn LlmProvider>) {
        self.providers.write().insert(provider.provider_id().to_string(), provider);
    }

    /// Registers (or re-registers) an agent profile and returns its tool
    /// registry — created once per agent id and kept across re-registration
    /// so privileged-tool installation stays idempotent.
    pub fn upsert_agent(&self, profile: AgentProfile) -> Arc<ToolRegistry> {
        let agent_id = profile.agent_id.clone();
        let timeout = Duration::from_millis(profile.limits.tool_timeout_ms);
        self.profiles.write().insert(agent_id.clone(), profile);
        self.tool_registries
            .write()
            .entry(agent_id)
            .or_insert_with(|| Arc::new(ToolRegistry::new(timeout, TruncationConfig::default())))
            .clone()
    }

    pub fn agent_profile(&self, agent_id: &str) -> Option<AgentProfile> {
        self.profiles.read().get(agent_id).cloned()
    }

    pub fn tool_registry(&self, agent_id: &str) -> Option<Arc<ToolRegistry>> {
        self.tool_registries.read().get(agent_id).cloned()
    }

    pub fn agent_exists(&self, agent_id: &str) -> bool {
        self.profiles.read().contains_key(agent_id)
    }

    pub fn controller_agent_id(&self) -> Option<String> {
        self.profiles.read().values().find(|p| p.is_controller()).map(|p| p.agent_id.clone())
    }

    pub fn persistence(&self) -> &Arc<dyn SessionPersistence> {
        &self.persistence
    }

    pub fn status(&self, run_id: Uuid) -> Option<RunRecord> {
        self.runs.read().get(&run_id).map(|r| r.lock().clone())
    }

    pub fn all_runs(&self) -> Vec<RunRecord> {
        self.runs.read().values().map(|r| r.lock().clone()).collect()
    }

    pub fn subscribe(&self, run_id: Uuid) -> Option<broadcast::Receiver<AgentEvent>> {
        self.events.read().get(&run_id).map(|tx| tx.subscribe())
    }

    pub fn emit(&self, run_id: Uuid, event: AgentEvent) {
        if let Some(tx) = self.events.read().get(&run_id) {
            let _ = tx.send(event);
        }
    }

    /// Signals cooperative cancellation for a run (and, by cascade, every
    /// run registered under it).
    pub fn abort(&self, run_id: Uuid) -> bool {
        self.cancel.cancel(run_id)
    }

    pub fn cancel_token(&self, run_id: Uuid) -> Option<CancellationToken> {
        self.cancel.token(run_id)
    }

    pub fn remove_from_group(&self, parent_run_id: Uuid, child_run_id: Uuid) {
        self.cancel.remove_from_group(parent_run_id, child_run_id);
    }

    pub fn cleanup_events(&self, run_id: Uuid) {
        self.events.write().remove(&run_id);
    }

    /// Starts a new run on `cmd.agent_id`, spawning its think→act→observe→
    /// reflect loop and returning immediately with the run id.
    pub fn execute(self: &Arc<Self>, cmd: ExecuteCommand) -> Result<Uuid> {
        let profile = self
            .agent_profile(&cmd.agent_id)
            .ok_or_else(|| Error::NotFound(format!("unknown agent: {}", cmd.agent_id)))?;
        let provider = self
            .providers
            .read()
            .get(&profile.provider_id)
            .cloned()
            .ok_or_else(|| Error::Config(format!("unknown provider: {}", profile.provider_id)))?;
        let registry = self
            .tool_registry(&cmd.agent_id)
            .ok_or_else(|| Error::NotFound(format!("no tool registry for agent: {}", cmd.agent_id)))?;

        let mut record = RunRecord::new(cmd.agent_id.clone(), cmd.input.clone(), cmd.parent_run_id);
        record.metadata = cmd.metadata;
        let run_id = record.run_id;
        self.runs.write().insert(run_id, Arc::new(Mutex::new(record)));
        let (tx, _rx) = broadcast::channel(256);
        self.events.write().insert(run_id, tx);

        let cancel_token = self.cancel.register(run_id);
        if let Some(parent) = cmd.parent_run_id {
            self.cancel.add_to_group(parent, run_id);
        }

        let runtime = self.clone();
        let deadline = cmd.timeout_ms.map(Duration::from_millis);
        let session_config = self.session_config;
        let input = cmd.input;
        tokio::spawn(async move {
            crate::loop_exec::run(runtime, run_id, profile, provider, registry, input, session_config, cancel_token, deadline).await;
        });

        Ok(run_id)
    }

    pub(crate) fn start_run(&self, run_id: Uuid) {
        if let Some(r) = self.runs.read().get(&run_id) {
            r.lock().start();
        }
        self.emit(run_id, AgentEvent::Status { status: RunStatusEvent::Running });
        tracing::info!(run_id = %run_id, "run started");
    }

    pub(crate) fn finish_run(&self, run_id: Uuid, status: RunStatus, output: Option<String>, error: Option<String>) {
        if let Some(r) = self.runs.read().get(&run_id) {
            r.lock().finish(status, output, error);
        }
        self.cancel.remove(run_id);
        tracing::info!(run_id = %run_id, ?status, "run finished");
    }

    pub(crate) fn push_node(&self, run_id: Uuid, node: RunNode) {
        if let Some(r) = self.runs.read().get(&run_id) {
            r.lock().nodes.push(node);
        }
    }

    pub(crate) fn bump_loop_count(&self, run_id: Uuid) {
        if let Some(r) = self.runs.read().get(&run_id) {
            r.lock().loop_count += 1;
        }
    }
}
