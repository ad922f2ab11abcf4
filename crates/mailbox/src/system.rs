use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::{Duration, Utc};
use ok_domain::config::MailboxConfig;
use ok_domain::error::{Error, Result};
use ok_domain::mailbox::InterAgentMessage;
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::progress::ChildProgressQuery;
use crate::state::{NackOutcome, PerAgentMailbox, SendRequest};

#[derive(Debug, Clone)]
pub struct WaitOptions {
    pub wait_ms: i64,
    pub poll_interval_ms: i64,
    pub limit: Option<usize>,
    pub lease_ms: Option<i64>,
    pub parent_run_id: Option<Uuid>,
    pub include_child_progress_on_timeout: bool,
}

impl WaitOptions {
    pub fn new(config: &MailboxConfig) -> Self {
        Self {
            wait_ms: config.wait_ms,
            poll_interval_ms: config.poll_interval_ms,
            limit: None,
            lease_ms: None,
            parent_run_id: None,
            include_child_progress_on_timeout: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WaitResult {
    pub timed_out: bool,
    pub messages: Vec<InterAgentMessage>,
    pub child_progress: Vec<serde_json::Value>,
}

/// All per-agent mailboxes in a deployment. All-in-one entry point the
/// kernel's privileged tools call through; each agent's own `PerAgentMailbox`
/// is the unit of locking, so two agents never contend on each other's
/// traffic.
pub struct MailboxSystem {
    mailboxes: RwLock<HashMap<String, Arc<Mutex<PerAgentMailbox>>>>,
    config: MailboxConfig,
}

impl MailboxSystem {
    pub fn new(config: MailboxConfig) -> Self {
        Self {
            mailboxes: RwLock::new(HashMap::new()),
            config,
        }
    }

    fn mailbox_for(&self, agent_id: &str) -> Arc<Mutex<PerAgentMailbox>> {
        if let Some(existing) = self.mailboxes.read().get(agent_id) {
            return existing.clone();
        }
        self.mailboxes
            .write()
            .entry(agent_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(PerAgentMailbox::default())))
            .clone()
    }

    /// `agent_exists` is supplied by the caller (the kernel's agent
    /// registry) rather than owned here, so this crate never needs to know
    /// what an agent profile looks like.
    pub fn send_message(&self, raw: SendRequest, agent_exists: impl Fn(&str) -> bool) -> Result<InterAgentMessage> {
        if !agent_exists(&raw.from) {
            return Err(Error::Validation(format!("unknown agent: {}", raw.from)));
        }
        if !agent_exists(&raw.to) {
            return Err(Error::Validation(format!("unknown agent: {}", raw.to)));
        }
        let to = raw.to.clone();
        let mailbox = self.mailbox_for(&to);
        let mut mb = mailbox.lock();
        let message = mb.send(raw, Utc::now());
        tracing::debug!(to = %to, message_id = %message.message_id, topic = ?message.topic, "mailbox: message enqueued");
        Ok(message)
    }

    pub fn receive_messages(&self, agent_id: &str, limit: Option<usize>, lease_ms: Option<i64>) -> Vec<InterAgentMessage> {
        let mailbox = self.mailbox_for(agent_id);
        let lease = Duration::milliseconds(lease_ms.unwrap_or(self.config.lease_ms));
        let mut mb = mailbox.lock();
        mb.receive(limit.unwrap_or(self.config.receive_limit), lease, Utc::now())
    }

    pub fn ack_message(&self, agent_id: &str, message_id: &str) -> Result<()> {
        let mailbox = self.mailbox_for(agent_id);
        if mailbox.lock().ack(message_id) {
            Ok(())
        } else {
            Err(Error::NotFound(format!("no in-flight message {message_id} for {agent_id}")))
        }
    }

    pub fn nack_message(&self, agent_id: &str, message_id: &str, error: impl Into<String>, requeue_delay_ms: i64) -> Result<NackOutcome> {
        let mailbox = self.mailbox_for(agent_id);
        let outcome = mailbox
            .lock()
            .nack(message_id, error, Duration::milliseconds(requeue_delay_ms), Utc::now())
            .ok_or_else(|| Error::NotFound(format!("no in-flight message {message_id} for {agent_id}")))?;
        if outcome.dead_lettered {
            tracing::warn!(agent_id, message_id, "mailbox: retry budget exhausted, message dead-lettered");
        }
        Ok(outcome)
    }

    pub fn list_dead_letters(&self, agent_id: &str, limit: usize) -> Vec<InterAgentMessage> {
        self.mailbox_for(agent_id).lock().dead_letters(limit)
    }

    pub async fn wait_for_messages(
        &self,
        agent_id: &str,
        opts: WaitOptions,
        progress: Option<&dyn ChildProgressQuery>,
        cancel: Option<&CancellationToken>,
    ) -> WaitResult {
        let deadline = Instant::now() + StdDuration::from_millis(opts.wait_ms.max(0) as u64);
        let poll_interval = StdDuration::from_millis(opts.poll_interval_ms.max(1) as u64);

        loop {
            let messages = self.receive_messages(agent_id, opts.limit, opts.lease_ms);
            if !messages.is_empty() {
                return WaitResult {
                    timed_out: false,
                    messages,
                    child_progress: Vec::new(),
                };
            }

            if Instant::now() >= deadline {
                let child_progress = self.collect_child_progress(&opts, progress).await;
                return WaitResult {
                    timed_out: true,
                    messages: Vec::new(),
                    child_progress,
                };
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let sleep_for = poll_interval.min(remaining);
            if let Some(token) = cancel {
                tokio::select! {
                    _ = tokio::time::sleep(sleep_for) => {}
                    _ = token.cancelled() => {
                        let child_progress = self.collect_child_progress(&opts, progress).await;
                        return WaitResult { timed_out: true, messages: Vec::new(), child_progress };
                    }
                }
            } else {
                tokio::time::sleep(sleep_for).await;
            }
        }
    }

    async fn collect_child_progress(&self, opts: &WaitOptions, progress: Option<&dyn ChildProgressQuery>) -> Vec<serde_json::Value> {
        if !opts.include_child_progress_on_timeout {
            return Vec::new();
        }
        match (opts.parent_run_id, progress) {
            (Some(parent_run_id), Some(query)) => query.child_progress(parent_run_id).await,
            _ => Vec::new(),
        }
    }
}
