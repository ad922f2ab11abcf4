//! The pluggable, consumed persistence interface. Two implementations are
//! expected in a full deployment — on-disk files and a remote document
//! database — tested by swapping the factory; this crate ships the
//! in-memory one so the kernel and its tests never need a real backend.

use std::collections::HashMap;

use ok_domain::compaction::CompactionRecord;
use ok_domain::error::Result;
use ok_domain::message::Message;
use ok_domain::run::SubTaskRun;
use parking_lot::Mutex;

#[async_trait::async_trait]
pub trait SessionPersistence: Send + Sync {
    async fn create_session(&self, session_id: &str) -> Result<()>;
    async fn get_session(&self, session_id: &str) -> Result<bool>;
    async fn add_message_to_context(&self, session_id: &str, message: Message) -> Result<()>;
    async fn get_current_context(&self, session_id: &str) -> Result<Vec<Message>>;
    async fn compact_context(&self, session_id: &str, keep_last_n: usize, summary_message: Message) -> Result<()>;
    async fn get_full_history(&self, session_id: &str) -> Result<Vec<Message>>;
    async fn save_sub_task_run(&self, run: SubTaskRun) -> Result<()>;
    async fn get_sub_task_run(&self, run_id: uuid::Uuid) -> Result<Option<SubTaskRun>>;
    async fn save_task(&self, task: serde_json::Value) -> Result<()>;
    async fn query_tasks(&self, filter: serde_json::Value) -> Result<Vec<serde_json::Value>>;
    async fn get_compaction_records(&self, session_id: &str) -> Result<Vec<CompactionRecord>>;
    async fn record_compaction(&self, session_id: &str, record: CompactionRecord) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

#[derive(Default)]
struct SessionDoc {
    full_history: Vec<Message>,
    current_context: Vec<Message>,
    compaction_records: Vec<CompactionRecord>,
}

/// In-memory `SessionPersistence`. Good enough for tests and for embedding
/// applications that don't need durability across process restarts.
#[derive(Default)]
pub struct InMemoryPersistence {
    sessions: Mutex<HashMap<String, SessionDoc>>,
    sub_task_runs: Mutex<HashMap<uuid::Uuid, SubTaskRun>>,
    tasks: Mutex<Vec<serde_json::Value>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SessionPersistence for InMemoryPersistence {
    async fn create_session(&self, session_id: &str) -> Result<()> {
        self.sessions.lock().entry(session_id.to_string()).or_default();
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<bool> {
        Ok(self.sessions.lock().contains_key(session_id))
    }

    async fn add_message_to_context(&self, session_id: &str, message: Message) -> Result<()> {
        let mut sessions = self.sessions.lock();
        let doc = sessions.entry(session_id.to_string()).or_default();
        doc.full_history.push(message.clone());
        doc.current_context.push(message);
        Ok(())
    }

    async fn get_current_context(&self, session_id: &str) -> Result<Vec<Message>> {
        Ok(self
            .sessions
            .lock()
            .get(session_id)
            .map(|d| d.current_context.clone())
            .unwrap_or_default())
    }

    async fn compact_context(&self, session_id: &str, keep_last_n: usize, summary_message: Message) -> Result<()> {
        let mut sessions = self.sessions.lock();
        let doc = sessions.entry(session_id.to_string()).or_default();
        if doc.current_context.is_empty() {
            return Ok(());
        }
        let system = doc.current_context[0].clone();
        let suffix_start = doc.current_context.len().saturating_sub(keep_last_n);
        let suffix = doc.current_context[suffix_start.max(1)..].to_vec();
        let mut rebuilt = vec![system, summary_message];
        rebuilt.extend(suffix);
        doc.current_context = rebuilt;
        Ok(())
    }

    async fn get_full_history(&self, session_id: &str) -> Result<Vec<Message>> {
        Ok(self
            .sessions
            .lock()
            .get(session_id)
            .map(|d| d.full_history.clone())
            .unwrap_or_default())
    }

    async fn save_sub_task_run(&self, run: SubTaskRun) -> Result<()> {
        self.sub_task_runs.lock().insert(run.run_id, run);
        Ok(())
    }

    async fn get_sub_task_run(&self, run_id: uuid::Uuid) -> Result<Option<SubTaskRun>> {
        Ok(self.sub_task_runs.lock().get(&run_id).cloned())
    }

    async fn save_task(&self, task: serde_json::Value) -> Result<()> {
        self.tasks.lock().push(task);
        Ok(())
    }

    async fn query_tasks(&self, _filter: serde_json::Value) -> Result<Vec<serde_json::Value>> {
        Ok(self.tasks.lock().clone())
    }

    async fn get_compaction_records(&self, session_id: &str) -> Result<Vec<CompactionRecord>> {
        Ok(self
            .sessions
            .lock()
            .get(session_id)
            .map(|d| d.compaction_records.clone())
            .unwrap_or_default())
    }

    async fn record_compaction(&self, session_id: &str, record: CompactionRecord) -> Result<()> {
        let mut sessions = self.sessions.lock();
        let doc = sessions.entry(session_id.to_string()).or_default();
        doc.compaction_records.push(record);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_message_appears_in_both_histories() {
        let p = InMemoryPersistence::new();
        p.create_session("s1").await.unwrap();
        p.add_message_to_context("s1", Message::user("u1", "hi")).await.unwrap();
        assert_eq!(p.get_current_context("s1").await.unwrap().len(), 1);
        assert_eq!(p.get_full_history("s1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn compact_context_keeps_full_history_intact() {
        let p = InMemoryPersistence::new();
        p.create_session("s1").await.unwrap();
        for i in 0..5 {
            p.add_message_to_context("s1", Message::user(format!("u{i}"), "hi")).await.unwrap();
        }
        p.compact_context("s1", 2, Message::assistant("summary-1", "recap")).await.unwrap();
        let ctx = p.get_current_context("s1").await.unwrap();
        assert_eq!(ctx.len(), 4); // system-slot + summary + 2 kept
        assert_eq!(p.get_full_history("s1").await.unwrap().len(), 5);
    }
}
