//! Per-agent inter-agent mailboxes: at-least-once delivery with leases,
//! retries, dead-letters, idempotent sends and long-poll waits.

pub mod progress;
pub mod state;
pub mod system;

pub use progress::{ChildProgressQuery, NullChildProgressQuery};
pub use state::{NackOutcome, SendRequest};
pub use system::{MailboxSystem, WaitOptions, WaitResult};

#[cfg(test)]
mod tests {
    use super::*;
    use ok_domain::config::MailboxConfig;
    use std::time::Duration;

    fn all_exist(_: &str) -> bool {
        true
    }

    fn send(from: &str, to: &str, topic: &str) -> SendRequest {
        SendRequest {
            from: from.to_string(),
            to: to.to_string(),
            payload: serde_json::Map::new(),
            topic: Some(topic.to_string()),
            idempotency_key: None,
            correlation_id: None,
            run_id: None,
            max_attempts: None,
            visible_at: None,
        }
    }

    #[test]
    fn scenario_s3_lease_expiry_requeues_with_incremented_attempt() {
        let system = MailboxSystem::new(MailboxConfig::default());
        system.send_message(send("reviewer", "coder", "bug"), all_exist).unwrap();

        let first = system.receive_messages("coder", None, Some(100));
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].attempt, 1);

        std::thread::sleep(Duration::from_millis(120));

        let second = system.receive_messages("coder", None, None);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].message_id, first[0].message_id);
        assert_eq!(second[0].attempt, 2);
        assert_eq!(second[0].last_error.as_deref(), Some("lease expired"));
    }

    #[test]
    fn scenario_s4_dead_letter_on_retry_exhaustion() {
        let system = MailboxSystem::new(MailboxConfig::default());
        let mut req = send("reviewer", "coder", "bug");
        req.max_attempts = Some(1);
        system.send_message(req, all_exist).unwrap();

        let received = system.receive_messages("coder", None, None);
        assert_eq!(received.len(), 1);

        let outcome = system.nack_message("coder", &received[0].message_id, "x", 0).unwrap();
        assert!(!outcome.requeued);
        assert!(outcome.dead_lettered);

        let dead = system.list_dead_letters("coder", 20);
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].last_error.as_deref(), Some("x"));

        assert!(system.receive_messages("coder", None, None).is_empty());
    }

    #[test]
    fn idempotent_send_returns_the_same_message_and_does_not_duplicate() {
        let system = MailboxSystem::new(MailboxConfig::default());
        let mut req = send("reviewer", "coder", "bug");
        req.idempotency_key = Some("child-terminal:r1:completed".to_string());
        let first = system.send_message(req.clone(), all_exist).unwrap();
        let second = system.send_message(req, all_exist).unwrap();
        assert_eq!(first.message_id, second.message_id);

        let received = system.receive_messages("coder", None, None);
        assert_eq!(received.len(), 1);
    }

    #[test]
    fn send_rejects_unknown_agents() {
        let system = MailboxSystem::new(MailboxConfig::default());
        let result = system.send_message(send("ghost", "coder", "bug"), |id| id != "ghost");
        assert!(result.is_err());
    }

    #[test]
    fn ack_removes_the_message_permanently() {
        let system = MailboxSystem::new(MailboxConfig::default());
        system.send_message(send("reviewer", "coder", "bug"), all_exist).unwrap();
        let received = system.receive_messages("coder", None, None);
        system.ack_message("coder", &received[0].message_id).unwrap();
        assert!(system.nack_message("coder", &received[0].message_id, "x", 0).is_err());
    }

    struct StubProgress(Vec<serde_json::Value>);

    #[async_trait::async_trait]
    impl ChildProgressQuery for StubProgress {
        async fn child_progress(&self, _parent_run_id: uuid::Uuid) -> Vec<serde_json::Value> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn wait_for_messages_returns_immediately_when_wait_ms_is_zero() {
        let system = MailboxSystem::new(MailboxConfig::default());
        let opts = WaitOptions {
            wait_ms: 0,
            poll_interval_ms: 10,
            limit: None,
            lease_ms: None,
            parent_run_id: None,
            include_child_progress_on_timeout: true,
        };
        let result = system.wait_for_messages("controller", opts, None, None).await;
        assert!(result.timed_out);
        assert!(result.messages.is_empty());
    }

    #[tokio::test]
    async fn scenario_s6_wait_with_progress_timeout_reports_child_progress() {
        let system = MailboxSystem::new(MailboxConfig::default());
        let run_id = uuid::Uuid::new_v4();
        let opts = WaitOptions {
            wait_ms: 50,
            poll_interval_ms: 10,
            limit: None,
            lease_ms: None,
            parent_run_id: Some(run_id),
            include_child_progress_on_timeout: true,
        };
        let progress = StubProgress(vec![serde_json::json!({"runId": run_id, "status": "running"})]);
        let result = system.wait_for_messages("controller", opts, Some(&progress), None).await;
        assert!(result.timed_out);
        assert!(result.messages.is_empty());
        assert_eq!(result.child_progress.len(), 1);
    }

    #[tokio::test]
    async fn wait_for_messages_returns_as_soon_as_a_message_arrives() {
        let system = MailboxSystem::new(MailboxConfig::default());
        system.send_message(send("reviewer", "coder", "bug"), all_exist).unwrap();
        let opts = WaitOptions {
            wait_ms: 1000,
            poll_interval_ms: 10,
            limit: None,
            lease_ms: None,
            parent_run_id: None,
            include_child_progress_on_timeout: true,
        };
        let result = system.wait_for_messages("coder", opts, None, None).await;
        assert!(!result.timed_out);
        assert_eq!(result.messages.len(), 1);
    }
}
