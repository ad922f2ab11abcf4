use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use ok_domain::mailbox::{InterAgentMessage, MailboxMessageStatus};
use uuid::Uuid;

/// A `send()` call before it has been assigned a `messageId` and defaults.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub from: String,
    pub to: String,
    pub payload: serde_json::Map<String, serde_json::Value>,
    pub topic: Option<String>,
    pub idempotency_key: Option<String>,
    pub correlation_id: Option<String>,
    pub run_id: Option<Uuid>,
    pub max_attempts: Option<u32>,
    pub visible_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NackOutcome {
    pub requeued: bool,
    pub dead_lettered: bool,
}

/// Per-recipient FIFO queue plus its in-flight leases, dead-letter pile and
/// idempotency index. Every method takes `&mut self` and the whole thing
/// sits behind one lock per agent — callers serialize through that, never
/// through fine-grained locking inside here.
#[derive(Default)]
pub struct PerAgentMailbox {
    queue: VecDeque<InterAgentMessage>,
    in_flight: HashMap<String, InterAgentMessage>,
    dead_letters: Vec<InterAgentMessage>,
    idempotency_index: HashMap<String, String>,
}

impl PerAgentMailbox {
    pub fn send(&mut self, raw: SendRequest, now: DateTime<Utc>) -> InterAgentMessage {
        if let Some(key) = &raw.idempotency_key {
            if let Some(existing_id) = self.idempotency_index.get(key) {
                if let Some(found) = self.find(existing_id) {
                    return found.clone();
                }
            }
        }

        let message_id = Uuid::new_v4().to_string();
        let message = InterAgentMessage {
            message_id: message_id.clone(),
            timestamp: now,
            from_agent_id: raw.from,
            to_agent_id: raw.to,
            payload: raw.payload,
            topic: raw.topic,
            correlation_id: raw.correlation_id,
            run_id: raw.run_id,
            idempotency_key: raw.idempotency_key.clone(),
            status: MailboxMessageStatus::Queued,
            visible_at: raw.visible_at.unwrap_or(now),
            lease_until: None,
            attempt: 0,
            max_attempts: raw.max_attempts.unwrap_or(3),
            last_error: None,
        };

        if let Some(key) = raw.idempotency_key {
            self.idempotency_index.insert(key, message_id);
        }
        self.queue.push_back(message.clone());
        message
    }

    fn find(&self, message_id: &str) -> Option<&InterAgentMessage> {
        self.queue
            .iter()
            .find(|m| m.message_id == message_id)
            .or_else(|| self.in_flight.get(message_id))
            .or_else(|| self.dead_letters.iter().find(|m| m.message_id == message_id))
    }

    fn requeue_expired_leases(&mut self, now: DateTime<Utc>) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, m)| m.lease_until.is_some_and(|lu| lu <= now))
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            if let Some(mut message) = self.in_flight.remove(&id) {
                tracing::debug!(message_id = %id, "mailbox: lease expired, requeuing");
                message.status = MailboxMessageStatus::Queued;
                message.lease_until = None;
                message.last_error = Some("lease expired".to_string());
                self.queue.push_back(message);
            }
        }
    }

    pub fn receive(&mut self, limit: usize, lease: Duration, now: DateTime<Utc>) -> Vec<InterAgentMessage> {
        self.requeue_expired_leases(now);

        let mut delivered = Vec::new();
        let mut remaining = VecDeque::with_capacity(self.queue.len());
        while let Some(mut message) = self.queue.pop_front() {
            if delivered.len() >= limit || message.visible_at > now {
                remaining.push_back(message);
                continue;
            }
            message.attempt += 1;
            message.status = MailboxMessageStatus::InFlight;
            message.lease_until = Some(now + lease);
            let copy = message.clone();
            self.in_flight.insert(message.message_id.clone(), message);
            delivered.push(copy);
        }
        self.queue = remaining;
        delivered
    }

    pub fn ack(&mut self, message_id: &str) -> bool {
        self.in_flight.remove(message_id).is_some()
    }

    pub fn nack(&mut self, message_id: &str, error: impl Into<String>, requeue_delay: Duration, now: DateTime<Utc>) -> Option<NackOutcome> {
        let mut message = self.in_flight.remove(message_id)?;
        let error = error.into();
        if message.attempt >= message.max_attempts {
            message.status = MailboxMessageStatus::DeadLetter;
            message.last_error = Some(error);
            self.dead_letters.push(message);
            Some(NackOutcome {
                requeued: false,
                dead_lettered: true,
            })
        } else {
            message.status = MailboxMessageStatus::Queued;
            message.visible_at = now + requeue_delay;
            message.lease_until = None;
            message.last_error = Some(error);
            self.queue.push_back(message);
            Some(NackOutcome {
                requeued: true,
                dead_lettered: false,
            })
        }
    }

    pub fn dead_letters(&self, limit: usize) -> Vec<InterAgentMessage> {
        self.dead_letters.iter().take(limit).cloned().collect()
    }
}
