use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tunable knobs governing when and how a session compacts its log.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "d_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "d_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "d_trigger_ratio")]
    pub trigger_ratio: f64,
    #[serde(default = "d_keep_messages_num")]
    pub keep_messages_num: usize,
    #[serde(default = "d_auto")]
    pub auto: bool,
}

fn d_max_tokens() -> u32 {
    128_000
}
fn d_max_output_tokens() -> u32 {
    4_096
}
fn d_trigger_ratio() -> f64 {
    0.9
}
fn d_keep_messages_num() -> usize {
    12
}
fn d_auto() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_tokens: d_max_tokens(),
            max_output_tokens: d_max_output_tokens(),
            trigger_ratio: d_trigger_ratio(),
            keep_messages_num: d_keep_messages_num(),
            auto: d_auto(),
        }
    }
}

impl SessionConfig {
    pub fn usable_limit(&self) -> u32 {
        self.max_tokens.saturating_sub(self.max_output_tokens)
    }

    pub fn threshold(&self) -> f64 {
        self.usable_limit() as f64 * self.trigger_ratio
    }
}

/// Token-budget snapshot returned by `getTokenInfo()`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TokenInfo {
    pub estimated_total: u32,
    pub usable_limit: u32,
    pub threshold: f64,
    pub message_count: usize,
    pub should_compact: bool,
}

/// Audit-trail entry recorded every time a session compacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionRecord {
    pub reason: String,
    pub archived_message_ids: Vec<String>,
    pub timestamp: DateTime<Utc>,
}
