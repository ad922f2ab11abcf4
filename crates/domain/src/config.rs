use serde::{Deserialize, Serialize};

/// Truncation-middleware tunables (global defaults; a tool may override
/// both caps and head/tail preference).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TruncationConfig {
    #[serde(default = "d_max_lines")]
    pub max_lines: usize,
    #[serde(default = "d_max_bytes")]
    pub max_bytes: usize,
    #[serde(default = "d_spill_dir")]
    pub spill_dir: String,
    #[serde(default = "d_retention_days")]
    pub retention_days: u32,
    /// Tools that bypass truncation entirely (in addition to the per-result
    /// `metadata.truncated` and `skipTools` escape hatches).
    #[serde(default)]
    pub skip_tools: Vec<String>,
}

fn d_max_lines() -> usize {
    2000
}
fn d_max_bytes() -> usize {
    50 * 1024
}
fn d_spill_dir() -> String {
    "./data/truncation/".to_string()
}
fn d_retention_days() -> u32 {
    14
}

impl Default for TruncationConfig {
    fn default() -> Self {
        Self {
            max_lines: d_max_lines(),
            max_bytes: d_max_bytes(),
            spill_dir: d_spill_dir(),
            retention_days: d_retention_days(),
            skip_tools: Vec::new(),
        }
    }
}

/// Mailbox operation defaults, overridable per call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MailboxConfig {
    #[serde(default = "d_receive_limit")]
    pub receive_limit: usize,
    #[serde(default = "d_lease_ms")]
    pub lease_ms: i64,
    #[serde(default = "d_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "d_wait_ms")]
    pub wait_ms: i64,
    #[serde(default = "d_poll_interval_ms")]
    pub poll_interval_ms: i64,
}

fn d_receive_limit() -> usize {
    10
}
fn d_lease_ms() -> i64 {
    15_000
}
fn d_max_attempts() -> u32 {
    3
}
fn d_wait_ms() -> i64 {
    30_000
}
fn d_poll_interval_ms() -> i64 {
    400
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            receive_limit: d_receive_limit(),
            lease_ms: d_lease_ms(),
            max_attempts: d_max_attempts(),
            wait_ms: d_wait_ms(),
            poll_interval_ms: d_poll_interval_ms(),
        }
    }
}

/// Child-watcher poll period, kernel-wide.
pub const CHILD_WATCH_POLL_MS: u64 = 600;

/// `queryRuns` pagination defaults.
pub const QUERY_RUNS_DEFAULT_LIMIT: usize = 50;
pub const QUERY_RUNS_MAX_LIMIT: usize = 200;
