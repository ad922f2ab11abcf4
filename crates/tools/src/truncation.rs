use ok_domain::config::TruncationConfig;
use rand::Rng;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::executor::{ToolExecResult, TruncationPreference};

const ALNUM: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..6).map(|_| ALNUM[rng.gen_range(0..ALNUM.len())] as char).collect()
}

fn spill_file_name(tool_name: &str) -> String {
    let unix_ms = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
    format!("{tool_name}_{unix_ms}_{}.txt", random_suffix())
}

/// Byte/line cap applied to a tool's output before it re-enters the
/// conversation. Output within limits passes through untouched; output over
/// either cap is head- or tail-truncated (per-tool preference) with the full
/// text spilled to disk and a pointer left in its place.
///
/// Runs after the tool returns and before its result becomes part of the
/// message log, so neither the model nor the UI ever see an unbounded blob.
pub async fn apply(tool_name: &str, config: &TruncationConfig, preference: TruncationPreference, result: &mut ToolExecResult) {
    if config.skip_tools.iter().any(|t| t == tool_name) {
        return;
    }
    if result.metadata.get("truncated").and_then(serde_json::Value::as_bool) == Some(true) {
        return;
    }
    let Some(output) = result.output.clone() else {
        return;
    };
    let line_count = output.lines().count();
    let byte_count = output.len();
    if line_count <= config.max_lines && byte_count <= config.max_bytes {
        return;
    }

    let lines: Vec<&str> = output.lines().collect();
    let kept_lines: Vec<&str> = match preference {
        TruncationPreference::KeepHead => lines.iter().take(config.max_lines).copied().collect(),
        TruncationPreference::KeepTail => {
            let start = lines.len().saturating_sub(config.max_lines);
            lines[start..].to_vec()
        }
    };
    let mut kept = kept_lines.join("\n");
    truncate_to_byte_budget(&mut kept, config.max_bytes, preference);

    let removed_lines = line_count.saturating_sub(kept.lines().count());
    let removed_bytes = byte_count.saturating_sub(kept.len());

    let spill_path = spill(&config.spill_dir, tool_name, &output).await;
    let notice = match spill_path {
        Some(path) => {
            tracing::debug!(tool = tool_name, removed_lines, removed_bytes, path = %path, "tool output truncated, full output spilled to disk");
            format!(
                "\n\n[...truncated: {removed_lines} lines / {removed_bytes} bytes removed. Full output saved to: {path}]"
            )
        }
        None => format!("\n\n[...truncated: {removed_lines} lines / {removed_bytes} bytes removed]"),
    };
    result.output = Some(format!("{kept}{notice}"));

    let mut meta = match result.metadata.take() {
        serde_json::Value::Object(m) => m,
        _ => serde_json::Map::new(),
    };
    meta.insert("truncated".into(), serde_json::Value::Bool(true));
    meta.insert("removedLines".into(), serde_json::Value::from(removed_lines));
    meta.insert("removedBytes".into(), serde_json::Value::from(removed_bytes));
    result.metadata = serde_json::Value::Object(meta);
}

fn truncate_to_byte_budget(text: &mut String, max_bytes: usize, preference: TruncationPreference) {
    if text.len() <= max_bytes {
        return;
    }
    match preference {
        TruncationPreference::KeepHead => {
            let mut end = max_bytes.min(text.len());
            while end > 0 && !text.is_char_boundary(end) {
                end -= 1;
            }
            text.truncate(end);
        }
        TruncationPreference::KeepTail => {
            let mut start = text.len().saturating_sub(max_bytes);
            while start < text.len() && !text.is_char_boundary(start) {
                start += 1;
            }
            *text = text[start..].to_string();
        }
    }
}

async fn spill(dir: &str, tool_name: &str, full_output: &str) -> Option<String> {
    if tokio::fs::create_dir_all(dir).await.is_err() {
        return None;
    }
    let path: PathBuf = PathBuf::from(dir).join(spill_file_name(tool_name));
    tokio::fs::write(&path, full_output).await.ok()?;
    Some(path.to_string_lossy().to_string())
}

/// Deletes spill files older than `retention_days`. Meant to run on a slow
/// timer (kernel startup, daily tick), not per tool call.
pub async fn cleanup_stale(dir: &str, retention_days: u32) {
    let cutoff = std::time::Duration::from_secs(u64::from(retention_days) * 86_400);
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return;
    };
    let now = SystemTime::now();
    let mut removed = 0u32;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let Ok(meta) = entry.metadata().await else { continue };
        let Ok(modified) = meta.modified() else { continue };
        if now.duration_since(modified).unwrap_or_default() > cutoff {
            if tokio::fs::remove_file(entry.path()).await.is_ok() {
                removed += 1;
            }
        }
    }
    if removed > 0 {
        tracing::debug!(removed, dir, "truncation spill cleanup removed stale files");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_lines: usize, max_bytes: usize, dir: &str) -> TruncationConfig {
        TruncationConfig {
            max_lines,
            max_bytes,
            spill_dir: dir.to_string(),
            retention_days: 14,
            skip_tools: Vec::new(),
        }
    }

    #[tokio::test]
    async fn output_at_exactly_the_limit_is_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config(3, 1024, tmp.path().to_str().unwrap());
        let mut result = ToolExecResult::ok("a\nb\nc");
        apply("reader", &cfg, TruncationPreference::KeepHead, &mut result).await;
        assert_eq!(result.output.unwrap(), "a\nb\nc");
        assert_eq!(result.metadata, serde_json::Value::Null);
    }

    #[tokio::test]
    async fn output_one_line_over_the_limit_is_truncated_and_spilled() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config(3, 1024, tmp.path().to_str().unwrap());
        let mut result = ToolExecResult::ok("a\nb\nc\nd");
        apply("reader", &cfg, TruncationPreference::KeepHead, &mut result).await;
        let output = result.output.unwrap();
        assert!(output.starts_with("a\nb\nc"));
        assert!(output.contains("truncated"));
        assert_eq!(result.metadata["truncated"], serde_json::Value::Bool(true));

        let mut spilled = tokio::fs::read_dir(tmp.path()).await.unwrap();
        let entry = spilled.next_entry().await.unwrap().unwrap();
        let name = entry.file_name().into_string().unwrap();
        assert!(name.starts_with("reader_"));
        let contents = tokio::fs::read_to_string(entry.path()).await.unwrap();
        assert_eq!(contents, "a\nb\nc\nd");
    }

    #[tokio::test]
    async fn tail_preference_keeps_the_end_of_the_output() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config(2, 1024, tmp.path().to_str().unwrap());
        let mut result = ToolExecResult::ok("a\nb\nc\nd");
        apply("log_tail", &cfg, TruncationPreference::KeepTail, &mut result).await;
        assert!(result.output.unwrap().starts_with("c\nd"));
    }

    #[tokio::test]
    async fn skip_tools_bypasses_truncation_entirely() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = config(1, 4, tmp.path().to_str().unwrap());
        cfg.skip_tools.push("raw_dump".to_string());
        let mut result = ToolExecResult::ok("a\nb\nc\nd\ne");
        apply("raw_dump", &cfg, TruncationPreference::KeepHead, &mut result).await;
        assert_eq!(result.output.unwrap(), "a\nb\nc\nd\ne");
    }

    #[tokio::test]
    async fn already_self_truncated_output_is_left_alone() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config(1, 4, tmp.path().to_str().unwrap());
        let mut result = ToolExecResult::ok("a\nb\nc\nd\ne");
        result.metadata = serde_json::json!({"truncated": true});
        apply("reader", &cfg, TruncationPreference::KeepHead, &mut result).await;
        assert_eq!(result.output.unwrap(), "a\nb\nc\nd\ne");
        assert_eq!(result.metadata["truncated"], serde_json::Value::Bool(true));
    }
}
