//! Per-mutation audit records.
//!
//! Every mutation reports one [`ActionLogEntry`] when it finishes,
//! successful or not. Recording is fire-and-forget: a sink that fails
//! must swallow the failure and never affect the mutation result.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::PoisonError;

use serde::Serialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const REDACTED: &str = "[REDACTED]";

/// Keys always scrubbed from logged payloads. Matching ignores case.
pub const DEFAULT_REDACTED_KEYS: &[&str] = &[
    "token",
    "password",
    "secret",
    "authorization",
    "api_key",
    "email",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
    BulkUpdate,
    AddComment,
    MarkdownCreate,
    MarkdownUpdate,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::BulkUpdate => "bulk_update",
            Operation::AddComment => "add_comment",
            Operation::MarkdownCreate => "markdown_create",
            Operation::MarkdownUpdate => "markdown_update",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionLogEntry {
    pub timestamp: String,
    pub operation: Operation,
    pub collection: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<String>,
    pub success: bool,
    pub retry_count: u32,
    pub conflict_detected: bool,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Request body with sensitive keys replaced by [`REDACTED`].
    pub payload: Value,
}

pub trait ActionLogSink: Send + Sync {
    fn record(&self, entry: ActionLogEntry);
}

/// Scrubs sensitive keys from JSON payloads at any depth.
#[derive(Debug, Clone)]
pub struct Redactor {
    keys: Vec<String>,
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new(std::iter::empty::<String>())
    }
}

impl Redactor {
    /// Default keys plus `extra`.
    pub fn new<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut keys: Vec<String> = DEFAULT_REDACTED_KEYS
            .iter()
            .map(|k| k.to_string())
            .collect();
        for key in extra {
            let key = key.as_ref().trim().to_ascii_lowercase();
            if !key.is_empty() && !keys.contains(&key) {
                keys.push(key);
            }
        }
        Self { keys }
    }

    pub fn redact(&self, mut value: Value) -> Value {
        self.redact_in_place(&mut value);
        value
    }

    fn redact_in_place(&self, value: &mut Value) {
        match value {
            Value::Object(map) => {
                for (key, inner) in map.iter_mut() {
                    if self.is_sensitive(key) {
                        *inner = Value::String(REDACTED.to_string());
                    } else {
                        self.redact_in_place(inner);
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.redact_in_place(item);
                }
            }
            _ => {}
        }
    }

    fn is_sensitive(&self, key: &str) -> bool {
        let key = key.to_ascii_lowercase();
        self.keys.iter().any(|k| *k == key)
    }
}

/// Emits entries as structured `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ActionLogSink for TracingSink {
    fn record(&self, entry: ActionLogEntry) {
        let payload = entry.payload.to_string();
        if entry.success {
            tracing::info!(
                target: "issuevault::action_log",
                operation = entry.operation.as_str(),
                collection = %entry.collection,
                issue_id = entry.issue_id.as_deref(),
                retry_count = entry.retry_count,
                duration_ms = entry.duration_ms,
                payload = %payload,
                "mutation succeeded"
            );
        } else {
            tracing::warn!(
                target: "issuevault::action_log",
                operation = entry.operation.as_str(),
                collection = %entry.collection,
                issue_id = entry.issue_id.as_deref(),
                retry_count = entry.retry_count,
                conflict_detected = entry.conflict_detected,
                duration_ms = entry.duration_ms,
                error = entry.error.as_deref(),
                payload = %payload,
                "mutation failed"
            );
        }
    }
}

/// Drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl ActionLogSink for NoopSink {
    fn record(&self, _entry: ActionLogEntry) {}
}

/// Keeps entries in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<ActionLogEntry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<ActionLogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ActionLogSink for MemorySink {
    fn record(&self, entry: ActionLogEntry) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }
}

/// Appends entries as JSON lines from a background task.
///
/// Must be created inside a tokio runtime.
#[derive(Debug)]
pub struct JsonlFileSink {
    tx: mpsc::UnboundedSender<ActionLogEntry>,
    writer: JoinHandle<()>,
}

impl JsonlFileSink {
    pub fn spawn(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<ActionLogEntry>();

        let writer = tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                if let Err(e) = append_line(&path, &entry).await {
                    tracing::warn!(path = %path.display(), error = %e, "action log write failed");
                }
            }
        });

        Self { tx, writer }
    }

    /// Flush queued entries and stop the writer.
    pub async fn close(self) {
        drop(self.tx);
        if let Err(e) = self.writer.await {
            tracing::warn!(error = %e, "action log writer task failed");
        }
    }
}

impl ActionLogSink for JsonlFileSink {
    fn record(&self, entry: ActionLogEntry) {
        if self.tx.send(entry).is_err() {
            tracing::debug!("action log writer is gone; entry dropped");
        }
    }
}

async fn append_line(path: &Path, entry: &ActionLogEntry) -> std::io::Result<()> {
    let mut line = serde_json::to_vec(entry).map_err(std::io::Error::other)?;
    line.push(b'\n');
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(&line).await?;
    file.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn entry(payload: Value) -> ActionLogEntry {
        ActionLogEntry {
            timestamp: "2026-01-01T00:00:00.000Z".to_string(),
            operation: Operation::Update,
            collection: ".beads".to_string(),
            issue_id: Some("bd-1".to_string()),
            success: true,
            retry_count: 1,
            conflict_detected: false,
            duration_ms: 12,
            error: None,
            payload,
        }
    }

    #[test]
    fn redacts_nested_keys_case_insensitively() {
        let redactor = Redactor::new(["session_id"]);
        let out = redactor.redact(json!({
            "updates": {"title": "x", "Password": "hunter2"},
            "auth": [{"TOKEN": "abc", "user": "kim"}],
            "session_id": 7,
            "email": {"nested": true}
        }));
        assert_eq!(
            out,
            json!({
                "updates": {"title": "x", "Password": REDACTED},
                "auth": [{"TOKEN": REDACTED, "user": "kim"}],
                "session_id": REDACTED,
                "email": REDACTED
            })
        );
    }

    #[test]
    fn entry_serializes_camel_case() {
        let value = serde_json::to_value(entry(json!({}))).unwrap();
        assert_eq!(value["retryCount"], json!(1));
        assert_eq!(value["conflictDetected"], json!(false));
        assert_eq!(value["durationMs"], json!(12));
        assert_eq!(value["operation"], json!("update"));
        assert!(value.get("error").is_none());
    }

    #[tokio::test]
    async fn jsonl_sink_appends_lines() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("logs/actions.jsonl");
        let sink = JsonlFileSink::spawn(&path);
        sink.record(entry(json!({"n": 1})));
        sink.record(entry(json!({"n": 2})));
        sink.close().await;

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["payload"], json!({"n": 2}));
    }

    #[tokio::test]
    async fn jsonl_sink_swallows_write_failures() {
        let dir = tempfile::TempDir::new().unwrap();
        // A directory where the file should be makes every append fail.
        let path = dir.path().join("taken");
        std::fs::create_dir(&path).unwrap();
        let sink = JsonlFileSink::spawn(&path);
        sink.record(entry(json!({})));
        sink.close().await;
        assert!(path.is_dir());
    }
}
