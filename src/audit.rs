//! Non-blocking audit trail for model calls and repair stages.
//!
//! [`AuditLog::record`] never blocks and never fails: events go into a
//! bounded channel with `try_send`, and a background task appends them to
//! a JSON-lines file. A full channel drops the event. Without a file the
//! events are only emitted as `tracing` debug records.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 1024;
/// Raw content longer than this is cut before it is written.
const MAX_RAW_CHARS: usize = 8000;

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    /// Correlates the stages of one repair run.
    pub run_id: Option<Uuid>,
    pub stage: String,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl AuditEvent {
    pub fn new(stage: &str, outcome: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            run_id: None,
            stage: stage.to_string(),
            outcome: outcome.to_string(),
            detail: None,
            raw: None,
        }
    }

    pub fn run(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn raw(mut self, raw: &str) -> Self {
        self.raw = Some(raw.chars().take(MAX_RAW_CHARS).collect());
        self
    }
}

#[derive(Clone)]
pub struct AuditLog {
    sender: Option<mpsc::Sender<AuditEvent>>,
    dropped: Arc<AtomicU64>,
}

impl AuditLog {
    /// Tracing only; nothing is written to disk.
    pub fn disabled() -> Self {
        Self {
            sender: None,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start the background writer appending to `path`.
    ///
    /// Must be called inside a tokio runtime. The returned handle finishes
    /// once every clone of the log has been dropped.
    pub fn to_file(path: &Path) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let handle = tokio::spawn(drain(path.to_path_buf(), receiver));
        (
            Self {
                sender: Some(sender),
                dropped: Arc::new(AtomicU64::new(0)),
            },
            handle,
        )
    }

    pub fn record(&self, event: AuditEvent) {
        tracing::debug!(
            stage = %event.stage,
            outcome = %event.outcome,
            detail = event.detail.as_deref().unwrap_or(""),
            "audit"
        );
        let Some(sender) = &self.sender else {
            return;
        };
        if sender.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("audit channel full or closed, event dropped");
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

async fn drain(path: PathBuf, mut receiver: mpsc::Receiver<AuditEvent>) {
    if let Some(parent) = path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            tracing::debug!(error = %e, "audit directory unavailable");
        }
    }

    let mut file = match tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
    {
        Ok(f) => Some(f),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "audit log disabled");
            None
        }
    };

    while let Some(event) = receiver.recv().await {
        let Some(f) = file.as_mut() else {
            continue;
        };
        let mut line = match serde_json::to_string(&event) {
            Ok(l) => l,
            Err(e) => {
                tracing::debug!(error = %e, "audit event not serializable");
                continue;
            }
        };
        line.push('\n');
        if let Err(e) = f.write_all(line.as_bytes()).await {
            tracing::debug!(error = %e, "audit write failed");
            continue;
        }
        let _ = f.flush().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn writes_json_lines() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("logs").join("audit.jsonl");
        let (log, handle) = AuditLog::to_file(&path);

        let run = Uuid::new_v4();
        log.record(AuditEvent::new("strict", "failed").run(run).raw("{\"a\":"));
        log.record(AuditEvent::new("completion", "ok").run(run));
        drop(log);
        handle.await.unwrap();

        let body = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = body
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["stage"], "strict");
        assert_eq!(lines[0]["raw"], "{\"a\":");
        assert_eq!(lines[1]["outcome"], "ok");
        assert_eq!(lines[0]["run_id"], lines[1]["run_id"]);
    }

    #[tokio::test]
    async fn disabled_log_accepts_events() {
        let log = AuditLog::disabled();
        log.record(AuditEvent::new("llm", "ok"));
        assert_eq!(log.dropped(), 0);
    }

    #[test]
    fn raw_content_is_capped() {
        let long = "x".repeat(MAX_RAW_CHARS + 100);
        let e = AuditEvent::new("strict", "failed").raw(&long);
        assert_eq!(e.raw.unwrap().len(), MAX_RAW_CHARS);
    }
}
