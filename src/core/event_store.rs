//! Append-only audit sinks.
//!
//! Events are stored as newline-delimited JSON (JSONL) so the log can be
//! inspected with ordinary tools. Lines are only ever appended.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use fs2::FileExt;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::domain::AuditEvent;

/// Durable destination for audit events. One call, one event; never edited.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Where events go (for summaries and diagnostics)
    fn describe(&self) -> String;

    /// Persist one event. An error here means audit durability was lost.
    async fn append(&self, event: &AuditEvent) -> Result<()>;
}

/// File-based sink using JSONL format
pub struct JsonlAuditSink {
    /// Path to the audit log file
    path: PathBuf,
}

impl JsonlAuditSink {
    /// Open (creating parent directories as needed) an audit log
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create audit directory: {}", parent.display()))?;
        }
        Ok(Self { path })
    }

    /// Get the path to the audit log
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back every event in file order
    pub async fn replay(&self) -> Result<Vec<AuditEvent>> {
        replay_file(&self.path).await
    }
}

/// Read every event from a JSONL audit log; a missing file has no events
pub async fn replay_file(path: &Path) -> Result<Vec<AuditEvent>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)
        .await
        .with_context(|| format!("Failed to open audit log: {}", path.display()))?;

    let reader = BufReader::new(file);
    let mut lines = reader.lines();
    let mut events = Vec::new();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let event: AuditEvent = serde_json::from_str(&line)
            .with_context(|| format!("Failed to parse audit event: {}", line))?;
        events.push(event);
    }

    Ok(events)
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn append(&self, event: &AuditEvent) -> Result<()> {
        let json = serde_json::to_string(event).context("Failed to serialize audit event")?;
        let path = self.path.clone();

        // Lock waits and fsync stay off the async workers
        tokio::task::spawn_blocking(move || append_line(&path, &json))
            .await
            .context("Audit writer task failed")?
    }
}

/// Append one line to a JSONL file under an exclusive lock
fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open audit log: {}", path.display()))?;

    // Other processes may share the log
    file.lock_exclusive()
        .context("Failed to acquire file lock on audit log")?;

    writeln!(file, "{}", line).context("Failed to write audit event")?;
    file.flush().context("Failed to flush audit event")?;
    file.sync_data().context("Failed to sync audit log")?;

    // Lock is released when file is dropped
    Ok(())
}

/// Sink that keeps events in memory
#[derive(Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything appended so far
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn append(&self, event: &AuditEvent) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| anyhow!("Audit memory sink lock poisoned"))?
            .push(event.clone());
        Ok(())
    }
}
