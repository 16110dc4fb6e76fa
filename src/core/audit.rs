//! Session-scoped audit trail.
//!
//! Each `record` call assigns the next sequence id, timestamps the event,
//! forwards it to the sink and keeps a copy for session summaries. Records
//! are serialised, so the sink and the in-memory copy both hold events in
//! sequence order even when callers overlap.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use crate::domain::{AuditEvent, AuditKind};

use super::event_store::AuditSink;

/// Per-session counts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditSummary {
    pub session_id: String,
    pub total_entries: usize,
    pub counts_by_kind: BTreeMap<AuditKind, usize>,
    pub sink: String,
}

/// Append-only recorder for one session
pub struct AuditTrail {
    session_id: String,
    /// Last assigned sequence id; held across the sink write
    last_sequence: AsyncMutex<u64>,
    entries: Mutex<Vec<AuditEvent>>,
    sink: Arc<dyn AuditSink>,
}

impl AuditTrail {
    /// Start a new session with a fresh short id
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        let session_id = Uuid::new_v4().simple().to_string()[..8].to_string();
        Self::with_session_id(session_id, sink)
    }

    /// Start a session with a caller-chosen id (e.g. one per conversation)
    pub fn with_session_id(session_id: impl Into<String>, sink: Arc<dyn AuditSink>) -> Self {
        Self {
            session_id: session_id.into(),
            last_sequence: AsyncMutex::new(0),
            entries: Mutex::new(Vec::new()),
            sink,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Record an event and return its sequence id.
    ///
    /// Sequence ids start at 1 and are never reused, even if the sink fails.
    pub async fn record(&self, kind: AuditKind, payload: Value) -> Result<u64> {
        let mut last_sequence = self.last_sequence.lock().await;
        *last_sequence += 1;
        let sequence_id = *last_sequence;
        let event = AuditEvent::new(self.session_id.clone(), sequence_id, kind, payload);

        self.sink.append(&event).await.with_context(|| {
            format!(
                "Failed to persist audit event {} ({}) to {}",
                sequence_id,
                kind,
                self.sink.describe()
            )
        })?;

        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);

        Ok(sequence_id)
    }

    /// Events recorded in this session, in order
    pub fn entries(&self) -> Vec<AuditEvent> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn summary(&self) -> AuditSummary {
        let entries = self.entries();
        let mut counts_by_kind = BTreeMap::new();
        for event in &entries {
            *counts_by_kind.entry(event.kind).or_insert(0) += 1;
        }

        AuditSummary {
            session_id: self.session_id.clone(),
            total_entries: entries.len(),
            counts_by_kind,
            sink: self.sink.describe(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event_store::MemoryAuditSink;
    use async_trait::async_trait;
    use serde_json::json;

    struct FailingSink;

    #[async_trait]
    impl AuditSink for FailingSink {
        fn describe(&self) -> String {
            "failing".to_string()
        }

        async fn append(&self, _event: &AuditEvent) -> Result<()> {
            anyhow::bail!("disk full")
        }
    }

    #[tokio::test]
    async fn test_sequence_ids_are_monotonic() {
        let trail = AuditTrail::new(Arc::new(MemoryAuditSink::new()));
        let a = trail.record(AuditKind::UserRequest, json!({})).await.unwrap();
        let b = trail.record(AuditKind::SafetyCheck, json!({})).await.unwrap();
        let c = trail.record(AuditKind::AgentResponse, json!({})).await.unwrap();
        assert_eq!((a, b, c), (1, 2, 3));
        assert_eq!(trail.session_id().len(), 8);
    }

    /// Sink that yields before storing, so overlapping records interleave
    #[derive(Default)]
    struct YieldingSink {
        events: Mutex<Vec<AuditEvent>>,
    }

    #[async_trait]
    impl AuditSink for YieldingSink {
        fn describe(&self) -> String {
            "yielding".to_string()
        }

        async fn append(&self, event: &AuditEvent) -> Result<()> {
            for _ in 0..(event.sequence_id % 3) {
                tokio::task::yield_now().await;
            }
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_overlapping_records_stay_in_sequence_order() {
        let sink = Arc::new(YieldingSink::default());
        let trail = Arc::new(AuditTrail::new(sink.clone()));

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let trail = trail.clone();
                tokio::spawn(async move {
                    trail
                        .record(AuditKind::FunctionCall, json!({ "task": i }))
                        .await
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let expected: Vec<u64> = (1..=32).collect();
        let stored: Vec<u64> = sink.events.lock().unwrap().iter().map(|e| e.sequence_id).collect();
        let kept: Vec<u64> = trail.entries().iter().map(|e| e.sequence_id).collect();
        assert_eq!(stored, expected);
        assert_eq!(kept, expected);
    }

    #[tokio::test]
    async fn test_summary_counts_by_kind() {
        let sink = Arc::new(MemoryAuditSink::new());
        let trail = AuditTrail::with_session_id("conv-1", sink.clone());
        trail.record(AuditKind::FunctionCall, json!({})).await.unwrap();
        trail.record(AuditKind::FunctionResult, json!({})).await.unwrap();
        trail.record(AuditKind::FunctionCall, json!({})).await.unwrap();

        let summary = trail.summary();
        assert_eq!(summary.session_id, "conv-1");
        assert_eq!(summary.total_entries, 3);
        assert_eq!(summary.counts_by_kind[&AuditKind::FunctionCall], 2);
        assert_eq!(summary.sink, "memory");
        assert!(sink.events().iter().all(|e| e.session_id == "conv-1"));
    }

    #[tokio::test]
    async fn test_sink_failure_propagates_and_burns_sequence() {
        let trail = AuditTrail::new(Arc::new(FailingSink));
        let err = trail.record(AuditKind::UserRequest, json!({})).await.unwrap_err();
        assert!(format!("{:#}", err).contains("disk full"));
        assert!(trail.entries().is_empty());

        let err = trail.record(AuditKind::UserRequest, json!({})).await.unwrap_err();
        assert!(err.to_string().contains("event 2"));
    }
}
