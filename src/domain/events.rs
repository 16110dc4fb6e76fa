//! Audit events.
//!
//! Every decision point of request processing is recorded as an immutable
//! event in an append-only log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single entry in the audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When this event was recorded
    pub timestamp: DateTime<Utc>,

    /// Session this event belongs to
    pub session_id: String,

    /// Position within the session, starting at 1
    pub sequence_id: u64,

    /// Kind of decision or action recorded
    pub kind: AuditKind,

    /// Structured detail (request text, verdict, arguments, outcome...)
    pub payload: Value,
}

impl AuditEvent {
    /// Create a new event with the current timestamp
    pub fn new(session_id: String, sequence_id: u64, kind: AuditKind, payload: Value) -> Self {
        Self {
            timestamp: Utc::now(),
            session_id,
            sequence_id,
            kind,
            payload,
        }
    }
}

/// Kinds of audited action
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// Raw request as received
    UserRequest,

    /// Request passed the safety classifier
    SafetyCheck,

    /// Request was refused by the safety classifier
    SafetyViolation,

    /// A live operation is about to be dispatched
    FunctionCall,

    /// An operation is about to be dispatched in dry-run mode
    DryRun,

    /// Outcome of a dispatched operation
    FunctionResult,

    /// Final response summary
    AgentResponse,

    /// Backend fallback, blocked call, or other recovered error
    Error,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserRequest => "user_request",
            Self::SafetyCheck => "safety_check",
            Self::SafetyViolation => "safety_violation",
            Self::FunctionCall => "function_call",
            Self::DryRun => "dry_run",
            Self::FunctionResult => "function_result",
            Self::AgentResponse => "agent_response",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for AuditKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
