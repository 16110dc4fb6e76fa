//! Core orchestration logic.
//!
//! This module contains:
//! - Safety: Request and call classification
//! - Resolver: Request text to operation plan
//! - Dispatcher: Argument validation and API invocation
//! - Orchestrator: Main request loop
//! - Audit: Session-scoped audit trail and its sinks

pub mod audit;
pub mod dispatcher;
pub mod event_store;
pub mod orchestrator;
pub mod resolver;
pub mod safety;

// Re-export commonly used types
pub use audit::{AuditSummary, AuditTrail};
pub use dispatcher::{DispatchError, Dispatcher, OperationArgs};
pub use event_store::{replay_file, AuditSink, JsonlAuditSink, MemoryAuditSink};
pub use orchestrator::{Orchestrator, DEFAULT_MAX_REQUEST_CHARS};
pub use resolver::{GenerativeOutcome, IntentResolver, Resolution, Strategy};
pub use safety::{clean_request, sanitize_request, SafetyClassifier};
