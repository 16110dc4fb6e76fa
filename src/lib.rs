//! clinflow - Safety-gated clinical administration workflow orchestrator
//!
//! Turns a free-text administrative request ("schedule a cardiology
//! follow-up for patient Ravi Kumar next week") into an ordered plan of
//! validated, audited calls against a clinical resource API, refusing
//! anything that reads as diagnosis, treatment advice, prescription or an
//! emergency.
//!
//! # Architecture
//!
//! - `SafetyClassifier` gates every request and every outgoing call
//! - `IntentResolver` produces a plan from a completion backend, or from
//!   rules when no backend is usable
//! - `Dispatcher` validates arguments and invokes the API
//! - `Orchestrator` walks the plan, binding identifiers between steps
//! - `AuditTrail` records one append-only event per decision point
//!
//! # Modules
//!
//! - `adapters`: External capabilities (clinical API, completion backend)
//! - `core`: Classification, resolution, dispatch, orchestration, audit
//! - `domain`: Data structures (plans, verdicts, resources, events)
//! - `config`: Layered configuration
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! clinflow run "Search for patient Ravi Kumar"
//! clinflow run --dry-run "Schedule a cardiology follow-up for patient Ravi Kumar next week"
//! clinflow audit --limit 10
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use adapters::{ClinicalApi, CompletionBackend, GenerationParams, HuggingFaceBackend, SandboxApi};
pub use core::{
    AuditSink, AuditTrail, Dispatcher, IntentResolver, JsonlAuditSink, MemoryAuditSink,
    Orchestrator, SafetyClassifier,
};
pub use domain::{OperationCall, Plan, Response, SafetyVerdict, ViolationCategory};
