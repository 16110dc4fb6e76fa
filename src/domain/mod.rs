//! Domain types for the clinflow orchestrator.
//!
//! This module contains the core data structures:
//! - Verdict: Safety classifier decisions
//! - Plan: Operation calls and pending references
//! - Events: Immutable audit records
//! - Resources: Clinical records returned by operations
//! - Response: What a request produces

pub mod events;
pub mod plan;
pub mod resources;
pub mod response;
pub mod verdict;

// Re-export commonly used types
pub use events::{AuditEvent, AuditKind};
pub use plan::{ArgValue, Arguments, Bindings, Operation, OperationCall, PendingRef, Plan};
pub use resources::{
    Appointment, AppointmentStatus, BookingResult, Bundle, Coverage, CoverageStatus,
    OperationOutcome, Patient, Resource, Slot, SlotStatus,
};
pub use response::{Response, ResponseData, StepResult};
pub use verdict::{SafetyVerdict, ViolationCategory};
