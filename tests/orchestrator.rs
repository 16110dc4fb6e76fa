//! Orchestrator Integration Tests
//!
//! End-to-end request processing against the sandbox API with an in-memory
//! audit sink: refusals, plan execution, reference binding, skipped steps
//! and dry-run enforcement.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use clinflow::adapters::{CompletionBackend, GenerationParams, SandboxApi};
use clinflow::core::{
    AuditSink, AuditTrail, Dispatcher, IntentResolver, MemoryAuditSink, Orchestrator,
    SafetyClassifier,
};
use clinflow::domain::{ArgValue, AuditEvent, AuditKind, PendingRef, ViolationCategory};
use serde_json::json;

struct Harness {
    api: Arc<SandboxApi>,
    sink: Arc<MemoryAuditSink>,
    orchestrator: Orchestrator,
}

fn harness(backend: Option<Arc<dyn CompletionBackend>>) -> Harness {
    let api = Arc::new(SandboxApi::new());
    let sink = Arc::new(MemoryAuditSink::new());
    let orchestrator = Orchestrator::new(
        SafetyClassifier::new(),
        IntentResolver::new(backend),
        Dispatcher::new(api.clone()),
        AuditTrail::new(sink.clone()),
    );
    Harness {
        api,
        sink,
        orchestrator,
    }
}

/// Monday; next business week is 2026-10-26 .. 2026-10-30
fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
}

fn kinds(events: &[AuditEvent]) -> Vec<AuditKind> {
    events.iter().map(|e| e.kind).collect()
}

/// Backend replying with a fixed completion
struct ScriptedBackend(&'static str);

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _prompt: &str, _params: &GenerationParams) -> Result<String> {
        Ok(self.0.to_string())
    }
}

struct UnreachableBackend;

#[async_trait]
impl CompletionBackend for UnreachableBackend {
    fn name(&self) -> &str {
        "unreachable"
    }

    async fn complete(&self, _prompt: &str, _params: &GenerationParams) -> Result<String> {
        anyhow::bail!("timed out after 30s")
    }
}

#[tokio::test]
async fn test_patient_search_request() {
    let h = harness(None);
    let response = h
        .orchestrator
        .process_on("Search for patient Ravi Kumar", None, today())
        .await
        .unwrap();

    assert!(response.success);
    assert!(!response.safety_refused);
    let calls = response.function_calls.as_ref().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].operation_name, "search_patient");
    assert_eq!(response.results()[0].outcome["total"], json!(1));
    assert_eq!(response.message, "Successfully executed 1 function(s).");
    assert_eq!(response.session_id, h.orchestrator.session_id());

    assert_eq!(
        kinds(&h.sink.events()),
        vec![
            AuditKind::UserRequest,
            AuditKind::SafetyCheck,
            AuditKind::FunctionCall,
            AuditKind::FunctionResult,
            AuditKind::AgentResponse,
        ]
    );
}

#[tokio::test]
async fn test_diagnosis_request_is_refused_before_planning() {
    let h = harness(None);
    let response = h
        .orchestrator
        .process_on("What's wrong with me?", None, today())
        .await
        .unwrap();

    assert!(response.safety_refused);
    assert!(!response.success);
    assert!(response.message.contains("cannot provide medical diagnoses"));
    assert_eq!(
        response.violation_category(),
        Some(ViolationCategory::DiagnosisRequest)
    );
    assert!(response.suggested_action().is_some());
    assert!(response.function_calls.is_none());

    assert_eq!(
        kinds(&h.sink.events()),
        vec![
            AuditKind::UserRequest,
            AuditKind::SafetyViolation,
            AuditKind::AgentResponse,
        ]
    );
}

#[tokio::test]
async fn test_emergency_refusal_points_to_emergency_services() {
    let h = harness(None);
    let response = h
        .orchestrator
        .process_on(
            "Book a cardiology appointment for patient Ravi Kumar, he has chest pain",
            None,
            today(),
        )
        .await
        .unwrap();

    assert!(response.safety_refused);
    assert_eq!(response.violation_category(), Some(ViolationCategory::Emergency));
    assert!(response.suggested_action().unwrap().contains("emergency services"));
    assert!(h.api.appointments().is_empty());
}

#[tokio::test]
async fn test_dry_run_booking_binds_references_and_changes_nothing() {
    let h = harness(None);
    let response = h
        .orchestrator
        .process_on(
            "Schedule a cardiology follow-up for patient Ravi Kumar next week",
            Some(true),
            today(),
        )
        .await
        .unwrap();

    assert!(response.success);
    assert!(response.dry_run);
    assert!(response.message.ends_with("[DRY RUN - No changes made]"));

    let names: Vec<&str> = response
        .results()
        .iter()
        .map(|r| r.operation_name.as_str())
        .collect();
    assert_eq!(
        names,
        vec![
            "search_patient",
            "check_insurance_eligibility",
            "find_available_slots",
            "book_appointment"
        ]
    );

    let insurance = &response.results()[1];
    assert_eq!(insurance.resolved_arguments["patient_id"], json!("P001"));
    assert_eq!(insurance.outcome["isEligible"], json!(true));

    let booking = &response.results()[3];
    assert_eq!(booking.resolved_arguments["patient_id"], json!("P001"));
    assert_eq!(
        booking.resolved_arguments["slot_id"],
        json!("SLOT-CARD-20261026-001")
    );
    assert_eq!(booking.resolved_arguments["dry_run"], json!(true));
    assert_eq!(
        booking.resolved_arguments["reason"],
        json!("Cardiology follow-up")
    );
    assert_eq!(booking.outcome["appointment"]["status"], json!("proposed"));

    // The returned plan is the pre-binding one
    let plan = response.function_calls.as_ref().unwrap();
    assert_eq!(
        plan[3].arguments["patient_id"],
        ArgValue::Pending(PendingRef::PatientId)
    );

    assert!(!h.api.is_booked("SLOT-CARD-20261026-001"));
    assert!(h.api.appointments().is_empty());

    let events = h.sink.events();
    assert!(events.iter().any(|e| e.kind == AuditKind::DryRun));
    assert!(!events.iter().any(|e| e.kind == AuditKind::FunctionCall));
    let booking_call = events
        .iter()
        .find(|e| e.kind == AuditKind::DryRun && e.payload["function_name"] == json!("book_appointment"))
        .unwrap();
    assert_eq!(booking_call.payload["function_arguments"]["dry_run"], json!(true));
}

#[tokio::test]
async fn test_live_booking_marks_slot() {
    let h = harness(None);
    let response = h
        .orchestrator
        .process_on(
            "Book a neurology appointment for patient Sarah Johnson next week",
            None,
            today(),
        )
        .await
        .unwrap();

    assert!(response.success);
    assert!(!response.dry_run);
    let booking = response.results().last().unwrap();
    assert_eq!(booking.operation_name, "book_appointment");
    assert_eq!(booking.resolved_arguments["patient_id"], json!("P002"));
    assert_eq!(booking.outcome["message"], json!("Appointment successfully booked"));
    assert!(h.api.is_booked("SLOT-NEUR-20261026-001"));

    // The same request again gets the next free slot
    let again = h
        .orchestrator
        .process_on(
            "Book a neurology appointment for patient Sarah Johnson next week",
            None,
            today(),
        )
        .await
        .unwrap();
    assert_eq!(
        again.results().last().unwrap().resolved_arguments["slot_id"],
        json!("SLOT-NEUR-20261026-002")
    );
}

#[tokio::test]
async fn test_emergency_past_length_cap_is_refused() {
    let h = harness(None);
    let request = format!(
        "Schedule a cardiology appointment for patient Ravi Kumar next week {}my father has chest pain",
        "please ".repeat(80)
    );
    assert!(request.chars().count() > clinflow::core::DEFAULT_MAX_REQUEST_CHARS);

    let response = h
        .orchestrator
        .process_on(&request, Some(true), today())
        .await
        .unwrap();

    assert!(response.safety_refused);
    assert!(!response.success);
    assert_eq!(response.violation_category(), Some(ViolationCategory::Emergency));
    assert!(response.function_calls.is_none());
    assert_eq!(
        kinds(&h.sink.events()),
        vec![
            AuditKind::UserRequest,
            AuditKind::SafetyViolation,
            AuditKind::AgentResponse,
        ]
    );
}

#[tokio::test]
async fn test_long_safe_request_is_checked_whole_and_resolved_capped() {
    let api = Arc::new(SandboxApi::new());
    let sink = Arc::new(MemoryAuditSink::new());
    let orchestrator = Orchestrator::new(
        SafetyClassifier::new(),
        IntentResolver::deterministic(),
        Dispatcher::new(api),
        AuditTrail::new(sink.clone()),
    )
    .with_max_request_chars(40);

    let request = format!("Search for patient Ravi Kumar {}", "thanks ".repeat(20));
    let response = orchestrator
        .process_on(&request, None, today())
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(response.results().len(), 1);

    let check = sink
        .events()
        .into_iter()
        .find(|e| e.kind == AuditKind::SafetyCheck)
        .unwrap();
    let checked = check.payload["user_input"].as_str().unwrap();
    assert!(checked.chars().count() > 40);
    assert!(checked.ends_with("thanks"));
}

#[tokio::test]
async fn test_unbound_reference_skips_step() {
    let h = harness(None);
    let response = h
        .orchestrator
        .process_on("Book a neurology appointment next week", Some(false), today())
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(response.function_calls.as_ref().unwrap().len(), 3);

    let names: Vec<&str> = response
        .results()
        .iter()
        .map(|r| r.operation_name.as_str())
        .collect();
    assert_eq!(names, vec!["find_available_slots"]);
    assert_eq!(response.message, "Successfully executed 1 function(s).");
    assert!(h.api.appointments().is_empty());
}

#[tokio::test]
async fn test_unresolvable_request_asks_for_detail() {
    let h = harness(None);
    let response = h
        .orchestrator
        .process_on("hello there", None, today())
        .await
        .unwrap();

    assert!(!response.success);
    assert!(!response.safety_refused);
    assert!(response.message.starts_with("I couldn't determine which actions"));
    assert!(response.data.is_none());
}

#[tokio::test]
async fn test_dry_run_override_beats_generated_argument() {
    let backend = Arc::new(ScriptedBackend(
        r#"{"function_calls": [
            {"name": "search_patient", "arguments": {"name": "Anita Patel"}},
            {"name": "book_appointment", "arguments": {
                "patient_id": "{{patient_id}}",
                "slot_id": "SLOT-ORTH-20261027-001",
                "reason": "Orthopedics consultation",
                "dry_run": false
            }}
        ]}"#,
    ));
    let h = harness(Some(backend));

    let response = h
        .orchestrator
        .process_on("Book orthopedics for Anita Patel", Some(true), today())
        .await
        .unwrap();

    let booking = &response.results()[1];
    assert_eq!(booking.resolved_arguments["patient_id"], json!("P003"));
    assert_eq!(booking.resolved_arguments["dry_run"], json!(true));
    assert!(!h.api.is_booked("SLOT-ORTH-20261027-001"));
}

#[tokio::test]
async fn test_smuggled_content_and_unknown_operations_are_blocked() {
    let backend = Arc::new(ScriptedBackend(
        r#"{"function_calls": [
            {"name": "search_patient", "arguments": {"name": "Ravi Kumar"}},
            {"name": "delete_patient", "arguments": {"patient_id": "{{patient_id}}"}},
            {"name": "book_appointment", "arguments": {
                "patient_id": "{{patient_id}}",
                "slot_id": "SLOT-CARD-20261026-001",
                "reason": "prescribe me some medication for pain"
            }}
        ]}"#,
    ));
    let h = harness(Some(backend));

    let response = h
        .orchestrator
        .process_on("Book cardiology for Ravi Kumar", None, today())
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(response.results().len(), 1);
    assert!(!h.api.is_booked("SLOT-CARD-20261026-001"));

    let errors: Vec<AuditEvent> = h
        .sink
        .events()
        .into_iter()
        .filter(|e| e.kind == AuditKind::Error)
        .collect();
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().all(|e| e.payload["error_message"]
        .as_str()
        .unwrap()
        .starts_with("Function call blocked")));
}

#[tokio::test]
async fn test_backend_failure_is_audited_and_recovered() {
    let h = harness(Some(Arc::new(UnreachableBackend)));
    let response = h
        .orchestrator
        .process_on("Search for patient Ravi Kumar", None, today())
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(response.results().len(), 1);

    let error = h
        .sink
        .events()
        .into_iter()
        .find(|e| e.kind == AuditKind::Error)
        .unwrap();
    assert!(error.payload["error_message"]
        .as_str()
        .unwrap()
        .contains("timed out"));
}

#[tokio::test]
async fn test_sequence_ids_monotonic_across_requests() {
    let h = harness(None);
    h.orchestrator
        .process_on("Search for patient Ravi Kumar", None, today())
        .await
        .unwrap();
    h.orchestrator
        .process_on("What's wrong with me?", None, today())
        .await
        .unwrap();

    let events = h.sink.events();
    let seqs: Vec<u64> = events.iter().map(|e| e.sequence_id).collect();
    let expected: Vec<u64> = (1..=events.len() as u64).collect();
    assert_eq!(seqs, expected);
    assert!(events.iter().all(|e| e.session_id == h.orchestrator.session_id()));

    let summary = h.orchestrator.summary();
    assert_eq!(summary.total_entries, events.len());
    assert_eq!(summary.counts_by_kind[&AuditKind::UserRequest], 2);
    assert_eq!(summary.counts_by_kind[&AuditKind::SafetyViolation], 1);
}

struct BrokenSink;

#[async_trait]
impl AuditSink for BrokenSink {
    fn describe(&self) -> String {
        "broken".to_string()
    }

    async fn append(&self, _event: &AuditEvent) -> Result<()> {
        anyhow::bail!("read-only filesystem")
    }
}

#[tokio::test]
async fn test_audit_sink_failure_is_fatal() {
    let orchestrator = Orchestrator::new(
        SafetyClassifier::new(),
        IntentResolver::deterministic(),
        Dispatcher::new(Arc::new(SandboxApi::new())),
        AuditTrail::new(Arc::new(BrokenSink)),
    );

    let result = orchestrator
        .process_on("Search for patient Ravi Kumar", None, today())
        .await;
    assert!(result.is_err());
}
