//! Intent Resolver Integration Tests
//!
//! Tests for the generative arm, its fallback to rules, and rule extraction.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use clinflow::adapters::{CompletionBackend, GenerationParams};
use clinflow::core::resolver::deterministic_plan;
use clinflow::core::{GenerativeOutcome, IntentResolver, Strategy};
use clinflow::domain::{ArgValue, Operation, PendingRef};
use serde_json::json;

/// Backend that always returns the same text and counts calls
struct ScriptedBackend {
    reply: String,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        assert!(prompt.contains("User request:"));
        assert!(params.temperature <= 0.1);
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.clone())
    }
}

/// Backend that is never reachable
struct FailingBackend {
    calls: AtomicUsize,
}

#[async_trait]
impl CompletionBackend for FailingBackend {
    fn name(&self) -> &str {
        "failing"
    }

    async fn complete(&self, _prompt: &str, _params: &GenerationParams) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("connection refused")
    }
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
}

#[tokio::test]
async fn test_generative_plan_is_used() {
    let backend = ScriptedBackend::new(
        r#"```json
{"function_calls": [
  {"name": "search_patient", "arguments": {"name": "Sarah Johnson"}},
  {"name": "check_insurance_eligibility", "arguments": {"patient_id": "{{patient_id}}", "service_type": "neurology"}}
]}
```"#,
    );
    let resolver = IntentResolver::new(Some(backend.clone()));

    let resolution = resolver
        .resolve("Check neurology coverage for Sarah Johnson", today())
        .await;

    assert_eq!(resolution.strategy, Strategy::Generative);
    assert!(resolution.fallback_reason.is_none());
    assert_eq!(resolution.plan.len(), 2);
    assert!(resolution.plan[1].is(Operation::CheckInsuranceEligibility));
    assert_eq!(
        resolution.plan[1].arguments["patient_id"],
        ArgValue::Pending(PendingRef::PatientId)
    );
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_backend_failure_falls_back_without_retry() {
    let backend = Arc::new(FailingBackend {
        calls: AtomicUsize::new(0),
    });
    let resolver = IntentResolver::new(Some(backend.clone()));

    let resolution = resolver.resolve("Search for patient Ravi Kumar", today()).await;

    assert_eq!(resolution.strategy, Strategy::Deterministic);
    assert!(resolution
        .fallback_reason
        .as_deref()
        .unwrap()
        .contains("connection refused"));
    assert_eq!(resolution.plan.len(), 1);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unparseable_completion_falls_back() {
    let backend = ScriptedBackend::new("I'm sorry, I can't help with that.");
    let resolver = IntentResolver::new(Some(backend));

    match resolver.try_generative("Search for patient Ravi Kumar", today()).await {
        GenerativeOutcome::Unavailable(reason) => assert!(reason.contains("no plan")),
        other => panic!("expected Unavailable, got {:?}", other),
    }

    let resolution = resolver.resolve("Search for patient Ravi Kumar", today()).await;
    assert_eq!(resolution.strategy, Strategy::Deterministic);
    assert!(resolution.plan[0].is(Operation::SearchPatient));
}

#[tokio::test]
async fn test_empty_generated_plan_falls_back() {
    let backend = ScriptedBackend::new(r#"{"function_calls": []}"#);
    let resolver = IntentResolver::new(Some(backend));

    let resolution = resolver.resolve("Search for patient Ravi Kumar", today()).await;
    assert_eq!(resolution.strategy, Strategy::Deterministic);
    assert!(resolution.fallback_reason.unwrap().contains("empty"));
}

#[tokio::test]
async fn test_no_backend_is_not_a_failure() {
    let resolver = IntentResolver::deterministic();
    let resolution = resolver.resolve("Search for patient Ravi Kumar", today()).await;

    assert_eq!(resolution.strategy, Strategy::Deterministic);
    assert!(resolution.fallback_reason.is_none());
}

#[test]
fn test_booking_without_name_keeps_placeholders() {
    let plan = deterministic_plan("Book a neurology appointment next week", today());
    let names: Vec<&str> = plan.iter().map(|c| c.operation_name.as_str()).collect();

    assert_eq!(
        names,
        vec![
            "check_insurance_eligibility",
            "find_available_slots",
            "book_appointment"
        ]
    );
    let refs: Vec<PendingRef> = plan[2].pending_refs().collect();
    assert!(refs.contains(&PendingRef::PatientId));
    assert!(refs.contains(&PendingRef::SlotId));
    assert_eq!(
        plan[2].arguments["reason"],
        ArgValue::Value(json!("Neurology consultation"))
    );
}

#[test]
fn test_explicit_date_gives_single_day_range() {
    let plan = deterministic_plan("Find available orthopedics slots on 28-10", today());
    let slots = plan
        .iter()
        .find(|c| c.is(Operation::FindAvailableSlots))
        .unwrap();

    assert_eq!(slots.arguments["start_date"], ArgValue::Value(json!("2026-10-28")));
    assert_eq!(slots.arguments["end_date"], ArgValue::Value(json!("2026-10-28")));
    assert_eq!(slots.arguments["specialty"], ArgValue::Value(json!("orthopedics")));
}

#[test]
fn test_unrelated_request_yields_empty_plan() {
    assert!(deterministic_plan("hello there", today()).is_empty());
}
