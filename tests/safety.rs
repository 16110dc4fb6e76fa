//! Safety Classifier Integration Tests
//!
//! Tests for taxonomy priority, the workflow carve-out and call validation.

use clinflow::core::SafetyClassifier;
use clinflow::domain::ViolationCategory;
use serde_json::{json, Map, Value};

fn args(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

#[test]
fn test_emergency_wins_over_workflow_phrasing() {
    let classifier = SafetyClassifier::new();

    for text in [
        "I'm having chest pain",
        "I think I'm having a heart attack",
        "My father is having a stroke",
        "Book a cardiology appointment, I have chest pain right now",
        "Schedule a neurology follow-up, he just had a seizure",
    ] {
        let verdict = classifier.classify(text);
        assert!(!verdict.is_safe, "expected refusal for {:?}", text);
        assert_eq!(verdict.violation_category, Some(ViolationCategory::Emergency));
        assert!(verdict
            .suggested_action
            .unwrap()
            .to_lowercase()
            .contains("emergency services"));
    }
}

#[test]
fn test_diagnosis_requests_blocked() {
    let classifier = SafetyClassifier::new();

    for text in ["What's wrong with me?", "Can you diagnose my rash?", "Am I sick?"] {
        let verdict = classifier.classify(text);
        assert_eq!(
            verdict.violation_category,
            Some(ViolationCategory::DiagnosisRequest),
            "{:?}",
            text
        );
        assert!(verdict.reason.unwrap().contains("diagnos"));
    }
}

#[test]
fn test_advice_requests_blocked() {
    let classifier = SafetyClassifier::new();

    for text in [
        "How do I treat high blood pressure?",
        "Should I take aspirin every day?",
        "What is the best remedy for a cold?",
    ] {
        let verdict = classifier.classify(text);
        assert_eq!(
            verdict.violation_category,
            Some(ViolationCategory::MedicalAdvice),
            "{:?}",
            text
        );
    }
}

#[test]
fn test_prescription_requests_blocked() {
    let classifier = SafetyClassifier::new();

    let verdict = classifier.classify("Prescribe me some antibiotics");
    assert_eq!(verdict.violation_category, Some(ViolationCategory::DrugPrescription));

    let verdict = classifier.classify("What dose of ibuprofen is right for a child?");
    assert_eq!(verdict.violation_category, Some(ViolationCategory::DrugPrescription));

    // Advice outranks prescription when both match
    let verdict = classifier.classify("What dose of ibuprofen should I take?");
    assert!(!verdict.is_safe);
    assert_eq!(verdict.violation_category, Some(ViolationCategory::MedicalAdvice));
}

#[test]
fn test_workflow_carve_out_lifts_diagnosis_and_advice() {
    let classifier = SafetyClassifier::new();

    for text in [
        "Book a neurology appointment for patient with headaches",
        "Schedule a neurology appointment, could this be a migraine",
        "Book a cardiology follow-up appointment, is it safe to stop taking aspirin",
    ] {
        let verdict = classifier.classify(text);
        assert!(verdict.is_safe, "expected carve-out for {:?}", text);
        assert_eq!(verdict.violation_category, None);
    }
}

#[test]
fn test_no_carve_out_for_prescriptions() {
    let classifier = SafetyClassifier::new();

    let verdict = classifier.classify("Schedule an appointment to refill my prescription");
    assert!(!verdict.is_safe);
    assert_eq!(verdict.violation_category, Some(ViolationCategory::DrugPrescription));
}

#[test]
fn test_classification_is_idempotent() {
    let classifier = SafetyClassifier::new();

    for text in [
        "What's wrong with me?",
        "Search for patient Ravi Kumar",
        "I'm having chest pain",
    ] {
        assert_eq!(classifier.classify(text), classifier.classify(text));
    }
}

#[test]
fn test_validate_call_allow_list() {
    let classifier = SafetyClassifier::new();

    let verdict = classifier.validate_call("search_patient", &args(json!({"name": "John Smith"})));
    assert!(verdict.is_safe);

    let verdict = classifier.validate_call("prescribe_medication", &args(json!({"drug": "aspirin"})));
    assert!(!verdict.is_safe);
    assert!(verdict.reason.unwrap().contains("prescribe_medication"));
}

#[test]
fn test_validate_call_rejects_unsafe_arguments() {
    let classifier = SafetyClassifier::new();

    let verdict = classifier.validate_call(
        "book_appointment",
        &args(json!({"reason": "prescribe me some medication for pain"})),
    );
    assert!(!verdict.is_safe);
    assert_eq!(verdict.violation_category, Some(ViolationCategory::DrugPrescription));
    assert!(verdict.reason.unwrap().contains("reason"));
}
