//! Safety verdicts produced by the classifier.

use serde::{Deserialize, Serialize};

/// Categories of request the agent must refuse, highest severity first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationCategory {
    /// Acute medical emergency
    #[serde(rename = "emergency_situation")]
    Emergency,

    /// Asking what condition the user has
    DiagnosisRequest,

    /// Asking what to do about a symptom, or for a treatment
    MedicalAdvice,

    /// Prescription, dosage, refill or medication order
    DrugPrescription,
}

impl ViolationCategory {
    /// Stable snake_case name, as written to the audit log
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Emergency => "emergency_situation",
            Self::DiagnosisRequest => "diagnosis_request",
            Self::MedicalAdvice => "medical_advice",
            Self::DrugPrescription => "drug_prescription",
        }
    }

    /// Whether a valid-workflow phrase can lift this category
    pub fn exempt_on_workflow(&self) -> bool {
        matches!(self, Self::DiagnosisRequest | Self::MedicalAdvice)
    }
}

impl std::fmt::Display for ViolationCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a safety check. Built fresh per check and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyVerdict {
    pub is_safe: bool,
    pub violation_category: Option<ViolationCategory>,
    pub reason: Option<String>,
    pub suggested_action: Option<String>,
}

impl SafetyVerdict {
    /// A passing verdict
    pub fn safe() -> Self {
        Self {
            is_safe: true,
            violation_category: None,
            reason: None,
            suggested_action: None,
        }
    }

    /// A refusal in one of the taxonomy categories
    pub fn unsafe_with(
        category: ViolationCategory,
        reason: impl Into<String>,
        suggested_action: impl Into<String>,
    ) -> Self {
        Self {
            is_safe: false,
            violation_category: Some(category),
            reason: Some(reason.into()),
            suggested_action: Some(suggested_action.into()),
        }
    }

    /// A refusal that does not belong to the taxonomy (e.g. a disallowed operation)
    pub fn rejected(reason: impl Into<String>, suggested_action: impl Into<String>) -> Self {
        Self {
            is_safe: false,
            violation_category: None,
            reason: Some(reason.into()),
            suggested_action: Some(suggested_action.into()),
        }
    }
}
