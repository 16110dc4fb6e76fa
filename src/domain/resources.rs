//! Clinical resource records.
//!
//! Records follow the FHIR convention of a `resourceType` discriminator;
//! [`Resource`] carries it as an internal serde tag.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Any record returned by an operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "resourceType")]
pub enum Resource {
    Patient(Patient),
    Coverage(Coverage),
    Slot(Slot),
    Appointment(Appointment),
    Bundle(Bundle),
    OperationOutcome(OperationOutcome),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanName {
    pub family: String,
    #[serde(default)]
    pub given: Vec<String>,
}

impl HumanName {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.given.join(" "), self.family)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identifier {
    pub system: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactPoint {
    pub system: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#use: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    #[serde(default)]
    pub line: Vec<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: String,
    #[serde(default)]
    pub identifier: Vec<Identifier>,
    pub name: Vec<HumanName>,
    pub birth_date: Option<String>,
    pub gender: Option<String>,
    #[serde(default)]
    pub telecom: Vec<ContactPoint>,
    #[serde(default)]
    pub address: Vec<Address>,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CoverageStatus {
    Active,
    Cancelled,
    Draft,
    EnteredInError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Period {
    pub start: String,
    pub end: Option<String>,
}

/// Insurance coverage, optionally annotated for a requested service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coverage {
    pub id: String,
    pub status: CoverageStatus,
    pub beneficiary: String,
    pub payor: Vec<String>,
    pub period: Option<Period>,
    pub plan_name: Option<String>,
    pub copay_amount: Option<f64>,
    #[serde(default)]
    pub eligible_services: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_requested: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_eligible: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eligibility_reason: Option<String>,
}

impl Coverage {
    /// Annotate a copy of this coverage with eligibility for `service_type`.
    ///
    /// Eligible only if the coverage is active and the service is listed.
    pub fn for_service(&self, service_type: &str) -> Coverage {
        let listed = self
            .eligible_services
            .iter()
            .any(|s| s.eq_ignore_ascii_case(service_type));

        let (eligible, reason) = if self.status != CoverageStatus::Active {
            (false, "Coverage is not active".to_string())
        } else if !listed {
            (
                false,
                format!("Service type '{}' is not covered under this plan", service_type),
            )
        } else {
            (true, "Patient is eligible for this service".to_string())
        };

        Coverage {
            service_requested: Some(service_type.to_string()),
            is_eligible: Some(eligible),
            eligibility_reason: Some(reason),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SlotStatus {
    Free,
    Busy,
    BusyUnavailable,
    BusyTentative,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub id: String,
    pub status: SlotStatus,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub specialty: String,
    pub practitioner_name: Option<String>,
    pub practitioner_id: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Proposed,
    Pending,
    Booked,
    Arrived,
    Fulfilled,
    Cancelled,
    Noshow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub actor: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: String,
    pub status: AppointmentStatus,
    pub specialty: String,
    pub reason: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub participant: Vec<Participant>,
    pub location: Option<String>,
    pub practitioner_name: Option<String>,
    pub created: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(rename = "_dryRun", default, skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
    #[serde(rename = "_message", default, skip_serializing_if = "Option::is_none")]
    pub dry_run_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleEntry {
    pub resource: Resource,
}

/// Collection of search results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    #[serde(rename = "type")]
    pub bundle_type: String,
    pub total: usize,
    pub entry: Vec<BundleEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Bundle {
    pub fn searchset(resources: Vec<Resource>) -> Self {
        Self {
            bundle_type: "searchset".to_string(),
            total: resources.len(),
            entry: resources
                .into_iter()
                .map(|resource| BundleEntry { resource })
                .collect(),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: String,
    pub code: String,
    pub diagnostics: String,
}

/// Structured error record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationOutcome {
    pub issue: Vec<Issue>,
}

impl OperationOutcome {
    /// Single error-severity issue
    pub fn error(code: &str, diagnostics: impl Into<String>) -> Self {
        Self {
            issue: vec![Issue {
                severity: "error".to_string(),
                code: code.to_string(),
                diagnostics: diagnostics.into(),
            }],
        }
    }
}

/// Raw result of a booking attempt from the resource API
#[derive(Debug, Clone, PartialEq)]
pub struct BookingResult {
    pub success: bool,
    pub appointment: Option<Appointment>,
    pub error: Option<String>,
}

impl BookingResult {
    pub fn booked(appointment: Appointment) -> Self {
        Self {
            success: true,
            appointment: Some(appointment),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            appointment: None,
            error: Some(error.into()),
        }
    }
}
