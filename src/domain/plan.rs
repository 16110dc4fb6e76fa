//! Plans: ordered operation calls inferred from a request.
//!
//! A call's arguments may hold a [`PendingRef`] standing in for an identifier
//! that an earlier step in the same plan will produce. Pending references are
//! a distinct variant, recognised structurally, and bound by field identity
//! before the call is dispatched.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};

/// The four clinical operations the agent may perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    SearchPatient,
    CheckInsuranceEligibility,
    FindAvailableSlots,
    BookAppointment,
}

impl Operation {
    /// Every operation, in catalogue order
    pub const ALL: [Operation; 4] = [
        Operation::SearchPatient,
        Operation::CheckInsuranceEligibility,
        Operation::FindAvailableSlots,
        Operation::BookAppointment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SearchPatient => "search_patient",
            Self::CheckInsuranceEligibility => "check_insurance_eligibility",
            Self::FindAvailableSlots => "find_available_slots",
            Self::BookAppointment => "book_appointment",
        }
    }

    /// Look up an operation by its wire name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_str() == name)
    }

    /// Names of all operations, for error messages
    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|op| op.as_str()).collect()
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::SearchPatient => {
                "Search for a patient by name, date of birth, or identifier. Returns matching patient records."
            }
            Self::CheckInsuranceEligibility => {
                "Check insurance eligibility and coverage for a patient for a specific service type."
            }
            Self::FindAvailableSlots => {
                "Find available appointment slots for a given medical specialty within a date range."
            }
            Self::BookAppointment => {
                "Book an appointment for a patient at a specific slot. Supports dry-run mode to validate without booking."
            }
        }
    }

    /// JSON-schema style parameter description
    pub fn parameters(&self) -> Value {
        match self {
            Self::SearchPatient => json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string", "description": "Patient name to search for (first name, last name, or full name)"},
                    "dob": {"type": "string", "description": "Date of birth in YYYY-MM-DD format (optional)"},
                    "identifier": {"type": "string", "description": "Patient identifier such as MRN (optional)"}
                },
                "required": ["name"]
            }),
            Self::CheckInsuranceEligibility => json!({
                "type": "object",
                "properties": {
                    "patient_id": {"type": "string", "description": "The patient's unique identifier"},
                    "service_type": {"type": "string", "description": "Type of medical service (e.g., 'cardiology', 'primary-care', 'neurology')"}
                },
                "required": ["patient_id", "service_type"]
            }),
            Self::FindAvailableSlots => json!({
                "type": "object",
                "properties": {
                    "specialty": {"type": "string", "description": "Medical specialty (e.g., 'cardiology', 'neurology', 'orthopedics')"},
                    "start_date": {"type": "string", "description": "Start date for availability search (YYYY-MM-DD)"},
                    "end_date": {"type": "string", "description": "End date for availability search (YYYY-MM-DD)"},
                    "location": {"type": "string", "description": "Preferred facility location (optional)"}
                },
                "required": ["specialty", "start_date", "end_date"]
            }),
            Self::BookAppointment => json!({
                "type": "object",
                "properties": {
                    "patient_id": {"type": "string", "description": "The patient's unique identifier"},
                    "slot_id": {"type": "string", "description": "The slot ID to book"},
                    "reason": {"type": "string", "description": "Reason for the appointment"},
                    "dry_run": {"type": "boolean", "description": "If true, validate the booking without actually creating it"}
                },
                "required": ["patient_id", "slot_id", "reason"]
            }),
        }
    }

    /// Catalogue entry: name, description and parameters
    pub fn schema(&self) -> Value {
        json!({
            "name": self.as_str(),
            "description": self.description(),
            "parameters": self.parameters(),
        })
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value that a later step needs but an earlier step has yet to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PendingRef {
    PatientId,
    SlotId,
}

impl PendingRef {
    /// Marker used when a plan is written out as JSON
    pub fn token(&self) -> &'static str {
        match self {
            Self::PatientId => "{{patient_id}}",
            Self::SlotId => "{{slot_id}}",
        }
    }

    /// Recognise a marker. Only an exact, whole-value match counts.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim() {
            "{{patient_id}}" => Some(Self::PatientId),
            "{{slot_id}}" => Some(Self::SlotId),
            _ => None,
        }
    }
}

/// One argument of an [`OperationCall`]
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Pending(PendingRef),
    Value(Value),
}

impl From<Value> for ArgValue {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => match PendingRef::from_token(&s) {
                Some(pending) => ArgValue::Pending(pending),
                None => ArgValue::Value(Value::String(s)),
            },
            other => ArgValue::Value(other),
        }
    }
}

impl Serialize for ArgValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ArgValue::Pending(pending) => serializer.serialize_str(pending.token()),
            ArgValue::Value(value) => value.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for ArgValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(ArgValue::from)
    }
}

pub type Arguments = BTreeMap<String, ArgValue>;

/// A single step of a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationCall {
    /// Operation wire name. Kept as text: a generated plan may name anything.
    #[serde(rename = "name")]
    pub operation_name: String,

    #[serde(default)]
    pub arguments: Arguments,
}

impl OperationCall {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation_name: operation.as_str().to_string(),
            arguments: Arguments::new(),
        }
    }

    /// Add a concrete argument
    pub fn arg(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.arguments
            .insert(key.to_string(), ArgValue::Value(value.into()));
        self
    }

    /// Add an argument to be bound from an earlier step
    pub fn pending(mut self, key: &str, pending: PendingRef) -> Self {
        self.arguments
            .insert(key.to_string(), ArgValue::Pending(pending));
        self
    }

    pub fn operation(&self) -> Option<Operation> {
        Operation::from_name(&self.operation_name)
    }

    pub fn is(&self, operation: Operation) -> bool {
        self.operation_name == operation.as_str()
    }

    pub fn pending_refs(&self) -> impl Iterator<Item = PendingRef> + '_ {
        self.arguments.values().filter_map(|v| match v {
            ArgValue::Pending(p) => Some(*p),
            ArgValue::Value(_) => None,
        })
    }

    /// Substitute pending references from `bindings`.
    ///
    /// Returns `None` if any reference is still unbound; such a call must not
    /// be dispatched.
    pub fn bind(&self, bindings: &Bindings) -> Option<Map<String, Value>> {
        let mut resolved = Map::new();
        for (key, value) in &self.arguments {
            let concrete = match value {
                ArgValue::Value(v) => v.clone(),
                ArgValue::Pending(pending) => Value::String(bindings.get(*pending)?.to_string()),
            };
            resolved.insert(key.clone(), concrete);
        }
        Some(resolved)
    }
}

/// Ordered sequence of calls. Position is execution order.
pub type Plan = Vec<OperationCall>;

/// Identifiers produced so far while walking a plan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bindings {
    pub patient_id: Option<String>,
    pub slot_id: Option<String>,
}

impl Bindings {
    pub fn get(&self, pending: PendingRef) -> Option<&str> {
        match pending {
            PendingRef::PatientId => self.patient_id.as_deref(),
            PendingRef::SlotId => self.slot_id.as_deref(),
        }
    }
}
