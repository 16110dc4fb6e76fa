//! Operation dispatcher.
//!
//! Validates an argument map against the named operation's contract and
//! invokes the clinical API. Every failure comes back as an
//! `OperationOutcome` value; nothing here returns an error to the caller.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::adapters::ClinicalApi;
use crate::domain::{Bundle, Operation, OperationOutcome, Resource};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Unknown function '{name}'. Valid functions: {}", valid.join(", "))]
    UnknownOperation {
        name: String,
        valid: Vec<&'static str>,
    },

    #[error("Invalid arguments for {operation}: {reason}")]
    InvalidArguments { operation: Operation, reason: String },

    #[error("{operation} failed: {detail}")]
    CapabilityFailure { operation: Operation, detail: String },
}

impl DispatchError {
    /// Issue code used in the resulting `OperationOutcome`
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownOperation { .. } => "not-supported",
            Self::InvalidArguments { .. } => "invalid",
            Self::CapabilityFailure { .. } => "exception",
        }
    }

    pub fn to_outcome(&self) -> OperationOutcome {
        OperationOutcome::error(self.code(), self.to_string())
    }

    fn invalid(operation: Operation, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            operation,
            reason: reason.into(),
        }
    }

    fn capability(operation: Operation, err: anyhow::Error) -> Self {
        Self::CapabilityFailure {
            operation,
            detail: format!("{:#}", err),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchPatientArgs {
    pub name: String,
    #[serde(default)]
    pub dob: Option<String>,
    #[serde(default)]
    pub identifier: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckInsuranceArgs {
    pub patient_id: String,
    pub service_type: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FindSlotsArgs {
    pub specialty: String,
    pub start_date: String,
    pub end_date: String,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BookAppointmentArgs {
    pub patient_id: String,
    pub slot_id: String,
    pub reason: String,
    #[serde(default)]
    pub dry_run: bool,
}

/// Validated arguments, one variant per operation
#[derive(Debug, Clone, PartialEq)]
pub enum OperationArgs {
    SearchPatient(SearchPatientArgs),
    CheckInsuranceEligibility(CheckInsuranceArgs),
    FindAvailableSlots {
        specialty: String,
        start_date: NaiveDate,
        end_date: NaiveDate,
        location: Option<String>,
    },
    BookAppointment(BookAppointmentArgs),
}

fn decode<T: DeserializeOwned>(
    operation: Operation,
    arguments: &Map<String, Value>,
) -> Result<T, DispatchError> {
    serde_json::from_value(Value::Object(arguments.clone()))
        .map_err(|e| DispatchError::invalid(operation, e.to_string()))
}

fn parse_date(operation: Operation, field: &str, value: &str) -> Result<NaiveDate, DispatchError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
        DispatchError::invalid(
            operation,
            format!("{} must be a YYYY-MM-DD date, got '{}'", field, value),
        )
    })
}

fn require_non_empty(operation: Operation, field: &str, value: &str) -> Result<(), DispatchError> {
    if value.trim().is_empty() {
        return Err(DispatchError::invalid(
            operation,
            format!("{} must not be empty", field),
        ));
    }
    Ok(())
}

impl OperationArgs {
    /// Check `arguments` against the contract of `operation`
    pub fn parse(operation: Operation, arguments: &Map<String, Value>) -> Result<Self, DispatchError> {
        match operation {
            Operation::SearchPatient => {
                let args: SearchPatientArgs = decode(operation, arguments)?;
                require_non_empty(operation, "name", &args.name)?;
                Ok(Self::SearchPatient(args))
            }
            Operation::CheckInsuranceEligibility => {
                let args: CheckInsuranceArgs = decode(operation, arguments)?;
                require_non_empty(operation, "patient_id", &args.patient_id)?;
                Ok(Self::CheckInsuranceEligibility(args))
            }
            Operation::FindAvailableSlots => {
                let args: FindSlotsArgs = decode(operation, arguments)?;
                let start_date = parse_date(operation, "start_date", &args.start_date)?;
                let end_date = parse_date(operation, "end_date", &args.end_date)?;
                if start_date > end_date {
                    return Err(DispatchError::invalid(
                        operation,
                        format!("start_date {} is after end_date {}", start_date, end_date),
                    ));
                }
                Ok(Self::FindAvailableSlots {
                    specialty: args.specialty,
                    start_date,
                    end_date,
                    location: args.location,
                })
            }
            Operation::BookAppointment => {
                let args: BookAppointmentArgs = decode(operation, arguments)?;
                require_non_empty(operation, "patient_id", &args.patient_id)?;
                require_non_empty(operation, "slot_id", &args.slot_id)?;
                Ok(Self::BookAppointment(args))
            }
        }
    }

    pub fn operation(&self) -> Operation {
        match self {
            Self::SearchPatient(_) => Operation::SearchPatient,
            Self::CheckInsuranceEligibility(_) => Operation::CheckInsuranceEligibility,
            Self::FindAvailableSlots { .. } => Operation::FindAvailableSlots,
            Self::BookAppointment(_) => Operation::BookAppointment,
        }
    }
}

fn to_value(operation: Operation, resource: Resource) -> Result<Value, DispatchError> {
    serde_json::to_value(resource).map_err(|e| DispatchError::capability(operation, e.into()))
}

/// Routes validated calls to the clinical API
pub struct Dispatcher {
    api: Arc<dyn ClinicalApi>,
}

impl Dispatcher {
    pub fn new(api: Arc<dyn ClinicalApi>) -> Self {
        Self { api }
    }

    /// Execute one operation. Never fails: errors become `OperationOutcome`s.
    #[instrument(skip(self, arguments))]
    pub async fn execute(&self, operation_name: &str, arguments: &Map<String, Value>) -> Value {
        match self.try_execute(operation_name, arguments).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(code = err.code(), "{}", err);
                serde_json::to_value(Resource::OperationOutcome(err.to_outcome()))
                    .unwrap_or_else(|_| json!({ "resourceType": "OperationOutcome" }))
            }
        }
    }

    async fn try_execute(
        &self,
        operation_name: &str,
        arguments: &Map<String, Value>,
    ) -> Result<Value, DispatchError> {
        let operation =
            Operation::from_name(operation_name).ok_or_else(|| DispatchError::UnknownOperation {
                name: operation_name.to_string(),
                valid: Operation::names(),
            })?;

        let args = OperationArgs::parse(operation, arguments)?;
        debug!(%operation, "Arguments validated");
        self.invoke(args).await
    }

    async fn invoke(&self, args: OperationArgs) -> Result<Value, DispatchError> {
        let operation = args.operation();
        let fail = |e: anyhow::Error| DispatchError::capability(operation, e);

        match args {
            OperationArgs::SearchPatient(args) => {
                let patients = self
                    .api
                    .search_patients(&args.name, args.dob.as_deref(), args.identifier.as_deref())
                    .await
                    .map_err(fail)?;

                let mut bundle =
                    Bundle::searchset(patients.into_iter().map(Resource::Patient).collect());
                if bundle.total == 0 {
                    bundle = bundle.with_message(format!("No patients found matching '{}'", args.name));
                }
                to_value(operation, Resource::Bundle(bundle))
            }

            OperationArgs::CheckInsuranceEligibility(args) => {
                let coverage = self
                    .api
                    .get_coverage(&args.patient_id, &args.service_type)
                    .await
                    .map_err(fail)?;

                let resource = match coverage {
                    Some(coverage) => Resource::Coverage(coverage),
                    None => Resource::OperationOutcome(OperationOutcome::error(
                        "not-found",
                        format!("No coverage found for patient {}", args.patient_id),
                    )),
                };
                to_value(operation, resource)
            }

            OperationArgs::FindAvailableSlots {
                specialty,
                start_date,
                end_date,
                location,
            } => {
                let slots = self
                    .api
                    .find_slots(&specialty, start_date, end_date, location.as_deref())
                    .await
                    .map_err(fail)?;

                let mut bundle = Bundle::searchset(slots.into_iter().map(Resource::Slot).collect());
                if bundle.total == 0 {
                    bundle = bundle.with_message(format!(
                        "No available slots found for {} between {} and {}",
                        specialty, start_date, end_date
                    ));
                }
                to_value(operation, Resource::Bundle(bundle))
            }

            OperationArgs::BookAppointment(args) => {
                let result = self
                    .api
                    .book_slot(&args.patient_id, &args.slot_id, &args.reason, args.dry_run)
                    .await
                    .map_err(fail)?;

                match (result.success, result.appointment) {
                    (true, Some(appointment)) => {
                        let message = if args.dry_run {
                            "Dry-run validation successful"
                        } else {
                            "Appointment successfully booked"
                        };
                        Ok(json!({
                            "success": true,
                            "appointment": to_value(operation, Resource::Appointment(appointment))?,
                            "message": message,
                        }))
                    }
                    _ => to_value(
                        operation,
                        Resource::OperationOutcome(OperationOutcome::error(
                            "business-rule",
                            result
                                .error
                                .unwrap_or_else(|| "Booking failed".to_string()),
                        )),
                    ),
                }
            }
        }
    }
}
