//! In-memory clinical API with sample patients, coverage and schedules.
//!
//! Used by the CLI when no live API is configured, and by tests. Booking
//! state lives behind a mutex; a slot id can be booked at most once.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use uuid::Uuid;

use super::ClinicalApi;
use crate::domain::resources::{Address, ContactPoint, HumanName, Identifier, Participant, Period};
use crate::domain::{
    Appointment, AppointmentStatus, BookingResult, Coverage, CoverageStatus, Patient, Slot,
    SlotStatus,
};

/// Offered start hours, in order
const SLOT_HOURS: [u32; 4] = [9, 11, 14, 16];

/// Slot length in minutes
const SLOT_MINUTES: i64 = 30;

/// Maximum slots returned per search
const MAX_SLOTS: usize = 10;

#[derive(Debug, Clone)]
struct Practitioner {
    id: &'static str,
    name: &'static str,
    location: &'static str,
}

const fn practitioner(id: &'static str, name: &'static str, location: &'static str) -> Practitioner {
    Practitioner { id, name, location }
}

const CARDIOLOGY: &[Practitioner] = &[
    practitioner("DR001", "Dr. Suresh Reddy", "City Heart Center"),
    practitioner("DR002", "Dr. Emily Chen", "Metro Cardiology Clinic"),
];
const NEUROLOGY: &[Practitioner] = &[
    practitioner("DR003", "Dr. Amit Sharma", "Brain & Spine Institute"),
    practitioner("DR004", "Dr. Lisa Park", "Neurology Associates"),
];
const ORTHOPEDICS: &[Practitioner] = &[
    practitioner("DR005", "Dr. Rajesh Gupta", "Joint Care Hospital"),
    practitioner("DR006", "Dr. Michael Brown", "Sports Medicine Center"),
];
const PRIMARY_CARE: &[Practitioner] = &[
    practitioner("DR007", "Dr. Priya Menon", "Family Health Clinic"),
    practitioner("DR008", "Dr. James Wilson", "Community Medical Center"),
];

fn practitioners(specialty: &str) -> Option<&'static [Practitioner]> {
    match specialty {
        "cardiology" => Some(CARDIOLOGY),
        "neurology" => Some(NEUROLOGY),
        "orthopedics" => Some(ORTHOPEDICS),
        "primary-care" => Some(PRIMARY_CARE),
        _ => None,
    }
}

/// Four-letter specialty code used inside slot ids
fn specialty_code(specialty: &str) -> String {
    specialty.chars().take(4).collect::<String>().to_uppercase()
}

fn specialty_from_code(code: &str) -> Option<&'static str> {
    match code.to_ascii_uppercase().as_str() {
        "CARD" => Some("cardiology"),
        "NEUR" => Some("neurology"),
        "ORTH" => Some("orthopedics"),
        "PRIM" => Some("primary-care"),
        _ => None,
    }
}

/// Components of a slot id `SLOT-<CODE>-<YYYYMMDD>-<NNN>`
struct ParsedSlot {
    specialty: &'static str,
    date: NaiveDate,
    practitioner: &'static Practitioner,
    hour: u32,
}

fn parse_slot_id(slot_id: &str) -> Result<ParsedSlot, String> {
    let parts: Vec<&str> = slot_id.split('-').collect();
    if parts.len() != 4 || parts[0] != "SLOT" {
        return Err(format!("Invalid slot ID format: '{}'", slot_id));
    }

    let specialty = specialty_from_code(parts[1])
        .ok_or_else(|| format!("Unrecognized specialty code in slot ID: '{}'", slot_id))?;
    let date = NaiveDate::parse_from_str(parts[2], "%Y%m%d")
        .map_err(|_| format!("Invalid slot date in slot ID: '{}'", slot_id))?;
    let number: usize = parts[3]
        .parse()
        .map_err(|_| format!("Invalid slot number in slot ID: '{}'", slot_id))?;

    let roster = practitioners(specialty).unwrap_or_default();
    let index = number
        .checked_sub(1)
        .ok_or_else(|| format!("Invalid slot number in slot ID: '{}'", slot_id))?;
    let practitioner = roster
        .get(index / SLOT_HOURS.len())
        .ok_or_else(|| format!("Slot '{}' does not exist", slot_id))?;

    Ok(ParsedSlot {
        specialty,
        date,
        practitioner,
        hour: SLOT_HOURS[index % SLOT_HOURS.len()],
    })
}

fn slot_time(date: NaiveDate, hour: u32) -> Result<chrono::NaiveDateTime> {
    let time = NaiveTime::from_hms_opt(hour, 0, 0).context("Invalid slot hour")?;
    Ok(date.and_time(time))
}

#[derive(Debug, Default)]
struct BookingState {
    booked_slots: HashSet<String>,
    appointments: HashMap<String, Appointment>,
}

/// Sample clinical API backed by fixed tables
pub struct SandboxApi {
    patients: Vec<Patient>,
    coverages: HashMap<String, Coverage>,
    state: Mutex<BookingState>,
}

impl Default for SandboxApi {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxApi {
    pub fn new() -> Self {
        let patients = sample_patients();
        let coverages = sample_coverages()
            .into_iter()
            .map(|(patient_id, coverage)| (patient_id.to_string(), coverage))
            .collect();

        Self {
            patients,
            coverages,
            state: Mutex::new(BookingState::default()),
        }
    }

    fn state(&self) -> Result<std::sync::MutexGuard<'_, BookingState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("Booking state lock poisoned"))
    }

    /// Whether a slot id has been booked for real
    pub fn is_booked(&self, slot_id: &str) -> bool {
        self.state()
            .map(|s| s.booked_slots.contains(slot_id))
            .unwrap_or(false)
    }

    /// Appointments booked so far (dry runs excluded)
    pub fn appointments(&self) -> Vec<Appointment> {
        self.state()
            .map(|s| s.appointments.values().cloned().collect())
            .unwrap_or_default()
    }

    fn patient_exists(&self, patient_id: &str) -> bool {
        self.patients.iter().any(|p| p.id == patient_id)
    }
}

fn name_matches(patient: &Patient, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }

    patient.name.iter().any(|name| {
        let full = name.full_name().to_lowercase();
        // "sarah johnson" should still find "Sarah Marie Johnson"
        let parts: Vec<&str> = full.split_whitespace().collect();
        full.contains(needle)
            || name.family.to_lowercase().contains(needle)
            || name.given.iter().any(|g| g.to_lowercase() == needle)
            || needle.split_whitespace().all(|token| parts.contains(&token))
    })
}

#[async_trait]
impl ClinicalApi for SandboxApi {
    async fn search_patients(
        &self,
        name: &str,
        dob: Option<&str>,
        identifier: Option<&str>,
    ) -> Result<Vec<Patient>> {
        let needle = name.trim().to_lowercase();

        let matches = self
            .patients
            .iter()
            .filter(|p| name_matches(p, &needle))
            .filter(|p| dob.map_or(true, |d| p.birth_date.as_deref() == Some(d)))
            .filter(|p| {
                identifier.map_or(true, |wanted| {
                    let wanted = wanted.to_lowercase();
                    p.identifier
                        .iter()
                        .any(|i| i.value.to_lowercase().contains(&wanted))
                })
            })
            .cloned()
            .collect();

        Ok(matches)
    }

    async fn get_coverage(&self, patient_id: &str, service_type: &str) -> Result<Option<Coverage>> {
        Ok(self
            .coverages
            .get(patient_id)
            .map(|c| c.for_service(service_type)))
    }

    async fn find_slots(
        &self,
        specialty: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
        location: Option<&str>,
    ) -> Result<Vec<Slot>> {
        let specialty_key = specialty.to_lowercase();
        let Some(roster) = practitioners(&specialty_key) else {
            return Ok(Vec::new());
        };

        let code = specialty_code(&specialty_key);
        let location = location.map(str::to_lowercase);
        let booked = self.state()?.booked_slots.clone();
        let mut slots = Vec::new();

        for day in start_date.iter_days().take_while(|d| *d <= end_date) {
            if matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
                continue;
            }

            for (p_idx, practitioner) in roster.iter().enumerate() {
                if let Some(ref wanted) = location {
                    if !practitioner.location.to_lowercase().contains(wanted) {
                        continue;
                    }
                }

                for (h_idx, hour) in SLOT_HOURS.iter().enumerate() {
                    let number = p_idx * SLOT_HOURS.len() + h_idx + 1;
                    let slot_id = format!("SLOT-{}-{}-{:03}", code, day.format("%Y%m%d"), number);
                    if booked.contains(&slot_id) {
                        continue;
                    }

                    let start = slot_time(day, *hour)?;
                    slots.push(Slot {
                        id: slot_id,
                        status: SlotStatus::Free,
                        start,
                        end: start + Duration::minutes(SLOT_MINUTES),
                        specialty: specialty.to_string(),
                        practitioner_name: Some(practitioner.name.to_string()),
                        practitioner_id: Some(practitioner.id.to_string()),
                        location: Some(practitioner.location.to_string()),
                    });

                    if slots.len() == MAX_SLOTS {
                        return Ok(slots);
                    }
                }
            }
        }

        Ok(slots)
    }

    async fn book_slot(
        &self,
        patient_id: &str,
        slot_id: &str,
        reason: &str,
        dry_run: bool,
    ) -> Result<BookingResult> {
        if !self.patient_exists(patient_id) {
            return Ok(BookingResult::failed(format!("Patient '{}' not found", patient_id)));
        }

        let mut state = self.state()?;
        if state.booked_slots.contains(slot_id) {
            return Ok(BookingResult::failed(format!(
                "Slot '{}' is no longer available",
                slot_id
            )));
        }

        let parsed = match parse_slot_id(slot_id) {
            Ok(parsed) => parsed,
            Err(error) => return Ok(BookingResult::failed(error)),
        };

        let start = slot_time(parsed.date, parsed.hour)?;
        let mut appointment = Appointment {
            id: format!("APT-{}", &Uuid::new_v4().simple().to_string()[..8].to_uppercase()),
            status: if dry_run {
                AppointmentStatus::Proposed
            } else {
                AppointmentStatus::Booked
            },
            specialty: parsed.specialty.to_string(),
            reason: reason.to_string(),
            start,
            end: start + Duration::minutes(SLOT_MINUTES),
            participant: vec![
                Participant {
                    actor: format!("Patient/{}", patient_id),
                    status: "accepted".to_string(),
                },
                Participant {
                    actor: format!("Practitioner/{}", parsed.practitioner.id),
                    status: "accepted".to_string(),
                },
            ],
            location: Some(parsed.practitioner.location.to_string()),
            practitioner_name: Some(parsed.practitioner.name.to_string()),
            created: Utc::now(),
            comment: None,
            dry_run: None,
            dry_run_message: None,
        };

        if dry_run {
            appointment.dry_run = Some(true);
            appointment.dry_run_message =
                Some("This is a dry-run. Appointment was NOT actually booked.".to_string());
        } else {
            state.booked_slots.insert(slot_id.to_string());
            state
                .appointments
                .insert(appointment.id.clone(), appointment.clone());
        }

        Ok(BookingResult::booked(appointment))
    }
}

fn sample_patients() -> Vec<Patient> {
    vec![
        Patient {
            id: "P001".to_string(),
            identifier: vec![Identifier {
                system: "urn:oid:hospital-mrn".to_string(),
                value: "MRN-2024-001".to_string(),
            }],
            name: vec![HumanName {
                family: "Kumar".to_string(),
                given: vec!["Ravi".to_string()],
            }],
            birth_date: Some("1985-03-15".to_string()),
            gender: Some("male".to_string()),
            telecom: vec![
                ContactPoint {
                    system: "phone".to_string(),
                    value: "+91-9876543210".to_string(),
                    r#use: Some("mobile".to_string()),
                },
                ContactPoint {
                    system: "email".to_string(),
                    value: "ravi.kumar@email.com".to_string(),
                    r#use: Some("home".to_string()),
                },
            ],
            address: vec![Address {
                line: vec!["123 MG Road".to_string()],
                city: Some("Bangalore".to_string()),
                state: Some("Karnataka".to_string()),
                postal_code: Some("560001".to_string()),
                country: Some("India".to_string()),
            }],
            active: true,
        },
        Patient {
            id: "P002".to_string(),
            identifier: vec![Identifier {
                system: "urn:oid:hospital-mrn".to_string(),
                value: "MRN-2024-002".to_string(),
            }],
            name: vec![HumanName {
                family: "Johnson".to_string(),
                given: vec!["Sarah".to_string(), "Marie".to_string()],
            }],
            birth_date: Some("1990-07-22".to_string()),
            gender: Some("female".to_string()),
            telecom: vec![
                ContactPoint {
                    system: "phone".to_string(),
                    value: "+1-555-0102".to_string(),
                    r#use: Some("mobile".to_string()),
                },
                ContactPoint {
                    system: "email".to_string(),
                    value: "sarah.johnson@email.com".to_string(),
                    r#use: Some("home".to_string()),
                },
            ],
            address: vec![Address {
                line: vec!["456 Oak Street".to_string()],
                city: Some("Boston".to_string()),
                state: Some("MA".to_string()),
                postal_code: Some("02101".to_string()),
                country: Some("USA".to_string()),
            }],
            active: true,
        },
        Patient {
            id: "P003".to_string(),
            identifier: vec![Identifier {
                system: "urn:oid:hospital-mrn".to_string(),
                value: "MRN-2024-003".to_string(),
            }],
            name: vec![HumanName {
                family: "Patel".to_string(),
                given: vec!["Anita".to_string()],
            }],
            birth_date: Some("1978-11-30".to_string()),
            gender: Some("female".to_string()),
            telecom: vec![ContactPoint {
                system: "phone".to_string(),
                value: "+91-8765432109".to_string(),
                r#use: Some("mobile".to_string()),
            }],
            address: vec![Address {
                line: vec!["789 Gandhi Nagar".to_string()],
                city: Some("Mumbai".to_string()),
                state: Some("Maharashtra".to_string()),
                postal_code: Some("400001".to_string()),
                country: Some("India".to_string()),
            }],
            active: true,
        },
    ]
}

#[allow(clippy::too_many_arguments)]
fn coverage(
    id: &str,
    status: CoverageStatus,
    patient_id: &str,
    payor: &str,
    period: (&str, &str),
    plan_name: &str,
    copay: f64,
    services: &[&str],
) -> Coverage {
    Coverage {
        id: id.to_string(),
        status,
        beneficiary: format!("Patient/{}", patient_id),
        payor: vec![payor.to_string()],
        period: Some(Period {
            start: period.0.to_string(),
            end: Some(period.1.to_string()),
        }),
        plan_name: Some(plan_name.to_string()),
        copay_amount: Some(copay),
        eligible_services: services.iter().map(|s| s.to_string()).collect(),
        service_requested: None,
        is_eligible: None,
        eligibility_reason: None,
    }
}

fn sample_coverages() -> Vec<(&'static str, Coverage)> {
    vec![
        (
            "P001",
            coverage(
                "COV-001",
                CoverageStatus::Active,
                "P001",
                "Star Health Insurance",
                ("2024-01-01", "2024-12-31"),
                "Family Floater Premium",
                500.0,
                &["cardiology", "primary-care", "orthopedics", "neurology", "dermatology"],
            ),
        ),
        (
            "P002",
            coverage(
                "COV-002",
                CoverageStatus::Active,
                "P002",
                "Blue Cross Blue Shield",
                ("2024-01-01", "2024-12-31"),
                "PPO Gold Plan",
                30.0,
                &["primary-care", "cardiology", "mental-health"],
            ),
        ),
        (
            "P003",
            coverage(
                "COV-003",
                CoverageStatus::Cancelled,
                "P003",
                "ICICI Lombard",
                ("2023-01-01", "2023-12-31"),
                "Individual Health Plan",
                1000.0,
                &[],
            ),
        ),
    ]
}
