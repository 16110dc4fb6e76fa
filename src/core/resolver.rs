//! Intent resolution: request text to an ordered plan of operation calls.
//!
//! Two strategies are tried in order. The generative one asks a completion
//! backend for a JSON plan; if there is no backend, or it fails, or its
//! output holds no usable plan, it reports `Unavailable` and the
//! deterministic rule pipeline produces the plan instead. The backend is
//! never retried.

use std::sync::{Arc, LazyLock};

use chrono::{Datelike, Duration, NaiveDate};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::adapters::{CompletionBackend, GenerationParams};
use crate::domain::{Operation, OperationCall, PendingRef, Plan};

const SYSTEM_PROMPT: &str = "You are a clinical workflow automation agent. Your role is to help healthcare staff with administrative tasks like:
- Searching for patients
- Checking insurance eligibility
- Finding available appointment slots
- Booking appointments

You are NOT allowed to:
- Provide medical diagnoses
- Give medical advice
- Recommend treatments or medications
- Make medical decisions

You MUST use the provided functions to complete tasks. Always respond with function calls when appropriate.

When the user asks to schedule an appointment, you should:
1. First search for the patient
2. Check their insurance eligibility for the specialty
3. Find available slots for the requested specialty and time period
4. Book the appointment using the patient ID and a selected slot ID

Always respond with structured function calls. Never make up data - only use data returned from function calls.";

/// Specialty vocabulary, in match priority order
const SPECIALTIES: [&str; 4] = ["cardiology", "neurology", "orthopedics", "primary-care"];

/// Service type used when the request names no specialty
const DEFAULT_SERVICE: &str = "primary-care";

/// Words that can never be part of a patient name
const NAME_STOP_WORDS: &[&str] = &[
    "a", "an", "and", "the", "for", "my", "me", "his", "her", "their", "patient", "appointment",
    "appointments", "insurance", "coverage", "eligibility", "book", "schedule", "check", "verify",
    "search", "find", "look", "looking", "trying", "cardiology", "neurology", "orthopedics",
    "primary", "care", "follow", "up", "next", "this", "week", "today", "tomorrow", "on", "at",
    "in", "with", "to", "slot", "slots",
];

/// Spelling variants of known patients
const KNOWN_PATIENTS: &[(&str, &str)] = &[
    ("ravikumar", "Ravi Kumar"),
    ("raviakumar", "Ravi Kumar"),
    ("sarahjohnson", "Sarah Johnson"),
    ("anitapatel", "Anita Patel"),
];

const INSURANCE_KEYWORDS: &[&str] = &["insurance", "eligibility", "coverage", "eligible"];
const SLOT_KEYWORDS: &[&str] = &["schedule", "appointment", "book", "available"];
const BOOKING_KEYWORDS: &[&str] = &["book", "schedule", "appoint"];

static NAME_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\bi\s+am\s+([a-z]+(?:\s+[a-z]+)?)",
        r"(?i)\bpatient\s+([a-z]+(?:\s+[a-z]+)?)",
        r"(?i)\bfor\s+([a-z]+(?:\s+[a-z]+)?)",
        // Capitalised run of words, case-sensitive
        r"\b([A-Z][a-z]+(?:\s+[A-Z][a-z]+)+)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("name patterns are compile-time constants"))
    .collect()
});

static DAY_MONTH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,2})-(\d{1,2})\b").expect("date pattern is a compile-time constant")
});

/// Which strategy produced a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Generative,
    Deterministic,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Generative => write!(f, "generative"),
            Self::Deterministic => write!(f, "deterministic"),
        }
    }
}

/// Result of the generative arm
#[derive(Debug, Clone, PartialEq)]
pub enum GenerativeOutcome {
    Plan(Plan),
    /// No usable plan; carries the reason
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub plan: Plan,
    pub strategy: Strategy,
    /// Set when a configured backend was tried and its output was not used
    pub fallback_reason: Option<String>,
}

/// Turns request text into a [`Plan`]
pub struct IntentResolver {
    backend: Option<Arc<dyn CompletionBackend>>,
    params: GenerationParams,
}

impl IntentResolver {
    pub fn new(backend: Option<Arc<dyn CompletionBackend>>) -> Self {
        Self {
            backend,
            params: GenerationParams::default(),
        }
    }

    /// Resolver that only uses the rule pipeline
    pub fn deterministic() -> Self {
        Self::new(None)
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    #[instrument(skip(self, text))]
    pub async fn resolve(&self, text: &str, today: NaiveDate) -> Resolution {
        let fallback_reason = match self.try_generative(text, today).await {
            GenerativeOutcome::Plan(plan) => {
                info!(steps = plan.len(), "Plan resolved by completion backend");
                return Resolution {
                    plan,
                    strategy: Strategy::Generative,
                    fallback_reason: None,
                };
            }
            GenerativeOutcome::Unavailable(reason) if self.has_backend() => {
                warn!(%reason, "Completion backend unusable, falling back to rules");
                Some(reason)
            }
            GenerativeOutcome::Unavailable(_) => None,
        };

        let plan = deterministic_plan(text, today);
        info!(steps = plan.len(), "Plan resolved by rules");
        Resolution {
            plan,
            strategy: Strategy::Deterministic,
            fallback_reason,
        }
    }

    /// Ask the backend for a plan. A single attempt; no retry.
    pub async fn try_generative(&self, text: &str, today: NaiveDate) -> GenerativeOutcome {
        let Some(backend) = &self.backend else {
            return GenerativeOutcome::Unavailable("no completion backend configured".to_string());
        };

        let prompt = build_prompt(text, today);
        let raw = match backend.complete(&prompt, &self.params).await {
            Ok(raw) => raw,
            Err(e) => {
                return GenerativeOutcome::Unavailable(format!(
                    "{} call failed: {:#}",
                    backend.name(),
                    e
                ))
            }
        };
        debug!(chars = raw.len(), "Completion received");

        match extract_plan(&raw) {
            Some(plan) if !plan.is_empty() => GenerativeOutcome::Plan(plan),
            Some(_) => GenerativeOutcome::Unavailable("completion contained an empty plan".to_string()),
            None => GenerativeOutcome::Unavailable("completion contained no plan".to_string()),
        }
    }
}

/// Following Monday through Friday relative to `today`
pub fn next_business_week(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let days_to_monday = 7 - i64::from(today.weekday().num_days_from_monday());
    let start = today + Duration::days(days_to_monday);
    (start, start + Duration::days(4))
}

fn signature(operation: Operation) -> String {
    let params = operation.parameters();
    let required: Vec<&str> = params["required"]
        .as_array()
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    // Required parameters first, in declared order; optional ones after
    let optional = params["properties"]
        .as_object()
        .map(|props| {
            props
                .keys()
                .filter(|k| !required.contains(&k.as_str()))
                .map(|k| format!("{}?", k))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let args: Vec<String> = required
        .iter()
        .map(|r| r.to_string())
        .chain(optional)
        .collect();

    format!("{}({})", operation, args.join(", "))
}

/// Prompt for the generative strategy
pub fn build_prompt(text: &str, today: NaiveDate) -> String {
    let (week_start, week_end) = next_business_week(today);
    let catalogue: Vec<String> = Operation::ALL
        .iter()
        .map(|op| format!("- {}: {}", signature(*op), op.description()))
        .collect();

    format!(
        "{system}\n\n\
         Today's date: {today}\n\
         Next week date range: {start} to {end}\n\n\
         Available functions:\n{catalogue}\n\n\
         Use \"{patient}\" for a patient ID and \"{slot}\" for a slot ID that an earlier call will return.\n\n\
         User request: {text}\n\n\
         Respond with a JSON object containing the function calls to make. Format:\n\
         {{\"function_calls\": [{{\"name\": \"function_name\", \"arguments\": {{\"arg1\": \"value1\"}}}}]}}\n\n\
         If you need to call multiple functions, include them all in the array in order of execution.\n\
         Only respond with the JSON object, no other text.",
        system = SYSTEM_PROMPT,
        today = today.format("%Y-%m-%d"),
        start = week_start.format("%Y-%m-%d"),
        end = week_end.format("%Y-%m-%d"),
        catalogue = catalogue.join("\n"),
        patient = PendingRef::PatientId.token(),
        slot = PendingRef::SlotId.token(),
        text = text,
    )
}

/// Every balanced `{...}` span, in order of its opening brace.
/// Braces inside JSON strings are ignored.
fn balanced_spans(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();

    for (start, _) in text.match_indices('{') {
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;

        for (offset, &b) in bytes[start..].iter().enumerate() {
            if in_string {
                match b {
                    _ if escaped => escaped = false,
                    b'\\' => escaped = true,
                    b'"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        spans.push(&text[start..=start + offset]);
                        break;
                    }
                }
                _ => {}
            }
        }
    }

    spans
}

fn plan_from_value(value: Value) -> Option<Plan> {
    let Value::Object(mut object) = value else {
        return None;
    };

    if let Some(calls) = object.remove("function_calls") {
        let Value::Array(calls) = calls else {
            return None;
        };
        return Some(
            calls
                .into_iter()
                .filter_map(|c| serde_json::from_value::<OperationCall>(c).ok())
                .collect(),
        );
    }

    if object.contains_key("name") {
        return serde_json::from_value::<OperationCall>(Value::Object(object))
            .ok()
            .map(|call| vec![call]);
    }

    None
}

/// Parse the first balanced JSON object with a plan shape out of raw
/// completion text: either `{"function_calls": [...]}` or a single call.
pub fn extract_plan(raw: &str) -> Option<Plan> {
    balanced_spans(raw)
        .into_iter()
        .filter_map(|span| serde_json::from_str::<Value>(span).ok())
        .find_map(plan_from_value)
}

fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut at_word_start = true;
    for c in text.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

fn is_stop_word(word: &str) -> bool {
    NAME_STOP_WORDS.contains(&word.to_lowercase().as_str())
}

/// Leading stop words dropped, then up to two words until the next stop word
fn name_candidate(captured: &str) -> Option<String> {
    let words: Vec<&str> = captured
        .split_whitespace()
        .skip_while(|w| is_stop_word(w))
        .take_while(|w| !is_stop_word(w))
        .take(2)
        .collect();

    let name = words.join(" ");
    (name.len() > 2).then(|| title_case(&name))
}

fn canonical_name(name: String) -> String {
    let key: String = name.to_lowercase().split_whitespace().collect();
    KNOWN_PATIENTS
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, proper)| proper.to_string())
        .unwrap_or(name)
}

/// Patient name, trying each pattern in priority order
pub fn extract_patient_name(text: &str) -> Option<String> {
    NAME_PATTERNS
        .iter()
        .flat_map(|pattern| pattern.captures_iter(text))
        .filter_map(|caps| caps.get(1))
        .find_map(|m| name_candidate(m.as_str()))
        .map(canonical_name)
}

/// First specialty named in the text, tolerating hyphen and space variants
pub fn extract_specialty(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    SPECIALTIES.into_iter().find(|s| {
        lower.contains(s) || lower.contains(&s.replace('-', " ")) || lower.contains(&s.replace('-', ""))
    })
}

fn derive_reason(text: &str, specialty: Option<&str>) -> String {
    let lower = text.to_lowercase();
    if lower.contains("follow") && lower.contains("up") {
        format!("{} follow-up", specialty.map(title_case).unwrap_or_else(|| "Medical".to_string()))
    } else if let Some(specialty) = specialty {
        format!("{} consultation", title_case(specialty))
    } else {
        "Follow-up appointment".to_string()
    }
}

/// Explicit day-month date as a one-day range, else the next business week.
/// A month earlier than the current one rolls over to next year.
pub fn derive_date_range(text: &str, today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let explicit = DAY_MONTH.captures_iter(text).find_map(|caps| {
        let day: u32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let year = if month >= today.month() {
            today.year()
        } else {
            today.year() + 1
        };
        NaiveDate::from_ymd_opt(year, month, day)
    });

    match explicit {
        Some(date) => (date, date),
        None => next_business_week(today),
    }
}

fn mentions(lower: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| lower.contains(k))
}

/// Rule-based plan extraction
pub fn deterministic_plan(text: &str, today: NaiveDate) -> Plan {
    let lower = text.to_lowercase();
    let patient_name = extract_patient_name(text);
    let specialty = extract_specialty(text);
    let service_type = specialty.unwrap_or(DEFAULT_SERVICE);
    let reason = derive_reason(text, specialty);
    let (start_date, end_date) = derive_date_range(text, today);

    let wants_insurance = mentions(&lower, INSURANCE_KEYWORDS);
    let wants_slots = mentions(&lower, SLOT_KEYWORDS);
    let wants_booking = mentions(&lower, BOOKING_KEYWORDS);

    debug!(
        ?patient_name,
        ?specialty,
        wants_insurance,
        wants_slots,
        wants_booking,
        "Rule extraction"
    );

    let mut plan = Plan::new();

    if let Some(name) = patient_name {
        plan.push(OperationCall::new(Operation::SearchPatient).arg("name", name));
    }

    if wants_insurance || wants_booking {
        plan.push(
            OperationCall::new(Operation::CheckInsuranceEligibility)
                .pending("patient_id", PendingRef::PatientId)
                .arg("service_type", service_type),
        );
    }

    if wants_slots || wants_booking {
        plan.push(
            OperationCall::new(Operation::FindAvailableSlots)
                .arg("specialty", service_type)
                .arg("start_date", start_date.format("%Y-%m-%d").to_string())
                .arg("end_date", end_date.format("%Y-%m-%d").to_string()),
        );
    }

    if wants_booking {
        plan.push(
            OperationCall::new(Operation::BookAppointment)
                .pending("patient_id", PendingRef::PatientId)
                .pending("slot_id", PendingRef::SlotId)
                .arg("reason", reason),
        );
    }

    plan
}
