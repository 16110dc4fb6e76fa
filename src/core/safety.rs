//! Safety classification for incoming requests and outgoing operation calls.
//!
//! The taxonomy is an ordered list of (category, pattern set) rules checked
//! highest severity first; the first matching rule wins. Diagnosis and advice
//! rules are lifted when the text also reads as a legitimate workflow request
//! (scheduling, search, insurance checks, a named specialty). Emergencies and
//! prescription requests are never lifted.

use std::sync::LazyLock;

use regex::{RegexSet, RegexSetBuilder};
use serde_json::{Map, Value};
use tracing::debug;

use crate::domain::{Operation, SafetyVerdict, ViolationCategory};

const EMERGENCY_PATTERNS: &[&str] = &[
    r"\bheart attack\b",
    r"\bstroke\b",
    r"\bcan't breathe\b",
    r"\bchest pain\b",
    r"\bsuicid(e|al)\b",
    r"\bsevere bleeding\b",
    r"\bunconscious\b",
    r"\bseizure\b",
    r"\boverdos(e|ing)\b",
];

const DIAGNOSIS_PATTERNS: &[&str] = &[
    r"\bwhat('s| is) wrong with\b",
    r"\bdiagnos(e|is)\b",
    r"\bwhat (do i|does .+) have\b",
    r"\bwhat (disease|condition|illness)\b",
    r"\bam i (sick|ill)\b",
    r"\bdo i have\b.*(disease|cancer|diabetes|infection)",
    r"\bcould (this|it|i) be\b",
    r"\bwhat are my symptoms of\b",
    r"\bidentify (the|my) (disease|condition|illness)\b",
];

const ADVICE_PATTERNS: &[&str] = &[
    r"\bshould i (take|use|stop|continue)\b",
    r"\bwhat (medication|medicine|drug|treatment) should\b",
    r"\bhow (to|do i) treat\b",
    r"\brecommend.*(treatment|medication|therapy)\b",
    r"\bwhat('s| is) the best (treatment|cure|remedy)\b",
    r"\badvice (for|on|about).*(health|medical|symptom)\b",
    r"\bis it (safe|okay|ok) to\b.*(take|use|stop)\b",
    r"\bcan i (take|use|combine)\b.*(medicine|medication|drug)\b",
    r"\bi have\b.*(what (to do|should i do)|help)\b",
    r"\bi('m| am) (having|feeling|experiencing)\b.*(what|help)\b",
    r"\bwhat (to do|should i do)\b.*(pain|ache|fever|cold|cough|headache|symptom)\b",
    r"\bwhat is the (remedy|cure|solution|fix)\b",
    r"\bhow (to|do i|can i) (cure|fix|heal|stop|relieve|get rid of)\b",
    r"\bremedy for\b",
    r"\bcure for\b",
    r"\btreatment for\b",
    r"\bhome (remedy|remedies|treatment)\b",
    r"\bwhat helps (with|for)\b.*(pain|ache|fever|cold|cough)\b",
    r"\bhow to (stop|relieve|reduce|ease)\b.*(pain|ache|fever|symptom)\b",
    r"\b(headache|pain|fever|nausea|cough|cold|flu|sick|unwell)\b.*\b(what|how|help|remedy|cure)\b",
    r"\bfeeling\b.*(sick|unwell|bad|ill)\b.*\b(what|how|help)\b",
];

const PRESCRIPTION_PATTERNS: &[&str] = &[
    r"\bprescri(b(e|ed|ing)|ptions?)\b",
    r"\bwhat dose\b",
    r"\bhow much.*(medicine|medication|drug)\b",
    r"\brefill (my|a) (prescription|medication)\b",
    r"\border.*(medicine|medication|drug)\b",
];

const VALID_WORKFLOW_PATTERNS: &[&str] = &[
    r"\b(schedule|book|cancel|reschedule).*(appointment|visit)\b",
    r"\b(check|verify).*(insurance|eligibility|coverage)\b",
    r"\b(find|search|look up).*(patient|slot|availability)\b",
    r"\b(available|open).*(slot|time|appointment)\b",
    r"\bfollow[- ]?up\b",
    r"\b(cardiology|neurology|orthopedics|primary[- ]care)\b",
];

struct CategoryRule {
    category: ViolationCategory,
    patterns: RegexSet,
    reason: &'static str,
    suggested_action: &'static str,
}

fn pattern_set(patterns: &[&str]) -> RegexSet {
    RegexSetBuilder::new(patterns)
        .case_insensitive(true)
        .build()
        .expect("safety patterns are compile-time constants")
}

static TAXONOMY: LazyLock<Vec<CategoryRule>> = LazyLock::new(|| {
    vec![
        CategoryRule {
            category: ViolationCategory::Emergency,
            patterns: pattern_set(EMERGENCY_PATTERNS),
            reason: "This appears to be a medical emergency. I cannot assist with emergency medical situations.",
            suggested_action: "Please call emergency services (911) or go to the nearest emergency room immediately.",
        },
        CategoryRule {
            category: ViolationCategory::DiagnosisRequest,
            patterns: pattern_set(DIAGNOSIS_PATTERNS),
            reason: "I cannot provide medical diagnoses. I am a workflow automation agent, not a diagnostic tool.",
            suggested_action: "Please consult with a healthcare provider for diagnosis. I can help you schedule an appointment.",
        },
        CategoryRule {
            category: ViolationCategory::MedicalAdvice,
            patterns: pattern_set(ADVICE_PATTERNS),
            reason: "I cannot provide medical advice or treatment recommendations.",
            suggested_action: "Please consult with a healthcare provider for medical advice. I can help you schedule an appointment.",
        },
        CategoryRule {
            category: ViolationCategory::DrugPrescription,
            patterns: pattern_set(PRESCRIPTION_PATTERNS),
            reason: "I cannot prescribe medications or recommend treatments.",
            suggested_action: "Please contact your healthcare provider or pharmacist for prescription-related questions.",
        },
    ]
});

static VALID_WORKFLOW: LazyLock<RegexSet> = LazyLock::new(|| pattern_set(VALID_WORKFLOW_PATTERNS));

/// Stateless text classifier. Identical input always yields an equal verdict.
#[derive(Debug, Clone, Copy, Default)]
pub struct SafetyClassifier;

impl SafetyClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Whether the text reads as a scheduling/search/insurance request
    pub fn is_valid_workflow(&self, text: &str) -> bool {
        VALID_WORKFLOW.is_match(text)
    }

    /// Classify a free-text request against the taxonomy
    pub fn classify(&self, text: &str) -> SafetyVerdict {
        self.first_violation(text, TAXONOMY.iter())
    }

    /// First rule in `rules` the text trips, honouring the workflow carve-out
    fn first_violation<'a>(
        &self,
        text: &str,
        rules: impl Iterator<Item = &'a CategoryRule>,
    ) -> SafetyVerdict {
        let text = text.trim();

        for rule in rules {
            if !rule.patterns.is_match(text) {
                continue;
            }
            if rule.category.exempt_on_workflow() && self.is_valid_workflow(text) {
                debug!(category = %rule.category, "Matched category lifted by workflow phrasing");
                continue;
            }
            debug!(category = %rule.category, "Text matched unsafe category");
            return SafetyVerdict::unsafe_with(rule.category, rule.reason, rule.suggested_action);
        }

        SafetyVerdict::safe()
    }

    /// Check a resolved operation call before it is dispatched.
    ///
    /// Rejects operations outside the allow-list, and any string argument
    /// that classifies as diagnosis, advice or prescription content.
    pub fn validate_call(&self, operation_name: &str, arguments: &Map<String, Value>) -> SafetyVerdict {
        if Operation::from_name(operation_name).is_none() {
            return SafetyVerdict::rejected(
                format!("Function '{}' is not an allowed workflow function.", operation_name),
                format!("Available functions: {}", Operation::names().join(", ")),
            );
        }

        for (key, value) in arguments {
            let Value::String(text) = value else {
                continue;
            };
            // Emergency wording is not checked here and must not hide the rest
            let verdict = self.first_violation(
                text,
                TAXONOMY
                    .iter()
                    .filter(|rule| rule.category != ViolationCategory::Emergency),
            );
            let Some(category) = verdict.violation_category else {
                continue;
            };
            return SafetyVerdict {
                is_safe: false,
                violation_category: Some(category),
                reason: Some(format!(
                    "Argument '{}' contains unsafe content: {}",
                    key,
                    verdict.reason.unwrap_or_default()
                )),
                suggested_action: verdict.suggested_action,
            };
        }

        SafetyVerdict::safe()
    }
}

/// Replace control characters and collapse whitespace
pub fn clean_request(input: &str) -> String {
    let cleaned: String = input
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Clean a request and cap it at `max_chars` characters
pub fn sanitize_request(input: &str, max_chars: usize) -> String {
    clean_request(input)
        .chars()
        .take(max_chars)
        .collect::<String>()
        .trim()
        .to_string()
}
