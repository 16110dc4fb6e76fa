//! Request orchestrator.
//!
//! Coordinates safety classification, plan resolution, step execution with
//! reference binding, and audit recording for one request at a time.

use anyhow::Result;
use chrono::{Local, NaiveDate};
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use crate::domain::{
    AuditKind, Bindings, Operation, Plan, Response, ResponseData, SafetyVerdict, StepResult,
};

use super::audit::{AuditSummary, AuditTrail};
use super::dispatcher::Dispatcher;
use super::resolver::IntentResolver;
use super::safety::{clean_request, sanitize_request, SafetyClassifier};

/// Default cap on the request text handed to the resolver
pub const DEFAULT_MAX_REQUEST_CHARS: usize = 500;

const NO_PLAN_MESSAGE: &str = "I couldn't determine which actions to take from your request. \
Please be more specific about what you'd like me to do (e.g., 'Schedule a cardiology appointment for patient John Smith next week').";

/// Identifier of the first resource in a search bundle outcome
fn first_entry_id(outcome: &Value) -> Option<String> {
    outcome
        .get("entry")?
        .get(0)?
        .get("resource")?
        .get("id")?
        .as_str()
        .map(str::to_string)
}

/// Main request orchestrator
pub struct Orchestrator {
    classifier: SafetyClassifier,
    resolver: IntentResolver,
    dispatcher: Dispatcher,
    audit: AuditTrail,
    dry_run: bool,
    max_request_chars: usize,
}

impl Orchestrator {
    pub fn new(
        classifier: SafetyClassifier,
        resolver: IntentResolver,
        dispatcher: Dispatcher,
        audit: AuditTrail,
    ) -> Self {
        Self {
            classifier,
            resolver,
            dispatcher,
            audit,
            dry_run: false,
            max_request_chars: DEFAULT_MAX_REQUEST_CHARS,
        }
    }

    /// Dry-run setting used when `process` gets no override
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_max_request_chars(mut self, max_request_chars: usize) -> Self {
        self.max_request_chars = max_request_chars;
        self
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn session_id(&self) -> &str {
        self.audit.session_id()
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    pub fn summary(&self) -> AuditSummary {
        self.audit.summary()
    }

    /// Process one request using today's local date.
    ///
    /// Errors only when an audit event cannot be persisted.
    pub async fn process(&self, text: &str, dry_run_override: Option<bool>) -> Result<Response> {
        self.process_on(text, dry_run_override, Local::now().date_naive())
            .await
    }

    /// Process one request with an explicit reference date
    #[instrument(skip(self, text), fields(session = %self.audit.session_id()))]
    pub async fn process_on(
        &self,
        text: &str,
        dry_run_override: Option<bool>,
        today: NaiveDate,
    ) -> Result<Response> {
        let dry_run = dry_run_override.unwrap_or(self.dry_run);

        self.audit
            .record(
                AuditKind::UserRequest,
                json!({ "user_input": text, "dry_run": dry_run }),
            )
            .await?;

        // The whole request is classified; only the resolver sees the capped text
        let cleaned = clean_request(text);
        let verdict = self.classifier.classify(&cleaned);
        self.record_verdict(&cleaned, &verdict).await?;
        if !verdict.is_safe {
            return self.refuse(verdict, dry_run).await;
        }

        let request = sanitize_request(&cleaned, self.max_request_chars);

        let resolution = self.resolver.resolve(&request, today).await;
        if let Some(reason) = &resolution.fallback_reason {
            self.audit
                .record(
                    AuditKind::Error,
                    json!({
                        "error_message": format!("Completion backend failed: {}", reason),
                        "fallback": resolution.strategy,
                    }),
                )
                .await?;
        }

        let plan = resolution.plan;
        if plan.is_empty() {
            info!("No plan could be resolved");
            self.audit
                .record(AuditKind::AgentResponse, json!({ "no_actions": true }))
                .await?;
            return Ok(Response {
                success: false,
                message: NO_PLAN_MESSAGE.to_string(),
                data: None,
                function_calls: None,
                safety_refused: false,
                dry_run,
                session_id: self.session_id().to_string(),
            });
        }

        info!(steps = plan.len(), strategy = %resolution.strategy, dry_run, "Executing plan");
        let results = self.execute_plan(&plan, dry_run).await?;

        self.audit
            .record(
                AuditKind::AgentResponse,
                json!({
                    "success": true,
                    "function_count": results.len(),
                    "dry_run": dry_run,
                }),
            )
            .await?;

        let mut message = format!("Successfully executed {} function(s).", results.len());
        if dry_run {
            message.push_str(" [DRY RUN - No changes made]");
        }

        Ok(Response {
            success: true,
            message,
            data: Some(ResponseData::Results { results }),
            function_calls: Some(plan),
            safety_refused: false,
            dry_run,
            session_id: self.session_id().to_string(),
        })
    }

    async fn record_verdict(&self, request: &str, verdict: &SafetyVerdict) -> Result<()> {
        let kind = if verdict.is_safe {
            AuditKind::SafetyCheck
        } else {
            AuditKind::SafetyViolation
        };
        self.audit
            .record(
                kind,
                json!({
                    "user_input": request,
                    "safety_check_passed": verdict.is_safe,
                    "violation_category": verdict.violation_category,
                    "reason": verdict.reason,
                }),
            )
            .await?;
        Ok(())
    }

    async fn refuse(&self, verdict: SafetyVerdict, dry_run: bool) -> Result<Response> {
        let reason = verdict.reason.unwrap_or_default();
        warn!(category = ?verdict.violation_category, "Request refused");

        self.audit
            .record(
                AuditKind::AgentResponse,
                json!({ "refused": true, "reason": reason }),
            )
            .await?;

        Ok(Response {
            success: false,
            message: reason,
            data: Some(ResponseData::Refusal {
                violation_category: verdict.violation_category,
                suggested_action: verdict.suggested_action,
            }),
            function_calls: None,
            safety_refused: true,
            dry_run,
            session_id: self.session_id().to_string(),
        })
    }

    /// Walk the plan in order. Steps with unbound references or that fail
    /// call validation are skipped; nothing is retried or rolled back.
    async fn execute_plan(&self, plan: &Plan, dry_run: bool) -> Result<Vec<StepResult>> {
        let mut bindings = Bindings::default();
        let mut results = Vec::new();

        for (index, call) in plan.iter().enumerate() {
            let Some(mut arguments) = call.bind(&bindings) else {
                warn!(step = index, operation = %call.operation_name, "Skipping step with unresolved reference");
                continue;
            };

            if call.is(Operation::BookAppointment) {
                arguments.insert("dry_run".to_string(), Value::Bool(dry_run));
            }

            let check = self.classifier.validate_call(&call.operation_name, &arguments);
            if !check.is_safe {
                warn!(step = index, operation = %call.operation_name, "Call blocked by safety check");
                self.audit
                    .record(
                        AuditKind::Error,
                        json!({
                            "error_message": format!(
                                "Function call blocked: {}",
                                check.reason.unwrap_or_default()
                            ),
                            "function_name": call.operation_name,
                            "violation_category": check.violation_category,
                        }),
                    )
                    .await?;
                continue;
            }

            let call_kind = if dry_run {
                AuditKind::DryRun
            } else {
                AuditKind::FunctionCall
            };
            self.audit
                .record(
                    call_kind,
                    json!({
                        "function_name": call.operation_name,
                        "function_arguments": arguments,
                        "dry_run": dry_run,
                    }),
                )
                .await?;

            let outcome = self.dispatcher.execute(&call.operation_name, &arguments).await;

            self.audit
                .record(
                    AuditKind::FunctionResult,
                    json!({
                        "function_name": call.operation_name,
                        "function_result": outcome,
                        "dry_run": dry_run,
                    }),
                )
                .await?;

            match call.operation() {
                Some(Operation::SearchPatient) => {
                    if let Some(id) = first_entry_id(&outcome) {
                        bindings.patient_id = Some(id);
                    }
                }
                Some(Operation::FindAvailableSlots) => {
                    if let Some(id) = first_entry_id(&outcome) {
                        bindings.slot_id = Some(id);
                    }
                }
                _ => {}
            }

            results.push(StepResult {
                operation_name: call.operation_name.clone(),
                resolved_arguments: arguments,
                outcome,
            });
        }

        Ok(results)
    }
}
