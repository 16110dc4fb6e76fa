//! Structured response returned for every request.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::plan::Plan;
use super::verdict::ViolationCategory;

/// Record of one executed plan step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub operation_name: String,
    pub resolved_arguments: Map<String, Value>,
    pub outcome: Value,
}

/// Payload attached to a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseData {
    Results {
        results: Vec<StepResult>,
    },
    Refusal {
        violation_category: Option<ViolationCategory>,
        suggested_action: Option<String>,
    },
}

/// What the orchestrator hands back to its caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    pub message: String,
    pub data: Option<ResponseData>,
    /// The plan as resolved, before placeholder binding
    pub function_calls: Option<Plan>,
    pub safety_refused: bool,
    pub dry_run: bool,
    pub session_id: String,
}

impl Response {
    /// Executed step results, empty for refusals and unresolved requests
    pub fn results(&self) -> &[StepResult] {
        match &self.data {
            Some(ResponseData::Results { results }) => results,
            _ => &[],
        }
    }

    pub fn suggested_action(&self) -> Option<&str> {
        match &self.data {
            Some(ResponseData::Refusal {
                suggested_action, ..
            }) => suggested_action.as_deref(),
            _ => None,
        }
    }

    pub fn violation_category(&self) -> Option<ViolationCategory> {
        match &self.data {
            Some(ResponseData::Refusal {
                violation_category, ..
            }) => *violation_category,
            _ => None,
        }
    }
}
