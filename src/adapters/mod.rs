//! Adapter interfaces for external systems.
//!
//! Two capabilities are consumed from outside the core:
//! - `ClinicalApi`: patient, coverage, slot and booking lookups
//! - `CompletionBackend`: optional generative text completion

pub mod huggingface;
pub mod sandbox;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::domain::{BookingResult, Coverage, Patient, Slot};

pub use huggingface::{BackendError, HuggingFaceBackend};
pub use sandbox::SandboxApi;

/// Clinical resource API
#[async_trait]
pub trait ClinicalApi: Send + Sync {
    /// Case-insensitive name match on given, family or full name; exact
    /// match on `dob`; substring match on identifier value.
    async fn search_patients(
        &self,
        name: &str,
        dob: Option<&str>,
        identifier: Option<&str>,
    ) -> Result<Vec<Patient>>;

    /// Coverage annotated with eligibility for `service_type`, if any exists
    async fn get_coverage(&self, patient_id: &str, service_type: &str) -> Result<Option<Coverage>>;

    /// Free slots for a specialty in an inclusive date range
    async fn find_slots(
        &self,
        specialty: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
        location: Option<&str>,
    ) -> Result<Vec<Slot>>;

    /// Book (or, with `dry_run`, propose) an appointment in a slot
    async fn book_slot(
        &self,
        patient_id: &str,
        slot_id: &str,
        reason: &str,
        dry_run: bool,
    ) -> Result<BookingResult>;
}

/// Generation settings passed to a completion backend
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub max_new_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_new_tokens: 500,
            temperature: 0.1,
        }
    }
}

/// Text completion backend
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &str;

    /// Complete `prompt`, returning only the generated text
    async fn complete(&self, prompt: &str, params: &GenerationParams) -> Result<String>;
}
