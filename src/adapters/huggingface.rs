//! Hugging Face Inference API text-generation backend.
//!
//! Endpoint: POST {endpoint}/{model}
//! Auth: Bearer token

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::{CompletionBackend, GenerationParams};

/// Default hosted inference endpoint
pub const DEFAULT_ENDPOINT: &str = "https://api-inference.huggingface.co/models";

/// Default instruction-tuned model
pub const DEFAULT_MODEL: &str = "mistralai/Mistral-7B-Instruct-v0.2";

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Failed to reach inference endpoint: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Inference endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed inference response: {0}")]
    Malformed(String),
}

#[derive(Debug, Serialize)]
struct GenerationRequest<'a> {
    inputs: &'a str,
    parameters: GenerationParameters,
}

#[derive(Debug, Serialize)]
struct GenerationParameters {
    max_new_tokens: u32,
    temperature: f32,
    return_full_text: bool,
}

#[derive(Debug, Deserialize)]
struct GeneratedText {
    generated_text: String,
}

/// Text-generation client for the Hugging Face Inference API
pub struct HuggingFaceBackend {
    endpoint: String,
    model: String,
    token: String,
    client: reqwest::Client,
}

impl HuggingFaceBackend {
    /// Create a backend. `timeout` bounds each completion request.
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: endpoint.into(),
            model: model.into(),
            token: token.into(),
            client,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn model_url(&self) -> String {
        format!("{}/{}", self.endpoint.trim_end_matches('/'), self.model)
    }

    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String, BackendError> {
        let request = GenerationRequest {
            inputs: prompt,
            parameters: GenerationParameters {
                max_new_tokens: params.max_new_tokens,
                temperature: params.temperature,
                return_full_text: false,
            },
        };

        let response = self
            .client
            .post(self.model_url())
            .bearer_auth(&self.token)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let generated: Vec<GeneratedText> = response
            .json()
            .await
            .map_err(|e| BackendError::Malformed(e.to_string()))?;

        generated
            .into_iter()
            .next()
            .map(|g| g.generated_text)
            .ok_or_else(|| BackendError::Malformed("empty generation list".to_string()))
    }
}

#[async_trait]
impl CompletionBackend for HuggingFaceBackend {
    fn name(&self) -> &str {
        "huggingface"
    }

    async fn complete(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        debug!(model = %self.model, prompt_chars = prompt.len(), "Requesting completion");
        Ok(self.generate(prompt, params).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_url() {
        let backend = HuggingFaceBackend::new(
            "https://example.test/models/",
            DEFAULT_MODEL,
            "TOKEN",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            backend.model_url(),
            "https://example.test/models/mistralai/Mistral-7B-Instruct-v0.2"
        );
        assert_eq!(backend.name(), "huggingface");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_an_error() {
        let backend = HuggingFaceBackend::new(
            "http://127.0.0.1:9",
            "model",
            "TOKEN",
            Duration::from_millis(500),
        )
        .unwrap();
        let result = backend.complete("hello", &GenerationParams::default()).await;
        assert!(result.is_err());
    }
}
