//! The provider boundary: the client trait the core calls through, and the
//! per-call response record the consensus engine aggregates.

mod extract;
mod retry;

pub use extract::{extract_confidence, extract_payload, ExtractError};
pub use retry::{call_with_retry, BackoffStrategy, JitterStrategy, ProviderCallOptions};

use crate::core::Payload;
use crate::errors::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Per-provider generation parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Maximum output size in tokens.
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

fn default_temperature() -> f64 {
    0.2
}

fn default_max_output_tokens() -> u32 {
    1024
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

/// The raw outcome of a successful provider call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generation {
    /// Free-form response text.
    pub text: String,
    /// Latency reported by the backend, in milliseconds.
    pub latency_ms: f64,
}

/// An external AI text-generation backend.
///
/// The core is agnostic to which concrete backend implements this; the
/// consensus engine only ever sees this trait.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Returns the stable provider id used in stage specs and trust weights.
    fn id(&self) -> &str;

    /// Generates a completion for the given prompts.
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        params: &GenerationParams,
    ) -> Result<Generation, ProviderError>;
}

/// Terminal classification of one provider call after retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderOutcome {
    /// The call succeeded and a structured payload was extracted.
    Success,
    /// The call exhausted its deadline (possibly across retries).
    Timeout,
    /// The provider rejected the credentials.
    AuthFailure,
    /// The provider throttled the call and retries ran out.
    RateLimited,
    /// The response text carried no extractable structured payload.
    MalformedResponse,
    /// No client is configured under the requested provider id; the call
    /// was never issued.
    NotConfigured,
}

impl From<&ProviderError> for ProviderOutcome {
    fn from(err: &ProviderError) -> Self {
        match err {
            ProviderError::Timeout { .. } => Self::Timeout,
            ProviderError::AuthFailure { .. } => Self::AuthFailure,
            ProviderError::RateLimited { .. } => Self::RateLimited,
            ProviderError::MalformedResponse { .. } => Self::MalformedResponse,
        }
    }
}

/// One provider's contribution to a stage, success or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The provider id.
    pub provider_id: String,
    /// The raw response text (empty when the call failed outright).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub raw_text: String,
    /// Observed latency of the final attempt, in milliseconds.
    pub latency_ms: f64,
    /// Terminal outcome of the call.
    pub outcome: ProviderOutcome,
    /// Extracted structured payload, present only on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
    /// Self-reported or derived confidence in `[0, 1]`.
    pub confidence: f64,
    /// How many attempts the call took, retries included.
    pub attempts: u32,
}

impl ProviderResponse {
    /// Returns whether the response can participate in aggregation.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.outcome == ProviderOutcome::Success && self.payload.is_some()
    }

    /// Builds a failed response from a terminal provider error.
    #[must_use]
    pub fn from_error(err: &ProviderError, latency_ms: f64, attempts: u32) -> Self {
        Self {
            provider_id: err.provider().to_string(),
            raw_text: String::new(),
            latency_ms,
            outcome: ProviderOutcome::from(err),
            payload: None,
            confidence: 0.0,
            attempts,
        }
    }
}
