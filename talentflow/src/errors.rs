//! Error types for the talentflow orchestration core.
//!
//! The taxonomy is layered the way failures propagate: provider errors are
//! recovered locally inside the consensus engine, stage failures escalate to
//! pipeline aborts only for required stages, and routing/workflow errors are
//! surfaced to the caller as data rather than unwound as faults.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by a single provider call.
///
/// `Timeout` and `RateLimited` are transient and eligible for retry;
/// `AuthFailure` and `MalformedResponse` are terminal for the call.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderError {
    /// The provider did not respond within the per-call deadline.
    #[error("Provider '{provider}' timed out after {elapsed_ms}ms")]
    Timeout {
        /// The provider id.
        provider: String,
        /// Elapsed time before the deadline fired.
        elapsed_ms: u64,
    },

    /// The provider rejected the credentials.
    #[error("Provider '{provider}' rejected authentication")]
    AuthFailure {
        /// The provider id.
        provider: String,
    },

    /// The provider throttled the call.
    #[error("Provider '{provider}' rate limited the call")]
    RateLimited {
        /// The provider id.
        provider: String,
    },

    /// The provider returned text with no extractable structured payload.
    #[error("Provider '{provider}' returned a malformed response: {reason}")]
    MalformedResponse {
        /// The provider id.
        provider: String,
        /// Why extraction failed.
        reason: String,
    },
}

impl ProviderError {
    /// Returns the provider id the error belongs to.
    #[must_use]
    pub fn provider(&self) -> &str {
        match self {
            Self::Timeout { provider, .. }
            | Self::AuthFailure { provider }
            | Self::RateLimited { provider }
            | Self::MalformedResponse { provider, .. } => provider,
        }
    }

    /// Returns whether the error is transient and worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::RateLimited { .. })
    }
}

/// Why a stage produced no consensus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageFailureReason {
    /// Every provider in the stage's set failed.
    #[error("all providers failed")]
    AllProvidersFailed,

    /// Fewer providers succeeded than the stage's quorum requires.
    #[error("below quorum")]
    BelowQuorum,
}

/// Why a pipeline run stopped before completing all stages.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineAbort {
    /// A stage marked `required` failed, so later stages were not run.
    #[error("Required stage '{stage}' failed: {reason}")]
    RequiredStageFailed {
        /// The stage that failed.
        stage: String,
        /// Why the stage failed.
        reason: StageFailureReason,
    },

    /// The caller cancelled the run, or the pipeline deadline expired.
    #[error("Pipeline cancelled: {reason}")]
    Cancelled {
        /// The cancellation reason.
        reason: String,
    },
}

/// Errors raised while routing trigger events between modules.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoutingError {
    /// An output trigger named a module that is not registered.
    #[error("Trigger '{trigger_type}' targets unregistered module '{target}'")]
    UnregisteredTarget {
        /// The trigger type.
        trigger_type: String,
        /// The missing module id.
        target: String,
    },

    /// A trigger chain exceeded the configured causal depth.
    #[error(
        "Cycle detected: trigger '{trigger_type}' reached causal depth {depth} (max {max_depth}); visited: {}",
        visited.join(" -> ")
    )]
    CycleDetected {
        /// The trigger type that tripped the breaker.
        trigger_type: String,
        /// The depth the event arrived with.
        depth: u32,
        /// The configured maximum.
        max_depth: u32,
        /// Modules the chain passed through.
        visited: Vec<String>,
    },

    /// A module id was registered twice.
    #[error("Module '{module_id}' is already registered")]
    DuplicateModule {
        /// The module id.
        module_id: String,
    },

    /// A targeted trigger named a module that does not accept its type.
    #[error("Module '{module_id}' does not accept trigger '{trigger_type}'")]
    NotAccepted {
        /// The trigger type.
        trigger_type: String,
        /// The targeted module id.
        module_id: String,
    },

    /// A broadcast trigger found no module accepting its type.
    #[error("No module accepts trigger '{trigger_type}'")]
    NoSubscribers {
        /// The trigger type.
        trigger_type: String,
    },
}

/// Errors raised while executing a module workflow.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkflowError {
    /// A step failed; later steps were not run.
    #[error("Workflow '{workflow}' step '{step}' failed: {reason}")]
    StepFailed {
        /// The workflow name.
        workflow: String,
        /// The failing step.
        step: String,
        /// Why the step failed.
        reason: String,
    },

    /// A trigger mapped to a workflow name the module does not define.
    #[error("Module '{module_id}' has no workflow named '{workflow}'")]
    UnknownWorkflow {
        /// The module id.
        module_id: String,
        /// The requested workflow.
        workflow: String,
    },
}

/// The umbrella error type for the composition root.
#[derive(Debug, Error)]
pub enum TalentflowError {
    /// A provider-level error escaped local recovery.
    #[error("{0}")]
    Provider(#[from] ProviderError),

    /// A pipeline run aborted.
    #[error("{0}")]
    Pipeline(#[from] PipelineAbort),

    /// A routing error.
    #[error("{0}")]
    Routing(#[from] RoutingError),

    /// A workflow error.
    #[error("{0}")]
    Workflow(#[from] WorkflowError),

    /// The persistence collaborator failed.
    #[error("Store error: {0}")]
    Store(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_retryability() {
        let timeout = ProviderError::Timeout {
            provider: "gpt".to_string(),
            elapsed_ms: 5000,
        };
        let auth = ProviderError::AuthFailure {
            provider: "gpt".to_string(),
        };
        let malformed = ProviderError::MalformedResponse {
            provider: "gpt".to_string(),
            reason: "no balanced object".to_string(),
        };
        let limited = ProviderError::RateLimited {
            provider: "gpt".to_string(),
        };

        assert!(timeout.is_retryable());
        assert!(limited.is_retryable());
        assert!(!auth.is_retryable());
        assert!(!malformed.is_retryable());
    }

    #[test]
    fn test_provider_error_provider_id() {
        let err = ProviderError::RateLimited {
            provider: "claude".to_string(),
        };
        assert_eq!(err.provider(), "claude");
    }

    #[test]
    fn test_cycle_detected_display_includes_path() {
        let err = RoutingError::CycleDetected {
            trigger_type: "culture.updated".to_string(),
            depth: 11,
            max_depth: 10,
            visited: vec!["culture".to_string(), "performance".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("culture -> performance"));
        assert!(msg.contains("max 10"));
    }

    #[test]
    fn test_stage_failure_reason_serializes_snake_case() {
        let json = serde_json::to_string(&StageFailureReason::AllProvidersFailed).unwrap();
        assert_eq!(json, "\"all_providers_failed\"");
    }

    #[test]
    fn test_pipeline_abort_roundtrip() {
        let abort = PipelineAbort::RequiredStageFailed {
            stage: "knowledge".to_string(),
            reason: StageFailureReason::AllProvidersFailed,
        };
        let json = serde_json::to_string(&abort).unwrap();
        let back: PipelineAbort = serde_json::from_str(&json).unwrap();
        assert_eq!(back, abort);
    }
}
