//! Result records handed back to callers and the persistence collaborator.

use super::{OutputTrigger, Payload};
use crate::consensus::StageResult;
use crate::errors::PipelineAbort;
use crate::utils::{now_utc, Timestamp};
use serde::{Deserialize, Serialize};

/// The outcome of one pipeline run: every stage's consensus in order, the
/// final structured output, and explicit failure/degraded markers.
///
/// Partial work is always preserved: an aborted or cancelled run still
/// carries the stage results computed before the abort.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// The request this result answers.
    pub request_id: String,
    /// Stage results in execution order.
    pub stages: Vec<StageResult>,
    /// The last successful stage's consensus payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Payload>,
    /// Combined confidence across stages.
    pub confidence: f64,
    /// Whether the run aborted before completing all required stages.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub failed: bool,
    /// Why the run aborted, when `failed` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<PipelineAbort>,
    /// Soft flag: the run completed but confidence fell below the configured
    /// threshold. The caller decides what to do (e.g. human review).
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub low_confidence: bool,
    /// Whether the run was cancelled mid-flight.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cancelled: bool,
    /// Wall-clock duration of the run.
    pub duration_ms: f64,
    /// When the result was assembled.
    pub completed_at: Timestamp,
}

impl AnalysisResult {
    /// Returns whether the caller should treat the result as degraded.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.failed || self.cancelled || self.low_confidence
    }

    /// Returns the stage result with the given name, if present.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.stage == name)
    }
}

/// The outcome of one workflow invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    /// The workflow that ran.
    pub workflow: String,
    /// The module that ran it.
    pub module_id: String,
    /// Names of steps that completed, in order.
    pub completed_steps: Vec<String>,
    /// Whether every step completed.
    pub success: bool,
    /// Data accumulated by the steps.
    #[serde(default)]
    pub payload: Payload,
    /// Triggers emitted by completed steps. These are facts already handed
    /// to the router, never retracted on later step failure.
    #[serde(default)]
    pub triggers: Vec<OutputTrigger>,
    /// Combined confidence of the pipeline runs the workflow performed;
    /// 1.0 when no pipeline ran.
    pub confidence: f64,
    /// Wall-clock duration of the invocation.
    pub duration_ms: f64,
    /// The step failure message, when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowResult {
    /// Creates an empty successful result scaffold.
    #[must_use]
    pub fn new(workflow: impl Into<String>, module_id: impl Into<String>) -> Self {
        Self {
            workflow: workflow.into(),
            module_id: module_id.into(),
            completed_steps: Vec::new(),
            success: true,
            payload: Payload::new(),
            triggers: Vec::new(),
            confidence: 1.0,
            duration_ms: 0.0,
            error: None,
        }
    }

    /// Creates a failed result with an error message.
    #[must_use]
    pub fn failure(
        workflow: impl Into<String>,
        module_id: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let mut result = Self::new(workflow, module_id);
        result.success = false;
        result.error = Some(error.into());
        result
    }
}

/// Builds a fresh empty analysis result for a request id.
pub(crate) fn empty_analysis_result(request_id: &str) -> AnalysisResult {
    AnalysisResult {
        request_id: request_id.to_string(),
        stages: Vec::new(),
        output: None,
        confidence: 0.0,
        failed: false,
        failure: None,
        low_confidence: false,
        cancelled: false,
        duration_ms: 0.0,
        completed_at: now_utc(),
    }
}
