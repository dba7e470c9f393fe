//! Provider ensemble aggregation: strategies, stage results, and the
//! consensus engine that fans a stage's prompt out to its provider set.

mod engine;
mod merge;

pub use engine::{ConsensusEngine, StagePrompt};
pub use merge::{disagreement_score, strict_check, weighted_merge, Divergence};

use crate::core::Payload;
use crate::errors::StageFailureReason;
use crate::provider::ProviderResponse;
use crate::utils::{now_utc, Timestamp};
use serde::{Deserialize, Serialize};

/// How several providers' responses to one stage are reconciled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationStrategy {
    /// Numeric fields merged by confidence-weighted average, categorical
    /// fields by weighted majority vote, list fields by union.
    #[default]
    Weighted,
    /// The single highest-confidence response wins; the rest are recorded
    /// as dissent, not discarded.
    BestConfidence,
    /// All successful responses must agree on the designated key fields
    /// within tolerance; disagreement marks the stage disputed rather than
    /// guessing a winner.
    StrictConsensus,
}

/// The merged outcome of one stage's provider fan-out.
///
/// Every provider response is preserved, including failures; the consensus
/// payload is absent when the stage failed or was disputed. Reported
/// confidence is never higher than `1 - disagreement`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    /// The stage name.
    pub stage: String,
    /// All provider responses, successes and failures alike.
    pub responses: Vec<ProviderResponse>,
    /// The strategy that produced the consensus.
    pub strategy: AggregationStrategy,
    /// Merged consensus payload; `None` when failed or disputed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
    /// Consensus confidence in `[0, 1]`.
    pub confidence: f64,
    /// Normalized disagreement across successful responses in `[0, 1]`.
    pub disagreement: f64,
    /// Whether the stage produced no usable consensus at all.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub failed: bool,
    /// Whether strict consensus found irreconcilable answers, or lacked the
    /// corroboration it requires.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disputed: bool,
    /// Why the stage failed or was degraded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<StageFailureReason>,
    /// Provider ids recorded as dissent under `BestConfidence`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dissent: Vec<String>,
    /// Field-level divergence under `StrictConsensus`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub divergence: Vec<Divergence>,
    /// Wall-clock duration of the fan-out.
    pub duration_ms: f64,
    /// When the consensus was computed.
    pub completed_at: Timestamp,
}

impl StageResult {
    /// Creates a failed stage result, preserving the responses for
    /// diagnostics.
    #[must_use]
    pub fn failure(
        stage: impl Into<String>,
        responses: Vec<ProviderResponse>,
        strategy: AggregationStrategy,
        reason: StageFailureReason,
        duration_ms: f64,
    ) -> Self {
        Self {
            stage: stage.into(),
            responses,
            strategy,
            payload: None,
            confidence: 0.0,
            disagreement: 0.0,
            failed: true,
            disputed: false,
            failure_reason: Some(reason),
            dissent: Vec::new(),
            divergence: Vec::new(),
            duration_ms,
            completed_at: now_utc(),
        }
    }

    /// Returns the successful responses.
    #[must_use]
    pub fn successes(&self) -> Vec<&ProviderResponse> {
        self.responses.iter().filter(|r| r.succeeded()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_serde_names() {
        assert_eq!(
            serde_json::to_string(&AggregationStrategy::BestConfidence).unwrap(),
            "\"best_confidence\""
        );
        assert_eq!(
            serde_json::to_string(&AggregationStrategy::StrictConsensus).unwrap(),
            "\"strict_consensus\""
        );
    }

    #[test]
    fn test_failure_result_has_no_payload() {
        let result = StageResult::failure(
            "knowledge",
            Vec::new(),
            AggregationStrategy::Weighted,
            StageFailureReason::AllProvidersFailed,
            12.0,
        );
        assert!(result.failed);
        assert!(result.payload.is_none());
        assert!((result.confidence - 0.0).abs() < f64::EPSILON);
    }
}
