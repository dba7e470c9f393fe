//! Configuration surface for the orchestration core.
//!
//! All knobs recognized by the core live here: provider trust weights,
//! consensus strategy and threshold, nested timeouts, retry policy, the
//! causal-depth cycle breaker, and the outbound concurrency cap.

use crate::consensus::AggregationStrategy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Retry policy for transient provider failures.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts per provider per stage call (first call included).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay for exponential backoff, in milliseconds.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    200
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

impl RetryPolicy {
    /// Gets the backoff base as a Duration.
    #[must_use]
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

/// The three nested deadlines: per provider call, per stage, per pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Timeouts {
    /// Hard deadline for a single provider call, in milliseconds.
    #[serde(default = "default_per_call_ms")]
    pub per_call_ms: u64,
    /// Deadline for one stage's whole provider fan-out, in milliseconds.
    #[serde(default = "default_per_stage_ms")]
    pub per_stage_ms: u64,
    /// Overall deadline for a pipeline run, in milliseconds.
    #[serde(default = "default_per_pipeline_ms")]
    pub per_pipeline_ms: u64,
}

fn default_per_call_ms() -> u64 {
    30_000
}

fn default_per_stage_ms() -> u64 {
    60_000
}

fn default_per_pipeline_ms() -> u64 {
    300_000
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            per_call_ms: default_per_call_ms(),
            per_stage_ms: default_per_stage_ms(),
            per_pipeline_ms: default_per_pipeline_ms(),
        }
    }
}

impl Timeouts {
    /// Gets the per-call deadline as a Duration.
    #[must_use]
    pub fn per_call(&self) -> Duration {
        Duration::from_millis(self.per_call_ms)
    }

    /// Gets the per-stage deadline as a Duration.
    #[must_use]
    pub fn per_stage(&self) -> Duration {
        Duration::from_millis(self.per_stage_ms)
    }

    /// Gets the per-pipeline deadline as a Duration.
    #[must_use]
    pub fn per_pipeline(&self) -> Duration {
        Duration::from_millis(self.per_pipeline_ms)
    }
}

/// Configuration for response aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Strategy used when a stage does not override it.
    #[serde(default)]
    pub default_strategy: AggregationStrategy,
    /// Overall confidence below this marks the result `low_confidence`.
    #[serde(default = "default_consensus_threshold")]
    pub consensus_threshold: f64,
    /// Key fields that must agree under strict consensus. Empty means all
    /// fields shared by every successful response.
    #[serde(default)]
    pub strict_key_fields: Vec<String>,
    /// Relative tolerance for numeric agreement under strict consensus.
    #[serde(default = "default_numeric_tolerance")]
    pub numeric_tolerance: f64,
    /// Confidence assigned to responses that do not self-report one.
    #[serde(default = "default_provider_confidence")]
    pub default_provider_confidence: f64,
    /// Trust weight per provider id; providers not listed weigh 1.0.
    #[serde(default)]
    pub trust_weights: HashMap<String, f64>,
}

fn default_consensus_threshold() -> f64 {
    0.6
}

fn default_numeric_tolerance() -> f64 {
    0.05
}

fn default_provider_confidence() -> f64 {
    0.5
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            default_strategy: AggregationStrategy::default(),
            consensus_threshold: default_consensus_threshold(),
            strict_key_fields: Vec::new(),
            numeric_tolerance: default_numeric_tolerance(),
            default_provider_confidence: default_provider_confidence(),
            trust_weights: HashMap::new(),
        }
    }
}

impl ConsensusConfig {
    /// Returns the trust weight for a provider id.
    #[must_use]
    pub fn trust_weight(&self, provider_id: &str) -> f64 {
        self.trust_weights.get(provider_id).copied().unwrap_or(1.0)
    }
}

/// Top-level configuration for the orchestration core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Aggregation configuration.
    #[serde(default)]
    pub consensus: ConsensusConfig,
    /// Nested deadlines.
    #[serde(default)]
    pub timeouts: Timeouts,
    /// Retry policy for transient provider failures.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Trigger chains beyond this causal depth are refused.
    #[serde(default = "default_max_causal_depth")]
    pub max_causal_depth: u32,
    /// Cap on concurrent outbound provider calls across all runs.
    #[serde(default = "default_max_outbound_concurrency")]
    pub max_outbound_concurrency: usize,
}

fn default_max_causal_depth() -> u32 {
    10
}

fn default_max_outbound_concurrency() -> usize {
    16
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            consensus: ConsensusConfig::default(),
            timeouts: Timeouts::default(),
            retry: RetryPolicy::default(),
            max_causal_depth: default_max_causal_depth(),
            max_outbound_concurrency: default_max_outbound_concurrency(),
        }
    }
}

impl OrchestratorConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default aggregation strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: AggregationStrategy) -> Self {
        self.consensus.default_strategy = strategy;
        self
    }

    /// Sets the consensus threshold.
    #[must_use]
    pub fn with_consensus_threshold(mut self, threshold: f64) -> Self {
        self.consensus.consensus_threshold = threshold;
        self
    }

    /// Sets a trust weight for a provider.
    #[must_use]
    pub fn with_trust_weight(mut self, provider_id: impl Into<String>, weight: f64) -> Self {
        self.consensus.trust_weights.insert(provider_id.into(), weight);
        self
    }

    /// Sets the maximum causal depth.
    #[must_use]
    pub fn with_max_causal_depth(mut self, depth: u32) -> Self {
        self.max_causal_depth = depth;
        self
    }

    /// Sets the per-call timeout.
    #[must_use]
    pub fn with_per_call_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.per_call_ms = timeout.as_millis() as u64;
        self
    }

    /// Sets the per-stage timeout.
    #[must_use]
    pub fn with_per_stage_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.per_stage_ms = timeout.as_millis() as u64;
        self
    }

    /// Sets the per-pipeline timeout.
    #[must_use]
    pub fn with_per_pipeline_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.per_pipeline_ms = timeout.as_millis() as u64;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}
