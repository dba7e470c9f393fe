//! The consensus engine: concurrent provider fan-out plus aggregation.

use super::{merge, AggregationStrategy, StageResult};
use crate::config::{ConsensusConfig, OrchestratorConfig, RetryPolicy, Timeouts};
use crate::core::Payload;
use crate::errors::StageFailureReason;
use crate::provider::{
    call_with_retry, GenerationParams, ProviderCallOptions, ProviderClient, ProviderOutcome,
    ProviderResponse,
};
use crate::utils::now_utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// The prompt pair a stage sends to every provider in its set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StagePrompt {
    /// System prompt.
    pub system: String,
    /// User prompt.
    pub user: String,
}

impl StagePrompt {
    /// Creates a stage prompt.
    #[must_use]
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }
}

/// Fans one stage's prompt out to a provider set concurrently and reconciles
/// the responses into a [`StageResult`].
///
/// Each provider call is bounded by the per-call timeout (with bounded retry
/// for transient failures); the whole fan-out is bounded by the per-stage
/// timeout, after which stragglers are abandoned and recorded as timeouts.
/// A global semaphore caps outbound concurrency across all runs.
pub struct ConsensusEngine {
    providers: HashMap<String, Arc<dyn ProviderClient>>,
    consensus: ConsensusConfig,
    timeouts: Timeouts,
    retry: RetryPolicy,
    semaphore: Arc<Semaphore>,
}

impl std::fmt::Debug for ConsensusEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusEngine")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

impl ConsensusEngine {
    /// Creates an engine from the orchestrator configuration.
    #[must_use]
    pub fn new(config: &OrchestratorConfig) -> Self {
        Self {
            providers: HashMap::new(),
            consensus: config.consensus.clone(),
            timeouts: config.timeouts,
            retry: config.retry,
            semaphore: Arc::new(Semaphore::new(config.max_outbound_concurrency.max(1))),
        }
    }

    /// Registers a provider client.
    #[must_use]
    pub fn with_provider(mut self, client: Arc<dyn ProviderClient>) -> Self {
        self.providers.insert(client.id().to_string(), client);
        self
    }

    /// Returns the configured provider ids.
    #[must_use]
    pub fn provider_ids(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    /// Issues one call per provider concurrently and aggregates the
    /// responses under the given strategy.
    pub async fn call(
        &self,
        stage: &str,
        prompt: &StagePrompt,
        provider_ids: &[String],
        params: GenerationParams,
        strategy: AggregationStrategy,
    ) -> StageResult {
        let started = Instant::now();
        let collected: Arc<Mutex<Vec<ProviderResponse>>> = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        let mut spawned_ids = Vec::new();

        let options = ProviderCallOptions {
            params,
            per_call_timeout: self.timeouts.per_call(),
            retry: self.retry,
            default_confidence: self.consensus.default_provider_confidence,
        };

        for provider_id in provider_ids {
            let Some(client) = self.providers.get(provider_id) else {
                // An id with no configured client counts as a failed
                // provider, distinct from a backend rejection.
                warn!(provider = %provider_id, stage, "provider not configured, recording failure");
                collected.lock().push(ProviderResponse {
                    provider_id: provider_id.clone(),
                    raw_text: String::new(),
                    latency_ms: 0.0,
                    outcome: ProviderOutcome::NotConfigured,
                    payload: None,
                    confidence: 0.0,
                    attempts: 0,
                });
                continue;
            };

            spawned_ids.push(provider_id.clone());
            let client = client.clone();
            let system = prompt.system.clone();
            let user = prompt.user.clone();
            let sink = collected.clone();
            let semaphore = self.semaphore.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let response = call_with_retry(client.as_ref(), &system, &user, &options).await;
                sink.lock().push(response);
            }));
        }

        let fan_out = futures::future::join_all(handles.iter_mut());
        if tokio::time::timeout(self.timeouts.per_stage(), fan_out)
            .await
            .is_err()
        {
            warn!(stage, "per-stage deadline hit, abandoning stragglers");
            for handle in &handles {
                handle.abort();
            }
            let done: Vec<String> = collected
                .lock()
                .iter()
                .map(|r| r.provider_id.clone())
                .collect();
            for provider_id in &spawned_ids {
                if !done.contains(provider_id) {
                    collected.lock().push(ProviderResponse {
                        provider_id: provider_id.clone(),
                        raw_text: String::new(),
                        latency_ms: self.timeouts.per_stage_ms as f64,
                        outcome: ProviderOutcome::Timeout,
                        payload: None,
                        confidence: 0.0,
                        attempts: 1,
                    });
                }
            }
        }

        // Stable order: as listed in the stage spec.
        let mut responses = std::mem::take(&mut *collected.lock());
        responses.sort_by_key(|r| {
            provider_ids
                .iter()
                .position(|id| *id == r.provider_id)
                .unwrap_or(usize::MAX)
        });

        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.aggregate(stage, responses, strategy, duration_ms)
    }

    /// Reconciles responses into a consensus according to the strategy.
    ///
    /// Quorum rule: one success is enough to aggregate, with confidence
    /// scaled by the success fraction; zero successes is a stage failure and
    /// never yields a fabricated payload.
    fn aggregate(
        &self,
        stage: &str,
        responses: Vec<ProviderResponse>,
        strategy: AggregationStrategy,
        duration_ms: f64,
    ) -> StageResult {
        let successes: Vec<&ProviderResponse> =
            responses.iter().filter(|r| r.succeeded()).collect();

        if successes.is_empty() {
            info!(stage, total = responses.len(), "stage failed: no successful providers");
            return StageResult::failure(
                stage,
                responses,
                strategy,
                StageFailureReason::AllProvidersFailed,
                duration_ms,
            );
        }

        let payloads: Vec<&Payload> = successes
            .iter()
            .filter_map(|r| r.payload.as_ref())
            .collect();
        let disagreement = merge::disagreement_score(&payloads);
        let success_fraction = successes.len() as f64 / responses.len().max(1) as f64;
        let agreement_confidence = (1.0 - disagreement) * success_fraction;

        let weight_of = |r: &ProviderResponse| -> f64 {
            r.confidence * self.consensus.trust_weight(&r.provider_id)
        };

        let mut payload = None;
        let mut confidence = agreement_confidence;
        let mut disputed = false;
        let mut failure_reason = None;
        let mut dissent = Vec::new();
        let mut divergence = Vec::new();

        match strategy {
            AggregationStrategy::Weighted => {
                let entries: Vec<(f64, &Payload)> = successes
                    .iter()
                    .filter_map(|r| r.payload.as_ref().map(|p| (weight_of(r), p)))
                    .collect();
                payload = Some(merge::weighted_merge(&entries));
            }
            AggregationStrategy::BestConfidence => {
                // Winner takes the payload; everyone else is recorded, not
                // discarded.
                if let Some(winner) = successes
                    .iter()
                    .max_by(|a, b| weight_of(a).total_cmp(&weight_of(b)))
                {
                    payload = winner.payload.clone();
                    confidence = winner
                        .confidence
                        .min(1.0 - disagreement)
                        * success_fraction;
                    dissent = successes
                        .iter()
                        .filter(|r| r.provider_id != winner.provider_id)
                        .map(|r| r.provider_id.clone())
                        .collect();
                }
            }
            AggregationStrategy::StrictConsensus => {
                let entries: Vec<(&str, &Payload)> = successes
                    .iter()
                    .filter_map(|r| r.payload.as_ref().map(|p| (r.provider_id.as_str(), p)))
                    .collect();
                divergence = merge::strict_check(
                    &entries,
                    &self.consensus.strict_key_fields,
                    self.consensus.numeric_tolerance,
                );

                if !divergence.is_empty() {
                    // Disagreement is returned explicitly, never guessed away.
                    disputed = true;
                    info!(stage, fields = divergence.len(), "strict consensus disputed");
                } else if successes.len() < 2 && responses.len() > 1 {
                    // A lone survivor cannot corroborate anything.
                    disputed = true;
                    failure_reason = Some(StageFailureReason::BelowQuorum);
                    info!(stage, "strict consensus below quorum");
                } else {
                    let weighted: Vec<(f64, &Payload)> = successes
                        .iter()
                        .filter_map(|r| r.payload.as_ref().map(|p| (weight_of(r), p)))
                        .collect();
                    payload = Some(merge::weighted_merge(&weighted));
                }
            }
        }

        // Disagreement always caps confidence, whatever the strategy said.
        confidence = confidence.min(1.0 - disagreement).clamp(0.0, 1.0);

        debug!(
            stage,
            successes = successes.len(),
            total = responses.len(),
            confidence,
            disagreement,
            "stage consensus computed"
        );

        StageResult {
            stage: stage.to_string(),
            responses,
            strategy,
            payload,
            confidence,
            disagreement,
            failed: false,
            disputed,
            failure_reason,
            dissent,
            divergence,
            duration_ms,
            completed_at: now_utc(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingProvider, JsonProvider, StaticProvider};
    use std::time::Duration;

    fn engine_with(providers: Vec<Arc<dyn ProviderClient>>) -> ConsensusEngine {
        let config = OrchestratorConfig::new()
            .with_per_call_timeout(Duration::from_millis(200))
            .with_per_stage_timeout(Duration::from_millis(500));
        let mut engine = ConsensusEngine::new(&config);
        for p in providers {
            engine = engine.with_provider(p);
        }
        engine
    }

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_provider_ids_lists_registered_clients() {
        let engine = engine_with(vec![
            Arc::new(FailingProvider::auth("gpt")),
            Arc::new(FailingProvider::auth("claude")),
        ]);
        let mut ids = engine.provider_ids();
        ids.sort();
        assert_eq!(ids, vec!["claude".to_string(), "gpt".to_string()]);
    }

    #[tokio::test]
    async fn test_weighted_consensus_merges_numeric_fields() {
        let engine = engine_with(vec![
            Arc::new(JsonProvider::new("a", serde_json::json!({"value": 10}), 0.5)),
            Arc::new(JsonProvider::new("b", serde_json::json!({"value": 12}), 0.3)),
            Arc::new(JsonProvider::new("c", serde_json::json!({"value": 11}), 0.2)),
        ]);

        let result = engine
            .call(
                "reasoning",
                &StagePrompt::new("sys", "user"),
                &ids(&["a", "b", "c"]),
                GenerationParams::default(),
                AggregationStrategy::Weighted,
            )
            .await;

        assert!(!result.failed);
        let merged = result
            .payload
            .as_ref()
            .and_then(|p| p.get("value"))
            .and_then(serde_json::Value::as_f64)
            .unwrap();
        assert!((merged - 10.8).abs() < 1e-9);
        // Low variance: confidence stays high.
        assert!(result.confidence > 0.8, "confidence was {}", result.confidence);
    }

    #[tokio::test]
    async fn test_confidence_never_exceeds_one_minus_disagreement() {
        let engine = engine_with(vec![
            Arc::new(JsonProvider::new("a", serde_json::json!({"score": 2.0}), 1.0)),
            Arc::new(JsonProvider::new("b", serde_json::json!({"score": 10.0}), 1.0)),
        ]);

        let result = engine
            .call(
                "data",
                &StagePrompt::new("sys", "user"),
                &ids(&["a", "b"]),
                GenerationParams::default(),
                AggregationStrategy::Weighted,
            )
            .await;

        assert!(result.confidence <= 1.0 - result.disagreement + 1e-9);
        assert!(result.disagreement > 0.5);
    }

    #[tokio::test]
    async fn test_best_confidence_records_dissent() {
        let engine = engine_with(vec![
            Arc::new(JsonProvider::new("a", serde_json::json!({"band": "meets"}), 0.9)),
            Arc::new(JsonProvider::new("b", serde_json::json!({"band": "exceeds"}), 0.4)),
        ]);

        let result = engine
            .call(
                "knowledge",
                &StagePrompt::new("sys", "user"),
                &ids(&["a", "b"]),
                GenerationParams::default(),
                AggregationStrategy::BestConfidence,
            )
            .await;

        assert_eq!(
            result.payload.as_ref().and_then(|p| p.get("band")),
            Some(&serde_json::json!("meets"))
        );
        assert_eq!(result.dissent, vec!["b".to_string()]);
        assert_eq!(result.responses.len(), 2);
    }

    #[tokio::test]
    async fn test_strict_consensus_disputed_on_divergence() {
        let engine = engine_with(vec![
            Arc::new(JsonProvider::new("a", serde_json::json!({"score": 10.0}), 0.9)),
            Arc::new(JsonProvider::new("b", serde_json::json!({"score": 50.0}), 0.9)),
        ]);

        let result = engine
            .call(
                "reasoning",
                &StagePrompt::new("sys", "user"),
                &ids(&["a", "b"]),
                GenerationParams::default(),
                AggregationStrategy::StrictConsensus,
            )
            .await;

        assert!(result.disputed);
        assert!(!result.failed);
        assert!(result.payload.is_none());
        assert_eq!(result.divergence.len(), 1);
        assert_eq!(result.divergence[0].field, "score");
    }

    #[tokio::test]
    async fn test_strict_consensus_single_survivor_is_degraded() {
        let engine = engine_with(vec![
            Arc::new(JsonProvider::new("a", serde_json::json!({"score": 10.0}), 0.9)),
            Arc::new(FailingProvider::auth("b")),
            Arc::new(FailingProvider::auth("c")),
        ]);

        let result = engine
            .call(
                "reasoning",
                &StagePrompt::new("sys", "user"),
                &ids(&["a", "b", "c"]),
                GenerationParams::default(),
                AggregationStrategy::StrictConsensus,
            )
            .await;

        assert!(result.disputed);
        assert_eq!(
            result.failure_reason,
            Some(StageFailureReason::BelowQuorum)
        );
        assert!(result.payload.is_none());
    }

    #[tokio::test]
    async fn test_all_providers_failed() {
        let engine = engine_with(vec![
            Arc::new(FailingProvider::auth("a")),
            Arc::new(FailingProvider::auth("b")),
        ]);

        let result = engine
            .call(
                "knowledge",
                &StagePrompt::new("sys", "user"),
                &ids(&["a", "b"]),
                GenerationParams::default(),
                AggregationStrategy::Weighted,
            )
            .await;

        assert!(result.failed);
        assert_eq!(
            result.failure_reason,
            Some(StageFailureReason::AllProvidersFailed)
        );
        assert!(result.payload.is_none());
        assert_eq!(result.responses.len(), 2);
    }

    #[tokio::test]
    async fn test_partial_failure_scales_confidence() {
        let full = engine_with(vec![
            Arc::new(JsonProvider::new("a", serde_json::json!({"score": 5}), 0.9)),
            Arc::new(JsonProvider::new("b", serde_json::json!({"score": 5}), 0.9)),
        ]);
        let partial = engine_with(vec![
            Arc::new(JsonProvider::new("a", serde_json::json!({"score": 5}), 0.9)),
            Arc::new(FailingProvider::auth("b")),
        ]);

        let prompt = StagePrompt::new("sys", "user");
        let all_ok = full
            .call("s", &prompt, &ids(&["a", "b"]), GenerationParams::default(), AggregationStrategy::Weighted)
            .await;
        let one_ok = partial
            .call("s", &prompt, &ids(&["a", "b"]), GenerationParams::default(), AggregationStrategy::Weighted)
            .await;

        assert!(one_ok.confidence < all_ok.confidence);
        assert!(!one_ok.failed);
    }

    #[tokio::test]
    async fn test_malformed_response_excluded_from_aggregation() {
        let engine = engine_with(vec![
            Arc::new(JsonProvider::new("a", serde_json::json!({"score": 7}), 0.9)),
            Arc::new(StaticProvider::new("b", "I have no structured answer.")),
        ]);

        let result = engine
            .call(
                "data",
                &StagePrompt::new("sys", "user"),
                &ids(&["a", "b"]),
                GenerationParams::default(),
                AggregationStrategy::Weighted,
            )
            .await;

        assert!(!result.failed);
        let merged = result
            .payload
            .as_ref()
            .and_then(|p| p.get("score"))
            .and_then(serde_json::Value::as_f64)
            .unwrap();
        assert!((merged - 7.0).abs() < 1e-9);
        assert_eq!(
            result
                .responses
                .iter()
                .find(|r| r.provider_id == "b")
                .unwrap()
                .outcome,
            ProviderOutcome::MalformedResponse
        );
    }

    #[tokio::test]
    async fn test_unknown_provider_counts_as_failed() {
        let engine = engine_with(vec![Arc::new(JsonProvider::new(
            "a",
            serde_json::json!({"score": 7}),
            0.8,
        ))]);

        let result = engine
            .call(
                "data",
                &StagePrompt::new("sys", "user"),
                &ids(&["a", "ghost"]),
                GenerationParams::default(),
                AggregationStrategy::Weighted,
            )
            .await;

        assert!(!result.failed);
        assert_eq!(result.responses.len(), 2);
        assert!(result.confidence < 0.75);
        assert_eq!(
            result
                .responses
                .iter()
                .find(|r| r.provider_id == "ghost")
                .unwrap()
                .outcome,
            ProviderOutcome::NotConfigured
        );
    }

    #[tokio::test]
    async fn test_straggler_abandoned_at_stage_deadline() {
        let engine = engine_with(vec![
            Arc::new(JsonProvider::new("fast", serde_json::json!({"score": 3}), 0.8)),
            Arc::new(
                StaticProvider::new("slow", r#"{"score": 4}"#)
                    .with_delay(Duration::from_secs(30)),
            ),
        ]);

        let result = engine
            .call(
                "data",
                &StagePrompt::new("sys", "user"),
                &ids(&["fast", "slow"]),
                GenerationParams::default(),
                AggregationStrategy::Weighted,
            )
            .await;

        assert!(!result.failed);
        let slow = result
            .responses
            .iter()
            .find(|r| r.provider_id == "slow")
            .unwrap();
        assert_eq!(slow.outcome, ProviderOutcome::Timeout);
    }
}
