//! The stage pipeline controller: strict sequencing with context
//! accumulation, abort-on-required-failure, deadlines, and cancellation.

use super::StageSpec;
use crate::cancellation::CancellationToken;
use crate::config::OrchestratorConfig;
use crate::consensus::{AggregationStrategy, ConsensusEngine};
use crate::core::{empty_analysis_result, AnalysisRequest, AnalysisResult, Payload};
use crate::errors::{PipelineAbort, StageFailureReason};
use crate::utils::now_utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Runs stages strictly in order, feeding each stage's consensus payload to
/// the next stage's prompt builder.
///
/// The controller never discards diagnostic history: an aborted or cancelled
/// run returns every [`crate::consensus::StageResult`] computed so far.
#[derive(Debug)]
pub struct PipelineController {
    engine: Arc<ConsensusEngine>,
    default_strategy: AggregationStrategy,
    consensus_threshold: f64,
    per_pipeline: Duration,
}

impl PipelineController {
    /// Creates a controller over an engine.
    #[must_use]
    pub fn new(engine: Arc<ConsensusEngine>, config: &OrchestratorConfig) -> Self {
        Self {
            engine,
            default_strategy: config.consensus.default_strategy,
            consensus_threshold: config.consensus.consensus_threshold,
            per_pipeline: config.timeouts.per_pipeline(),
        }
    }

    /// Runs the pipeline to completion or abort.
    pub async fn run(&self, request: &AnalysisRequest, specs: &[StageSpec]) -> AnalysisResult {
        self.run_with_token(request, specs, &CancellationToken::new())
            .await
    }

    /// Runs the pipeline with cooperative cancellation.
    ///
    /// Cancellation is checked between stages and raced against the in-flight
    /// stage call; on cancellation the partial result is returned with
    /// `cancelled=true` and the in-flight stage's work is abandoned.
    pub async fn run_with_token(
        &self,
        request: &AnalysisRequest,
        specs: &[StageSpec],
        token: &CancellationToken,
    ) -> AnalysisResult {
        let started = Instant::now();
        let deadline = started + self.per_pipeline;
        let mut result = empty_analysis_result(&request.id);
        let mut context = Payload::new();

        info!(
            request_id = %request.id,
            tenant = %request.tenant_id,
            stages = specs.len(),
            "pipeline run started"
        );

        for spec in specs {
            if token.is_cancelled() {
                let reason = token.reason().unwrap_or_else(|| "cancelled".to_string());
                info!(request_id = %request.id, stage = %spec.name, %reason, "pipeline cancelled");
                result.cancelled = true;
                result.failure = Some(PipelineAbort::Cancelled { reason });
                break;
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(request_id = %request.id, stage = %spec.name, "pipeline deadline exceeded");
                result.failed = true;
                result.failure = Some(PipelineAbort::Cancelled {
                    reason: "pipeline deadline exceeded".to_string(),
                });
                break;
            }

            // Stage N's prompt is built strictly from the request plus the
            // consensus of stages 0..N-1.
            let prompt = spec.prompt_builder.build(request, &context);
            let strategy = spec.strategy.unwrap_or(self.default_strategy);

            let stage_result = tokio::select! {
                stage_result = self.engine.call(
                    &spec.name,
                    &prompt,
                    &spec.providers,
                    spec.params,
                    strategy,
                ) => stage_result,
                () = token.cancelled() => {
                    let reason = token.reason().unwrap_or_else(|| "cancelled".to_string());
                    info!(request_id = %request.id, stage = %spec.name, %reason, "pipeline cancelled mid-stage");
                    result.cancelled = true;
                    result.failure = Some(PipelineAbort::Cancelled { reason });
                    break;
                }
            };

            if stage_result.failed {
                let reason = stage_result
                    .failure_reason
                    .unwrap_or(StageFailureReason::AllProvidersFailed);
                result.stages.push(stage_result);

                if spec.required {
                    warn!(request_id = %request.id, stage = %spec.name, %reason, "required stage failed, aborting");
                    result.failed = true;
                    result.failure = Some(PipelineAbort::RequiredStageFailed {
                        stage: spec.name.clone(),
                        reason,
                    });
                    break;
                }

                debug!(request_id = %request.id, stage = %spec.name, "optional stage failed, continuing");
                continue;
            }

            if let Some(payload) = &stage_result.payload {
                context.insert(
                    spec.name.clone(),
                    serde_json::Value::Object(payload.clone()),
                );
            }
            result.stages.push(stage_result);
        }

        self.finalize(result, started)
    }

    fn finalize(&self, mut result: AnalysisResult, started: Instant) -> AnalysisResult {
        let usable: Vec<&crate::consensus::StageResult> =
            result.stages.iter().filter(|s| !s.failed).collect();

        result.confidence = if usable.is_empty() {
            0.0
        } else {
            usable.iter().map(|s| s.confidence).sum::<f64>() / usable.len() as f64
        };

        result.output = result
            .stages
            .iter()
            .rev()
            .find_map(|s| s.payload.clone());

        result.low_confidence = !result.failed
            && !result.cancelled
            && !result.stages.is_empty()
            && result.confidence < self.consensus_threshold;

        result.duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        result.completed_at = now_utc();

        info!(
            request_id = %result.request_id,
            failed = result.failed,
            cancelled = result.cancelled,
            low_confidence = result.low_confidence,
            confidence = result.confidence,
            "pipeline run finished"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{FnPromptBuilder, PromptBuilder, StageSpec};
    use crate::consensus::StagePrompt;
    use crate::provider::ProviderClient;
    use crate::testing::{FailingProvider, JsonProvider, StaticProvider};
    use crate::utils::Timestamp;
    use parking_lot::Mutex;

    fn simple_builder() -> Arc<dyn PromptBuilder> {
        Arc::new(FnPromptBuilder::new(|_: &AnalysisRequest, _: &Payload| {
            StagePrompt::new("system", "user")
        }))
    }

    fn controller_with(
        providers: Vec<Arc<dyn ProviderClient>>,
        config: &OrchestratorConfig,
    ) -> PipelineController {
        let mut engine = ConsensusEngine::new(config);
        for p in providers {
            engine = engine.with_provider(p);
        }
        PipelineController::new(Arc::new(engine), config)
    }

    fn fast_config() -> OrchestratorConfig {
        OrchestratorConfig::new()
            .with_per_call_timeout(Duration::from_millis(200))
            .with_per_stage_timeout(Duration::from_millis(500))
            .with_per_pipeline_timeout(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_stages_run_in_order_with_context_accumulation() {
        let seen: Arc<Mutex<Vec<Vec<String>>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let recording_builder: Arc<dyn PromptBuilder> =
            Arc::new(FnPromptBuilder::new(move |_: &AnalysisRequest, ctx: &Payload| {
                seen_clone.lock().push(ctx.keys().cloned().collect());
                StagePrompt::new("system", "user")
            }));

        let controller = controller_with(
            vec![Arc::new(JsonProvider::new("a", serde_json::json!({"v": 1}), 0.9))],
            &fast_config(),
        );

        let specs = vec![
            StageSpec::new("knowledge", recording_builder.clone()).with_provider("a"),
            StageSpec::new("data", recording_builder.clone()).with_provider("a"),
            StageSpec::new("reasoning", recording_builder).with_provider("a"),
        ];

        let request = AnalysisRequest::new("acme", "emp-1");
        let result = controller.run(&request, &specs).await;

        assert!(!result.failed);
        assert_eq!(result.stages.len(), 3);

        let contexts = seen.lock();
        assert_eq!(contexts[0], Vec::<String>::new());
        assert_eq!(contexts[1], vec!["knowledge".to_string()]);
        assert_eq!(
            contexts[2],
            vec!["data".to_string(), "knowledge".to_string()]
        );
    }

    #[tokio::test]
    async fn test_stage_consensus_precedes_next_prompt_build() {
        let build_times: Arc<Mutex<Vec<Timestamp>>> = Arc::new(Mutex::new(Vec::new()));
        let times_clone = build_times.clone();

        let timed_builder: Arc<dyn PromptBuilder> =
            Arc::new(FnPromptBuilder::new(move |_: &AnalysisRequest, _: &Payload| {
                times_clone.lock().push(crate::utils::now_utc());
                StagePrompt::new("system", "user")
            }));

        let controller = controller_with(
            vec![Arc::new(JsonProvider::new("a", serde_json::json!({"v": 1}), 0.9))],
            &fast_config(),
        );
        let specs = vec![
            StageSpec::new("knowledge", timed_builder.clone()).with_provider("a"),
            StageSpec::new("data", timed_builder).with_provider("a"),
        ];

        let request = AnalysisRequest::new("acme", "emp-1");
        let result = controller.run(&request, &specs).await;

        let times = build_times.lock();
        assert_eq!(times.len(), 2);
        // Stage 0's consensus is computed before stage 1's prompt is built.
        assert!(result.stages[0].completed_at <= times[1]);
    }

    #[tokio::test]
    async fn test_required_stage_failure_aborts_preserving_history() {
        let controller = controller_with(
            vec![
                Arc::new(JsonProvider::new("good", serde_json::json!({"v": 1}), 0.9)),
                Arc::new(
                    StaticProvider::new("dead", r#"{"v": 2}"#)
                        .with_delay(Duration::from_secs(30)),
                ),
            ],
            &fast_config(),
        );

        let specs = vec![
            StageSpec::new("knowledge", simple_builder()).with_provider("good"),
            StageSpec::new("data", simple_builder()).with_provider("dead"),
            StageSpec::new("reasoning", simple_builder()).with_provider("good"),
        ];

        let request = AnalysisRequest::new("acme", "emp-1");
        let result = controller.run(&request, &specs).await;

        assert!(result.failed);
        assert_eq!(
            result.failure,
            Some(PipelineAbort::RequiredStageFailed {
                stage: "data".to_string(),
                reason: StageFailureReason::AllProvidersFailed,
            })
        );
        // Stage 1 is preserved with its consensus; stage 2 never ran.
        assert_eq!(result.stages.len(), 2);
        assert!(result.stage("knowledge").unwrap().payload.is_some());
        assert!(result.stage("data").unwrap().failed);
        assert!(result.stage("reasoning").is_none());
    }

    #[tokio::test]
    async fn test_optional_stage_failure_continues() {
        let controller = controller_with(
            vec![
                Arc::new(JsonProvider::new("good", serde_json::json!({"v": 1}), 0.9)),
                Arc::new(FailingProvider::auth("bad")),
            ],
            &fast_config(),
        );

        let specs = vec![
            StageSpec::new("knowledge", simple_builder()).with_provider("good"),
            StageSpec::new("enrichment", simple_builder())
                .with_provider("bad")
                .optional(),
            StageSpec::new("reasoning", simple_builder()).with_provider("good"),
        ];

        let request = AnalysisRequest::new("acme", "emp-1");
        let result = controller.run(&request, &specs).await;

        assert!(!result.failed);
        assert_eq!(result.stages.len(), 3);
        assert!(result.stage("enrichment").unwrap().failed);
        assert!(result.output.is_some());
    }

    #[tokio::test]
    async fn test_low_confidence_flag_is_soft() {
        let controller = controller_with(
            vec![
                Arc::new(JsonProvider::new("a", serde_json::json!({"score": 2.0}), 1.0)),
                Arc::new(JsonProvider::new("b", serde_json::json!({"score": 10.0}), 1.0)),
            ],
            &fast_config().with_consensus_threshold(0.9),
        );

        let specs = vec![StageSpec::new("reasoning", simple_builder())
            .with_providers(vec!["a".to_string(), "b".to_string()])];

        let request = AnalysisRequest::new("acme", "emp-1");
        let result = controller.run(&request, &specs).await;

        assert!(!result.failed);
        assert!(result.low_confidence);
        assert!(result.output.is_some());
    }

    #[tokio::test]
    async fn test_pre_cancelled_run_returns_immediately() {
        let controller = controller_with(
            vec![Arc::new(JsonProvider::new("a", serde_json::json!({"v": 1}), 0.9))],
            &fast_config(),
        );
        let specs = vec![StageSpec::new("knowledge", simple_builder()).with_provider("a")];

        let token = CancellationToken::new();
        token.cancel("caller went away");

        let request = AnalysisRequest::new("acme", "emp-1");
        let result = controller.run_with_token(&request, &specs, &token).await;

        assert!(result.cancelled);
        assert!(result.stages.is_empty());
        assert!(matches!(
            result.failure,
            Some(PipelineAbort::Cancelled { .. })
        ));
    }

    #[tokio::test]
    async fn test_mid_run_cancellation_preserves_completed_stages() {
        let controller = controller_with(
            vec![
                Arc::new(JsonProvider::new("fast", serde_json::json!({"v": 1}), 0.9)),
                Arc::new(
                    StaticProvider::new("slow", r#"{"v": 2}"#)
                        .with_delay(Duration::from_secs(30)),
                ),
            ],
            &fast_config().with_per_stage_timeout(Duration::from_secs(30)),
        );

        let specs = vec![
            StageSpec::new("knowledge", simple_builder()).with_provider("fast"),
            StageSpec::new("data", simple_builder()).with_provider("slow"),
        ];

        let token = Arc::new(CancellationToken::new());
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel("user abort");
        });

        let request = AnalysisRequest::new("acme", "emp-1");
        let result = controller.run_with_token(&request, &specs, &token).await;

        assert!(result.cancelled);
        assert_eq!(result.stages.len(), 1);
        assert!(result.stage("knowledge").unwrap().payload.is_some());
    }

    #[tokio::test]
    async fn test_pipeline_deadline_aborts() {
        let controller = controller_with(
            vec![Arc::new(
                StaticProvider::new("slow", r#"{"v": 1}"#).with_delay(Duration::from_millis(50)),
            )],
            &fast_config().with_per_pipeline_timeout(Duration::from_millis(1)),
        );

        let specs = vec![
            StageSpec::new("knowledge", simple_builder()).with_provider("slow"),
            StageSpec::new("data", simple_builder()).with_provider("slow"),
        ];

        let request = AnalysisRequest::new("acme", "emp-1");
        let result = controller.run(&request, &specs).await;

        // The run either aborts before stage one or between stages; in both
        // cases the failure carries the deadline reason.
        assert!(result.failed);
        assert_eq!(
            result.failure,
            Some(PipelineAbort::Cancelled {
                reason: "pipeline deadline exceeded".to_string(),
            })
        );
    }
}
