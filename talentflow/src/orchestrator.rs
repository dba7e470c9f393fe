//! The composition root: wires providers, modules, the pipeline, the router,
//! and the result store into one entry point.

use crate::cancellation::CancellationToken;
use crate::config::OrchestratorConfig;
use crate::consensus::ConsensusEngine;
use crate::core::{AnalysisRequest, AnalysisResult, TriggerEvent};
use crate::errors::RoutingError;
use crate::pipeline::{PipelineController, StageSpec};
use crate::provider::ProviderClient;
use crate::router::{ModuleRegistry, RouteReport, TriggerRouter};
use crate::store::{NoOpStore, ResultStore};
use crate::workflow::{Module, ModuleContext};
use std::sync::Arc;
use tracing::{info, warn};

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    providers: Vec<Arc<dyn ProviderClient>>,
    modules: Vec<Arc<dyn Module>>,
    store: Arc<dyn ResultStore>,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self {
            config: OrchestratorConfig::default(),
            providers: Vec::new(),
            modules: Vec::new(),
            store: Arc::new(NoOpStore),
        }
    }
}

impl OrchestratorBuilder {
    /// Sets the configuration.
    #[must_use]
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Adds a provider client.
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn ProviderClient>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Adds a module to register at build time.
    #[must_use]
    pub fn with_module(mut self, module: Arc<dyn Module>) -> Self {
        self.modules.push(module);
        self
    }

    /// Sets the result store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ResultStore>) -> Self {
        self.store = store;
        self
    }

    /// Wires everything together.
    ///
    /// Fails when two modules share an id.
    pub fn build(self) -> Result<Orchestrator, RoutingError> {
        let mut engine = ConsensusEngine::new(&self.config);
        for provider in self.providers {
            engine = engine.with_provider(provider);
        }
        let engine = Arc::new(engine);
        info!(providers = ?engine.provider_ids(), "consensus engine configured");
        let controller = Arc::new(PipelineController::new(engine.clone(), &self.config));

        let registry = Arc::new(ModuleRegistry::new());
        for module in self.modules {
            registry.register(module)?;
        }

        let router = TriggerRouter::new(
            registry.clone(),
            ModuleContext::new(controller.clone()),
            self.config.max_causal_depth,
        );

        Ok(Orchestrator {
            controller,
            registry,
            router,
            store: self.store,
        })
    }
}

/// The orchestration core's public entry point.
pub struct Orchestrator {
    controller: Arc<PipelineController>,
    registry: Arc<ModuleRegistry>,
    router: TriggerRouter,
    store: Arc<dyn ResultStore>,
}

impl Orchestrator {
    /// Starts a builder.
    #[must_use]
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    /// Registers a module after construction.
    pub fn register_module(&self, module: Arc<dyn Module>) -> Result<(), RoutingError> {
        self.registry.register(module)
    }

    /// Returns the pipeline controller for direct use.
    #[must_use]
    pub fn pipeline(&self) -> Arc<PipelineController> {
        self.controller.clone()
    }

    /// Runs an analysis pipeline and persists the result.
    pub async fn submit_analysis(
        &self,
        request: &AnalysisRequest,
        specs: &[StageSpec],
    ) -> AnalysisResult {
        self.submit_analysis_with_token(request, specs, &CancellationToken::new())
            .await
    }

    /// Runs an analysis pipeline with cooperative cancellation.
    pub async fn submit_analysis_with_token(
        &self,
        request: &AnalysisRequest,
        specs: &[StageSpec],
        token: &CancellationToken,
    ) -> AnalysisResult {
        let result = self.controller.run_with_token(request, specs, token).await;
        let key = format!("analysis:{}:{}", request.tenant_id, request.id);
        self.persist(&key, &result).await;
        result
    }

    /// Routes a trigger event through the module graph and persists the
    /// drain report.
    pub async fn submit_trigger(&self, event: TriggerEvent) -> RouteReport {
        let key = format!("route:{}:{}", event.tenant_id, event.id);
        let report = self.router.route(event).await;
        self.persist(&key, &report).await;
        report
    }

    // Persistence is best effort: the result is already computed and the
    // caller gets it back whatever the store says.
    async fn persist<T: serde::Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(json) => {
                if let Err(err) = self.store.save(key, &json).await {
                    warn!(key, error = %err, "result store rejected record");
                }
            }
            Err(err) => warn!(key, error = %err, "result not serializable"),
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::StagePrompt;
    use crate::core::{OutputTrigger, Payload};
    use crate::pipeline::FnPromptBuilder;
    use crate::store::MemoryStore;
    use crate::testing::JsonProvider;
    use crate::workflow::{ModuleDescriptor, Workflow, WorkflowModule, WorkflowStep};
    use std::time::Duration;

    fn specs() -> Vec<StageSpec> {
        vec![StageSpec::new(
            "reasoning",
            Arc::new(FnPromptBuilder::new(
                |_: &AnalysisRequest, _: &Payload| StagePrompt::new("sys", "user"),
            )),
        )
        .with_provider("model-a")]
    }

    fn orchestrator(store: Arc<dyn ResultStore>) -> Orchestrator {
        Orchestrator::builder()
            .with_config(
                OrchestratorConfig::new()
                    .with_per_call_timeout(Duration::from_millis(200))
                    .with_per_stage_timeout(Duration::from_millis(500)),
            )
            .with_provider(Arc::new(JsonProvider::new(
                "model-a",
                serde_json::json!({"score": 7}),
                0.9,
            )))
            .with_store(store)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_submit_analysis_persists_result() {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(store.clone());

        let request = AnalysisRequest::new("acme", "emp-1");
        let result = orchestrator.submit_analysis(&request, &specs()).await;

        assert!(!result.failed);
        let saved = store
            .load(&format!("analysis:acme:{}", request.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saved["request_id"], request.id.as_str());
    }

    #[tokio::test]
    async fn test_submit_trigger_runs_modules_and_persists_report() {
        let store = Arc::new(MemoryStore::new());
        let module = WorkflowModule::new(
            ModuleDescriptor::new("recognition")
                .on_trigger("performance.review_completed", "celebrate")
                .emits("recognition.sent"),
        )
        .with_workflow(
            Workflow::new("celebrate").step(WorkflowStep::emit("send", |_, _| {
                vec![OutputTrigger::broadcast("recognition.sent")]
            })),
        );

        let orchestrator = Orchestrator::builder()
            .with_store(store.clone())
            .with_module(Arc::new(module))
            .build()
            .unwrap();

        let event = TriggerEvent::new("performance.review_completed", "acme", "emp-1");
        let event_id = event.id.clone();
        let report = orchestrator.submit_trigger(event).await;

        assert_eq!(report.results.len(), 1);
        // The emitted trigger found no subscriber and was recorded.
        assert_eq!(report.unresolved.len(), 1);
        assert!(store
            .load(&format!("route:acme:{event_id}"))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_duplicate_module_rejected_at_build() {
        let module_a: Arc<dyn Module> =
            Arc::new(WorkflowModule::new(ModuleDescriptor::new("learning")));
        let module_b: Arc<dyn Module> =
            Arc::new(WorkflowModule::new(ModuleDescriptor::new("learning")));

        let err = Orchestrator::builder()
            .with_module(module_a)
            .with_module(module_b)
            .build()
            .unwrap_err();

        assert_eq!(
            err,
            RoutingError::DuplicateModule {
                module_id: "learning".to_string()
            }
        );
    }
}
