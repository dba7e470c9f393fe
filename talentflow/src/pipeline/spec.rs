//! Stage specifications and prompt building.

use crate::consensus::{AggregationStrategy, StagePrompt};
use crate::core::{AnalysisRequest, Payload};
use crate::provider::GenerationParams;
use std::fmt::Debug;
use std::sync::Arc;

/// Builds a stage's prompt from the request and the consensus payloads of
/// prior stages.
///
/// Implementations must be pure: the same request and context always yield
/// the same prompt. The context map is keyed by prior stage name.
pub trait PromptBuilder: Send + Sync + Debug {
    /// Builds the prompt.
    fn build(&self, request: &AnalysisRequest, context: &Payload) -> StagePrompt;
}

/// A function-based prompt builder.
pub struct FnPromptBuilder<F>
where
    F: Fn(&AnalysisRequest, &Payload) -> StagePrompt + Send + Sync,
{
    func: F,
}

impl<F> FnPromptBuilder<F>
where
    F: Fn(&AnalysisRequest, &Payload) -> StagePrompt + Send + Sync,
{
    /// Creates a new function-based prompt builder.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> Debug for FnPromptBuilder<F>
where
    F: Fn(&AnalysisRequest, &Payload) -> StagePrompt + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnPromptBuilder").finish()
    }
}

impl<F> PromptBuilder for FnPromptBuilder<F>
where
    F: Fn(&AnalysisRequest, &Payload) -> StagePrompt + Send + Sync,
{
    fn build(&self, request: &AnalysisRequest, context: &Payload) -> StagePrompt {
        (self.func)(request, context)
    }
}

/// Specification for a single stage in a pipeline run.
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// The unique name of the stage.
    pub name: String,
    /// Provider ids to fan the prompt out to.
    pub providers: Vec<String>,
    /// Generation parameters applied to every provider in the set.
    pub params: GenerationParams,
    /// Builds the stage prompt from the request and prior consensus.
    pub prompt_builder: Arc<dyn PromptBuilder>,
    /// Whether a failure of this stage aborts the pipeline.
    pub required: bool,
    /// Strategy override; `None` uses the configured default.
    pub strategy: Option<AggregationStrategy>,
}

impl StageSpec {
    /// Creates a required stage specification.
    #[must_use]
    pub fn new(name: impl Into<String>, prompt_builder: Arc<dyn PromptBuilder>) -> Self {
        Self {
            name: name.into(),
            providers: Vec::new(),
            params: GenerationParams::default(),
            prompt_builder,
            required: true,
            strategy: None,
        }
    }

    /// Sets the provider set.
    #[must_use]
    pub fn with_providers(mut self, providers: Vec<String>) -> Self {
        self.providers = providers;
        self
    }

    /// Adds a provider id.
    #[must_use]
    pub fn with_provider(mut self, provider_id: impl Into<String>) -> Self {
        self.providers.push(provider_id.into());
        self
    }

    /// Sets the generation parameters.
    #[must_use]
    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    /// Marks the stage as optional: its failure does not abort the run.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Overrides the aggregation strategy for this stage.
    #[must_use]
    pub fn with_strategy(mut self, strategy: AggregationStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }
}
