//! Workflow steps and the sequential step runner.

use super::{ModuleContext, ModuleDescriptor};
use crate::core::{AnalysisRequest, OutputTrigger, Payload, TriggerEvent, WorkflowResult};
use crate::errors::WorkflowError;
use crate::pipeline::StageSpec;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Derives a pipeline run from the trigger and the data accumulated so far.
pub type DeriveFn =
    dyn Fn(&TriggerEvent, &Payload) -> (AnalysisRequest, Vec<StageSpec>) + Send + Sync;

/// A pure transformation over the accumulated data.
pub type ComputeFn = dyn Fn(&TriggerEvent, &Payload) -> Result<Payload, String> + Send + Sync;

/// Produces the triggers a step wants routed.
pub type EmitFn = dyn Fn(&TriggerEvent, &Payload) -> Vec<OutputTrigger> + Send + Sync;

/// One step of a workflow. Steps run strictly in order and the first failure
/// stops the run.
#[derive(Clone)]
pub enum WorkflowStep {
    /// Runs a reasoning pipeline and folds its output into the accumulator.
    Analyze {
        /// Step name.
        name: String,
        /// Builds the request and stage sequence.
        derive: Arc<DeriveFn>,
    },
    /// Applies a local computation to the accumulator.
    Compute {
        /// Step name.
        name: String,
        /// The computation.
        apply: Arc<ComputeFn>,
    },
    /// Emits triggers derived from the accumulator.
    Emit {
        /// Step name.
        name: String,
        /// The trigger producer.
        produce: Arc<EmitFn>,
    },
}

impl WorkflowStep {
    /// Creates an analysis step.
    pub fn analyze<F>(name: impl Into<String>, derive: F) -> Self
    where
        F: Fn(&TriggerEvent, &Payload) -> (AnalysisRequest, Vec<StageSpec>)
            + Send
            + Sync
            + 'static,
    {
        Self::Analyze {
            name: name.into(),
            derive: Arc::new(derive),
        }
    }

    /// Creates a computation step.
    pub fn compute<F>(name: impl Into<String>, apply: F) -> Self
    where
        F: Fn(&TriggerEvent, &Payload) -> Result<Payload, String> + Send + Sync + 'static,
    {
        Self::Compute {
            name: name.into(),
            apply: Arc::new(apply),
        }
    }

    /// Creates a trigger-emitting step.
    pub fn emit<F>(name: impl Into<String>, produce: F) -> Self
    where
        F: Fn(&TriggerEvent, &Payload) -> Vec<OutputTrigger> + Send + Sync + 'static,
    {
        Self::Emit {
            name: name.into(),
            produce: Arc::new(produce),
        }
    }

    /// Returns the step name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Analyze { name, .. } | Self::Compute { name, .. } | Self::Emit { name, .. } => {
                name
            }
        }
    }
}

impl Debug for WorkflowStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::Analyze { .. } => "Analyze",
            Self::Compute { .. } => "Compute",
            Self::Emit { .. } => "Emit",
        };
        f.debug_struct("WorkflowStep")
            .field("kind", &kind)
            .field("name", &self.name())
            .finish()
    }
}

/// A named sequence of steps a module runs in response to a trigger.
#[derive(Debug, Clone)]
pub struct Workflow {
    /// The workflow name, referenced by module descriptors.
    pub name: String,
    steps: Vec<WorkflowStep>,
}

impl Workflow {
    /// Creates an empty workflow.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Appends a step.
    #[must_use]
    pub fn step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Runs the steps in order, stopping at the first failure.
    ///
    /// Triggers emitted by completed steps are kept even when a later step
    /// fails; they are facts, not provisional output. Triggers whose type is
    /// not in the module's `emits` set are flagged, never dropped.
    pub async fn run(
        &self,
        descriptor: &ModuleDescriptor,
        event: &TriggerEvent,
        ctx: &ModuleContext,
    ) -> WorkflowResult {
        let started = Instant::now();
        let mut result = WorkflowResult::new(&self.name, &descriptor.module_id);
        let mut accumulated = Payload::new();
        let mut confidences = Vec::new();

        for step in &self.steps {
            match step {
                WorkflowStep::Analyze { name, derive } => {
                    let (request, specs) = derive(event, &accumulated);
                    let analysis = ctx.pipeline.run(&request, &specs).await;

                    if analysis.failed || analysis.cancelled {
                        let reason = analysis
                            .failure
                            .as_ref()
                            .map_or_else(|| "pipeline aborted".to_string(), ToString::to_string);
                        result.success = false;
                        result.error = Some(
                            WorkflowError::StepFailed {
                                workflow: self.name.clone(),
                                step: name.clone(),
                                reason,
                            }
                            .to_string(),
                        );
                        break;
                    }

                    confidences.push(analysis.confidence);
                    if let Some(output) = analysis.output {
                        accumulated.extend(output);
                    }
                    debug!(
                        workflow = %self.name,
                        step = %name,
                        confidence = analysis.confidence,
                        "analysis step completed"
                    );
                }
                WorkflowStep::Compute { name, apply } => match apply(event, &accumulated) {
                    Ok(update) => accumulated.extend(update),
                    Err(reason) => {
                        result.success = false;
                        result.error = Some(
                            WorkflowError::StepFailed {
                                workflow: self.name.clone(),
                                step: name.clone(),
                                reason,
                            }
                            .to_string(),
                        );
                        break;
                    }
                },
                WorkflowStep::Emit { name, produce } => {
                    for mut trigger in produce(event, &accumulated) {
                        if !descriptor.emits.contains(&trigger.trigger_type) {
                            warn!(
                                module = %descriptor.module_id,
                                workflow = %self.name,
                                step = %name,
                                trigger_type = %trigger.trigger_type,
                                "emitting undeclared trigger type"
                            );
                            trigger.undeclared = true;
                        }
                        result.triggers.push(trigger);
                    }
                }
            }

            result.completed_steps.push(step.name().to_string());
        }

        result.payload = accumulated;
        result.confidence = if confidences.is_empty() {
            1.0
        } else {
            confidences.iter().sum::<f64>() / confidences.len() as f64
        };
        result.duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        result
    }
}
