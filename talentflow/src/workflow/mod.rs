//! Modules and the workflows they run in response to trigger events.

mod step;

pub use step::{ComputeFn, DeriveFn, EmitFn, Workflow, WorkflowStep};

use crate::core::{TriggerEvent, WorkflowResult};
use crate::errors::WorkflowError;
use crate::pipeline::PipelineController;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::warn;

/// A module's routing contract: what it accepts, what it emits, and which
/// workflow each accepted trigger type maps to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// Unique module id.
    pub module_id: String,
    /// Trigger types the module consumes.
    #[serde(default)]
    pub accepts: HashSet<String>,
    /// Trigger types the module declares it may emit.
    #[serde(default)]
    pub emits: HashSet<String>,
    /// Trigger type to workflow name.
    #[serde(default)]
    pub workflows: HashMap<String, String>,
}

impl ModuleDescriptor {
    /// Creates a descriptor for a module id.
    #[must_use]
    pub fn new(module_id: impl Into<String>) -> Self {
        Self {
            module_id: module_id.into(),
            ..Self::default()
        }
    }

    /// Declares an accepted trigger type mapped to a workflow.
    #[must_use]
    pub fn on_trigger(
        mut self,
        trigger_type: impl Into<String>,
        workflow: impl Into<String>,
    ) -> Self {
        let trigger_type = trigger_type.into();
        self.accepts.insert(trigger_type.clone());
        self.workflows.insert(trigger_type, workflow.into());
        self
    }

    /// Declares a trigger type the module may emit.
    #[must_use]
    pub fn emits(mut self, trigger_type: impl Into<String>) -> Self {
        self.emits.insert(trigger_type.into());
        self
    }

    /// Returns the workflow mapped to a trigger type, if the module accepts
    /// it.
    #[must_use]
    pub fn workflow_for(&self, trigger_type: &str) -> Option<&str> {
        self.workflows.get(trigger_type).map(String::as_str)
    }
}

/// Shared collaborators handed to every workflow invocation.
#[derive(Debug, Clone)]
pub struct ModuleContext {
    /// The pipeline controller workflows analyze through.
    pub pipeline: Arc<PipelineController>,
}

impl ModuleContext {
    /// Creates a context over a pipeline controller.
    #[must_use]
    pub fn new(pipeline: Arc<PipelineController>) -> Self {
        Self { pipeline }
    }
}

/// A registrable unit of HR domain logic.
///
/// The router only ever sees this trait; [`WorkflowModule`] is the stock
/// implementation built from declarative workflows.
#[async_trait]
pub trait Module: Send + Sync {
    /// Returns the module's routing contract.
    fn descriptor(&self) -> ModuleDescriptor;

    /// Runs the named workflow for an incoming event.
    async fn handle_workflow(
        &self,
        workflow: &str,
        event: &TriggerEvent,
        ctx: &ModuleContext,
    ) -> WorkflowResult;
}

/// A module assembled from a descriptor and a set of named workflows.
#[derive(Debug)]
pub struct WorkflowModule {
    descriptor: ModuleDescriptor,
    workflows: HashMap<String, Workflow>,
}

impl WorkflowModule {
    /// Creates a module with no workflows yet.
    #[must_use]
    pub fn new(descriptor: ModuleDescriptor) -> Self {
        Self {
            descriptor,
            workflows: HashMap::new(),
        }
    }

    /// Adds a workflow, keyed by its name.
    #[must_use]
    pub fn with_workflow(mut self, workflow: Workflow) -> Self {
        self.workflows.insert(workflow.name.clone(), workflow);
        self
    }
}

#[async_trait]
impl Module for WorkflowModule {
    fn descriptor(&self) -> ModuleDescriptor {
        self.descriptor.clone()
    }

    async fn handle_workflow(
        &self,
        workflow: &str,
        event: &TriggerEvent,
        ctx: &ModuleContext,
    ) -> WorkflowResult {
        let Some(found) = self.workflows.get(workflow) else {
            warn!(
                module = %self.descriptor.module_id,
                workflow,
                "trigger mapped to a workflow the module does not define"
            );
            return WorkflowResult::failure(
                workflow,
                &self.descriptor.module_id,
                WorkflowError::UnknownWorkflow {
                    module_id: self.descriptor.module_id.clone(),
                    workflow: workflow.to_string(),
                }
                .to_string(),
            );
        };
        found.run(&self.descriptor, event, ctx).await
    }
}
