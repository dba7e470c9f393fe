//! The trigger router: delivers trigger events to registered modules and
//! drains the cascades their workflows emit.

use crate::core::{TriggerEvent, TriggerPriority, WorkflowResult};
use crate::errors::RoutingError;
use crate::utils::{now_utc, Timestamp};
use crate::workflow::{Module, ModuleContext};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// The registered module set.
///
/// Registration is append-only; modules are never unregistered at runtime,
/// so lookups hand out clones without coordination.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: DashMap<String, Arc<dyn Module>>,
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<String> = self.modules.iter().map(|e| e.key().clone()).collect();
        f.debug_struct("ModuleRegistry").field("modules", &ids).finish()
    }
}

impl ModuleRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a module under its descriptor's id.
    pub fn register(&self, module: Arc<dyn Module>) -> Result<(), RoutingError> {
        let module_id = module.descriptor().module_id;
        if self.modules.contains_key(&module_id) {
            return Err(RoutingError::DuplicateModule { module_id });
        }
        info!(module = %module_id, "module registered");
        self.modules.insert(module_id, module);
        Ok(())
    }

    /// Looks up a module by id.
    #[must_use]
    pub fn get(&self, module_id: &str) -> Option<Arc<dyn Module>> {
        self.modules.get(module_id).map(|entry| entry.value().clone())
    }

    /// Returns the modules accepting a trigger type, with the workflow each
    /// maps it to, ordered by module id.
    #[must_use]
    pub fn subscribers(&self, trigger_type: &str) -> Vec<(Arc<dyn Module>, String)> {
        let mut found: Vec<(String, Arc<dyn Module>, String)> = self
            .modules
            .iter()
            .filter_map(|entry| {
                let descriptor = entry.value().descriptor();
                descriptor.workflow_for(trigger_type).map(|workflow| {
                    (
                        descriptor.module_id.clone(),
                        entry.value().clone(),
                        workflow.to_string(),
                    )
                })
            })
            .collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        found
            .into_iter()
            .map(|(_, module, workflow)| (module, workflow))
            .collect()
    }
}

/// A trigger the router could not deliver, recorded rather than dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnresolvedTrigger {
    /// The event id.
    pub event_id: String,
    /// The trigger type.
    pub trigger_type: String,
    /// Why delivery failed.
    pub reason: RoutingError,
    /// When the router gave up.
    pub recorded_at: Timestamp,
}

/// What one routing drain produced.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RouteReport {
    /// Workflow results in processing order.
    pub results: Vec<WorkflowResult>,
    /// Triggers that could not be delivered.
    pub unresolved: Vec<UnresolvedTrigger>,
    /// How many events the drain processed.
    pub hops: u32,
    /// Set when the drain stopped early on a cycle.
    pub halted: bool,
}

struct QueuedTrigger {
    priority: TriggerPriority,
    seq: u64,
    event: TriggerEvent,
}

impl PartialEq for QueuedTrigger {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedTrigger {}

impl PartialOrd for QueuedTrigger {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTrigger {
    // Highest priority first; FIFO within a priority.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Routes trigger events to modules and drains the resulting cascades.
///
/// Each call to [`TriggerRouter::route`] owns its work queue: one external
/// stimulus and every trigger its handling emits, processed to exhaustion in
/// priority order. The causal-depth breaker bounds runaway module cycles.
pub struct TriggerRouter {
    registry: Arc<ModuleRegistry>,
    ctx: ModuleContext,
    max_causal_depth: u32,
}

impl std::fmt::Debug for TriggerRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerRouter")
            .field("registry", &self.registry)
            .field("max_causal_depth", &self.max_causal_depth)
            .finish_non_exhaustive()
    }
}

impl TriggerRouter {
    /// Creates a router over a registry.
    #[must_use]
    pub fn new(registry: Arc<ModuleRegistry>, ctx: ModuleContext, max_causal_depth: u32) -> Self {
        Self {
            registry,
            ctx,
            max_causal_depth,
        }
    }

    /// Delivers an event and every trigger its handling cascades into.
    pub async fn route(&self, event: TriggerEvent) -> RouteReport {
        let mut report = RouteReport::default();
        let mut queue: BinaryHeap<QueuedTrigger> = BinaryHeap::new();
        let mut seq = 0u64;

        info!(
            event_id = %event.id,
            trigger_type = %event.trigger_type,
            tenant = %event.tenant_id,
            "routing trigger"
        );

        queue.push(QueuedTrigger {
            priority: event.metadata.priority,
            seq,
            event,
        });

        while let Some(QueuedTrigger { event, .. }) = queue.pop() {
            report.hops += 1;

            if event.metadata.causal_depth > self.max_causal_depth {
                // A chain this deep is assumed cyclic; the whole drain stops
                // so the cycle cannot keep feeding the queue.
                let reason = RoutingError::CycleDetected {
                    trigger_type: event.trigger_type.clone(),
                    depth: event.metadata.causal_depth,
                    max_depth: self.max_causal_depth,
                    visited: event.metadata.visited.clone(),
                };
                error!(event_id = %event.id, %reason, "trigger chain halted");
                report.unresolved.push(unresolved(&event, reason));
                report.halted = true;
                break;
            }

            let deliveries = match self.resolve(&event) {
                Ok(deliveries) => deliveries,
                Err(reason) => {
                    warn!(event_id = %event.id, %reason, "trigger unresolved");
                    report.unresolved.push(unresolved(&event, reason));
                    continue;
                }
            };

            for (module, workflow) in deliveries {
                let module_id = module.descriptor().module_id;
                debug!(
                    event_id = %event.id,
                    module = %module_id,
                    workflow = %workflow,
                    "delivering trigger"
                );
                let result = module.handle_workflow(&workflow, &event, &self.ctx).await;

                for output in &result.triggers {
                    seq += 1;
                    let child = event.spawn_from(output, &module_id);
                    queue.push(QueuedTrigger {
                        priority: child.metadata.priority,
                        seq,
                        event: child,
                    });
                }
                report.results.push(result);
            }
        }

        info!(
            hops = report.hops,
            results = report.results.len(),
            unresolved = report.unresolved.len(),
            halted = report.halted,
            "routing drain finished"
        );
        report
    }

    /// Resolves an event to the modules and workflows that should handle it.
    fn resolve(
        &self,
        event: &TriggerEvent,
    ) -> Result<Vec<(Arc<dyn Module>, String)>, RoutingError> {
        match &event.target {
            crate::core::TriggerTarget::Module(module_id) => {
                let Some(module) = self.registry.get(module_id) else {
                    return Err(RoutingError::UnregisteredTarget {
                        trigger_type: event.trigger_type.clone(),
                        target: module_id.clone(),
                    });
                };
                let Some(workflow) = module.descriptor().workflow_for(&event.trigger_type).map(str::to_string)
                else {
                    return Err(RoutingError::NotAccepted {
                        trigger_type: event.trigger_type.clone(),
                        module_id: module_id.clone(),
                    });
                };
                Ok(vec![(module, workflow)])
            }
            crate::core::TriggerTarget::Broadcast => {
                let subscribers = self.registry.subscribers(&event.trigger_type);
                if subscribers.is_empty() {
                    return Err(RoutingError::NoSubscribers {
                        trigger_type: event.trigger_type.clone(),
                    });
                }
                Ok(subscribers)
            }
        }
    }
}

fn unresolved(event: &TriggerEvent, reason: RoutingError) -> UnresolvedTrigger {
    UnresolvedTrigger {
        event_id: event.id.clone(),
        trigger_type: event.trigger_type.clone(),
        reason,
        recorded_at: now_utc(),
    }
}
