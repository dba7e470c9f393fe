//! Typed trigger events and the output triggers that become them.

use super::Payload;
use crate::utils::{generate_uuid, now_utc, Timestamp};
use serde::{Deserialize, Serialize};

/// Processing priority for a trigger event.
///
/// Governs ordering under contention; it is not a strict FIFO guarantee.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TriggerPriority {
    /// Background work.
    Low,
    /// Normal priority.
    #[default]
    Medium,
    /// Time-sensitive work.
    High,
    /// Serviced before everything else.
    Critical,
}

/// Delivery target of an output trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "module", rename_all = "snake_case")]
pub enum TriggerTarget {
    /// Deliver to every module that accepts the trigger type.
    #[default]
    Broadcast,
    /// Deliver only to the named module.
    Module(String),
}

/// Propagation metadata carried by every trigger event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerMetadata {
    /// The module that emitted the event, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_module: Option<String>,
    /// When the event was created.
    pub timestamp: Timestamp,
    /// Processing priority.
    #[serde(default)]
    pub priority: TriggerPriority,
    /// Router hop count; strictly +1 per hop, bounds trigger chains.
    #[serde(default)]
    pub causal_depth: u32,
    /// Modules the causal chain has passed through, for diagnostics.
    #[serde(default)]
    pub visited: Vec<String>,
}

impl Default for TriggerMetadata {
    fn default() -> Self {
        Self {
            source_module: None,
            timestamp: now_utc(),
            priority: TriggerPriority::default(),
            causal_depth: 0,
            visited: Vec::new(),
        }
    }
}

/// A typed event that causes registered modules to execute workflows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// Unique event id.
    pub id: String,
    /// The trigger type tag, e.g. `"performance.review_completed"`.
    pub trigger_type: String,
    /// The tenant the event belongs to.
    pub tenant_id: String,
    /// The subject the event concerns.
    pub subject_id: String,
    /// Event payload.
    #[serde(default)]
    pub payload: Payload,
    /// Delivery target; external stimuli broadcast by default.
    #[serde(default)]
    pub target: TriggerTarget,
    /// Propagation metadata.
    #[serde(default)]
    pub metadata: TriggerMetadata,
}

impl TriggerEvent {
    /// Creates a new externally-sourced trigger event.
    #[must_use]
    pub fn new(
        trigger_type: impl Into<String>,
        tenant_id: impl Into<String>,
        subject_id: impl Into<String>,
    ) -> Self {
        Self {
            id: generate_uuid(),
            trigger_type: trigger_type.into(),
            tenant_id: tenant_id.into(),
            subject_id: subject_id.into(),
            payload: Payload::new(),
            target: TriggerTarget::Broadcast,
            metadata: TriggerMetadata::default(),
        }
    }

    /// Adds a payload field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    /// Replaces the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: TriggerPriority) -> Self {
        self.metadata.priority = priority;
        self
    }

    /// Sets the source module.
    #[must_use]
    pub fn with_source(mut self, module_id: impl Into<String>) -> Self {
        self.metadata.source_module = Some(module_id.into());
        self
    }

    /// Converts an output trigger emitted while handling this event into the
    /// next trigger event in the chain.
    ///
    /// Causal depth increases by one and the emitting module joins the
    /// visited set; tenant and subject are inherited.
    #[must_use]
    pub fn spawn_from(&self, output: &OutputTrigger, emitting_module: &str) -> Self {
        let mut visited = self.metadata.visited.clone();
        if !visited.iter().any(|m| m == emitting_module) {
            visited.push(emitting_module.to_string());
        }

        Self {
            id: generate_uuid(),
            trigger_type: output.trigger_type.clone(),
            tenant_id: self.tenant_id.clone(),
            subject_id: self.subject_id.clone(),
            payload: output.payload.clone(),
            target: output.target.clone(),
            metadata: TriggerMetadata {
                source_module: Some(emitting_module.to_string()),
                timestamp: now_utc(),
                priority: output.priority,
                causal_depth: self.metadata.causal_depth + 1,
                visited,
            },
        }
    }
}

/// A trigger a workflow wants routed: structurally a
/// [`TriggerEvent`]-in-waiting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputTrigger {
    /// The trigger type tag.
    pub trigger_type: String,
    /// Delivery target.
    #[serde(default)]
    pub target: TriggerTarget,
    /// Payload handed to the consumers.
    #[serde(default)]
    pub payload: Payload,
    /// Processing priority for the spawned event.
    #[serde(default)]
    pub priority: TriggerPriority,
    /// Set when the emitting module did not declare this trigger type in its
    /// descriptor's `emits` set.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub undeclared: bool,
}

impl OutputTrigger {
    /// Creates a broadcast output trigger.
    #[must_use]
    pub fn broadcast(trigger_type: impl Into<String>) -> Self {
        Self {
            trigger_type: trigger_type.into(),
            target: TriggerTarget::Broadcast,
            payload: Payload::new(),
            priority: TriggerPriority::default(),
            undeclared: false,
        }
    }

    /// Creates an output trigger targeting a single module.
    #[must_use]
    pub fn to_module(trigger_type: impl Into<String>, module_id: impl Into<String>) -> Self {
        Self {
            trigger_type: trigger_type.into(),
            target: TriggerTarget::Module(module_id.into()),
            payload: Payload::new(),
            priority: TriggerPriority::default(),
            undeclared: false,
        }
    }

    /// Adds a payload field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: TriggerPriority) -> Self {
        self.priority = priority;
        self
    }
}
