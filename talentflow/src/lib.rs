//! # Talentflow
//!
//! The orchestration core for an HR-analytics platform: multi-provider AI
//! reasoning pipelines with consensus, and trigger routing between domain
//! modules.
//!
//! Talentflow provides:
//!
//! - **Staged reasoning**: knowledge, data, and reasoning stages run strictly
//!   in order, each stage's consensus feeding the next stage's prompt
//! - **Provider consensus**: every stage fans out to several AI providers
//!   concurrently and reconciles their answers under a configurable strategy
//! - **Explicit degradation**: disagreement, quorum shortfalls, and low
//!   confidence are surfaced as data, never papered over
//! - **Trigger routing**: domain modules declare what they accept and emit;
//!   the router drains trigger cascades with a causal-depth cycle breaker
//! - **Cancellation handling**: cooperative cancellation with partial results
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use talentflow::prelude::*;
//!
//! let orchestrator = Orchestrator::builder()
//!     .with_provider(gpt_client)
//!     .with_provider(claude_client)
//!     .with_module(Arc::new(performance_module))
//!     .build()?;
//!
//! let report = orchestrator
//!     .submit_trigger(TriggerEvent::new("performance.review_completed", "acme", "emp-1"))
//!     .await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::cast_precision_loss
)]

pub mod cancellation;
pub mod config;
pub mod consensus;
pub mod core;
pub mod errors;
pub mod observability;
pub mod orchestrator;
pub mod pipeline;
pub mod provider;
pub mod router;
pub mod store;
pub mod testing;
pub mod utils;
pub mod workflow;


/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{ConsensusConfig, OrchestratorConfig, RetryPolicy, Timeouts};
    pub use crate::consensus::{
        AggregationStrategy, ConsensusEngine, StagePrompt, StageResult,
    };
    pub use crate::core::{
        AnalysisRequest, AnalysisResult, OutputTrigger, Payload, TriggerEvent,
        TriggerMetadata, TriggerPriority, TriggerTarget, WorkflowResult,
    };
    pub use crate::errors::{
        PipelineAbort, ProviderError, RoutingError, StageFailureReason, TalentflowError,
        WorkflowError,
    };
    pub use crate::orchestrator::{Orchestrator, OrchestratorBuilder};
    pub use crate::pipeline::{
        three_stage, FnPromptBuilder, PipelineController, PromptBuilder, StageSpec,
    };
    pub use crate::provider::{
        Generation, GenerationParams, ProviderClient, ProviderOutcome, ProviderResponse,
    };
    pub use crate::router::{ModuleRegistry, RouteReport, TriggerRouter, UnresolvedTrigger};
    pub use crate::store::{MemoryStore, NoOpStore, ResultStore};
    pub use crate::workflow::{
        Module, ModuleContext, ModuleDescriptor, Workflow, WorkflowModule, WorkflowStep,
    };
}
