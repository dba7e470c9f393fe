//! The three-stage reasoning pipeline: stage specifications and the
//! controller that runs them strictly in order.

mod controller;
mod spec;

pub use controller::PipelineController;
pub use spec::{FnPromptBuilder, PromptBuilder, StageSpec};

use std::sync::Arc;

/// Builds the conventional knowledge → data → reasoning stage sequence over
/// a shared provider set. The knowledge and data stages are required; the
/// reasoning stage is too, it being the one whose consensus becomes the
/// final output.
#[must_use]
pub fn three_stage(
    providers: &[String],
    knowledge: Arc<dyn PromptBuilder>,
    data: Arc<dyn PromptBuilder>,
    reasoning: Arc<dyn PromptBuilder>,
) -> Vec<StageSpec> {
    vec![
        StageSpec::new("knowledge", knowledge).with_providers(providers.to_vec()),
        StageSpec::new("data", data).with_providers(providers.to_vec()),
        StageSpec::new("reasoning", reasoning).with_providers(providers.to_vec()),
    ]
}
