//! Core data model: requests, trigger events, and result records.

mod request;
mod result;
mod trigger;

pub use request::AnalysisRequest;
pub(crate) use result::empty_analysis_result;
pub use result::{AnalysisResult, WorkflowResult};
pub use trigger::{
    OutputTrigger, TriggerEvent, TriggerMetadata, TriggerPriority, TriggerTarget,
};

/// A semantic key/value payload, the common currency of requests, consensus
/// outputs, and trigger events.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Builds a [`Payload`] from an iterator of key/value pairs.
#[must_use]
pub fn payload_from<I, K>(entries: I) -> Payload
where
    I: IntoIterator<Item = (K, serde_json::Value)>,
    K: Into<String>,
{
    entries.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_from_pairs() {
        let payload = payload_from([
            ("score", serde_json::json!(7)),
            ("band", serde_json::json!("meets")),
        ]);
        assert_eq!(payload.len(), 2);
        assert_eq!(payload.get("band"), Some(&serde_json::json!("meets")));
    }
}
