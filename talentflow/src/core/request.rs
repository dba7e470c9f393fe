//! The immutable seed context for a pipeline run.

use super::Payload;
use crate::utils::{generate_uuid, now_utc, Timestamp};
use serde::{Deserialize, Serialize};

/// An immutable analysis request: tenant/subject identifiers plus a semantic
/// key/value payload. Created per external stimulus and discarded after the
/// result is handed back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    /// Unique request id.
    pub id: String,
    /// The tenant the subject belongs to.
    pub tenant_id: String,
    /// The subject under analysis (employee, team, requisition...).
    pub subject_id: String,
    /// Semantic key/value seed data.
    #[serde(default)]
    pub payload: Payload,
    /// When the request was created.
    pub created_at: Timestamp,
}

impl AnalysisRequest {
    /// Creates a new request for a tenant/subject pair.
    #[must_use]
    pub fn new(tenant_id: impl Into<String>, subject_id: impl Into<String>) -> Self {
        Self {
            id: generate_uuid(),
            tenant_id: tenant_id.into(),
            subject_id: subject_id.into(),
            payload: Payload::new(),
            created_at: now_utc(),
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
}
