//! The persistence seam for analysis and workflow results.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Persists result records keyed by a caller-chosen string.
///
/// Store failures never fail the run that produced the result; the
/// orchestrator logs them and hands the result back regardless.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Saves a record under a key, overwriting any previous value.
    async fn save(&self, key: &str, value: &serde_json::Value) -> Result<(), String>;

    /// Loads a record by key.
    async fn load(&self, key: &str) -> Result<Option<serde_json::Value>, String>;
}

/// A store that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpStore;

#[async_trait]
impl ResultStore for NoOpStore {
    async fn save(&self, _key: &str, _value: &serde_json::Value) -> Result<(), String> {
        Ok(())
    }

    async fn load(&self, _key: &str) -> Result<Option<serde_json::Value>, String> {
        Ok(None)
    }
}

/// An in-memory store for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, serde_json::Value>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn save(&self, key: &str, value: &serde_json::Value) -> Result<(), String> {
        self.records
            .write()
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<serde_json::Value>, String> {
        Ok(self.records.read().get(key).cloned())
    }
}
