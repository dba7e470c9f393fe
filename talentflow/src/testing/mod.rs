//! Deterministic test doubles for the provider boundary.
//!
//! These live in the crate proper (not behind `cfg(test)`) so downstream
//! crates can exercise pipelines and routing without real backends.

use crate::errors::ProviderError;
use crate::provider::{Generation, GenerationParams, ProviderClient};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// A provider that always returns the same text, optionally after a delay.
#[derive(Debug, Clone)]
pub struct StaticProvider {
    id: String,
    text: String,
    delay: Option<Duration>,
}

impl StaticProvider {
    /// Creates a provider returning `text` verbatim.
    #[must_use]
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            delay: None,
        }
    }

    /// Delays every call by the given duration.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl ProviderClient for StaticProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn generate(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
        _params: &GenerationParams,
    ) -> Result<Generation, ProviderError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(Generation {
            text: self.text.clone(),
            latency_ms: 1.0,
        })
    }
}

/// A provider that returns the given JSON object with a self-reported
/// confidence embedded.
#[derive(Debug, Clone)]
pub struct JsonProvider {
    inner: StaticProvider,
}

impl JsonProvider {
    /// Creates a provider answering with `value` at the given confidence.
    ///
    /// A non-object `value` is wrapped under a `"value"` key.
    #[must_use]
    pub fn new(id: impl Into<String>, value: serde_json::Value, confidence: f64) -> Self {
        let mut object = match value {
            serde_json::Value::Object(map) => map,
            other => {
                let mut map = serde_json::Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        object.insert(
            "confidence".to_string(),
            serde_json::Value::from(confidence),
        );
        let text = serde_json::Value::Object(object).to_string();
        Self {
            inner: StaticProvider::new(id, text),
        }
    }
}

#[async_trait]
impl ProviderClient for JsonProvider {
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        params: &GenerationParams,
    ) -> Result<Generation, ProviderError> {
        self.inner.generate(system_prompt, user_prompt, params).await
    }
}

/// A provider that fails every call with the same terminal error.
#[derive(Debug, Clone)]
pub struct FailingProvider {
    id: String,
}

impl FailingProvider {
    /// Creates a provider that always rejects with an auth failure.
    #[must_use]
    pub fn auth(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait]
impl ProviderClient for FailingProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn generate(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
        _params: &GenerationParams,
    ) -> Result<Generation, ProviderError> {
        Err(ProviderError::AuthFailure {
            provider: self.id.clone(),
        })
    }
}

/// A provider that is rate limited a fixed number of times, then succeeds.
#[derive(Debug)]
pub struct FlakyProvider {
    id: String,
    failures_left: AtomicU32,
    generation: Generation,
}

impl FlakyProvider {
    /// Creates a provider failing the first `failures` calls.
    #[must_use]
    pub fn new(id: impl Into<String>, failures: u32, generation: Generation) -> Self {
        Self {
            id: id.into(),
            failures_left: AtomicU32::new(failures),
            generation,
        }
    }
}

#[async_trait]
impl ProviderClient for FlakyProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn generate(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
        _params: &GenerationParams,
    ) -> Result<Generation, ProviderError> {
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(ProviderError::RateLimited {
                provider: self.id.clone(),
            });
        }
        Ok(self.generation.clone())
    }
}
