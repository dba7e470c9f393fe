//! Bounded retry with backoff for transient provider failures.

use super::{
    extract_confidence, extract_payload, GenerationParams, ProviderClient, ProviderOutcome,
    ProviderResponse,
};
use crate::config::RetryPolicy;
use crate::errors::ProviderError;
use rand::Rng;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy)]
pub enum BackoffStrategy {
    /// Constant delay between retries.
    Constant(Duration),
    /// Linear increase: delay * attempt.
    Linear(Duration),
    /// Exponential: delay * 2^attempt.
    Exponential(Duration),
}

impl BackoffStrategy {
    /// Calculates the delay for a given attempt.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Constant(d) => *d,
            Self::Linear(d) => *d * attempt,
            Self::Exponential(d) => *d * 2u32.pow(attempt.saturating_sub(1)),
        }
    }
}

/// Jitter strategy for adding randomness to delays.
#[derive(Debug, Clone, Copy)]
pub enum JitterStrategy {
    /// No jitter.
    None,
    /// Full jitter: [0, delay].
    Full,
    /// Equal jitter: [delay/2, delay].
    Equal,
}

impl JitterStrategy {
    /// Applies jitter to a delay.
    #[must_use]
    pub fn apply(&self, delay: Duration) -> Duration {
        let mut rng = rand::thread_rng();

        match self {
            Self::None => delay,
            Self::Full => {
                let millis = delay.as_millis() as u64;
                Duration::from_millis(rng.gen_range(0..=millis))
            }
            Self::Equal => {
                let millis = delay.as_millis() as u64;
                let half = millis / 2;
                Duration::from_millis(half + rng.gen_range(0..=half))
            }
        }
    }
}

/// Options governing one provider call inside a stage.
#[derive(Debug, Clone, Copy)]
pub struct ProviderCallOptions {
    /// Generation parameters.
    pub params: GenerationParams,
    /// Hard per-call deadline.
    pub per_call_timeout: Duration,
    /// Retry policy for transient failures.
    pub retry: RetryPolicy,
    /// Confidence assigned when the payload does not self-report one.
    pub default_confidence: f64,
}

/// Calls a provider with a per-call deadline, retrying transient failures
/// (`Timeout`, `RateLimited`) with exponential backoff and full jitter.
///
/// `AuthFailure` is terminal immediately; a response whose text carries no
/// extractable payload is tagged `MalformedResponse` and not retried. The
/// returned [`ProviderResponse`] always records the terminal outcome and the
/// attempt count; this function never fabricates a payload.
pub async fn call_with_retry(
    client: &dyn ProviderClient,
    system_prompt: &str,
    user_prompt: &str,
    options: &ProviderCallOptions,
) -> ProviderResponse {
    let backoff = BackoffStrategy::Exponential(options.retry.backoff_base());
    let jitter = JitterStrategy::Full;
    let max_attempts = options.retry.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let started = Instant::now();

        let outcome = tokio::time::timeout(
            options.per_call_timeout,
            client.generate(system_prompt, user_prompt, &options.params),
        )
        .await;

        let result = match outcome {
            Ok(inner) => inner,
            Err(_) => Err(ProviderError::Timeout {
                provider: client.id().to_string(),
                elapsed_ms: options.per_call_timeout.as_millis() as u64,
            }),
        };

        match result {
            Ok(generation) => {
                return match extract_payload(&generation.text) {
                    Ok(mut payload) => {
                        let confidence =
                            extract_confidence(&payload, options.default_confidence);
                        // Self-reported confidence is call metadata, not part
                        // of the structured answer to aggregate.
                        payload.remove("confidence");
                        debug!(
                            provider = client.id(),
                            latency_ms = generation.latency_ms,
                            attempts = attempt,
                            "provider call succeeded"
                        );
                        ProviderResponse {
                            provider_id: client.id().to_string(),
                            raw_text: generation.text,
                            latency_ms: generation.latency_ms,
                            outcome: ProviderOutcome::Success,
                            payload: Some(payload),
                            confidence,
                            attempts: attempt,
                        }
                    }
                    Err(extract_err) => {
                        warn!(
                            provider = client.id(),
                            error = %extract_err,
                            "provider response carried no structured payload"
                        );
                        ProviderResponse {
                            provider_id: client.id().to_string(),
                            raw_text: generation.text,
                            latency_ms: generation.latency_ms,
                            outcome: ProviderOutcome::MalformedResponse,
                            payload: None,
                            confidence: 0.0,
                            attempts: attempt,
                        }
                    }
                };
            }
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let delay = jitter.apply(backoff.delay(attempt));
                warn!(
                    provider = client.id(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient provider failure, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                let elapsed = started.elapsed().as_secs_f64() * 1000.0;
                warn!(provider = client.id(), attempts = attempt, error = %err, "provider call failed");
                return ProviderResponse::from_error(&err, elapsed, attempt);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Generation;
    use crate::testing::{FailingProvider, FlakyProvider, StaticProvider};

    fn options(max_attempts: u32) -> ProviderCallOptions {
        ProviderCallOptions {
            params: GenerationParams::default(),
            per_call_timeout: Duration::from_millis(200),
            retry: RetryPolicy {
                max_attempts,
                backoff_base_ms: 1,
            },
            default_confidence: 0.5,
        }
    }

    #[test]
    fn test_exponential_backoff() {
        let strategy = BackoffStrategy::Exponential(Duration::from_secs(1));
        assert_eq!(strategy.delay(1), Duration::from_secs(1));
        assert_eq!(strategy.delay(2), Duration::from_secs(2));
        assert_eq!(strategy.delay(3), Duration::from_secs(4));
    }

    #[test]
    fn test_linear_backoff() {
        let strategy = BackoffStrategy::Linear(Duration::from_secs(1));
        assert_eq!(strategy.delay(3), Duration::from_secs(3));
    }

    #[test]
    fn test_full_jitter_bounds() {
        let jitter = JitterStrategy::Full;
        let delay = Duration::from_secs(10);
        for _ in 0..100 {
            assert!(jitter.apply(delay) <= delay);
        }
    }

    #[tokio::test]
    async fn test_success_extracts_payload_and_confidence() {
        let provider = StaticProvider::new("gpt", r#"{"score": 8, "confidence": 0.9}"#);
        let response = call_with_retry(&provider, "sys", "user", &options(3)).await;

        assert!(response.succeeded());
        assert_eq!(response.attempts, 1);
        assert!((response.confidence - 0.9).abs() < f64::EPSILON);
        let payload = response.payload.unwrap();
        assert!(payload.contains_key("score"));
        assert!(!payload.contains_key("confidence"));
    }

    #[tokio::test]
    async fn test_malformed_response_not_retried() {
        let provider = StaticProvider::new("gpt", "no structure here at all");
        let response = call_with_retry(&provider, "sys", "user", &options(3)).await;

        assert_eq!(response.outcome, ProviderOutcome::MalformedResponse);
        assert_eq!(response.attempts, 1);
        assert!(response.payload.is_none());
        assert_eq!(response.raw_text, "no structure here at all");
    }

    #[tokio::test]
    async fn test_rate_limit_retried_until_success() {
        let provider = FlakyProvider::new(
            "gpt",
            2,
            Generation {
                text: r#"{"score": 5}"#.to_string(),
                latency_ms: 1.0,
            },
        );
        let response = call_with_retry(&provider, "sys", "user", &options(5)).await;

        assert!(response.succeeded());
        assert_eq!(response.attempts, 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let provider = FlakyProvider::new(
            "gpt",
            10,
            Generation {
                text: r#"{"score": 5}"#.to_string(),
                latency_ms: 1.0,
            },
        );
        let response = call_with_retry(&provider, "sys", "user", &options(2)).await;

        assert_eq!(response.outcome, ProviderOutcome::RateLimited);
        assert_eq!(response.attempts, 2);
    }

    #[tokio::test]
    async fn test_auth_failure_not_retried() {
        let provider = FailingProvider::auth("gpt");
        let response = call_with_retry(&provider, "sys", "user", &options(5)).await;

        assert_eq!(response.outcome, ProviderOutcome::AuthFailure);
        assert_eq!(response.attempts, 1);
    }

    #[tokio::test]
    async fn test_slow_provider_times_out() {
        let provider =
            StaticProvider::new("slow", r#"{"score": 1}"#).with_delay(Duration::from_secs(5));
        let response = call_with_retry(&provider, "sys", "user", &options(1)).await;

        assert_eq!(response.outcome, ProviderOutcome::Timeout);
    }
}
