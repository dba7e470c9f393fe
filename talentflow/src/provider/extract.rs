//! Best-effort extraction of a structured payload from free-form provider
//! text.
//!
//! Providers routinely wrap the JSON they were asked for in explanatory
//! prose or markdown fences. The extractor tries, in order: the whole text,
//! a fenced code block, and the first balanced-brace substring. Extraction
//! failure is an explicit outcome; the engine never substitutes a
//! plausible-looking default on behalf of a failed parse.

use crate::core::Payload;
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// Why extraction failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    /// The text contains no candidate JSON object.
    #[error("no JSON object found in response text")]
    NoPayload,

    /// A candidate was found but did not parse.
    #[error("candidate JSON did not parse: {0}")]
    Parse(String),

    /// The text parsed but the top level is not an object.
    #[error("response JSON is not an object")]
    NotAnObject,
}

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        // Literal pattern, known to compile.
        #[allow(clippy::unwrap_used)]
        let fence = Regex::new(r"```(?:json)?\s*([\s\S]*?)```").unwrap();
        fence
    })
}

/// Extracts the structured payload from provider response text.
///
/// # Errors
///
/// Returns an [`ExtractError`] when no parseable JSON object is present.
pub fn extract_payload(text: &str) -> Result<Payload, ExtractError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ExtractError::NoPayload);
    }

    // Whole text first: the common case for well-behaved providers.
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        return into_object(value);
    }

    // Fenced code block next.
    if let Some(caps) = fence_regex().captures(trimmed) {
        let inner = caps.get(1).map_or("", |m| m.as_str()).trim();
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(inner) {
            return into_object(value);
        }
    }

    // Finally the first balanced-brace substring.
    let candidate = balanced_object(trimmed).ok_or(ExtractError::NoPayload)?;
    match serde_json::from_str::<serde_json::Value>(candidate) {
        Ok(value) => into_object(value),
        Err(e) => Err(ExtractError::Parse(e.to_string())),
    }
}

/// Reads the provider's self-reported confidence from an extracted payload,
/// clamped to `[0, 1]`. Falls back to `default` when absent or non-numeric.
#[must_use]
pub fn extract_confidence(payload: &Payload, default: f64) -> f64 {
    payload
        .get("confidence")
        .and_then(serde_json::Value::as_f64)
        .map_or(default, |c| c.clamp(0.0, 1.0))
}

fn into_object(value: serde_json::Value) -> Result<Payload, ExtractError> {
    match value {
        serde_json::Value::Object(map) => Ok(map),
        _ => Err(ExtractError::NotAnObject),
    }
}

/// Locates the first balanced `{...}` substring, respecting JSON strings and
/// escapes.
fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}
