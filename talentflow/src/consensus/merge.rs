//! Field-level merge and disagreement scoring across provider payloads.
//!
//! Fields are classified per key: numeric, categorical (strings and bools),
//! list, or other. Merge rules per strategy live here; the engine decides
//! which rule to apply and how to weight each provider.

use crate::core::Payload;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// One field on which strict consensus found irreconcilable answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Divergence {
    /// The field name.
    pub field: String,
    /// Each provider's answer for the field.
    pub values: Vec<(String, Value)>,
}

/// Merges payloads field by field using the given per-payload weights.
///
/// Numeric fields become the weighted average, categorical fields the
/// weighted majority vote, lists the order-preserving union. For anything
/// else (nested objects, nulls, mixed types) the highest-weight value wins.
#[must_use]
pub fn weighted_merge(entries: &[(f64, &Payload)]) -> Payload {
    let mut merged = Payload::new();

    for key in all_keys(entries.iter().map(|(_, p)| *p)) {
        let present: Vec<(f64, &Value)> = entries
            .iter()
            .filter_map(|(w, p)| p.get(&key).map(|v| (*w, v)))
            .collect();

        if present.is_empty() {
            continue;
        }

        let value = if present.iter().all(|(_, v)| is_numeric(v)) {
            merge_numeric(&present)
        } else if present.iter().all(|(_, v)| is_categorical(v)) {
            merge_categorical(&present)
        } else if present.iter().all(|(_, v)| v.is_array()) {
            merge_lists(&present)
        } else {
            highest_weight(&present)
        };

        merged.insert(key, value);
    }

    merged
}

/// Computes the normalized disagreement across payloads in `[0, 1]`.
///
/// Numeric fields contribute their normalized spread, categorical fields
/// the fraction of responses outside the majority. Fields present in fewer
/// than two payloads contribute nothing; no comparable fields means zero
/// disagreement.
#[must_use]
pub fn disagreement_score(payloads: &[&Payload]) -> f64 {
    let mut components: Vec<f64> = Vec::new();

    for key in all_keys(payloads.iter().copied()) {
        let present: Vec<&Value> = payloads.iter().filter_map(|p| p.get(&key)).collect();
        if present.len() < 2 {
            continue;
        }

        if present.iter().all(|v| is_numeric(v)) {
            components.push(numeric_spread(&present));
        } else if present.iter().all(|v| is_categorical(v)) {
            components.push(categorical_disagreement(&present));
        }
    }

    if components.is_empty() {
        0.0
    } else {
        (components.iter().sum::<f64>() / components.len() as f64).clamp(0.0, 1.0)
    }
}

/// Checks whether all payloads agree on the key fields within tolerance.
///
/// `key_fields` empty means every field shared by all payloads is checked.
/// Numeric agreement is relative: `|a - b| <= tolerance * max(|a|, |b|, 1)`.
/// Returns the divergent fields; empty means agreement.
#[must_use]
pub fn strict_check(
    entries: &[(&str, &Payload)],
    key_fields: &[String],
    tolerance: f64,
) -> Vec<Divergence> {
    let fields: Vec<String> = if key_fields.is_empty() {
        shared_keys(entries.iter().map(|(_, p)| *p))
    } else {
        key_fields.to_vec()
    };

    let mut divergences = Vec::new();

    for field in fields {
        let values: Vec<(&str, &Value)> = entries
            .iter()
            .filter_map(|(id, p)| p.get(&field).map(|v| (*id, v)))
            .collect();
        if values.len() < 2 {
            continue;
        }

        let agrees = if values.iter().all(|(_, v)| is_numeric(v)) {
            numeric_agreement(&values, tolerance)
        } else {
            let first = canonical(values[0].1);
            values.iter().all(|(_, v)| canonical(v) == first)
        };

        if !agrees {
            divergences.push(Divergence {
                field,
                values: values
                    .iter()
                    .map(|(id, v)| ((*id).to_string(), (*v).clone()))
                    .collect(),
            });
        }
    }

    divergences
}

fn all_keys<'a>(payloads: impl Iterator<Item = &'a Payload>) -> BTreeSet<String> {
    payloads.flat_map(|p| p.keys().cloned()).collect()
}

fn shared_keys<'a>(payloads: impl Iterator<Item = &'a Payload>) -> Vec<String> {
    let sets: Vec<BTreeSet<&String>> = payloads.map(|p| p.keys().collect()).collect();
    let Some(first) = sets.first() else {
        return Vec::new();
    };
    first
        .iter()
        .filter(|k| sets.iter().all(|s| s.contains(*k)))
        .map(|k| (*k).clone())
        .collect()
}

fn is_numeric(value: &Value) -> bool {
    value.is_number()
}

fn is_categorical(value: &Value) -> bool {
    value.is_string() || value.is_boolean()
}

fn merge_numeric(present: &[(f64, &Value)]) -> Value {
    let total_weight: f64 = present.iter().map(|(w, _)| w).sum();
    if total_weight <= f64::EPSILON {
        // All weights zero: fall back to a plain average.
        let sum: f64 = present.iter().filter_map(|(_, v)| v.as_f64()).sum();
        return json_number(sum / present.len() as f64);
    }
    let weighted_sum: f64 = present
        .iter()
        .filter_map(|(w, v)| v.as_f64().map(|n| w * n))
        .sum();
    json_number(weighted_sum / total_weight)
}

fn merge_categorical(present: &[(f64, &Value)]) -> Value {
    let mut tallies: Vec<(String, f64, &Value)> = Vec::new();
    for (weight, value) in present {
        let key = canonical(value);
        if let Some(entry) = tallies.iter_mut().find(|(k, _, _)| *k == key) {
            entry.1 += weight;
        } else {
            tallies.push((key, *weight, value));
        }
    }
    tallies
        .into_iter()
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map_or(Value::Null, |(_, _, v)| v.clone())
}

fn merge_lists(present: &[(f64, &Value)]) -> Value {
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut union: Vec<Value> = Vec::new();
    for (_, value) in present {
        if let Some(items) = value.as_array() {
            for item in items {
                if seen.insert(canonical(item)) {
                    union.push(item.clone());
                }
            }
        }
    }
    Value::Array(union)
}

fn highest_weight(present: &[(f64, &Value)]) -> Value {
    present
        .iter()
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map_or(Value::Null, |(_, v)| (*v).clone())
}

fn numeric_spread(present: &[&Value]) -> f64 {
    let numbers: Vec<f64> = present.iter().filter_map(|v| v.as_f64()).collect();
    let (mut min, mut max) = (f64::INFINITY, f64::NEG_INFINITY);
    for n in &numbers {
        min = min.min(*n);
        max = max.max(*n);
    }
    let scale = min.abs().max(max.abs()).max(1.0);
    ((max - min) / scale).clamp(0.0, 1.0)
}

fn categorical_disagreement(present: &[&Value]) -> f64 {
    let mut tallies: Vec<(String, usize)> = Vec::new();
    for value in present {
        let key = canonical(value);
        if let Some(entry) = tallies.iter_mut().find(|(k, _)| *k == key) {
            entry.1 += 1;
        } else {
            tallies.push((key, 1));
        }
    }
    let majority = tallies.iter().map(|(_, c)| *c).max().unwrap_or(0);
    1.0 - majority as f64 / present.len() as f64
}

fn numeric_agreement(values: &[(&str, &Value)], tolerance: f64) -> bool {
    let numbers: Vec<f64> = values.iter().filter_map(|(_, v)| v.as_f64()).collect();
    for (i, a) in numbers.iter().enumerate() {
        for b in &numbers[i + 1..] {
            let scale = a.abs().max(b.abs()).max(1.0);
            if (a - b).abs() > tolerance * scale {
                return false;
            }
        }
    }
    true
}

fn canonical(value: &Value) -> String {
    value.to_string()
}

fn json_number(n: f64) -> Value {
    serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
}
