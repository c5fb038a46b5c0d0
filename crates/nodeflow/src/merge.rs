// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Deterministic geometric classifier for concurrent-edit conflicts.
//!
//! Given a base value and the values proposed by two or more agents, the
//! classifier computes a similarity score, detects contradictions, and
//! assigns one of six conflict classes. For fixed inputs the class and
//! score are identical across calls.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Conflict classes, in decreasing order of identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictType {
    /// Values are the same (similarity >= 0.99).
    Identical,
    /// Dict edits touch disjoint keys.
    Orthogonal,
    /// Similarity in [0.85, 0.99).
    LowConflict,
    /// Similarity in [0.5, 0.85).
    Conflicting,
    /// Contradictory values (boolean or semantic opposites).
    Opposite,
    /// Nothing above applies.
    Ambiguous,
}

/// Classification result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictDetails {
    pub conflict_type: ConflictType,
    pub similarity_score: f64,
    pub confidence: f64,
    /// Sorted field names the agents disagree on (dict inputs only).
    pub affected_fields: Vec<String>,
    /// Mean pairwise key-set similarity (dict inputs only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structural_similarity: Option<f64>,
    pub explanation: String,
}

/// Recommended resolution for a classified conflict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub value: Value,
    pub explanation: String,
    pub is_auto_resolvable: bool,
}

/// Similarity never reported for unequal values; keeps deeply nested
/// non-equal dicts below the IDENTICAL threshold.
const UNEQUAL_CEILING: f64 = 0.985;

const NUMERIC_EPSILON: f64 = 1e-9;

/// Word pairs treated as semantic opposites.
const SEMANTIC_OPPOSITES: &[(&str, &str)] = &[
    ("enable", "disable"),
    ("enabled", "disabled"),
    ("yes", "no"),
    ("on", "off"),
    ("allow", "deny"),
    ("true", "false"),
    ("start", "stop"),
];

/// Deterministic similarity and contradiction classifier.
#[derive(Debug, Clone, Default)]
pub struct ConflictClassifier;

impl ConflictClassifier {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Classify concurrent edits against a base value.
    ///
    /// Requires at least two agent values.
    pub fn classify(&self, base: &Value, values: &[(String, Value)]) -> Result<ConflictDetails> {
        if values.len() < 2 {
            return Err(Error::Validation(
                "conflict classification requires at least two agent values".to_string(),
            ));
        }

        let similarity = self.pairwise_similarity(values);
        let affected_fields = affected_fields(base, values);
        let structural_similarity = self.structural_similarity(values);

        if let Some((left, right)) = self.find_contradiction(values) {
            return Ok(ConflictDetails {
                conflict_type: ConflictType::Opposite,
                similarity_score: similarity,
                confidence: 0.95,
                affected_fields,
                structural_similarity,
                explanation: format!(
                    "agents {left} and {right} propose contradictory values"
                ),
            });
        }

        if similarity >= 0.99 {
            return Ok(ConflictDetails {
                conflict_type: ConflictType::Identical,
                similarity_score: similarity,
                confidence: 1.0,
                affected_fields,
                structural_similarity,
                explanation: "all agents propose the same value".to_string(),
            });
        }

        if self.is_orthogonal(base, values) {
            return Ok(ConflictDetails {
                conflict_type: ConflictType::Orthogonal,
                similarity_score: similarity,
                confidence: 0.9,
                affected_fields,
                structural_similarity,
                explanation: "agents modified disjoint fields".to_string(),
            });
        }

        let (conflict_type, confidence, explanation) = if similarity >= 0.85 {
            (
                ConflictType::LowConflict,
                0.8,
                "values are close; first-writer value is advisory".to_string(),
            )
        } else if similarity >= 0.5 {
            (
                ConflictType::Conflicting,
                0.7,
                "values overlap partially and need review".to_string(),
            )
        } else {
            (
                ConflictType::Ambiguous,
                0.5,
                "values are too dissimilar to relate automatically".to_string(),
            )
        };

        Ok(ConflictDetails {
            conflict_type,
            similarity_score: similarity,
            confidence,
            affected_fields,
            structural_similarity,
            explanation,
        })
    }

    /// Deterministic similarity between two heterogeneous values in [0, 1].
    #[must_use]
    pub fn compute_similarity(&self, a: &Value, b: &Value) -> f64 {
        // Numeric proximity first so int/float mixes compare by value.
        if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
            let scale = x.abs().max(y.abs()).max(NUMERIC_EPSILON);
            return (1.0 - (x - y).abs() / scale).clamp(0.0, 1.0);
        }

        if a == b {
            return 1.0;
        }

        match (a, b) {
            (Value::String(x), Value::String(y)) => string_similarity(x, y),
            (Value::Array(x), Value::Array(y)) => multiset_jaccard(x, y),
            (Value::Object(x), Value::Object(y)) => self.dict_similarity(x, y),
            // Different types (or unequal booleans/nulls).
            _ => 0.0,
        }
    }

    /// Recommend a resolution for classified values.
    pub fn recommend_resolution(
        &self,
        details: &ConflictDetails,
        values: &[(String, Value)],
    ) -> Result<Resolution> {
        let first = values
            .first()
            .ok_or_else(|| Error::Validation("no values to resolve".to_string()))?;

        match details.conflict_type {
            ConflictType::Identical => Ok(Resolution {
                value: first.1.clone(),
                explanation: "values are identical; any of them applies".to_string(),
                is_auto_resolvable: true,
            }),
            ConflictType::Orthogonal => self.merge_orthogonal(values),
            ConflictType::LowConflict => Ok(Resolution {
                value: first.1.clone(),
                explanation: format!(
                    "low conflict (similarity {:.2}); keeping value from agent {}",
                    details.similarity_score, first.0
                ),
                is_auto_resolvable: true,
            }),
            ConflictType::Conflicting => Ok(Resolution {
                value: first.1.clone(),
                explanation: format!(
                    "conflicting edits (similarity {:.2}); value from agent {} is advisory only",
                    details.similarity_score, first.0
                ),
                is_auto_resolvable: false,
            }),
            ConflictType::Opposite | ConflictType::Ambiguous => Err(Error::OperationFailed(
                "human approval required: values contradict or cannot be related".to_string(),
            )),
        }
    }

    fn merge_orthogonal(&self, values: &[(String, Value)]) -> Result<Resolution> {
        let mut dicts: Vec<(&String, &Map<String, Value>)> = Vec::new();
        for (agent, value) in values {
            match value {
                Value::Object(map) => dicts.push((agent, map)),
                _ => {
                    // Non-dict orthogonal values fall back to the first value.
                    return Ok(Resolution {
                        value: values[0].1.clone(),
                        explanation: "orthogonal non-dict values; keeping the first".to_string(),
                        is_auto_resolvable: true,
                    });
                }
            }
        }

        let mut merged = Map::new();
        let mut owners: HashMap<String, &String> = HashMap::new();
        for (agent, map) in dicts {
            for (key, value) in map {
                if let Some(previous) = owners.get(key) {
                    if merged.get(key) != Some(value) {
                        return Err(Error::Validation(format!(
                            "cannot merge: key '{key}' modified by both agents {previous} and {agent}"
                        )));
                    }
                    continue;
                }
                owners.insert(key.clone(), agent);
                merged.insert(key.clone(), value.clone());
            }
        }

        Ok(Resolution {
            value: Value::Object(merged),
            explanation: "merged disjoint field edits".to_string(),
            is_auto_resolvable: true,
        })
    }

    fn pairwise_similarity(&self, values: &[(String, Value)]) -> f64 {
        let mut minimum = 1.0_f64;
        for i in 0..values.len() {
            for j in (i + 1)..values.len() {
                minimum = minimum.min(self.compute_similarity(&values[i].1, &values[j].1));
            }
        }
        minimum
    }

    fn structural_similarity(&self, values: &[(String, Value)]) -> Option<f64> {
        let maps: Vec<&Map<String, Value>> = values
            .iter()
            .filter_map(|(_, v)| v.as_object())
            .collect();
        if maps.len() != values.len() {
            return None;
        }

        let mut total = 0.0;
        let mut pairs = 0_u32;
        for i in 0..maps.len() {
            for j in (i + 1)..maps.len() {
                total += key_jaccard(maps[i], maps[j]);
                pairs += 1;
            }
        }
        (pairs > 0).then(|| total / f64::from(pairs))
    }

    fn dict_similarity(&self, a: &Map<String, Value>, b: &Map<String, Value>) -> f64 {
        let keys = key_jaccard(a, b);
        let shared: Vec<&String> = a.keys().filter(|k| b.contains_key(*k)).collect();
        let value_mean = if shared.is_empty() {
            0.0
        } else {
            shared
                .iter()
                .map(|k| self.compute_similarity(&a[*k], &b[*k]))
                .sum::<f64>()
                / shared.len() as f64
        };
        // Equal dicts short-circuit earlier; unequal ones never reach 1.0
        // no matter how deep the agreement goes.
        (0.5 * keys + 0.5 * value_mean).min(UNEQUAL_CEILING)
    }

    fn find_contradiction<'a>(
        &self,
        values: &'a [(String, Value)],
    ) -> Option<(&'a str, &'a str)> {
        for i in 0..values.len() {
            for j in (i + 1)..values.len() {
                if is_contradiction(&values[i].1, &values[j].1) {
                    return Some((values[i].0.as_str(), values[j].0.as_str()));
                }
            }
        }
        None
    }

    fn is_orthogonal(&self, base: &Value, values: &[(String, Value)]) -> bool {
        let base_map = match base.as_object() {
            Some(map) => map,
            None => return false,
        };
        let mut modified_sets: Vec<BTreeSet<&String>> = Vec::with_capacity(values.len());
        for (_, value) in values {
            let Some(map) = value.as_object() else {
                return false;
            };
            let modified: BTreeSet<&String> = map
                .iter()
                .filter(|(key, value)| base_map.get(*key) != Some(*value))
                .map(|(key, _)| key)
                .collect();
            modified_sets.push(modified);
        }

        // Every agent must change something, and no two agents may touch
        // the same key.
        if modified_sets.iter().any(BTreeSet::is_empty) {
            return false;
        }
        for i in 0..modified_sets.len() {
            for j in (i + 1)..modified_sets.len() {
                if !modified_sets[i].is_disjoint(&modified_sets[j]) {
                    return false;
                }
            }
        }
        true
    }
}

fn key_jaccard(a: &Map<String, Value>, b: &Map<String, Value>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let a_keys: BTreeSet<&String> = a.keys().collect();
    let b_keys: BTreeSet<&String> = b.keys().collect();
    let intersection = a_keys.intersection(&b_keys).count();
    let union = a_keys.union(&b_keys).count();
    intersection as f64 / union as f64
}

/// Character-bigram Jaccard. Single-character strings have no bigrams and
/// score 0.0 when unequal.
fn string_similarity(a: &str, b: &str) -> f64 {
    let a_bigrams = bigram_counts(a);
    let b_bigrams = bigram_counts(b);
    if a_bigrams.is_empty() || b_bigrams.is_empty() {
        return 0.0;
    }

    let mut intersection = 0_usize;
    let mut union = 0_usize;
    let all_keys: BTreeSet<&(char, char)> = a_bigrams.keys().chain(b_bigrams.keys()).collect();
    for key in all_keys {
        let in_a = a_bigrams.get(key).copied().unwrap_or(0);
        let in_b = b_bigrams.get(key).copied().unwrap_or(0);
        intersection += in_a.min(in_b);
        union += in_a.max(in_b);
    }
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

fn bigram_counts(s: &str) -> HashMap<(char, char), usize> {
    let chars: Vec<char> = s.chars().collect();
    let mut counts = HashMap::new();
    for window in chars.windows(2) {
        *counts.entry((window[0], window[1])).or_insert(0) += 1;
    }
    counts
}

/// Multiset Jaccard over list elements, so duplicate counts matter.
fn multiset_jaccard(a: &[Value], b: &[Value]) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }

    let count = |items: &[Value]| {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for item in items {
            *counts.entry(item.to_string()).or_insert(0) += 1;
        }
        counts
    };
    let a_counts = count(a);
    let b_counts = count(b);

    let mut intersection = 0_usize;
    let mut union = 0_usize;
    let keys: BTreeSet<&String> = a_counts.keys().chain(b_counts.keys()).collect();
    for key in keys {
        let in_a = a_counts.get(key).copied().unwrap_or(0);
        let in_b = b_counts.get(key).copied().unwrap_or(0);
        intersection += in_a.min(in_b);
        union += in_a.max(in_b);
    }
    intersection as f64 / union as f64
}

fn is_contradiction(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x != y,
        (Value::String(x), Value::String(y)) => is_semantic_opposite(x, y),
        (Value::Object(x), Value::Object(y)) => x.iter().any(|(key, value)| {
            y.get(key).map_or(false, |other| is_contradiction(value, other))
        }),
        _ => false,
    }
}

fn is_semantic_opposite(a: &str, b: &str) -> bool {
    let a = a.to_ascii_lowercase();
    let b = b.to_ascii_lowercase();
    SEMANTIC_OPPOSITES
        .iter()
        .any(|(x, y)| (a == *x && b == *y) || (a == *y && b == *x))
}

fn affected_fields(base: &Value, values: &[(String, Value)]) -> Vec<String> {
    let Some(base_map) = base.as_object() else {
        return Vec::new();
    };
    let mut fields: BTreeSet<String> = BTreeSet::new();
    for (_, value) in values {
        let Some(map) = value.as_object() else {
            continue;
        };
        for (key, value) in map {
            if base_map.get(key) != Some(value) {
                fields.insert(key.clone());
            }
        }
        for key in base_map.keys() {
            if !map.contains_key(key) {
                fields.insert(key.clone());
            }
        }
    }
    fields.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn agents(values: &[Value]) -> Vec<(String, Value)> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| (format!("agent_{i}"), v.clone()))
            .collect()
    }

    #[test]
    fn test_identical_dicts() {
        let classifier = ConflictClassifier::new();
        let value = json!({"k": "v"});
        let result = classifier
            .classify(&value, &agents(&[value.clone(), value.clone()]))
            .unwrap();
        assert_eq!(result.conflict_type, ConflictType::Identical);
        assert!(result.similarity_score >= 0.99);
    }

    #[test]
    fn test_identical_three_agents() {
        let classifier = ConflictClassifier::new();
        let value = json!({"nested": {"a": [1, 2, 3]}});
        let result = classifier
            .classify(&value, &agents(&[value.clone(), value.clone(), value.clone()]))
            .unwrap();
        assert_eq!(result.conflict_type, ConflictType::Identical);
    }

    #[test]
    fn test_boolean_contradiction_is_opposite() {
        let classifier = ConflictClassifier::new();
        let result = classifier
            .classify(&json!(true), &agents(&[json!(true), json!(false)]))
            .unwrap();
        assert_eq!(result.conflict_type, ConflictType::Opposite);
    }

    #[test]
    fn test_semantic_contradiction_enable_disable() {
        let classifier = ConflictClassifier::new();
        let base = json!({"mode": "enable"});
        let result = classifier
            .classify(
                &base,
                &agents(&[json!({"mode": "enable"}), json!({"mode": "disable"})]),
            )
            .unwrap();
        assert_eq!(result.conflict_type, ConflictType::Opposite);
    }

    #[test]
    fn test_semantic_contradiction_yes_no() {
        let classifier = ConflictClassifier::new();
        let result = classifier
            .classify(&json!("yes"), &agents(&[json!("yes"), json!("no")]))
            .unwrap();
        assert_eq!(result.conflict_type, ConflictType::Opposite);
    }

    #[test]
    fn test_nested_boolean_contradiction() {
        let classifier = ConflictClassifier::new();
        let base = json!({"settings": {"active": true}});
        let result = classifier
            .classify(
                &base,
                &agents(&[
                    json!({"settings": {"active": true}}),
                    json!({"settings": {"active": false}}),
                ]),
            )
            .unwrap();
        assert_eq!(result.conflict_type, ConflictType::Opposite);
    }

    #[test]
    fn test_orthogonal_disjoint_keys() {
        let classifier = ConflictClassifier::new();
        let base = json!({"a": 1, "b": 2});
        let result = classifier
            .classify(&base, &agents(&[json!({"a": 10}), json!({"b": 20})]))
            .unwrap();
        assert_eq!(result.conflict_type, ConflictType::Orthogonal);
        assert_eq!(result.affected_fields, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_same_key_similar_values_low_conflict() {
        let classifier = ConflictClassifier::new();
        let base = json!({"name": "hello world"});
        let result = classifier
            .classify(
                &base,
                &agents(&[
                    json!({"name": "hello world again"}),
                    json!({"name": "hello world againx"}),
                ]),
            )
            .unwrap();
        assert_eq!(result.conflict_type, ConflictType::LowConflict);
        assert!(result.similarity_score >= 0.85 && result.similarity_score < 0.99);
    }

    #[test]
    fn test_partial_overlap_conflicting() {
        let classifier = ConflictClassifier::new();
        let base = json!({"a": 1, "b": 2, "c": 3});
        let result = classifier
            .classify(
                &base,
                &agents(&[
                    json!({"a": 1, "b": 2, "c": 3}),
                    json!({"a": 1, "b": 2, "c": 999}),
                ]),
            )
            .unwrap();
        assert_eq!(result.conflict_type, ConflictType::Conflicting);
        assert!(result.similarity_score >= 0.5 && result.similarity_score < 0.85);
    }

    #[test]
    fn test_different_types_ambiguous() {
        let classifier = ConflictClassifier::new();
        let result = classifier
            .classify(&json!(1), &agents(&[json!("a string"), json!([1, 2])]))
            .unwrap();
        assert_eq!(result.conflict_type, ConflictType::Ambiguous);
        assert_eq!(result.similarity_score, 0.0);
    }

    #[test]
    fn test_requires_two_values() {
        let classifier = ConflictClassifier::new();
        let err = classifier
            .classify(&json!(1), &agents(&[json!(1)]))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_classify_deterministic_10_runs() {
        let classifier = ConflictClassifier::new();
        let base = json!({"k": "v"});
        let values = agents(&[json!({"k": "a"}), json!({"k": "b"})]);

        let first = classifier.classify(&base, &values).unwrap();
        for _ in 0..9 {
            let next = classifier.classify(&base, &values).unwrap();
            assert_eq!(next.conflict_type, first.conflict_type);
            assert_eq!(next.similarity_score, first.similarity_score);
        }
    }

    #[test]
    fn test_similarity_identical_values() {
        let classifier = ConflictClassifier::new();
        assert_eq!(classifier.compute_similarity(&json!("x"), &json!("x")), 1.0);
        assert_eq!(classifier.compute_similarity(&json!([1, 2]), &json!([1, 2])), 1.0);
        assert_eq!(classifier.compute_similarity(&json!(true), &json!(true)), 1.0);
    }

    #[test]
    fn test_similarity_numeric_proximity() {
        let classifier = ConflictClassifier::new();
        assert_eq!(classifier.compute_similarity(&json!(0.5), &json!(0.5)), 1.0);
        // Int/float mix compares by numeric value, not type.
        assert_eq!(classifier.compute_similarity(&json!(1), &json!(1.0)), 1.0);
        let close = classifier.compute_similarity(&json!(10), &json!(11));
        assert!(close > 0.9 && close < 1.0);
    }

    #[test]
    fn test_similarity_different_types_zero() {
        let classifier = ConflictClassifier::new();
        assert_eq!(classifier.compute_similarity(&json!("1"), &json!(1)), 0.0);
        assert_eq!(classifier.compute_similarity(&json!([1]), &json!({"a": 1})), 0.0);
    }

    #[test]
    fn test_similarity_bool_different_zero() {
        let classifier = ConflictClassifier::new();
        assert_eq!(classifier.compute_similarity(&json!(true), &json!(false)), 0.0);
    }

    #[test]
    fn test_single_char_strings() {
        let classifier = ConflictClassifier::new();
        assert_eq!(classifier.compute_similarity(&json!("a"), &json!("b")), 0.0);
        assert_eq!(classifier.compute_similarity(&json!("a"), &json!("a")), 1.0);
    }

    #[test]
    fn test_string_similarity_high_and_low() {
        let classifier = ConflictClassifier::new();
        let high = classifier.compute_similarity(&json!("hello world"), &json!("hello worlds"));
        assert!(high > 0.8);
        let low = classifier.compute_similarity(&json!("hello"), &json!("zzyzx"));
        assert!(low < 0.2);
    }

    #[test]
    fn test_list_multiset_jaccard_counts_duplicates() {
        let classifier = ConflictClassifier::new();
        // [1,1,2] vs [1,2,2]: intersection {1,2} = 2, union {1,1,2,2} = 4.
        let score = classifier.compute_similarity(&json!([1, 1, 2]), &json!([1, 2, 2]));
        assert!((score - 0.5).abs() < 1e-9);

        let partial = classifier.compute_similarity(&json!([1, 2, 3]), &json!([2, 3, 4]));
        assert!((partial - 0.5).abs() < 1e-9);

        assert_eq!(
            classifier.compute_similarity(&json!([1, 2]), &json!([8, 9])),
            0.0
        );
    }

    #[test]
    fn test_empty_vs_nonempty_list() {
        let classifier = ConflictClassifier::new();
        assert_eq!(classifier.compute_similarity(&json!([]), &json!([1])), 0.0);
        assert_eq!(classifier.compute_similarity(&json!([]), &json!([])), 1.0);
    }

    #[test]
    fn test_dict_partial_overlap() {
        let classifier = ConflictClassifier::new();
        let score =
            classifier.compute_similarity(&json!({"a": 1, "b": 2}), &json!({"a": 1, "c": 3}));
        assert!(score > 0.0 && score < 1.0);
    }

    #[test]
    fn test_deeply_nested_unequal_dicts_never_identical() {
        let classifier = ConflictClassifier::new();
        let mut a = json!({"leaf": "x"});
        let mut b = json!({"leaf": "y"});
        for i in 0..12 {
            let mut wrapped_a = Map::new();
            wrapped_a.insert(format!("level{i}"), a);
            a = Value::Object(wrapped_a);
            let mut wrapped_b = Map::new();
            wrapped_b.insert(format!("level{i}"), b);
            b = Value::Object(wrapped_b);
        }
        let score = classifier.compute_similarity(&a, &b);
        assert!(score < 0.99, "deeply nested dicts converged to {score}");
    }

    #[test]
    fn test_recommend_identical_returns_first() {
        let classifier = ConflictClassifier::new();
        let value = json!({"k": 1});
        let values = agents(&[value.clone(), value.clone()]);
        let details = classifier.classify(&value, &values).unwrap();
        let resolution = classifier.recommend_resolution(&details, &values).unwrap();
        assert_eq!(resolution.value, value);
        assert!(resolution.is_auto_resolvable);
    }

    #[test]
    fn test_recommend_orthogonal_merges_disjoint() {
        let classifier = ConflictClassifier::new();
        let base = json!({"a": 1, "b": 2});
        let values = agents(&[json!({"a": 10}), json!({"b": 20})]);
        let details = classifier.classify(&base, &values).unwrap();
        assert_eq!(details.conflict_type, ConflictType::Orthogonal);

        let resolution = classifier.recommend_resolution(&details, &values).unwrap();
        assert_eq!(resolution.value, json!({"a": 10, "b": 20}));
    }

    #[test]
    fn test_recommend_orthogonal_overlap_names_agents() {
        let classifier = ConflictClassifier::new();
        let details = ConflictDetails {
            conflict_type: ConflictType::Orthogonal,
            similarity_score: 0.4,
            confidence: 0.9,
            affected_fields: vec!["k".to_string()],
            structural_similarity: Some(1.0),
            explanation: String::new(),
        };
        let values = vec![
            ("alpha".to_string(), json!({"k": 1})),
            ("beta".to_string(), json!({"k": 2})),
        ];
        let err = classifier.recommend_resolution(&details, &values).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("alpha") && message.contains("beta"));
    }

    #[test]
    fn test_recommend_orthogonal_non_dict_returns_first() {
        let classifier = ConflictClassifier::new();
        let details = ConflictDetails {
            conflict_type: ConflictType::Orthogonal,
            similarity_score: 0.4,
            confidence: 0.9,
            affected_fields: Vec::new(),
            structural_similarity: None,
            explanation: String::new(),
        };
        let values = agents(&[json!("left"), json!("right")]);
        let resolution = classifier.recommend_resolution(&details, &values).unwrap();
        assert_eq!(resolution.value, json!("left"));
    }

    #[test]
    fn test_recommend_conflicting_not_auto_resolvable() {
        let classifier = ConflictClassifier::new();
        let details = ConflictDetails {
            conflict_type: ConflictType::Conflicting,
            similarity_score: 0.6,
            confidence: 0.7,
            affected_fields: Vec::new(),
            structural_similarity: None,
            explanation: String::new(),
        };
        let values = agents(&[json!(1), json!(2)]);
        let resolution = classifier.recommend_resolution(&details, &values).unwrap();
        assert!(!resolution.is_auto_resolvable);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn scalar_value() -> impl Strategy<Value = Value> {
            prop_oneof![
                any::<bool>().prop_map(Value::from),
                any::<i32>().prop_map(Value::from),
                "[a-z]{0,8}".prop_map(Value::from),
            ]
        }

        proptest! {
            #[test]
            fn prop_similarity_symmetric_and_bounded(
                a in scalar_value(),
                b in scalar_value(),
            ) {
                let classifier = ConflictClassifier::new();
                let ab = classifier.compute_similarity(&a, &b);
                let ba = classifier.compute_similarity(&b, &a);
                prop_assert!((0.0..=1.0).contains(&ab));
                prop_assert!((ab - ba).abs() < 1e-12);
            }

            #[test]
            fn prop_equal_values_score_one(a in scalar_value()) {
                let classifier = ConflictClassifier::new();
                prop_assert_eq!(classifier.compute_similarity(&a, &a), 1.0);
            }
        }
    }

    #[test]
    fn test_recommend_opposite_requires_human() {
        let classifier = ConflictClassifier::new();
        for conflict_type in [ConflictType::Opposite, ConflictType::Ambiguous] {
            let details = ConflictDetails {
                conflict_type,
                similarity_score: 0.0,
                confidence: 0.95,
                affected_fields: Vec::new(),
                structural_similarity: None,
                explanation: String::new(),
            };
            let values = agents(&[json!(true), json!(false)]);
            let err = classifier.recommend_resolution(&details, &values).unwrap_err();
            assert!(err.to_string().contains("human approval required"));
        }
    }
}
