use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque unique patient identifier.
///
/// Assigned when a registry entry is loaded and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatientId(String);

impl PatientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PatientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PatientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PatientId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Face embedding vector (dimensionality fixed by the external extractor,
/// e.g. 128 for dlib-style encodings).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean (L2) distance to another embedding of the same dimension.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Cosine distance (1 − cosine similarity), so that smaller is closer
    /// for both supported metrics. Zero-norm inputs compare as maximally
    /// distant rather than dividing by zero.
    pub fn cosine_distance(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            1.0 - dot / denom
        } else {
            1.0
        }
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self { values }
    }
}

/// Structured medical history for one patient. Owned by external storage;
/// the core treats it as read-only input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MedicalProfile {
    #[serde(default)]
    pub conditions: BTreeSet<String>,
    #[serde(default)]
    pub allergies: BTreeSet<String>,
    #[serde(default)]
    pub notes: String,
}

impl MedicalProfile {
    pub fn has_notes(&self) -> bool {
        !self.notes.trim().is_empty()
    }
}

/// Named boolean health cues observed at the scene, supplied per request
/// and never persisted by the core.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HealthSignals(BTreeMap<String, bool>);

impl HealthSignals {
    /// Cue names produced by the upstream visual analyzer.
    pub const CYANOSIS: &'static str = "cyanosis_detected";
    pub const BLEEDING: &'static str = "bleeding_detected";
    pub const CONSCIOUS: &'static str = "conscious";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: bool) -> Self {
        self.0.insert(name.into(), value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: bool) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<bool> {
        self.0.get(name).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// Which tier produced a suggestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tier", rename_all = "snake_case")]
pub enum SuggestionSource {
    /// Deterministic rule tier; `name` is the matching rule.
    Rule { name: String },
    /// Generative-text tier.
    Generative,
    /// Generative tier failed or timed out; deterministic default used.
    Fallback,
}

/// An actionable recommendation together with the inputs that produced it.
///
/// Ephemeral output — the core never persists it, but it carries enough
/// context (identity, conditions, signals, timestamp) to be audited by the
/// caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: Uuid,
    /// Resolved patient, when the suggestion was derived for a known identity.
    pub patient: Option<PatientId>,
    pub advice: String,
    pub source: SuggestionSource,
    /// Profile conditions considered while deriving the advice.
    pub conditions: Vec<String>,
    /// Observed cues considered while deriving the advice.
    pub signals: HealthSignals,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance_identical() {
        let a = Embedding::new(vec![1.0, 2.0, 3.0]);
        assert_eq!(a.euclidean_distance(&a.clone()), 0.0);
    }

    #[test]
    fn test_euclidean_distance_unit_apart() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_distance_identical() {
        let a = Embedding::new(vec![1.0, 0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert!(a.cosine_distance(&b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_distance_orthogonal() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![0.0, 1.0]);
        assert!((a.cosine_distance(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_distance_zero_vector() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0]);
        assert_eq!(a.cosine_distance(&b), 1.0);
    }

    #[test]
    fn test_signals_roundtrip() {
        let signals = HealthSignals::new()
            .with(HealthSignals::BLEEDING, true)
            .with(HealthSignals::CONSCIOUS, false);
        assert_eq!(signals.get("bleeding_detected"), Some(true));
        assert_eq!(signals.get("conscious"), Some(false));
        assert_eq!(signals.get("cyanosis_detected"), None);
    }

    #[test]
    fn test_embedding_serde_is_bare_array() {
        let e = Embedding::new(vec![0.5, -1.0]);
        let json = serde_json::to_string(&e).unwrap();
        assert_eq!(json, "[0.5,-1.0]");
        let back: Embedding = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }
}
