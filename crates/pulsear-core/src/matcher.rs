//! Identity resolution against a registry snapshot.
//!
//! Fixed policy: an identity's score is the minimum distance across all of
//! its reference embeddings, an identity is a candidate when that minimum
//! is below the configured threshold, and the closest candidate wins.
//! Exactly equal distances break to the first-encountered entry in snapshot
//! order — deterministic, but not meaningful with real embeddings.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorKind;
use crate::registry::RegistrySnapshot;
use crate::types::{Embedding, PatientId};

/// Distance metric used to compare embeddings. Both are expressed as
/// distances (smaller is closer) so a single "below threshold" reading
/// covers either choice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// L2 distance; 0.6 is the customary threshold for 128-d encodings.
    #[default]
    Euclidean,
    /// Cosine distance (1 − cosine similarity).
    Cosine,
}

impl std::str::FromStr for DistanceMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "euclidean" | "l2" => Ok(DistanceMetric::Euclidean),
            "cosine" => Ok(DistanceMetric::Cosine),
            other => Err(format!("unknown distance metric: {other}")),
        }
    }
}

/// Matching parameters. The threshold is deliberately configuration, not a
/// constant buried in the match loop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MatchConfig {
    pub metric: DistanceMetric,
    pub threshold: f32,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            metric: DistanceMetric::Euclidean,
            threshold: 0.6,
        }
    }
}

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("query embedding is empty")]
    EmptyQuery,
    #[error("query embedding has {got} dimensions, registry uses {expected}")]
    DimensionMismatch { expected: usize, got: usize },
}

impl MatchError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidInput
    }
}

/// The best candidate for a query embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub patient: PatientId,
    pub distance: f32,
}

/// Outcome of identity resolution. An unrecognized face is an expected
/// result, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MatchOutcome {
    Match(MatchCandidate),
    Unknown,
}

impl MatchOutcome {
    pub fn patient(&self) -> Option<&PatientId> {
        match self {
            MatchOutcome::Match(candidate) => Some(&candidate.patient),
            MatchOutcome::Unknown => None,
        }
    }
}

/// Resolve a query embedding against a registry snapshot.
///
/// An empty registry resolves to [`MatchOutcome::Unknown`] for any query;
/// a dimensionality mismatch against a non-empty registry is a contract
/// violation and is rejected rather than truncated or padded.
pub fn resolve(
    query: &Embedding,
    snapshot: &RegistrySnapshot,
    config: &MatchConfig,
) -> Result<MatchOutcome, MatchError> {
    if query.dim() == 0 {
        return Err(MatchError::EmptyQuery);
    }

    let Some(expected) = snapshot.dim() else {
        return Ok(MatchOutcome::Unknown);
    };
    if query.dim() != expected {
        return Err(MatchError::DimensionMismatch {
            expected,
            got: query.dim(),
        });
    }

    let mut best: Option<MatchCandidate> = None;

    // Always scan the full snapshot; strict `<` keeps the first-encountered
    // entry on exact ties.
    for entry in snapshot.entries() {
        let distance = entry
            .embeddings
            .iter()
            .map(|reference| match config.metric {
                DistanceMetric::Euclidean => query.euclidean_distance(reference),
                DistanceMetric::Cosine => query.cosine_distance(reference),
            })
            .fold(f32::INFINITY, f32::min);

        if distance >= config.threshold {
            continue;
        }
        let closer = match &best {
            None => true,
            Some(current) => distance < current.distance,
        };
        if closer {
            best = Some(MatchCandidate {
                patient: entry.patient.clone(),
                distance,
            });
        }
    }

    match best {
        Some(candidate) => {
            tracing::debug!(
                patient = %candidate.patient,
                distance = candidate.distance,
                "query matched"
            );
            Ok(MatchOutcome::Match(candidate))
        }
        None => Ok(MatchOutcome::Unknown),
    }
}
