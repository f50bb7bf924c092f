//! Patient registry — known identities and their reference embeddings.
//!
//! The registry is read-mostly shared state. A load builds a complete new
//! [`RegistrySnapshot`] off to the side, validates it, and installs it with
//! a single `Arc` swap, so concurrent readers always observe either the
//! fully-old or the fully-new snapshot. Nothing is ever mutated in place.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use crate::error::ErrorKind;
use crate::types::{Embedding, PatientId};

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("patient {patient}: embedding has {got} dimensions, registry uses {expected}")]
    DimensionMismatch {
        patient: PatientId,
        expected: usize,
        got: usize,
    },
    #[error("patient {0} appears more than once in the load set")]
    DuplicateIdentity(PatientId),
    #[error("patient {0} has no reference embeddings")]
    EmptyEntry(PatientId),
}

impl LoadError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::LoadError
    }
}

/// One known identity with all of its reference embeddings.
///
/// Every reference photo's embedding is retained; matching takes the minimum
/// distance across them, which maximizes recall for patients with several
/// stored photos.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub patient: PatientId,
    pub embeddings: Vec<Embedding>,
}

/// Immutable view of the registry at one point in time.
///
/// Iteration order is the load order of the entries. It is deterministic
/// but carries no meaning; it only serves as the tie-break for exactly
/// equal match distances.
#[derive(Debug)]
pub struct RegistrySnapshot {
    dim: Option<usize>,
    entries: Vec<RegistryEntry>,
}

impl RegistrySnapshot {
    pub fn empty() -> Self {
        Self {
            dim: None,
            entries: Vec::new(),
        }
    }

    /// Build and validate a snapshot from raw entries.
    ///
    /// The embedding dimensionality of the whole snapshot is fixed by the
    /// first vector seen; any vector disagreeing with it rejects the load.
    pub fn build(raw: Vec<(PatientId, Vec<Embedding>)>) -> Result<Self, LoadError> {
        let mut seen: BTreeSet<PatientId> = BTreeSet::new();
        let mut dim: Option<usize> = None;
        let mut entries = Vec::with_capacity(raw.len());

        for (patient, embeddings) in raw {
            if !seen.insert(patient.clone()) {
                return Err(LoadError::DuplicateIdentity(patient));
            }
            if embeddings.is_empty() {
                return Err(LoadError::EmptyEntry(patient));
            }
            for embedding in &embeddings {
                match dim {
                    None => dim = Some(embedding.dim()),
                    Some(expected) if embedding.dim() != expected => {
                        return Err(LoadError::DimensionMismatch {
                            patient,
                            expected,
                            got: embedding.dim(),
                        });
                    }
                    Some(_) => {}
                }
            }
            entries.push(RegistryEntry {
                patient,
                embeddings,
            });
        }

        Ok(Self { dim, entries })
    }

    /// Embedding dimensionality of this snapshot, `None` while empty.
    pub fn dim(&self) -> Option<usize> {
        self.dim
    }

    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Shared, atomically replaceable registry of known patients.
///
/// Created empty at process start and populated by one initial load; may be
/// reloaded on demand with the same all-or-nothing contract. A rejected
/// load leaves the previous snapshot active.
pub struct PatientRegistry {
    current: RwLock<Arc<RegistrySnapshot>>,
}

impl PatientRegistry {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(RegistrySnapshot::empty())),
        }
    }

    /// Replace the entire registry. Validation happens before the swap, so
    /// a failed load is never observable.
    pub fn load(&self, entries: Vec<(PatientId, Vec<Embedding>)>) -> Result<(), LoadError> {
        let snapshot = Arc::new(RegistrySnapshot::build(entries)?);
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = snapshot;
        Ok(())
    }

    /// Cheap handle to the current snapshot. Readers never block each other
    /// or a concurrent load; they keep the snapshot they grabbed alive for
    /// as long as they hold the `Arc`.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Read-only copy of the current entries.
    pub fn all_entries(&self) -> Vec<RegistryEntry> {
        self.snapshot().entries().to_vec()
    }
}

impl Default for PatientRegistry {
    fn default() -> Self {
        Self::new()
    }
}
