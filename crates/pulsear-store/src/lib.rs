//! JSON-file patient store.
//!
//! One file holds the full patient collection in the shape the upstream
//! registration tool writes: an array of documents with `patient_id`,
//! reference `embeddings`, and a `medical_history` block. The same file
//! backs both collaborator seams of the core — the registry source and the
//! profile store.
//!
//! Per-document problems (missing id, no embeddings) are logged and
//! skipped; structural validation of the resulting entry set (consistent
//! dimensionality, unique identities) is the registry's job at load time.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;

use pulsear_core::{
    Embedding, MedicalProfile, PatientId, ProfileStore, RegistrySource, SourceError,
};

/// One patient document as stored on disk.
#[derive(Debug, Deserialize)]
struct PatientDocument {
    #[serde(default)]
    patient_id: Option<String>,
    #[serde(default)]
    embeddings: Vec<Embedding>,
    #[serde(default)]
    medical_history: MedicalProfile,
}

/// File-backed patient collection.
///
/// The file is re-read on every call, so an external process can rewrite it
/// and the next registry reload picks the change up without coordination.
pub struct JsonPatientStore {
    path: PathBuf,
}

impl JsonPatientStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_documents(&self) -> Result<Vec<PatientDocument>, SourceError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| SourceError::Io(format!("{}: {e}", self.path.display())))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| SourceError::Malformed(format!("{}: {e}", self.path.display())))
    }
}

#[async_trait]
impl RegistrySource for JsonPatientStore {
    async fn load_entries(&self) -> Result<Vec<(PatientId, Vec<Embedding>)>, SourceError> {
        let documents = self.read_documents().await?;
        let total = documents.len();

        let mut entries = Vec::with_capacity(total);
        for document in documents {
            let Some(id) = document.patient_id.filter(|id| !id.is_empty()) else {
                tracing::warn!("skipping patient document without an id");
                continue;
            };
            if document.embeddings.is_empty() {
                tracing::warn!(patient = %id, "skipping patient without reference embeddings");
                continue;
            }
            entries.push((PatientId::from(id), document.embeddings));
        }

        tracing::debug!(
            path = %self.path.display(),
            loaded = entries.len(),
            skipped = total - entries.len(),
            "read patient documents"
        );
        Ok(entries)
    }
}

#[async_trait]
impl ProfileStore for JsonPatientStore {
    async fn fetch(&self, patient: &PatientId) -> Result<Option<MedicalProfile>, SourceError> {
        let documents = self.read_documents().await?;
        Ok(documents
            .into_iter()
            .find(|d| d.patient_id.as_deref() == Some(patient.as_str()))
            .map(|d| d.medical_history))
    }
}
