//! Engine facade — the two core operations plus the combined analyze flow,
//! wired to the external collaborators (registry source, profile store,
//! generative capability) through traits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::error::ErrorKind;
use crate::matcher::{self, MatchConfig, MatchError, MatchOutcome};
use crate::registry::{LoadError, PatientRegistry, RegistryEntry};
use crate::suggest::SuggestionEngine;
use crate::types::{Embedding, HealthSignals, MedicalProfile, PatientId, Suggestion};

/// Failure inside an external data collaborator.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("source i/o: {0}")]
    Io(String),
    #[error("source data malformed: {0}")]
    Malformed(String),
    #[error("source unavailable: {0}")]
    Unavailable(String),
}

impl SourceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SourceError::Unavailable(_) => ErrorKind::UpstreamUnavailable,
            SourceError::Io(_) | SourceError::Malformed(_) => ErrorKind::LoadError,
        }
    }
}

/// Provider of the full registry content on (re)load.
#[async_trait]
pub trait RegistrySource: Send + Sync {
    async fn load_entries(&self) -> Result<Vec<(PatientId, Vec<Embedding>)>, SourceError>;
}

/// Lookup of one patient's medical profile.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn fetch(&self, patient: &PatientId) -> Result<Option<MedicalProfile>, SourceError>;
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Match(#[from] MatchError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Source(e) => e.kind(),
            EngineError::Load(e) => e.kind(),
            EngineError::Match(e) => e.kind(),
        }
    }
}

/// Result of a registry reload request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    Completed { patients: usize },
    /// Another reload was already in flight; this request was dropped, not
    /// queued.
    Skipped,
}

/// Combined result of the analyze flow: who it is, what we know about them,
/// and what to do.
#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    #[serde(flatten)]
    pub outcome: MatchOutcome,
    pub profile: Option<MedicalProfile>,
    pub suggestion: Suggestion,
}

/// The core's caller-facing surface.
pub struct PulseEngine {
    registry: PatientRegistry,
    match_config: MatchConfig,
    suggester: SuggestionEngine,
    registry_source: Arc<dyn RegistrySource>,
    profiles: Arc<dyn ProfileStore>,
    reload_in_flight: AtomicBool,
}

impl PulseEngine {
    /// Build the engine and perform the initial registry load.
    pub async fn bootstrap(
        registry_source: Arc<dyn RegistrySource>,
        profiles: Arc<dyn ProfileStore>,
        match_config: MatchConfig,
        suggester: SuggestionEngine,
    ) -> Result<Self, EngineError> {
        let engine = Self {
            registry: PatientRegistry::new(),
            match_config,
            suggester,
            registry_source,
            profiles,
            reload_in_flight: AtomicBool::new(false),
        };

        let entries = engine.registry_source.load_entries().await?;
        engine.registry.load(entries)?;
        tracing::info!(
            patients = engine.registry.snapshot().len(),
            "registry loaded"
        );
        Ok(engine)
    }

    /// Resolve a face embedding to a known patient, or `Unknown`.
    pub fn resolve_identity(&self, query: &Embedding) -> Result<MatchOutcome, MatchError> {
        let snapshot = self.registry.snapshot();
        matcher::resolve(query, &snapshot, &self.match_config)
    }

    /// Derive a suggestion from an already-fetched profile and observed cues.
    pub async fn derive_suggestion(
        &self,
        profile: Option<&MedicalProfile>,
        signals: Option<&HealthSignals>,
    ) -> Suggestion {
        self.suggester.suggest(profile, signals).await
    }

    /// Full flow for one snapshot: resolve the identity, fetch the matched
    /// patient's profile, derive a suggestion.
    ///
    /// A profile-store failure is degraded to "no profile on hand" — the
    /// bystander still gets a suggestion from the cues alone.
    pub async fn analyze(
        &self,
        query: &Embedding,
        signals: Option<&HealthSignals>,
        scene_jpeg: Option<&[u8]>,
    ) -> Result<Analysis, MatchError> {
        let outcome = self.resolve_identity(query)?;

        let profile = match outcome.patient() {
            Some(patient) => match self.profiles.fetch(patient).await {
                Ok(profile) => {
                    if profile.is_none() {
                        tracing::debug!(%patient, "no profile on record");
                    }
                    profile
                }
                Err(err) => {
                    tracing::warn!(%patient, error = %err, "profile store failed; continuing without profile");
                    None
                }
            },
            None => None,
        };

        let mut suggestion = self
            .suggester
            .suggest_with_scene(profile.as_ref(), signals, scene_jpeg)
            .await;
        suggestion.patient = outcome.patient().cloned();

        Ok(Analysis {
            outcome,
            profile,
            suggestion,
        })
    }

    /// Re-pull the registry from its source and atomically install it.
    ///
    /// At most one reload runs at a time; a request arriving while one is
    /// in flight is skipped. A rejected load keeps the prior snapshot.
    pub async fn reload_registry(&self) -> Result<ReloadOutcome, EngineError> {
        if self
            .reload_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("registry reload already in flight; skipping");
            return Ok(ReloadOutcome::Skipped);
        }

        let result: Result<ReloadOutcome, EngineError> = async {
            let entries = self.registry_source.load_entries().await?;
            self.registry.load(entries)?;
            let patients = self.registry.snapshot().len();
            tracing::info!(patients, "registry reloaded");
            Ok(ReloadOutcome::Completed { patients })
        }
        .await;

        self.reload_in_flight.store(false, Ordering::Release);

        if let Err(err) = &result {
            tracing::warn!(error = %err, kind = %err.kind(), "registry reload rejected; prior snapshot retained");
        }
        result
    }

    /// Read-only copy of the currently loaded registry entries.
    pub fn registry_entries(&self) -> Vec<RegistryEntry> {
        self.registry.all_entries()
    }

    pub fn match_config(&self) -> &MatchConfig {
        &self.match_config
    }
}

/// Spawn a periodic registry refresh.
///
/// One scheduled task; a tick that lands while a reload is still running is
/// skipped rather than queued, so reloads never overlap. Reload failures
/// are logged and the prior snapshot keeps serving.
pub fn spawn_periodic_reload(
    engine: Arc<PulseEngine>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; the engine was already
        // loaded at bootstrap.
        interval.tick().await;
        loop {
            interval.tick().await;
            // Rejections are logged inside reload_registry.
            let _ = engine.reload_registry().await;
        }
    })
}
