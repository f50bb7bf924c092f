//! pulsear-core — patient identification and suggestion derivation.
//!
//! Resolves a face embedding against a registry of known patients, then
//! derives an actionable first-aid suggestion from the matched patient's
//! medical profile and the cues observed at the scene. Everything with I/O
//! attached (embedding extraction, storage, the generative-text service)
//! lives behind traits; this crate is the decision logic.

pub mod engine;
pub mod error;
pub mod matcher;
pub mod registry;
pub mod rules;
pub mod suggest;
pub mod types;

pub use engine::{
    spawn_periodic_reload, Analysis, EngineError, ProfileStore, PulseEngine, RegistrySource,
    ReloadOutcome, SourceError,
};
pub use error::ErrorKind;
pub use matcher::{DistanceMetric, MatchCandidate, MatchConfig, MatchError, MatchOutcome};
pub use registry::{LoadError, PatientRegistry, RegistryEntry, RegistrySnapshot};
pub use rules::{Rule, RuleSet, RulesError};
pub use suggest::{GenerateError, SuggestionEngine, TextGenerator, DEFAULT_ADVICE};
pub use types::{Embedding, HealthSignals, MedicalProfile, PatientId, Suggestion, SuggestionSource};
