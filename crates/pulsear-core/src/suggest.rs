//! Suggestion derivation.
//!
//! Tier 1 is the deterministic rule table ([`RuleSet`]). Tier 2 delegates
//! to an external generative-text capability for personalized phrasing when
//! the rules only produced the generic default and the profile carries
//! free-form notes no rule encodes. The external call is bounded by a
//! timeout and retried once; if it still fails, the deterministic default
//! is returned. A caller always gets a suggestion.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::rules::RuleSet;
use crate::types::{HealthSignals, MedicalProfile, Suggestion, SuggestionSource};

/// Advice of last resort, and the degradation target when the generative
/// tier is unavailable.
pub const DEFAULT_ADVICE: &str = "Monitor patient and reassess.";

const RETRY_BACKOFF: Duration = Duration::from_millis(250);
const DEFAULT_GENERATE_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_NOTES_CHARS: usize = 2000;

#[derive(Error, Debug)]
pub enum GenerateError {
    #[error("generative service timed out after {0:?}")]
    Timeout(Duration),
    #[error("generative service unreachable: {0}")]
    Transport(String),
    #[error("generative service returned {status}: {message}")]
    Service { status: u16, message: String },
    #[error("generative service returned no text")]
    EmptyResponse,
}

impl GenerateError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::UpstreamUnavailable
    }
}

/// Opaque generative-text capability: prompt plus optional JPEG bytes in,
/// text out. May fail or stall; the engine owns the deadline.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        image_jpeg: Option<&[u8]>,
    ) -> Result<String, GenerateError>;
}

/// Two-tier suggestion engine.
pub struct SuggestionEngine {
    rules: RuleSet,
    generator: Option<Arc<dyn TextGenerator>>,
    generate_timeout: Duration,
}

impl SuggestionEngine {
    pub fn new(rules: RuleSet) -> Self {
        Self {
            rules,
            generator: None,
            generate_timeout: DEFAULT_GENERATE_TIMEOUT,
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_generate_timeout(mut self, timeout: Duration) -> Self {
        self.generate_timeout = timeout;
        self
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Derive a suggestion from a profile and observed cues.
    pub async fn suggest(
        &self,
        profile: Option<&MedicalProfile>,
        signals: Option<&HealthSignals>,
    ) -> Suggestion {
        self.suggest_with_scene(profile, signals, None).await
    }

    /// Like [`suggest`](Self::suggest), with an optional scene photo the
    /// generative tier may use for visible health cues.
    pub async fn suggest_with_scene(
        &self,
        profile: Option<&MedicalProfile>,
        signals: Option<&HealthSignals>,
        scene_jpeg: Option<&[u8]>,
    ) -> Suggestion {
        let matched = self.rules.evaluate(profile, signals);
        let (advice, source, personalizable) = match matched {
            Some(rule) => (
                rule.advice.clone(),
                SuggestionSource::Rule {
                    name: rule.name.clone(),
                },
                rule.is_catch_all(),
            ),
            // A custom table without a catch-all missed entirely; fall back
            // to the built-in default text.
            None => (DEFAULT_ADVICE.to_string(), SuggestionSource::Fallback, true),
        };

        // Tier 2 only refines the generic default, and only when the
        // profile carries notes the rule vocabulary does not cover.
        let wants_generative =
            personalizable && profile.map(MedicalProfile::has_notes).unwrap_or(false);

        let (advice, source) = match (&self.generator, wants_generative) {
            (Some(generator), true) => {
                let prompt = build_prompt(profile, signals);
                match self
                    .generate_with_retry(generator.as_ref(), &prompt, scene_jpeg)
                    .await
                {
                    Some(text) => (text, SuggestionSource::Generative),
                    None => (advice, SuggestionSource::Fallback),
                }
            }
            _ => (advice, source),
        };

        Suggestion {
            id: Uuid::new_v4(),
            patient: None,
            advice,
            source,
            conditions: profile
                .map(|p| p.conditions.iter().cloned().collect())
                .unwrap_or_default(),
            signals: signals.cloned().unwrap_or_default(),
            created_at: Utc::now(),
        }
    }

    /// One attempt plus one retry after a short backoff. Failure degrades
    /// to `None`; it is never surfaced to the caller.
    async fn generate_with_retry(
        &self,
        generator: &dyn TextGenerator,
        prompt: &str,
        scene_jpeg: Option<&[u8]>,
    ) -> Option<String> {
        for attempt in 0..2 {
            if attempt > 0 {
                tokio::time::sleep(RETRY_BACKOFF).await;
            }
            match self.generate_once(generator, prompt, scene_jpeg).await {
                Ok(text) => return Some(text),
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        kind = %err.kind(),
                        attempt,
                        "generative tier failed"
                    );
                }
            }
        }
        None
    }

    async fn generate_once(
        &self,
        generator: &dyn TextGenerator,
        prompt: &str,
        scene_jpeg: Option<&[u8]>,
    ) -> Result<String, GenerateError> {
        let result = tokio::time::timeout(
            self.generate_timeout,
            generator.generate(prompt, scene_jpeg),
        )
        .await
        .map_err(|_| GenerateError::Timeout(self.generate_timeout))??;

        let text = result.trim();
        if text.is_empty() {
            return Err(GenerateError::EmptyResponse);
        }
        Ok(text.to_string())
    }
}

/// Bounded prompt for the generative tier. Notes are clipped so a bloated
/// profile cannot blow up the request.
fn build_prompt(profile: Option<&MedicalProfile>, signals: Option<&HealthSignals>) -> String {
    let mut prompt = String::from(
        "You are a medical assistant for a first responder. Based on the \
         following information, give one short, actionable suggestion telling \
         a bystander with no medical training how to help this person until \
         first responders arrive.\n",
    );

    if let Some(profile) = profile {
        if !profile.conditions.is_empty() {
            prompt.push_str("\nKnown conditions: ");
            push_joined(&mut prompt, profile.conditions.iter());
        }
        if !profile.allergies.is_empty() {
            prompt.push_str("\nAllergies: ");
            push_joined(&mut prompt, profile.allergies.iter());
        }
        if profile.has_notes() {
            prompt.push_str("\nNotes: ");
            prompt.extend(profile.notes.chars().take(MAX_NOTES_CHARS));
        }
    }

    if let Some(signals) = signals {
        if !signals.is_empty() {
            prompt.push_str("\nObserved cues: ");
            let mut first = true;
            for (name, value) in signals.iter() {
                if !first {
                    prompt.push_str(", ");
                }
                first = false;
                prompt.push_str(name);
                prompt.push('=');
                prompt.push_str(if value { "true" } else { "false" });
            }
        }
    }

    prompt.push_str(
        "\n\nIf a photo is attached it shows the person's visible state; use \
         it. Answer in very few words, suitable for an AR lens overlay.",
    );
    prompt
}

fn push_joined<'a>(out: &mut String, mut items: impl Iterator<Item = &'a String>) {
    if let Some(first) = items.next() {
        out.push_str(first);
    }
    for item in items {
        out.push_str(", ");
        out.push_str(item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CannedGenerator {
        reply: &'static str,
        calls: AtomicUsize,
    }

    impl CannedGenerator {
        fn new(reply: &'static str) -> Self {
            Self {
                reply,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TextGenerator for CannedGenerator {
        async fn generate(
            &self,
            _prompt: &str,
            _image_jpeg: Option<&[u8]>,
        ) -> Result<String, GenerateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.to_string())
        }
    }

    struct FailingGenerator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TextGenerator for FailingGenerator {
        async fn generate(
            &self,
            _prompt: &str,
            _image_jpeg: Option<&[u8]>,
        ) -> Result<String, GenerateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(GenerateError::Transport("connection refused".into()))
        }
    }

    struct StalledGenerator;

    #[async_trait]
    impl TextGenerator for StalledGenerator {
        async fn generate(
            &self,
            _prompt: &str,
            _image_jpeg: Option<&[u8]>,
        ) -> Result<String, GenerateError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("too late".to_string())
        }
    }

    fn profile_with_notes(conditions: &[&str], notes: &str) -> MedicalProfile {
        MedicalProfile {
            conditions: conditions.iter().map(|c| c.to_string()).collect(),
            allergies: Default::default(),
            notes: notes.to_string(),
        }
    }

    #[tokio::test]
    async fn test_rule_match_skips_generative_tier() {
        let generator = Arc::new(CannedGenerator::new("should not be used"));
        let engine =
            SuggestionEngine::new(RuleSet::builtin().clone()).with_generator(generator.clone());

        let profile = profile_with_notes(&["Diabetes"], "lives alone, insulin in fridge");
        let signals = HealthSignals::new().with(HealthSignals::CONSCIOUS, false);

        let suggestion = engine.suggest(Some(&profile), Some(&signals)).await;
        assert_eq!(suggestion.advice, "Check blood sugar levels urgently.");
        assert_eq!(
            suggestion.source,
            SuggestionSource::Rule {
                name: "diabetic-collapse".into()
            }
        );
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_notes_trigger_generative_personalization() {
        let generator = Arc::new(CannedGenerator::new("Give them their juice box."));
        let engine =
            SuggestionEngine::new(RuleSet::builtin().clone()).with_generator(generator.clone());

        let profile = profile_with_notes(&[], "severe hypoglycemia history, keeps juice in bag");
        let suggestion = engine.suggest(Some(&profile), None).await;

        assert_eq!(suggestion.advice, "Give them their juice box.");
        assert_eq!(suggestion.source, SuggestionSource::Generative);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_default_without_notes_stays_deterministic() {
        let generator = Arc::new(CannedGenerator::new("should not be used"));
        let engine =
            SuggestionEngine::new(RuleSet::builtin().clone()).with_generator(generator.clone());

        let suggestion = engine.suggest(None, None).await;
        assert_eq!(suggestion.advice, DEFAULT_ADVICE);
        assert_eq!(
            suggestion.source,
            SuggestionSource::Rule {
                name: "default".into()
            }
        );
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failure_retries_once_then_degrades() {
        let generator = Arc::new(FailingGenerator {
            calls: AtomicUsize::new(0),
        });
        let engine =
            SuggestionEngine::new(RuleSet::builtin().clone()).with_generator(generator.clone());

        let profile = profile_with_notes(&[], "complex cardiac history");
        let suggestion = engine.suggest(Some(&profile), None).await;

        assert_eq!(suggestion.advice, DEFAULT_ADVICE);
        assert_eq!(suggestion.source, SuggestionSource::Fallback);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_degrades_to_default() {
        let engine = SuggestionEngine::new(RuleSet::builtin().clone())
            .with_generator(Arc::new(StalledGenerator))
            .with_generate_timeout(Duration::from_millis(50));

        let profile = profile_with_notes(&[], "long free-form history");
        let suggestion = engine.suggest(Some(&profile), None).await;

        assert!(!suggestion.advice.is_empty());
        assert_eq!(suggestion.advice, DEFAULT_ADVICE);
        assert_eq!(suggestion.source, SuggestionSource::Fallback);
    }

    #[tokio::test]
    async fn test_no_generator_configured() {
        let engine = SuggestionEngine::new(RuleSet::builtin().clone());
        let profile = profile_with_notes(&[], "anything at all");
        let suggestion = engine.suggest(Some(&profile), None).await;
        assert_eq!(suggestion.advice, DEFAULT_ADVICE);
    }

    #[tokio::test]
    async fn test_suggestion_echoes_inputs() {
        let engine = SuggestionEngine::new(RuleSet::builtin().clone());
        let profile = profile_with_notes(&["Diabetes", "Hypertension"], "");
        let signals = HealthSignals::new().with(HealthSignals::BLEEDING, true);

        let suggestion = engine.suggest(Some(&profile), Some(&signals)).await;
        assert_eq!(suggestion.conditions, vec!["Diabetes", "Hypertension"]);
        assert_eq!(suggestion.signals.get(HealthSignals::BLEEDING), Some(true));
        assert!(suggestion.patient.is_none());
    }

    #[test]
    fn test_prompt_is_bounded() {
        let profile = profile_with_notes(&["Diabetes"], &"x".repeat(100_000));
        let prompt = build_prompt(Some(&profile), None);
        assert!(prompt.len() < MAX_NOTES_CHARS + 1000);
        assert!(prompt.contains("Known conditions: Diabetes"));
    }

    #[test]
    fn test_prompt_lists_cues() {
        let signals = HealthSignals::new()
            .with(HealthSignals::BLEEDING, true)
            .with(HealthSignals::CONSCIOUS, false);
        let prompt = build_prompt(None, Some(&signals));
        assert!(prompt.contains("bleeding_detected=true"));
        assert!(prompt.contains("conscious=false"));
    }
}
