use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use pulsear_core::{
    Embedding, HealthSignals, MedicalProfile, PatientId, ProfileStore, PulseEngine, RuleSet,
    SuggestionEngine,
};
use pulsear_genai::{GeminiClient, GeminiConfig};
use pulsear_store::JsonPatientStore;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "pulsear", about = "PulseAR patient identification and first-aid suggestion CLI")]
struct Cli {
    /// Patients JSON file (overrides PULSEAR_PATIENTS_PATH).
    #[arg(long, global = true)]
    patients: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a face embedding against the patient registry
    Resolve {
        /// JSON file holding one embedding as a float array
        #[arg(long)]
        embedding: PathBuf,
    },
    /// Derive a suggestion for a patient or an ad-hoc profile
    Suggest {
        /// Patient id to fetch the profile for
        #[arg(long, conflicts_with = "profile")]
        patient: Option<String>,
        /// JSON file holding a medical profile
        #[arg(long)]
        profile: Option<PathBuf>,
        #[command(flatten)]
        scene: SceneArgs,
    },
    /// Resolve an embedding, fetch the profile, and suggest in one pass
    Analyze {
        /// JSON file holding one embedding as a float array
        #[arg(long)]
        embedding: PathBuf,
        #[command(flatten)]
        scene: SceneArgs,
    },
    /// Show the registry entries loaded from the patient file
    Registry,
}

/// Observed-scene inputs shared by `suggest` and `analyze`.
#[derive(Args)]
struct SceneArgs {
    /// Visible bleeding observed
    #[arg(long)]
    bleeding: bool,
    /// Bluish skin discoloration observed
    #[arg(long)]
    cyanosis: bool,
    /// Person is unresponsive
    #[arg(long)]
    unconscious: bool,
    /// Additional observed cue, e.g. --signal seizure=true (repeatable)
    #[arg(long = "signal", value_name = "NAME=BOOL", value_parser = parse_signal)]
    signals: Vec<(String, bool)>,
    /// JPEG snapshot of the scene for the generative tier
    #[arg(long)]
    image: Option<PathBuf>,
}

impl SceneArgs {
    fn health_signals(&self) -> Option<HealthSignals> {
        let mut signals = HealthSignals::new();
        if self.bleeding {
            signals.set(HealthSignals::BLEEDING, true);
        }
        if self.cyanosis {
            signals.set(HealthSignals::CYANOSIS, true);
        }
        if self.unconscious {
            signals.set(HealthSignals::CONSCIOUS, false);
        }
        for (name, value) in &self.signals {
            signals.set(name.clone(), *value);
        }
        if signals.is_empty() {
            None
        } else {
            Some(signals)
        }
    }

    async fn image_bytes(&self) -> Result<Option<Vec<u8>>> {
        match &self.image {
            Some(path) => {
                let bytes = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("reading scene image {}", path.display()))?;
                Ok(Some(bytes))
            }
            None => Ok(None),
        }
    }
}

fn parse_signal(raw: &str) -> Result<(String, bool), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=BOOL, got {raw:?}"))?;
    if name.is_empty() {
        return Err(format!("expected NAME=BOOL, got {raw:?}"));
    }
    let value = value
        .parse::<bool>()
        .map_err(|_| format!("cue value must be true or false, got {value:?}"))?;
    Ok((name.to_string(), value))
}

async fn load_rules(config: &Config) -> Result<RuleSet> {
    match &config.rules_path {
        Some(path) => {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading rule table {}", path.display()))?;
            let rules = RuleSet::from_toml(&text)
                .with_context(|| format!("parsing rule table {}", path.display()))?;
            tracing::info!(path = %path.display(), rules = rules.rules().len(), "using custom rule table");
            Ok(rules)
        }
        None => Ok(RuleSet::builtin().clone()),
    }
}

async fn build_suggester(config: &Config) -> Result<SuggestionEngine> {
    let mut suggester = SuggestionEngine::new(load_rules(config).await?)
        .with_generate_timeout(Duration::from_secs(config.gen_timeout_secs));

    if let Some(api_key) = &config.gemini_api_key {
        let client = GeminiClient::new(GeminiConfig {
            api_key: api_key.clone(),
            model: config.gemini_model.clone(),
            ..Default::default()
        });
        suggester = suggester.with_generator(Arc::new(client));
    } else {
        tracing::info!("no PULSEAR_GEMINI_API_KEY; generative tier disabled");
    }

    Ok(suggester)
}

async fn build_engine(config: &Config) -> Result<PulseEngine> {
    let store = Arc::new(JsonPatientStore::new(config.patients_path.clone()));
    let engine = PulseEngine::bootstrap(
        store.clone(),
        store,
        config.match_config(),
        build_suggester(config).await?,
    )
    .await
    .with_context(|| format!("loading patients from {}", config.patients_path.display()))?;
    Ok(engine)
}

async fn read_embedding(path: &PathBuf) -> Result<Embedding> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading embedding {}", path.display()))?;
    let embedding: Embedding = serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing embedding {}", path.display()))?;
    Ok(embedding)
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(patients) = cli.patients {
        config.patients_path = patients;
    }

    match cli.command {
        Commands::Resolve { embedding } => {
            let engine = build_engine(&config).await?;
            let query = read_embedding(&embedding).await?;
            let outcome = engine.resolve_identity(&query)?;
            print_json(&outcome)?;
        }
        Commands::Suggest {
            patient,
            profile,
            scene,
        } => {
            let suggester = build_suggester(&config).await?;

            let profile: Option<MedicalProfile> = match (patient, profile) {
                (Some(id), None) => {
                    let store = JsonPatientStore::new(config.patients_path.clone());
                    let id = PatientId::from(id);
                    let fetched = store.fetch(&id).await?;
                    if fetched.is_none() {
                        bail!("patient {id} not found in {}", store.path().display());
                    }
                    fetched
                }
                (None, Some(path)) => {
                    let bytes = tokio::fs::read(&path)
                        .await
                        .with_context(|| format!("reading profile {}", path.display()))?;
                    Some(
                        serde_json::from_slice(&bytes)
                            .with_context(|| format!("parsing profile {}", path.display()))?,
                    )
                }
                (None, None) => None,
                (Some(_), Some(_)) => unreachable!("clap rejects --patient with --profile"),
            };

            let signals = scene.health_signals();
            let image = scene.image_bytes().await?;
            let suggestion = suggester
                .suggest_with_scene(profile.as_ref(), signals.as_ref(), image.as_deref())
                .await;
            print_json(&suggestion)?;
        }
        Commands::Analyze { embedding, scene } => {
            let engine = build_engine(&config).await?;
            let query = read_embedding(&embedding).await?;
            let signals = scene.health_signals();
            let image = scene.image_bytes().await?;
            let analysis = engine
                .analyze(&query, signals.as_ref(), image.as_deref())
                .await?;
            print_json(&analysis)?;
        }
        Commands::Registry => {
            let engine = build_engine(&config).await?;
            let entries: Vec<_> = engine
                .registry_entries()
                .iter()
                .map(|entry| {
                    serde_json::json!({
                        "patient_id": entry.patient.as_str(),
                        "reference_embeddings": entry.embeddings.len(),
                        "dimensions": entry.embeddings.first().map(Embedding::dim),
                    })
                })
                .collect();
            print_json(&entries)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_signal() {
        assert_eq!(
            parse_signal("seizure=true").unwrap(),
            ("seizure".to_string(), true)
        );
        assert_eq!(
            parse_signal("conscious=false").unwrap(),
            ("conscious".to_string(), false)
        );
        assert!(parse_signal("seizure").is_err());
        assert!(parse_signal("=true").is_err());
        assert!(parse_signal("seizure=yes").is_err());
    }
}
