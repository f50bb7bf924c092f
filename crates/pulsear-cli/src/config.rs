use std::path::PathBuf;

use pulsear_core::{DistanceMetric, MatchConfig};

/// Runtime configuration, loaded from `PULSEAR_*` environment variables.
pub struct Config {
    /// Path to the patients JSON file.
    pub patients_path: PathBuf,
    /// Match distance threshold; below it an identity is a candidate.
    pub match_threshold: f32,
    /// Distance metric for embedding comparison.
    pub match_metric: DistanceMetric,
    /// Optional replacement rule table (TOML).
    pub rules_path: Option<PathBuf>,
    /// Timeout in seconds for one generative-text attempt.
    pub gen_timeout_secs: u64,
    /// Gemini API key; the generative tier is disabled without one.
    pub gemini_api_key: Option<String>,
    /// Gemini model name.
    pub gemini_model: String,
}

impl Config {
    /// Load configuration from `PULSEAR_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("pulsear");

        let patients_path = std::env::var("PULSEAR_PATIENTS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("patients.json"));

        Self {
            patients_path,
            match_threshold: env_f32("PULSEAR_MATCH_THRESHOLD", 0.6),
            match_metric: std::env::var("PULSEAR_MATCH_METRIC")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
            rules_path: std::env::var("PULSEAR_RULES_PATH").ok().map(PathBuf::from),
            gen_timeout_secs: env_u64("PULSEAR_GEN_TIMEOUT_SECS", 5),
            gemini_api_key: std::env::var("PULSEAR_GEMINI_API_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
            gemini_model: std::env::var("PULSEAR_GEMINI_MODEL")
                .unwrap_or_else(|_| "gemini-2.0-flash".to_string()),
        }
    }

    pub fn match_config(&self) -> MatchConfig {
        MatchConfig {
            metric: self.match_metric,
            threshold: self.match_threshold,
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
