//! Declarative suggestion rules.
//!
//! The rule tier is an ordered table of (predicate, recommendation) pairs
//! evaluated first-match-wins. Rules are data, not code: the built-in table
//! is embedded at compile time from `rules/default.toml`, and operators can
//! supply a replacement table of the same shape.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use serde::Deserialize;
use thiserror::Error;

use crate::error::ErrorKind;
use crate::types::{HealthSignals, MedicalProfile};

const BUILTIN_RULES: &str = include_str!("../rules/default.toml");

static BUILTIN: OnceLock<RuleSet> = OnceLock::new();

#[derive(Error, Debug)]
pub enum RulesError {
    #[error("rule table is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("rule table has no rules")]
    Empty,
    #[error("rule {0:?} has empty advice text")]
    EmptyAdvice(String),
}

impl RulesError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidInput
    }
}

/// One (predicate, recommendation) pair.
///
/// An empty predicate (no conditions, no signals) matches everything, which
/// is how the trailing catch-all rule is expressed.
#[derive(Debug, Clone, Deserialize)]
pub struct Rule {
    pub name: String,
    /// The profile must carry at least one condition containing one of
    /// these needles (case-insensitive). Empty = no condition required.
    #[serde(default)]
    pub conditions_any: Vec<String>,
    /// Every listed cue must be present with exactly this value.
    #[serde(default)]
    pub signals_all: BTreeMap<String, bool>,
    pub advice: String,
}

impl Rule {
    pub fn is_catch_all(&self) -> bool {
        self.conditions_any.is_empty() && self.signals_all.is_empty()
    }

    fn matches(&self, profile: Option<&MedicalProfile>, signals: Option<&HealthSignals>) -> bool {
        if !self.conditions_any.is_empty() {
            let Some(profile) = profile else {
                return false;
            };
            let hit = profile.conditions.iter().any(|condition| {
                let condition = condition.to_lowercase();
                self.conditions_any
                    .iter()
                    .any(|needle| condition.contains(&needle.to_lowercase()))
            });
            if !hit {
                return false;
            }
        }

        for (name, required) in &self.signals_all {
            match signals.and_then(|s| s.get(name)) {
                Some(observed) if observed == *required => {}
                _ => return false,
            }
        }

        true
    }
}

/// Ordered rule table. Order is part of the contract: evaluation returns
/// the first matching rule.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    rules: Vec<Rule>,
}

impl RuleSet {
    /// The compiled-in default table.
    pub fn builtin() -> &'static RuleSet {
        BUILTIN.get_or_init(|| {
            RuleSet::from_toml(BUILTIN_RULES).expect("embedded rule table must parse")
        })
    }

    /// Parse and validate a rule table from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, RulesError> {
        let set: RuleSet = toml::from_str(text)?;
        if set.rules.is_empty() {
            return Err(RulesError::Empty);
        }
        for rule in &set.rules {
            if rule.advice.trim().is_empty() {
                return Err(RulesError::EmptyAdvice(rule.name.clone()));
            }
        }
        Ok(set)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// First rule whose predicate matches, in table order.
    pub fn evaluate(
        &self,
        profile: Option<&MedicalProfile>,
        signals: Option<&HealthSignals>,
    ) -> Option<&Rule> {
        self.rules
            .iter()
            .find(|rule| rule.matches(profile, signals))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(conditions: &[&str]) -> MedicalProfile {
        MedicalProfile {
            conditions: conditions.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_builtin_table_parses_and_ends_in_catch_all() {
        let set = RuleSet::builtin();
        assert!(!set.rules().is_empty());
        let last = set.rules().last().unwrap();
        assert!(last.is_catch_all());
        assert_eq!(last.advice, "Monitor patient and reassess.");
        // Only the trailing rule may match everything.
        for rule in &set.rules()[..set.rules().len() - 1] {
            assert!(!rule.is_catch_all(), "rule {} shadows the default", rule.name);
        }
    }

    #[test]
    fn test_no_inputs_hits_default() {
        let rule = RuleSet::builtin().evaluate(None, None).unwrap();
        assert_eq!(rule.name, "default");
    }

    #[test]
    fn test_diabetes_unconscious() {
        let signals = HealthSignals::new().with(HealthSignals::CONSCIOUS, false);
        let rule = RuleSet::builtin()
            .evaluate(Some(&profile(&["Diabetes"])), Some(&signals))
            .unwrap();
        assert_eq!(rule.name, "diabetic-collapse");
        assert_eq!(rule.advice, "Check blood sugar levels urgently.");
    }

    #[test]
    fn test_bleeding_disorder_outranks_generic_bleeding() {
        let signals = HealthSignals::new().with(HealthSignals::BLEEDING, true);
        let rule = RuleSet::builtin()
            .evaluate(Some(&profile(&["Bleeding disorder"])), Some(&signals))
            .unwrap();
        assert_eq!(rule.name, "circulatory-emergency");
    }

    #[test]
    fn test_generic_bleeding_without_matching_condition() {
        let signals = HealthSignals::new().with(HealthSignals::BLEEDING, true);
        let rule = RuleSet::builtin()
            .evaluate(Some(&profile(&["Hypertension"])), Some(&signals))
            .unwrap();
        assert_eq!(rule.name, "bleeding-control");
    }

    #[test]
    fn test_condition_match_is_case_insensitive_substring() {
        let signals = HealthSignals::new().with(HealthSignals::BLEEDING, true);
        let rule = RuleSet::builtin()
            .evaluate(
                Some(&profile(&["Anticoagulant use (warfarin)"])),
                Some(&signals),
            )
            .unwrap();
        assert_eq!(rule.name, "circulatory-emergency");
    }

    #[test]
    fn test_airway_rule_needs_cyanosis() {
        let asthma = profile(&["Asthma"]);

        let cyanotic = HealthSignals::new().with(HealthSignals::CYANOSIS, true);
        let rule = RuleSet::builtin()
            .evaluate(Some(&asthma), Some(&cyanotic))
            .unwrap();
        assert_eq!(rule.name, "airway-compromise");

        // Without the cue the condition alone is not an emergency.
        let rule = RuleSet::builtin().evaluate(Some(&asthma), None).unwrap();
        assert_eq!(rule.name, "default");
    }

    #[test]
    fn test_conscious_true_does_not_trigger_unconscious_rules() {
        let signals = HealthSignals::new().with(HealthSignals::CONSCIOUS, true);
        let rule = RuleSet::builtin()
            .evaluate(Some(&profile(&["Diabetes"])), Some(&signals))
            .unwrap();
        assert_eq!(rule.name, "default");
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let signals = HealthSignals::new()
            .with(HealthSignals::BLEEDING, true)
            .with(HealthSignals::CONSCIOUS, false);
        let p = profile(&["Diabetes", "Hemophilia"]);
        let first = RuleSet::builtin().evaluate(Some(&p), Some(&signals)).unwrap();
        for _ in 0..10 {
            let again = RuleSet::builtin().evaluate(Some(&p), Some(&signals)).unwrap();
            assert_eq!(again.name, first.name);
        }
    }

    #[test]
    fn test_custom_table_overrides_builtin_order() {
        let table = r#"
            [[rules]]
            name = "always"
            advice = "Stand back."
        "#;
        let set = RuleSet::from_toml(table).unwrap();
        let rule = set.evaluate(None, None).unwrap();
        assert_eq!(rule.advice, "Stand back.");
    }

    #[test]
    fn test_table_without_catch_all_can_miss() {
        let table = r#"
            [[rules]]
            name = "bleeding-only"
            advice = "Apply pressure."

            [rules.signals_all]
            bleeding_detected = true
        "#;
        let set = RuleSet::from_toml(table).unwrap();
        assert!(set.evaluate(None, None).is_none());
    }

    #[test]
    fn test_empty_table_rejected() {
        let err = RuleSet::from_toml("").unwrap_err();
        assert!(matches!(err, RulesError::Empty));
    }

    #[test]
    fn test_blank_advice_rejected() {
        let table = r#"
            [[rules]]
            name = "bad"
            advice = "  "
        "#;
        let err = RuleSet::from_toml(table).unwrap_err();
        assert!(matches!(err, RulesError::EmptyAdvice(_)));
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
}
