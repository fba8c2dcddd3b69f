//! Detection thresholds and correction magnitudes.
//!
//! The defaults reproduce the fixed rule table. A [`RuleSet`] can also be
//! loaded from a RON file, which is how additional death causes are made
//! auto-correctable:
//!
//! ```ron
//! (
//!     thresholds: (min_segment_sessions: 8),
//!     cause_rules: {
//!         "exposure": (parameter_key: "exposure_damage_multiplier", multiplier: 0.9),
//!     },
//! )
//! ```
//!
//! Fields left out of the file keep their defaults, except `cause_rules`, which
//! replaces the default map when present.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TuningError};

/// Complete rule configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSet {
    /// Detection thresholds.
    pub thresholds: Thresholds,
    /// Per-issue multipliers.
    pub multipliers: Multipliers,
    /// Lower bound applied after composing multipliers.
    pub min_multiplier: f64,
    /// Upper bound applied after composing multipliers.
    pub max_multiplier: f64,
    /// Death cause -> parameter correction. Causes not listed here are advisory.
    pub cause_rules: BTreeMap<String, CauseRule>,
    /// Random event coverage and rate checks.
    pub random_events: RandomEventRules,
}

impl Default for RuleSet {
    fn default() -> Self {
        let food = CauseRule::new("food_consumption_rate", 0.85);
        let water = CauseRule::new("water_consumption_rate", 0.85);
        let combat = CauseRule::new("combat_damage_multiplier", 0.90);

        let mut cause_rules = BTreeMap::new();
        cause_rules.insert("food".to_string(), food.clone());
        cause_rules.insert("starvation".to_string(), food);
        cause_rules.insert("water".to_string(), water.clone());
        cause_rules.insert("dehydration".to_string(), water);
        cause_rules.insert("combat".to_string(), combat);

        Self {
            thresholds: Thresholds::default(),
            multipliers: Multipliers::default(),
            min_multiplier: 0.5,
            max_multiplier: 2.0,
            cause_rules,
            random_events: RandomEventRules::default(),
        }
    }
}

impl RuleSet {
    /// Load rules from a RON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(TuningError::RulesNotFound(path.display().to_string()));
        }
        let contents = std::fs::read_to_string(path).map_err(|e| TuningError::io(path, e))?;
        Self::from_ron_str(&contents)
    }

    /// Parse rules from a RON string.
    pub fn from_ron_str(ron: &str) -> Result<Self> {
        let rules: RuleSet = ron::from_str(ron)?;
        rules.validate()?;
        Ok(rules)
    }

    /// Override the per-segment sufficiency threshold.
    pub fn with_min_segment_sessions(mut self, sessions: u32) -> Self {
        self.thresholds.min_segment_sessions = sessions;
        self
    }

    /// Reject configurations that could produce unsafe output.
    pub fn validate(&self) -> Result<()> {
        if !(self.min_multiplier > 0.0 && self.min_multiplier <= self.max_multiplier) {
            return Err(TuningError::InvalidRules(format!(
                "clamp bounds [{}, {}] are not a positive range",
                self.min_multiplier, self.max_multiplier
            )));
        }

        let m = &self.multipliers;
        let fixed = [
            ("too_hard", m.too_hard),
            ("too_easy", m.too_easy),
            ("early_death_spike", m.early_death_spike),
        ];
        for (name, value) in fixed {
            if !(value > 0.0 && value.is_finite()) {
                return Err(TuningError::InvalidRules(format!(
                    "multiplier '{name}' must be positive, got {value}"
                )));
            }
        }
        for (cause, rule) in &self.cause_rules {
            if !(rule.multiplier > 0.0 && rule.multiplier.is_finite()) {
                return Err(TuningError::InvalidRules(format!(
                    "cause '{cause}' multiplier must be positive, got {}",
                    rule.multiplier
                )));
            }
            if rule.parameter_key.trim().is_empty() {
                return Err(TuningError::InvalidRules(format!(
                    "cause '{cause}' has an empty parameter key"
                )));
            }
        }

        let r = &self.random_events;
        let targets = std::iter::once(("default", r.default_rate_target))
            .chain(r.rate_targets.iter().map(|(d, v)| (d.as_str(), *v)));
        for (difficulty, target) in targets {
            if !(target > 0.0 && target.is_finite()) {
                return Err(TuningError::InvalidRules(format!(
                    "random event rate target for '{difficulty}' must be positive, got {target}"
                )));
            }
        }

        let t = &self.thresholds;
        if t.too_hard_win_rate > t.too_easy_win_rate {
            return Err(TuningError::InvalidRules(format!(
                "too-hard threshold {} exceeds too-easy threshold {}",
                t.too_hard_win_rate, t.too_easy_win_rate
            )));
        }
        Ok(())
    }

    /// Clamp a composed multiplier into the safety bounds.
    #[must_use]
    pub fn clamp(&self, multiplier: f64) -> f64 {
        multiplier.clamp(self.min_multiplier, self.max_multiplier)
    }

    /// Correction for a dominant death cause, if the cause is auto-correctable.
    #[must_use]
    pub fn cause_rule(&self, cause: &str) -> Option<&CauseRule> {
        self.cause_rules.get(cause)
    }
}

/// Detection thresholds. Comparisons are strict (`<`/`>`), so a value sitting
/// exactly on a threshold is balanced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Segments with fewer sessions are skipped entirely.
    pub min_segment_sessions: u32,
    /// Win rate below this is too hard.
    pub too_hard_win_rate: f64,
    /// Win rate above this is too easy.
    pub too_easy_win_rate: f64,
    /// Share of deaths above which a single cause dominates.
    pub dominance_share: f64,
    /// Early-death share above which the early game is too punishing.
    pub early_death_rate: f64,
    /// Deaths below this progress percentage count as early.
    pub early_progress_pct: f64,
    /// Share of sessions with errors above which a segment is flagged.
    pub error_rate: f64,
    /// Average completion days below this is advisory pacing-too-fast.
    pub pacing_fast_days: f64,
    /// Average completion days above this is advisory pacing-too-slow.
    pub pacing_slow_days: f64,
    /// Deaths before this day count toward early survivability.
    pub early_death_day: u32,
    /// Mean early death day below this is a severe survivability problem.
    pub survivability_severe_day: f64,
    /// Mean early death day below this is a survivability problem.
    pub survivability_warning_day: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_segment_sessions: 5,
            too_hard_win_rate: 0.25,
            too_easy_win_rate: 0.75,
            dominance_share: 0.50,
            early_death_rate: 0.30,
            early_progress_pct: 20.0,
            error_rate: 0.05,
            pacing_fast_days: 30.0,
            pacing_slow_days: 100.0,
            early_death_day: 15,
            survivability_severe_day: 10.0,
            survivability_warning_day: 12.0,
        }
    }
}

/// Fixed correction magnitudes for segment-scoped issues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Multipliers {
    /// Applied to `theme.<name>.supply_multiplier` when too hard.
    pub too_hard: f64,
    /// Applied to `theme.<name>.supply_multiplier` when too easy.
    pub too_easy: f64,
    /// Applied to `theme.<name>.early_game_difficulty` on an early-death spike.
    pub early_death_spike: f64,
}

impl Default for Multipliers {
    fn default() -> Self {
        Self {
            too_hard: 1.30,
            too_easy: 0.80,
            early_death_spike: 0.90,
        }
    }
}

/// Advisory checks on how random events fire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomEventRules {
    /// Event ids the game can roll. One that never fires is flagged.
    pub expected: Vec<String>,
    /// Coverage is only checked above this many resolved events.
    pub min_events_for_coverage: u32,
    /// Difficulty -> target random events per day.
    pub rate_targets: BTreeMap<String, f64>,
    /// Target for difficulties missing from `rate_targets`.
    pub default_rate_target: f64,
    /// Rate is only checked once this many days have been played.
    pub min_days_for_rate: u32,
    /// Relative deviation from the target above which the rate is off.
    pub rate_deviation: f64,
}

impl Default for RandomEventRules {
    fn default() -> Self {
        let expected = [
            "bandit",
            "river",
            "storm",
            "wildlife",
            "trader",
            "discovery",
            "morale",
            "special_item",
            "riddle",
            "companion",
            "ambush_elite",
            "weather_shift",
        ];
        Self {
            expected: expected.iter().map(|e| (*e).to_string()).collect(),
            min_events_for_coverage: 20,
            rate_targets: BTreeMap::from([
                ("easy".to_string(), 0.30),
                ("normal".to_string(), 0.40),
                ("hard".to_string(), 0.55),
            ]),
            default_rate_target: 0.40,
            min_days_for_rate: 50,
            rate_deviation: 0.30,
        }
    }
}

impl RandomEventRules {
    /// Target events per day for a difficulty.
    #[must_use]
    pub fn rate_target(&self, difficulty: &str) -> f64 {
        self.rate_targets
            .get(difficulty)
            .copied()
            .unwrap_or(self.default_rate_target)
    }
}

/// Correction applied when one death cause dominates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CauseRule {
    /// Global parameter key to scale.
    pub parameter_key: String,
    /// Multiplier to apply.
    pub multiplier: f64,
}

impl CauseRule {
    /// Create a new cause rule.
    pub fn new(parameter_key: &str, multiplier: f64) -> Self {
        Self {
            parameter_key: parameter_key.to_string(),
            multiplier,
        }
    }
}
