//! Adjustment synthesis.
//!
//! Each non-advisory issue maps to one fixed-magnitude multiplier on one
//! parameter key. Multipliers that land on the same key are multiplied
//! together, then clamped into the rule set's bounds.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::detect::{Issue, IssueKind};
use crate::rules::RuleSet;

/// Insight emitted when no issue was detected anywhere.
pub const BALANCED_INSIGHT: &str = "balanced — no changes";

/// A multiplier on one parameter key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adjustment {
    /// Dotted key such as `theme.desert.supply_multiplier`.
    pub parameter_key: String,
    /// Factor the game applies to the base value.
    pub multiplier: f64,
    /// Metric and value that justify the change.
    pub rationale: String,
}

impl Adjustment {
    /// Create a new adjustment.
    pub fn new(parameter_key: impl Into<String>, multiplier: f64, rationale: impl Into<String>) -> Self {
        Self {
            parameter_key: parameter_key.into(),
            multiplier,
            rationale: rationale.into(),
        }
    }

    /// Signed percent change relative to 1.0.
    #[must_use]
    pub fn percent_change(&self) -> f64 {
        (self.multiplier - 1.0) * 100.0
    }
}

/// Key of a theme-scoped parameter.
#[must_use]
pub fn theme_key(theme: &str, parameter: &str) -> String {
    format!("theme.{theme}.{parameter}")
}

/// The single adjustment an issue asks for, or `None` for advisory issues.
#[must_use]
pub fn adjustment_for(issue: &Issue, rules: &RuleSet) -> Option<Adjustment> {
    if issue.advisory {
        return None;
    }
    let theme = issue.segment.theme.as_str();
    let rationale = format!("[{}] {}", issue.segment, issue.rationale);
    let m = &rules.multipliers;

    match &issue.kind {
        IssueKind::TooHard => Some(Adjustment::new(
            theme_key(theme, "supply_multiplier"),
            m.too_hard,
            rationale,
        )),
        IssueKind::TooEasy => Some(Adjustment::new(
            theme_key(theme, "supply_multiplier"),
            m.too_easy,
            rationale,
        )),
        IssueKind::SingleCauseDeathDominance { cause } => rules
            .cause_rule(cause)
            .map(|rule| Adjustment::new(rule.parameter_key.clone(), rule.multiplier, rationale)),
        IssueKind::EarlyDeathSpike => Some(Adjustment::new(
            theme_key(theme, "early_game_difficulty"),
            m.early_death_spike,
            rationale,
        )),
        IssueKind::ElevatedErrorRate
        | IssueKind::PacingTooFast
        | IssueKind::PacingTooSlow
        | IssueKind::DifficultyInversion
        | IssueKind::RandomEventNeverTriggered { .. }
        | IssueKind::RandomEventRateOffTarget
        | IssueKind::LowEarlySurvivability => None,
    }
}

/// Composed adjustments plus the insights that explain them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentSet {
    /// One entry per key, composed and clamped, sorted by key.
    pub adjustments: Vec<Adjustment>,
    /// Raw per-issue adjustments before composition, in issue order.
    pub contributions: Vec<Adjustment>,
    /// One line per issue, or the balanced insight.
    pub insights: Vec<String>,
}

impl AdjustmentSet {
    /// True when nothing would change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.adjustments.is_empty()
    }

    /// Number of composed adjustments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.adjustments.len()
    }

    /// Key -> multiplier view, as persisted.
    #[must_use]
    pub fn as_map(&self) -> BTreeMap<String, f64> {
        self.adjustments
            .iter()
            .map(|a| (a.parameter_key.clone(), a.multiplier))
            .collect()
    }

    /// Composed multiplier for a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<f64> {
        self.adjustments
            .iter()
            .find(|a| a.parameter_key == key)
            .map(|a| a.multiplier)
    }
}

/// Turn detected issues into a bounded adjustment set.
#[must_use]
pub fn synthesize(issues: &[Issue], rules: &RuleSet) -> AdjustmentSet {
    let mut contributions = Vec::new();
    let mut insights = Vec::new();

    for issue in issues {
        match adjustment_for(issue, rules) {
            Some(adjustment) => {
                insights.push(format!(
                    "{issue} -> {} x{:.2}",
                    adjustment.parameter_key, adjustment.multiplier
                ));
                contributions.push(adjustment);
            }
            None => insights.push(format!("{issue} (advisory, no automatic change)")),
        }
    }

    if issues.is_empty() {
        insights.push(BALANCED_INSIGHT.to_string());
    }

    let mut composed: BTreeMap<&str, (f64, Vec<&str>)> = BTreeMap::new();
    for c in &contributions {
        let entry = composed
            .entry(c.parameter_key.as_str())
            .or_insert((1.0, Vec::new()));
        entry.0 *= c.multiplier;
        entry.1.push(c.rationale.as_str());
    }

    let adjustments: Vec<Adjustment> = composed
        .into_iter()
        .map(|(key, (product, reasons))| {
            let clamped = round_multiplier(rules.clamp(product));
            if clamped != round_multiplier(product) {
                debug!(key, product, clamped, "Clamped composed multiplier");
            }
            Adjustment::new(key, clamped, reasons.join("; "))
        })
        .collect();

    AdjustmentSet {
        adjustments,
        contributions,
        insights,
    }
}

/// Round to four decimals so composed products serialize cleanly.
#[must_use]
pub fn round_multiplier(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
