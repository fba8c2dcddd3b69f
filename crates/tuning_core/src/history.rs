//! Tuning history.
//!
//! Every applied config records a snapshot of the overall metrics it was
//! computed from. Comparing consecutive snapshots shows whether successive
//! tunings move the game toward balance or just bounce around it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::aggregate::{Outcome, SessionRecord, UNKNOWN_CAUSE};

/// Number of history entries kept in the config document.
pub const HISTORY_LIMIT: usize = 5;

/// Win rate at the middle of the balanced band.
pub const BALANCE_TARGET: f64 = 0.5;

const NEUTRAL_EPSILON: f64 = 1e-9;

/// Overall metrics across every analysed session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Sessions analysed.
    pub total_sessions: u32,
    /// `wins / (wins + deaths)` over all segments.
    pub win_rate: Option<f64>,
    /// Share of sessions ending in death.
    pub death_rate: f64,
    /// Mean days survived.
    pub avg_days: f64,
    /// Cause -> share of deaths.
    #[serde(default)]
    pub death_causes: BTreeMap<String, f64>,
}

impl MetricsSnapshot {
    /// Summarize a set of sessions.
    #[must_use]
    pub fn from_sessions(sessions: &[SessionRecord]) -> Self {
        if sessions.is_empty() {
            return Self::default();
        }
        let total = sessions.len() as u32;
        let wins = sessions.iter().filter(|s| s.outcome == Outcome::Win).count() as u32;
        let deaths: Vec<&SessionRecord> = sessions
            .iter()
            .filter(|s| s.outcome == Outcome::Death)
            .collect();
        let death_count = deaths.len() as u32;

        let mut causes: BTreeMap<String, u32> = BTreeMap::new();
        for death in &deaths {
            let cause = death.death_cause.as_deref().unwrap_or(UNKNOWN_CAUSE);
            *causes.entry(cause.to_string()).or_insert(0) += 1;
        }

        let days: u64 = sessions.iter().map(|s| u64::from(s.survival_days)).sum();

        Self {
            total_sessions: total,
            win_rate: (wins + death_count > 0)
                .then(|| f64::from(wins) / f64::from(wins + death_count)),
            death_rate: f64::from(death_count) / f64::from(total),
            avg_days: days as f64 / f64::from(total),
            death_causes: causes
                .into_iter()
                .map(|(cause, n)| (cause, f64::from(n) / f64::from(death_count)))
                .collect(),
        }
    }
}

/// How one tuning iteration compares with the one before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TuningOutcome {
    /// No earlier iteration to compare with.
    Initial,
    /// Win rate moved toward the balance target.
    Improving,
    /// Win rate moved away from the balance target.
    Regressing,
    /// No measurable change.
    Neutral,
}

impl TuningOutcome {
    /// Compare the current snapshot with the previous iteration's.
    #[must_use]
    pub fn compare(previous: Option<&MetricsSnapshot>, current: &MetricsSnapshot) -> Self {
        let Some(previous) = previous else {
            return Self::Initial;
        };
        match (previous.win_rate, current.win_rate) {
            (Some(before), Some(after)) => {
                let before = (before - BALANCE_TARGET).abs();
                let after = (after - BALANCE_TARGET).abs();
                if after + NEUTRAL_EPSILON < before {
                    Self::Improving
                } else if after > before + NEUTRAL_EPSILON {
                    Self::Regressing
                } else {
                    Self::Neutral
                }
            }
            _ => Self::Neutral,
        }
    }

    /// Lowercase label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Improving => "improving",
            Self::Regressing => "regressing",
            Self::Neutral => "neutral",
        }
    }
}

/// One applied tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// 1-based iteration counter; keeps counting past the retention limit.
    pub iteration: u32,
    /// When the config was generated.
    pub generated_at: String,
    /// Sessions the config was computed from.
    pub sessions_analyzed: u64,
    /// Adjustments written by that iteration.
    pub adjustments: BTreeMap<String, f64>,
    /// Metrics the adjustments were computed from.
    pub metrics: MetricsSnapshot,
    /// Comparison with the previous iteration.
    pub outcome: TuningOutcome,
}

/// Build the next history from the previous one, keeping only the newest
/// [`HISTORY_LIMIT`] entries.
#[must_use]
pub fn extend_history(
    previous: &[HistoryEntry],
    generated_at: &str,
    sessions_analyzed: u64,
    adjustments: BTreeMap<String, f64>,
    metrics: MetricsSnapshot,
) -> Vec<HistoryEntry> {
    let last = previous.last();
    let entry = HistoryEntry {
        iteration: last.map_or(1, |e| e.iteration + 1),
        generated_at: generated_at.to_string(),
        sessions_analyzed,
        adjustments,
        outcome: TuningOutcome::compare(last.map(|e| &e.metrics), &metrics),
        metrics,
    };

    let mut history: Vec<HistoryEntry> = previous.to_vec();
    history.push(entry);
    let excess = history.len().saturating_sub(HISTORY_LIMIT);
    history.drain(..excess);
    history
}

/// Summary of the retained history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryAnalysis {
    /// Iteration number of the newest entry (0 without history).
    pub iterations: u32,
    /// Outcomes, oldest first.
    pub recent_outcomes: Vec<TuningOutcome>,
    /// Overall win rate per retained entry, oldest first.
    pub win_rates: Vec<Option<f64>>,
    /// The last four outcomes alternate between improving and regressing.
    pub oscillating: bool,
}

impl HistoryAnalysis {
    /// Analyse a retained history.
    #[must_use]
    pub fn from_history(history: &[HistoryEntry]) -> Self {
        let recent_outcomes: Vec<TuningOutcome> = history.iter().map(|e| e.outcome).collect();
        Self {
            iterations: history.last().map_or(0, |e| e.iteration),
            oscillating: is_oscillating(&recent_outcomes),
            win_rates: history.iter().map(|e| e.metrics.win_rate).collect(),
            recent_outcomes,
        }
    }

    /// Render as markdown.
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        md.push_str("# Tuning History\n\n");
        if self.recent_outcomes.is_empty() {
            md.push_str("No tuning has been applied yet.\n");
            return md;
        }

        md.push_str("| Iteration | Outcome | Win Rate |\n|-----------|---------|----------|\n");
        let first = (self.iterations + 1).saturating_sub(self.recent_outcomes.len() as u32);
        for (i, (outcome, rate)) in self.recent_outcomes.iter().zip(&self.win_rates).enumerate() {
            let rate = rate.map_or_else(|| "-".to_string(), |r| format!("{:.1}%", r * 100.0));
            md.push_str(&format!(
                "| {} | {} | {} |\n",
                first + i as u32,
                outcome.as_str(),
                rate
            ));
        }

        if self.oscillating {
            md.push_str(
                "\n**Oscillating:** recent tunings alternate between improving and regressing; \
                 consider smaller multipliers or a higher session threshold.\n",
            );
        }
        md
    }
}

fn is_oscillating(outcomes: &[TuningOutcome]) -> bool {
    if outcomes.len() < 4 {
        return false;
    }
    let tail = &outcomes[outcomes.len() - 4..];
    tail.windows(2).all(|pair| {
        matches!(
            (pair[0], pair[1]),
            (TuningOutcome::Improving, TuningOutcome::Regressing)
                | (TuningOutcome::Regressing, TuningOutcome::Improving)
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(win_rate: f64) -> MetricsSnapshot {
        MetricsSnapshot {
            total_sessions: 10,
            win_rate: Some(win_rate),
            ..Default::default()
        }
    }

    fn grow(rates: &[f64]) -> Vec<HistoryEntry> {
        let mut history = Vec::new();
        for (i, rate) in rates.iter().enumerate() {
            history = extend_history(
                &history,
                &format!("t{i}"),
                10 * (i as u64 + 1),
                BTreeMap::new(),
                snapshot(*rate),
            );
        }
        history
    }

    #[test]
    fn test_outcome_relative_to_balance_target() {
        assert_eq!(TuningOutcome::compare(None, &snapshot(0.1)), TuningOutcome::Initial);
        assert_eq!(
            TuningOutcome::compare(Some(&snapshot(0.1)), &snapshot(0.3)),
            TuningOutcome::Improving
        );
        // Overshooting the target by more than before is a regression.
        assert_eq!(
            TuningOutcome::compare(Some(&snapshot(0.4)), &snapshot(0.9)),
            TuningOutcome::Regressing
        );
        assert_eq!(
            TuningOutcome::compare(Some(&snapshot(0.4)), &snapshot(0.6)),
            TuningOutcome::Neutral
        );
    }

    #[test]
    fn test_history_keeps_last_five() {
        let history = grow(&[0.1, 0.2, 0.3, 0.4, 0.45, 0.5, 0.5]);
        assert_eq!(history.len(), HISTORY_LIMIT);
        assert_eq!(history.first().unwrap().iteration, 3);
        assert_eq!(history.last().unwrap().iteration, 7);
        assert_eq!(history.last().unwrap().outcome, TuningOutcome::Neutral);
    }

    #[test]
    fn test_oscillation_detected() {
        let history = grow(&[0.1, 0.4, 0.1, 0.4, 0.1]);
        let analysis = HistoryAnalysis::from_history(&history);
        assert!(analysis.oscillating);
        assert_eq!(analysis.iterations, 5);
        assert!(analysis.to_markdown().contains("Oscillating"));
    }

    #[test]
    fn test_steady_improvement_not_oscillating() {
        let history = grow(&[0.1, 0.2, 0.3, 0.4, 0.45]);
        let analysis = HistoryAnalysis::from_history(&history);
        assert!(!analysis.oscillating);
        assert!(analysis
            .recent_outcomes
            .iter()
            .skip(1)
            .all(|o| *o == TuningOutcome::Improving));
    }

    #[test]
    fn test_empty_history() {
        let analysis = HistoryAnalysis::from_history(&[]);
        assert_eq!(analysis.iterations, 0);
        assert!(analysis.to_markdown().contains("No tuning"));
    }

    #[test]
    fn test_snapshot_from_sessions() {
        let mut win = SessionRecord::from_events("a", Vec::new());
        win.outcome = Outcome::Win;
        win.survival_days = 40;
        let mut death = SessionRecord::from_events("b", Vec::new());
        death.outcome = Outcome::Death;
        death.death_cause = Some("combat".to_string());
        death.survival_days = 10;
        let incomplete = SessionRecord::from_events("c", Vec::new());

        let snap = MetricsSnapshot::from_sessions(&[win, death, incomplete]);
        assert_eq!(snap.total_sessions, 3);
        assert_eq!(snap.win_rate, Some(0.5));
        assert!((snap.death_rate - 1.0 / 3.0).abs() < 1e-9);
        assert!((snap.avg_days - 50.0 / 3.0).abs() < 1e-9);
        assert_eq!(snap.death_causes.get("combat"), Some(&1.0));
    }
}
