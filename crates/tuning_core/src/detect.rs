//! Threshold-based balance issue detection.
//!
//! Rules run per segment in a fixed order and independently of each other;
//! every rule that applies fires. Segments below the sufficiency threshold are
//! skipped entirely. A final cross-segment pass compares easy and hard
//! segments of the same theme.
//!
//! Random event coverage, random event rate and early survivability are
//! advisory: they explain what the fixed table cannot correct.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aggregate::{Aggregation, Segment, SegmentMetrics};
use crate::rules::RuleSet;

/// Severity of a detected issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    /// Advisory only.
    Low,
    /// Just past the threshold.
    Medium,
    /// Clearly past the threshold.
    High,
    /// Far past the threshold.
    Critical,
}

impl Severity {
    /// Get numeric priority (higher = more urgent)
    pub fn priority(&self) -> u32 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
            Self::Critical => 4,
        }
    }

    /// Grade how far a rate sits past its threshold.
    #[must_use]
    pub fn from_margin(margin: f64) -> Self {
        let margin = margin.abs();
        if margin < 0.10 {
            Self::Medium
        } else if margin < 0.25 {
            Self::High
        } else {
            Self::Critical
        }
    }
}

/// What kind of balance problem was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum IssueKind {
    /// Win rate below the too-hard threshold.
    TooHard,
    /// Win rate above the too-easy threshold.
    TooEasy,
    /// One cause accounts for more than the dominance share of deaths.
    SingleCauseDeathDominance {
        /// The dominant cause.
        cause: String,
    },
    /// Too many deaths before the early-progress cut.
    EarlyDeathSpike,
    /// Too many sessions logged errors. Never auto-adjusted.
    ElevatedErrorRate,
    /// Winners finish too quickly. Never auto-adjusted.
    PacingTooFast,
    /// Winners take too long. Never auto-adjusted.
    PacingTooSlow,
    /// Easy has a lower win rate than hard for the same theme. Never auto-adjusted.
    DifficultyInversion,
    /// An expected random event never fired. Never auto-adjusted.
    RandomEventNeverTriggered {
        /// The missing event id.
        event: String,
    },
    /// Random events per day far from the difficulty's target. Never auto-adjusted.
    RandomEventRateOffTarget,
    /// Many deaths in the first days of play. Never auto-adjusted.
    LowEarlySurvivability,
}

impl IssueKind {
    /// Stable short label.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::TooHard => "too-hard".to_string(),
            Self::TooEasy => "too-easy".to_string(),
            Self::SingleCauseDeathDominance { cause } => {
                format!("single-cause-death-dominance({cause})")
            }
            Self::EarlyDeathSpike => "early-death-spike".to_string(),
            Self::ElevatedErrorRate => "elevated-error-rate".to_string(),
            Self::PacingTooFast => "pacing-too-fast".to_string(),
            Self::PacingTooSlow => "pacing-too-slow".to_string(),
            Self::DifficultyInversion => "difficulty-inversion".to_string(),
            Self::RandomEventNeverTriggered { event } => {
                format!("random-event-never-triggered({event})")
            }
            Self::RandomEventRateOffTarget => "random-event-rate-off-target".to_string(),
            Self::LowEarlySurvivability => "low-early-survivability".to_string(),
        }
    }
}

/// Numbers backing an issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Metric name (e.g. "win_rate").
    pub metric: String,
    /// Observed value.
    pub value: f64,
    /// Threshold it crossed.
    pub threshold: f64,
    /// Sessions (or deaths, or wins) the value was computed over.
    pub sample_size: u32,
}

/// A detected balance issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    /// Segment the issue was found in.
    pub segment: Segment,
    /// Issue kind.
    pub kind: IssueKind,
    /// How far past the threshold.
    pub severity: Severity,
    /// Supporting numbers.
    pub evidence: Evidence,
    /// Human-readable summary of the evidence.
    pub rationale: String,
    /// Reported only; never turned into an adjustment.
    pub advisory: bool,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.segment,
            self.kind.label(),
            self.rationale
        )
    }
}

fn pct(rate: f64) -> f64 {
    rate * 100.0
}

/// Run every rule over every segment.
#[must_use]
pub fn detect(aggregation: &Aggregation, rules: &RuleSet) -> Vec<Issue> {
    let mut issues = Vec::new();
    for metrics in &aggregation.segments {
        detect_segment(metrics, rules, &mut issues);
    }
    detect_inversions(aggregation, rules, &mut issues);

    debug!(issues = issues.len(), "Detection complete");
    issues
}

/// Run the per-segment rules for one segment.
pub fn detect_segment(metrics: &SegmentMetrics, rules: &RuleSet, out: &mut Vec<Issue>) {
    let t = &rules.thresholds;
    let segment = &metrics.segment;

    if metrics.session_count < t.min_segment_sessions {
        debug!(
            segment = %segment,
            sessions = metrics.session_count,
            "Skipping segment with insufficient data"
        );
        return;
    }

    if let Some(win_rate) = metrics.win_rate {
        if win_rate < t.too_hard_win_rate {
            out.push(Issue {
                segment: segment.clone(),
                kind: IssueKind::TooHard,
                severity: Severity::from_margin(t.too_hard_win_rate - win_rate),
                evidence: Evidence {
                    metric: "win_rate".to_string(),
                    value: win_rate,
                    threshold: t.too_hard_win_rate,
                    sample_size: metrics.session_count,
                },
                rationale: format!(
                    "win rate {:.0}% over {} sessions",
                    pct(win_rate),
                    metrics.session_count
                ),
                advisory: false,
            });
        }
        if win_rate > t.too_easy_win_rate {
            out.push(Issue {
                segment: segment.clone(),
                kind: IssueKind::TooEasy,
                severity: Severity::from_margin(win_rate - t.too_easy_win_rate),
                evidence: Evidence {
                    metric: "win_rate".to_string(),
                    value: win_rate,
                    threshold: t.too_easy_win_rate,
                    sample_size: metrics.session_count,
                },
                rationale: format!(
                    "win rate {:.0}% over {} sessions",
                    pct(win_rate),
                    metrics.session_count
                ),
                advisory: false,
            });
        }
    }

    for (cause, share) in &metrics.death_cause_histogram {
        if *share > t.dominance_share {
            out.push(Issue {
                segment: segment.clone(),
                kind: IssueKind::SingleCauseDeathDominance {
                    cause: cause.clone(),
                },
                severity: Severity::from_margin(share - t.dominance_share),
                evidence: Evidence {
                    metric: format!("death_share.{cause}"),
                    value: *share,
                    threshold: t.dominance_share,
                    sample_size: metrics.deaths,
                },
                rationale: format!(
                    "{cause} caused {:.0}% of {} deaths",
                    pct(*share),
                    metrics.deaths
                ),
                advisory: rules.cause_rule(cause).is_none(),
            });
        }
    }

    if metrics.early_death_rate > t.early_death_rate {
        out.push(Issue {
            segment: segment.clone(),
            kind: IssueKind::EarlyDeathSpike,
            severity: Severity::from_margin(metrics.early_death_rate - t.early_death_rate),
            evidence: Evidence {
                metric: "early_death_rate".to_string(),
                value: metrics.early_death_rate,
                threshold: t.early_death_rate,
                sample_size: metrics.deaths,
            },
            rationale: format!(
                "{:.0}% of {} deaths before {:.0}% progress",
                pct(metrics.early_death_rate),
                metrics.deaths,
                t.early_progress_pct
            ),
            advisory: false,
        });
    }

    if metrics.error_rate > t.error_rate {
        out.push(Issue {
            segment: segment.clone(),
            kind: IssueKind::ElevatedErrorRate,
            severity: Severity::Low,
            evidence: Evidence {
                metric: "error_rate".to_string(),
                value: metrics.error_rate,
                threshold: t.error_rate,
                sample_size: metrics.session_count,
            },
            rationale: format!(
                "errors logged in {:.0}% of {} sessions",
                pct(metrics.error_rate),
                metrics.session_count
            ),
            advisory: true,
        });
    }

    if metrics.wins >= t.min_segment_sessions {
        if let Some(days) = metrics.avg_completion_days {
            let pacing = if days < t.pacing_fast_days {
                Some((IssueKind::PacingTooFast, t.pacing_fast_days))
            } else if days > t.pacing_slow_days {
                Some((IssueKind::PacingTooSlow, t.pacing_slow_days))
            } else {
                None
            };
            if let Some((kind, threshold)) = pacing {
                out.push(Issue {
                    segment: segment.clone(),
                    kind,
                    severity: Severity::Low,
                    evidence: Evidence {
                        metric: "avg_completion_days".to_string(),
                        value: days,
                        threshold,
                        sample_size: metrics.wins,
                    },
                    rationale: format!(
                        "average completion {days:.0} days over {} wins",
                        metrics.wins
                    ),
                    advisory: true,
                });
            }
        }
    }

    detect_random_events(metrics, rules, out);
    detect_early_survivability(metrics, rules, out);
}

fn detect_random_events(metrics: &SegmentMetrics, rules: &RuleSet, out: &mut Vec<Issue>) {
    let r = &rules.random_events;
    let segment = &metrics.segment;

    if metrics.random_events > r.min_events_for_coverage {
        for expected in &r.expected {
            if metrics.random_event_counts.contains_key(expected) {
                continue;
            }
            out.push(Issue {
                segment: segment.clone(),
                kind: IssueKind::RandomEventNeverTriggered {
                    event: expected.clone(),
                },
                severity: Severity::Low,
                evidence: Evidence {
                    metric: format!("random_event.{expected}"),
                    value: 0.0,
                    threshold: r.min_events_for_coverage as f64,
                    sample_size: metrics.random_events,
                },
                rationale: format!(
                    "'{expected}' never fired in {} random events over {} sessions",
                    metrics.random_events, metrics.session_count
                ),
                advisory: true,
            });
        }
    }

    // Telemetry without any random event records says nothing about the rate.
    if metrics.random_events == 0 || metrics.total_days < r.min_days_for_rate {
        return;
    }
    let Some(rate) = metrics.random_events_per_day() else {
        return;
    };
    let target = r.rate_target(&segment.difficulty);
    let deviation = (rate - target).abs() / target;
    if deviation > r.rate_deviation {
        out.push(Issue {
            segment: segment.clone(),
            kind: IssueKind::RandomEventRateOffTarget,
            severity: Severity::Low,
            evidence: Evidence {
                metric: "random_events_per_day".to_string(),
                value: rate,
                threshold: target,
                sample_size: metrics.total_days,
            },
            rationale: format!(
                "{rate:.2} random events per day over {} days, target {target:.2}",
                metrics.total_days
            ),
            advisory: true,
        });
    }
}

fn detect_early_survivability(metrics: &SegmentMetrics, rules: &RuleSet, out: &mut Vec<Issue>) {
    let t = &rules.thresholds;
    let (count, avg_day) = metrics.deaths_before_day(t.early_death_day);
    if count < t.min_segment_sessions {
        return;
    }
    let Some(avg_day) = avg_day else {
        return;
    };

    let severity = if avg_day < t.survivability_severe_day {
        Severity::High
    } else if avg_day < t.survivability_warning_day {
        Severity::Medium
    } else {
        return;
    };
    out.push(Issue {
        segment: metrics.segment.clone(),
        kind: IssueKind::LowEarlySurvivability,
        severity,
        evidence: Evidence {
            metric: "avg_early_death_day".to_string(),
            value: avg_day,
            threshold: t.survivability_warning_day,
            sample_size: count,
        },
        rationale: format!(
            "{count} deaths before day {} (average day {avg_day:.1})",
            t.early_death_day
        ),
        advisory: true,
    });
}

/// Flag themes whose easy segment is harder than their hard segment.
fn detect_inversions(aggregation: &Aggregation, rules: &RuleSet, out: &mut Vec<Issue>) {
    let min = rules.thresholds.min_segment_sessions;
    let mut by_theme: BTreeMap<&str, (Option<f64>, Option<f64>)> = BTreeMap::new();

    for metrics in &aggregation.segments {
        if metrics.session_count < min {
            continue;
        }
        let slot = by_theme.entry(metrics.segment.theme.as_str()).or_default();
        match metrics.segment.difficulty.as_str() {
            "easy" => slot.0 = metrics.win_rate,
            "hard" => slot.1 = metrics.win_rate,
            _ => {}
        }
    }

    for (theme, rates) in by_theme {
        if let (Some(easy), Some(hard)) = rates {
            if easy < hard {
                out.push(Issue {
                    segment: Segment::new(theme, "easy"),
                    kind: IssueKind::DifficultyInversion,
                    severity: Severity::Low,
                    evidence: Evidence {
                        metric: "win_rate".to_string(),
                        value: easy,
                        threshold: hard,
                        sample_size: 0,
                    },
                    rationale: format!(
                        "easy win rate {:.0}% is below hard win rate {:.0}%",
                        pct(easy),
                        pct(hard)
                    ),
                    advisory: true,
                });
            }
        }
    }
}
