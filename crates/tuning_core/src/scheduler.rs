//! Trigger scheduler.
//!
//! The only entry point the game process calls. It decides whether enough new
//! sessions have accumulated to be worth a tuning pass, runs the pipeline when
//! they have, and turns every failure (including a panic) into a
//! [`RunStatus::SkippedError`] outcome. The caller never sees an error.

use std::collections::BTreeSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::ingest::TelemetrySource;
use crate::pipeline::{analyze, apply, timestamp_now, Analysis};
use crate::rules::RuleSet;
use crate::store::TuningStore;

/// Default number of unseen sessions required before a run.
pub const DEFAULT_MIN_NEW_SESSIONS: u64 = 10;

/// How a scheduled run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    /// A config with at least one adjustment was written.
    Applied,
    /// A config was written but nothing needed changing.
    Balanced,
    /// Not enough new sessions; nothing was done.
    SkippedInsufficientData,
    /// The pipeline failed; nothing was written.
    SkippedError,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Applied => "applied",
            Self::Balanced => "balanced",
            Self::SkippedInsufficientData => "skipped-insufficient-data",
            Self::SkippedError => "skipped-error",
        };
        f.write_str(label)
    }
}

/// Result of [`TuningScheduler::run_if_due`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    /// What happened.
    pub status: RunStatus,
    /// Adjustments written (0 unless applied).
    pub adjustments_applied: usize,
    /// Unseen sessions at the time of the call.
    pub new_sessions: u64,
    /// Error text for `SkippedError`.
    pub error: Option<String>,
    /// Human-readable summary; `None` when run silently.
    pub summary: Option<String>,
}

/// Scheduler phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SchedulerState {
    /// Waiting for data.
    #[default]
    Idle,
    /// Pipeline executing.
    Running,
}

/// Decides when to re-tune and isolates the caller from pipeline failures.
#[derive(Debug)]
pub struct TuningScheduler {
    source: TelemetrySource,
    store: TuningStore,
    rules: RuleSet,
    state: SchedulerState,
}

impl TuningScheduler {
    /// Create a scheduler with the default rule set.
    #[must_use]
    pub fn new(source: TelemetrySource, store: TuningStore) -> Self {
        Self {
            source,
            store,
            rules: RuleSet::default(),
            state: SchedulerState::Idle,
        }
    }

    /// Use a custom rule set.
    #[must_use]
    pub fn with_rules(mut self, rules: RuleSet) -> Self {
        self.rules = rules;
        self
    }

    /// Current phase.
    #[must_use]
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// The store runs are written to.
    #[must_use]
    pub fn store(&self) -> &TuningStore {
        &self.store
    }

    /// Distinct session ids across all parseable records.
    #[must_use]
    pub fn count_total_sessions(&self) -> u64 {
        let ids: BTreeSet<String> = self.source.records().map(|e| e.session_id).collect();
        ids.len() as u64
    }

    /// Sessions not yet covered by a successful run.
    #[must_use]
    pub fn count_since_last_run(&self) -> u64 {
        let analyzed = self.store.read_state().sessions_analyzed_count;
        self.count_total_sessions().saturating_sub(analyzed)
    }

    /// True when at least `min_sessions` new sessions exist.
    #[must_use]
    pub fn should_run(&self, min_sessions: u64) -> bool {
        self.count_since_last_run() >= min_sessions
    }

    /// Run the pipeline if enough new sessions exist.
    ///
    /// `silent` only controls whether [`RunOutcome::summary`] is filled in.
    pub fn run_if_due(&mut self, min_sessions: u64, silent: bool) -> RunOutcome {
        let new_sessions = self.count_since_last_run();
        if new_sessions < min_sessions {
            debug!(new_sessions, min_sessions, "Not enough new sessions to tune");
            return RunOutcome {
                status: RunStatus::SkippedInsufficientData,
                adjustments_applied: 0,
                new_sessions,
                error: None,
                summary: (!silent).then(|| {
                    format!(
                        "Skipped: {new_sessions} new sessions, {min_sessions} needed before re-tuning."
                    )
                }),
            };
        }

        info!(new_sessions, "Running tuning pipeline");
        self.state = SchedulerState::Running;
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.run_pipeline()));
        self.state = SchedulerState::Idle;

        let result = match result {
            Ok(inner) => inner.map_err(|e| e.to_string()),
            Err(payload) => Err(panic_message(payload.as_ref())),
        };

        match result {
            Ok(analysis) => {
                let applied = analysis.adjustments.len();
                let status = if applied == 0 {
                    RunStatus::Balanced
                } else {
                    RunStatus::Applied
                };
                info!(%status, adjustments = applied, "Tuning run finished");
                RunOutcome {
                    status,
                    adjustments_applied: applied,
                    new_sessions,
                    error: None,
                    summary: (!silent).then(|| summarize(&analysis)),
                }
            }
            Err(message) => {
                warn!(error = %message, "Tuning run failed; previous config kept");
                RunOutcome {
                    status: RunStatus::SkippedError,
                    adjustments_applied: 0,
                    new_sessions,
                    summary: (!silent).then(|| format!("Skipped: error: {message}")),
                    error: Some(message),
                }
            }
        }
    }

    fn run_pipeline(&self) -> Result<Analysis> {
        let analysis = analyze(&self.source, &self.rules);
        apply(&analysis, &self.store, &timestamp_now())?;
        Ok(analysis)
    }
}

fn summarize(analysis: &Analysis) -> String {
    let mut summary = if analysis.is_balanced() {
        format!(
            "Analysed {} sessions: balanced, no changes.",
            analysis.session_count()
        )
    } else {
        format!(
            "Analysed {} sessions: applied {} adjustments.",
            analysis.session_count(),
            analysis.adjustments.len()
        )
    };
    for adjustment in &analysis.adjustments.adjustments {
        summary.push_str(&format!(
            " {} x{:.2} ({:+.0}%).",
            adjustment.parameter_key,
            adjustment.multiplier,
            adjustment.percent_change()
        ));
    }
    summary
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic during tuning".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn write_sessions(dir: &std::path::Path, file: &str, range: std::ops::Range<u32>) {
        let mut text = String::new();
        for i in range {
            text.push_str(&format!(
                "{{\"kind\":\"state_snapshot\",\"timestamp\":\"01\",\"session_id\":\"{file}-{i}\",\"theme\":\"forest\",\"difficulty\":\"normal\"}}\n"
            ));
            text.push_str(&format!(
                "{{\"kind\":\"death\",\"timestamp\":\"02\",\"session_id\":\"{file}-{i}\",\"cause\":\"combat\",\"progress_pct\":50}}\n"
            ));
        }
        fs::write(dir.join(format!("{file}.jsonl")), text).unwrap();
    }

    #[test]
    fn test_counts_distinct_sessions() {
        let logs = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_sessions(logs.path(), "a", 0..4);
        write_sessions(logs.path(), "b", 0..3);

        let scheduler = TuningScheduler::new(
            TelemetrySource::Directory(logs.path().to_path_buf()),
            TuningStore::in_dir(out.path()),
        );
        assert_eq!(scheduler.count_total_sessions(), 7);
        assert_eq!(scheduler.count_since_last_run(), 7);
        assert!(scheduler.should_run(7));
        assert!(!scheduler.should_run(8));
    }

    #[test]
    fn test_skip_has_no_side_effects() {
        let logs = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_sessions(logs.path(), "a", 0..3);
        let store = TuningStore::in_dir(out.path());

        let mut scheduler =
            TuningScheduler::new(TelemetrySource::Directory(logs.path().to_path_buf()), store);
        let outcome = scheduler.run_if_due(10, true);

        assert_eq!(outcome.status, RunStatus::SkippedInsufficientData);
        assert!(outcome.summary.is_none());
        assert!(!scheduler.store().config_path().exists());
        assert!(!scheduler.store().state_path().exists());
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[test]
    fn test_run_advances_counter() {
        let logs = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_sessions(logs.path(), "a", 0..10);

        let mut scheduler = TuningScheduler::new(
            TelemetrySource::Directory(logs.path().to_path_buf()),
            TuningStore::in_dir(out.path()),
        );
        let outcome = scheduler.run_if_due(10, false);

        // All deaths by combat: too hard plus combat dominance.
        assert_eq!(outcome.status, RunStatus::Applied);
        assert_eq!(outcome.adjustments_applied, 2);
        assert!(outcome.summary.unwrap().contains("applied 2 adjustments"));
        assert_eq!(scheduler.store().read_state().sessions_analyzed_count, 10);
        assert_eq!(scheduler.count_since_last_run(), 0);

        let again = scheduler.run_if_due(10, false);
        assert_eq!(again.status, RunStatus::SkippedInsufficientData);
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(RunStatus::SkippedError.to_string(), "skipped-error");
        assert_eq!(
            serde_json::to_string(&RunStatus::SkippedInsufficientData).unwrap(),
            "\"skipped-insufficient-data\""
        );
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "panic: boom");
    }
}
