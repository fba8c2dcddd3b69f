//! The ingestion -> aggregation -> detection -> synthesis chain.

use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use tracing::info;

use crate::aggregate::{aggregate, Aggregation};
use crate::detect::{detect, Issue};
use crate::error::Result;
use crate::event::Event;
use crate::history::{extend_history, MetricsSnapshot};
use crate::ingest::{IngestStats, TelemetrySource};
use crate::rules::RuleSet;
use crate::store::{TriggerState, TuningConfig, TuningStore, SCHEMA_VERSION};
use crate::synthesize::{synthesize, AdjustmentSet};

/// Everything one pass over the telemetry produced.
#[derive(Debug, Clone)]
pub struct Analysis {
    /// Ingestion accounting.
    pub stats: IngestStats,
    /// Sessions and per-segment metrics.
    pub aggregation: Aggregation,
    /// Detected issues in rule order.
    pub issues: Vec<Issue>,
    /// Synthesized adjustments and insights.
    pub adjustments: AdjustmentSet,
}

impl Analysis {
    /// Distinct sessions analysed.
    #[must_use]
    pub fn session_count(&self) -> u64 {
        self.aggregation.session_count() as u64
    }

    /// True when no adjustment would be written.
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        self.adjustments.is_empty()
    }

    /// Overall metrics across every session.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot::from_sessions(&self.aggregation.sessions)
    }

    /// Build the config document, carrying history forward from `previous`.
    #[must_use]
    pub fn to_config(&self, generated_at: &str, previous: Option<&TuningConfig>) -> TuningConfig {
        let adjustments: BTreeMap<String, f64> = self.adjustments.as_map();
        let metrics = self.metrics();
        let history = extend_history(
            previous.map_or(&[][..], |p| p.history.as_slice()),
            generated_at,
            self.session_count(),
            adjustments.clone(),
            metrics.clone(),
        );

        TuningConfig {
            schema_version: SCHEMA_VERSION,
            generated_at: generated_at.to_string(),
            sessions_analyzed_count: self.session_count(),
            adjustments,
            insights: self.adjustments.insights.clone(),
            metrics,
            history,
        }
    }
}

/// Run the analysis over already-ingested events.
#[must_use]
pub fn analyze_events(events: Vec<Event>, stats: IngestStats, rules: &RuleSet) -> Analysis {
    let aggregation = aggregate(events, rules.thresholds.early_progress_pct);
    let issues = detect(&aggregation, rules);
    let adjustments = synthesize(&issues, rules);

    info!(
        records = stats.records,
        malformed = stats.skipped_malformed,
        sessions = aggregation.session_count(),
        segments = aggregation.segments.len(),
        issues = issues.len(),
        adjustments = adjustments.len(),
        "Analysis complete"
    );

    Analysis {
        stats,
        aggregation,
        issues,
        adjustments,
    }
}

/// Ingest a telemetry source and analyse it. Writes nothing.
#[must_use]
pub fn analyze(source: &TelemetrySource, rules: &RuleSet) -> Analysis {
    let ingested = source.ingest();
    analyze_events(ingested.events, ingested.stats, rules)
}

/// Persist an analysis: the new config and the trigger counter, together.
pub fn apply(analysis: &Analysis, store: &TuningStore, generated_at: &str) -> Result<TuningConfig> {
    let config = analysis.to_config(generated_at, store.read().as_ref());
    let state = TriggerState {
        sessions_analyzed_count: analysis.session_count(),
    };
    store.commit(&config, &state)?;
    Ok(config)
}

/// Current time in the format used for `generated_at`.
#[must_use]
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
