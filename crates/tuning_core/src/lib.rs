//! Adaptive balance tuning engine.
//!
//! Reads append-only gameplay telemetry and produces a small config of
//! parameter multipliers that nudges the game back toward balance:
//!
//! - **Ingestion**: newline-delimited JSON records from injected sources,
//!   tolerant of corrupt lines ([`ingest`])
//! - **Aggregation**: sessions rebuilt from events, rolled up per
//!   `(theme, difficulty)` segment ([`aggregate`])
//! - **Detection**: fixed threshold rules over segment metrics ([`detect`])
//! - **Synthesis**: one bounded multiplier per issue, composed per key
//!   ([`synthesize`])
//! - **Store**: atomic JSON persistence and a fail-open lookup ([`store`])
//! - **Scheduler**: the single entry point the game calls; never fails
//!   ([`scheduler`])
//!
//! # Example
//!
//! ```no_run
//! use tuning_core::{TelemetrySource, TuningScheduler, TuningStore};
//!
//! let mut scheduler = TuningScheduler::new(
//!     TelemetrySource::Directory("logs".into()),
//!     TuningStore::new("game_tuning.json", "tuning_state.json"),
//! );
//! let outcome = scheduler.run_if_due(10, false);
//! if let Some(summary) = outcome.summary {
//!     println!("{summary}");
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod aggregate;
pub mod cache;
pub mod detect;
pub mod error;
pub mod event;
pub mod history;
pub mod ingest;
pub mod pipeline;
pub mod report;
pub mod rules;
pub mod scheduler;
pub mod store;
pub mod synthesize;

pub use aggregate::{aggregate, Aggregation, Outcome, Segment, SegmentMetrics, SessionRecord};
pub use cache::{CachedConfig, TuningLookup};
pub use detect::{detect, Issue, IssueKind, Severity};
pub use error::{Result, TuningError};
pub use event::{Event, EventKind, EventPayload};
pub use history::{HistoryAnalysis, HistoryEntry, MetricsSnapshot, TuningOutcome};
pub use ingest::{
    discover_sources, FileSource, IngestStats, MemorySource, RecordSource, Records,
    TelemetrySource,
};
pub use pipeline::{analyze, analyze_events, apply, Analysis};
pub use rules::{CauseRule, RandomEventRules, RuleSet};
pub use scheduler::{RunOutcome, RunStatus, SchedulerState, TuningScheduler};
pub use store::{TriggerState, TuningConfig, TuningStore};
pub use synthesize::{synthesize, Adjustment, AdjustmentSet};
