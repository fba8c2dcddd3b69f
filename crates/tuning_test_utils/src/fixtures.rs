//! Test fixtures and helpers.
//!
//! [`SessionBuilder`] produces the event stream one play-through would log;
//! [`TelemetryDir`] writes those streams into `*.jsonl` files in a temporary
//! directory, with a [`TuningStore`] alongside.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tuning_core::{Event, EventPayload, TelemetrySource, TuningStore};

/// Builds the events of one session in timestamp order.
#[derive(Debug, Clone)]
pub struct SessionBuilder {
    id: String,
    theme: String,
    difficulty: String,
    events: Vec<Event>,
    clock: u32,
}

impl SessionBuilder {
    /// Start a session with an opening state snapshot.
    pub fn new(id: impl Into<String>, theme: &str, difficulty: &str) -> Self {
        let builder = Self {
            id: id.into(),
            theme: theme.to_string(),
            difficulty: difficulty.to_string(),
            events: Vec::new(),
            clock: 0,
        };
        builder.snapshot(1, 0.0)
    }

    /// Session id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    fn push(mut self, payload: EventPayload) -> Self {
        let c = self.clock;
        let ts = format!("2026-01-01T{:02}:{:02}:{:02}", c / 3600, c / 60 % 60, c % 60);
        self.clock += 1;
        self.events.push(Event::new(self.id.clone(), ts, payload));
        self
    }

    /// Log a state snapshot.
    pub fn snapshot(self, day: u32, progress_pct: f64) -> Self {
        let payload = EventPayload::StateSnapshot {
            theme: Some(self.theme.clone()),
            difficulty: Some(self.difficulty.clone()),
            day: Some(day),
            progress_pct: Some(progress_pct),
            health: Some(100),
        };
        self.push(payload)
    }

    /// Log a player choice.
    pub fn choice(self, choice: &str) -> Self {
        self.push(EventPayload::Choice {
            prompt: Some("What do you do?".to_string()),
            choice: Some(choice.to_string()),
        })
    }

    /// Log a resolved random event.
    pub fn random_event(self, event: &str, outcome: &str) -> Self {
        self.push(EventPayload::RandomEvent {
            event: Some(event.to_string()),
            outcome: Some(outcome.to_string()),
        })
    }

    /// Log an unlocked achievement.
    pub fn achievement(self, name: &str) -> Self {
        self.push(EventPayload::Achievement {
            achievement: Some(name.to_string()),
        })
    }

    /// Log an error.
    pub fn error(self, error_type: &str) -> Self {
        self.push(EventPayload::Error {
            error_type: Some(error_type.to_string()),
            message: Some(format!("{error_type} raised")),
        })
    }

    /// End the session in death.
    pub fn death(self, cause: &str, day: u32, progress_pct: f64) -> Self {
        let payload = EventPayload::Death {
            cause: Some(cause.to_string()),
            theme: Some(self.theme.clone()),
            difficulty: Some(self.difficulty.clone()),
            day: Some(day),
            progress_pct: Some(progress_pct),
        };
        self.push(payload)
    }

    /// End the session in victory.
    pub fn victory(self, day: u32) -> Self {
        let payload = EventPayload::Victory {
            ending: Some("arrival".to_string()),
            theme: Some(self.theme.clone()),
            difficulty: Some(self.difficulty.clone()),
            day: Some(day),
            progress_pct: Some(100.0),
        };
        self.push(payload)
    }

    /// The events logged so far.
    #[must_use]
    pub fn build(self) -> Vec<Event> {
        self.events
    }

    /// The events as newline-terminated telemetry lines.
    #[must_use]
    pub fn to_jsonl(&self) -> String {
        let mut out = String::new();
        for event in &self.events {
            out.push_str(&event.to_json_line().expect("event serializes"));
            out.push('\n');
        }
        out
    }
}

/// `count` sessions of one segment; the first `wins` win, the rest die of
/// causes taken round-robin from `causes`.
#[must_use]
pub fn segment_sessions(
    prefix: &str,
    theme: &str,
    difficulty: &str,
    count: u32,
    wins: u32,
    causes: &[&str],
) -> Vec<SessionBuilder> {
    (0..count)
        .map(|i| {
            let session = SessionBuilder::new(format!("{prefix}-{i}"), theme, difficulty)
                .choice("travel")
                .snapshot(10, 40.0);
            if i < wins {
                session.victory(50)
            } else {
                let cause = causes[(i - wins) as usize % causes.len()];
                session.death(cause, 20, 55.0)
            }
        })
        .collect()
}

/// A temporary directory holding telemetry files, plus an `out/` directory
/// for the tuning store.
#[derive(Debug)]
pub struct TelemetryDir {
    dir: TempDir,
}

impl TelemetryDir {
    /// Create an empty telemetry directory.
    #[must_use]
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        fs::create_dir(dir.path().join("logs")).expect("create logs dir");
        fs::create_dir(dir.path().join("out")).expect("create out dir");
        Self { dir }
    }

    /// Root of the temporary directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Directory the telemetry files live in.
    #[must_use]
    pub fn logs(&self) -> PathBuf {
        self.dir.path().join("logs")
    }

    /// Path of a telemetry file.
    #[must_use]
    pub fn file(&self, name: &str) -> PathBuf {
        self.logs().join(name)
    }

    /// Write raw text to a telemetry file, replacing it.
    pub fn write_raw(&self, name: &str, text: &str) -> PathBuf {
        let path = self.file(name);
        fs::write(&path, text).expect("write telemetry");
        path
    }

    /// Append raw text to a telemetry file.
    pub fn append_raw(&self, name: &str, text: &str) {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file(name))
            .expect("open telemetry");
        file.write_all(text.as_bytes()).expect("append telemetry");
    }

    /// Append sessions to a telemetry file.
    pub fn append_sessions(&self, name: &str, sessions: &[SessionBuilder]) {
        let text: String = sessions.iter().map(SessionBuilder::to_jsonl).collect();
        self.append_raw(name, &text);
    }

    /// Telemetry source over the logs directory.
    #[must_use]
    pub fn source(&self) -> TelemetrySource {
        TelemetrySource::Directory(self.logs())
    }

    /// Store under `out/` with the default file names.
    #[must_use]
    pub fn store(&self) -> TuningStore {
        TuningStore::in_dir(self.dir.path().join("out"))
    }
}

impl Default for TelemetryDir {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tuning_core::{aggregate, Outcome};

    #[test]
    fn test_builder_outcomes() {
        let sessions = segment_sessions("s", "desert", "normal", 4, 1, &["combat"]);
        let events: Vec<Event> = sessions.into_iter().flat_map(SessionBuilder::build).collect();
        let agg = aggregate(events, 20.0);

        assert_eq!(agg.session_count(), 4);
        let wins = agg
            .sessions
            .iter()
            .filter(|s| s.outcome == Outcome::Win)
            .count();
        assert_eq!(wins, 1);
        assert_eq!(agg.segments[0].deaths, 3);
    }

    #[test]
    fn test_telemetry_dir_round_trip() {
        let dir = TelemetryDir::new();
        dir.append_sessions("game_1.jsonl", &segment_sessions("a", "space", "hard", 3, 0, &["combat"]));
        let ingested = dir.source().ingest();
        assert_eq!(ingested.stats.sources_read, 1);
        assert_eq!(ingested.stats.skipped_malformed, 0);
        assert!(!ingested.events.is_empty());
    }
}
