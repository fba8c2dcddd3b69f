//! Session reconstruction and per-segment metrics.
//!
//! Events are grouped by session id, ordered by timestamp (ties keep read
//! order), and reduced to one [`SessionRecord`] each. Sessions are then rolled
//! up into [`SegmentMetrics`] per `(theme, difficulty)`.
//!
//! Everything here is recomputed from scratch on every run, so the same set of
//! events always produces the same metrics.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::event::{Event, EventPayload};

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// A victory event was observed and no death.
    Win,
    /// A death event was observed.
    Death,
    /// No terminal event observed.
    Incomplete,
}

/// Unit of balance analysis.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Segment {
    /// Theme name.
    pub theme: String,
    /// Difficulty level.
    pub difficulty: String,
}

impl Segment {
    /// Create a new segment.
    pub fn new(theme: impl Into<String>, difficulty: impl Into<String>) -> Self {
        Self {
            theme: theme.into(),
            difficulty: difficulty.into(),
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.theme, self.difficulty)
    }
}

/// One reconstructed session. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Session identifier.
    pub session_id: String,
    /// Events ordered by timestamp.
    pub events: Vec<Event>,
    /// First theme seen on any event.
    pub theme: Option<String>,
    /// First difficulty seen on any event.
    pub difficulty: Option<String>,
    /// Classified outcome.
    pub outcome: Outcome,
    /// Cause of death; present iff `outcome == Death`.
    pub death_cause: Option<String>,
    /// Ending reached on victory.
    pub ending: Option<String>,
    /// Journey progress at the end, 0-100.
    pub final_progress_pct: f64,
    /// Days survived.
    pub survival_days: u32,
    /// Achievements unlocked.
    pub achievement_count: u32,
    /// Errors logged.
    pub error_count: u32,
    /// Random events resolved.
    pub random_event_count: u32,
}

/// Cause recorded when a death event omits one.
pub const UNKNOWN_CAUSE: &str = "unknown";

impl SessionRecord {
    /// Reconstruct a session from its events (any order).
    #[must_use]
    pub fn from_events(session_id: impl Into<String>, mut events: Vec<Event>) -> Self {
        // Stable: equal timestamps keep read order.
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        let theme = events
            .iter()
            .find_map(|e| e.payload.segment_fields().0)
            .map(str::to_string);
        let difficulty = events
            .iter()
            .find_map(|e| e.payload.segment_fields().1)
            .map(str::to_string);

        let death = events
            .iter()
            .find(|e| matches!(e.payload, EventPayload::Death { .. }));
        let victory = events
            .iter()
            .find(|e| matches!(e.payload, EventPayload::Victory { .. }));
        let last_snapshot = events
            .iter()
            .rev()
            .find(|e| matches!(e.payload, EventPayload::StateSnapshot { .. }));

        let (outcome, terminal) = match (death, victory) {
            (Some(d), _) => (Outcome::Death, Some(d)),
            (None, Some(v)) => (Outcome::Win, Some(v)),
            (None, None) => (Outcome::Incomplete, None),
        };

        let death_cause = death.map(|d| match &d.payload {
            EventPayload::Death {
                cause: Some(cause), ..
            } if !cause.is_empty() => cause.clone(),
            _ => UNKNOWN_CAUSE.to_string(),
        });
        let ending = victory.and_then(|v| match &v.payload {
            EventPayload::Victory { ending, .. } => ending.clone(),
            _ => None,
        });

        let terminal_fields = terminal.map_or((None, None), |e| e.payload.progress_fields());
        let snapshot_fields = last_snapshot.map_or((None, None), |e| e.payload.progress_fields());
        let final_progress_pct = terminal_fields
            .0
            .or(snapshot_fields.0)
            .filter(|p| p.is_finite())
            .unwrap_or(0.0)
            .clamp(0.0, 100.0);
        let survival_days = terminal_fields.1.or(snapshot_fields.1).unwrap_or(0);

        let count = |pred: fn(&EventPayload) -> bool| -> u32 {
            events.iter().filter(|e| pred(&e.payload)).count() as u32
        };
        let achievement_count = count(|p| matches!(p, EventPayload::Achievement { .. }));
        let error_count = count(|p| matches!(p, EventPayload::Error { .. }));
        let random_event_count = count(|p| matches!(p, EventPayload::RandomEvent { .. }));

        Self {
            session_id: session_id.into(),
            theme,
            difficulty,
            outcome,
            death_cause,
            ending,
            final_progress_pct,
            survival_days,
            achievement_count,
            error_count,
            random_event_count,
            events,
        }
    }

    /// Segment of the session, or `None` if theme or difficulty is unknown.
    #[must_use]
    pub fn segment(&self) -> Option<Segment> {
        match (&self.theme, &self.difficulty) {
            (Some(theme), Some(difficulty)) => Some(Segment::new(theme, difficulty)),
            _ => None,
        }
    }
}

/// Aggregate statistics for one segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentMetrics {
    /// Segment these metrics describe.
    pub segment: Segment,
    /// Sessions in the segment, including incomplete ones.
    pub session_count: u32,
    /// Sessions won.
    pub wins: u32,
    /// Sessions ended by death.
    pub deaths: u32,
    /// Sessions without a terminal event.
    pub incomplete: u32,
    /// `wins / (wins + deaths)`; `None` when no session finished.
    pub win_rate: Option<f64>,
    /// Cause -> share of deaths.
    pub death_cause_histogram: BTreeMap<String, f64>,
    /// Share of deaths below the early-progress cut.
    pub early_death_rate: f64,
    /// Mean days survived over all sessions.
    pub avg_survival_days: f64,
    /// Share of sessions that logged at least one error.
    pub error_rate: f64,
    /// Mean achievements per session.
    pub avg_achievements: f64,
    /// Mean days to victory; `None` without wins.
    pub avg_completion_days: Option<f64>,
    /// Victories per ending reached.
    pub endings: BTreeMap<String, u32>,
    /// Random events resolved across all sessions.
    pub random_events: u32,
    /// Random event id -> times resolved.
    pub random_event_counts: BTreeMap<String, u32>,
    /// Days played summed over all sessions.
    pub total_days: u32,
    /// Day of death -> deaths on that day. Deaths without a day are left out.
    pub death_days: BTreeMap<u32, u32>,
}

impl SegmentMetrics {
    /// Compute metrics over the sessions of one segment.
    ///
    /// `early_progress_pct` is the progress below which a death counts as early.
    #[must_use]
    pub fn from_sessions(
        segment: Segment,
        sessions: &[&SessionRecord],
        early_progress_pct: f64,
    ) -> Self {
        let session_count = sessions.len() as u32;
        let wins = sessions
            .iter()
            .filter(|s| s.outcome == Outcome::Win)
            .count() as u32;
        let deaths: Vec<&&SessionRecord> = sessions
            .iter()
            .filter(|s| s.outcome == Outcome::Death)
            .collect();
        let death_count = deaths.len() as u32;

        let finished = wins + death_count;
        let win_rate = (finished > 0).then(|| wins as f64 / finished as f64);

        let mut cause_counts: BTreeMap<String, u32> = BTreeMap::new();
        for death in &deaths {
            let cause = death.death_cause.as_deref().unwrap_or(UNKNOWN_CAUSE);
            *cause_counts.entry(cause.to_string()).or_insert(0) += 1;
        }
        let death_cause_histogram = cause_counts
            .into_iter()
            .map(|(cause, n)| (cause, n as f64 / death_count as f64))
            .collect();

        let early_deaths = deaths
            .iter()
            .filter(|s| s.final_progress_pct < early_progress_pct)
            .count();
        let early_death_rate = share(early_deaths as u32, death_count);

        let with_errors = sessions.iter().filter(|s| s.error_count > 0).count() as u32;

        let mut endings: BTreeMap<String, u32> = BTreeMap::new();
        for ending in sessions.iter().filter_map(|s| s.ending.as_deref()) {
            *endings.entry(ending.to_string()).or_insert(0) += 1;
        }

        let mut random_event_counts: BTreeMap<String, u32> = BTreeMap::new();
        for session in sessions {
            for event in &session.events {
                if let EventPayload::RandomEvent {
                    event: Some(id), ..
                } = &event.payload
                {
                    *random_event_counts.entry(id.clone()).or_insert(0) += 1;
                }
            }
        }

        let mut death_days: BTreeMap<u32, u32> = BTreeMap::new();
        for death in deaths.iter().filter(|s| s.survival_days > 0) {
            *death_days.entry(death.survival_days).or_insert(0) += 1;
        }

        let completion_days: Vec<f64> = sessions
            .iter()
            .filter(|s| s.outcome == Outcome::Win)
            .map(|s| s.survival_days as f64)
            .collect();

        Self {
            segment,
            session_count,
            wins,
            deaths: death_count,
            incomplete: session_count - finished,
            win_rate,
            death_cause_histogram,
            early_death_rate,
            avg_survival_days: mean(sessions.iter().map(|s| s.survival_days as f64)),
            error_rate: share(with_errors, session_count),
            avg_achievements: mean(sessions.iter().map(|s| s.achievement_count as f64)),
            avg_completion_days: (!completion_days.is_empty())
                .then(|| mean(completion_days.iter().copied())),
            endings,
            random_events: sessions.iter().map(|s| s.random_event_count).sum(),
            random_event_counts,
            total_days: sessions.iter().map(|s| s.survival_days).sum(),
            death_days,
        }
    }

    /// Random events per day played; `None` before any day is played.
    #[must_use]
    pub fn random_events_per_day(&self) -> Option<f64> {
        (self.total_days > 0).then(|| self.random_events as f64 / self.total_days as f64)
    }

    /// Deaths on a day before `before_day`, with their mean day.
    #[must_use]
    pub fn deaths_before_day(&self, before_day: u32) -> (u32, Option<f64>) {
        let (count, days) = self
            .death_days
            .range(..before_day)
            .fold((0u32, 0u64), |(count, days), (day, n)| {
                (count + n, days + u64::from(*day) * u64::from(*n))
            });
        (count, (count > 0).then(|| days as f64 / count as f64))
    }
}

/// Output of aggregation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    /// Every reconstructed session, sorted by id.
    pub sessions: Vec<SessionRecord>,
    /// Per-segment metrics, sorted by segment.
    pub segments: Vec<SegmentMetrics>,
    /// Sessions with no theme or difficulty on any event.
    pub unclassifiable: u32,
}

impl Aggregation {
    /// Metrics for one segment.
    #[must_use]
    pub fn segment(&self, segment: &Segment) -> Option<&SegmentMetrics> {
        self.segments.iter().find(|m| &m.segment == segment)
    }

    /// Number of reconstructed sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

/// Group events into sessions and roll sessions up per segment.
#[must_use]
pub fn aggregate(events: Vec<Event>, early_progress_pct: f64) -> Aggregation {
    let mut by_session: BTreeMap<String, Vec<Event>> = BTreeMap::new();
    for event in events {
        by_session
            .entry(event.session_id.clone())
            .or_default()
            .push(event);
    }

    let sessions: Vec<SessionRecord> = by_session
        .into_iter()
        .map(|(id, events)| SessionRecord::from_events(id, events))
        .collect();

    let mut by_segment: BTreeMap<Segment, Vec<&SessionRecord>> = BTreeMap::new();
    let mut unclassifiable = 0u32;
    for session in &sessions {
        match session.segment() {
            Some(segment) => by_segment.entry(segment).or_default().push(session),
            None => unclassifiable += 1,
        }
    }

    let segments = by_segment
        .into_iter()
        .map(|(segment, members)| {
            SegmentMetrics::from_sessions(segment, &members, early_progress_pct)
        })
        .collect();

    Aggregation {
        sessions,
        segments,
        unclassifiable,
    }
}

fn share(part: u32, whole: u32) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0u32), |(sum, n), v| (sum + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(session: &str, ts: &str, day: u32, progress: f64) -> Event {
        Event::new(
            session,
            ts,
            EventPayload::StateSnapshot {
                theme: Some("desert".to_string()),
                difficulty: Some("normal".to_string()),
                day: Some(day),
                progress_pct: Some(progress),
                health: Some(80),
            },
        )
    }

    fn death(session: &str, ts: &str, cause: &str, progress: Option<f64>) -> Event {
        Event::new(
            session,
            ts,
            EventPayload::Death {
                cause: Some(cause.to_string()),
                theme: None,
                difficulty: None,
                day: Some(9),
                progress_pct: progress,
            },
        )
    }

    fn victory(session: &str, ts: &str) -> Event {
        Event::new(
            session,
            ts,
            EventPayload::Victory {
                ending: Some("heroic".to_string()),
                theme: Some("desert".to_string()),
                difficulty: Some("normal".to_string()),
                day: Some(45),
                progress_pct: Some(100.0),
            },
        )
    }

    #[test]
    fn test_death_outranks_victory() {
        let record = SessionRecord::from_events(
            "s",
            vec![
                snapshot("s", "01", 1, 0.0),
                victory("s", "03"),
                death("s", "02", "combat", Some(50.0)),
            ],
        );
        assert_eq!(record.outcome, Outcome::Death);
        assert_eq!(record.death_cause.as_deref(), Some("combat"));
        assert_eq!(record.final_progress_pct, 50.0);
    }

    #[test]
    fn test_first_death_wins_on_duplicates() {
        let record = SessionRecord::from_events(
            "s",
            vec![
                death("s", "05", "starvation", Some(10.0)),
                death("s", "02", "combat", Some(40.0)),
            ],
        );
        assert_eq!(record.death_cause.as_deref(), Some("combat"));
    }

    #[test]
    fn test_equal_timestamps_keep_read_order() {
        let events = vec![
            snapshot("s", "01", 1, 0.0),
            death("s", "07", "dehydration", Some(30.0)),
            death("s", "07", "combat", Some(30.0)),
        ];
        let record = SessionRecord::from_events("s", events.clone());
        assert_eq!(record.death_cause.as_deref(), Some("dehydration"));

        let agg = aggregate(events, 20.0);
        assert_eq!(agg.sessions[0].death_cause.as_deref(), Some("dehydration"));
        assert_eq!(
            agg.segments[0].death_cause_histogram.get("dehydration"),
            Some(&1.0)
        );
    }

    #[test]
    fn test_progress_falls_back_to_last_snapshot() {
        let record = SessionRecord::from_events(
            "s",
            vec![
                snapshot("s", "01", 3, 10.0),
                snapshot("s", "02", 7, 25.0),
                death("s", "03", "combat", None),
            ],
        );
        assert_eq!(record.final_progress_pct, 25.0);
        // The death carries its own day.
        assert_eq!(record.survival_days, 9);
    }

    #[test]
    fn test_incomplete_without_terminal() {
        let record = SessionRecord::from_events("s", vec![snapshot("s", "01", 4, 12.0)]);
        assert_eq!(record.outcome, Outcome::Incomplete);
        assert!(record.death_cause.is_none());
        assert_eq!(record.survival_days, 4);
    }

    #[test]
    fn test_no_progress_anywhere_defaults_to_zero() {
        let record = SessionRecord::from_events(
            "s",
            vec![Event::new(
                "s",
                "01",
                EventPayload::Choice {
                    prompt: None,
                    choice: Some("rest".to_string()),
                },
            )],
        );
        assert_eq!(record.final_progress_pct, 0.0);
        assert_eq!(record.survival_days, 0);
        assert!(record.segment().is_none());
    }

    #[test]
    fn test_win_rate_excludes_incomplete() {
        let events = vec![
            victory("a", "1"),
            death("b", "1", "combat", Some(50.0)),
            snapshot("b", "0", 1, 0.0),
            snapshot("c", "1", 2, 5.0),
        ];
        let agg = aggregate(events, 20.0);
        let metrics = agg.segment(&Segment::new("desert", "normal")).unwrap();

        assert_eq!(metrics.session_count, 3);
        assert_eq!(metrics.incomplete, 1);
        assert_eq!(metrics.win_rate, Some(0.5));
        assert_eq!(metrics.death_cause_histogram.get("combat"), Some(&1.0));
    }

    #[test]
    fn test_unclassifiable_counted_separately() {
        let events = vec![
            victory("a", "1"),
            death("orphan", "1", "combat", Some(50.0)),
        ];
        let agg = aggregate(events, 20.0);
        assert_eq!(agg.session_count(), 2);
        assert_eq!(agg.unclassifiable, 1);
        assert_eq!(agg.segments.len(), 1);
        assert_eq!(agg.segments[0].session_count, 1);
    }

    #[test]
    fn test_early_death_rate_over_deaths_only() {
        let mut events = Vec::new();
        for (i, progress) in [5.0, 15.0, 50.0, 80.0].iter().enumerate() {
            let id = format!("d{i}");
            events.push(snapshot(&id, "0", 1, 0.0));
            events.push(death(&id, "1", "combat", Some(*progress)));
        }
        events.push(victory("w", "1"));

        let agg = aggregate(events, 20.0);
        let metrics = &agg.segments[0];
        assert_eq!(metrics.deaths, 4);
        assert!((metrics.early_death_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_error_rate_counts_sessions_not_errors() {
        let error = |id: &str| {
            Event::new(
                id,
                "2",
                EventPayload::Error {
                    error_type: Some("InvalidInput".to_string()),
                    message: None,
                },
            )
        };
        let events = vec![
            victory("a", "1"),
            error("a"),
            error("a"),
            victory("b", "1"),
            victory("c", "1"),
            victory("d", "1"),
        ];
        let agg = aggregate(events, 20.0);
        assert!((agg.segments[0].error_rate - 0.25).abs() < 1e-9);
        assert_eq!(agg.segments[0].avg_completion_days, Some(45.0));
    }

    #[test]
    fn test_random_events_endings_and_death_days() {
        let random = |id: &str, ts: &str, event: &str| {
            Event::new(
                id,
                ts,
                EventPayload::RandomEvent {
                    event: Some(event.to_string()),
                    outcome: Some("survived".to_string()),
                },
            )
        };
        let events = vec![
            snapshot("a", "0", 1, 0.0),
            random("a", "1", "storm"),
            random("a", "2", "storm"),
            random("a", "3", "trader"),
            victory("a", "4"),
            snapshot("b", "0", 1, 0.0),
            random("b", "1", "bandit"),
            death("b", "2", "combat", Some(30.0)),
            snapshot("c", "0", 1, 0.0),
            death("c", "1", "food", Some(5.0)),
        ];
        let agg = aggregate(events, 20.0);
        let m = &agg.segments[0];

        assert_eq!(agg.sessions[0].random_event_count, 3);
        assert_eq!(m.random_events, 4);
        assert_eq!(m.random_event_counts.get("storm"), Some(&2));
        assert_eq!(m.endings.get("heroic"), Some(&1));
        // 45 days for the win, 9 for each death.
        assert_eq!(m.total_days, 63);
        assert!((m.random_events_per_day().unwrap() - 4.0 / 63.0).abs() < 1e-12);
        assert_eq!(m.death_days.get(&9), Some(&2));
        assert_eq!(m.deaths_before_day(15), (2, Some(9.0)));
        assert_eq!(m.deaths_before_day(9), (0, None));
    }

    #[test]
    fn test_no_finished_sessions_has_no_win_rate() {
        let agg = aggregate(vec![snapshot("a", "1", 1, 1.0)], 20.0);
        assert_eq!(agg.segments[0].win_rate, None);
        assert!(agg.segments[0].death_cause_histogram.is_empty());
    }
}
