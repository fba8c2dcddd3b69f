//! Telemetry event model.
//!
//! One [`Event`] is one line of a telemetry file. The `kind` field selects an
//! [`EventPayload`] variant, and each variant carries only the fields that make
//! sense for it:
//!
//! ```json
//! {"kind":"death","timestamp":"2026-02-14T15:30:22","session_id":"s1","cause":"dehydration","theme":"desert","difficulty":"normal","day":12,"progress_pct":35}
//! ```
//!
//! Counters such as `day` and `health` accept whole-valued floats (`12.0`) as
//! well as integers, since some writers emit every number as a float. A
//! fractional or out-of-range value makes the record malformed.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

/// A single immutable telemetry record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// ISO-8601 timestamp. Events of one session are ordered by this field.
    pub timestamp: String,
    /// Session the event belongs to.
    pub session_id: String,
    /// Kind-specific payload; serialized inline with a `kind` tag.
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    /// Create a new event.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        timestamp: impl Into<String>,
        payload: EventPayload,
    ) -> Self {
        Self {
            timestamp: timestamp.into(),
            session_id: session_id.into(),
            payload,
        }
    }

    /// The event's kind.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Parse one telemetry line.
    pub fn from_json_line(line: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(line)
    }

    /// Serialize to a single telemetry line (no trailing newline).
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Fixed vocabulary of event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Periodic player state snapshot.
    StateSnapshot,
    /// Player decision.
    Choice,
    /// Outcome of a random event.
    RandomEvent,
    /// Player died (terminal).
    Death,
    /// Player reached the end (terminal).
    Victory,
    /// Achievement unlocked.
    Achievement,
    /// Error or invalid input logged by the game.
    Error,
}

/// Kind-specific payload of an [`Event`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    /// Player state snapshot.
    StateSnapshot {
        /// Theme being played.
        theme: Option<String>,
        /// Difficulty level.
        difficulty: Option<String>,
        /// In-game day.
        #[serde(default, deserialize_with = "whole_number")]
        day: Option<u32>,
        /// Journey progress, 0-100.
        #[serde(alias = "distance_pct")]
        progress_pct: Option<f64>,
        /// Player health.
        #[serde(default, deserialize_with = "whole_number")]
        health: Option<i64>,
    },
    /// Player decision.
    Choice {
        /// Prompt shown to the player.
        prompt: Option<String>,
        /// Option the player picked.
        choice: Option<String>,
    },
    /// Random event resolution.
    RandomEvent {
        /// Event identifier.
        event: Option<String>,
        /// How it resolved.
        outcome: Option<String>,
    },
    /// Player death.
    Death {
        /// Cause of death (e.g. "dehydration").
        cause: Option<String>,
        /// Theme being played.
        theme: Option<String>,
        /// Difficulty level.
        difficulty: Option<String>,
        /// Day of death.
        #[serde(default, deserialize_with = "whole_number")]
        day: Option<u32>,
        /// Journey progress at death, 0-100.
        #[serde(alias = "distance_pct")]
        progress_pct: Option<f64>,
    },
    /// Journey completed.
    Victory {
        /// Ending reached.
        ending: Option<String>,
        /// Theme being played.
        theme: Option<String>,
        /// Difficulty level.
        difficulty: Option<String>,
        /// Day of completion.
        #[serde(default, deserialize_with = "whole_number")]
        day: Option<u32>,
        /// Journey progress at completion, normally 100.
        #[serde(alias = "distance_pct")]
        progress_pct: Option<f64>,
    },
    /// Achievement unlocked.
    Achievement {
        /// Achievement identifier.
        achievement: Option<String>,
    },
    /// Error logged by the game.
    Error {
        /// Error class (e.g. "InvalidInput").
        error_type: Option<String>,
        /// Error message.
        message: Option<String>,
    },
}

impl EventPayload {
    /// The payload's kind tag.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::StateSnapshot { .. } => EventKind::StateSnapshot,
            Self::Choice { .. } => EventKind::Choice,
            Self::RandomEvent { .. } => EventKind::RandomEvent,
            Self::Death { .. } => EventKind::Death,
            Self::Victory { .. } => EventKind::Victory,
            Self::Achievement { .. } => EventKind::Achievement,
            Self::Error { .. } => EventKind::Error,
        }
    }

    /// Theme and difficulty carried by this payload, if any.
    #[must_use]
    pub fn segment_fields(&self) -> (Option<&str>, Option<&str>) {
        match self {
            Self::StateSnapshot {
                theme, difficulty, ..
            }
            | Self::Death {
                theme, difficulty, ..
            }
            | Self::Victory {
                theme, difficulty, ..
            } => (theme.as_deref(), difficulty.as_deref()),
            _ => (None, None),
        }
    }

    /// Progress and day carried by this payload, if any.
    #[must_use]
    pub fn progress_fields(&self) -> (Option<f64>, Option<u32>) {
        match self {
            Self::StateSnapshot {
                progress_pct, day, ..
            }
            | Self::Death {
                progress_pct, day, ..
            }
            | Self::Victory {
                progress_pct, day, ..
            } => (*progress_pct, *day),
            _ => (None, None),
        }
    }

    /// True for death and victory.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Death { .. } | Self::Victory { .. })
    }
}

/// Optional integer that may arrive as a whole-valued float.
fn whole_number<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<i64>,
{
    let Some(value) = Option::<f64>::deserialize(deserializer)? else {
        return Ok(None);
    };
    // Beyond 2^53 an f64 no longer holds every integer.
    if value.fract() != 0.0 || value.abs() > 9_007_199_254_740_992.0 {
        return Err(D::Error::custom(format!("expected a whole number, got {value}")));
    }
    T::try_from(value as i64)
        .map(Some)
        .map_err(|_| D::Error::custom(format!("{value} is out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_death_line() {
        let line = br#"{"kind":"death","timestamp":"2026-01-01T10:00:00","session_id":"s1","cause":"dehydration","theme":"desert","difficulty":"normal","day":12,"progress_pct":35}"#;
        let event = Event::from_json_line(line).unwrap();

        assert_eq!(event.session_id, "s1");
        assert_eq!(event.kind(), EventKind::Death);
        assert_eq!(event.payload.segment_fields(), (Some("desert"), Some("normal")));
        assert_eq!(event.payload.progress_fields(), (Some(35.0), Some(12)));
        assert!(event.payload.is_terminal());
    }

    #[test]
    fn test_missing_payload_fields_are_none() {
        let line = br#"{"kind":"state_snapshot","timestamp":"t","session_id":"s"}"#;
        let event = Event::from_json_line(line).unwrap();
        assert_eq!(event.payload.segment_fields(), (None, None));
        assert_eq!(event.payload.progress_fields(), (None, None));
    }

    #[test]
    fn test_distance_pct_alias() {
        let line = br#"{"kind":"death","timestamp":"t","session_id":"s","distance_pct":7}"#;
        let event = Event::from_json_line(line).unwrap();
        assert_eq!(event.payload.progress_fields().0, Some(7.0));
    }

    #[test]
    fn test_whole_float_day_accepted() {
        let line = br#"{"kind":"state_snapshot","timestamp":"t","session_id":"s","day":12.0,"health":80.0}"#;
        let event = Event::from_json_line(line).unwrap();
        assert_eq!(event.payload.progress_fields().1, Some(12));
        assert!(matches!(
            event.payload,
            EventPayload::StateSnapshot {
                health: Some(80),
                ..
            }
        ));

        let death = br#"{"kind":"death","timestamp":"t","session_id":"s","cause":"food","day":9.0}"#;
        assert_eq!(
            Event::from_json_line(death).unwrap().payload.progress_fields().1,
            Some(9)
        );
    }

    #[test]
    fn test_fractional_or_negative_day_rejected() {
        let fractional = br#"{"kind":"death","timestamp":"t","session_id":"s","day":12.5}"#;
        assert!(Event::from_json_line(fractional).is_err());

        let negative = br#"{"kind":"victory","timestamp":"t","session_id":"s","day":-3}"#;
        assert!(Event::from_json_line(negative).is_err());
    }

    #[test]
    fn test_null_day_is_none() {
        let line = br#"{"kind":"death","timestamp":"t","session_id":"s","day":null}"#;
        let event = Event::from_json_line(line).unwrap();
        assert_eq!(event.payload.progress_fields(), (None, None));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let line = br#"{"kind":"teleport","timestamp":"t","session_id":"s"}"#;
        assert!(Event::from_json_line(line).is_err());
    }

    #[test]
    fn test_missing_session_id_rejected() {
        let line = br#"{"kind":"choice","timestamp":"t"}"#;
        assert!(Event::from_json_line(line).is_err());
    }

    #[test]
    fn test_line_keeps_kind_tag() {
        let event = Event::new(
            "s9",
            "2026-01-01T00:00:00",
            EventPayload::Achievement {
                achievement: Some("first_steps".to_string()),
            },
        );
        let line = event.to_json_line().unwrap();
        assert!(line.contains(r#""kind":"achievement""#));
        assert!(line.contains(r#""session_id":"s9""#));
    }
}
