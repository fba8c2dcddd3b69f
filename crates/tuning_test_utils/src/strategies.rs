//! Proptest strategies for telemetry.
//!
//! Generated sessions draw from small pools of themes, difficulties and death
//! causes so segments fill up and rules actually fire.

use proptest::prelude::*;
use tuning_core::Event;

use crate::fixtures::SessionBuilder;

/// Themes used by generated sessions.
pub const THEMES: &[&str] = &["desert", "space", "forest"];

/// Difficulties used by generated sessions.
pub const DIFFICULTIES: &[&str] = &["easy", "normal", "hard"];

/// Death causes used by generated sessions; `disease` has no cause rule.
pub const CAUSES: &[&str] = &["food", "water", "combat", "dehydration", "disease"];

/// Random event ids used by generated sessions; a subset of what the game
/// can roll, so coverage checks have something to find.
pub const RANDOM_EVENTS: &[&str] = &["bandit", "river", "storm", "trader", "discovery"];

/// How a generated session ends.
#[derive(Debug, Clone, PartialEq)]
pub enum Ending {
    /// Victory on the given day.
    Win(u32),
    /// Death with cause, day and progress.
    Death(&'static str, u32, f64),
    /// No terminal event.
    Abandoned,
}

/// Generate a session ending.
pub fn arb_ending() -> impl Strategy<Value = Ending> {
    prop_oneof![
        (5u32..150).prop_map(Ending::Win),
        (prop::sample::select(CAUSES), 1u32..120, 0.0f64..100.0)
            .prop_map(|(cause, day, progress)| Ending::Death(cause, day, progress)),
        Just(Ending::Abandoned),
    ]
}

/// Generate one session's events.
pub fn arb_session(id: String) -> impl Strategy<Value = Vec<Event>> {
    (
        prop::sample::select(THEMES),
        prop::sample::select(DIFFICULTIES),
        arb_ending(),
        any::<bool>(),
        prop::collection::vec(prop::sample::select(RANDOM_EVENTS), 0..6),
    )
        .prop_map(move |(theme, difficulty, ending, errored, random_events)| {
            let mut session = SessionBuilder::new(id.clone(), theme, difficulty).choice("travel");
            if errored {
                session = session.error("ValueError");
            }
            for event in random_events {
                session = session.random_event(event, "resolved");
            }
            let session = match ending {
                Ending::Win(day) => session.victory(day),
                Ending::Death(cause, day, progress) => session.death(cause, day, progress),
                Ending::Abandoned => session.snapshot(3, 10.0),
            };
            session.build()
        })
}

/// Generate the events of up to `max_sessions` sessions.
pub fn arb_telemetry(max_sessions: usize) -> impl Strategy<Value = Vec<Event>> {
    (0..=max_sessions)
        .prop_flat_map(|n| {
            (0..n)
                .map(|i| arb_session(format!("session-{i}")))
                .collect::<Vec<_>>()
        })
        .prop_map(|sessions| sessions.into_iter().flatten().collect())
}
