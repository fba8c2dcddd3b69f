//! Scheduler gating and fault isolation against real files.

use std::fs;

use tuning_core::{RunStatus, TuningScheduler};
use tuning_test_utils::fixtures::segment_sessions;
use tuning_test_utils::TelemetryDir;

fn scheduler(dir: &TelemetryDir) -> TuningScheduler {
    TuningScheduler::new(dir.source(), dir.store())
}

#[test]
fn gating_waits_for_enough_new_sessions() {
    let dir = TelemetryDir::new();
    dir.append_sessions(
        "game_1.jsonl",
        &segment_sessions("a", "desert", "normal", 9, 4, &["combat", "food"]),
    );

    let mut scheduler = scheduler(&dir);
    let outcome = scheduler.run_if_due(10, true);
    assert_eq!(outcome.status, RunStatus::SkippedInsufficientData);
    assert_eq!(outcome.new_sessions, 9);
    assert!(!dir.store().config_path().exists());
    assert!(!dir.store().state_path().exists());

    // New files are picked up on the next call.
    dir.append_sessions(
        "game_2.jsonl",
        &segment_sessions("b", "desert", "normal", 1, 0, &["combat"]),
    );
    let outcome = scheduler.run_if_due(10, true);
    assert!(matches!(
        outcome.status,
        RunStatus::Applied | RunStatus::Balanced
    ));
    assert!(outcome.summary.is_none());
    assert_eq!(dir.store().read_state().sessions_analyzed_count, 10);

    dir.append_sessions(
        "game_3.jsonl",
        &segment_sessions("c", "desert", "normal", 5, 2, &["water"]),
    );
    assert_eq!(
        scheduler.run_if_due(10, true).status,
        RunStatus::SkippedInsufficientData
    );
    assert_eq!(dir.store().read_state().sessions_analyzed_count, 10);

    dir.append_sessions(
        "game_4.jsonl",
        &segment_sessions("d", "desert", "normal", 5, 2, &["water"]),
    );
    let outcome = scheduler.run_if_due(10, false);
    assert_ne!(outcome.status, RunStatus::SkippedInsufficientData);
    assert!(outcome.summary.is_some());
    assert_eq!(dir.store().read_state().sessions_analyzed_count, 20);
    assert_eq!(dir.store().read().unwrap().history.len(), 2);
}

#[test]
fn balanced_run_reports_balanced() {
    let dir = TelemetryDir::new();
    dir.append_sessions(
        "game_1.jsonl",
        &segment_sessions("a", "space", "hard", 12, 6, &["food", "water", "combat"]),
    );

    let outcome = scheduler(&dir).run_if_due(10, false);
    assert_eq!(outcome.status, RunStatus::Balanced);
    assert_eq!(outcome.adjustments_applied, 0);
    assert!(outcome.summary.unwrap().contains("balanced"));
    assert!(dir.store().read().unwrap().adjustments.is_empty());
}

#[test]
fn write_failure_is_isolated() {
    let dir = TelemetryDir::new();
    dir.append_sessions(
        "game_1.jsonl",
        &segment_sessions("a", "desert", "normal", 10, 0, &["dehydration"]),
    );
    let store = dir.store();

    let mut scheduler = scheduler(&dir);
    assert_eq!(scheduler.run_if_due(10, true).status, RunStatus::Applied);
    let before = fs::read(store.config_path()).unwrap();
    let state_before = fs::read(store.state_path()).unwrap();

    dir.append_sessions(
        "game_2.jsonl",
        &segment_sessions("b", "desert", "normal", 10, 10, &["combat"]),
    );

    // A non-empty directory at the state path makes the commit fail after
    // the config has already been replaced.
    fs::remove_file(store.state_path()).unwrap();
    fs::create_dir(store.state_path()).unwrap();
    fs::write(store.state_path().join("keep"), "").unwrap();

    let outcome = scheduler.run_if_due(10, false);
    assert_eq!(outcome.status, RunStatus::SkippedError);
    assert!(outcome.error.is_some());
    assert!(outcome.summary.unwrap().starts_with("Skipped: error:"));
    assert_eq!(fs::read(store.config_path()).unwrap(), before);

    // Once the fault clears the same sessions are still pending.
    fs::remove_dir_all(store.state_path()).unwrap();
    fs::write(store.state_path(), &state_before).unwrap();
    assert_eq!(scheduler.count_since_last_run(), 10);
    assert_eq!(scheduler.run_if_due(10, true).status, RunStatus::Applied);
    assert_eq!(store.read_state().sessions_analyzed_count, 20);
}
