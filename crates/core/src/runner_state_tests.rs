// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn new_state_starts_idle_with_zeroed_stats() {
    let state = RunnerState::new(ProjectId::new("p1"), 1_000);
    assert_eq!(state.status, RunnerStatus::Idle);
    assert_eq!(state.stats, RunnerStats::default());
    assert!(state.running_tasks.is_empty());
}

#[test]
fn stats_accumulate_runtime_across_completions_and_failures() {
    let mut stats = RunnerStats::default();
    stats.record_completion(100);
    stats.record_failure(50);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.total_runtime_ms, 150);
}

#[test]
fn round_trip_through_json_preserves_all_fields() {
    let mut state = RunnerState::new(ProjectId::new("p1"), 1_000);
    state.stats.record_completion(42);
    state.status = RunnerStatus::Polling;

    let json = serde_json::to_string(&state).unwrap();
    let restored: RunnerState = serde_json::from_str(&json).unwrap();
    assert_eq!(state, restored);
}
