// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn sample_task() -> Task {
    Task {
        id: TaskId::new("t1"),
        path: "tasks/t1.md".into(),
        title: "do the thing".into(),
        priority: Priority::Medium,
        status: TaskStatus::Pending,
        classification: Classification::Ready,
        depends_on: vec![],
        waiting_on: vec![],
        blocked_by: vec![],
        in_cycle: false,
        workdir: None,
        worktree: None,
        git_remote: None,
        git_branch: None,
        feature_id: None,
        feature_depends_on: vec![],
        resolved_workdir: None,
        user_original_request: None,
    }
}

#[test]
fn status_roundtrips_through_json_as_snake_case() {
    let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
    assert_eq!(json, "\"in_progress\"");
    let back: TaskStatus = serde_json::from_str(&json).unwrap();
    assert_eq!(back, TaskStatus::InProgress);
}

#[test]
fn priority_orders_high_first() {
    let mut ps = vec![Priority::Low, Priority::High, Priority::Medium];
    ps.sort();
    assert_eq!(ps, vec![Priority::High, Priority::Medium, Priority::Low]);
}

#[test]
fn cycle_blocked_requires_both_in_cycle_and_blocked_classification() {
    let mut task = sample_task();
    task.in_cycle = true;
    task.classification = Classification::Blocked;
    assert!(task.is_cycle_blocked());

    task.classification = Classification::Ready;
    assert!(!task.is_cycle_blocked());
}

#[test]
fn task_deserializes_with_missing_optional_fields() {
    let json = serde_json::json!({
        "id": "t1",
        "path": "tasks/t1.md",
        "title": "do the thing",
        "priority": "high",
        "status": "pending",
        "classification": "ready"
    });
    let task: Task = serde_json::from_value(json).unwrap();
    assert_eq!(task.priority, Priority::High);
    assert!(task.depends_on.is_empty());
    assert!(task.resolved_workdir.is_none());
}
