// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn task_started_serializes_with_tag() {
    let event = RunnerEvent::TaskStarted {
        project_id: ProjectId::new("p1"),
        task_id: TaskId::new("t1"),
    };
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], "task_started");
    assert_eq!(json["project_id"], "p1");
}

#[test]
fn unit_variants_serialize_with_bare_tag() {
    let json = serde_json::to_value(RunnerEvent::AllPaused).unwrap();
    assert_eq!(json["type"], "all_paused");
}
