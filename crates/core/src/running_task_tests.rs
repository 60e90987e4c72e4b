// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn sample() -> RunningTask {
    RunningTask {
        task_id: TaskId::new("t1"),
        project_id: ProjectId::new("p1"),
        path: "tasks/t1.md".into(),
        title: "do the thing".into(),
        priority: Priority::Medium,
        pid: 1234,
        started_at_ms: 1_000,
        is_resume: false,
        workdir: PathBuf::from("/tmp/work"),
        window_name: None,
        pane_id: None,
        worker_endpoint_port: None,
        idle_since_ms: None,
    }
}

#[test]
fn composite_key_combines_project_and_task() {
    let rt = sample();
    assert_eq!(
        rt.composite_key(),
        CompositeKey::new(ProjectId::new("p1"), TaskId::new("t1"))
    );
}

#[test]
fn external_session_detected_from_window_or_pane() {
    let mut rt = sample();
    assert!(!rt.is_external_session());
    rt.pane_id = Some("%3".into());
    assert!(rt.is_external_session());
}

#[test]
fn mark_idle_is_sticky_until_cleared() {
    let mut rt = sample();
    rt.mark_idle(100);
    rt.mark_idle(200); // second call must not move the timestamp
    assert_eq!(rt.idle_since_ms, Some(100));
    assert_eq!(rt.idle_duration_ms(350), Some(250));

    rt.clear_idle();
    assert_eq!(rt.idle_duration_ms(999), None);
}
