use super::*;
use oj_core::{RunnerState, RunningTask, Priority};
use std::path::PathBuf;

fn store() -> (tempfile::TempDir, StateStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(StatePaths::new(dir.path()));
    (dir, store)
}

fn running_task(project: &ProjectId) -> RunningTask {
    RunningTask {
        task_id: oj_core::TaskId::new("t1"),
        project_id: project.clone(),
        path: "root/t1".to_string(),
        title: "do the thing".to_string(),
        priority: Priority::Medium,
        pid: 123,
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
fn round_trips_runner_state() {
    let (_dir, store) = store();
    let project = ProjectId::new("proj-1");
    let state = RunnerState::new(project.clone(), 42);

    store.save_runner_state(&project, &state).unwrap();
    let loaded = store.load_runner_state(&project).unwrap();

    assert_eq!(loaded, Some(state));
}

#[test]
fn missing_runner_state_returns_none() {
    let (_dir, store) = store();
    let project = ProjectId::new("nope");

    assert_eq!(store.load_runner_state(&project).unwrap(), None);
}

#[test]
fn corrupt_runner_state_rotates_to_bak_and_returns_none() {
    let (_dir, store) = store();
    let project = ProjectId::new("proj-1");
    let path = store.paths().runner_state(&project);

    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, b"{ not json").unwrap();

    let loaded = store.load_runner_state(&project).unwrap();
    assert_eq!(loaded, None);
    assert!(!path.exists());
    assert!(path.with_file_name(format!(
        "{}.bak",
        path.file_name().unwrap().to_str().unwrap()
    ))
    .exists());
}

#[test]
fn bak_rotation_keeps_at_most_max_bak_files() {
    let (_dir, store) = store();
    let project = ProjectId::new("proj-1");
    let path = store.paths().runner_state(&project);
    fs::create_dir_all(path.parent().unwrap()).unwrap();

    for i in 0..(MAX_BAK_FILES + 2) {
        fs::write(&path, format!("corrupt {i}")).unwrap();
        let _ = store.load_runner_state(&project).unwrap();
    }

    for n in 1..=MAX_BAK_FILES {
        assert!(bak_path(&path, n).exists(), "expected bak.{n} to exist");
    }
    assert!(!bak_path(&path, MAX_BAK_FILES + 1).exists());
}

#[test]
fn round_trips_running_tasks() {
    let (_dir, store) = store();
    let project = ProjectId::new("proj-1");
    let tasks = vec![running_task(&project)];

    store.save_running_tasks(&project, &tasks).unwrap();
    let loaded = store.load_running_tasks(&project).unwrap();

    assert_eq!(loaded, Some(tasks));
}

#[test]
fn pid_file_round_trips_and_removes() {
    let (_dir, store) = store();
    let project = ProjectId::new("proj-1");

    assert_eq!(store.read_pid_file(&project).unwrap(), None);

    store.write_pid_file(&project, 4242).unwrap();
    assert_eq!(store.read_pid_file(&project).unwrap(), Some(4242));

    store.remove_pid_file(&project).unwrap();
    assert_eq!(store.read_pid_file(&project).unwrap(), None);
}

#[test]
fn invalid_pid_file_is_an_error() {
    let (_dir, store) = store();
    let project = ProjectId::new("proj-1");
    let path = store.paths().runner_pid(&project);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, b"not-a-pid").unwrap();

    let err = store.read_pid_file(&project).unwrap_err();
    assert!(matches!(err, StateStoreError::InvalidPid { .. }));
}

#[test]
fn cleanup_stale_snapshots_removes_dead_pids_only() {
    let (_dir, store) = store();
    let alive = ProjectId::new("alive");
    let dead = ProjectId::new("dead");

    store.write_pid_file(&alive, 1).unwrap();
    store.write_pid_file(&dead, 2).unwrap();

    let stale = store
        .cleanup_stale_snapshots(|pid| pid == 1)
        .unwrap();

    assert_eq!(stale, vec![dead.clone()]);
    assert_eq!(store.read_pid_file(&alive).unwrap(), Some(1));
    assert_eq!(store.read_pid_file(&dead).unwrap(), None);
}
