use super::*;
use oj_adapters::{FakeProcessSpawner, FakeSessionAdapter};
use oj_core::{Classification, Priority, TaskStatus};
use std::path::PathBuf;
use tempfile::TempDir;

fn task(id: &str) -> Task {
    Task {
        id: TaskId::new(id),
        path: format!("/features/{id}"),
        title: id.to_string(),
        priority: Priority::Medium,
        status: TaskStatus::InProgress,
        classification: Classification::Ready,
        depends_on: Vec::new(),
        waiting_on: Vec::new(),
        blocked_by: Vec::new(),
        in_cycle: false,
        workdir: None,
        worktree: None,
        git_remote: None,
        git_branch: None,
        feature_id: None,
        feature_depends_on: Vec::new(),
        resolved_workdir: None,
        user_original_request: None,
    }
}

fn launcher(
    state_dir: &TempDir,
    default_workdir: &TempDir,
    home_dir: &TempDir,
) -> WorkerLauncher<FakeProcessSpawner, FakeSessionAdapter> {
    WorkerLauncher::new(
        StatePaths::new(state_dir.path()),
        FakeProcessSpawner::new(),
        FakeSessionAdapter::new(),
        "worker run \"${prompt}\"",
        default_workdir.path(),
        home_dir.path(),
    )
}

#[test]
fn write_prompt_selects_template_by_resume_flag() {
    let state_dir = TempDir::new().expect("tempdir");
    let default_workdir = TempDir::new().expect("tempdir");
    let home_dir = TempDir::new().expect("tempdir");
    let launcher = launcher(&state_dir, &default_workdir, &home_dir);
    let project_id = ProjectId::new("proj");
    let task = task("t1");

    let new_path = launcher.write_prompt(&project_id, &task, false).expect("write");
    let new_contents = std::fs::read_to_string(&new_path).expect("read");
    assert!(new_contents.contains("Begin work"));
    assert!(new_contents.contains(&task.path));

    let resume_path = launcher.write_prompt(&project_id, &task, true).expect("write");
    assert_eq!(new_path, resume_path);
    let resume_contents = std::fs::read_to_string(&resume_path).expect("read");
    assert!(resume_contents.contains("Continue prior work"));
}

#[test]
fn resolve_workdir_prefers_worktree_over_workdir_and_resolved() {
    let state_dir = TempDir::new().expect("tempdir");
    let default_workdir = TempDir::new().expect("tempdir");
    let home_dir = TempDir::new().expect("tempdir");
    std::fs::create_dir_all(home_dir.path().join("wt")).expect("mkdir");
    std::fs::create_dir_all(home_dir.path().join("wd")).expect("mkdir");
    let launcher = launcher(&state_dir, &default_workdir, &home_dir);

    let mut t = task("t1");
    t.worktree = Some("wt".to_string());
    t.workdir = Some("wd".to_string());
    t.resolved_workdir = Some(PathBuf::from("/does/not/exist"));

    assert_eq!(launcher.resolve_workdir(&t), home_dir.path().join("wt"));
}

#[test]
fn resolve_workdir_falls_back_to_default_when_nothing_exists() {
    let state_dir = TempDir::new().expect("tempdir");
    let default_workdir = TempDir::new().expect("tempdir");
    let home_dir = TempDir::new().expect("tempdir");
    let launcher = launcher(&state_dir, &default_workdir, &home_dir);

    let mut t = task("t1");
    t.worktree = Some("missing-wt".to_string());
    t.workdir = Some("missing-wd".to_string());
    t.resolved_workdir = Some(PathBuf::from("/also/missing"));

    assert_eq!(launcher.resolve_workdir(&t), default_workdir.path());
}

#[tokio::test]
async fn launch_background_returns_owned_child_and_records_spawn() {
    let state_dir = TempDir::new().expect("tempdir");
    let default_workdir = TempDir::new().expect("tempdir");
    let home_dir = TempDir::new().expect("tempdir");
    let spawner = FakeProcessSpawner::new();
    let session = FakeSessionAdapter::new();
    let launcher = WorkerLauncher::new(
        StatePaths::new(state_dir.path()),
        spawner.clone(),
        session,
        "worker run \"${prompt}\"",
        default_workdir.path(),
        home_dir.path(),
    );
    let project_id = ProjectId::new("proj");
    let t = task("t1");

    let outcome = launcher
        .launch(&project_id, &t, LaunchMode::Background, false, None, None)
        .await
        .expect("launch");

    match outcome {
        LaunchOutcome::Owned { pid, .. } => assert!(pid > 0),
        LaunchOutcome::External { .. } => panic!("expected owned outcome"),
    }
    let spawns = spawner.spawns();
    assert_eq!(spawns.len(), 1);
    assert_eq!(spawns[0].program, "sh");
}

#[tokio::test]
async fn launch_tui_hands_off_to_session_adapter() {
    let state_dir = TempDir::new().expect("tempdir");
    let default_workdir = TempDir::new().expect("tempdir");
    let home_dir = TempDir::new().expect("tempdir");
    let launcher = launcher(&state_dir, &default_workdir, &home_dir);
    let project_id = ProjectId::new("proj");
    let t = task("t1");

    let outcome = launcher
        .launch(&project_id, &t, LaunchMode::Tui, true, None, Some("pane-1"))
        .await
        .expect("launch");

    match outcome {
        LaunchOutcome::External {
            pid, window_name, ..
        } => {
            assert!(pid.is_none());
            assert!(window_name.is_some());
        }
        LaunchOutcome::Owned { .. } => panic!("expected external outcome"),
    }
}

#[test]
fn cleanup_removes_prompt_and_log_without_raising_on_missing() {
    let state_dir = TempDir::new().expect("tempdir");
    let default_workdir = TempDir::new().expect("tempdir");
    let home_dir = TempDir::new().expect("tempdir");
    let launcher = launcher(&state_dir, &default_workdir, &home_dir);
    let project_id = ProjectId::new("proj");
    let t = task("t1");

    launcher.write_prompt(&project_id, &t, false).expect("write");
    launcher.cleanup(&project_id, &t.id);

    let prompt_path = StatePaths::new(state_dir.path()).prompt(&project_id, &t.id);
    assert!(!prompt_path.exists());

    // Second cleanup on already-missing files must not panic.
    launcher.cleanup(&project_id, &t.id);
}
