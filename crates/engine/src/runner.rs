// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Runner: the polling/dispatch loop that ties the Process Manager,
//! Worker Launcher, Worker-Session Probe and Task-Service Client together.
//!
//! One `Runner` instance owns every project a single runner process is
//! responsible for. Ownership is tracked two ways depending on how a task
//! was launched: owned child processes live in the `ProcessManager`, keyed
//! by `(projectId, taskId)`; externally-hosted sessions (tui/dashboard mode)
//! live in `sessions`, the runner's own composite-keyed map. Both sets
//! participate in capacity accounting, idle detection and crash recovery
//! identically — the split exists only because one has an owned process
//! handle to wait on and the other doesn't.

use async_trait::async_trait;
use oj_adapters::{
    ClaimResult, HealthStatus, ProcessSpawner, SessionAdapter, SessionProbe, SessionStatus,
    TaskServiceClient,
};
use oj_core::{
    Classification, Clock, CompletionStatus, CompositeKey, Priority, ProjectId, RunnerId,
    RunnerState, RunnerStats, RunnerStatus, RunningTask, Task, TaskId, TaskResultStatus,
    TaskStatus,
};
use oj_storage::StateStore;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::RuntimeError;
use crate::events::EventBus;
use crate::launcher::{LaunchMode, LaunchOutcome, WorkerLauncher};
use crate::process_manager::ProcessManager;
use crate::signal_supervisor::ShutdownCapability;
use oj_core::RunnerEvent;

/// Tunables that shape the polling loop. Defaults mirror distilled spec §6.
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    pub projects: Vec<ProjectId>,
    pub start_paused: bool,
    pub launch_mode: LaunchMode,
    pub max_parallel: usize,
    pub task_timeout_ms: u64,
    pub kill_grace: Duration,
    pub idle_detection_threshold_ms: u64,
    pub poll_interval: Duration,
    pub graceful_timeout: Duration,
    pub force_kill_timeout: Duration,
    /// The status a crashed/timed-out/failed task is set to on the server.
    /// Kept configurable rather than hardcoded `"blocked"` per the open
    /// question in distilled spec §9, but `"blocked"` is the only value
    /// in production use today.
    pub crash_status: &'static str,
    /// `RUNNER_MEMORY_THRESHOLD`, percent, 0 disables. No memory sampler is
    /// part of this core; the value is only carried through to
    /// `Runner::status()` for a future memory-aware scheduler to read.
    pub memory_threshold_percent: u8,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            projects: Vec::new(),
            start_paused: false,
            launch_mode: LaunchMode::Background,
            max_parallel: 2,
            task_timeout_ms: 1_800_000,
            kill_grace: crate::process_manager::DEFAULT_KILL_GRACE,
            idle_detection_threshold_ms: 60_000,
            poll_interval: Duration::from_secs(5),
            graceful_timeout: Duration::from_secs(30),
            force_kill_timeout: Duration::from_secs(5),
            crash_status: "blocked",
            memory_threshold_percent: 10,
        }
    }
}

/// What one `tick()` accomplished, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickReport {
    pub ready_count: usize,
    pub running_count: usize,
}

/// An owned, point-in-time view of the runner's state. Never a guard: a
/// reader holding this cannot block a concurrent tick.
#[derive(Debug, Clone)]
pub struct RunnerStatusSnapshot {
    pub runner_id: RunnerId,
    pub projects: Vec<ProjectId>,
    pub paused_projects: Vec<ProjectId>,
    pub running_count: usize,
    pub session_count: usize,
    pub stats: HashMap<ProjectId, RunnerStats>,
    pub memory_threshold_percent: u8,
}

/// Ties every adapter together into the scheduling core. Generic over the
/// four I/O boundaries so tests run the identical code path against fakes.
pub struct Runner<T, Pr, Sp, Se, C>
where
    T: TaskServiceClient,
    Pr: SessionProbe,
    Sp: ProcessSpawner,
    Se: SessionAdapter,
    C: Clock,
{
    runner_id: RunnerId,
    options: RunnerOptions,
    task_service: Arc<T>,
    probe: Arc<Pr>,
    launcher: WorkerLauncher<Sp, Se>,
    process_manager: ProcessManager,
    state_store: StateStore,
    events: EventBus,
    clock: C,
    shutdown: CancellationToken,
    paused_projects: Mutex<HashSet<ProjectId>>,
    sessions: Mutex<HashMap<CompositeKey, RunningTask>>,
    stats: Mutex<HashMap<ProjectId, RunnerStats>>,
    started_at_ms: Mutex<HashMap<ProjectId, u64>>,
}

impl<T, Pr, Sp, Se, C> Runner<T, Pr, Sp, Se, C>
where
    T: TaskServiceClient,
    Pr: SessionProbe,
    Sp: ProcessSpawner,
    Se: SessionAdapter,
    C: Clock,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        runner_id: RunnerId,
        options: RunnerOptions,
        task_service: Arc<T>,
        probe: Arc<Pr>,
        launcher: WorkerLauncher<Sp, Se>,
        state_store: StateStore,
        events: EventBus,
        clock: C,
    ) -> Self {
        let process_manager =
            ProcessManager::with_kill_grace(options.task_timeout_ms, options.kill_grace);
        let now = clock.epoch_ms();
        let started_at_ms = options.projects.iter().map(|p| (p.clone(), now)).collect();
        let paused_projects = if options.start_paused {
            options.projects.iter().cloned().collect()
        } else {
            HashSet::new()
        };

        Self {
            runner_id,
            options,
            task_service,
            probe,
            launcher,
            process_manager,
            state_store,
            events,
            clock,
            shutdown: CancellationToken::new(),
            paused_projects: Mutex::new(paused_projects),
            sessions: Mutex::new(HashMap::new()),
            stats: Mutex::new(HashMap::new()),
            started_at_ms: Mutex::new(started_at_ms),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn status(&self) -> RunnerStatusSnapshot {
        RunnerStatusSnapshot {
            runner_id: self.runner_id.clone(),
            projects: self.options.projects.clone(),
            paused_projects: self.paused_projects.lock().iter().cloned().collect(),
            running_count: self.process_manager.running_count() + self.sessions.lock().len(),
            session_count: self.sessions.lock().len(),
            stats: self.stats.lock().clone(),
            memory_threshold_percent: self.options.memory_threshold_percent,
        }
    }

    /// Runs crash recovery and, if `start_paused` was requested, persists
    /// the pause onto each project's root task. Must be called once before
    /// the first `tick()`.
    pub async fn initialize(&self) -> Result<(), RuntimeError> {
        if self.options.start_paused {
            for project in self.options.projects.clone() {
                if let Err(error) = self.set_root_task_status(&project, "blocked").await {
                    tracing::warn!(%error, project = %project, "failed to persist startPaused on root task");
                }
            }
        }
        self.crash_recovery().await?;
        Ok(())
    }

    /// Drives the polling loop until the shutdown token fires.
    pub async fn run(&self) -> Result<(), RuntimeError> {
        self.initialize().await?;
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    return Ok(());
                }
                _ = tokio::time::sleep(self.options.poll_interval) => {
                    match self.tick().await {
                        Ok(report) => tracing::debug!(
                            ready = report.ready_count,
                            running = report.running_count,
                            "poll tick complete"
                        ),
                        Err(error) => tracing::error!(%error, "poll tick failed"),
                    }
                }
            }
        }
    }

    /// The 12-step polling tick, per distilled spec §4.6.
    pub async fn tick(&self) -> Result<TickReport, RuntimeError> {
        self.process_manager.drain_exits();

        let health = self.task_service.health().await;
        if health.status == HealthStatus::Unhealthy {
            tracing::warn!("task service unhealthy, skipping poll tick");
            self.events.publish(RunnerEvent::PollComplete {
                ready_count: 0,
                running_count: 0,
            });
            return Ok(TickReport::default());
        }

        self.reap_owned().await;
        self.reap_external().await;
        self.idle_sweep().await;
        self.unblock_sweep().await;

        let in_flight = self.process_manager.running_count() + self.sessions.lock().len();
        let capacity = self.options.max_parallel.saturating_sub(in_flight);
        if capacity == 0 {
            self.events.publish(RunnerEvent::PollComplete {
                ready_count: 0,
                running_count: in_flight,
            });
            return Ok(TickReport {
                ready_count: 0,
                running_count: in_flight,
            });
        }

        let paused = self.paused_projects.lock().clone();
        let active: Vec<ProjectId> = self
            .options
            .projects
            .iter()
            .filter(|p| !paused.contains(p))
            .cloned()
            .collect();
        if active.is_empty() {
            self.events.publish(RunnerEvent::PollComplete {
                ready_count: 0,
                running_count: in_flight,
            });
            return Ok(TickReport {
                ready_count: 0,
                running_count: in_flight,
            });
        }

        let merged = self.fan_out_ready(&active).await;
        let ready_count = merged.len();

        let tracked = self.tracked_keys();
        let selected: Vec<(ProjectId, Task)> = merged
            .into_iter()
            .filter(|(project, task)| {
                !tracked.contains(&CompositeKey::new(project.clone(), task.id.clone()))
            })
            .take(capacity)
            .collect();

        for (project, task) in &selected {
            self.claim_and_spawn(project, task).await;
        }

        self.persist_all()?;

        let running_count = self.process_manager.running_count() + self.sessions.lock().len();
        self.events.publish(RunnerEvent::PollComplete {
            ready_count,
            running_count,
        });
        Ok(TickReport {
            ready_count,
            running_count,
        })
    }

    fn tracked_keys(&self) -> HashSet<CompositeKey> {
        let mut keys: HashSet<CompositeKey> = self
            .process_manager
            .to_json()
            .into_iter()
            .map(|s| s.running_task.composite_key())
            .collect();
        keys.extend(self.sessions.lock().keys().cloned());
        keys
    }

    /// Fans `list_ready` out across every active project concurrently,
    /// merging results while tolerating a project's individual failure. A
    /// project's own task order is preserved; the order projects are merged
    /// in is not, since the calls race against each other.
    async fn fan_out_ready(&self, active: &[ProjectId]) -> Vec<(ProjectId, Task)> {
        let mut set = tokio::task::JoinSet::new();
        for project in active.iter().cloned() {
            let client = Arc::clone(&self.task_service);
            set.spawn(async move {
                let result = client.list_ready(&project).await;
                (project, result)
            });
        }

        let mut merged = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((project, Ok(tasks))) => {
                    for task in tasks {
                        merged.push((project.clone(), task));
                    }
                }
                Ok((project, Err(error))) => {
                    tracing::warn!(%error, project = %project, "listReady failed this tick, tolerating partial failure");
                }
                Err(join_error) => {
                    tracing::warn!(%join_error, "listReady task panicked");
                }
            }
        }
        merged
    }

    async fn claim_and_spawn(&self, project: &ProjectId, task: &Task) -> bool {
        let claim = match self
            .task_service
            .claim(project, &task.id, &self.runner_id)
            .await
        {
            Ok(claim) => claim,
            Err(error) => {
                tracing::warn!(%error, project = %project, task_id = %task.id, "claim failed");
                return false;
            }
        };
        if !claim.is_claimed() {
            if let ClaimResult::Conflict {
                claimed_by,
                is_stale,
            } = claim
            {
                tracing::debug!(project = %project, task_id = %task.id, claimed_by, is_stale, "claim conflict, deferring to server's staleness verdict");
            }
            return false;
        }

        if let Err(error) = self.task_service.update_status(&task.path, "in_progress").await {
            tracing::warn!(%error, task_id = %task.id, "updateStatus(in_progress) failed after claim, releasing");
            let _ = self.task_service.release(project, &task.id).await;
            return false;
        }

        let now = self.clock.epoch_ms();
        let workdir = self.launcher.resolve_workdir(task);
        let outcome = self
            .launcher
            .launch(project, task, self.options.launch_mode, false, None, None)
            .await;

        match outcome {
            Ok(LaunchOutcome::Owned { pid, child }) => {
                let running = Self::new_running_task(project, task, pid, now, false, workdir, None, None);
                if let Err(error) = self.process_manager.add(running, child) {
                    tracing::warn!(%error, task_id = %task.id, "process manager rejected duplicate add");
                    let _ = self.task_service.release(project, &task.id).await;
                    return false;
                }
            }
            Ok(LaunchOutcome::External {
                pid,
                window_name,
                pane_id,
            }) => {
                let running = Self::new_running_task(
                    project,
                    task,
                    pid.unwrap_or(0),
                    now,
                    false,
                    workdir,
                    window_name,
                    pane_id,
                );
                self.sessions.lock().insert(running.composite_key(), running);
            }
            Err(error) => {
                tracing::warn!(%error, task_id = %task.id, "worker launch failed, releasing claim");
                let _ = self.task_service.release(project, &task.id).await;
                return false;
            }
        }

        self.events.publish(RunnerEvent::TaskStarted {
            project_id: project.clone(),
            task_id: task.id.clone(),
        });
        true
    }

    #[allow(clippy::too_many_arguments)]
    fn new_running_task(
        project: &ProjectId,
        task: &Task,
        pid: u32,
        started_at_ms: u64,
        is_resume: bool,
        workdir: std::path::PathBuf,
        window_name: Option<String>,
        pane_id: Option<String>,
    ) -> RunningTask {
        RunningTask {
            task_id: task.id.clone(),
            project_id: project.clone(),
            path: task.path.clone(),
            title: task.title.clone(),
            priority: task.priority,
            pid,
            started_at_ms,
            is_resume,
            workdir,
            window_name,
            pane_id,
            worker_endpoint_port: None,
            idle_since_ms: None,
        }
    }

    async fn reap_owned(&self) {
        self.process_manager.drain_exits();
        let now = self.clock.epoch_ms();
        for snapshot in self.process_manager.to_json() {
            let key = snapshot.running_task.composite_key();
            let status = self.process_manager.check_completion(&key, now, || None);
            if !status.is_terminal() {
                continue;
            }
            if status == CompletionStatus::Timeout {
                self.process_manager.kill(&key).await;
            }
            let result = self.process_manager.create_task_result(&key, status);
            self.handle_task_completion(&snapshot.running_task, status, true, result.exit_code)
                .await;
        }
    }

    async fn reap_external(&self) {
        let sessions_snapshot: Vec<RunningTask> = self.sessions.lock().values().cloned().collect();
        if sessions_snapshot.is_empty() {
            return;
        }

        let tasks_by_project = self.list_all_by_project(&sessions_snapshot).await;

        for running in sessions_snapshot {
            let Some(task) = tasks_by_project
                .get(&running.project_id)
                .and_then(|m| m.get(&running.task_id))
            else {
                continue;
            };
            let status = match task.status {
                TaskStatus::Completed | TaskStatus::Validated => Some(CompletionStatus::Completed),
                TaskStatus::Cancelled => Some(CompletionStatus::Cancelled),
                // `blocked` does not finalize the session: idle detection
                // may have put it there itself, and the worker is still
                // hosted and may resume.
                _ => None,
            };
            if let Some(status) = status {
                self.handle_task_completion(&running, status, false, None).await;
            }
        }
    }

    async fn list_all_by_project(
        &self,
        running: &[RunningTask],
    ) -> HashMap<ProjectId, HashMap<TaskId, Task>> {
        let mut projects: Vec<ProjectId> = running.iter().map(|r| r.project_id.clone()).collect();
        projects.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        projects.dedup();

        let mut by_project = HashMap::new();
        for project in &projects {
            match self.task_service.list_all(project).await {
                Ok(tasks) => {
                    by_project.insert(
                        project.clone(),
                        tasks.into_iter().map(|t| (t.id.clone(), t)).collect(),
                    );
                }
                Err(error) => {
                    tracing::warn!(%error, project = %project, "listAll failed");
                }
            }
        }
        by_project
    }

    /// Every task the runner currently has a live handle for (owned or
    /// external), tagged with whether it's process-manager-owned.
    fn live_tracked(&self) -> Vec<(CompositeKey, RunningTask, bool)> {
        let mut live: Vec<(CompositeKey, RunningTask, bool)> = self
            .process_manager
            .to_json()
            .into_iter()
            .filter(|s| !s.exited)
            .map(|s| {
                let key = s.running_task.composite_key();
                (key, s.running_task, true)
            })
            .collect();
        live.extend(
            self.sessions
                .lock()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone(), false)),
        );
        live
    }

    /// Discovers each live task's worker endpoint and escalates sustained
    /// idleness to a `blocked` status, per the idle detection state machine
    /// in distilled spec §4.6. The session itself is never terminated here.
    async fn idle_sweep(&self) {
        let now = self.clock.epoch_ms();
        for (key, mut running, owned) in self.live_tracked() {
            if running.worker_endpoint_port.is_none() {
                match self.probe.discover_endpoint(running.pid).await {
                    Ok(Some(port)) => {
                        running.worker_endpoint_port = Some(port);
                        self.set_tracked_endpoint(&key, owned, port);
                    }
                    Ok(None) => continue,
                    Err(error) => {
                        tracing::warn!(%error, task = %key, "discoverEndpoint failed");
                        continue;
                    }
                }
            }
            let Some(port) = running.worker_endpoint_port else {
                continue;
            };

            match self.probe.check_status(port).await {
                SessionStatus::Busy => self.clear_tracked_idle(&key, owned),
                SessionStatus::Idle => {
                    let idle_since = self.mark_tracked_idle(&key, owned, now);
                    if let Some(since) = idle_since {
                        if now.saturating_sub(since) >= self.options.idle_detection_threshold_ms {
                            self.block_idle_task(&key, owned).await;
                        }
                    }
                }
                SessionStatus::Unavailable => {}
            }
        }
    }

    fn set_tracked_endpoint(&self, key: &CompositeKey, owned: bool, port: u16) {
        if owned {
            self.process_manager.set_worker_endpoint_port(key, port);
        } else if let Some(entry) = self.sessions.lock().get_mut(key) {
            entry.worker_endpoint_port = Some(port);
        }
    }

    fn clear_tracked_idle(&self, key: &CompositeKey, owned: bool) {
        if owned {
            self.process_manager.clear_idle(key);
        } else if let Some(entry) = self.sessions.lock().get_mut(key) {
            entry.clear_idle();
        }
    }

    fn mark_tracked_idle(&self, key: &CompositeKey, owned: bool, now_ms: u64) -> Option<u64> {
        if owned {
            self.process_manager.mark_idle(key, now_ms);
            self.process_manager.running_task(key).and_then(|r| r.idle_since_ms)
        } else {
            let mut sessions = self.sessions.lock();
            let entry = sessions.get_mut(key)?;
            entry.mark_idle(now_ms);
            entry.idle_since_ms
        }
    }

    fn tracked_running(&self, key: &CompositeKey, owned: bool) -> Option<RunningTask> {
        if owned {
            self.process_manager.running_task(key)
        } else {
            self.sessions.lock().get(key).cloned()
        }
    }

    async fn block_idle_task(&self, key: &CompositeKey, owned: bool) {
        let Some(running) = self.tracked_running(key, owned) else {
            return;
        };
        if let Err(error) = self.task_service.update_status(&running.path, "blocked").await {
            tracing::warn!(%error, task = %key, "failed to mark idle task blocked");
            return;
        }
        let note = format!(
            "Runner marked this task blocked after {}ms of worker idle time.",
            self.options.idle_detection_threshold_ms
        );
        if let Err(error) = self.task_service.append_body(&running.path, &note).await {
            tracing::warn!(%error, task = %key, "failed to append idle-blocked note");
        }
    }

    /// Resumes a task the idle sweep previously blocked once its worker
    /// shows activity again, per the auto-resume sweep in distilled spec §4.6.
    async fn unblock_sweep(&self) {
        let live = self.live_tracked();
        if live.is_empty() {
            return;
        }

        let mut projects: Vec<ProjectId> = live.iter().map(|(_, r, _)| r.project_id.clone()).collect();
        projects.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        projects.dedup();

        let mut blocked_by_project: HashMap<ProjectId, HashMap<TaskId, Task>> = HashMap::new();
        for project in &projects {
            match self.task_service.list_blocked(project).await {
                Ok(tasks) => {
                    blocked_by_project.insert(
                        project.clone(),
                        tasks.into_iter().map(|t| (t.id.clone(), t)).collect(),
                    );
                }
                Err(error) => {
                    tracing::warn!(%error, project = %project, "listBlocked failed during unblock sweep");
                }
            }
        }

        for (key, running, owned) in live {
            let alive = if owned {
                self.process_manager.is_running(&key)
            } else {
                self.probe.is_pid_alive(running.pid)
            };
            if !alive {
                continue;
            }
            let Some(task) = blocked_by_project
                .get(&running.project_id)
                .and_then(|m| m.get(&running.task_id))
            else {
                continue;
            };
            let Some(port) = running.worker_endpoint_port else {
                continue;
            };
            if self.probe.check_status(port).await != SessionStatus::Busy {
                continue;
            }

            if let Err(error) = self.task_service.update_status(&task.path, "in_progress").await {
                tracing::warn!(%error, task = %key, "failed to resume idle-blocked task");
                continue;
            }
            let _ = self
                .task_service
                .append_body(&task.path, "Runner observed worker activity and resumed this task.")
                .await;
            self.clear_tracked_idle(&key, owned);
        }
    }

    async fn handle_task_completion(
        &self,
        running: &RunningTask,
        status: CompletionStatus,
        owned: bool,
        exit_code: Option<i32>,
    ) {
        let now = self.clock.epoch_ms();
        let duration_ms = now.saturating_sub(running.started_at_ms);
        let key = running.composite_key();

        {
            let mut stats = self.stats.lock();
            let entry = stats.entry(running.project_id.clone()).or_default();
            if status == CompletionStatus::Completed {
                entry.record_completion(duration_ms);
            } else {
                entry.record_failure(duration_ms);
            }
        }

        if !matches!(status, CompletionStatus::Completed | CompletionStatus::Cancelled) {
            if let Err(error) = self
                .task_service
                .update_status(&running.path, self.options.crash_status)
                .await
            {
                tracing::warn!(%error, task = %key, "best-effort updateStatus on finalize failed");
            }
            let note = match exit_code {
                Some(code) => format!("Worker finalized as {status:?} (exit code {code}) at {now}ms."),
                None => format!("Worker finalized as {status:?} at {now}ms."),
            };
            if let Err(error) = self.task_service.append_body(&running.path, &note).await {
                tracing::warn!(%error, task = %key, "best-effort appendBody on finalize failed");
            }
        }

        if let Err(error) = self
            .task_service
            .release(&running.project_id, &running.task_id)
            .await
        {
            tracing::warn!(%error, task = %key, "best-effort release on finalize failed");
        }

        self.launcher.cleanup(&running.project_id, &running.task_id);

        if owned {
            self.process_manager.remove(&key);
        } else {
            self.sessions.lock().remove(&key);
        }

        let event = match status {
            CompletionStatus::Completed => RunnerEvent::TaskCompleted {
                project_id: running.project_id.clone(),
                task_id: running.task_id.clone(),
            },
            CompletionStatus::Cancelled => RunnerEvent::TaskCancelled {
                project_id: running.project_id.clone(),
                task_id: running.task_id.clone(),
            },
            other => RunnerEvent::TaskFailed {
                project_id: running.project_id.clone(),
                task_id: running.task_id.clone(),
                status: TaskResultStatus::from(other),
            },
        };
        self.events.publish(event);

        if let Err(error) = self.persist_one(&running.project_id) {
            tracing::warn!(%error, project = %running.project_id, "failed to persist state after task completion");
        }
    }

    /// Best-effort cancellation: terminates whatever handle is live, marks
    /// the task cancelled on the server, and releases the claim.
    pub async fn cancel_task(&self, project: &ProjectId, task_id: &TaskId, task_path: &str) {
        let key = CompositeKey::new(project.clone(), task_id.clone());
        if self.process_manager.is_running(&key) {
            self.process_manager.kill(&key).await;
            self.process_manager.remove(&key);
        } else if let Some(running) = self.sessions.lock().remove(&key) {
            if let Some(window) = &running.window_name {
                if let Err(error) = self.launcher.session().kill(window).await {
                    tracing::warn!(%error, task = %key, "failed to kill external session on cancel");
                }
            }
        }

        if let Err(error) = self.task_service.update_status(task_path, "cancelled").await {
            tracing::warn!(%error, task = %key, "failed to mark task cancelled");
        }
        if let Err(error) = self.task_service.release(project, task_id).await {
            tracing::warn!(%error, task = %key, "failed to release cancelled task's claim");
        }
        let _ = self
            .task_service
            .append_body(task_path, "Cancelled by operator request.")
            .await;

        self.stats.lock().entry(project.clone()).or_default().record_failure(0);
        self.events.publish(RunnerEvent::TaskCancelled {
            project_id: project.clone(),
            task_id: task_id.clone(),
        });
        if let Err(error) = self.persist_one(project) {
            tracing::warn!(%error, project = %project, "failed to persist state after cancellation");
        }
    }

    pub async fn pause(&self, project: &ProjectId) {
        self.paused_projects.lock().insert(project.clone());
        if let Err(error) = self.set_root_task_status(project, "blocked").await {
            tracing::warn!(%error, project = %project, "failed to persist pause on root task");
        }
        self.events.publish(RunnerEvent::ProjectPaused {
            project_id: project.clone(),
        });
    }

    pub async fn resume(&self, project: &ProjectId) {
        self.paused_projects.lock().remove(project);
        if let Err(error) = self.set_root_task_status(project, "pending").await {
            tracing::warn!(%error, project = %project, "failed to persist resume on root task");
        }
        self.events.publish(RunnerEvent::ProjectResumed {
            project_id: project.clone(),
        });
    }

    pub async fn pause_all(&self) {
        let projects = self.options.projects.clone();
        for project in &projects {
            self.pause(project).await;
        }
        self.events.publish(RunnerEvent::AllPaused);
    }

    pub async fn resume_all(&self) {
        let projects = self.options.projects.clone();
        for project in &projects {
            self.resume(project).await;
        }
        self.events.publish(RunnerEvent::AllResumed);
    }

    /// Every project has exactly one dependency-free root task named after
    /// the project itself; pause/resume is persisted there so the server
    /// remains the durable source of truth for pause state across restarts.
    async fn set_root_task_status(&self, project: &ProjectId, status: &str) -> Result<(), RuntimeError> {
        let tasks = self.task_service.list_all(project).await?;
        let root = tasks
            .into_iter()
            .find(|t| t.title == project.as_str() && t.depends_on.is_empty());
        if let Some(root) = root {
            self.task_service.update_status(&root.path, status).await?;
        }
        Ok(())
    }

    fn is_tracked(&self, key: &CompositeKey) -> bool {
        self.process_manager.is_running(key) || self.sessions.lock().contains_key(key)
    }

    /// Crash recovery, split into two passes per the teacher's reconcile/
    /// materialize lifecycle split: first re-adopt anything the server
    /// still thinks is in progress, then fold in anything our own last
    /// snapshot remembers that the first pass missed.
    pub async fn crash_recovery(&self) -> Result<(), RuntimeError> {
        self.reconcile_orphans().await?;
        self.reconcile_snapshot().await?;
        Ok(())
    }

    async fn reconcile_orphans(&self) -> Result<(), RuntimeError> {
        for project in self.options.projects.clone() {
            let in_progress = match self.task_service.list_in_progress(&project).await {
                Ok(tasks) => tasks,
                Err(error) => {
                    tracing::warn!(%error, project = %project, "listInProgress failed during orphan recovery");
                    continue;
                }
            };
            for task in in_progress {
                let key = CompositeKey::new(project.clone(), task.id.clone());
                if self.is_tracked(&key) {
                    continue;
                }
                self.resume_spawn(&project, &task).await;
            }
        }
        Ok(())
    }

    async fn reconcile_snapshot(&self) -> Result<(), RuntimeError> {
        for project in self.options.projects.clone() {
            let snapshot = self.state_store.load_runner_state(&project)?;
            let Some(state) = snapshot else { continue };

            self.stats.lock().insert(project.clone(), state.stats.clone());
            self.started_at_ms.lock().insert(project.clone(), state.started_at_ms);

            for running in state.running_tasks {
                let key = running.composite_key();
                if self.is_tracked(&key) {
                    continue;
                }
                let task = reconstruct_task(&running);
                self.resume_spawn(&project, &task).await;
            }
        }
        Ok(())
    }

    async fn resume_spawn(&self, project: &ProjectId, task: &Task) {
        let now = self.clock.epoch_ms();
        let workdir = self.launcher.resolve_workdir(task);
        let outcome = self
            .launcher
            .launch(project, task, self.options.launch_mode, true, None, None)
            .await;

        match outcome {
            Ok(LaunchOutcome::Owned { pid, child }) => {
                let running = Self::new_running_task(project, task, pid, now, true, workdir, None, None);
                if let Err(error) = self.process_manager.add(running, child) {
                    tracing::warn!(%error, task_id = %task.id, "resume-spawn rejected by process manager");
                }
            }
            Ok(LaunchOutcome::External {
                pid,
                window_name,
                pane_id,
            }) => {
                let running = Self::new_running_task(
                    project,
                    task,
                    pid.unwrap_or(0),
                    now,
                    true,
                    workdir,
                    window_name,
                    pane_id,
                );
                self.sessions.lock().insert(running.composite_key(), running);
            }
            Err(error) => {
                tracing::warn!(%error, task_id = %task.id, "resume-spawn launch failed");
            }
        }
    }

    fn running_tasks_for_project(&self, project: &ProjectId) -> Vec<RunningTask> {
        let mut tasks: Vec<RunningTask> = self
            .process_manager
            .to_json()
            .into_iter()
            .map(|s| s.running_task)
            .filter(|r| &r.project_id == project)
            .collect();
        tasks.extend(
            self.sessions
                .lock()
                .values()
                .filter(|r| &r.project_id == project)
                .cloned(),
        );
        tasks
    }

    fn persist_one(&self, project: &ProjectId) -> Result<(), RuntimeError> {
        let now = self.clock.epoch_ms();
        let stats = self.stats.lock().get(project).cloned().unwrap_or_default();
        let started_at_ms = *self.started_at_ms.lock().get(project).unwrap_or(&now);
        let running_tasks = self.running_tasks_for_project(project);
        let status = if self.paused_projects.lock().contains(project) {
            RunnerStatus::Idle
        } else if !running_tasks.is_empty() {
            RunnerStatus::Processing
        } else {
            RunnerStatus::Polling
        };
        let state = RunnerState {
            project_id: project.clone(),
            status,
            running_tasks,
            stats,
            started_at_ms,
            updated_at_ms: now,
        };
        self.state_store.save_runner_state(project, &state)?;
        self.state_store.save_running_tasks(project, &state.running_tasks)?;
        self.events.publish(RunnerEvent::StateSaved {
            project_id: project.clone(),
        });
        Ok(())
    }

    fn persist_all(&self) -> Result<(), RuntimeError> {
        for project in self.options.projects.clone() {
            self.persist_one(&project)?;
        }
        Ok(())
    }
}

/// Rebuilds a minimal `Task` view from a persisted `RunningTask` for
/// resume-spawning. The reconstructed task carries no dependency metadata;
/// that's fine, since resume-spawn only needs `id`, `path`, `title`,
/// `priority` and a resolved workdir, never classification.
fn reconstruct_task(running: &RunningTask) -> Task {
    Task {
        id: running.task_id.clone(),
        path: running.path.clone(),
        title: running.title.clone(),
        priority: running.priority,
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
        resolved_workdir: Some(running.workdir.clone()),
        user_original_request: None,
    }
}

#[async_trait]
impl<T, Pr, Sp, Se, C> ShutdownCapability for Runner<T, Pr, Sp, Se, C>
where
    T: TaskServiceClient,
    Pr: SessionProbe,
    Sp: ProcessSpawner,
    Se: SessionAdapter,
    C: Clock,
{
    fn running_count(&self) -> usize {
        self.process_manager.running_count() + self.sessions.lock().len()
    }

    async fn kill_all(&self) {
        self.process_manager.kill_all().await;
        let sessions: Vec<RunningTask> = self.sessions.lock().drain().map(|(_, v)| v).collect();
        for running in sessions {
            if let Some(window) = &running.window_name {
                if let Err(error) = self.launcher.session().kill(window).await {
                    tracing::warn!(%error, window, "failed to kill external session during shutdown");
                }
            }
        }
    }

    async fn on_shutdown(&self, reason: &str) {
        self.shutdown.cancel();
        self.events.publish(RunnerEvent::Shutdown {
            reason: reason.to_string(),
        });
        for project in self.options.projects.clone() {
            let now = self.clock.epoch_ms();
            let stats = self.stats.lock().get(&project).cloned().unwrap_or_default();
            let started_at_ms = *self.started_at_ms.lock().get(&project).unwrap_or(&now);
            let running_tasks = self.running_tasks_for_project(&project);
            let state = RunnerState {
                project_id: project.clone(),
                status: RunnerStatus::Stopped,
                running_tasks,
                stats,
                started_at_ms,
                updated_at_ms: now,
            };
            if let Err(error) = self.state_store.save_runner_state(&project, &state) {
                tracing::warn!(%error, project = %project, "failed to persist final state on shutdown");
            }
        }
    }

    fn reload_config(&self) {
        // The daemon re-reads its environment only on restart today; SIGHUP
        // is logged as an acknowledged no-op rather than silently dropped.
        tracing::info!("config reload requested; no live-reloadable configuration yet");
    }
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
