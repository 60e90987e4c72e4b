// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Owns the mapping from `(projectId, taskId)` to its owned OS child
//! process. Task ids are unique only within a project, so every entry is
//! keyed by the composite key, never by the bare task id.
//!
//! Exit observation is asynchronous: `add` spawns a background task that
//! awaits the child's exit and reports it over an mpsc channel rather than
//! touching shared state directly. The channel is the only writer that
//! isn't the scheduler thread itself — `drain_exits` (called from every
//! read path here, and explicitly by the Runner each poll tick) applies
//! pending events, so entry mutation always happens on the caller's thread.

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use oj_core::{CompletionStatus, CompositeKey, RunningTask, TaskResult, TaskResultStatus};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Child;
use tokio::sync::mpsc;

/// Grace window between SIGTERM and SIGKILL, per distilled spec §4.3.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("task {0} is already tracked")]
    DuplicateEntry(CompositeKey),
}

struct ExitEvent {
    key: CompositeKey,
    exit_code: Option<i32>,
    exited_at_ms: u64,
}

struct Entry {
    running_task: RunningTask,
    exited: bool,
    exit_code: Option<i32>,
    exited_at_ms: Option<u64>,
}

/// A snapshot row for `toJSON`/`restoreFromState`, per distilled spec §4.3.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ProcessEntrySnapshot {
    pub running_task: RunningTask,
    pub exited: bool,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub exited_at_ms: Option<u64>,
}

pub struct ProcessManager {
    task_timeout_ms: u64,
    kill_grace: Duration,
    entries: Mutex<HashMap<CompositeKey, Entry>>,
    exit_tx: mpsc::UnboundedSender<ExitEvent>,
    exit_rx: Mutex<mpsc::UnboundedReceiver<ExitEvent>>,
}

impl ProcessManager {
    pub fn new(task_timeout_ms: u64) -> Self {
        Self::with_kill_grace(task_timeout_ms, DEFAULT_KILL_GRACE)
    }

    pub fn with_kill_grace(task_timeout_ms: u64, kill_grace: Duration) -> Self {
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        Self {
            task_timeout_ms,
            kill_grace,
            entries: Mutex::new(HashMap::new()),
            exit_tx,
            exit_rx: Mutex::new(exit_rx),
        }
    }

    /// Applies any exit events reported by reaper tasks since the last
    /// call. Safe to call as often as desired; a no-op when nothing is
    /// pending.
    pub fn drain_exits(&self) {
        let mut rx = self.exit_rx.lock();
        let mut entries = self.entries.lock();
        while let Ok(event) = rx.try_recv() {
            if let Some(entry) = entries.get_mut(&event.key) {
                entry.exited = true;
                entry.exit_code = event.exit_code;
                entry.exited_at_ms = Some(event.exited_at_ms);
            }
        }
    }

    /// Registers a freshly spawned owned child. Spawns the background
    /// reaper that owns `child` and reports its exit over the channel.
    pub fn add(&self, running_task: RunningTask, mut child: Child) -> Result<(), ProcessError> {
        self.drain_exits();
        let key = running_task.composite_key();
        let mut entries = self.entries.lock();
        if entries.contains_key(&key) {
            return Err(ProcessError::DuplicateEntry(key));
        }

        let reaper_key = key.clone();
        let exit_tx = self.exit_tx.clone();
        tokio::spawn(async move {
            let result = child.wait().await;
            let now_ms = epoch_ms();
            let exit_code = match result {
                Ok(status) => status.code(),
                Err(error) => {
                    tracing::warn!(task = %reaper_key, %error, "failed to observe child exit");
                    None
                }
            };
            let _ = exit_tx.send(ExitEvent {
                key: reaper_key,
                exit_code,
                exited_at_ms: now_ms,
            });
        });

        entries.insert(
            key,
            Entry {
                running_task,
                exited: false,
                exit_code: None,
                exited_at_ms: None,
            },
        );
        Ok(())
    }

    /// Idempotent: removing an untracked key is not an error.
    pub fn remove(&self, key: &CompositeKey) {
        self.drain_exits();
        self.entries.lock().remove(key);
    }

    pub fn is_running(&self, key: &CompositeKey) -> bool {
        self.drain_exits();
        self.entries
            .lock()
            .get(key)
            .map(|e| !e.exited)
            .unwrap_or(false)
    }

    pub fn count(&self) -> usize {
        self.drain_exits();
        self.entries.lock().len()
    }

    pub fn running_count(&self) -> usize {
        self.drain_exits();
        self.entries.lock().values().filter(|e| !e.exited).count()
    }

    /// A clone of the tracked `RunningTask`, if the key is present.
    pub fn running_task(&self, key: &CompositeKey) -> Option<RunningTask> {
        self.drain_exits();
        self.entries.lock().get(key).map(|e| e.running_task.clone())
    }

    /// Records a worker endpoint port discovered by the idle detection
    /// state machine. A no-op if the key is untracked.
    pub fn set_worker_endpoint_port(&self, key: &CompositeKey, port: u16) {
        self.drain_exits();
        if let Some(entry) = self.entries.lock().get_mut(key) {
            entry.running_task.worker_endpoint_port = Some(port);
        }
    }

    pub fn mark_idle(&self, key: &CompositeKey, now_ms: u64) {
        self.drain_exits();
        if let Some(entry) = self.entries.lock().get_mut(key) {
            entry.running_task.mark_idle(now_ms);
        }
    }

    pub fn clear_idle(&self, key: &CompositeKey) {
        self.drain_exits();
        if let Some(entry) = self.entries.lock().get_mut(key) {
            entry.running_task.clear_idle();
        }
    }

    /// `check_file_status` lets the Runner fold in a status observed on the
    /// task file (e.g. externally marked cancelled) ahead of the process's
    /// own exit/timeout state; returning `None` falls through to the
    /// algorithm of distilled spec §4.3.
    pub fn check_completion(
        &self,
        key: &CompositeKey,
        now_ms: u64,
        check_file_status: impl FnOnce() -> Option<CompletionStatus>,
    ) -> CompletionStatus {
        if let Some(status) = check_file_status() {
            return status;
        }

        self.drain_exits();
        let entries = self.entries.lock();
        let entry = match entries.get(key) {
            Some(entry) => entry,
            None => return CompletionStatus::Crashed,
        };

        if !entry.exited {
            if now_ms.saturating_sub(entry.running_task.started_at_ms) > self.task_timeout_ms {
                return CompletionStatus::Timeout;
            }
            return CompletionStatus::Running;
        }

        match entry.exit_code {
            Some(0) => CompletionStatus::Completed,
            _ => CompletionStatus::Crashed,
        }
    }

    /// Sends SIGTERM, waits the grace window, then SIGKILL if still alive.
    /// Returns `true` if an entry was present (dead or alive).
    pub async fn kill(&self, key: &CompositeKey) -> bool {
        self.drain_exits();
        let (pid, already_exited) = {
            let entries = self.entries.lock();
            match entries.get(key) {
                Some(entry) => (entry.running_task.pid, entry.exited),
                None => return false,
            }
        };

        if already_exited {
            return true;
        }

        let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        tokio::time::sleep(self.kill_grace).await;
        self.drain_exits();

        let still_running = self
            .entries
            .lock()
            .get(key)
            .map(|e| !e.exited)
            .unwrap_or(false);
        if still_running {
            let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
        }
        true
    }

    pub async fn kill_all(&self) {
        let keys: Vec<CompositeKey> = {
            self.drain_exits();
            self.entries.lock().keys().cloned().collect()
        };
        for key in keys {
            self.kill(&key).await;
        }
    }

    /// Materializes a terminal `TaskResult`. `CompletionStatus::Running` is
    /// an illegal finalization state and maps to `crashed`.
    pub fn create_task_result(&self, key: &CompositeKey, status: CompletionStatus) -> TaskResult {
        self.drain_exits();
        let now_ms = epoch_ms();
        let entries = self.entries.lock();
        let entry = entries.get(key);
        let started_at_ms = entry
            .map(|e| e.running_task.started_at_ms)
            .unwrap_or(now_ms);
        let exit_code = entry.and_then(|e| e.exit_code);
        TaskResult {
            task_id: key.task_id.clone(),
            status: TaskResultStatus::from(status),
            started_at_ms,
            completed_at_ms: now_ms,
            duration_ms: now_ms.saturating_sub(started_at_ms),
            exit_code,
        }
    }

    pub fn to_json(&self) -> Vec<ProcessEntrySnapshot> {
        self.drain_exits();
        self.entries
            .lock()
            .values()
            .map(|entry| ProcessEntrySnapshot {
                running_task: entry.running_task.clone(),
                exited: entry.exited,
                exit_code: entry.exit_code,
                exited_at_ms: entry.exited_at_ms,
            })
            .collect()
    }

    /// Re-attaches to PIDs that are still alive and not already tracked.
    /// Returns the composite keys that must be re-adopted (resume-spawned)
    /// by the Runner because their process is actually gone.
    pub fn restore_from_state(
        &self,
        states: Vec<ProcessEntrySnapshot>,
        is_pid_alive: impl Fn(u32) -> bool,
    ) -> Vec<CompositeKey> {
        let mut to_resume = Vec::new();
        let mut entries = self.entries.lock();
        for snapshot in states {
            let key = snapshot.running_task.composite_key();
            if entries.contains_key(&key) {
                continue;
            }
            if !snapshot.exited && is_pid_alive(snapshot.running_task.pid) {
                entries.insert(
                    key,
                    Entry {
                        running_task: snapshot.running_task,
                        exited: false,
                        exit_code: None,
                        exited_at_ms: None,
                    },
                );
            } else {
                to_resume.push(key);
            }
        }
        to_resume
    }
}

fn epoch_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "process_manager_tests.rs"]
mod tests;
