// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Types shared between the Process Manager and its callers.
//!
//! The entry type itself is owned and mutated exclusively by
//! `oj_engine::process_manager::ProcessManager`; this module only defines
//! the data shapes so `oj-core` consumers (the runner, the state store) can
//! speak about completion without depending on the engine crate.

use crate::running_task::RunningTask;
use serde::{Deserialize, Serialize};

/// Outcome of `ProcessManager::check_completion`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    Running,
    Completed,
    Failed,
    Blocked,
    Cancelled,
    Timeout,
    Crashed,
}

impl CompletionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, CompletionStatus::Running)
    }
}

/// The final disposition recorded for a task once its process manager entry
/// is reaped. `Running` is not a legal value here — reaching it means
/// `check_completion` was not actually terminal and is a caller bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskResultStatus {
    Completed,
    Failed,
    Blocked,
    Timeout,
    Crashed,
    Cancelled,
}

impl From<CompletionStatus> for TaskResultStatus {
    /// `Running` has no terminal meaning; it maps to `Crashed` because
    /// materializing a result for a still-running task is itself the bug.
    fn from(status: CompletionStatus) -> Self {
        match status {
            CompletionStatus::Running => TaskResultStatus::Crashed,
            CompletionStatus::Completed => TaskResultStatus::Completed,
            CompletionStatus::Failed => TaskResultStatus::Failed,
            CompletionStatus::Blocked => TaskResultStatus::Blocked,
            CompletionStatus::Cancelled => TaskResultStatus::Cancelled,
            CompletionStatus::Timeout => TaskResultStatus::Timeout,
            CompletionStatus::Crashed => TaskResultStatus::Crashed,
        }
    }
}

/// A materialized completion record for a single task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: crate::ids::TaskId,
    pub status: TaskResultStatus,
    pub started_at_ms: u64,
    pub completed_at_ms: u64,
    pub duration_ms: u64,
    #[serde(default)]
    pub exit_code: Option<i32>,
}

impl TaskResult {
    pub fn from_running_task(
        running: &RunningTask,
        status: CompletionStatus,
        completed_at_ms: u64,
        exit_code: Option<i32>,
    ) -> Self {
        Self {
            task_id: running.task_id.clone(),
            status: status.into(),
            started_at_ms: running.started_at_ms,
            completed_at_ms,
            duration_ms: completed_at_ms.saturating_sub(running.started_at_ms),
            exit_code,
        }
    }
}

#[cfg(test)]
#[path = "process_entry_tests.rs"]
mod tests;
