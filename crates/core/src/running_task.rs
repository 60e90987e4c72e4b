// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The runner-owned record of a task currently being worked on.

use crate::ids::{CompositeKey, ProjectId, TaskId};
use crate::task::Priority;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A task the runner has claimed and spawned a worker for.
///
/// Owned exclusively by the Runner. Mutated only to attach a discovered
/// worker endpoint port or an idle timestamp; destroyed on terminal
/// completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningTask {
    pub task_id: TaskId,
    pub project_id: ProjectId,
    pub path: String,
    pub title: String,
    pub priority: Priority,
    /// Best-effort PID; `None` is never valid once spawned (placeholder
    /// orphan-recovery PIDs are represented as `0`, not `None`, so the
    /// field stays required on the wire).
    pub pid: u32,
    pub started_at_ms: u64,
    pub is_resume: bool,
    pub workdir: PathBuf,
    #[serde(default)]
    pub window_name: Option<String>,
    #[serde(default)]
    pub pane_id: Option<String>,
    #[serde(default)]
    pub worker_endpoint_port: Option<u16>,
    #[serde(default)]
    pub idle_since_ms: Option<u64>,
}

impl RunningTask {
    pub fn composite_key(&self) -> CompositeKey {
        CompositeKey::new(self.project_id.clone(), self.task_id.clone())
    }

    /// `true` when this task has no owned OS process handle — it was
    /// spawned into an externally-hosted session (tui/dashboard mode) and
    /// is tracked in the runner's session map rather than the Process
    /// Manager.
    pub fn is_external_session(&self) -> bool {
        self.window_name.is_some() || self.pane_id.is_some()
    }

    pub fn mark_idle(&mut self, now_ms: u64) {
        if self.idle_since_ms.is_none() {
            self.idle_since_ms = Some(now_ms);
        }
    }

    pub fn clear_idle(&mut self) {
        self.idle_since_ms = None;
    }

    /// How long this task has been continuously idle, if it is idle at all.
    pub fn idle_duration_ms(&self, now_ms: u64) -> Option<u64> {
        self.idle_since_ms.map(|since| now_ms.saturating_sub(since))
    }
}

#[cfg(test)]
#[path = "running_task_tests.rs"]
mod tests;
