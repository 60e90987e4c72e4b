// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-project snapshot persisted by the State Store.

use crate::ids::ProjectId;
use crate::running_task::RunningTask;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerStatus {
    Idle,
    Polling,
    Processing,
    Stopped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerStats {
    pub completed: u64,
    pub failed: u64,
    pub total_runtime_ms: u64,
}

impl RunnerStats {
    pub fn record_completion(&mut self, duration_ms: u64) {
        self.completed += 1;
        self.total_runtime_ms += duration_ms;
    }

    pub fn record_failure(&mut self, duration_ms: u64) {
        self.failed += 1;
        self.total_runtime_ms += duration_ms;
    }
}

/// The durable snapshot written to `runner-<projectId>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerState {
    pub project_id: ProjectId,
    pub status: RunnerStatus,
    #[serde(default)]
    pub running_tasks: Vec<RunningTask>,
    pub stats: RunnerStats,
    pub started_at_ms: u64,
    pub updated_at_ms: u64,
}

impl RunnerState {
    pub fn new(project_id: ProjectId, now_ms: u64) -> Self {
        Self {
            project_id,
            status: RunnerStatus::Idle,
            running_tasks: Vec::new(),
            stats: RunnerStats::default(),
            started_at_ms: now_ms,
            updated_at_ms: now_ms,
        }
    }
}

#[cfg(test)]
#[path = "runner_state_tests.rs"]
mod tests;
