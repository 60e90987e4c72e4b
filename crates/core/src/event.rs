// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ephemeral events fanned out by the Event Bus to UI/logging collaborators.
//!
//! Unlike `RunnerState`, events are never persisted — they exist only to
//! let a subscriber observe what the runner just did. Ordering is
//! happens-before relative to the state mutation that produced the event
//! (distilled spec §5).

use crate::ids::{ProjectId, TaskId};
use crate::process_entry::TaskResultStatus;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunnerEvent {
    TaskStarted {
        project_id: ProjectId,
        task_id: TaskId,
    },
    TaskCompleted {
        project_id: ProjectId,
        task_id: TaskId,
    },
    TaskFailed {
        project_id: ProjectId,
        task_id: TaskId,
        status: TaskResultStatus,
    },
    TaskCancelled {
        project_id: ProjectId,
        task_id: TaskId,
    },
    PollComplete {
        ready_count: usize,
        running_count: usize,
    },
    StateSaved {
        project_id: ProjectId,
    },
    ProjectPaused {
        project_id: ProjectId,
    },
    ProjectResumed {
        project_id: ProjectId,
    },
    AllPaused,
    AllResumed,
    Shutdown {
        reason: String,
    },
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
