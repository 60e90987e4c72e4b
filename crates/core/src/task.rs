// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The task projection consumed from the task service.
//!
//! The server owns these fields; the core only reads them. Dynamic status
//! unions from the wire are parsed into the tagged variants below at the
//! client boundary (see `oj_adapters::task_service`), never passed through
//! as bare strings.

use crate::ids::{ProjectId, TaskId};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A task's lifecycle status, as tracked by the task service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Blocked,
    Cancelled,
    Validated,
}

/// Whether a task is immediately actionable.
///
/// A task in a dependency cycle is always `Blocked`, regardless of its
/// prerequisites' statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Ready,
    Waiting,
    Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// A unit of work as surfaced by the task service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub path: String,
    pub title: String,
    pub priority: Priority,
    pub status: TaskStatus,
    pub classification: Classification,
    #[serde(default)]
    pub depends_on: Vec<TaskId>,
    #[serde(default)]
    pub waiting_on: Vec<TaskId>,
    #[serde(default)]
    pub blocked_by: Vec<TaskId>,
    #[serde(default)]
    pub in_cycle: bool,
    #[serde(default)]
    pub workdir: Option<String>,
    #[serde(default)]
    pub worktree: Option<String>,
    #[serde(default)]
    pub git_remote: Option<String>,
    #[serde(default)]
    pub git_branch: Option<String>,
    #[serde(default)]
    pub feature_id: Option<String>,
    #[serde(default)]
    pub feature_depends_on: Vec<String>,
    /// Absolute filesystem path, if set.
    #[serde(default)]
    pub resolved_workdir: Option<PathBuf>,
    #[serde(default)]
    pub user_original_request: Option<String>,
}

impl Task {
    /// `true` when a dependency cycle forces this task to be reported as
    /// blocked, independent of prerequisite status.
    pub fn is_cycle_blocked(&self) -> bool {
        self.in_cycle && self.classification == Classification::Blocked
    }
}

/// A project-scoped view of a [`Task`], as used by the runner when it needs
/// to know which project a task belongs to without threading the id
/// separately.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectTask {
    pub project_id: ProjectId,
    pub task: Task,
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
