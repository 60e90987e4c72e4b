// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Strongly-typed identifiers for projects, tasks and runners.

use serde::{Deserialize, Serialize};

crate::define_id! {
    /// A project identifier, as returned by `GET /api/v1/tasks`.
    pub struct ProjectId;
}

crate::define_id! {
    /// A task identifier, unique within a project but NOT across projects.
    pub struct TaskId;
}

crate::define_id! {
    /// The random hex identity a runner presents as the claim owner.
    pub struct RunnerId;
}

impl RunnerId {
    /// Generate a fresh runner identity from random bytes.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut bytes);
        let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
        Self(hex)
    }
}

/// The only globally-unique local identifier for in-flight work: a task
/// is identified by `(projectId, taskId)`, never by `taskId` alone, since
/// task ids may collide across projects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompositeKey {
    pub project_id: ProjectId,
    pub task_id: TaskId,
}

impl CompositeKey {
    pub fn new(project_id: ProjectId, task_id: TaskId) -> Self {
        Self {
            project_id,
            task_id,
        }
    }
}

impl std::fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.project_id, self.task_id)
    }
}

#[cfg(test)]
#[path = "ids_tests.rs"]
mod tests;
