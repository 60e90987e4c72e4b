// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File naming convention for the per-project state directory.

use oj_core::ProjectId;
use std::path::{Path, PathBuf};

/// Resolves the on-disk paths for one project's state, all rooted at a
/// shared `state_dir` (typically `RUNNER_STATE_DIR`).
#[derive(Debug, Clone)]
pub struct StatePaths {
    state_dir: PathBuf,
}

impl StatePaths {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn runner_state(&self, project_id: &ProjectId) -> PathBuf {
        self.state_dir
            .join(format!("runner-{}.json", project_id.as_str()))
    }

    pub fn runner_pid(&self, project_id: &ProjectId) -> PathBuf {
        self.state_dir
            .join(format!("runner-{}.pid", project_id.as_str()))
    }

    pub fn running_tasks(&self, project_id: &ProjectId) -> PathBuf {
        self.state_dir
            .join(format!("running-{}.json", project_id.as_str()))
    }

    pub fn prompt(&self, project_id: &ProjectId, task_id: &oj_core::TaskId) -> PathBuf {
        self.state_dir.join(format!(
            "prompt_{}_{}.txt",
            project_id.as_str(),
            task_id.as_str()
        ))
    }

    pub fn output_log(&self, project_id: &ProjectId, task_id: &oj_core::TaskId) -> PathBuf {
        self.state_dir.join(format!(
            "output_{}_{}.log",
            project_id.as_str(),
            task_id.as_str()
        ))
    }

    /// Every `runner-*.pid` file's project id, for stale-snapshot sweeps.
    pub fn known_project_ids(&self) -> std::io::Result<Vec<ProjectId>> {
        let mut ids = Vec::new();
        if !self.state_dir.exists() {
            return Ok(ids);
        }
        for entry in std::fs::read_dir(&self.state_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(rest) = name.strip_prefix("runner-") {
                if let Some(id) = rest.strip_suffix(".pid") {
                    ids.push(ProjectId::new(id));
                }
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
#[path = "paths_tests.rs"]
mod tests;
