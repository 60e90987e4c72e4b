// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker Launcher: builds the prompt, resolves the working directory, and
//! hands the task either to an owned `tokio::process::Child` (background
//! mode) or an external session host (tui/dashboard mode).

use oj_adapters::{ProcessSpawner, SessionAdapter, SessionError, SpawnError, SpawnRequest};
use oj_core::{ProjectId, Task, TaskId};
use oj_storage::StatePaths;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Child;

/// Where the worker runs and how its activity is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    Background,
    Tui,
    Dashboard,
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to persist prompt file {path}: {source}")]
    PromptFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// The outcome of launching a worker: an owned child process the Process
/// Manager can track exit on directly, or a session hosted externally
/// where the PID is best-effort and there is no owned handle.
pub enum LaunchOutcome {
    Owned {
        pid: u32,
        child: Child,
    },
    External {
        pid: Option<u32>,
        window_name: Option<String>,
        pane_id: Option<String>,
    },
}

pub struct WorkerLauncher<P, S> {
    paths: StatePaths,
    spawner: P,
    session: S,
    worker_command: String,
    default_workdir: PathBuf,
    home_dir: PathBuf,
}

impl<P, S> WorkerLauncher<P, S>
where
    P: ProcessSpawner,
    S: SessionAdapter,
{
    pub fn new(
        paths: StatePaths,
        spawner: P,
        session: S,
        worker_command: impl Into<String>,
        default_workdir: impl Into<PathBuf>,
        home_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            paths,
            spawner,
            session,
            worker_command: worker_command.into(),
            default_workdir: default_workdir.into(),
            home_dir: home_dir.into(),
        }
    }

    /// Builds the "new" or "resume" prompt and persists it under the state
    /// directory, keyed by `(projectId, taskId)`.
    pub fn write_prompt(
        &self,
        project_id: &ProjectId,
        task: &Task,
        resume: bool,
    ) -> Result<PathBuf, LaunchError> {
        let prompt = render_prompt(task, resume);
        let path = self.paths.prompt(project_id, &task.id);
        std::fs::write(&path, prompt).map_err(|source| LaunchError::PromptFile {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// `task.worktree` → `task.workdir` (both resolved relative to the
    /// caller's home directory) → `task.resolved_workdir` (absolute) →
    /// configured default. Never fails: falls back to the default.
    pub fn resolve_workdir(&self, task: &Task) -> PathBuf {
        if let Some(worktree) = &task.worktree {
            let candidate = self.home_dir.join(worktree);
            if candidate.exists() {
                return candidate;
            }
        }
        if let Some(workdir) = &task.workdir {
            let candidate = self.home_dir.join(workdir);
            if candidate.exists() {
                return candidate;
            }
        }
        if let Some(resolved) = &task.resolved_workdir {
            if resolved.exists() {
                return resolved.clone();
            }
        }
        self.default_workdir.clone()
    }

    pub async fn launch(
        &self,
        project_id: &ProjectId,
        task: &Task,
        mode: LaunchMode,
        resume: bool,
        workdir_override: Option<&Path>,
        session_hint: Option<&str>,
    ) -> Result<LaunchOutcome, LaunchError> {
        let prompt_path = self.write_prompt(project_id, task, resume)?;
        let workdir = workdir_override
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.resolve_workdir(task));
        let rendered_command = self.worker_command.replace(
            "${prompt}",
            &escape_for_shell_double_quotes(&prompt_path.display().to_string()),
        );

        match mode {
            LaunchMode::Background => {
                let log_path = self.paths.output_log(project_id, &task.id);
                let args = vec!["-c".to_string(), rendered_command];
                let request = SpawnRequest {
                    program: "sh",
                    args: &args,
                    cwd: &workdir,
                    env: &[],
                    log_path: &log_path,
                };
                let child = self.spawner.spawn(request).await?;
                let pid = child.id().unwrap_or(0);
                Ok(LaunchOutcome::Owned { pid, child })
            }
            LaunchMode::Tui | LaunchMode::Dashboard => {
                let name = session_hint
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{}-{}", project_id.as_str(), task.id.as_str()));
                let session_id = self
                    .session
                    .spawn(&name, &workdir, &rendered_command, &[])
                    .await?;
                Ok(LaunchOutcome::External {
                    pid: None,
                    window_name: Some(session_id),
                    pane_id: None,
                })
            }
        }
    }

    /// The underlying session adapter, for callers that need to terminate
    /// an externally-hosted session directly (e.g. task cancellation).
    pub fn session(&self) -> &S {
        &self.session
    }

    /// Removes the prompt and per-task log file. Infallible from the
    /// caller's perspective: missing files are logged and swallowed.
    pub fn cleanup(&self, project_id: &ProjectId, task_id: &TaskId) {
        for path in [
            self.paths.prompt(project_id, task_id),
            self.paths.output_log(project_id, task_id),
        ] {
            if let Err(error) = std::fs::remove_file(&path) {
                if error.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), %error, "failed to clean up worker file");
                }
            }
        }
    }
}

fn render_prompt(task: &Task, resume: bool) -> String {
    if resume {
        format!(
            "Continue prior work on task at {}. If a previous attempt is in \
             progress, resume it; otherwise restart the task from scratch.",
            task.path
        )
    } else {
        format!("Begin work on task at {}.", task.path)
    }
}

/// Escapes characters with special meaning inside a double-quoted shell
/// string, so the prompt path can be embedded in a worker command safely.
fn escape_for_shell_double_quotes(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '`' => result.push_str("\\`"),
            '$' => result.push_str("\\$"),
            '"' => result.push_str("\\\""),
            _ => result.push(c),
        }
    }
    result
}

#[cfg(test)]
#[path = "launcher_tests.rs"]
mod tests;
