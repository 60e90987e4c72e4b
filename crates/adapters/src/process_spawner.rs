// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background-mode worker spawning: the only place that touches
//! `tokio::process::Command` directly for owned worker processes.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::{Child, Command};

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("failed to open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// What to run, where, and how its stdout/stderr are captured.
pub struct SpawnRequest<'a> {
    pub program: &'a str,
    pub args: &'a [String],
    pub cwd: &'a Path,
    pub env: &'a [(String, String)],
    pub log_path: &'a Path,
}

/// Spawns a worker as an owned OS child process, the only way a launched
/// task gets a `tokio::process::Child` the Process Manager can track exit
/// on directly.
#[async_trait]
pub trait ProcessSpawner: Send + Sync + 'static {
    async fn spawn(&self, request: SpawnRequest<'_>) -> Result<Child, SpawnError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessSpawner;

#[async_trait]
impl ProcessSpawner for TokioProcessSpawner {
    async fn spawn(&self, request: SpawnRequest<'_>) -> Result<Child, SpawnError> {
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(request.log_path)
            .map_err(|source| SpawnError::LogFile {
                path: request.log_path.to_path_buf(),
                source,
            })?;
        let log_file_clone = log_file.try_clone().map_err(|source| SpawnError::LogFile {
            path: request.log_path.to_path_buf(),
            source,
        })?;

        let mut cmd = Command::new(request.program);
        cmd.args(request.args)
            .current_dir(request.cwd)
            .envs(request.env.iter().cloned())
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_file_clone))
            .kill_on_drop(true);

        cmd.spawn().map_err(|source| SpawnError::Spawn {
            program: request.program.to_string(),
            source,
        })
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq)]
    pub struct RecordedSpawn {
        pub program: String,
        pub args: Vec<String>,
        pub cwd: PathBuf,
        pub env: Vec<(String, String)>,
        pub log_path: PathBuf,
    }

    /// Records spawn requests and always launches a real, trivial `sleep`
    /// child so callers that `.wait()` on the result still see process
    /// semantics, without depending on the program under test existing.
    #[derive(Clone, Default)]
    pub struct FakeProcessSpawner {
        spawns: Arc<Mutex<Vec<RecordedSpawn>>>,
        sleep_seconds: u64,
    }

    impl FakeProcessSpawner {
        pub fn new() -> Self {
            Self {
                spawns: Arc::new(Mutex::new(Vec::new())),
                sleep_seconds: 3600,
            }
        }

        pub fn with_child_lifetime_seconds(sleep_seconds: u64) -> Self {
            Self {
                spawns: Arc::new(Mutex::new(Vec::new())),
                sleep_seconds,
            }
        }

        pub fn spawns(&self) -> Vec<RecordedSpawn> {
            self.spawns.lock().clone()
        }
    }

    #[async_trait]
    impl ProcessSpawner for FakeProcessSpawner {
        async fn spawn(&self, request: SpawnRequest<'_>) -> Result<Child, SpawnError> {
            self.spawns.lock().push(RecordedSpawn {
                program: request.program.to_string(),
                args: request.args.to_vec(),
                cwd: request.cwd.to_path_buf(),
                env: request.env.to_vec(),
                log_path: request.log_path.to_path_buf(),
            });
            Command::new("sleep")
                .arg(self.sleep_seconds.to_string())
                .kill_on_drop(true)
                .spawn()
                .map_err(|source| SpawnError::Spawn {
                    program: "sleep".to_string(),
                    source,
                })
        }
    }

    pub fn env_map(env: &[(String, String)]) -> HashMap<String, String> {
        env.iter().cloned().collect()
    }
}

#[cfg(test)]
#[path = "process_spawner_tests.rs"]
mod tests;
