// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Atomic, corruption-tolerant persistence for per-project runner state.
//!
//! Every write goes to a `.tmp` sibling file, `fsync`'d and then renamed
//! into place, so a crash mid-write never leaves a half-written file where
//! a reader expects one. A read that finds a file but fails to parse it is
//! treated as corruption, not an error: the bad file is rotated aside to
//! `.bak`/`.bak.2`/`.bak.3` (oldest dropped) and the read returns `Ok(None)`
//! so the caller can fall back to a fresh snapshot.

use oj_core::{ProjectId, RunningTask, RunnerState};
use std::fs::{self, File};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use crate::paths::StatePaths;

const MAX_BAK_FILES: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum StateStoreError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid pid file at {path}: {contents:?}")]
    InvalidPid { path: PathBuf, contents: String },
}

impl StateStoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Durable state for one runner process's per-project snapshots.
pub struct StateStore {
    paths: StatePaths,
}

impl StateStore {
    pub fn new(paths: StatePaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &StatePaths {
        &self.paths
    }

    pub fn save_runner_state(
        &self,
        project_id: &ProjectId,
        state: &RunnerState,
    ) -> Result<(), StateStoreError> {
        let path = self.paths.runner_state(project_id);
        write_json_atomic(&path, state)
    }

    pub fn load_runner_state(
        &self,
        project_id: &ProjectId,
    ) -> Result<Option<RunnerState>, StateStoreError> {
        let path = self.paths.runner_state(project_id);
        read_json_tolerant(&path)
    }

    pub fn save_running_tasks(
        &self,
        project_id: &ProjectId,
        tasks: &[RunningTask],
    ) -> Result<(), StateStoreError> {
        let path = self.paths.running_tasks(project_id);
        write_json_atomic(&path, tasks)
    }

    pub fn load_running_tasks(
        &self,
        project_id: &ProjectId,
    ) -> Result<Option<Vec<RunningTask>>, StateStoreError> {
        let path = self.paths.running_tasks(project_id);
        read_json_tolerant(&path)
    }

    pub fn write_pid_file(
        &self,
        project_id: &ProjectId,
        pid: u32,
    ) -> Result<(), StateStoreError> {
        let path = self.paths.runner_pid(project_id);
        write_atomic(&path, pid.to_string().as_bytes())
    }

    pub fn read_pid_file(
        &self,
        project_id: &ProjectId,
    ) -> Result<Option<u32>, StateStoreError> {
        let path = self.paths.runner_pid(project_id);
        match fs::read_to_string(&path) {
            Ok(contents) => match contents.trim().parse::<u32>() {
                Ok(pid) => Ok(Some(pid)),
                Err(_) => Err(StateStoreError::InvalidPid {
                    path,
                    contents,
                }),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StateStoreError::io(&path, e)),
        }
    }

    pub fn remove_pid_file(&self, project_id: &ProjectId) -> Result<(), StateStoreError> {
        let path = self.paths.runner_pid(project_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StateStoreError::io(&path, e)),
        }
    }

    /// Every project with a `.pid` file whose owning process is no longer
    /// alive, per `is_pid_alive`. Callers use this to reclaim abandoned
    /// state directories left behind by a runner that was killed without
    /// cleanup (e.g. `kill -9`).
    pub fn cleanup_stale_snapshots(
        &self,
        is_pid_alive: impl Fn(u32) -> bool,
    ) -> Result<Vec<ProjectId>, StateStoreError> {
        let mut stale = Vec::new();
        for project_id in self
            .paths
            .known_project_ids()
            .map_err(|e| StateStoreError::io(self.paths.state_dir(), e))?
        {
            let alive = match self.read_pid_file(&project_id)? {
                Some(pid) => is_pid_alive(pid),
                None => false,
            };
            if !alive {
                self.remove_pid_file(&project_id)?;
                stale.push(project_id);
            }
        }
        Ok(stale)
    }
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StateStoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StateStoreError::io(parent, e))?;
    }
    let tmp_path = path.with_extension(tmp_extension(path));
    let mut file = File::create(&tmp_path).map_err(|e| StateStoreError::io(&tmp_path, e))?;
    file.write_all(contents)
        .map_err(|e| StateStoreError::io(&tmp_path, e))?;
    file.sync_all().map_err(|e| StateStoreError::io(&tmp_path, e))?;
    fs::rename(&tmp_path, path).map_err(|e| StateStoreError::io(path, e))?;
    Ok(())
}

fn write_json_atomic<T: serde::Serialize>(
    path: &Path,
    value: &T,
) -> Result<(), StateStoreError> {
    let json = serde_json::to_vec_pretty(value).map_err(|e| StateStoreError::Io {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
    })?;
    write_atomic(path, &json)
}

fn read_json_tolerant<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<Option<T>, StateStoreError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StateStoreError::io(path, e)),
    };
    match serde_json::from_str(&contents) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "corrupt state file, rotating aside");
            rotate_bak(path)?;
            Ok(None)
        }
    }
}

fn tmp_extension(path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{ext}.tmp"),
        None => "tmp".to_string(),
    }
}

fn bak_path(path: &Path, n: usize) -> PathBuf {
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("state");
    let suffix = if n == 1 {
        "bak".to_string()
    } else {
        format!("bak.{n}")
    };
    path.with_file_name(format!("{file_name}.{suffix}"))
}

/// Rotates `path` -> `.bak`, shifting any existing `.bak` chain up to
/// `MAX_BAK_FILES`, dropping the oldest.
fn rotate_bak(path: &Path) -> Result<(), StateStoreError> {
    let oldest = bak_path(path, MAX_BAK_FILES);
    if oldest.exists() {
        fs::remove_file(&oldest).map_err(|e| StateStoreError::io(&oldest, e))?;
    }
    for n in (1..MAX_BAK_FILES).rev() {
        let from = bak_path(path, n);
        if from.exists() {
            let to = bak_path(path, n + 1);
            fs::rename(&from, &to).map_err(|e| StateStoreError::io(&from, e))?;
        }
    }
    let target = bak_path(path, 1);
    fs::rename(path, &target).map_err(|e| StateStoreError::io(path, e))?;
    Ok(())
}

#[cfg(test)]
#[path = "state_store_tests.rs"]
mod tests;
