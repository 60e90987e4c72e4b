// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Loads and validates the runner's environment variable table into a
//! typed `RunnerConfig`. Mirrors the teacher's `Config::load()` shape:
//! resolve every value first, then validate, then hand the caller a single
//! struct — no global/singleton config object anywhere downstream.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be an integer, got {value:?}")]
    NotAnInteger { name: &'static str, value: String },
    #[error("RUNNER_MAX_PARALLEL must be between 1 and 100, got {0}")]
    MaxParallelOutOfRange(usize),
    #[error("RUNNER_MAX_TOTAL_PROCESSES must be between 1 and 100, got {0}")]
    MaxTotalProcessesOutOfRange(usize),
    #[error("RUNNER_MAX_TOTAL_PROCESSES ({max_total_processes}) must be >= RUNNER_MAX_PARALLEL ({max_parallel})")]
    MaxTotalProcessesBelowMaxParallel {
        max_total_processes: usize,
        max_parallel: usize,
    },
    #[error("RUNNER_MEMORY_THRESHOLD must be between 0 and 100, got {0}")]
    MemoryThresholdOutOfRange(u8),
    #[error("RUNNER_POLL_INTERVAL must be >= 1 second, got {0}")]
    PollIntervalTooSmall(u64),
    #[error("RUNNER_TASK_POLL_INTERVAL must be >= 1 second, got {0}")]
    TaskPollIntervalTooSmall(u64),
}

/// Resolved, validated configuration for one runner process, built from the
/// `RUNNER_*`/`BRAIN_API_URL`/`DEBUG` environment table documented for this
/// core. No CLI flag or config-file parsing; the daemon is environment-only
/// by design.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub brain_api_url: String,
    /// `RUNNER_POLL_INTERVAL`, seconds. Validated (`>= 1`) but not yet wired
    /// to a second, coarser discovery cadence distinct from `task_poll_interval`
    /// — see DESIGN.md.
    pub poll_interval: Duration,
    /// `RUNNER_TASK_POLL_INTERVAL`, seconds. Drives `Runner`'s single tick
    /// cadence (`RunnerOptions::poll_interval`).
    pub task_poll_interval: Duration,
    pub max_parallel: usize,
    /// `RUNNER_MAX_TOTAL_PROCESSES`. Validated against `max_parallel` at
    /// startup; not consumed elsewhere in this core — see DESIGN.md.
    pub max_total_processes: usize,
    /// `RUNNER_MEMORY_THRESHOLD`, percent, 0 disables. Accepted, validated,
    /// and surfaced via `Runner::status()`; no memory sampler acts on it.
    pub memory_threshold_percent: u8,
    pub idle_threshold_ms: u64,
    pub state_dir: PathBuf,
    pub log_dir: PathBuf,
    pub work_dir: PathBuf,
    pub api_timeout: Duration,
    pub task_timeout_ms: u64,
    pub debug: bool,
}

impl RunnerConfig {
    /// Reads every documented `RUNNER_*`/`BRAIN_API_URL`/`DEBUG` variable,
    /// applying the documented defaults for anything unset, then validates.
    pub fn from_env() -> Result<Self, ConfigError> {
        let brain_api_url =
            std::env::var("BRAIN_API_URL").unwrap_or_else(|_| "http://localhost:3333".to_string());

        let poll_interval_secs = parse_u64("RUNNER_POLL_INTERVAL", 30)?;
        let task_poll_interval_secs = parse_u64("RUNNER_TASK_POLL_INTERVAL", 5)?;
        let max_parallel = parse_usize("RUNNER_MAX_PARALLEL", 2)?;
        let max_total_processes = parse_usize("RUNNER_MAX_TOTAL_PROCESSES", 10)?;
        let memory_threshold_percent = parse_usize("RUNNER_MEMORY_THRESHOLD", 10)? as u8;
        let idle_threshold_ms = parse_u64("RUNNER_IDLE_THRESHOLD", 60_000)?;
        let api_timeout_ms = parse_u64("RUNNER_API_TIMEOUT", 5_000)?;
        let task_timeout_ms = parse_u64("RUNNER_TASK_TIMEOUT", 1_800_000)?;
        let debug = std::env::var("DEBUG").map(|v| v != "0" && !v.is_empty()).unwrap_or(false);

        let state_dir = dir_from_env("RUNNER_STATE_DIR", "state")?;
        let log_dir = dir_from_env("RUNNER_LOG_DIR", "logs")?;
        let work_dir = dir_from_env("RUNNER_WORK_DIR", "work")?;

        let config = Self {
            brain_api_url,
            poll_interval: Duration::from_secs(poll_interval_secs),
            task_poll_interval: Duration::from_secs(task_poll_interval_secs),
            max_parallel,
            max_total_processes,
            memory_threshold_percent,
            idle_threshold_ms,
            state_dir,
            log_dir,
            work_dir,
            api_timeout: Duration::from_millis(api_timeout_ms),
            task_timeout_ms,
            debug,
        };
        config.validate()?;
        Ok(config)
    }

    /// Enforces every bound in the config validation rules table. Fails
    /// loudly at startup (exit code 1) rather than letting a malformed
    /// value surface later as a confusing runtime error.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.max_parallel) {
            return Err(ConfigError::MaxParallelOutOfRange(self.max_parallel));
        }
        if !(1..=100).contains(&self.max_total_processes) {
            return Err(ConfigError::MaxTotalProcessesOutOfRange(self.max_total_processes));
        }
        if self.max_total_processes < self.max_parallel {
            return Err(ConfigError::MaxTotalProcessesBelowMaxParallel {
                max_total_processes: self.max_total_processes,
                max_parallel: self.max_parallel,
            });
        }
        if self.memory_threshold_percent > 100 {
            return Err(ConfigError::MemoryThresholdOutOfRange(self.memory_threshold_percent));
        }
        if self.poll_interval.as_secs() < 1 {
            return Err(ConfigError::PollIntervalTooSmall(self.poll_interval.as_secs()));
        }
        if self.task_poll_interval.as_secs() < 1 {
            return Err(ConfigError::TaskPollIntervalTooSmall(self.task_poll_interval.as_secs()));
        }
        Ok(())
    }
}

fn parse_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .parse::<u64>()
            .map_err(|_| ConfigError::NotAnInteger { name, value }),
        Err(_) => Ok(default),
    }
}

fn parse_usize(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .parse::<usize>()
            .map_err(|_| ConfigError::NotAnInteger { name, value }),
        Err(_) => Ok(default),
    }
}

/// Resolve a `RUNNER_*_DIR` override, falling back to `XDG_STATE_HOME/oj-runner/<leaf>`
/// and finally `~/.local/state/oj-runner/<leaf>`, matching the teacher's
/// `state_dir()` fallback chain.
fn dir_from_env(name: &'static str, leaf: &str) -> Result<PathBuf, ConfigError> {
    if let Ok(dir) = std::env::var(name) {
        return Ok(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("oj-runner").join(leaf));
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Ok(PathBuf::from(home).join(".local/state/oj-runner").join(leaf))
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
