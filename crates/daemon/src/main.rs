// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Odd Jobs Runner Daemon (ojd)
//!
//! Long-lived process that owns the polling/dispatch loop: discovers ready
//! work across configured projects, claims it, spawns worker subprocesses,
//! tracks completion, and survives crashes by resuming interrupted work on
//! restart.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod env;

use std::sync::Arc;

use oj_adapters::{
    HttpTaskServiceClient, LinuxSessionProbe, NoOpSessionAdapter, TokioProcessSpawner,
};
use oj_core::{RunnerId, SystemClock};
use oj_engine::{
    EventBus, GlobProjectFilter, LaunchMode, Runner, RunnerOptions, ShutdownTimeouts,
    SignalSupervisor, WorkerLauncher,
};
use oj_storage::{StatePaths, StateStore};
use tracing::{error, info};

use crate::env::RunnerConfig;

const EVENT_BUS_CAPACITY: usize = 256;
const WORKER_PROMPT_TEMPLATE: &str = "${prompt}";

#[tokio::main]
async fn main() {
    let config = match RunnerConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("error: invalid runner configuration: {error}");
            std::process::exit(1);
        }
    };

    let _log_guard = match setup_logging(&config) {
        Ok(guard) => guard,
        Err(error) => {
            eprintln!("error: failed to set up logging: {error}");
            std::process::exit(1);
        }
    };

    info!(
        brain_api_url = %config.brain_api_url,
        max_parallel = config.max_parallel,
        max_total_processes = config.max_total_processes,
        "starting odd jobs runner"
    );

    let exit_code = run(config).await;
    std::process::exit(exit_code);
}

async fn run(config: RunnerConfig) -> i32 {
    if let Err(error) = std::fs::create_dir_all(&config.state_dir) {
        error!(%error, dir = %config.state_dir.display(), "failed to create state dir");
        return 1;
    }
    if let Err(error) = std::fs::create_dir_all(&config.work_dir) {
        error!(%error, dir = %config.work_dir.display(), "failed to create work dir");
        return 1;
    }

    let clock = SystemClock;
    let task_service = Arc::new(HttpTaskServiceClient::with_timeout(
        config.brain_api_url.clone(),
        clock.clone(),
        config.api_timeout,
    ));
    let probe = Arc::new(LinuxSessionProbe::new());

    let projects = match task_service.list_projects().await {
        Ok(projects) => projects,
        Err(error) => {
            error!(%error, "failed to list projects from task service at startup");
            return 1;
        }
    };
    // No include/exclude patterns are configured via the environment table;
    // the filter still runs so a future `RUNNER_PROJECT_INCLUDE`/`_EXCLUDE`
    // addition only needs to populate these slices, not a new call site.
    let filter = match GlobProjectFilter::new(&[], &[]) {
        Ok(filter) => filter,
        Err(error) => {
            error!(%error, "failed to compile project filter");
            return 1;
        }
    };
    let active_projects = filter.filter(&projects);
    if active_projects.is_empty() {
        info!("no active projects discovered at startup; runner will idle until one appears on restart");
    }

    let paths = StatePaths::new(config.state_dir.clone());
    let launcher = WorkerLauncher::new(
        paths.clone(),
        TokioProcessSpawner,
        NoOpSessionAdapter::new(),
        WORKER_PROMPT_TEMPLATE,
        config.work_dir.clone(),
        config.state_dir.clone(),
    );
    let state_store = StateStore::new(paths);
    let events = EventBus::new(EVENT_BUS_CAPACITY);

    let options = RunnerOptions {
        projects: active_projects,
        start_paused: false,
        launch_mode: LaunchMode::Background,
        max_parallel: config.max_parallel,
        task_timeout_ms: config.task_timeout_ms,
        idle_detection_threshold_ms: config.idle_threshold_ms,
        poll_interval: config.task_poll_interval,
        memory_threshold_percent: config.memory_threshold_percent,
        ..Default::default()
    };

    let runner = Arc::new(Runner::new(
        RunnerId::generate(),
        options,
        task_service,
        probe,
        launcher,
        state_store,
        events,
        clock,
    ));

    let runner_for_loop = Arc::clone(&runner);
    let poll_loop = tokio::spawn(async move {
        if let Err(error) = runner_for_loop.run().await {
            error!(%error, "polling loop exited with an error");
        }
    });

    let supervisor = SignalSupervisor::new(Arc::clone(&runner), ShutdownTimeouts::default());
    let exit_code = supervisor.run().await;

    let _ = poll_loop.await;
    info!(exit_code, "runner stopped");
    exit_code
}

fn setup_logging(
    config: &RunnerConfig,
) -> Result<tracing_appender::non_blocking::WorkerGuard, std::io::Error> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    std::fs::create_dir_all(&config.log_dir)?;

    let file_appender = tracing_appender::rolling::never(&config.log_dir, "runner.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let default_level = if config.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .init();

    Ok(guard)
}
