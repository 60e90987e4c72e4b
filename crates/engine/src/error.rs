// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The runner's aggregating error type: every adapter/storage failure that
//! can surface out of a poll tick collapses into one enum so call sites
//! don't have to juggle five error types.

use oj_adapters::{ProbeError, SpawnError, TaskServiceError};
use oj_storage::StateStoreError;
use thiserror::Error;

use crate::launcher::LaunchError;
use crate::process_manager::ProcessError;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Launch(#[from] SpawnError),

    #[error(transparent)]
    WorkerLaunch(#[from] LaunchError),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    TaskService(#[from] TaskServiceError),

    #[error(transparent)]
    StateStore(#[from] StateStoreError),

    #[error("{0}")]
    Other(String),
}
