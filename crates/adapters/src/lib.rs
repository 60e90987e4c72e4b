// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
// Enable coverage(off) attribute for excluding test infrastructure
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Adapters for external I/O: the task service, worker-session probing,
//! process spawning, and external session hosting.

pub mod process_spawner;
pub mod session;
pub mod session_probe;
pub mod subprocess;
pub mod task_service;

pub use process_spawner::{ProcessSpawner, SpawnError, SpawnRequest, TokioProcessSpawner};
pub use session::{NoOpSessionAdapter, SessionAdapter, SessionError, TmuxAdapter};
pub use session_probe::{LinuxSessionProbe, ProbeError, SessionProbe, SessionStatus};
pub use task_service::{
    ClaimResult, Health, HealthStatus, HttpTaskServiceClient, TaskServiceClient, TaskServiceError,
    WaitFor, WaitOutcome,
};

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
pub use process_spawner::fake::{FakeProcessSpawner, RecordedSpawn};
#[cfg(any(test, feature = "test-support"))]
pub use session::{FakeSession, FakeSessionAdapter, SessionCall};
#[cfg(any(test, feature = "test-support"))]
pub use session_probe::fake::FakeSessionProbe;
#[cfg(any(test, feature = "test-support"))]
pub use task_service::fake::{FakeTaskServiceClient, TaskServiceCall};
