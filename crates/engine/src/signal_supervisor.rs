// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Registers termination signals and arbitrates the single-shot graceful
//! shutdown sequence. Sees only the narrow `ShutdownCapability` the Runner
//! implements, not the full `Runner`, breaking the Runner-Supervisor-
//! ProcessManager cyclic reference noted in distilled spec §9.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};

/// The surface the Signal Supervisor needs from the Runner. Keeping this
/// narrow is what breaks the cyclic reference: the supervisor never sees
/// claim/spawn/poll machinery, only shutdown-relevant hooks.
#[async_trait]
pub trait ShutdownCapability: Send + Sync + 'static {
    fn running_count(&self) -> usize;
    async fn kill_all(&self);
    /// Runner's graceful teardown: stop the poll loop, persist final state.
    async fn on_shutdown(&self, reason: &str);
    /// Invoked on `SIGHUP` while not already shutting down.
    fn reload_config(&self);
}

#[derive(Debug, Clone, Copy)]
pub struct ShutdownTimeouts {
    pub graceful: Duration,
    pub force: Duration,
}

impl Default for ShutdownTimeouts {
    fn default() -> Self {
        Self {
            graceful: Duration::from_secs(10),
            force: Duration::from_secs(5),
        }
    }
}

pub struct SignalSupervisor<C: ShutdownCapability> {
    capability: Arc<C>,
    timeouts: ShutdownTimeouts,
    shutting_down: Arc<AtomicBool>,
}

impl<C: ShutdownCapability> SignalSupervisor<C> {
    pub fn new(capability: Arc<C>, timeouts: ShutdownTimeouts) -> Self {
        Self {
            capability,
            timeouts,
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Runs until a terminate/interrupt signal arrives and the shutdown
    /// sequence completes, returning the process exit code (0 clean, 1 if
    /// an internal error occurred while waiting on signal registration).
    pub async fn run(self) -> i32 {
        let (mut sigterm, mut sigint, mut sighup) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
            signal(SignalKind::hangup()),
        ) {
            (Ok(a), Ok(b), Ok(c)) => (a, b, c),
            _ => {
                tracing::error!("failed to register signal handlers");
                return 1;
            }
        };

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    return self.shutdown("sigterm").await;
                }
                _ = sigint.recv() => {
                    return self.shutdown("sigint").await;
                }
                _ = sighup.recv() => {
                    if !self.shutting_down.load(Ordering::SeqCst) {
                        tracing::info!("reload signal received, resetting configuration cache");
                        self.capability.reload_config();
                    }
                }
            }
        }
    }

    /// Exposed directly for tests and for callers that want to trigger
    /// shutdown without waiting on an actual OS signal.
    pub async fn shutdown(&self, reason: &str) -> i32 {
        // Step 1+2: single-shot guard. A concurrent caller racing in here
        // takes the early return and lets the first caller finish the
        // sequence; the unix signal handlers themselves never fire twice
        // because the loop in `run` has already returned.
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return 0;
        }

        tracing::info!(reason, "shutdown initiated");
        self.capability.on_shutdown(reason).await;

        if !wait_until(self.timeouts.graceful, || self.capability.running_count() == 0).await {
            tracing::warn!("graceful timeout elapsed with workers still running, force-killing");
            self.capability.kill_all().await;
            wait_until(self.timeouts.force, || self.capability.running_count() == 0).await;
        }

        if self.capability.running_count() == 0 {
            0
        } else {
            1
        }
    }
}

async fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[cfg(test)]
#[path = "signal_supervisor_tests.rs"]
mod tests;
