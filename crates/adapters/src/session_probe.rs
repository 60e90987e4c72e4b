// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tells "worker is actively doing something" from "worker is idle" from
//! "worker is gone" for tasks whose spawn produced no owned process handle.

use async_trait::async_trait;
use nix::sys::signal;
use nix::unistd::Pid;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Busy,
    Idle,
    Unavailable,
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to read /proc for pid {pid}: {source}")]
    ProcRead {
        pid: u32,
        #[source]
        source: procfs::ProcError,
    },
}

/// The three primitives the idle detection state machine (§4.6) drives.
#[async_trait]
pub trait SessionProbe: Send + Sync + 'static {
    /// Scans the pid's listening TCP sockets, returning the first LISTEN
    /// port owned by that process, if any.
    async fn discover_endpoint(&self, pid: u32) -> Result<Option<u16>, ProbeError>;

    /// Probes a known status endpoint on `port`. Connection failure or
    /// timeout is reported as `Unavailable`, never as an error — a worker
    /// port that isn't answering yet is an expected transient state.
    async fn check_status(&self, port: u16) -> SessionStatus;

    /// Cross-platform liveness check via signal 0.
    fn is_pid_alive(&self, pid: u32) -> bool;
}

/// Linux-specific probe backed by `procfs` (socket discovery) and `nix`
/// (liveness + future signal delivery). Swappable behind the trait for a
/// non-Linux implementation without touching the Runner.
pub struct LinuxSessionProbe {
    client: reqwest::Client,
    probe_timeout: Duration,
}

impl LinuxSessionProbe {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(2))
    }

    pub fn with_timeout(probe_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            probe_timeout,
        }
    }
}

impl Default for LinuxSessionProbe {
    fn default() -> Self {
        Self::new()
    }
}

/// The kernel inode set owned by open file descriptors under `/proc/<pid>/fd`.
fn owned_inodes(pid: u32) -> Result<std::collections::HashSet<u64>, procfs::ProcError> {
    let process = procfs::process::Process::new(pid as i32)?;
    let mut inodes = std::collections::HashSet::new();
    for fd in process.fd()?.flatten() {
        if let procfs::process::FDTarget::Socket(inode) = fd.target {
            inodes.insert(inode);
        }
    }
    Ok(inodes)
}

fn first_listen_port(
    entries: impl IntoIterator<Item = procfs::net::TcpNetEntry>,
    inodes: &std::collections::HashSet<u64>,
) -> Option<u16> {
    entries
        .into_iter()
        .find(|entry| {
            entry.state == procfs::net::TcpState::Listen && inodes.contains(&entry.inode)
        })
        .map(|entry| entry.local_address.port())
}

#[async_trait]
impl SessionProbe for LinuxSessionProbe {
    async fn discover_endpoint(&self, pid: u32) -> Result<Option<u16>, ProbeError> {
        tokio::task::spawn_blocking(move || {
            let inodes = owned_inodes(pid).map_err(|source| ProbeError::ProcRead { pid, source })?;
            if inodes.is_empty() {
                return Ok(None);
            }
            let tcp = procfs::net::tcp().map_err(|source| ProbeError::ProcRead { pid, source })?;
            if let Some(port) = first_listen_port(tcp, &inodes) {
                return Ok(Some(port));
            }
            let tcp6 = procfs::net::tcp6().map_err(|source| ProbeError::ProcRead { pid, source })?;
            Ok(first_listen_port(tcp6, &inodes))
        })
        .await
        .unwrap_or(Ok(None))
    }

    async fn check_status(&self, port: u16) -> SessionStatus {
        let url = format!("http://127.0.0.1:{port}/status");
        let response = tokio::time::timeout(self.probe_timeout, self.client.get(&url).send()).await;
        match response {
            Ok(Ok(resp)) if resp.status().is_success() => {
                match resp.json::<serde_json::Value>().await {
                    Ok(body) => {
                        let busy = body
                            .get("busy")
                            .and_then(|v| v.as_bool())
                            .unwrap_or_else(|| {
                                body.get("status").and_then(|v| v.as_str()) == Some("busy")
                            });
                        if busy {
                            SessionStatus::Busy
                        } else {
                            SessionStatus::Idle
                        }
                    }
                    Err(_) => SessionStatus::Unavailable,
                }
            }
            _ => SessionStatus::Unavailable,
        }
    }

    fn is_pid_alive(&self, pid: u32) -> bool {
        signal::kill(Pid::from_raw(pid as i32), None).is_ok()
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[derive(Default)]
    struct FakeState {
        endpoints: HashMap<u32, u16>,
        statuses: HashMap<u16, SessionStatus>,
        alive: HashMap<u32, bool>,
    }

    /// In-memory `SessionProbe` for runner tests.
    #[derive(Clone, Default)]
    pub struct FakeSessionProbe {
        state: Arc<Mutex<FakeState>>,
    }

    impl FakeSessionProbe {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_endpoint(&self, pid: u32, port: u16) {
            self.state.lock().endpoints.insert(pid, port);
        }

        pub fn set_status(&self, port: u16, status: SessionStatus) {
            self.state.lock().statuses.insert(port, status);
        }

        pub fn set_alive(&self, pid: u32, alive: bool) {
            self.state.lock().alive.insert(pid, alive);
        }
    }

    #[async_trait]
    impl SessionProbe for FakeSessionProbe {
        async fn discover_endpoint(&self, pid: u32) -> Result<Option<u16>, ProbeError> {
            Ok(self.state.lock().endpoints.get(&pid).copied())
        }

        async fn check_status(&self, port: u16) -> SessionStatus {
            self.state
                .lock()
                .statuses
                .get(&port)
                .copied()
                .unwrap_or(SessionStatus::Unavailable)
        }

        fn is_pid_alive(&self, pid: u32) -> bool {
            self.state.lock().alive.get(&pid).copied().unwrap_or(false)
        }
    }
}

#[cfg(test)]
#[path = "session_probe_tests.rs"]
mod tests;
