// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP+JSON adapter over the task service, the Runner's sole source of
//! truth for task state. Mirrors the narrow async-trait-plus-one-impl shape
//! the session/agent adapters already use in this crate.

use async_trait::async_trait;
use oj_core::{Clock, ProjectId, RunnerId, Task, TaskId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Default per-call timeout, per distilled spec §4.1.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default health-cache TTL, per distilled spec §4.1.
pub const HEALTH_CACHE_TTL_MS: u64 = 5_000;

#[derive(Debug, Error)]
pub enum TaskServiceError {
    #[error("request to {path} timed out after {timeout_ms}ms")]
    Timeout { path: String, timeout_ms: u64 },
    #[error("transport error calling {path}: {source}")]
    Transport {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected status {status} from {path}: {body}")]
    UnexpectedStatus {
        path: String,
        status: u16,
        body: String,
    },
    #[error("malformed response body from {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: reqwest::Error,
    },
}

impl TaskServiceError {
    /// Whether a retry on the next poll tick is the appropriate response,
    /// rather than surfacing to the caller as a hard failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TaskServiceError::Timeout { .. } | TaskServiceError::Transport { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Health {
    pub status: HealthStatus,
    #[serde(default)]
    pub feature_a_ok: bool,
    #[serde(default)]
    pub feature_b_ok: bool,
}

impl Health {
    fn unhealthy() -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            feature_a_ok: false,
            feature_b_ok: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClaimResult {
    Claimed { claimed_at_ms: u64 },
    Conflict { claimed_by: String, is_stale: bool },
}

impl ClaimResult {
    pub fn is_claimed(&self) -> bool {
        matches!(self, ClaimResult::Claimed { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitFor {
    Completed,
    Any,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WaitOutcome {
    pub changed: bool,
    pub timed_out: bool,
}

/// A thin, typed adapter over the task service's HTTP+JSON API.
#[async_trait]
pub trait TaskServiceClient: Send + Sync + 'static {
    async fn health(&self) -> Health;
    async fn list_projects(&self) -> Result<Vec<ProjectId>, TaskServiceError>;
    async fn list_ready(&self, project: &ProjectId) -> Result<Vec<Task>, TaskServiceError>;
    async fn list_waiting(&self, project: &ProjectId) -> Result<Vec<Task>, TaskServiceError>;
    async fn list_blocked(&self, project: &ProjectId) -> Result<Vec<Task>, TaskServiceError>;
    async fn list_in_progress(&self, project: &ProjectId) -> Result<Vec<Task>, TaskServiceError>;
    async fn list_all(&self, project: &ProjectId) -> Result<Vec<Task>, TaskServiceError>;
    async fn next(&self, project: &ProjectId) -> Result<Option<Task>, TaskServiceError>;
    async fn claim(
        &self,
        project: &ProjectId,
        task_id: &TaskId,
        runner_id: &RunnerId,
    ) -> Result<ClaimResult, TaskServiceError>;
    async fn release(&self, project: &ProjectId, task_id: &TaskId) -> Result<(), TaskServiceError>;
    async fn update_status(&self, path: &str, new_status: &str) -> Result<(), TaskServiceError>;
    async fn append_body(&self, path: &str, markdown: &str) -> Result<(), TaskServiceError>;
    async fn wait_for_status(
        &self,
        project: &ProjectId,
        task_ids: &[TaskId],
        wait_for: WaitFor,
        timeout_ms: u64,
    ) -> Result<WaitOutcome, TaskServiceError>;
}

#[derive(Deserialize)]
struct ProjectsResponse {
    projects: Vec<String>,
}

#[derive(Deserialize)]
struct TasksResponse {
    #[serde(default)]
    tasks: Vec<Task>,
}

#[derive(Deserialize)]
struct HealthResponse {
    status: HealthStatus,
    #[serde(default)]
    feature_a_ok: bool,
    #[serde(default)]
    feature_b_ok: bool,
}

#[derive(Serialize)]
struct ClaimRequest<'a> {
    runner_id: &'a str,
}

#[derive(Deserialize)]
struct ClaimConflictBody {
    #[serde(default)]
    claimed_by: String,
    #[serde(default)]
    is_stale: bool,
}

#[derive(Serialize)]
struct UpdateStatusRequest<'a> {
    status: &'a str,
}

#[derive(Serialize)]
struct AppendBodyRequest<'a> {
    append: &'a str,
}

#[derive(Serialize)]
struct WaitForStatusRequest<'a> {
    #[serde(rename = "taskIds")]
    task_ids: &'a [TaskId],
    #[serde(rename = "waitFor", skip_serializing_if = "Option::is_none")]
    wait_for: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout: Option<u64>,
}

#[derive(Deserialize)]
struct WaitForStatusResponse {
    #[serde(default)]
    changed: bool,
    #[serde(rename = "timedOut", default)]
    timed_out: bool,
}

struct CachedHealth {
    value: Health,
    checked_at_ms: u64,
}

/// Production `TaskServiceClient` over `reqwest`, with a clock-driven health
/// cache so the poll loop never makes more than one `/health` call per TTL.
pub struct HttpTaskServiceClient<C: Clock> {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
    clock: C,
    health_cache: Mutex<Option<CachedHealth>>,
}

impl<C: Clock> HttpTaskServiceClient<C> {
    pub fn new(base_url: impl Into<String>, clock: C) -> Self {
        Self::with_timeout(base_url, clock, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, clock: C, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
            timeout,
            clock,
            health_cache: Mutex::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn send_json<T: Serialize + ?Sized, R: for<'de> Deserialize<'de>>(
        &self,
        request: reqwest::RequestBuilder,
        path: &str,
        body: Option<&T>,
    ) -> Result<R, TaskServiceError> {
        let response = self.execute(request, path, body).await?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(TaskServiceError::UnexpectedStatus {
                path: path.to_string(),
                status: status.as_u16(),
                body: body_text,
            });
        }
        response
            .json::<R>()
            .await
            .map_err(|source| TaskServiceError::Decode {
                path: path.to_string(),
                source,
            })
    }

    async fn execute<T: Serialize + ?Sized>(
        &self,
        mut request: reqwest::RequestBuilder,
        path: &str,
        body: Option<&T>,
    ) -> Result<reqwest::Response, TaskServiceError> {
        if let Some(body) = body {
            request = request.json(body);
        }
        match tokio::time::timeout(self.timeout, request.send()).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(source)) => Err(TaskServiceError::Transport {
                path: path.to_string(),
                source,
            }),
            Err(_elapsed) => Err(TaskServiceError::Timeout {
                path: path.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }

    async fn list(&self, project: &ProjectId, suffix: &str) -> Result<Vec<Task>, TaskServiceError> {
        let path = format!("/api/v1/tasks/{}/{suffix}", project.as_str());
        let response = self
            .execute(self.client.get(self.url(&path)), &path, None::<&()>)
            .await?;
        if response.status().as_u16() == 404 {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(TaskServiceError::UnexpectedStatus { path, status, body });
        }
        let parsed: TasksResponse =
            response
                .json()
                .await
                .map_err(|source| TaskServiceError::Decode { path, source })?;
        Ok(parsed.tasks)
    }
}

#[async_trait]
impl<C: Clock> TaskServiceClient for HttpTaskServiceClient<C> {
    async fn health(&self) -> Health {
        let now = self.clock.epoch_ms();
        if let Some(cached) = self.health_cache.lock().as_ref() {
            if now.saturating_sub(cached.checked_at_ms) < HEALTH_CACHE_TTL_MS {
                return cached.value.clone();
            }
        }

        let path = "/health";
        let value = match self
            .execute(self.client.get(self.url(path)), path, None::<&()>)
            .await
        {
            Ok(response) if response.status().is_success() => response
                .json::<HealthResponse>()
                .await
                .map(|h| Health {
                    status: h.status,
                    feature_a_ok: h.feature_a_ok,
                    feature_b_ok: h.feature_b_ok,
                })
                .unwrap_or_else(|_| Health::unhealthy()),
            _ => Health::unhealthy(),
        };

        *self.health_cache.lock() = Some(CachedHealth {
            value: value.clone(),
            checked_at_ms: now,
        });
        value
    }

    async fn list_projects(&self) -> Result<Vec<ProjectId>, TaskServiceError> {
        let path = "/api/v1/tasks";
        let parsed: ProjectsResponse = self
            .send_json(self.client.get(self.url(path)), path, None::<&()>)
            .await?;
        Ok(parsed.projects.into_iter().map(ProjectId::new).collect())
    }

    async fn list_ready(&self, project: &ProjectId) -> Result<Vec<Task>, TaskServiceError> {
        self.list(project, "ready").await
    }

    async fn list_waiting(&self, project: &ProjectId) -> Result<Vec<Task>, TaskServiceError> {
        self.list(project, "waiting").await
    }

    async fn list_blocked(&self, project: &ProjectId) -> Result<Vec<Task>, TaskServiceError> {
        self.list(project, "blocked").await
    }

    async fn list_in_progress(&self, project: &ProjectId) -> Result<Vec<Task>, TaskServiceError> {
        self.list(project, "in_progress").await
    }

    async fn list_all(&self, project: &ProjectId) -> Result<Vec<Task>, TaskServiceError> {
        let path = format!("/api/v1/tasks/{}", project.as_str());
        let parsed: TasksResponse = self
            .send_json(self.client.get(self.url(&path)), &path, None::<&()>)
            .await?;
        Ok(parsed.tasks)
    }

    async fn next(&self, project: &ProjectId) -> Result<Option<Task>, TaskServiceError> {
        let path = format!("/api/v1/tasks/{}/next", project.as_str());
        let response = self
            .execute(self.client.get(self.url(&path)), &path, None::<&()>)
            .await?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(TaskServiceError::UnexpectedStatus { path, status, body });
        }
        response
            .json::<Task>()
            .await
            .map(Some)
            .map_err(|source| TaskServiceError::Decode { path, source })
    }

    async fn claim(
        &self,
        project: &ProjectId,
        task_id: &TaskId,
        runner_id: &RunnerId,
    ) -> Result<ClaimResult, TaskServiceError> {
        let path = format!(
            "/api/v1/tasks/{}/{}/claim",
            project.as_str(),
            task_id.as_str()
        );
        let request_body = ClaimRequest {
            runner_id: runner_id.as_str(),
        };
        let response = self
            .execute(
                self.client.post(self.url(&path)),
                &path,
                Some(&request_body),
            )
            .await?;

        if response.status().as_u16() == 409 {
            let body: ClaimConflictBody = response
                .json()
                .await
                .map_err(|source| TaskServiceError::Decode { path, source })?;
            return Ok(ClaimResult::Conflict {
                claimed_by: body.claimed_by,
                is_stale: body.is_stale,
            });
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(TaskServiceError::UnexpectedStatus { path, status, body });
        }
        Ok(ClaimResult::Claimed {
            claimed_at_ms: self.clock.epoch_ms(),
        })
    }

    async fn release(&self, project: &ProjectId, task_id: &TaskId) -> Result<(), TaskServiceError> {
        let path = format!(
            "/api/v1/tasks/{}/{}/release",
            project.as_str(),
            task_id.as_str()
        );
        let response = self
            .execute(self.client.post(self.url(&path)), &path, None::<&()>)
            .await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(TaskServiceError::UnexpectedStatus { path, status, body });
        }
        Ok(())
    }

    async fn update_status(&self, path: &str, new_status: &str) -> Result<(), TaskServiceError> {
        let encoded = format!("/api/v1/entries/{}", urlencoding_path(path));
        let body = UpdateStatusRequest { status: new_status };
        let response = self
            .execute(self.client.patch(self.url(&encoded)), &encoded, Some(&body))
            .await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body_text = response.text().await.unwrap_or_default();
            return Err(TaskServiceError::UnexpectedStatus {
                path: encoded,
                status,
                body: body_text,
            });
        }
        Ok(())
    }

    async fn append_body(&self, path: &str, markdown: &str) -> Result<(), TaskServiceError> {
        let encoded = format!("/api/v1/entries/{}", urlencoding_path(path));
        let body = AppendBodyRequest { append: markdown };
        let response = self
            .execute(self.client.patch(self.url(&encoded)), &encoded, Some(&body))
            .await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body_text = response.text().await.unwrap_or_default();
            return Err(TaskServiceError::UnexpectedStatus {
                path: encoded,
                status,
                body: body_text,
            });
        }
        Ok(())
    }

    async fn wait_for_status(
        &self,
        project: &ProjectId,
        task_ids: &[TaskId],
        wait_for: WaitFor,
        timeout_ms: u64,
    ) -> Result<WaitOutcome, TaskServiceError> {
        if task_ids.is_empty() && wait_for == WaitFor::Completed {
            return Ok(WaitOutcome {
                changed: true,
                timed_out: false,
            });
        }
        let path = format!("/api/v1/tasks/{}/status", project.as_str());
        let request_body = WaitForStatusRequest {
            task_ids,
            wait_for: Some(match wait_for {
                WaitFor::Completed => "completed",
                WaitFor::Any => "any",
            }),
            timeout: Some(timeout_ms.min(300_000)),
        };
        let parsed: WaitForStatusResponse = self
            .send_json(self.client.post(self.url(&path)), &path, Some(&request_body))
            .await?;
        Ok(WaitOutcome {
            changed: parsed.changed,
            timed_out: parsed.timed_out,
        })
    }
}

fn urlencoding_path(path: &str) -> String {
    path.bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{:02X}", b),
        })
        .collect()
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use super::*;
    use std::collections::HashMap;

    #[derive(Debug, Clone)]
    pub enum TaskServiceCall {
        Health,
        ListProjects,
        ListReady(ProjectId),
        ListWaiting(ProjectId),
        ListBlocked(ProjectId),
        ListInProgress(ProjectId),
        ListAll(ProjectId),
        Next(ProjectId),
        Claim(ProjectId, TaskId),
        Release(ProjectId, TaskId),
        UpdateStatus(String, String),
        AppendBody(String, String),
        WaitForStatus(ProjectId, Vec<TaskId>),
    }

    #[derive(Default)]
    struct FakeState {
        health: Health,
        ready: HashMap<String, Vec<Task>>,
        waiting: HashMap<String, Vec<Task>>,
        blocked: HashMap<String, Vec<Task>>,
        in_progress: HashMap<String, Vec<Task>>,
        all: HashMap<String, Vec<Task>>,
        claims: HashMap<(String, String), String>,
        statuses: HashMap<String, String>,
        bodies: HashMap<String, Vec<String>>,
        calls: Vec<TaskServiceCall>,
        claim_conflicts: HashMap<(String, String), ClaimResult>,
    }

    impl Default for Health {
        fn default() -> Self {
            Self {
                status: HealthStatus::Healthy,
                feature_a_ok: true,
                feature_b_ok: true,
            }
        }
    }

    /// In-memory `TaskServiceClient` for engine/runner tests.
    #[derive(Clone)]
    pub struct FakeTaskServiceClient {
        state: Arc<Mutex<FakeState>>,
    }

    impl Default for FakeTaskServiceClient {
        fn default() -> Self {
            Self {
                state: Arc::new(Mutex::new(FakeState::default())),
            }
        }
    }

    impl FakeTaskServiceClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_health(&self, health: Health) {
            self.state.lock().health = health;
        }

        pub fn set_ready(&self, project: &ProjectId, tasks: Vec<Task>) {
            self.state
                .lock()
                .ready
                .insert(project.as_str().to_string(), tasks);
        }

        pub fn set_in_progress(&self, project: &ProjectId, tasks: Vec<Task>) {
            self.state
                .lock()
                .in_progress
                .insert(project.as_str().to_string(), tasks);
        }

        pub fn set_claim_conflict(&self, project: &ProjectId, task_id: &TaskId, result: ClaimResult) {
            self.state.lock().claim_conflicts.insert(
                (project.as_str().to_string(), task_id.as_str().to_string()),
                result,
            );
        }

        pub fn status_of(&self, path: &str) -> Option<String> {
            self.state.lock().statuses.get(path).cloned()
        }

        pub fn body_notes(&self, path: &str) -> Vec<String> {
            self.state
                .lock()
                .bodies
                .get(path)
                .cloned()
                .unwrap_or_default()
        }

        pub fn calls(&self) -> Vec<TaskServiceCall> {
            self.state.lock().calls.clone()
        }

        pub fn claimed_by(&self, project: &ProjectId, task_id: &TaskId) -> Option<String> {
            self.state
                .lock()
                .claims
                .get(&(project.as_str().to_string(), task_id.as_str().to_string()))
                .cloned()
        }
    }

    #[async_trait]
    impl TaskServiceClient for FakeTaskServiceClient {
        async fn health(&self) -> Health {
            let mut state = self.state.lock();
            state.calls.push(TaskServiceCall::Health);
            state.health.clone()
        }

        async fn list_projects(&self) -> Result<Vec<ProjectId>, TaskServiceError> {
            let mut state = self.state.lock();
            state.calls.push(TaskServiceCall::ListProjects);
            let mut keys: Vec<String> = state
                .ready
                .keys()
                .chain(state.all.keys())
                .cloned()
                .collect();
            keys.sort();
            keys.dedup();
            Ok(keys.into_iter().map(ProjectId::new).collect())
        }

        async fn list_ready(&self, project: &ProjectId) -> Result<Vec<Task>, TaskServiceError> {
            let mut state = self.state.lock();
            state.calls.push(TaskServiceCall::ListReady(project.clone()));
            Ok(state
                .ready
                .get(project.as_str())
                .cloned()
                .unwrap_or_default())
        }

        async fn list_waiting(&self, project: &ProjectId) -> Result<Vec<Task>, TaskServiceError> {
            let mut state = self.state.lock();
            state
                .calls
                .push(TaskServiceCall::ListWaiting(project.clone()));
            Ok(state
                .waiting
                .get(project.as_str())
                .cloned()
                .unwrap_or_default())
        }

        async fn list_blocked(&self, project: &ProjectId) -> Result<Vec<Task>, TaskServiceError> {
            let mut state = self.state.lock();
            state
                .calls
                .push(TaskServiceCall::ListBlocked(project.clone()));
            Ok(state
                .blocked
                .get(project.as_str())
                .cloned()
                .unwrap_or_default())
        }

        async fn list_in_progress(&self, project: &ProjectId) -> Result<Vec<Task>, TaskServiceError> {
            let mut state = self.state.lock();
            state
                .calls
                .push(TaskServiceCall::ListInProgress(project.clone()));
            Ok(state
                .in_progress
                .get(project.as_str())
                .cloned()
                .unwrap_or_default())
        }

        async fn list_all(&self, project: &ProjectId) -> Result<Vec<Task>, TaskServiceError> {
            let mut state = self.state.lock();
            state.calls.push(TaskServiceCall::ListAll(project.clone()));
            Ok(state
                .all
                .get(project.as_str())
                .cloned()
                .unwrap_or_default())
        }

        async fn next(&self, project: &ProjectId) -> Result<Option<Task>, TaskServiceError> {
            let mut state = self.state.lock();
            state.calls.push(TaskServiceCall::Next(project.clone()));
            Ok(state
                .ready
                .get(project.as_str())
                .and_then(|tasks| tasks.first().cloned()))
        }

        async fn claim(
            &self,
            project: &ProjectId,
            task_id: &TaskId,
            runner_id: &RunnerId,
        ) -> Result<ClaimResult, TaskServiceError> {
            let mut state = self.state.lock();
            state
                .calls
                .push(TaskServiceCall::Claim(project.clone(), task_id.clone()));
            let key = (project.as_str().to_string(), task_id.as_str().to_string());
            if let Some(conflict) = state.claim_conflicts.get(&key).cloned() {
                return Ok(conflict);
            }
            if let Some(existing) = state.claims.get(&key) {
                if existing != runner_id.as_str() {
                    return Ok(ClaimResult::Conflict {
                        claimed_by: existing.clone(),
                        is_stale: false,
                    });
                }
            }
            state.claims.insert(key, runner_id.as_str().to_string());
            Ok(ClaimResult::Claimed { claimed_at_ms: 0 })
        }

        async fn release(
            &self,
            project: &ProjectId,
            task_id: &TaskId,
        ) -> Result<(), TaskServiceError> {
            let mut state = self.state.lock();
            state
                .calls
                .push(TaskServiceCall::Release(project.clone(), task_id.clone()));
            state
                .claims
                .remove(&(project.as_str().to_string(), task_id.as_str().to_string()));
            Ok(())
        }

        async fn update_status(&self, path: &str, new_status: &str) -> Result<(), TaskServiceError> {
            let mut state = self.state.lock();
            state
                .calls
                .push(TaskServiceCall::UpdateStatus(path.to_string(), new_status.to_string()));
            state
                .statuses
                .insert(path.to_string(), new_status.to_string());
            Ok(())
        }

        async fn append_body(&self, path: &str, markdown: &str) -> Result<(), TaskServiceError> {
            let mut state = self.state.lock();
            state
                .calls
                .push(TaskServiceCall::AppendBody(path.to_string(), markdown.to_string()));
            state
                .bodies
                .entry(path.to_string())
                .or_default()
                .push(markdown.to_string());
            Ok(())
        }

        async fn wait_for_status(
            &self,
            project: &ProjectId,
            task_ids: &[TaskId],
            _wait_for: WaitFor,
            _timeout_ms: u64,
        ) -> Result<WaitOutcome, TaskServiceError> {
            let mut state = self.state.lock();
            state
                .calls
                .push(TaskServiceCall::WaitForStatus(project.clone(), task_ids.to_vec()));
            if task_ids.is_empty() {
                return Ok(WaitOutcome {
                    changed: true,
                    timed_out: false,
                });
            }
            Ok(WaitOutcome {
                changed: false,
                timed_out: true,
            })
        }
    }
}

#[cfg(test)]
#[path = "task_service_tests.rs"]
mod tests;
