// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Synchronous in-process publish of `oj_core::RunnerEvent` to the terminal
//! UI and logging collaborators. Ephemeral: nothing here is persisted, and
//! a subscriber that isn't listening when an event fires has simply missed
//! it.

pub use oj_core::RunnerEvent;
use tokio::sync::broadcast;

/// Default channel capacity. Lagging subscribers drop the oldest events
/// rather than block the publisher — this bus is best-effort, not a log.
const DEFAULT_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RunnerEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunnerEvent> {
        self.sender.subscribe()
    }

    /// Publishing is a no-op, not an error, when nobody is subscribed.
    pub fn publish(&self, event: RunnerEvent) {
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
