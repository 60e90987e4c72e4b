// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Durable per-project state for the Odd Jobs runner: snapshot files
//! written with write-temp-then-rename atomicity, tolerant of missing or
//! corrupt files on read.

mod paths;
mod state_store;

pub use paths::StatePaths;
pub use state_store::{StateStore, StateStoreError};
