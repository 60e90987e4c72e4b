// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Odd Jobs Runner Daemon library
//!
//! Exposes `RunnerConfig` so it can be unit-tested and reused outside the
//! `ojd` binary target.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod env;

pub use env::{ConfigError, RunnerConfig};
