//! Test utilities for the mockyard workspace
//!
//! Fake mock-server executables, a harness that wires a daemon into a
//! temporary directory, and polling helpers for asynchronous state changes.

pub mod helpers;

pub use helpers::daemon_harness::TestDaemonHarness;
pub use helpers::mock_scripts::MockScript;
pub use helpers::wait_utils::{wait_for_log_line, wait_for_not_running, wait_until};
