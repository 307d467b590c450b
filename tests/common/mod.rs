//! Shared test utilities for the integration suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's main.rs.

#![allow(dead_code)]

use std::sync::Once;
use std::time::Duration;

use testkit::thread;

static INIT_TRACING: Once = Once::new();

/// Routes `tracing` output through the test harness so it shows up for
/// failing tests only.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

/// Interrupts and joins every registered thread whose name starts with
/// `prefix`.
pub fn join_threads_with_prefix(prefix: &str) {
    for handle in thread::snapshot().iter() {
        if handle.name().starts_with(prefix) {
            handle.interrupt();
            handle.join_timeout(Duration::from_secs(10));
        }
    }
}
