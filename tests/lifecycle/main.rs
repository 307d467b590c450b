//! Lifecycle Integration Tests
//!
//! End-to-end runs of test classes through the launcher with the toolkit's
//! extensions registered together:
//!
//! 1. **Executor scopes** - per-test executors under the thread-leak check
//! 2. **Clock** - a shared test clock reset between tests
//! 3. **Housekeeping** - test info, misuse check and configuration files
//!
//! ## Running These Tests
//!
//! ```bash
//! cargo test --test lifecycle
//! ```

#[path = "../common/mod.rs"]
mod common;

mod clock_reset;
mod executor_scope;
mod housekeeping;
