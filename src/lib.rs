//! testkit - test-support toolkit
//!
//! Helpers for tests that start threads, run executors or depend on time:
//!
//! - [`ConcurrentTest`]: run one task on `n` threads and assert each result
//! - [`ExecutorScope`]: an executor per test, shut down when the test ends
//! - [`ThreadLeakCheck`]: fail a test class that leaves threads running
//! - [`TestClock`]: a clock that only moves when the test winds it
//! - [`DatabaseReset`]: empty an embedded H2 database between tests
//! - [`MisuseCheck`] and [`TestInfo`]: lifecycle housekeeping
//!
//! # Quick Start
//!
//! ```ignore
//! use testkit::ConcurrentTest;
//!
//! ConcurrentTest::create(|index| Ok(index * 2))
//!     .with_concurrency_level(8)
//!     .run_and_assert_each_result(|doubled| assert_eq!(doubled % 2, 0))?;
//! ```
//!
//! Tests are modelled as [`TestClass`]es and run by the [`Launcher`], which
//! drives extension hooks the same way for every helper above.

pub use testkit_clock::{
    default_test_instant, Clock, ResetClockExtension, SystemClock, TestClock,
};
pub use testkit_concurrency::{
    shutdown_or_fail, thread, ConcurrentTest, CyclicBarrier, ExecutorScope, ExecutorService,
    ManagedExecutor, NamedThreadFactory, TaskFuture, ThreadLeakCheck, TransientThreadFilter,
};
pub use testkit_core::{
    AllowedThreads, Error, Extension, ExtensionContext, Launcher, Method, MethodOrder,
    MisuseCheck, Result, TestClass, TestExecutionSummary, TestInfo, TestkitConfig,
};
pub use testkit_dbreset::{Connection, DataSource, DatabaseReset, EntityMetadata};
