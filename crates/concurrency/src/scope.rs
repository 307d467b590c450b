//! Per-test executor owned by a lifecycle extension.

use crate::executor::ManagedExecutor;
use crate::factory::NamedThreadFactory;
use crate::future::{FutureHandle, TaskFuture};
use crate::shutdown;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use testkit_core::{Error, Extension, ExtensionContext, Result, TestkitConfig};
use tracing::debug;

/// Phase of an [`ExecutorScope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopePhase {
    /// No test has started yet
    Uninitialized,
    /// A test is running and the executor accepts tasks
    Active,
    /// The last test finished and its executor was shut down
    TornDown,
}

enum ScopeState {
    Uninitialized,
    Active {
        test_name: String,
        executor: Arc<ManagedExecutor>,
        futures: Vec<FutureHandle>,
    },
    TornDown {
        futures: Vec<FutureHandle>,
    },
}

/// Lifecycle extension giving each test a fresh cached executor.
///
/// Workers are named after the running test (`Outer_Inner_method1`, ...).
/// The executor is shut down after each test with the configured timeout; a
/// shutdown failure fails the test.
pub struct ExecutorScope {
    timeout: Duration,
    state: Mutex<ScopeState>,
}

impl ExecutorScope {
    /// Scope whose after-each shutdown waits up to `timeout` per phase.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            state: Mutex::new(ScopeState::Uninitialized),
        }
    }

    /// Scope using `scope_timeout_ms` from the configuration.
    pub fn from_config(config: &TestkitConfig) -> Self {
        Self::new(config.scope_timeout())
    }

    /// Shutdown timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Current phase.
    pub fn phase(&self) -> ScopePhase {
        match &*self.state.lock() {
            ScopeState::Uninitialized => ScopePhase::Uninitialized,
            ScopeState::Active { .. } => ScopePhase::Active,
            ScopeState::TornDown { .. } => ScopePhase::TornDown,
        }
    }

    /// Name of the running test, used as the worker-thread prefix.
    pub fn test_name(&self) -> Option<String> {
        match &*self.state.lock() {
            ScopeState::Active { test_name, .. } => Some(test_name.clone()),
            _ => None,
        }
    }

    /// Executor of the running test.
    pub fn executor(&self) -> Option<Arc<ManagedExecutor>> {
        match &*self.state.lock() {
            ScopeState::Active { executor, .. } => Some(Arc::clone(executor)),
            _ => None,
        }
    }

    /// Submits a value-returning task and records its future.
    pub fn submit<T, F>(&self, body: F) -> Result<TaskFuture<T>>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let mut state = self.state.lock();
        match &mut *state {
            ScopeState::Active {
                executor, futures, ..
            } => {
                let future = executor.submit(body)?;
                futures.push(Arc::new(future.clone()));
                Ok(future)
            }
            _ => Err(Error::Configuration(
                "ExecutorScope accepts tasks only while a test is running".to_string(),
            )),
        }
    }

    /// Submits a unit task and records its future.
    pub fn execute<F>(&self, body: F) -> Result<TaskFuture<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(move || {
            body();
            Ok(())
        })
    }

    /// Futures recorded for the current (or last) test, in submission order.
    pub fn futures(&self) -> Vec<FutureHandle> {
        match &*self.state.lock() {
            ScopeState::Uninitialized => Vec::new(),
            ScopeState::Active { futures, .. } | ScopeState::TornDown { futures } => {
                futures.clone()
            }
        }
    }

    /// Waits for every recorded future in submission order and returns the
    /// first failure.
    pub fn await_all_futures(&self) -> Result<()> {
        for future in self.futures() {
            future.check()?;
        }
        Ok(())
    }
}

impl Extension for ExecutorScope {
    fn before_each(&self, context: &ExtensionContext) -> Result<()> {
        let test_name = context.test_name()?;
        let executor = Arc::new(ManagedExecutor::cached(NamedThreadFactory::new(
            test_name.clone(),
        )));
        debug!(target: "testkit::executor", test = %test_name, "Executor scope activated");
        *self.state.lock() = ScopeState::Active {
            test_name,
            executor,
            futures: Vec::new(),
        };
        Ok(())
    }

    fn after_each(&self, _context: &ExtensionContext) -> Result<()> {
        let previous = std::mem::replace(&mut *self.state.lock(), ScopeState::Uninitialized);
        let (outcome, futures) = match previous {
            ScopeState::Active {
                test_name,
                executor,
                futures,
            } => (
                shutdown::shutdown_or_fail(Some(executor.as_ref()), &test_name, self.timeout),
                futures,
            ),
            ScopeState::TornDown { futures } => (Ok(()), futures),
            ScopeState::Uninitialized => (Ok(()), Vec::new()),
        };
        *self.state.lock() = ScopeState::TornDown { futures };
        outcome
    }
}
