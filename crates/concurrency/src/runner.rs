//! Runs one task on `n` threads at once and asserts every result.

use crate::executor::ManagedExecutor;
use crate::factory::NamedThreadFactory;
use crate::future::CompletionQueue;
use crate::shutdown;
use std::any::type_name;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use testkit_core::config::{
    DEFAULT_CONCURRENCY_LEVEL, DEFAULT_RUNNER_TIMEOUT_MS, DEFAULT_THREAD_NAME_PREFIX,
};
use testkit_core::{Error, Result, TestkitConfig};
use tracing::{error, warn};

/// Timeout of each shutdown phase after the tasks have been collected.
pub const DEFAULT_RUNNER_TIMEOUT: Duration = Duration::from_millis(DEFAULT_RUNNER_TIMEOUT_MS);

/// Task invoked once per worker with the worker's index `0..n`.
pub trait IndexedTask<T>: Send + Sync + 'static {
    /// Runs the task for `index`.
    fn call(&self, index: usize) -> Result<T>;
}

impl<T, F> IndexedTask<T> for F
where
    F: Fn(usize) -> Result<T> + Send + Sync + 'static,
{
    fn call(&self, index: usize) -> Result<T> {
        self(index)
    }
}

/// Concurrent-task runner.
///
/// ```no_run
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use testkit_concurrency::ConcurrentTest;
///
/// let counter = Arc::new(AtomicUsize::new(0));
/// let task_counter = Arc::clone(&counter);
/// ConcurrentTest::create(move |_index| Ok(task_counter.fetch_add(1, Ordering::SeqCst) + 1))
///     .with_concurrency_level(100)
///     .run_and_assert_each_result(|value| assert!(value >= 1))
///     .unwrap();
/// assert_eq!(counter.load(Ordering::SeqCst), 100);
/// ```
pub struct ConcurrentTest<T> {
    task: Arc<dyn IndexedTask<T>>,
    concurrency_level: usize,
    thread_name_prefix: String,
    timeout: Duration,
}

impl<T: Send + 'static> ConcurrentTest<T> {
    /// Runner for `task` with 10 threads named `ConcurrentTest1..`.
    pub fn create<F>(task: F) -> Self
    where
        F: Fn(usize) -> Result<T> + Send + Sync + 'static,
    {
        Self::from_task(task)
    }

    /// Runner for an [`IndexedTask`] implementation.
    pub fn from_task<K>(task: K) -> Self
    where
        K: IndexedTask<T>,
    {
        Self {
            task: Arc::new(task),
            concurrency_level: DEFAULT_CONCURRENCY_LEVEL,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
            timeout: DEFAULT_RUNNER_TIMEOUT,
        }
    }

    /// Number of threads and tasks.
    pub fn with_concurrency_level(mut self, concurrency_level: usize) -> Self {
        self.concurrency_level = concurrency_level;
        self
    }

    /// Worker-thread name prefix.
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Uses the simple name of `C` as the worker-thread name prefix.
    pub fn with_thread_name_prefix_from<C: ?Sized>(self) -> Self {
        self.with_thread_name_prefix(simple_type_name::<C>())
    }

    /// Applies concurrency level, prefix and timeout from `config`.
    pub fn with_config(mut self, config: &TestkitConfig) -> Self {
        self.concurrency_level = config.concurrency_level;
        self.thread_name_prefix = config.thread_name_prefix.clone();
        self.timeout = config.runner_timeout();
        self
    }

    /// Configured number of threads.
    pub fn concurrency_level(&self) -> usize {
        self.concurrency_level
    }

    /// Configured worker-thread name prefix.
    pub fn thread_name_prefix(&self) -> &str {
        &self.thread_name_prefix
    }

    /// Runs the task `n` times on `n` threads and passes each result to
    /// `assertion` in completion order.
    ///
    /// The pool is always shut down before returning. A task failure is
    /// returned as [`Error::TaskFailed`]; a panicking assertion is resumed
    /// once the pool is gone.
    pub fn run_and_assert_each_result<A>(&self, mut assertion: A) -> Result<()>
    where
        A: FnMut(T),
    {
        if self.concurrency_level == 0 {
            return Err(Error::InvalidArgument(
                "concurrency level must be positive".to_string(),
            ));
        }
        let executor = ManagedExecutor::fixed(
            self.concurrency_level,
            NamedThreadFactory::new(self.thread_name_prefix.clone()),
        )?;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.submit_and_collect(&executor, &mut assertion)
        }));
        let teardown =
            shutdown::shutdown_or_fail(Some(&executor), &self.thread_name_prefix, self.timeout);

        match outcome {
            Ok(Ok(())) => teardown,
            Ok(Err(e)) => {
                if let Err(teardown_error) = teardown {
                    warn!(target: "testkit::executor", error = %teardown_error, "Teardown failed after task failure");
                }
                Err(e)
            }
            Err(payload) => {
                if let Err(teardown_error) = teardown {
                    error!(target: "testkit::executor", error = %teardown_error, "Teardown failed after assertion panic");
                }
                panic::resume_unwind(payload)
            }
        }
    }

    fn submit_and_collect<A>(&self, executor: &ManagedExecutor, assertion: &mut A) -> Result<()>
    where
        A: FnMut(T),
    {
        let completions = CompletionQueue::new();
        for index in 0..self.concurrency_level {
            let task = Arc::clone(&self.task);
            completions.submit(
                executor,
                format!("{}#{}", self.thread_name_prefix, index),
                move || task.call(index),
            )?;
        }
        for _ in 0..self.concurrency_level {
            let result = completions.take()?.get()?;
            assertion(result);
        }
        Ok(())
    }
}

fn simple_type_name<C: ?Sized>() -> &'static str {
    let full = type_name::<C>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SomeFixture;

    #[test]
    fn simple_type_name_strips_path_and_generics() {
        assert_eq!(simple_type_name::<SomeFixture>(), "SomeFixture");
        assert_eq!(simple_type_name::<Vec<String>>(), "Vec");
        assert_eq!(simple_type_name::<u32>(), "u32");
    }

    #[test]
    fn defaults_and_builders() {
        let runner = ConcurrentTest::create(|i| Ok(i));
        assert_eq!(runner.concurrency_level(), 10);
        assert_eq!(runner.thread_name_prefix(), "ConcurrentTest");

        let runner = runner
            .with_concurrency_level(3)
            .with_thread_name_prefix_from::<SomeFixture>();
        assert_eq!(runner.concurrency_level(), 3);
        assert_eq!(runner.thread_name_prefix(), "SomeFixture");
    }

    #[test]
    fn config_overrides_defaults() {
        let config = TestkitConfig {
            concurrency_level: 4,
            thread_name_prefix: "FromConfig".to_string(),
            ..TestkitConfig::default()
        };
        let runner = ConcurrentTest::create(|i| Ok(i)).with_config(&config);
        assert_eq!(runner.concurrency_level(), 4);
        assert_eq!(runner.thread_name_prefix(), "FromConfig");
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let result = ConcurrentTest::create(|i| Ok(i))
            .with_concurrency_level(0)
            .run_and_assert_each_result(|_| {});
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    struct Doubler;

    impl IndexedTask<usize> for Doubler {
        fn call(&self, index: usize) -> Result<usize> {
            Ok(index * 2)
        }
    }

    #[test]
    fn trait_tasks_are_accepted() {
        let mut total = 0;
        ConcurrentTest::from_task(Doubler)
            .with_concurrency_level(4)
            .run_and_assert_each_result(|value| total += value)
            .unwrap();
        assert_eq!(total, 12);
    }

    #[test]
    fn every_index_runs_once() {
        let mut seen = Vec::new();
        ConcurrentTest::create(|i| Ok(i))
            .with_concurrency_level(8)
            .run_and_assert_each_result(|i| seen.push(i))
            .unwrap();
        seen.sort_unstable();
        assert_eq!(seen, (0..8).collect::<Vec<_>>());
    }
}
