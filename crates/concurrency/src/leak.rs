//! Thread-leak detection around a top-level test class.
//!
//! Before the class runs, the check records the live registered threads.
//! After the class, and all of its nested classes, have finished, every
//! thread that was not live before is a leak candidate. Candidates are
//! dropped when:
//! - their name is allowed exactly, or starts with an allowed prefix
//!   ([`AllowedThreads`] merged over the superclass chain)
//! - they terminate within the grace period
//! - a [`TransientThreadFilter`] recognises them
//!
//! Anything left fails the class with [`Error::ThreadLeak`].

use crate::thread::{ThreadHandle, ThreadSnapshot};
use std::sync::Arc;
use std::time::Duration;
use testkit_core::config::DEFAULT_LEAK_GRACE_PERIOD_MS;
use testkit_core::{
    AllowedThreads, Error, Extension, ExtensionContext, LeakedThread, Result, TestClass,
    TestkitConfig,
};
use tracing::{debug, error, info, warn};

/// Store namespace of the check.
pub const NAMESPACE: &str = "testkit::ThreadLeakCheck";

const EXTENDED_TEST_CLASS: &str = "extended_test_class";
const THREADS_BEFORE_TEST: &str = "threads_before_test";

/// Time a leak candidate gets to terminate before it is reported.
pub const THREAD_SHUTDOWN_GRACE_PERIOD: Duration =
    Duration::from_millis(DEFAULT_LEAK_GRACE_PERIOD_MS);

/// Recognises threads that outlive a test for reasons outside its control.
///
/// A thread matches when its name starts with `name_prefix` and its spawn
/// location or spawn backtrace mentions `marker`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransientThreadFilter {
    name_prefix: String,
    marker: String,
}

impl TransientThreadFilter {
    /// Filter for threads named `name_prefix..` spawned from code
    /// containing `marker`.
    pub fn new(name_prefix: impl Into<String>, marker: impl Into<String>) -> Self {
        Self {
            name_prefix: name_prefix.into(),
            marker: marker.into(),
        }
    }

    /// Returns `true` if `thread` is covered by this filter.
    pub fn matches(&self, thread: &ThreadHandle) -> bool {
        if !thread.name().starts_with(&self.name_prefix) {
            return false;
        }
        thread.spawn_location().file().contains(&self.marker)
            || thread.spawn_backtrace().to_string().contains(&self.marker)
    }
}

/// Lifecycle extension failing a top-level class that leaks threads.
///
/// Must be registered on the top-level class; nested classes inherit it and
/// are checked together with their enclosing class.
#[derive(Debug, Clone)]
pub struct ThreadLeakCheck {
    grace_period: Duration,
    transient_filters: Vec<TransientThreadFilter>,
}

impl Default for ThreadLeakCheck {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadLeakCheck {
    /// Check with the default grace period and no transient filters.
    pub fn new() -> Self {
        Self {
            grace_period: THREAD_SHUTDOWN_GRACE_PERIOD,
            transient_filters: Vec::new(),
        }
    }

    /// Check using `leak_grace_period_ms` from the configuration.
    pub fn from_config(config: &TestkitConfig) -> Self {
        Self::new().with_grace_period(config.leak_grace_period())
    }

    /// Overrides the grace period.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Adds a transient-thread filter.
    pub fn with_transient_filter(mut self, filter: TransientThreadFilter) -> Self {
        self.transient_filters.push(filter);
        self
    }

    /// Grace period granted to each candidate.
    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Threads of `after` that are new since `before` and not excused.
    pub fn find_leaks(
        &self,
        before: &ThreadSnapshot,
        after: &ThreadSnapshot,
        allowed: &AllowedThreads,
    ) -> Vec<ThreadHandle> {
        let mut candidates = after.new_since(before);
        candidates.retain(|thread| !allowed.allows(thread.name()));
        candidates.retain(|thread| !self.terminates_within_grace_period(thread));
        candidates.retain(|thread| !self.is_transient(thread));
        candidates
    }

    fn terminates_within_grace_period(&self, thread: &ThreadHandle) -> bool {
        warn!(
            target: "testkit::leak",
            daemon = thread.is_daemon(),
            "Giving {} in state {} {:?} to shut down",
            thread,
            thread.state(),
            self.grace_period
        );
        if thread.join_timeout(self.grace_period) {
            info!(target: "testkit::leak", "{} finished", thread);
            true
        } else {
            let backtrace = thread.spawn_backtrace().to_string();
            error!(
                target: "testkit::leak",
                "{} is still alive! Spawned at {}. Stack trace: \n\t\t{}",
                thread,
                thread.spawn_location(),
                backtrace.lines().collect::<Vec<_>>().join("\n\t\t")
            );
            false
        }
    }

    fn is_transient(&self, thread: &ThreadHandle) -> bool {
        self.transient_filters.iter().any(|filter| filter.matches(thread))
    }
}

fn leak_report(threads: &[ThreadHandle]) -> Vec<LeakedThread> {
    threads
        .iter()
        .map(|thread| LeakedThread {
            name: thread.name().to_string(),
            state: thread.state(),
            interrupted: thread.is_interrupted(),
        })
        .collect()
}

impl Extension for ThreadLeakCheck {
    fn before_all(&self, context: &ExtensionContext) -> Result<()> {
        let store = context.store(NAMESPACE);
        if store.get::<Arc<TestClass>>(EXTENDED_TEST_CLASS).is_some() {
            return Ok(());
        }
        if !context.parent_is_root() {
            return Err(Error::Configuration(
                "Extension has to be registered at top class level".to_string(),
            ));
        }
        let class = Arc::clone(context.required_test_class()?);
        let before = ThreadSnapshot::capture();
        debug!(
            target: "testkit::leak",
            class = %class.name(),
            threads = before.len(),
            "Recorded threads before test"
        );
        store.put(EXTENDED_TEST_CLASS, class);
        store.put(THREADS_BEFORE_TEST, before);
        Ok(())
    }

    fn after_all(&self, context: &ExtensionContext) -> Result<()> {
        let store = context.store(NAMESPACE);
        let Some(extended) = store.get::<Arc<TestClass>>(EXTENDED_TEST_CLASS) else {
            return Ok(());
        };
        if !Arc::ptr_eq(context.required_test_class()?, &*extended) {
            return Ok(());
        }
        let before = store
            .get::<ThreadSnapshot>(THREADS_BEFORE_TEST)
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "No thread snapshot recorded for {}",
                    extended.name()
                ))
            })?;

        let allowed = extended.allowed_threads();
        let after = ThreadSnapshot::capture();
        let leaked = self.find_leaks(&before, &after, &allowed);
        if leaked.is_empty() {
            Ok(())
        } else {
            Err(Error::ThreadLeak(leak_report(&leaked)))
        }
    }
}
