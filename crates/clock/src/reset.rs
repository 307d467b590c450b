//! Lifecycle extension putting a shared [`TestClock`] back after tests.

use crate::clock::TestClock;
use chrono::TimeZone;
use std::sync::Arc;
use testkit_core::{Extension, ExtensionContext, Result};
use tracing::debug;

/// Decides whether the clock is reset after a test.
pub type ResetPredicate = Arc<dyn Fn(&ExtensionContext) -> bool + Send + Sync>;

/// Resets a clock after each test (when the predicate allows) and always
/// after the class.
///
/// By default, classes that declare a non-random method order keep the
/// clock between tests so ordered tests can build on each other's winds.
pub struct ResetClockExtension<Tz: TimeZone = chrono::Utc> {
    clock: Arc<TestClock<Tz>>,
    reset_after: ResetPredicate,
}

impl<Tz> ResetClockExtension<Tz>
where
    Tz: TimeZone + Send + Sync + 'static,
{
    /// Extension with the default predicate, see
    /// [`has_declared_method_order`](Self::has_declared_method_order).
    pub fn new(clock: Arc<TestClock<Tz>>) -> Self {
        Self::with_predicate(clock, |context| !Self::has_declared_method_order(context))
    }

    /// Extension resetting after each test for which `reset_after` holds.
    pub fn with_predicate<P>(clock: Arc<TestClock<Tz>>, reset_after: P) -> Self
    where
        P: Fn(&ExtensionContext) -> bool + Send + Sync + 'static,
    {
        Self {
            clock,
            reset_after: Arc::new(reset_after),
        }
    }

    /// The managed clock.
    pub fn clock(&self) -> &Arc<TestClock<Tz>> {
        &self.clock
    }

    /// `true` if the context's class declares a non-random method order.
    pub fn has_declared_method_order(context: &ExtensionContext) -> bool {
        context
            .test_class()
            .map(|class| class.has_declared_method_order())
            .unwrap_or(false)
    }

    fn reset_clock(&self, context: &ExtensionContext) {
        debug!(target: "testkit::clock", scope = %context.unique_id(), "Resetting test clock");
        self.clock.reset();
    }
}

impl<Tz> Extension for ResetClockExtension<Tz>
where
    Tz: TimeZone + Send + Sync + 'static,
{
    fn after_each(&self, context: &ExtensionContext) -> Result<()> {
        if (self.reset_after)(context) {
            self.reset_clock(context);
        }
        Ok(())
    }

    fn after_all(&self, context: &ExtensionContext) -> Result<()> {
        self.reset_clock(context);
        Ok(())
    }
}
