//! Extension exposing information about the currently running test.

use crate::error::Result;
use crate::lifecycle::{Extension, ExtensionContext, Method, TestClass};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Default)]
struct Captured {
    display_name: Option<String>,
    tags: BTreeSet<String>,
    test_class: Option<Arc<TestClass>>,
    test_method: Option<Method>,
}

/// Captures display name, tags, class and method of each test in `before_each`.
///
/// Register one instance on the class and share it (via `Arc`) with the test
/// bodies that need to know which test is running.
#[derive(Default)]
pub struct TestInfo {
    captured: Mutex<Captured>,
}

impl TestInfo {
    /// An extension that has not captured anything yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Display name of the current test.
    pub fn display_name(&self) -> Option<String> {
        self.captured.lock().display_name.clone()
    }

    /// Tags of the current test.
    pub fn tags(&self) -> BTreeSet<String> {
        self.captured.lock().tags.clone()
    }

    /// Class of the current test.
    pub fn test_class(&self) -> Option<Arc<TestClass>> {
        self.captured.lock().test_class.clone()
    }

    /// Method of the current test.
    pub fn test_method(&self) -> Option<Method> {
        self.captured.lock().test_method.clone()
    }
}

impl Extension for TestInfo {
    fn before_each(&self, context: &ExtensionContext) -> Result<()> {
        *self.captured.lock() = Captured {
            display_name: Some(context.display_name()),
            tags: context.tags(),
            test_class: context.test_class().cloned(),
            test_method: context.test_method().cloned(),
        };
        Ok(())
    }
}
