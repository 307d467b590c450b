//! Executes test classes and collects failures.
//!
//! Execution order for one class:
//!
//! 1. extension `before_all` hooks, then static before-all callbacks
//! 2. for every test: extension `before_each`, before-each callbacks, the test
//!    body, after-each callbacks, extension `after_each` (reverse order)
//! 3. nested classes, recursively, with the enclosing class's extensions
//! 4. after-all callbacks, extension `after_all` hooks (reverse order)
//!
//! A failing setup phase skips the body it guards, but every teardown phase
//! still runs. Panics are caught and reported as [`Error::TestFailed`].

use super::class::{Marker, Method, MethodOrder, TestClass};
use super::context::ExtensionContext;
use super::extension::Extension;
use crate::error::{Error, Result};
use rand::seq::SliceRandom;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// One failure reported by a launch.
#[derive(Debug)]
pub struct Failure {
    /// Unique id of the class or test that failed (`Outer/Inner/test`).
    pub test_id: String,
    /// The error raised.
    pub error: Error,
}

/// Outcome of a launch.
#[derive(Debug, Default)]
pub struct TestExecutionSummary {
    /// Number of test methods started.
    pub tests_started: usize,
    /// Number of test methods that completed without failure.
    pub tests_succeeded: usize,
    /// Number of test methods with at least one failure.
    pub tests_failed: usize,
    /// All failures in the order they were raised.
    pub failures: Vec<Failure>,
}

impl TestExecutionSummary {
    /// Errors of all failures.
    pub fn errors(&self) -> Vec<&Error> {
        self.failures.iter().map(|failure| &failure.error).collect()
    }

    /// Consumes the summary, returning the errors.
    pub fn into_errors(self) -> Vec<Error> {
        self.failures.into_iter().map(|failure| failure.error).collect()
    }

    /// `true` if nothing failed.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs [`TestClass`] trees.
pub struct Launcher;

impl Launcher {
    /// Runs one top-level class.
    pub fn run(class: &Arc<TestClass>) -> TestExecutionSummary {
        Self::run_all(std::slice::from_ref(class))
    }

    /// Runs several top-level classes under one root context.
    pub fn run_all(classes: &[Arc<TestClass>]) -> TestExecutionSummary {
        let root = ExtensionContext::root();
        let mut summary = TestExecutionSummary::default();
        for class in classes {
            run_class(class, &root, &[], &mut summary);
        }
        summary
    }

    /// Runs one class and returns the raised errors only.
    pub fn run_and_return_errors(class: &Arc<TestClass>) -> Vec<Error> {
        Self::run(class).into_errors()
    }
}

fn run_class(
    class: &Arc<TestClass>,
    parent: &Arc<ExtensionContext>,
    inherited: &[Arc<dyn Extension>],
    summary: &mut TestExecutionSummary,
) {
    let context = ExtensionContext::for_class(Arc::clone(class), parent);
    let mut extensions: Vec<Arc<dyn Extension>> = inherited.to_vec();
    extensions.extend(class.effective_extensions());

    debug!(target: "testkit::launcher", class = %context.unique_id(), "Starting class");

    let mut errors = Vec::new();
    for extension in &extensions {
        if let Err(e) = guarded(|| extension.before_all(&context)) {
            errors.push(e);
            break;
        }
    }
    if errors.is_empty() {
        for callback in class.effective_methods(Marker::BeforeAll) {
            if let Err(e) = invoke(&callback, &context) {
                errors.push(e);
                break;
            }
        }
    }

    if errors.is_empty() {
        for test in ordered_tests(class) {
            run_test(class, test, &context, &extensions, summary);
        }
        for nested in class.nested() {
            run_class(nested, &context, &extensions, summary);
        }
    }

    let mut after_all = class.effective_methods(Marker::AfterAll);
    after_all.reverse();
    for callback in after_all {
        if let Err(e) = invoke(&callback, &context) {
            errors.push(e);
        }
    }
    for extension in extensions.iter().rev() {
        if let Err(e) = guarded(|| extension.after_all(&context)) {
            errors.push(e);
        }
    }

    for error in errors {
        warn!(target: "testkit::launcher", class = %context.unique_id(), error = %error, "Class failed");
        summary.failures.push(Failure {
            test_id: context.unique_id(),
            error,
        });
    }
}

fn run_test(
    class: &Arc<TestClass>,
    test: Method,
    class_context: &Arc<ExtensionContext>,
    extensions: &[Arc<dyn Extension>],
    summary: &mut TestExecutionSummary,
) {
    let body = test.clone();
    let context = ExtensionContext::for_method(Arc::clone(class), test, class_context);
    summary.tests_started += 1;

    let mut errors = Vec::new();
    for extension in extensions {
        if let Err(e) = guarded(|| extension.before_each(&context)) {
            errors.push(e);
            break;
        }
    }
    if errors.is_empty() {
        for callback in class.effective_methods(Marker::BeforeEach) {
            if let Err(e) = invoke(&callback, &context) {
                errors.push(e);
                break;
            }
        }
    }
    if errors.is_empty() {
        if let Err(e) = invoke(&body, &context) {
            errors.push(e);
        }
    }

    let mut after_each = class.effective_methods(Marker::AfterEach);
    after_each.reverse();
    for callback in after_each {
        if let Err(e) = invoke(&callback, &context) {
            errors.push(e);
        }
    }
    for extension in extensions.iter().rev() {
        if let Err(e) = guarded(|| extension.after_each(&context)) {
            errors.push(e);
        }
    }

    if errors.is_empty() {
        summary.tests_succeeded += 1;
    } else {
        summary.tests_failed += 1;
        for error in errors {
            warn!(target: "testkit::launcher", test = %context.unique_id(), error = %error, "Test failed");
            summary.failures.push(Failure {
                test_id: context.unique_id(),
                error,
            });
        }
    }
}

fn ordered_tests(class: &TestClass) -> Vec<Method> {
    let mut tests = class.effective_methods(Marker::Test);
    match class.method_order() {
        None | Some(MethodOrder::Declared) => {}
        Some(MethodOrder::MethodName) => tests.sort_by(|a, b| a.name().cmp(b.name())),
        Some(MethodOrder::DisplayName) => tests.sort_by_key(|m| m.display_name()),
        Some(MethodOrder::Random) => tests.shuffle(&mut rand::thread_rng()),
    }
    tests
}

fn invoke(method: &Method, context: &ExtensionContext) -> Result<()> {
    match method.body() {
        Some(body) => guarded(|| body(context)),
        None => Ok(()),
    }
}

fn guarded<F>(f: F) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(Error::from_panic(payload.as_ref())),
    }
}
