//! Lifecycle hook contract.

use super::context::ExtensionContext;
use crate::error::Result;

/// Callbacks the launcher invokes around classes and test methods.
///
/// All hooks default to no-ops, so an extension implements only the phases it
/// cares about. `before_all`/`after_all` receive a class context;
/// `before_each`/`after_each` receive a method context.
///
/// Extensions registered on a class also apply to its nested classes, so the
/// class-level hooks of one extension instance can run several times during a
/// single top-level class execution.
pub trait Extension: Send + Sync {
    /// Runs once before any test of the class.
    fn before_all(&self, _context: &ExtensionContext) -> Result<()> {
        Ok(())
    }

    /// Runs once after all tests and nested classes of the class.
    fn after_all(&self, _context: &ExtensionContext) -> Result<()> {
        Ok(())
    }

    /// Runs before each test method.
    fn before_each(&self, _context: &ExtensionContext) -> Result<()> {
        Ok(())
    }

    /// Runs after each test method, even when the test failed.
    fn after_each(&self, _context: &ExtensionContext) -> Result<()> {
        Ok(())
    }
}
