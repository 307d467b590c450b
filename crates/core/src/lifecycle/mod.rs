//! Test-framework glue: class model, contexts, hooks and the launcher.

pub mod class;
pub mod context;
pub mod extension;
pub mod launcher;

pub use class::{AllowedThreads, Marker, Method, MethodOrder, TestClass, TestClassBuilder, TestFn};
pub use context::{ExtensionContext, Store};
pub use extension::Extension;
pub use launcher::{Failure, Launcher, TestExecutionSummary};
